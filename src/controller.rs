//! The session controller owns all in-progress workout state. Input events go
//! through `dispatch`, which applies the transition and returns the side
//! effects (timers, guards, prompts) for the view layer to carry out.
//! Snapshot persistence is handled here directly through the recovery manager.

use tracing::{debug, info, warn};

use crate::config::SNAPSHOT_DEBOUNCE_MS;
use crate::error::{AppError, Result};
use crate::guide::{needs_exercise_choice, Advance, ExerciseChoice, SessionGuide};
use crate::recovery::{PersistedSessionSnapshot, RecoveryManager};
use crate::rest_timer::{parse_rest_seconds, RestSlot};
use crate::storage::LocalPersistence;
use crate::types::{logged_count, CompletionMap, Id, Session, SetLog, SetLogPayload, TemplateWithRows};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionContext {
    pub session: Option<Session>,
    pub template: Option<TemplateWithRows>,
    pub guide: SessionGuide,
    pub active_exercise_id: Option<Id>,
    pub completion: CompletionMap,
    pub rest: RestSlot,
    /// The workout UI is locked to the running session.
    pub locked: bool,
    pub selected_program_id: Option<Id>,
    pub selected_template_id: Option<Id>,
    pub started_at_ms: Option<i64>,
    /// One-time "your session was restored" notice pending.
    pub restored_notice: bool,
}

impl SessionContext {
    pub fn is_active(&self) -> bool {
        self.session.is_some() && self.locked
    }

    pub fn logs(&self) -> &[SetLog] {
        self.session.as_ref().map(|s| s.set_logs.as_slice()).unwrap_or(&[])
    }

    pub fn current_exercise_id(&self) -> Option<Id> {
        self.guide.current_exercise_id(self.template.as_ref()?)
    }

    pub fn logged_count(&self, exercise_id: Id) -> u32 {
        logged_count(self.logs(), exercise_id)
    }

    /// Keeps program/template selections, drops everything session-bound.
    fn end_session(&mut self) {
        *self = SessionContext {
            selected_program_id: self.selected_program_id,
            selected_template_id: self.selected_template_id,
            ..SessionContext::default()
        };
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    ProgramSelected(Option<Id>),
    TemplateSelected(Option<Id>),
    SessionStarted { session: Session, template: TemplateWithRows },
    /// An in-progress session reported by the backend, picked up without a snapshot.
    SessionResumed { session: Session, template: TemplateWithRows },
    /// The backend's in-progress session id, once `/sessions` answers after
    /// a restore that ran offline.
    ActiveSessionReported(Option<Id>),
    SetLogged(SetLog),
    SelectExercise(Id),
    SkipExercise,
    ExerciseChoice { exercise_id: Id, choice: ExerciseChoice },
    RestTick,
    RestSkipped,
    SessionFinished,
    SessionCancelled,
    ActiveCleared,
    PageHidden,
    NoticeDismissed,
    LoggedOut,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Call `flush_snapshot` after this many milliseconds. A newer schedule
    /// replaces an older one.
    ScheduleSnapshot(i64),
    StartRestTicker,
    StopRestTicker,
    InstallGuards,
    RemoveGuards,
    PromptExerciseChoice(Id),
    /// Every exercise is done; finish the session on the backend.
    AutoFinish,
    Notify(String),
}

pub struct SessionController {
    ctx: SessionContext,
    recovery: RecoveryManager,
    persistence: LocalPersistence,
    /// Session brought back from a snapshot, not yet confirmed by the backend.
    unconfirmed: Option<Id>,
}

impl SessionController {
    pub fn new(persistence: LocalPersistence) -> Self {
        Self {
            ctx: SessionContext::default(),
            recovery: RecoveryManager::new(persistence.clone()),
            persistence,
            unconfirmed: None,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn snapshot(&self) -> PersistedSessionSnapshot {
        PersistedSessionSnapshot {
            session: self.ctx.session.clone(),
            template: self.ctx.template.clone(),
            guide: self.ctx.guide.position().cloned(),
            active_exercise_id: self.ctx.active_exercise_id,
            completion: self.ctx.completion.clone(),
            locked: self.ctx.locked,
            selected_program_id: self.ctx.selected_program_id,
            selected_template_id: self.ctx.selected_template_id,
            rest_timer: self.ctx.rest.current(),
            session_started_at: self.ctx.started_at_ms,
            last_updated_at: 0,
            finalized: false,
        }
    }

    /// Write whatever is queued. Called by the debounce timer.
    pub fn flush_snapshot(&mut self, now_ms: i64) -> bool {
        self.recovery.flush(now_ms)
    }

    fn persist_soon(&mut self, effects: &mut Vec<Effect>) {
        self.recovery.queue(self.snapshot());
        effects.push(Effect::ScheduleSnapshot(SNAPSHOT_DEBOUNCE_MS));
    }

    fn persist_now(&mut self, now_ms: i64) {
        self.recovery.queue(self.snapshot());
        self.recovery.flush(now_ms);
    }

    fn save_completion(&self) {
        if let Some(session) = &self.ctx.session {
            self.persistence.save_completion(session.id, &self.ctx.completion);
        }
    }

    /// Check a set before it is sent; returns the payload with the set number
    /// recounted from the logs.
    pub fn prepare_log(&self, exercise_id: Id, weight: f64, reps: i32, rpe: f64, comment: &str) -> Result<SetLogPayload> {
        let ctx = &self.ctx;
        let template = match (&ctx.session, &ctx.template) {
            (Some(_), Some(t)) => t,
            _ => return Err(AppError::validation("No active session")),
        };
        if ctx.rest.is_running() {
            return Err(AppError::validation("Rest timer still running"));
        }
        if ctx.guide.is_completed() {
            return Err(AppError::validation("All exercises are done"));
        }
        if template.row_for(exercise_id).is_none() {
            return Err(AppError::validation("Exercise is not part of this template"));
        }
        if reps <= 0 {
            return Err(AppError::validation("Reps must be at least 1"));
        }
        Ok(SetLogPayload {
            exercise_id,
            set_number: ctx.logged_count(exercise_id) + 1,
            weight: weight.max(0.0),
            reps,
            rpe: rpe.max(0.0),
            comment: comment.trim().to_string(),
        })
    }

    pub fn dispatch(&mut self, event: Event, now_ms: i64) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            Event::ProgramSelected(id) => {
                self.ctx.selected_program_id = id;
                self.ctx.selected_template_id = None;
                if self.ctx.is_active() {
                    self.persist_soon(&mut effects);
                }
            }
            Event::TemplateSelected(id) => {
                self.ctx.selected_template_id = id;
                if self.ctx.is_active() {
                    self.persist_soon(&mut effects);
                }
            }
            Event::SessionStarted { session, template } => {
                info!(session_id = session.id, template_id = template.id(), "session started");
                self.recovery.reset();
                self.unconfirmed = None;
                self.ctx.guide = SessionGuide::initialize_from_template(&template);
                self.ctx.active_exercise_id = self.ctx.guide.current_exercise_id(&template);
                self.ctx.completion = CompletionMap::default();
                self.ctx.rest.clear();
                self.ctx.selected_template_id = Some(template.id());
                self.ctx.session = Some(session);
                self.ctx.template = Some(template);
                self.ctx.locked = true;
                self.ctx.started_at_ms = Some(now_ms);
                self.ctx.restored_notice = false;
                self.persist_now(now_ms);
                effects.push(Effect::StopRestTicker);
                effects.push(Effect::InstallGuards);
            }
            Event::SessionResumed { session, template } => {
                info!(session_id = session.id, "resuming session reported by backend");
                self.recovery.reset();
                self.unconfirmed = None;
                let completion = self.persistence.load_completion(session.id);
                self.ctx.guide = SessionGuide::initialize_from_session(&session.set_logs, &template, &completion, None);
                self.ctx.active_exercise_id = self.ctx.guide.current_exercise_id(&template);
                self.ctx.completion = completion;
                self.ctx.selected_template_id = Some(template.id());
                self.ctx.session = Some(session);
                self.ctx.template = Some(template);
                self.ctx.locked = true;
                self.ctx.started_at_ms.get_or_insert(now_ms);
                self.persist_now(now_ms);
                effects.push(Effect::InstallGuards);
            }
            Event::ActiveSessionReported(active) => {
                let Some(restored) = self.unconfirmed.take() else {
                    return effects;
                };
                if active == Some(restored) || self.ctx.session.as_ref().map(|s| s.id) != Some(restored) {
                    return effects;
                }
                warn!(session_id = restored, ?active, "restored session is no longer active on the backend");
                self.persistence.clear_completion(restored);
                self.recovery.finalize(now_ms);
                self.ctx.end_session();
                effects.push(Effect::StopRestTicker);
                effects.push(Effect::RemoveGuards);
                effects.push(Effect::Notify("That workout already ended on another device".into()));
            }
            Event::SetLogged(log) => self.on_set_logged(log, now_ms, &mut effects),
            Event::SelectExercise(exercise_id) => {
                let (Some(template), Some(session)) = (&self.ctx.template, &self.ctx.session) else {
                    return effects;
                };
                if self
                    .ctx
                    .guide
                    .select_exercise(template, &session.set_logs, &self.ctx.completion, exercise_id)
                {
                    self.ctx.active_exercise_id = Some(exercise_id);
                    if self.ctx.rest.clear() {
                        effects.push(Effect::StopRestTicker);
                    }
                    self.persist_soon(&mut effects);
                } else if self.ctx.completion.is_done(exercise_id) {
                    effects.push(Effect::Notify("That exercise is already done".into()));
                }
            }
            Event::SkipExercise => {
                let Some(template) = &self.ctx.template else {
                    return effects;
                };
                self.ctx.guide.skip_to_next(template);
                self.ctx.active_exercise_id = self.ctx.guide.current_exercise_id(template);
                if self.ctx.rest.clear() {
                    effects.push(Effect::StopRestTicker);
                }
                self.persist_soon(&mut effects);
            }
            Event::ExerciseChoice { exercise_id, choice } => {
                self.on_exercise_choice(exercise_id, choice, now_ms, &mut effects)
            }
            Event::RestTick => {
                if self.ctx.rest.tick(now_ms) == Some(0) {
                    effects.push(Effect::StopRestTicker);
                    self.persist_soon(&mut effects);
                }
            }
            Event::RestSkipped => {
                if self.ctx.rest.clear() {
                    self.persist_soon(&mut effects);
                }
                effects.push(Effect::StopRestTicker);
            }
            Event::SessionFinished | Event::SessionCancelled | Event::ActiveCleared => {
                if let Some(session) = &self.ctx.session {
                    info!(session_id = session.id, "session ended");
                    self.persistence.clear_completion(session.id);
                }
                self.recovery.finalize(now_ms);
                self.ctx.end_session();
                self.unconfirmed = None;
                effects.push(Effect::StopRestTicker);
                effects.push(Effect::RemoveGuards);
            }
            Event::PageHidden => {
                if self.ctx.is_active() {
                    self.persist_now(now_ms);
                } else {
                    self.recovery.flush(now_ms);
                }
            }
            Event::NoticeDismissed => {
                self.ctx.restored_notice = false;
            }
            Event::LoggedOut => {
                self.recovery.finalize(now_ms);
                self.ctx = SessionContext::default();
                self.unconfirmed = None;
                effects.push(Effect::StopRestTicker);
                effects.push(Effect::RemoveGuards);
            }
        }
        effects
    }

    fn on_set_logged(&mut self, log: SetLog, now_ms: i64, effects: &mut Vec<Effect>) {
        let (Some(session), Some(template)) = (self.ctx.session.as_mut(), self.ctx.template.as_ref()) else {
            debug!("set logged without an active session, ignored");
            return;
        };
        let exercise_id = log.exercise_id;
        session.set_logs.push(log);

        let advance = self.ctx.guide.advance_after_log(template, exercise_id);
        debug!(exercise_id, ?advance, "set logged");
        if advance != Advance::Ignored {
            self.ctx.active_exercise_id = self.ctx.guide.current_exercise_id(template);
        }

        let rest = template.row_for(exercise_id).map(|r| parse_rest_seconds(&r.rest)).unwrap_or(0);
        if self.ctx.rest.start(rest, now_ms) {
            effects.push(Effect::StartRestTicker);
        }

        if needs_exercise_choice(template, &session.set_logs, &self.ctx.completion, exercise_id) {
            effects.push(Effect::PromptExerciseChoice(exercise_id));
        }
        self.persist_soon(effects);
    }

    fn on_exercise_choice(&mut self, exercise_id: Id, choice: ExerciseChoice, now_ms: i64, effects: &mut Vec<Effect>) {
        let (Some(session), Some(template)) = (self.ctx.session.as_ref(), self.ctx.template.as_ref()) else {
            return;
        };
        match choice {
            ExerciseChoice::Done => {
                self.ctx.completion.mark_done(exercise_id);
                self.ctx
                    .guide
                    .advance_past(template, &session.set_logs, &self.ctx.completion, exercise_id);
                self.ctx.active_exercise_id = self.ctx.guide.current_exercise_id(template);
                let all_done = self.ctx.completion.all_done(template);
                self.save_completion();
                if all_done {
                    info!(session_id = session.id, "every exercise done");
                    effects.push(Effect::AutoFinish);
                }
            }
            ExerciseChoice::Extra => {
                self.ctx.guide.resume_exercise(template, &session.set_logs, exercise_id);
                self.ctx.active_exercise_id = Some(exercise_id);
            }
        }
        self.persist_soon(effects);
    }

    /// Bring back a snapshot after a reload. Returns whether anything was
    /// restored, plus the effects to re-arm timers and guards.
    pub fn restore(&mut self, known_active: Option<Id>, mark_as_notified: bool, now_ms: i64) -> (bool, Vec<Effect>) {
        let mut effects = Vec::new();
        let restored = match self.recovery.restore(known_active, mark_as_notified) {
            Ok(r) => r,
            Err(reason) => {
                debug!(?reason, "no session restored");
                return (false, effects);
            }
        };
        let snap = restored.snapshot;
        self.ctx.locked = snap.locked || snap.session.is_some();
        self.ctx.active_exercise_id = snap.active_exercise_id;
        self.ctx.completion = restored.completion;
        self.ctx.selected_program_id = snap.selected_program_id;
        self.ctx.selected_template_id = snap.selected_template_id;
        self.ctx.started_at_ms = snap.session_started_at;
        self.ctx.guide = match (&snap.guide, &snap.template, &snap.session) {
            (Some(pos), _, _) => SessionGuide::from_position(Some(pos.clone())),
            (None, Some(t), Some(s)) => {
                SessionGuide::initialize_from_session(&s.set_logs, t, &self.ctx.completion, snap.active_exercise_id)
            }
            _ => SessionGuide::default(),
        };
        self.unconfirmed = snap.session.as_ref().map(|s| s.id);
        self.ctx.session = snap.session;
        self.ctx.template = snap.template;
        self.ctx.rest.clear();
        if let Some(saved) = &snap.rest_timer {
            if self.ctx.rest.resume(saved, now_ms) {
                effects.push(Effect::StartRestTicker);
            }
        }
        self.ctx.restored_notice = restored.show_notice;
        effects.push(Effect::InstallGuards);
        (true, effects)
    }
}
