use std::cell::RefCell;
use std::rc::Rc;

use gloo_timers::callback::{Interval, Timeout};
use gloo_timers::future::TimeoutFuture;
use leptos::*;
use tracing::{debug, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::api::ApiClient;
use crate::config::{AppConfig, REST_TICK_MS};
use crate::controller::{Effect, Event, SessionContext, SessionController};
use crate::error::{AppError, Result};
use crate::guide::ExerciseChoice;
use crate::nav_guard::NavigationGuard;
use crate::pages::{Builder, Dashboard, History, Login, Profile, Register, Workout};
use crate::reachability::Reachability;
use crate::storage::LocalPersistence;
use crate::transport::FetchTransport;
use crate::types::{AppView, Exercise, Id, Session, SessionStatus, SetLogPayload, TemplateWithRows, User};

pub type Api = ApiClient<FetchTransport>;

pub fn now_ms() -> i64 {
    js_sys::Date::now() as i64
}

pub fn format_clock(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

pub fn format_weight(w: f64) -> String {
    if w.fract() == 0.0 {
        format!("{:.0}", w)
    } else {
        format!("{:.1}", w)
    }
}

/// Stop an interval now, release its closure after the current callback returns.
fn retire(interval: Interval) {
    let callback = interval.cancel();
    spawn_local(async move { drop(callback) });
}

/// Shared app state: the backend client, the session controller, and the
/// timers and listeners its effects drive. Cloned into every closure.
#[derive(Clone)]
pub struct Services {
    pub api: Rc<Api>,
    controller: Rc<RefCell<SessionController>>,
    guard: Rc<RefCell<NavigationGuard>>,
    rest_ticker: Rc<RefCell<Option<Interval>>>,
    snapshot_timer: Rc<RefCell<Option<Timeout>>>,
    pub session: RwSignal<SessionContext>,
    pub reachability: RwSignal<Reachability>,
    pub choice_prompt: RwSignal<Option<Id>>,
    pub notice: RwSignal<Option<String>>,
    pub exercises: RwSignal<Vec<Exercise>>,
    pub user: RwSignal<Option<User>>,
    /// In-progress session the backend reports, shown when none runs locally.
    pub backend_active: RwSignal<Option<Session>>,
    pub view: RwSignal<AppView>,
}

impl Services {
    pub fn new() -> Self {
        let persistence = LocalPersistence::browser();
        let transport = Rc::new(FetchTransport);
        let monitor = Rc::new(crate::reachability::ReachabilityMonitor::new(
            transport.clone(),
            persistence.clone(),
            AppConfig::default(),
        ));
        let api = Rc::new(ApiClient::new(transport, monitor, persistence.clone()));
        let initial = if api.is_signed_in() { AppView::Dashboard } else { AppView::Login };

        Self {
            api,
            controller: Rc::new(RefCell::new(SessionController::new(persistence))),
            guard: Rc::new(RefCell::new(NavigationGuard::new())),
            rest_ticker: Rc::new(RefCell::new(None)),
            snapshot_timer: Rc::new(RefCell::new(None)),
            session: create_rw_signal(SessionContext::default()),
            reachability: create_rw_signal(Reachability::Unknown),
            choice_prompt: create_rw_signal(None),
            notice: create_rw_signal(None),
            exercises: create_rw_signal(Vec::new()),
            user: create_rw_signal(None),
            backend_active: create_rw_signal(None),
            view: create_rw_signal(initial),
        }
    }

    /// Hook the monitor, the client and the page lifecycle into the app.
    fn wire(&self) {
        let reachability = self.reachability;
        self.api.monitor().set_observer(move |state| reachability.set(state));

        let this = self.clone();
        self.api.monitor().set_on_degraded(move || this.start_polling());

        let this = self.clone();
        self.api.set_on_logout(move || {
            info!("signed out");
            this.dispatch(Event::LoggedOut);
            this.choice_prompt.set(None);
            this.user.set(None);
            this.backend_active.set(None);
            this.view.set(AppView::Login);
        });

        let Some(window) = web_sys::window() else {
            return;
        };
        let this = self.clone();
        let on_hide = Closure::<dyn FnMut()>::new(move || this.dispatch(Event::PageHidden));
        let _ = window.add_event_listener_with_callback("pagehide", on_hide.as_ref().unchecked_ref());
        on_hide.forget();

        let this = self.clone();
        let on_visibility = Closure::<dyn FnMut()>::new(move || {
            let hidden = web_sys::window()
                .and_then(|w| w.document())
                .map(|d| d.visibility_state() == web_sys::VisibilityState::Hidden)
                .unwrap_or(false);
            if hidden {
                this.dispatch(Event::PageHidden);
            }
        });
        if let Some(document) = window.document() {
            let _ = document.add_event_listener_with_callback("visibilitychange", on_visibility.as_ref().unchecked_ref());
        }
        on_visibility.forget();
    }

    /// First base detection, then the account data. A failed detection
    /// starts the poll loop through the degraded hook, and the account
    /// requests below wait for it.
    fn boot(&self, restored: bool) {
        let this = self.clone();
        spawn_local(async move {
            this.api.monitor().detect_base().await;
            if this.api.is_signed_in() {
                this.load_account(restored).await;
            }
        });
    }

    /// Who is signed in and their exercise names. After an offline restore
    /// the backend's session list confirms or ends the restored session.
    pub async fn load_account(&self, check_restored: bool) {
        match self.api.me().await {
            Ok(user) => {
                debug!(user = %user.username, "account loaded");
                self.user.set(Some(user));
            }
            Err(e) => self.report("account unavailable", &e),
        }
        match self.api.exercises().await {
            Ok(list) => self.exercises.set(list),
            Err(e) => self.report("exercises unavailable", &e),
        }
        if check_restored {
            self.refresh_sessions().await;
        }
    }

    /// Fetch the backend's session list and reconcile the local session with it.
    pub async fn refresh_sessions(&self) {
        let sessions = match self.api.sessions(20).await {
            Ok(list) => list,
            Err(e) => {
                self.report("session list unavailable", &e);
                return;
            }
        };
        let active = sessions.into_iter().find(|s| s.status == SessionStatus::InProgress);
        debug!(known_active = ?active.as_ref().map(|s| s.id), "backend session state");
        self.dispatch(Event::ActiveSessionReported(active.as_ref().map(|s| s.id)));
        if !self.session.get_untracked().is_active() && self.view.get_untracked() == AppView::Workout {
            self.view.set(AppView::Dashboard);
        }
        self.backend_active.set(active);
    }

    /// Log a failed call; show it only when the user can act on it. Outages
    /// are already covered by the startup overlay.
    pub fn report(&self, what: &str, error: &AppError) {
        warn!(error = %error, "{}", what);
        if let Some(message) = error.user_message() {
            self.notice.set(Some(message));
        }
    }

    fn start_polling(&self) {
        let monitor = self.api.monitor().clone();
        spawn_local(async move {
            monitor.run_poll_loop(TimeoutFuture::new).await;
        });
    }

    pub fn dispatch(&self, event: Event) {
        let effects = self.controller.borrow_mut().dispatch(event, now_ms());
        self.sync();
        self.run_effects(effects);
    }

    /// Try to bring back a stored session. Enters the workout view when it does.
    fn restore(&self) -> bool {
        let (restored, effects) = self.controller.borrow_mut().restore(None, false, now_ms());
        self.sync();
        self.run_effects(effects);
        if restored {
            self.view.set(AppView::Workout);
        }
        restored
    }

    pub fn prepare_log(&self, exercise_id: Id, weight: f64, reps: i32, rpe: f64, comment: &str) -> Result<SetLogPayload> {
        self.controller.borrow().prepare_log(exercise_id, weight, reps, rpe, comment)
    }

    pub fn answer_choice(&self, exercise_id: Id, choice: ExerciseChoice) {
        self.choice_prompt.set(None);
        self.dispatch(Event::ExerciseChoice { exercise_id, choice });
    }

    pub fn exercise_name(&self, exercise_id: Id) -> String {
        self.exercises.with(|list| {
            list.iter()
                .find(|e| e.id == exercise_id)
                .map(|e| e.name.clone())
                .unwrap_or_else(|| format!("Exercise #{}", exercise_id))
        })
    }

    fn sync(&self) {
        let ctx = self.controller.borrow().context().clone();
        self.session.set(ctx);
    }

    fn session_id(&self) -> Option<Id> {
        self.controller.borrow().context().session.as_ref().map(|s| s.id)
    }

    pub fn begin(&self, template: TemplateWithRows) {
        let this = self.clone();
        spawn_local(async move {
            let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
            match this.api.start_session(template.id(), Some(&date)).await {
                Ok(session) => {
                    this.dispatch(Event::SessionStarted { session, template });
                    this.view.set(AppView::Workout);
                }
                Err(e) => this.report("could not start session", &e),
            }
        });
    }

    pub fn finish(&self) {
        self.end_with(true);
    }

    pub fn cancel(&self) {
        self.end_with(false);
    }

    fn end_with(&self, finish: bool) {
        let Some(session_id) = self.session_id() else {
            return;
        };
        let this = self.clone();
        spawn_local(async move {
            let result = if finish {
                this.api.finish_session(session_id).await
            } else {
                this.api.cancel_session(session_id).await
            };
            match result {
                Ok(_) => {
                    this.choice_prompt.set(None);
                    if finish {
                        this.dispatch(Event::SessionFinished);
                        this.notice.set(Some("Workout saved".into()));
                    } else {
                        this.dispatch(Event::SessionCancelled);
                    }
                    this.view.set(AppView::Dashboard);
                }
                Err(e) => {
                    debug!(session_id, finish, "ending session failed");
                    this.report("could not end session", &e);
                }
            }
        });
    }

    pub fn clear_active(&self) {
        let this = self.clone();
        spawn_local(async move {
            match this.api.clear_active().await {
                Ok(cleared) => {
                    info!(cleared = cleared.cleared, "active sessions cleared");
                    this.dispatch(Event::ActiveCleared);
                    this.backend_active.set(None);
                    this.notice.set(Some(format!("Cleared {} active session(s)", cleared.cleared)));
                }
                Err(e) => this.report("could not clear active sessions", &e),
            }
        });
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            debug!(?effect, "running effect");
            match effect {
                Effect::ScheduleSnapshot(delay) => {
                    let controller = self.controller.clone();
                    let timer = Timeout::new(delay.max(0) as u32, move || {
                        controller.borrow_mut().flush_snapshot(now_ms());
                    });
                    *self.snapshot_timer.borrow_mut() = Some(timer);
                }
                Effect::StartRestTicker => {
                    let this = self.clone();
                    let ticker = Interval::new(REST_TICK_MS, move || this.dispatch(Event::RestTick));
                    let previous = self.rest_ticker.borrow_mut().replace(ticker);
                    if let Some(previous) = previous {
                        retire(previous);
                    }
                }
                Effect::StopRestTicker => {
                    let previous = self.rest_ticker.borrow_mut().take();
                    if let Some(previous) = previous {
                        retire(previous);
                    }
                }
                Effect::InstallGuards => {
                    let this = self.clone();
                    self.guard.borrow_mut().install(move || this.leave_confirmed());
                }
                Effect::RemoveGuards => self.guard.borrow_mut().teardown(),
                Effect::PromptExerciseChoice(exercise_id) => self.choice_prompt.set(Some(exercise_id)),
                Effect::AutoFinish => self.finish(),
                Effect::Notify(message) => self.notice.set(Some(message)),
            }
        }
    }

    /// The user confirmed leaving through back navigation: save, drop the
    /// guards, then let the back press through.
    fn leave_confirmed(&self) {
        self.dispatch(Event::PageHidden);
        let guard = self.guard.clone();
        spawn_local(async move {
            guard.borrow_mut().teardown();
            if let Some(history) = web_sys::window().and_then(|w| w.history().ok()) {
                let _ = history.back();
            }
        });
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new()
    }
}

pub fn use_services() -> Services {
    expect_context::<Services>()
}

#[component]
pub fn App() -> impl IntoView {
    let services = Services::new();
    services.wire();
    // Local only: a saved session comes back before any request is made.
    let restored = services.api.is_signed_in() && services.restore();
    services.boot(restored);
    provide_context(services.clone());

    let view = services.view;
    view! {
        <div class="app">
            <StatusDot />
            <StartupOverlay />
            <Notice />
            {move || match view.get() {
                AppView::Login => view! { <Login /> }.into_view(),
                AppView::Register => view! { <Register /> }.into_view(),
                AppView::Dashboard => view! { <Dashboard /> }.into_view(),
                AppView::Workout => view! { <Workout /> }.into_view(),
                AppView::Builder => view! { <Builder /> }.into_view(),
                AppView::History => view! { <History /> }.into_view(),
                AppView::Profile(username) => view! { <Profile username=username /> }.into_view(),
            }}
        </div>
    }
}

/// Blocks the UI while the backend is not answering.
#[component]
fn StartupOverlay() -> impl IntoView {
    let reachability = use_services().reachability;
    let visible = move || matches!(reachability.get(), Reachability::NotReady);

    move || visible().then(|| view! {
        <div class="modal-overlay startup-overlay">
            <div class="confirm-dialog">
                <div class="spinner"></div>
                <div class="confirm-title">"Starting up..."</div>
                <div class="confirm-text">"Waiting for the server to answer. This page will continue on its own."</div>
            </div>
        </div>
    })
}

#[component]
fn StatusDot() -> impl IntoView {
    let reachability = use_services().reachability;
    view! {
        <span
            class=move || format!("status-dot status-{:?}", reachability.get()).to_lowercase()
            title=move || format!("{:?}", reachability.get())
        >
            {move || reachability.get().glyph()}
        </span>
    }
}

#[component]
fn Notice() -> impl IntoView {
    let notice = use_services().notice;
    move || notice.get().map(|message| view! {
        <div class="toast" on:click=move |_| notice.set(None)>{message}</div>
    })
}
