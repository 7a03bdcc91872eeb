use leptos::*;
use tracing::info;

use crate::app::{format_weight, use_services};
use crate::types::{AppView, Id, Session, SessionStatus};

const HISTORY_LIMIT: u32 = 50;

/// Totals shown on a history row.
#[derive(Clone, Copy, Debug, PartialEq)]
struct SessionSummary {
    sets: usize,
    exercises: usize,
    volume: f64,
}

impl SessionSummary {
    fn of(session: &Session) -> Self {
        let mut exercise_ids: Vec<Id> = session.set_logs.iter().map(|l| l.exercise_id).collect();
        exercise_ids.sort_unstable();
        exercise_ids.dedup();
        Self {
            sets: session.set_logs.len(),
            exercises: exercise_ids.len(),
            volume: session.set_logs.iter().map(|l| l.weight * f64::from(l.reps.max(0))).sum(),
        }
    }
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::InProgress => "in progress",
        SessionStatus::Done => "done",
        SessionStatus::Cancelled => "cancelled",
    }
}

/// The session being logged right now can only be ended from the workout screen.
fn can_delete(session: &Session, local_active: Option<Id>) -> bool {
    local_active != Some(session.id)
}

#[component]
pub fn History() -> impl IntoView {
    let services = use_services();
    let session = services.session;
    let view_signal = services.view;
    let (sessions, set_sessions) = create_signal(Vec::<Session>::new());
    let (loading, set_loading) = create_signal(true);
    let (expanded, set_expanded) = create_signal(Option::<Id>::None);
    let (pending_delete, set_pending_delete) = create_signal(Option::<Id>::None);

    {
        let services = services.clone();
        spawn_local(async move {
            match services.api.sessions(HISTORY_LIMIT).await {
                Ok(list) => set_sessions.set(list),
                Err(e) => services.report("history unavailable", &e),
            }
            set_loading.set(false);
        });
    }

    let confirm_delete = {
        let services = services.clone();
        move |_: ev::MouseEvent| {
            let Some(id) = pending_delete.get_untracked() else {
                return;
            };
            let services = services.clone();
            spawn_local(async move {
                match services.api.delete_session(id).await {
                    Ok(()) => {
                        info!(session_id = id, "session deleted");
                        set_sessions.update(|list| list.retain(|s| s.id != id));
                        if services.backend_active.get_untracked().is_some_and(|s| s.id == id) {
                            services.backend_active.set(None);
                        }
                    }
                    Err(e) => services.report("could not delete session", &e),
                }
                set_pending_delete.set(None);
            });
        }
    };

    let services_view = services.clone();
    view! {
        <div class="stats-page">
            <header class="builder-header">
                <button class="back-btn" on:click=move |_| view_signal.set(AppView::Dashboard)>"← Back"</button>
                <h1>"History"</h1>
            </header>

            {move || loading.get().then(|| view! { <p class="loading-text">"Loading..."</p> })}

            <div class="recent-sessions">
                {move || {
                    let list = sessions.get();
                    if list.is_empty() && !loading.get() {
                        return view! { <p class="loading-passes">"No sessions yet"</p> }.into_view();
                    }
                    let local_active = session.with(|s| s.session.as_ref().map(|s| s.id));
                    list.into_iter().map(|s| {
                        let summary = SessionSummary::of(&s);
                        let id = s.id;
                        let deletable = can_delete(&s, local_active);
                        let open = expanded.get() == Some(id);
                        let services = services_view.clone();
                        view! {
                            <div class="recent-item" on:click=move |_| set_expanded.update(|e| *e = if *e == Some(id) { None } else { Some(id) })>
                                <span class="recent-date">{s.date.clone()}</span>
                                <span class="recent-routine">{format!("{} · {}", s.program_name, s.template_name)}</span>
                                <span class="recent-duration">
                                    {format!("{} sets · {} exercises · {} kg", summary.sets, summary.exercises, format_weight(summary.volume))}
                                </span>
                                <span class="recent-status">{status_label(s.status)}</span>
                                {deletable.then(|| view! {
                                    <button class="remove-exercise-btn" on:click=move |ev| {
                                        ev.stop_propagation();
                                        set_pending_delete.set(Some(id));
                                    }>"×"</button>
                                })}
                            </div>
                            {open.then(|| view! {
                                <div class="session-sets">
                                    {s.set_logs.iter().map(|log| view! {
                                        <div class="set-row">
                                            <span class="set-exercise">{services.exercise_name(log.exercise_id)}</span>
                                            <span class="set-number">{format!("#{}", log.set_number)}</span>
                                            <span class="set-weight">{format!("{} kg × {}", format_weight(log.weight), log.reps)}</span>
                                        </div>
                                    }).collect_view()}
                                </div>
                            })}
                        }
                    }).collect_view()
                }}
            </div>

            {move || pending_delete.get().map(|_| {
                let confirm_delete = confirm_delete.clone();
                view! {
                    <div class="modal-overlay">
                        <div class="confirm-dialog">
                            <div class="confirm-title">"Delete session?"</div>
                            <div class="confirm-text">"The session and all its logged sets are removed."</div>
                            <div class="confirm-buttons">
                                <button class="confirm-cancel" on:click=move |_| set_pending_delete.set(None)>"Keep"</button>
                                <button class="confirm-ok" on:click=confirm_delete>"Delete"</button>
                            </div>
                        </div>
                    </div>
                }
            })}
        </div>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SetLog;

    fn log(exercise_id: Id, weight: f64, reps: i32) -> SetLog {
        SetLog { exercise_id, weight, reps, ..Default::default() }
    }

    #[test]
    fn summary_counts_distinct_exercises_and_volume() {
        let session = Session {
            id: 4,
            set_logs: vec![log(1, 100.0, 5), log(1, 100.0, 5), log(2, 20.0, 10), log(3, 50.0, -1)],
            ..Default::default()
        };
        let summary = SessionSummary::of(&session);
        assert_eq!(summary.sets, 4);
        assert_eq!(summary.exercises, 3);
        assert_eq!(summary.volume, 1200.0);
    }

    #[test]
    fn the_session_being_logged_cannot_be_deleted() {
        let s = Session { id: 9, ..Default::default() };
        assert!(!can_delete(&s, Some(9)));
        assert!(can_delete(&s, Some(3)));
        assert!(can_delete(&s, None));
    }

    #[test]
    fn status_labels() {
        assert_eq!(status_label(SessionStatus::Cancelled), "cancelled");
        assert_eq!(status_label(SessionStatus::InProgress), "in progress");
    }
}
