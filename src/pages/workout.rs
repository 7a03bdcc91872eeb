use leptos::*;
use tracing::warn;

use crate::app::{format_clock, format_weight, now_ms, use_services};
use crate::controller::Event;
use crate::guide::ExerciseChoice;
use crate::types::{estimate_one_rm, AppView, Id};

#[derive(Clone, Copy, PartialEq)]
enum Confirm {
    Finish,
    Cancel,
}

fn parse_number(raw: &str) -> f64 {
    raw.trim().replace(',', ".").parse().unwrap_or(0.0)
}

/// First number in a free-text target such as "8-10" or "60 kg".
fn leading_number(raw: &str) -> String {
    raw.trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect()
}

#[component]
pub fn Workout() -> impl IntoView {
    let services = use_services();
    let session = services.session;
    let choice_prompt = services.choice_prompt;

    let (weight, set_weight) = create_signal(String::new());
    let (reps, set_reps) = create_signal(String::new());
    let (rpe, set_rpe) = create_signal(String::new());
    let (comment, set_comment) = create_signal(String::new());
    let (error, set_error) = create_signal(Option::<String>::None);
    let (saving, set_saving) = create_signal(false);
    let (confirm, set_confirm) = create_signal(Option::<Confirm>::None);

    let (clock, set_clock) = create_signal(now_ms());
    let handle = gloo_timers::callback::Interval::new(1000, move || set_clock.set(now_ms()));
    on_cleanup(move || drop(handle));

    let target_exercise = move || {
        session.with(|ctx| ctx.active_exercise_id.or_else(|| ctx.current_exercise_id()))
    };

    // Prefill the form from the template row whenever the exercise changes.
    create_effect(move |prev: Option<Option<Id>>| {
        let current = target_exercise();
        if prev != Some(current) {
            let row = session.with_untracked(|ctx| {
                let template = ctx.template.as_ref()?;
                current.and_then(|id| template.row_for(id).cloned())
            });
            if let Some(row) = row {
                set_weight.set(leading_number(&row.planned_weight));
                set_reps.set(leading_number(&row.reps));
                set_rpe.set(leading_number(&row.rpe));
            }
            set_error.set(None);
        }
        current
    });

    let submit = {
        let services = services.clone();
        move |_: ev::MouseEvent| {
            let Some(exercise_id) = target_exercise() else {
                set_error.set(Some("No exercise selected".into()));
                return;
            };
            let reps_value = reps.get().trim().parse::<i32>().unwrap_or(0);
            let payload = match services.prepare_log(
                exercise_id,
                parse_number(&weight.get()),
                reps_value,
                parse_number(&rpe.get()),
                &comment.get(),
            ) {
                Ok(payload) => payload,
                Err(e) => {
                    set_error.set(e.user_message());
                    return;
                }
            };
            let Some(session_id) = session.with_untracked(|ctx| ctx.session.as_ref().map(|s| s.id)) else {
                return;
            };

            set_saving.set(true);
            set_error.set(None);
            let services = services.clone();
            spawn_local(async move {
                match services.api.log_set(session_id, &payload).await {
                    Ok(log) => {
                        services.dispatch(Event::SetLogged(log));
                        set_comment.set(String::new());
                    }
                    Err(e) => {
                        warn!(session_id, error = %e, "set not logged");
                        set_error.set(e.user_message());
                    }
                }
                set_saving.set(false);
            });
        }
    };

    let services_view = services.clone();
    view! {
        <div class="workout">
            {
                let services = services_view.clone();
                move || (!session.get().is_active()).then(|| {
                    let view_signal = services.view;
                    view! {
                        <div class="no-routine">
                            <p>"No workout in progress"</p>
                            <button class="create-routine-link" on:click=move |_| view_signal.set(AppView::Dashboard)>
                                "Back to dashboard →"
                            </button>
                        </div>
                    }
                })
            }

            {
                let services = services_view.clone();
                move || session.get().restored_notice.then(|| {
                    let services = services.clone();
                    view! {
                        <div class="paused-workout-banner">
                            <span class="paused-label">"Your workout was restored"</span>
                            <button class="resume-btn" on:click=move |_| services.dispatch(Event::NoticeDismissed)>
                                "OK"
                            </button>
                        </div>
                    }
                })
            }

            <div class="workout-header">
                <button class="back-btn" on:click={
                    let view_signal = services_view.view;
                    move |_| view_signal.set(AppView::Dashboard)
                }>"←"</button>
                <span class="workout-title">
                    {move || session.with(|ctx| ctx.template.as_ref().map(|t| t.template.name.clone()).unwrap_or_default())}
                </span>
                <span class="workout-timer">
                    {move || {
                        let started = session.with(|ctx| ctx.started_at_ms);
                        let secs = started.map(|s| ((clock.get() - s).max(0) / 1000) as u32).unwrap_or(0);
                        format_clock(secs)
                    }}
                </span>
            </div>

            <ExerciseOverview />

            {
                let services = services_view.clone();
                move || session.with(|ctx| ctx.rest.current()).map(|timer| {
                    let services = services.clone();
                    let next = session.with(|ctx| ctx.current_exercise_id()).map(|id| services.exercise_name(id));
                    view! {
                        <div class="rest-screen">
                            <div class="rest-label">"Rest"</div>
                            <div class="rest-timer">{format_clock(timer.remaining_seconds)}</div>
                            {next.map(|name| view! {
                                <div class="rest-next">
                                    <span class="rest-next-label">"Next: "</span>
                                    <span class="rest-next-exercise">{name}</span>
                                </div>
                            })}
                            <button class="rest-continue-btn" on:click=move |_| services.dispatch(Event::RestSkipped)>
                                "Skip rest"
                            </button>
                        </div>
                    }
                })
            }

            {
                let services = services_view.clone();
                let submit = submit.clone();
                move || {
                    let resting = session.with(|ctx| ctx.rest.is_running());
                    let completed = session.with(|ctx| ctx.guide.is_completed());
                    let exercise = target_exercise();
                    if !session.get().is_active() || resting {
                        return ().into_view();
                    }
                    if completed {
                        return view! {
                            <div class="exercise-hint">"All planned sets are logged. Finish when ready."</div>
                        }.into_view();
                    }
                    let Some(exercise_id) = exercise else {
                        return ().into_view();
                    };
                    let name = services.exercise_name(exercise_id);
                    let (set_number, planned) = session.with(|ctx| {
                        let planned = ctx
                            .template
                            .as_ref()
                            .and_then(|t| t.row_for(exercise_id))
                            .map(|r| r.planned_set_count())
                            .unwrap_or(1);
                        (ctx.logged_count(exercise_id) + 1, planned)
                    });
                    let submit = submit.clone();
                    view! {
                        <div class="workout-main">
                            <div class="exercise-name">{name}</div>
                            <div class="progress-dots">{format!("Set {} of {}", set_number, planned)}</div>

                            {move || error.get().map(|e| view! { <div class="auth-error">{e}</div> })}

                            <div class="weight-section">
                                <input class="weight-value" type="text" inputmode="decimal" placeholder="kg"
                                    on:input=move |ev| set_weight.set(event_target_value(&ev))
                                    prop:value=weight />
                                <input class="rep-buttons" type="text" inputmode="numeric" placeholder="reps"
                                    on:input=move |ev| set_reps.set(event_target_value(&ev))
                                    prop:value=reps />
                                <input class="rep-label" type="text" inputmode="decimal" placeholder="RPE"
                                    on:input=move |ev| set_rpe.set(event_target_value(&ev))
                                    prop:value=rpe />
                            </div>
                            <input class="auth-input" type="text" placeholder="Comment"
                                on:input=move |ev| set_comment.set(event_target_value(&ev))
                                prop:value=comment />

                            <button class="timer-start-btn" on:click=submit disabled=move || saving.get()>
                                {move || if saving.get() { "Saving..." } else { "Log set" }}
                            </button>
                        </div>
                    }.into_view()
                }
            }

            <LoggedSets />

            <div class="workout-footer">
                <button class="skip-exercise-btn" on:click={
                    let services = services_view.clone();
                    move |_| services.dispatch(Event::SkipExercise)
                }>"Skip exercise"</button>
                <button class="confirm-cancel" on:click=move |_| set_confirm.set(Some(Confirm::Cancel))>"Cancel"</button>
                <button class="confirm-ok" on:click=move |_| set_confirm.set(Some(Confirm::Finish))>"Finish"</button>
            </div>

            {
                let services = services_view.clone();
                move || choice_prompt.get().map(|exercise_id| {
                    let name = services.exercise_name(exercise_id);
                    let done = services.clone();
                    let extra = services.clone();
                    view! {
                        <div class="modal-overlay">
                            <div class="confirm-dialog">
                                <div class="confirm-title">{name}</div>
                                <div class="confirm-text">"All planned sets logged. Done with this exercise?"</div>
                                <div class="confirm-buttons">
                                    <button class="confirm-cancel" on:click=move |_| extra.answer_choice(exercise_id, ExerciseChoice::Extra)>
                                        "One more set"
                                    </button>
                                    <button class="confirm-ok" on:click=move |_| done.answer_choice(exercise_id, ExerciseChoice::Done)>
                                        "Done"
                                    </button>
                                </div>
                            </div>
                        </div>
                    }
                })
            }

            {
                let services = services_view.clone();
                move || confirm.get().map(|kind| {
                    let services = services.clone();
                    let (title, text) = match kind {
                        Confirm::Finish => ("Finish workout?", "The session is saved and closed."),
                        Confirm::Cancel => ("Cancel workout?", "The session is closed as cancelled."),
                    };
                    view! {
                        <div class="modal-overlay">
                            <div class="confirm-dialog">
                                <div class="confirm-title">{title}</div>
                                <div class="confirm-text">{text}</div>
                                <div class="confirm-buttons">
                                    <button class="confirm-cancel" on:click=move |_| set_confirm.set(None)>"Back"</button>
                                    <button class="confirm-ok" on:click=move |_| {
                                        set_confirm.set(None);
                                        match kind {
                                            Confirm::Finish => services.finish(),
                                            Confirm::Cancel => services.cancel(),
                                        }
                                    }>"Yes"</button>
                                </div>
                            </div>
                        </div>
                    }
                })
            }
        </div>
    }
}

/// Every template row with its progress; tapping one jumps the guide there.
#[component]
fn ExerciseOverview() -> impl IntoView {
    let services = use_services();
    let session = services.session;

    move || {
        let ctx = session.get();
        let Some(template) = ctx.template.clone() else {
            return ().into_view();
        };
        let current = ctx.active_exercise_id.or_else(|| ctx.current_exercise_id());
        view! {
            <div class="overview-modal">
                {template.rows().iter().map(|row| {
                    let services = services.clone();
                    let exercise_id = row.exercise_id;
                    let done = ctx.completion.is_done(exercise_id);
                    let logged = ctx.logged_count(exercise_id);
                    let icon = if done { "✓" } else if current == Some(exercise_id) { "▶" } else { "○" };
                    let class = if done { "overview-item done" } else { "overview-item" };
                    let name = services.exercise_name(exercise_id);
                    view! {
                        <div class=class on:click=move |_| services.dispatch(Event::SelectExercise(exercise_id))>
                            <span class="overview-icon">{icon}</span>
                            <span class="overview-name">{name}</span>
                            <span class="overview-sets">{format!("{}/{}", logged, row.planned_set_count())}</span>
                        </div>
                    }
                }).collect_view()}
            </div>
        }.into_view()
    }
}

#[component]
fn LoggedSets() -> impl IntoView {
    let services = use_services();
    let session = services.session;

    move || {
        let logs = session.with(|ctx| ctx.logs().to_vec());
        (!logs.is_empty()).then(|| view! {
            <div class="recent-sessions">
                <div class="recent-title">"Logged"</div>
                {logs.into_iter().rev().map(|log| {
                    let e1rm = estimate_one_rm(log.weight, log.reps);
                    view! {
                        <div class="recent-item">
                            <span class="recent-routine">{services.exercise_name(log.exercise_id)}</span>
                            <span class="recent-date">{format!("#{} {} × {}", log.set_number, format_weight(log.weight), log.reps)}</span>
                            <span class="recent-duration">{format!("e1RM {}", format_weight(e1rm.round()))}</span>
                        </div>
                    }
                }).collect_view()}
            </div>
        })
    }
}
