use leptos::*;
use tracing::info;

use crate::app::{format_weight, use_services};
use crate::types::{AppView, Id, PersonalBest, Program, ProgramDetail, SharedRow, User};

fn is_own_profile(username: &str, user: Option<&User>) -> bool {
    user.is_some_and(|u| u.username.eq_ignore_ascii_case(username))
}

/// "Bench press · 3 × 5 @ 100" for a shared template row.
fn row_label(shared: &SharedRow) -> String {
    let name = shared.exercise.as_ref().map(|e| e.name.as_str()).unwrap_or("(removed exercise)");
    let row = &shared.row;
    let mut label = match (row.planned_sets.is_empty(), row.reps.is_empty()) {
        (false, false) => format!("{} · {} × {}", name, row.planned_sets, row.reps),
        (false, true) => format!("{} · {} sets", name, row.planned_sets),
        (true, false) => format!("{} · {} reps", name, row.reps),
        (true, true) => name.to_string(),
    };
    if !row.planned_weight.is_empty() {
        label.push_str(&format!(" @ {}", row.planned_weight));
    }
    label
}

/// Exercise names come from the profile's shared programs; PBs on
/// exercises outside them fall back to the caller's own list.
fn pb_exercise_name(pb: &PersonalBest, detail: Option<&ProgramDetail>, own: impl Fn(Id) -> String) -> String {
    detail
        .into_iter()
        .flat_map(|d| d.templates.iter())
        .flat_map(|t| t.exercises.iter())
        .filter_map(|r| r.exercise.as_ref())
        .find(|e| e.id == pb.exercise_id)
        .map(|e| e.name.clone())
        .unwrap_or_else(|| own(pb.exercise_id))
}

#[component]
pub fn Profile(username: String) -> impl IntoView {
    let services = use_services();
    let view_signal = services.view;
    let own = is_own_profile(&username, services.user.get_untracked().as_ref());
    let (pbs, set_pbs) = create_signal(Vec::<PersonalBest>::new());
    let (programs, set_programs) = create_signal(Vec::<Program>::new());
    let (detail, set_detail) = create_signal(Option::<ProgramDetail>::None);
    let (copying, set_copying) = create_signal(false);

    {
        let services = services.clone();
        let username = username.clone();
        spawn_local(async move {
            match services.api.public_pbs(&username).await {
                Ok(list) => set_pbs.set(list),
                Err(e) => services.report("profile PBs unavailable", &e),
            }
            match services.api.user_programs(&username).await {
                Ok(list) => set_programs.set(list),
                Err(e) => services.report("profile programs unavailable", &e),
            }
        });
    }

    let open_program = {
        let services = services.clone();
        let username = username.clone();
        move |program_id: Id| {
            if detail.get_untracked().is_some_and(|d| d.program.id == program_id) {
                set_detail.set(None);
                return;
            }
            let services = services.clone();
            let username = username.clone();
            spawn_local(async move {
                match services.api.user_program(&username, program_id).await {
                    Ok(full) => set_detail.set(Some(full)),
                    Err(e) => services.report("program unavailable", &e),
                }
            });
        }
    };

    let copy_program = {
        let services = services.clone();
        move |program_id: Id| {
            set_copying.set(true);
            let services = services.clone();
            spawn_local(async move {
                match services.api.copy_program(program_id).await {
                    Ok(copy) => {
                        info!(source = program_id, program_id = copy.id, "program copied");
                        services.notice.set(Some(format!("Copied as \"{}\"", copy.name)));
                    }
                    Err(e) => services.report("could not copy program", &e),
                }
                set_copying.set(false);
            });
        }
    };

    let services_view = services.clone();
    view! {
        <div class="stats-page">
            <header class="builder-header">
                <button class="back-btn" on:click=move |_| view_signal.set(AppView::Dashboard)>"← Back"</button>
                <h1>{format!("@{}", username)}</h1>
            </header>

            <div class="recent-sessions">
                <div class="recent-title">{if own { "My personal bests" } else { "Public personal bests" }}</div>
                {move || {
                    let list = pbs.get();
                    if list.is_empty() {
                        return view! { <p class="loading-passes">"Nothing shared yet"</p> }.into_view();
                    }
                    let services = services_view.clone();
                    let shown = detail.get();
                    list.into_iter().map(|pb| {
                        let name = pb_exercise_name(&pb, shown.as_ref(), |id| services.exercise_name(id));
                        let value = if pb.reps > 0 {
                            format!("{} × {}", format_weight(pb.value), pb.reps)
                        } else {
                            format_weight(pb.value)
                        };
                        view! {
                            <div class="recent-item">
                                <span class="recent-routine">{name}</span>
                                <span class="recent-date">{pb.label}</span>
                                <span class="recent-duration">{value}</span>
                            </div>
                        }
                    }).collect_view()
                }}
            </div>

            <div class="recent-sessions">
                <div class="recent-title">"Programs"</div>
                {move || programs.get().into_iter().map(|p| {
                    let open_program = open_program.clone();
                    let copy_program = copy_program.clone();
                    let id = p.id;
                    view! {
                        <div class="recent-item">
                            <span class="recent-routine" on:click=move |_| open_program(id)>{p.name}</span>
                            <span class="recent-date">{p.description}</span>
                            {(!own).then(|| view! {
                                <button class="auth-link" disabled=move || copying.get() on:click=move |_| copy_program(id)>
                                    "Copy"
                                </button>
                            })}
                        </div>
                    }
                }).collect_view()}
            </div>

            {move || detail.get().map(|full| view! {
                <div class="pass-editor">
                    <div class="recent-title">{full.program.name}</div>
                    {full.templates.into_iter().map(|t| view! {
                        <div class="pass-exercises">
                            <div class="pass-name">{t.template.name}</div>
                            {t.exercises.iter().map(|r| view! {
                                <div class="exercise-item">
                                    <span class="exercise-name">{row_label(r)}</span>
                                </div>
                            }).collect_view()}
                        </div>
                    }).collect_view()}
                </div>
            })}
        </div>
    }
}
