use leptos::*;
use tracing::debug;

use crate::app::{format_weight, use_services, Services};
use crate::controller::Event;
use crate::reachability::Reachability;
use crate::types::{AppView, Friend, FriendRequest, Id, PersonalBest, Program, Session, TemplateWithRows};

#[derive(Clone, Debug, Default, PartialEq)]
struct Social {
    friends: Vec<Friend>,
    incoming: Vec<FriendRequest>,
    outgoing: Vec<FriendRequest>,
}

/// Pull everything the dashboard shows, including the backend's view of the
/// active session.
fn load(
    services: Services,
    set_programs: WriteSignal<Vec<Program>>,
    set_pbs: WriteSignal<Vec<PersonalBest>>,
    set_social: WriteSignal<Social>,
) {
    spawn_local(async move {
        let api = services.api.clone();
        match api.exercises().await {
            Ok(list) => services.exercises.set(list),
            Err(e) => services.report("exercises unavailable", &e),
        }
        match api.programs().await {
            Ok(list) => set_programs.set(list),
            Err(e) => services.report("programs unavailable", &e),
        }
        services.refresh_sessions().await;

        match api.personal_bests().await {
            Ok(list) => set_pbs.set(list),
            Err(e) => debug!(error = %e, "personal bests unavailable"),
        }
        set_social.set(Social {
            friends: api.friends().await.unwrap_or_default(),
            incoming: api.incoming_requests().await.unwrap_or_default(),
            outgoing: api.outgoing_requests().await.unwrap_or_default(),
        });
    });
}

#[component]
pub fn Dashboard() -> impl IntoView {
    let services = use_services();
    let session = services.session;
    let (programs, set_programs) = create_signal(Vec::<Program>::new());
    let (templates, set_templates) = create_signal(Vec::<TemplateWithRows>::new());
    let backend_active = services.backend_active;
    let (pbs, set_pbs) = create_signal(Vec::<PersonalBest>::new());
    let (social, set_social) = create_signal(Social::default());
    let (friend_name, set_friend_name) = create_signal(String::new());

    // Load once reachable, and again after the backend comes back.
    let loaded = store_value(false);
    let was_down = store_value(false);
    {
        let services = services.clone();
        create_effect(move |_| match services.reachability.get() {
            Reachability::NotReady => was_down.set_value(true),
            Reachability::Ready if !loaded.get_value() || was_down.get_value() => {
                loaded.set_value(true);
                was_down.set_value(false);
                load(services.clone(), set_programs, set_pbs, set_social);
            }
            _ => {}
        });
    }

    let select_program = {
        let services = services.clone();
        move |program_id: Option<Id>| {
            services.dispatch(Event::ProgramSelected(program_id));
            set_templates.set(Vec::new());
            let Some(program_id) = program_id else {
                return;
            };
            let services = services.clone();
            spawn_local(async move {
                match services.api.templates(Some(program_id)).await {
                    Ok(list) => set_templates.set(list),
                    Err(e) => services.report("templates unavailable", &e),
                }
            });
        }
    };

    let resume_backend = {
        let services = services.clone();
        move |active: Session| {
            let services = services.clone();
            spawn_local(async move {
                match services.api.templates(None).await {
                    Ok(list) => match list.into_iter().find(|t| t.id() == active.template_id) {
                        Some(template) => {
                            backend_active.set(None);
                            services.dispatch(Event::SessionResumed { session: active, template });
                            services.view.set(AppView::Workout);
                        }
                        None => services.notice.set(Some("Template for this session is gone".into())),
                    },
                    Err(e) => services.report("templates unavailable", &e),
                }
            });
        }
    };

    let send_request = {
        let services = services.clone();
        move |_| {
            let name = friend_name.get();
            if name.trim().is_empty() {
                return;
            }
            let services = services.clone();
            spawn_local(async move {
                match services.api.send_friend_request(name.trim()).await {
                    Ok(_) => {
                        set_friend_name.set(String::new());
                        services.notice.set(Some(format!("Request sent to {}", name.trim())));
                        let outgoing = services.api.outgoing_requests().await.unwrap_or_default();
                        set_social.update(|s| s.outgoing = outgoing);
                    }
                    Err(e) => services.report("friend request failed", &e),
                }
            });
        }
    };

    let answer_request = {
        let services = services.clone();
        move |request_id: Id, accept: bool| {
            let services = services.clone();
            spawn_local(async move {
                match services.api.answer_friend_request(request_id, accept).await {
                    Ok(()) => {
                        let friends = services.api.friends().await.unwrap_or_default();
                        set_social.update(|s| {
                            s.friends = friends;
                            s.incoming.retain(|r| r.id != request_id);
                        });
                    }
                    Err(e) => services.report("friend request answer failed", &e),
                }
            });
        }
    };

    let toggle_public = {
        let services = services.clone();
        move |pb_id: Id, is_public: bool| {
            let services = services.clone();
            spawn_local(async move {
                match services.api.publish_pb(pb_id, is_public).await {
                    Ok(updated) => set_pbs.update(|list| {
                        if let Some(pb) = list.iter_mut().find(|p| p.id == updated.id) {
                            *pb = updated;
                        }
                    }),
                    Err(e) => services.report("could not change PB visibility", &e),
                }
            });
        }
    };

    let services_view = services.clone();
    let user = services.user;
    let view_signal = services.view;
    view! {
        <div class="dashboard">
            <div class="logo">"IRONLOG"</div>
            {move || user.get().map(|u| view! {
                <div class="logged-in-info">"Signed in as "{u.display_name}" (@"{u.username}")"</div>
            })}
            <div class="dashboard-nav">
                <button class="settings-btn" on:click=move |_| view_signal.set(AppView::Builder)>"Plans"</button>
                <button class="settings-btn" on:click=move |_| view_signal.set(AppView::History)>"History"</button>
                <button class="settings-btn" on:click=move |_| {
                    if let Some(u) = user.get_untracked() {
                        view_signal.set(AppView::Profile(u.username));
                    }
                }>"My profile"</button>
            </div>

            {
                let services = services_view.clone();
                move || session.get().is_active().then(|| {
                    let name = session.get().template.map(|t| t.template.name).unwrap_or_default();
                    let view_signal = services.view;
                    view! {
                        <div class="paused-workout-banner">
                            <div class="paused-info">
                                <span class="paused-label">"Workout in progress"</span>
                                <span class="paused-routine">{name}</span>
                            </div>
                            <button class="resume-btn" on:click=move |_| view_signal.set(AppView::Workout)>
                                "Continue →"
                            </button>
                        </div>
                    }
                })
            }

            {
                let services = services_view.clone();
                let resume_backend = resume_backend.clone();
                move || backend_active.get().filter(|_| !session.get().is_active()).map(|active| {
                    let label = format!("{} · {}", active.template_name, active.date);
                    let logged = active.set_logs.len();
                    let resume_backend = resume_backend.clone();
                    let services = services.clone();
                    view! {
                        <div class="paused-workout-banner">
                            <div class="paused-info">
                                <span class="paused-label">"Unfinished session on the server"</span>
                                <span class="paused-routine">{label}</span>
                                <span class="paused-progress">{logged}" sets logged"</span>
                            </div>
                            <button class="resume-btn" on:click=move |_| resume_backend(active.clone())>
                                "Resume"
                            </button>
                            <button class="confirm-cancel" on:click=move |_| {
                                backend_active.set(None);
                                services.clear_active();
                            }>
                                "Discard"
                            </button>
                        </div>
                    }
                })
            }

            <div class="program-select">
                <select on:change={
                    let select_program = select_program.clone();
                    move |ev| select_program(event_target_value(&ev).parse::<Id>().ok())
                }>
                    <option value="">"Choose a program"</option>
                    {move || programs.get().into_iter().map(|p| {
                        let selected = session.get().selected_program_id == Some(p.id);
                        view! { <option value=p.id.to_string() selected=selected>{p.name}</option> }
                    }).collect_view()}
                </select>
            </div>

            {
                let services = services_view.clone();
                move || {
                    let list = templates.get();
                    if list.is_empty() {
                        return view! { <p class="loading-passes">"Pick a program to see its workouts"</p> }.into_view();
                    }
                    let locked = session.get().is_active();
                    view! {
                        <div class="pass-buttons">
                            {list.into_iter().enumerate().map(|(i, template)| {
                                let services = services.clone();
                                let btn_class = format!("start-btn pass-{}", (b'a' + (i % 26) as u8) as char);
                                let name = template.template.name.clone();
                                let description = format!("{} exercises", template.rows().len());
                                view! {
                                    <button
                                        class=btn_class
                                        disabled=locked
                                        on:click=move |_| {
                                            services.dispatch(Event::TemplateSelected(Some(template.id())));
                                            services.begin(template.clone());
                                        }
                                    >
                                        <span class="start-btn-label">{name}</span>
                                        <span class="start-btn-focus">{description}</span>
                                    </button>
                                }
                            }).collect_view()}
                        </div>
                    }.into_view()
                }
            }

            {
                let services = services_view.clone();
                move || {
                    let list = pbs.get();
                    (!list.is_empty()).then(|| {
                        let toggle_public = toggle_public.clone();
                        let services = services.clone();
                        view! {
                            <div class="recent-sessions">
                                <div class="recent-title">"Personal bests"</div>
                                {list.into_iter().map(|pb| {
                                    let toggle_public = toggle_public.clone();
                                    let value = if pb.reps > 0 {
                                        format!("{} × {}", format_weight(pb.value), pb.reps)
                                    } else {
                                        format_weight(pb.value)
                                    };
                                    let (id, public) = (pb.id, pb.is_public);
                                    view! {
                                        <div class="recent-item">
                                            <span class="recent-routine">{services.exercise_name(pb.exercise_id)}</span>
                                            <span class="recent-date">{pb.label}</span>
                                            <span class="recent-duration">{value}</span>
                                            <button class="auth-link" on:click=move |_| toggle_public(id, !public)>
                                                {if public { "public" } else { "private" }}
                                            </button>
                                        </div>
                                    }
                                }).collect_view()}
                            </div>
                        }
                    })
                }
            }

            <div class="recent-sessions">
                <div class="recent-title">"Friends"</div>
                {
                    move || social.get().friends.into_iter().map(|f| {
                        let name = f.display_name.clone().or(f.username.clone()).unwrap_or_else(|| format!("#{}", f.id));
                        let username = f.username;
                        view! {
                            <div class="recent-item">
                                <span class="recent-routine">{name}</span>
                                {username.map(|username| view! {
                                    <button class="auth-link" on:click=move |_| view_signal.set(AppView::Profile(username.clone()))>
                                        "Profile"
                                    </button>
                                })}
                            </div>
                        }
                    }).collect_view()
                }
                {move || social.get().outgoing.into_iter().map(|r| {
                    let name = r.to_display_name.or(r.to_username).unwrap_or_default();
                    view! {
                        <div class="recent-item">
                            <span class="recent-routine">{name}</span>
                            <span class="recent-date">"request pending"</span>
                        </div>
                    }
                }).collect_view()}
                {move || social.get().incoming.into_iter().map(|r| {
                    let answer_request = answer_request.clone();
                    let answer_reject = answer_request.clone();
                    let name = r.from_display_name.or(r.from_username).unwrap_or_default();
                    let id = r.id;
                    view! {
                        <div class="recent-item">
                            <span class="recent-routine">{name}" wants to be friends"</span>
                            <button class="confirm-ok" on:click=move |_| answer_request(id, true)>"Accept"</button>
                            <button class="confirm-cancel" on:click=move |_| answer_reject(id, false)>"Reject"</button>
                        </div>
                    }
                }).collect_view()}
                <div class="friend-add">
                    <input
                        type="text"
                        class="auth-input"
                        placeholder="Username"
                        on:input=move |ev| set_friend_name.set(event_target_value(&ev))
                        prop:value=friend_name
                    />
                    <button class="auth-link" on:click=send_request>"Add friend"</button>
                </div>
            </div>

            <div class="logged-in-info">
                <button class="logout-link" on:click={
                    let services = services_view.clone();
                    move |_| services.api.logout()
                }>"sign out"</button>
            </div>
        </div>
    }
}
