use leptos::*;
use tracing::{info, warn};

use crate::app::use_services;
use crate::error::AppError;
use crate::types::AppView;

/// Form error for a failed sign-in or registration. Outages stay in the log;
/// the overlay already says the server is down.
fn form_error(error: &AppError) -> Option<String> {
    match error {
        AppError::Unauthorized => Some("Wrong username or password".into()),
        other => {
            warn!(error = %other, "auth request failed");
            other.user_message()
        }
    }
}

#[component]
pub fn Login() -> impl IntoView {
    let services = use_services();
    let (username, set_username) = create_signal(String::new());
    let (password, set_password) = create_signal(String::new());
    let (error, set_error) = create_signal(Option::<String>::None);
    let (loading, set_loading) = create_signal(false);

    let do_login = {
        let services = services.clone();
        move |_| {
            let username = username.get();
            let password = password.get();
            if username.trim().is_empty() || password.is_empty() {
                set_error.set(Some("Enter username and password".into()));
                return;
            }
            set_loading.set(true);
            set_error.set(None);

            let services = services.clone();
            spawn_local(async move {
                match services.api.login(username.trim(), &password).await {
                    Ok(auth) => {
                        info!(user = %auth.user.username, "signed in");
                        services.user.set(Some(auth.user));
                        services.view.set(AppView::Dashboard);
                        services.load_account(false).await;
                    }
                    Err(e) => {
                        set_error.set(form_error(&e));
                        set_loading.set(false);
                    }
                }
            });
        }
    };

    let view_signal = services.view;
    view! {
        <div class="auth-container">
            <div class="auth-logo">"IRONLOG"</div>
            <div class="auth-card">
                <h2 class="auth-title">"Sign in"</h2>

                {move || error.get().map(|e| view! { <div class="auth-error">{e}</div> })}

                <input
                    type="text"
                    class="auth-input"
                    placeholder="Username or email"
                    on:input=move |ev| set_username.set(event_target_value(&ev))
                    prop:value=username
                />

                <input
                    type="password"
                    class="auth-input"
                    placeholder="Password"
                    on:input=move |ev| set_password.set(event_target_value(&ev))
                    prop:value=password
                />

                <button
                    class="auth-button"
                    on:click=do_login
                    disabled=move || loading.get()
                >
                    {move || if loading.get() { "Signing in..." } else { "Sign in" }}
                </button>

                <div class="auth-switch">
                    "No account? "
                    <button class="auth-link" on:click=move |_| view_signal.set(AppView::Register)>
                        "Register"
                    </button>
                </div>
            </div>
        </div>
    }
}

#[component]
pub fn Register() -> impl IntoView {
    let services = use_services();
    let (email, set_email) = create_signal(String::new());
    let (username, set_username) = create_signal(String::new());
    let (display_name, set_display_name) = create_signal(String::new());
    let (password, set_password) = create_signal(String::new());
    let (password2, set_password2) = create_signal(String::new());
    let (error, set_error) = create_signal(Option::<String>::None);
    let (loading, set_loading) = create_signal(false);

    let do_register = {
        let services = services.clone();
        move |_| {
            let email = email.get();
            let username = username.get();
            let display_name = display_name.get();
            let password = password.get();

            if password != password2.get() {
                set_error.set(Some("Passwords do not match".into()));
                return;
            }
            if password.len() < 6 {
                set_error.set(Some("Password must be at least 6 characters".into()));
                return;
            }
            if username.trim().is_empty() {
                set_error.set(Some("Pick a username".into()));
                return;
            }

            set_loading.set(true);
            set_error.set(None);

            let services = services.clone();
            spawn_local(async move {
                let name = if display_name.trim().is_empty() { username.trim() } else { display_name.trim() };
                match services.api.register(email.trim(), &password, username.trim(), name).await {
                    Ok(auth) => {
                        info!(user = %auth.user.username, "account created");
                        services.user.set(Some(auth.user));
                        services.view.set(AppView::Dashboard);
                        services.load_account(false).await;
                    }
                    Err(e) => {
                        set_error.set(form_error(&e));
                        set_loading.set(false);
                    }
                }
            });
        }
    };

    let view_signal = services.view;
    view! {
        <div class="auth-container">
            <div class="auth-logo">"IRONLOG"</div>
            <div class="auth-card">
                <h2 class="auth-title">"Create account"</h2>

                {move || error.get().map(|e| view! { <div class="auth-error">{e}</div> })}

                <input
                    type="email"
                    class="auth-input"
                    placeholder="Email"
                    on:input=move |ev| set_email.set(event_target_value(&ev))
                    prop:value=email
                />

                <input
                    type="text"
                    class="auth-input"
                    placeholder="Username"
                    on:input=move |ev| set_username.set(event_target_value(&ev))
                    prop:value=username
                />

                <input
                    type="text"
                    class="auth-input"
                    placeholder="Display name (optional)"
                    on:input=move |ev| set_display_name.set(event_target_value(&ev))
                    prop:value=display_name
                />

                <input
                    type="password"
                    class="auth-input"
                    placeholder="Password"
                    on:input=move |ev| set_password.set(event_target_value(&ev))
                    prop:value=password
                />

                <input
                    type="password"
                    class="auth-input"
                    placeholder="Confirm password"
                    on:input=move |ev| set_password2.set(event_target_value(&ev))
                    prop:value=password2
                />

                <button
                    class="auth-button"
                    on:click=do_register
                    disabled=move || loading.get()
                >
                    {move || if loading.get() { "Creating account..." } else { "Create account" }}
                </button>

                <div class="auth-switch">
                    "Already registered? "
                    <button class="auth-link" on:click=move |_| view_signal.set(AppView::Login)>
                        "Sign in"
                    </button>
                </div>
            </div>
        </div>
    }
}
