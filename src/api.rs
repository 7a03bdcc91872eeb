use std::cell::RefCell;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::reachability::{FailureAction, ReachabilityMonitor};
use crate::storage::LocalPersistence;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::types::{
    AuthSession, Exercise, ExerciseDraft, Friend, FriendRequest, Id, PersonalBest, Program, ProgramDetail,
    ProgramDraft, Session, SetLog, SetLogPayload, Template, TemplateRow, TemplateRowDraft, TemplateWithRows, User,
};

#[derive(Clone, Debug, PartialEq)]
enum Body {
    Json(String),
    Form(String),
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    user: User,
}

#[derive(Serialize)]
struct RegisterPayload<'a> {
    email: &'a str,
    password: &'a str,
    display_name: &'a str,
    username: &'a str,
}

#[derive(Serialize)]
struct StartPayload<'a> {
    template_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<&'a str>,
}

#[derive(Serialize)]
struct NewTemplate<'a> {
    program_id: Id,
    name: &'a str,
}

#[derive(Serialize)]
struct RowUpdate<'a> {
    row_id: Id,
    #[serde(flatten)]
    row: &'a TemplateRowDraft,
}

#[derive(Deserialize)]
struct CopiedProgram {
    program: Program,
}

#[derive(Deserialize)]
pub struct Cleared {
    pub cleared: u32,
}

type Hook = Box<dyn Fn()>;

/// Backend client. Every call waits for a reachable base, carries the bearer
/// token and a timeout, logs out on 401, and after any other failure
/// re-detects the base once, retrying on a different base if one answers.
pub struct ApiClient<T: HttpTransport> {
    transport: Rc<T>,
    monitor: Rc<ReachabilityMonitor<T>>,
    persistence: LocalPersistence,
    on_logout: RefCell<Option<Hook>>,
}

impl<T: HttpTransport> ApiClient<T> {
    pub fn new(transport: Rc<T>, monitor: Rc<ReachabilityMonitor<T>>, persistence: LocalPersistence) -> Self {
        Self {
            transport,
            monitor,
            persistence,
            on_logout: RefCell::new(None),
        }
    }

    pub fn monitor(&self) -> &Rc<ReachabilityMonitor<T>> {
        &self.monitor
    }

    pub fn set_on_logout(&self, hook: impl Fn() + 'static) {
        *self.on_logout.borrow_mut() = Some(Box::new(hook));
    }

    pub fn is_signed_in(&self) -> bool {
        self.persistence.load_token().is_some()
    }

    /// Drop local auth and tell the app.
    pub fn logout(&self) {
        self.persistence.clear_token();
        if let Some(hook) = self.on_logout.borrow().as_ref() {
            hook();
        }
    }

    fn build(&self, base: &str, method: Method, path: &str, body: Option<&Body>) -> HttpRequest {
        let mut req = HttpRequest {
            method,
            url: format!("{}{}", base, path),
            headers: Vec::new(),
            body: None,
            timeout_ms: self.monitor.config().request_timeout_ms,
        };
        if let Some(token) = self.persistence.load_token() {
            req = req.header("Authorization", &format!("Bearer {}", token));
        }
        match body {
            Some(Body::Json(json)) => {
                req = req.header("Content-Type", "application/json");
                req.body = Some(json.clone());
            }
            Some(Body::Form(form)) => {
                req = req.header("Content-Type", "application/x-www-form-urlencoded");
                req.body = Some(form.clone());
            }
            None => {}
        }
        req
    }

    async fn attempt(&self, base: &str, method: Method, path: &str, body: Option<&Body>) -> Result<String> {
        let resp = self.transport.execute(self.build(base, method, path, body)).await?;
        check_status(resp)
    }

    async fn send(&self, method: Method, path: &str, body: Option<Body>) -> Result<String> {
        let base = self.monitor.ensure_ready().await?;
        let first = self.attempt(&base, method, path, body.as_ref()).await;
        let err = match first {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };
        if self.monitor.classify_failure(&err) == FailureAction::Logout {
            warn!(path, "request unauthorized, signing out");
            self.logout();
            return Err(err);
        }

        let retried = match self.monitor.detect_base().await {
            Some(next) if next != base => {
                info!(path, from = %base, to = %next, "retrying on newly detected base");
                Some(self.attempt(&next, method, path, body.as_ref()).await)
            }
            _ => None,
        };
        let err = match retried {
            Some(Ok(text)) => return Ok(text),
            Some(Err(e)) => e,
            None => err,
        };

        match self.monitor.classify_failure(&err) {
            FailureAction::Logout => self.logout(),
            FailureAction::Degrade => {
                self.monitor.mark_not_ready();
            }
            FailureAction::Report => {}
        }
        Err(err)
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let text = self.send(Method::Get, path, None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let json = serde_json::to_string(body)?;
        let text = self.send(Method::Post, path, Some(Body::Json(json))).await?;
        Ok(serde_json::from_str(&text)?)
    }

    // ============ AUTH ============

    pub async fn login(&self, username_or_email: &str, password: &str) -> Result<AuthSession> {
        let form = format!(
            "username={}&password={}",
            urlencoding::encode(username_or_email),
            urlencoding::encode(password)
        );
        let text = self.send(Method::Post, "/auth/login", Some(Body::Form(form))).await?;
        self.store_session(&text)
    }

    pub async fn register(&self, email: &str, password: &str, username: &str, display_name: &str) -> Result<AuthSession> {
        let payload = RegisterPayload { email, password, display_name, username };
        let json = serde_json::to_string(&payload)?;
        let text = self.send(Method::Post, "/auth/register", Some(Body::Json(json))).await?;
        self.store_session(&text)
    }

    fn store_session(&self, text: &str) -> Result<AuthSession> {
        let token: TokenResponse = serde_json::from_str(text)?;
        self.persistence.save_token(&token.access_token);
        Ok(AuthSession {
            access_token: token.access_token,
            user: token.user,
        })
    }

    pub async fn me(&self) -> Result<User> {
        self.get("/users/me").await
    }

    // ============ PLANS ============

    pub async fn exercises(&self) -> Result<Vec<Exercise>> {
        self.get("/exercises").await
    }

    pub async fn programs(&self) -> Result<Vec<Program>> {
        self.get("/programs").await
    }

    pub async fn templates(&self, program_id: Option<Id>) -> Result<Vec<TemplateWithRows>> {
        match program_id {
            Some(id) => self.get(&format!("/templates?program_id={}", id)).await,
            None => self.get("/templates").await,
        }
    }

    /// POSTs whose answer is only `{"deleted": id}`.
    async fn post_discard(&self, path: &str, body: serde_json::Value) -> Result<()> {
        let _: serde_json::Value = self.post(path, &body).await?;
        Ok(())
    }

    pub async fn create_exercise(&self, draft: &ExerciseDraft) -> Result<Exercise> {
        self.post("/exercises", draft).await
    }

    pub async fn update_exercise(&self, exercise_id: Id, draft: &ExerciseDraft) -> Result<Exercise> {
        self.post(&format!("/exercises/{}", exercise_id), draft).await
    }

    pub async fn delete_exercise(&self, exercise_id: Id) -> Result<()> {
        self.post_discard(&format!("/exercises/{}/delete", exercise_id), serde_json::json!({}))
            .await
    }

    pub async fn create_program(&self, draft: &ProgramDraft) -> Result<Program> {
        self.post("/programs", draft).await
    }

    pub async fn update_program(&self, program_id: Id, draft: &ProgramDraft) -> Result<Program> {
        self.post(&format!("/programs/{}", program_id), draft).await
    }

    /// Also removes the program's templates and sessions on the backend.
    pub async fn delete_program(&self, program_id: Id) -> Result<()> {
        self.post_discard(&format!("/programs/{}/delete", program_id), serde_json::json!({}))
            .await
    }

    pub async fn publish_program(&self, program_id: Id, is_public: bool) -> Result<Program> {
        self.post(&format!("/programs/{}/publish", program_id), &serde_json::json!({ "is_public": is_public }))
            .await
    }

    /// Copy a public (or own) program, its templates and exercises into this account.
    pub async fn copy_program(&self, program_id: Id) -> Result<Program> {
        let copied: CopiedProgram = self
            .post(&format!("/programs/{}/copy", program_id), &serde_json::json!({}))
            .await?;
        Ok(copied.program)
    }

    pub async fn create_template(&self, program_id: Id, name: &str) -> Result<Template> {
        self.post("/templates", &NewTemplate { program_id, name }).await
    }

    pub async fn rename_template(&self, template_id: Id, name: &str) -> Result<Template> {
        self.post(&format!("/templates/{}", template_id), &serde_json::json!({ "name": name }))
            .await
    }

    pub async fn delete_template(&self, template_id: Id) -> Result<()> {
        self.post_discard(&format!("/templates/{}/delete", template_id), serde_json::json!({}))
            .await
    }

    pub async fn add_template_row(&self, template_id: Id, row: &TemplateRowDraft) -> Result<TemplateRow> {
        self.post(&format!("/templates/{}/add-exercise", template_id), row).await
    }

    pub async fn update_template_row(&self, template_id: Id, row_id: Id, row: &TemplateRowDraft) -> Result<TemplateRow> {
        self.post(&format!("/templates/{}/update-exercise", template_id), &RowUpdate { row_id, row })
            .await
    }

    pub async fn remove_template_row(&self, template_id: Id, row_id: Id) -> Result<()> {
        self.post_discard(
            &format!("/templates/{}/remove-exercise", template_id),
            serde_json::json!({ "row_id": row_id }),
        )
        .await
    }

    // ============ SESSIONS ============

    pub async fn sessions(&self, limit: u32) -> Result<Vec<Session>> {
        self.get(&format!("/sessions?limit={}", limit)).await
    }

    pub async fn start_session(&self, template_id: Id, date: Option<&str>) -> Result<Session> {
        self.post("/sessions/start", &StartPayload { template_id, date }).await
    }

    pub async fn log_set(&self, session_id: Id, payload: &SetLogPayload) -> Result<SetLog> {
        self.post(&format!("/sessions/{}/log-set", session_id), payload).await
    }

    pub async fn finish_session(&self, session_id: Id) -> Result<Session> {
        self.post(&format!("/sessions/{}/finish", session_id), &serde_json::json!({})).await
    }

    pub async fn cancel_session(&self, session_id: Id) -> Result<Session> {
        self.post(&format!("/sessions/{}/cancel", session_id), &serde_json::json!({})).await
    }

    pub async fn clear_active(&self) -> Result<Cleared> {
        self.post("/sessions/clear-active", &serde_json::json!({})).await
    }

    pub async fn delete_session(&self, session_id: Id) -> Result<()> {
        self.post_discard("/sessions/delete", serde_json::json!({ "session_id": session_id }))
            .await
    }

    // ============ PERSONAL BESTS & FRIENDS ============

    pub async fn personal_bests(&self) -> Result<Vec<PersonalBest>> {
        self.get("/pbs").await
    }

    pub async fn publish_pb(&self, pb_id: Id, is_public: bool) -> Result<PersonalBest> {
        self.post(&format!("/pbs/{}/publish", pb_id), &serde_json::json!({ "is_public": is_public }))
            .await
    }

    pub async fn friends(&self) -> Result<Vec<Friend>> {
        self.get("/friends").await
    }

    pub async fn incoming_requests(&self) -> Result<Vec<FriendRequest>> {
        self.get("/friends/requests/incoming").await
    }

    pub async fn send_friend_request(&self, to_username: &str) -> Result<FriendRequest> {
        self.post("/friends/requests", &serde_json::json!({ "to_username": to_username }))
            .await
    }

    pub async fn outgoing_requests(&self) -> Result<Vec<FriendRequest>> {
        self.get("/friends/requests/outgoing").await
    }

    pub async fn answer_friend_request(&self, request_id: Id, accept: bool) -> Result<()> {
        let action = if accept { "accept" } else { "reject" };
        self.post_discard(&format!("/friends/requests/{}/{}", request_id, action), serde_json::json!({}))
            .await
    }

    // ============ PUBLIC PROFILES ============

    /// Another user's PBs. Only public ones unless it is the caller.
    pub async fn public_pbs(&self, username: &str) -> Result<Vec<PersonalBest>> {
        self.get(&format!("/users/{}/pbs", urlencoding::encode(username))).await
    }

    pub async fn user_programs(&self, username: &str) -> Result<Vec<Program>> {
        self.get(&format!("/users/{}/programs", urlencoding::encode(username))).await
    }

    pub async fn user_program(&self, username: &str, program_id: Id) -> Result<ProgramDetail> {
        self.get(&format!("/users/{}/programs/{}/full", urlencoding::encode(username), program_id))
            .await
    }
}

/// Map a response to its body or the matching error.
fn check_status(resp: HttpResponse) -> Result<String> {
    if resp.ok() {
        return Ok(resp.body);
    }
    if resp.status == 401 {
        return Err(AppError::Unauthorized);
    }
    let message = serde_json::from_str::<ErrorBody>(&resp.body)
        .ok()
        .and_then(|e| e.detail)
        .map(|d| match d {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .unwrap_or_else(|| format!("HTTP error: {}", resp.status));
    Err(AppError::Server { status: resp.status, message })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use futures::executor::block_on;
    use futures::future::join;

    use super::*;
    use crate::config::AppConfig;
    use crate::reachability::Reachability;
    use crate::storage::{MemoryStore, API_BASE_KEY, TOKEN_KEY};
    use crate::transport::fake::FakeTransport;

    const A: &str = "http://a.test";
    const B: &str = "http://b.test";

    fn client(t: FakeTransport) -> (MemoryStore, Rc<FakeTransport>, ApiClient<FakeTransport>) {
        let store = MemoryStore::new();
        let persistence = LocalPersistence::new(Rc::new(store.clone()));
        let t = Rc::new(t);
        let monitor = Rc::new(ReachabilityMonitor::new(t.clone(), persistence.clone(), AppConfig::with_bases(&[A, B])));
        (store, t.clone(), ApiClient::new(t, monitor, persistence))
    }

    fn healthy(t: &FakeTransport, base: &str) {
        t.status(&format!("{base}/health"), 200, r#"{"ok":true}"#);
    }

    #[test]
    fn requests_carry_bearer_token() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.status(&format!("{A}/programs"), 200, r#"[{"id":1,"name":"PPL"}]"#);
        let (store, t, api) = client(t);
        store.put_raw(TOKEN_KEY, "tok");

        let programs = block_on(api.programs()).unwrap();
        assert_eq!(programs[0].name, "PPL");
        let seen = t.seen.borrow();
        let req = seen.iter().find(|r| r.url.ends_with("/programs")).unwrap();
        assert!(req.headers.contains(&("Authorization".into(), "Bearer tok".into())));
        assert_eq!(req.timeout_ms, crate::config::REQUEST_TIMEOUT_MS);
    }

    #[test]
    fn unauthorized_logs_out_without_retry() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.status(&format!("{A}/sessions?limit=20"), 401, r#"{"detail":"Could not validate credentials"}"#);
        let (store, t, api) = client(t);
        store.put_raw(TOKEN_KEY, "stale");
        let logged_out = Rc::new(Cell::new(false));
        let flag = logged_out.clone();
        api.set_on_logout(move || flag.set(true));

        assert_eq!(block_on(api.sessions(20)), Err(AppError::Unauthorized));
        assert!(logged_out.get());
        assert_eq!(store.raw(TOKEN_KEY), None);
        assert_eq!(api.monitor().state(), Reachability::Ready);
        let calls = t.urls().iter().filter(|u| u.contains("/sessions")).count();
        assert_eq!(calls, 1);
    }

    #[test]
    fn failure_retries_once_on_a_different_base() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.down(&format!("{A}/health"));
        t.down(&format!("{A}/"));
        healthy(&t, B);
        t.down(&format!("{A}/pbs"));
        t.status(&format!("{B}/pbs"), 200, "[]");
        let (store, t, api) = client(t);

        assert_eq!(block_on(api.personal_bests()), Ok(vec![]));
        assert_eq!(store.raw(API_BASE_KEY).as_deref(), Some(B));
        assert_eq!(t.urls().iter().filter(|u| u.ends_with("/pbs")).count(), 2);
    }

    #[test]
    fn server_failure_on_same_base_degrades() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.status(&format!("{A}/friends"), 502, "bad gateway");
        let (_, t, api) = client(t);
        let degraded = Rc::new(Cell::new(0));
        let count = degraded.clone();
        api.monitor().set_on_degraded(move || count.set(count.get() + 1));

        let err = block_on(api.friends()).unwrap_err();
        assert!(matches!(err, AppError::Server { status: 502, .. }));
        assert_eq!(api.monitor().state(), Reachability::NotReady);
        assert!(api.monitor().is_polling());
        assert_eq!(t.urls().iter().filter(|u| u.ends_with("/friends")).count(), 1);
        assert_eq!(degraded.get(), 1);
    }

    #[test]
    fn request_during_polling_goes_through_once_ready() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.status(&format!("{A}/programs"), 200, r#"[{"id":1,"name":"PPL"}]"#);
        let (_, t, api) = client(t);
        api.monitor().mark_not_ready();

        let (programs, adopted) = block_on(join(api.programs(), api.monitor().poll_once()));
        assert!(adopted);
        assert_eq!(programs.unwrap()[0].name, "PPL");
        assert_eq!(t.urls().iter().filter(|u| u.ends_with("/programs")).count(), 1);
        assert_eq!(api.monitor().state(), Reachability::Ready);
    }

    #[test]
    fn client_error_with_failed_redetect_starts_polling() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.down(&format!("{A}/health"));
        t.status(&format!("{A}/friends/requests"), 400, r#"{"detail":"Unknown user"}"#);
        let (_, _, api) = client(t);
        let degraded = Rc::new(Cell::new(0));
        let count = degraded.clone();
        api.monitor().set_on_degraded(move || count.set(count.get() + 1));

        let err = block_on(api.send_friend_request("ghost")).unwrap_err();
        assert_eq!(err, AppError::Server { status: 400, message: "Unknown user".into() });
        assert_eq!(api.monitor().state(), Reachability::NotReady);
        assert!(api.monitor().is_polling());
        assert_eq!(degraded.get(), 1);
    }

    #[test]
    fn client_errors_report_backend_detail() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.status(&format!("{A}/friends/requests"), 400, r#"{"detail":"Request already pending"}"#);
        let (_, _, api) = client(t);

        let err = block_on(api.send_friend_request("sam")).unwrap_err();
        assert_eq!(err, AppError::Server { status: 400, message: "Request already pending".into() });
        assert_eq!(api.monitor().state(), Reachability::Ready);
    }

    #[test]
    fn login_sends_form_and_stores_token() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.status(
            &format!("{A}/auth/login"),
            200,
            r#"{"access_token":"jwt","token_type":"bearer","user":{"id":4,"email":"a@b.c","username":"ab","display_name":"A B"}}"#,
        );
        let (store, t, api) = client(t);

        let auth = block_on(api.login("a@b.c", "p&ss word")).unwrap();
        assert_eq!(auth.user.username, "ab");
        assert_eq!(store.raw(TOKEN_KEY).as_deref(), Some("jwt"));
        let seen = t.seen.borrow();
        let req = seen.iter().find(|r| r.url.ends_with("/auth/login")).unwrap();
        assert_eq!(req.body.as_deref(), Some("username=a%40b.c&password=p%26ss%20word"));
    }

    #[test]
    fn row_update_sends_row_id_beside_plan_fields() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.status(
            &format!("{A}/templates/5/update-exercise"),
            200,
            r#"{"id":12,"template_id":5,"exercise_id":3,"planned_sets":"4","rest":"90s"}"#,
        );
        let (_, t, api) = client(t);
        let draft = TemplateRowDraft { exercise_id: 3, planned_sets: "4".into(), rest: "90s".into(), ..Default::default() };

        let row = block_on(api.update_template_row(5, 12, &draft)).unwrap();
        assert_eq!(row.planned_set_count(), 4);
        let seen = t.seen.borrow();
        let req = seen.iter().find(|r| r.url.ends_with("/update-exercise")).unwrap();
        let sent: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(sent["row_id"], 12);
        assert_eq!(sent["exercise_id"], 3);
        assert_eq!(sent["rest"], "90s");
    }

    #[test]
    fn copy_returns_the_new_program() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.status(
            &format!("{A}/programs/8/copy"),
            200,
            r#"{"program":{"id":21,"name":"5x5 (kopia)","is_public":false},"templates":[]}"#,
        );
        let (_, _, api) = client(t);
        let program = block_on(api.copy_program(8)).unwrap();
        assert_eq!(program.id, 21);
        assert!(!program.is_public);
    }

    #[test]
    fn profile_paths_escape_the_username() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.status(&format!("{A}/users/ann%20lee/programs"), 200, r#"[{"id":2,"name":"Split","is_public":true}]"#);
        let (_, _, api) = client(t);
        let programs = block_on(api.user_programs("ann lee")).unwrap();
        assert_eq!(programs[0].name, "Split");
    }

    #[test]
    fn deletes_ignore_the_answer_body() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.status(&format!("{A}/sessions/delete"), 200, r#"{"deleted":4}"#);
        let (_, t, api) = client(t);
        assert_eq!(block_on(api.delete_session(4)), Ok(()));
        let seen = t.seen.borrow();
        let req = seen.iter().find(|r| r.url.ends_with("/sessions/delete")).unwrap();
        assert_eq!(req.body.as_deref(), Some(r#"{"session_id":4}"#));
    }

    #[test]
    fn log_set_posts_payload() {
        let t = FakeTransport::new();
        healthy(&t, A);
        t.status(
            &format!("{A}/sessions/9/log-set"),
            200,
            r#"{"id":1,"session_id":9,"exercise_id":3,"set_number":2,"weight":60.0,"reps":5,"rpe":8.0,"comment":""}"#,
        );
        let (_, t, api) = client(t);
        let payload = SetLogPayload { exercise_id: 3, set_number: 2, weight: 60.0, reps: 5, rpe: 8.0, comment: String::new() };

        let log = block_on(api.log_set(9, &payload)).unwrap();
        assert_eq!(log.set_number, 2);
        let seen = t.seen.borrow();
        let req = seen.iter().find(|r| r.url.ends_with("/log-set")).unwrap();
        let sent: SetLogPayload = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(sent, payload);
    }
}
