//! Backend reachability: which base URL to use, and whether it answers.
//!
//! UNKNOWN -> CHECKING -> READY, or CHECKING -> NOT_READY -> CHECKING -> ...
//! while a single poll loop waits for the backend to come up.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use futures::channel::oneshot;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{normalize_base, AppConfig};
use crate::error::{AppError, Result};
use crate::storage::LocalPersistence;
use crate::transport::{HttpRequest, HttpTransport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reachability {
    Unknown,
    Checking,
    Ready,
    NotReady,
}

impl Reachability {
    pub fn glyph(self) -> &'static str {
        match self {
            Reachability::Unknown => "○",
            Reachability::Checking => "◐",
            Reachability::Ready => "●",
            Reachability::NotReady => "✕",
        }
    }
}

/// What a caller should do after a failed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureAction {
    /// 401: drop local auth. Reachability is untouched.
    Logout,
    /// Backend looks down: show the overlay and poll.
    Degrade,
    /// An ordinary error the caller reports itself.
    Report,
}

#[derive(Deserialize)]
struct HealthBody {
    #[serde(default)]
    ok: bool,
}

type Observer = Box<dyn Fn(Reachability)>;
type Hook = Box<dyn Fn()>;

pub struct ReachabilityMonitor<T: HttpTransport> {
    transport: Rc<T>,
    persistence: LocalPersistence,
    config: AppConfig,
    state: Cell<Reachability>,
    base: RefCell<Option<String>>,
    poll_generation: Cell<u64>,
    polling: Cell<bool>,
    observer: RefCell<Option<Observer>>,
    on_degraded: RefCell<Option<Hook>>,
    waiters: RefCell<Vec<oneshot::Sender<()>>>,
}

impl<T: HttpTransport> ReachabilityMonitor<T> {
    pub fn new(transport: Rc<T>, persistence: LocalPersistence, config: AppConfig) -> Self {
        Self {
            transport,
            persistence,
            config,
            state: Cell::new(Reachability::Unknown),
            base: RefCell::new(None),
            poll_generation: Cell::new(0),
            polling: Cell::new(false),
            observer: RefCell::new(None),
            on_degraded: RefCell::new(None),
            waiters: RefCell::new(Vec::new()),
        }
    }

    /// Called on every state change (drives the overlay and status glyph).
    pub fn set_observer(&self, observer: impl Fn(Reachability) + 'static) {
        *self.observer.borrow_mut() = Some(Box::new(observer));
    }

    /// Runs whenever the monitor enters NOT_READY with no poll loop live.
    /// The hook is expected to start one with `run_poll_loop`.
    pub fn set_on_degraded(&self, hook: impl Fn() + 'static) {
        *self.on_degraded.borrow_mut() = Some(Box::new(hook));
    }

    pub fn state(&self) -> Reachability {
        self.state.get()
    }

    pub fn base(&self) -> Option<String> {
        self.base.borrow().clone()
    }

    #[cfg(test)]
    pub fn is_polling(&self) -> bool {
        self.polling.get()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn set_state(&self, next: Reachability) {
        let prev = self.state.replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "reachability changed");
            if let Some(observer) = self.observer.borrow().as_ref() {
                observer(next);
            }
        }
    }

    /// Liveness check: `/health` must say `{"ok": true}`; a service that
    /// answers 401/403 is up but wants auth, which counts as alive. Falls back
    /// to the root service descriptor when `/health` gives nothing usable.
    pub async fn is_alive(&self, base: &str) -> bool {
        let timeout = self.config.liveness_timeout_ms;
        let health = self
            .transport
            .execute(HttpRequest::get(format!("{}/health", base), timeout))
            .await;
        if let Ok(resp) = &health {
            if matches!(resp.status, 401 | 403) {
                return true;
            }
            if resp.ok() {
                if let Ok(body) = serde_json::from_str::<HealthBody>(&resp.body) {
                    if body.ok {
                        return true;
                    }
                }
            }
        }
        match self
            .transport
            .execute(HttpRequest::get(format!("{}/", base), timeout))
            .await
        {
            Ok(resp) => resp.ok() || matches!(resp.status, 401 | 403),
            Err(_) => false,
        }
    }

    /// Check candidates in order and adopt the first that answers.
    pub async fn detect_base(&self) -> Option<String> {
        self.set_state(Reachability::Checking);
        let remembered = self.persistence.load_api_base();
        for candidate in self.config.candidate_bases(remembered.as_deref()) {
            if self.is_alive(&candidate).await {
                self.adopt(&candidate);
                return Some(candidate);
            }
            debug!(base = %candidate, "candidate base not reachable");
        }
        warn!("no candidate API base reachable");
        self.mark_not_ready();
        None
    }

    fn adopt(&self, base: &str) {
        let base = normalize_base(base);
        let changed = self.base.borrow().as_deref() != Some(base.as_str());
        if changed {
            info!(base = %base, "using API base");
            self.persistence.save_api_base(&base);
            *self.base.borrow_mut() = Some(base);
        }
        self.stop_polling();
        self.set_state(Reachability::Ready);
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        if !waiters.is_empty() {
            debug!(count = waiters.len(), "releasing requests held for READY");
        }
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    /// Park until the next base is adopted.
    async fn wait_ready(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.borrow_mut().push(tx);
        rx.await
            .map_err(|_| AppError::Network("reachability monitor dropped".into()))
    }

    /// Base to send a request to. Detects one when nothing is known yet,
    /// otherwise waits for a check or poll loop in flight to reach READY.
    pub async fn ensure_ready(&self) -> Result<String> {
        loop {
            match self.state() {
                Reachability::Ready => {
                    if let Some(base) = self.base() {
                        return Ok(base);
                    }
                    if let Some(base) = self.detect_base().await {
                        return Ok(base);
                    }
                }
                Reachability::Checking => self.wait_ready().await?,
                Reachability::NotReady if self.polling.get() => self.wait_ready().await?,
                Reachability::Unknown | Reachability::NotReady => {
                    if let Some(base) = self.detect_base().await {
                        return Ok(base);
                    }
                }
            }
        }
    }

    /// Classify a failed request. Only network/server-class failures touch
    /// reachability; authorization failures never do.
    pub fn classify_failure(&self, error: &AppError) -> FailureAction {
        if error.is_auth() {
            FailureAction::Logout
        } else if error.degrades_reachability() {
            FailureAction::Degrade
        } else {
            FailureAction::Report
        }
    }

    /// Flip to NOT_READY. The first flip without a live loop fires the
    /// degraded hook and returns true; later ones only update the state.
    pub fn mark_not_ready(&self) -> bool {
        self.set_state(Reachability::NotReady);
        if self.polling.replace(true) {
            return false;
        }
        if let Some(hook) = self.on_degraded.borrow().as_ref() {
            hook();
        }
        true
    }

    /// One poll step: current base first, then the full candidate list.
    pub async fn poll_once(&self) -> bool {
        self.set_state(Reachability::Checking);
        if let Some(base) = self.base() {
            if self.is_alive(&base).await {
                self.adopt(&base);
                return true;
            }
        }
        self.detect_base().await.is_some()
    }

    /// Poll every `poll_interval_ms` until READY. Starting a new loop
    /// supersedes any previous one, so at most one is ever live.
    pub async fn run_poll_loop<S, F>(&self, sleep: S)
    where
        S: Fn(u32) -> F,
        F: Future<Output = ()>,
    {
        let generation = self.poll_generation.get() + 1;
        self.poll_generation.set(generation);
        self.polling.set(true);
        info!("backend not ready, polling");
        loop {
            sleep(self.config.poll_interval_ms).await;
            if self.poll_generation.get() != generation {
                debug!("poll loop superseded");
                return;
            }
            if self.poll_once().await {
                info!("backend ready again");
                return;
            }
        }
    }

    /// Cancel any running poll loop at its next wake-up.
    fn stop_polling(&self) {
        self.poll_generation.set(self.poll_generation.get() + 1);
        self.polling.set(false);
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::storage::{MemoryStore, API_BASE_KEY};
    use crate::transport::fake::FakeTransport;

    const A: &str = "http://a.test";
    const B: &str = "http://b.test";

    fn monitor(transport: FakeTransport) -> (MemoryStore, Rc<FakeTransport>, ReachabilityMonitor<FakeTransport>) {
        let store = MemoryStore::new();
        let transport = Rc::new(transport);
        let monitor = ReachabilityMonitor::new(
            transport.clone(),
            LocalPersistence::new(Rc::new(store.clone())),
            AppConfig::with_bases(&[A, B]),
        );
        (store, transport, monitor)
    }

    #[test]
    fn first_live_candidate_is_adopted_and_remembered() {
        let t = FakeTransport::new();
        t.down(&format!("{A}/health")).down(&format!("{A}/"));
        t.status(&format!("{B}/health"), 200, r#"{"ok":true,"db":"ok"}"#);
        let (store, _, m) = monitor(t);

        assert_eq!(block_on(m.detect_base()).as_deref(), Some(B));
        assert_eq!(m.state(), Reachability::Ready);
        assert_eq!(store.raw(API_BASE_KEY).as_deref(), Some(B));
    }

    #[test]
    fn remembered_base_is_tried_first() {
        let t = FakeTransport::new();
        t.status(&format!("{B}/health"), 200, r#"{"ok":true}"#);
        t.status(&format!("{A}/health"), 200, r#"{"ok":true}"#);
        let (store, t, m) = monitor(t);
        store.put_raw(API_BASE_KEY, B);

        assert_eq!(block_on(m.detect_base()).as_deref(), Some(B));
        assert_eq!(t.urls(), vec![format!("{B}/health")]);
    }

    #[test]
    fn descriptor_endpoint_and_auth_answers_count_as_alive() {
        let t = FakeTransport::new();
        t.status(&format!("{A}/health"), 503, "{}");
        t.status(&format!("{A}/"), 200, r#"{"message":"welcome"}"#);
        t.status(&format!("{B}/health"), 401, "");
        let (_, _, m) = monitor(t);
        assert!(block_on(m.is_alive(A)));
        assert!(block_on(m.is_alive(B)));
    }

    #[test]
    fn health_without_ok_flag_falls_back() {
        let t = FakeTransport::new();
        t.status(&format!("{A}/health"), 200, r#"{"ok":false}"#);
        t.status(&format!("{A}/"), 500, "");
        let (_, _, m) = monitor(t);
        assert!(!block_on(m.is_alive(A)));
    }

    #[test]
    fn nothing_reachable_means_not_ready() {
        let (_, _, m) = monitor(FakeTransport::new());
        assert_eq!(block_on(m.detect_base()), None);
        assert_eq!(m.state(), Reachability::NotReady);
        assert!(m.is_polling());
    }

    #[test]
    fn failed_detection_requests_exactly_one_poll_loop() {
        let (_, _, m) = monitor(FakeTransport::new());
        let started = Rc::new(Cell::new(0));
        let count = started.clone();
        m.set_on_degraded(move || count.set(count.get() + 1));

        assert_eq!(block_on(m.detect_base()), None);
        assert_eq!(started.get(), 1);
        assert_eq!(block_on(m.detect_base()), None);
        assert!(!block_on(m.poll_once()));
        assert_eq!(started.get(), 1);
        assert_eq!(m.state(), Reachability::NotReady);
        assert!(m.is_polling());
    }

    #[test]
    fn waiting_caller_gets_the_base_once_polling_adopts_it() {
        let t = FakeTransport::new();
        t.status(&format!("{A}/health"), 200, r#"{"ok":true}"#);
        let (_, _, m) = monitor(t);
        m.mark_not_ready();

        let (base, adopted) = block_on(futures::future::join(m.ensure_ready(), m.poll_once()));
        assert!(adopted);
        assert_eq!(base.as_deref(), Ok(A));
        assert_eq!(m.state(), Reachability::Ready);
        assert!(!m.is_polling());
    }

    #[test]
    fn unauthorized_never_degrades() {
        let (_, _, m) = monitor(FakeTransport::new());
        assert_eq!(m.classify_failure(&AppError::Unauthorized), FailureAction::Logout);
        assert_eq!(m.state(), Reachability::Unknown);
        assert_eq!(m.classify_failure(&AppError::Timeout), FailureAction::Degrade);
        assert_eq!(
            m.classify_failure(&AppError::Server { status: 404, message: "nope".into() }),
            FailureAction::Report
        );
    }

    #[test]
    fn only_one_poll_loop_is_requested() {
        let (_, _, m) = monitor(FakeTransport::new());
        assert!(m.mark_not_ready());
        assert!(!m.mark_not_ready());
        assert_eq!(m.state(), Reachability::NotReady);
        m.stop_polling();
        assert!(m.mark_not_ready());
    }

    #[test]
    fn poll_loop_runs_until_backend_answers() {
        let t = FakeTransport::new();
        t.down(&format!("{A}/health")).down(&format!("{A}/"));
        t.down(&format!("{A}/health"));
        t.status(&format!("{A}/health"), 200, r#"{"ok":true}"#);
        let (_, _, m) = monitor(t);

        let states = Rc::new(RefCell::new(Vec::new()));
        let seen = states.clone();
        m.set_observer(move |s| seen.borrow_mut().push(s));

        let sleeps = Cell::new(0);
        block_on(m.run_poll_loop(|_| {
            sleeps.set(sleeps.get() + 1);
            futures::future::ready(())
        }));
        assert_eq!(m.state(), Reachability::Ready);
        assert!(!m.is_polling());
        assert!(sleeps.get() >= 2);
        assert_eq!(states.borrow().last(), Some(&Reachability::Ready));
    }

    #[test]
    fn superseded_poll_loop_exits() {
        let (_, _, m) = monitor(FakeTransport::new());
        block_on(m.run_poll_loop(|_| {
            m.stop_polling();
            futures::future::ready(())
        }));
        assert!(!m.is_polling());
        assert_ne!(m.state(), Reachability::Ready);
    }
}
