//! Session snapshots in local storage: debounced writes, finalize markers and
//! the once-per-page restore.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::guide::GuidePosition;
use crate::rest_timer::RestTimer;
use crate::storage::{LocalPersistence, ACTIVE_SESSION_KEY};
use crate::types::{CompletionMap, Id, Session, TemplateWithRows};

/// Point-in-time copy of the in-progress session UI state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedSessionSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    /// Carried so the guide can be rebuilt without a network round-trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateWithRows>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide: Option<GuidePosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_exercise_id: Option<Id>,
    #[serde(default, skip_serializing_if = "CompletionMap::is_empty")]
    pub completion: CompletionMap,
    #[serde(default, skip_serializing_if = "is_false")]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_program_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_template_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_timer: Option<RestTimer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<i64>,
    #[serde(default)]
    pub last_updated_at: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub finalized: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl PersistedSessionSnapshot {
    /// What replaces the snapshot when a session ends.
    pub fn finalized_marker(now_ms: i64) -> Self {
        Self {
            finalized: true,
            last_updated_at: now_ms,
            ..Self::default()
        }
    }
}

/// Why `restore` declined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreSkip {
    AlreadyAttempted,
    NoSnapshot,
    Finalized,
    NoSession,
    SessionEnded,
    DifferentActiveSession,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RestoredSession {
    pub snapshot: PersistedSessionSnapshot,
    /// Completion map as stored on its own, merged into the snapshot's copy.
    pub completion: CompletionMap,
    pub show_notice: bool,
}

pub struct RecoveryManager {
    persistence: LocalPersistence,
    pending: Option<PersistedSessionSnapshot>,
    restore_attempted: bool,
}

impl RecoveryManager {
    pub fn new(persistence: LocalPersistence) -> Self {
        Self {
            persistence,
            pending: None,
            restore_attempted: false,
        }
    }

    /// Queue a snapshot. Successive calls coalesce: only the latest one is
    /// written by the next `flush`.
    pub fn queue(&mut self, snapshot: PersistedSessionSnapshot) {
        self.pending = Some(snapshot);
    }

    /// Write the queued snapshot, if any. Runs when the debounce timer fires
    /// and on page hide.
    pub fn flush(&mut self, now_ms: i64) -> bool {
        let Some(mut snapshot) = self.pending.take() else {
            return false;
        };
        snapshot.last_updated_at = now_ms;
        let written = self.persistence.write_json(ACTIVE_SESSION_KEY, &snapshot);
        debug!(written, session_id = ?snapshot.session.as_ref().map(|s| s.id), "snapshot flushed");
        written
    }

    /// Replace the stored snapshot with a finalized marker and re-arm restore.
    pub fn finalize(&mut self, now_ms: i64) {
        self.pending = None;
        self.persistence
            .write_json(ACTIVE_SESSION_KEY, &PersistedSessionSnapshot::finalized_marker(now_ms));
        self.reset();
        info!("session snapshot finalized");
    }

    /// Allow another restore attempt (new session, logout).
    pub fn reset(&mut self) {
        self.restore_attempted = false;
    }

    pub fn load(&self) -> Option<PersistedSessionSnapshot> {
        self.persistence.read_json(ACTIVE_SESSION_KEY)
    }

    /// Decide whether the stored snapshot may be brought back. Runs once per
    /// page lifetime until `finalize` or `reset`.
    ///
    /// `known_active` is an in-progress session id the caller already knows
    /// about; a snapshot for any other session is refused. With
    /// `mark_as_notified` the one-time notice is considered already shown.
    pub fn restore(
        &mut self,
        known_active: Option<Id>,
        mark_as_notified: bool,
    ) -> Result<RestoredSession, RestoreSkip> {
        if self.restore_attempted {
            return Err(RestoreSkip::AlreadyAttempted);
        }
        self.restore_attempted = true;

        let snapshot = self.load().ok_or(RestoreSkip::NoSnapshot)?;
        if snapshot.finalized {
            return Err(RestoreSkip::Finalized);
        }
        let session = snapshot.session.as_ref().ok_or(RestoreSkip::NoSession)?;
        if session.status.is_terminal() {
            return Err(RestoreSkip::SessionEnded);
        }
        if let Some(active) = known_active {
            if active != session.id {
                return Err(RestoreSkip::DifferentActiveSession);
            }
        }

        let mut completion = self.persistence.load_completion(session.id);
        completion.merge(&snapshot.completion);
        info!(session_id = session.id, "restoring in-progress session");
        Ok(RestoredSession {
            snapshot,
            completion,
            show_notice: !mark_as_notified,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::SessionStatus;

    fn manager() -> (MemoryStore, RecoveryManager) {
        let store = MemoryStore::new();
        let mgr = RecoveryManager::new(LocalPersistence::new(Rc::new(store.clone())));
        (store, mgr)
    }

    fn snapshot(session_id: Id, status: SessionStatus) -> PersistedSessionSnapshot {
        PersistedSessionSnapshot {
            session: Some(Session { id: session_id, template_id: 3, status, ..Default::default() }),
            locked: true,
            active_exercise_id: Some(11),
            session_started_at: Some(1_000),
            ..Default::default()
        }
    }

    #[test]
    fn queued_snapshots_coalesce_into_one_write() {
        let (store, mut mgr) = manager();
        mgr.queue(snapshot(1, SessionStatus::InProgress));
        mgr.queue(snapshot(2, SessionStatus::InProgress));
        assert!(store.raw(ACTIVE_SESSION_KEY).is_none());
        assert!(mgr.flush(500));
        let stored = mgr.load().unwrap();
        assert_eq!(stored.session.unwrap().id, 2);
        assert_eq!(stored.last_updated_at, 500);
        assert!(!mgr.flush(900));
        assert_eq!(mgr.load().unwrap().last_updated_at, 500);
    }

    #[test]
    fn finalize_leaves_minimal_marker() {
        let (store, mut mgr) = manager();
        mgr.queue(snapshot(1, SessionStatus::InProgress));
        mgr.flush(1);
        mgr.finalize(42);
        let raw = store.raw(ACTIVE_SESSION_KEY).unwrap();
        assert_eq!(raw, r#"{"last_updated_at":42,"finalized":true}"#);
    }

    #[test]
    fn restore_runs_once() {
        let (_, mut mgr) = manager();
        mgr.queue(snapshot(5, SessionStatus::InProgress));
        mgr.flush(1);
        let restored = mgr.restore(None, false).unwrap();
        assert_eq!(restored.snapshot.active_exercise_id, Some(11));
        assert!(restored.show_notice);
        assert_eq!(mgr.restore(None, false), Err(RestoreSkip::AlreadyAttempted));
    }

    #[test]
    fn finalize_then_restore_refuses() {
        let (_, mut mgr) = manager();
        mgr.queue(snapshot(5, SessionStatus::InProgress));
        mgr.flush(1);
        mgr.finalize(2);
        assert_eq!(mgr.restore(None, true), Err(RestoreSkip::Finalized));
    }

    #[test]
    fn refuses_terminal_missing_and_mismatched_sessions() {
        let (_, mut mgr) = manager();
        assert_eq!(mgr.restore(None, false), Err(RestoreSkip::NoSnapshot));

        for (snap, known, expected) in [
            (snapshot(5, SessionStatus::Done), None, RestoreSkip::SessionEnded),
            (snapshot(5, SessionStatus::Cancelled), None, RestoreSkip::SessionEnded),
            (snapshot(5, SessionStatus::InProgress), Some(6), RestoreSkip::DifferentActiveSession),
            (PersistedSessionSnapshot::default(), None, RestoreSkip::NoSession),
        ] {
            mgr.reset();
            mgr.queue(snap);
            mgr.flush(1);
            assert_eq!(mgr.restore(known, false), Err(expected));
        }
    }

    #[test]
    fn separately_stored_completion_is_merged() {
        let (store, mut mgr) = manager();
        let persistence = LocalPersistence::new(Rc::new(store.clone()));
        let mut stored = CompletionMap::default();
        stored.mark_done(20);
        persistence.save_completion(5, &stored);

        let mut snap = snapshot(5, SessionStatus::InProgress);
        snap.completion.mark_done(11);
        mgr.queue(snap);
        mgr.flush(1);
        let restored = mgr.restore(Some(5), true).unwrap();
        assert!(restored.completion.is_done(11));
        assert!(restored.completion.is_done(20));
        assert!(!restored.show_notice);
    }

    #[test]
    fn unreadable_snapshot_is_treated_as_missing() {
        let (store, mut mgr) = manager();
        store.put_raw(ACTIVE_SESSION_KEY, "[1,2");
        assert_eq!(mgr.restore(None, false), Err(RestoreSkip::NoSnapshot));
    }
}
