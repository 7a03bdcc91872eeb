use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{BeforeUnloadEvent, PopStateEvent};

const LEAVE_PROMPT: &str = "A workout is in progress. Leave this page?";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackDecision {
    /// Re-push the current history entry so the back press has no effect.
    Stay,
    Leave,
}

/// Listener and history bookkeeping, independent of the browser.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GuardState {
    armed: bool,
    /// The history entry pushed on install is still the current one.
    entry_on_top: bool,
}

impl GuardState {
    /// Returns true when listeners must actually be installed. Installing
    /// pushes the guard's history entry.
    pub fn arm(&mut self) -> bool {
        if self.armed {
            return false;
        }
        self.armed = true;
        self.entry_on_top = true;
        true
    }

    /// `None` when nothing was armed. Otherwise whether the guard's own
    /// history entry is still on top and must be popped.
    pub fn disarm(&mut self) -> Option<bool> {
        if !std::mem::replace(&mut self.armed, false) {
            return None;
        }
        Some(std::mem::take(&mut self.entry_on_top))
    }

    /// A back press popped the guard entry. Staying pushes it again.
    pub fn on_back(&mut self, confirmed: bool) -> BackDecision {
        self.entry_on_top = false;
        if !self.armed || confirmed {
            BackDecision::Leave
        } else {
            self.entry_on_top = true;
            BackDecision::Stay
        }
    }
}

type LeaveHook = Rc<dyn Fn()>;

/// Holds the `beforeunload` and `popstate` listeners while a session is active.
#[derive(Default)]
pub struct NavigationGuard {
    state: Rc<RefCell<GuardState>>,
    unload: Option<Closure<dyn FnMut(BeforeUnloadEvent)>>,
    popstate: Option<Closure<dyn FnMut(PopStateEvent)>>,
}

impl NavigationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install both guards. `on_leave` runs when the user confirms a back press.
    pub fn install(&mut self, on_leave: impl Fn() + 'static) {
        if !self.state.borrow_mut().arm() {
            return;
        }
        let Some(window) = web_sys::window() else {
            return;
        };

        let unload = Closure::<dyn FnMut(BeforeUnloadEvent)>::new(|ev: BeforeUnloadEvent| {
            ev.prevent_default();
            ev.set_return_value(LEAVE_PROMPT);
        });
        let _ = window.add_event_listener_with_callback("beforeunload", unload.as_ref().unchecked_ref());

        // Extra history entry so the first back press lands on our listener.
        if let Ok(history) = window.history() {
            let _ = history.push_state_with_url(&JsValue::NULL, "", None);
        }

        let state = self.state.clone();
        let on_leave: LeaveHook = Rc::new(on_leave);
        let popstate = Closure::<dyn FnMut(PopStateEvent)>::new(move |_ev: PopStateEvent| {
            let Some(window) = web_sys::window() else {
                return;
            };
            let confirmed = window.confirm_with_message(LEAVE_PROMPT).unwrap_or(true);
            let decision = state.borrow_mut().on_back(confirmed);
            match decision {
                BackDecision::Stay => {
                    if let Ok(history) = window.history() {
                        let _ = history.push_state_with_url(&JsValue::NULL, "", None);
                    }
                }
                BackDecision::Leave => on_leave(),
            }
        });
        let _ = window.add_event_listener_with_callback("popstate", popstate.as_ref().unchecked_ref());

        self.unload = Some(unload);
        self.popstate = Some(popstate);
        debug!("navigation guards installed");
    }

    /// Remove both guards and drop the history entry `install` pushed, if
    /// the user has not already gone back past it.
    pub fn teardown(&mut self) {
        let Some(pop_entry) = self.state.borrow_mut().disarm() else {
            return;
        };
        if let Some(window) = web_sys::window() {
            if let Some(unload) = self.unload.take() {
                let _ = window.remove_event_listener_with_callback("beforeunload", unload.as_ref().unchecked_ref());
            }
            if let Some(popstate) = self.popstate.take() {
                let _ = window.remove_event_listener_with_callback("popstate", popstate.as_ref().unchecked_ref());
            }
            if pop_entry {
                if let Ok(history) = window.history() {
                    let _ = history.back();
                }
            }
        }
        self.unload = None;
        self.popstate = None;
        debug!(pop_entry, "navigation guards removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_is_idempotent() {
        let mut s = GuardState::default();
        assert!(s.arm());
        assert!(!s.arm());
        assert_eq!(s.disarm(), Some(true));
        assert_eq!(s.disarm(), None);
    }

    #[test]
    fn teardown_pops_entry_only_while_it_is_on_top() {
        let mut s = GuardState::default();
        s.arm();
        assert_eq!(s.on_back(false), BackDecision::Stay);
        assert_eq!(s.disarm(), Some(true));

        s.arm();
        assert_eq!(s.on_back(true), BackDecision::Leave);
        assert_eq!(s.disarm(), Some(false));
    }

    #[test]
    fn declined_back_stays_while_armed() {
        let mut s = GuardState::default();
        assert_eq!(s.on_back(false), BackDecision::Leave);
        s.arm();
        assert_eq!(s.on_back(false), BackDecision::Stay);
        assert_eq!(s.on_back(true), BackDecision::Leave);
    }
}
