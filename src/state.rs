use std::cell::RefCell;

use crate::models::SubscriptionState;

/// Owned controller state: the observable subscription state plus the live
/// platform handle. Only the controller mutates it.
#[derive(Debug)]
pub struct SubscriptionSession<S> {
    pub(crate) state: SubscriptionState,
    pub(crate) supported: bool,
    pub(crate) handle: Option<S>,
}

impl<S> Default for SubscriptionSession<S> {
    fn default() -> Self {
        Self {
            state: SubscriptionState::Unknown,
            supported: false,
            handle: None,
        }
    }
}

/// Token for the single in-flight mutating operation.
///
/// Dropping the token without `finish` puts back the state seen before the
/// operation started.
pub(crate) struct InFlight<'a, S> {
    session: &'a RefCell<SubscriptionSession<S>>,
    restore: SubscriptionState,
    finished: bool,
}

impl<'a, S> InFlight<'a, S> {
    /// Returns `None` if another operation already holds the token.
    pub(crate) fn begin(session: &'a RefCell<SubscriptionSession<S>>) -> Option<Self> {
        let mut guard = session.borrow_mut();
        if guard.state == SubscriptionState::Pending {
            return None;
        }
        let restore = guard.state;
        guard.state = SubscriptionState::Pending;
        Some(Self {
            session,
            restore,
            finished: false,
        })
    }

    pub(crate) fn finish(mut self, state: SubscriptionState, handle: Option<S>) {
        self.finished = true;
        let mut guard = self.session.borrow_mut();
        guard.state = state;
        guard.handle = handle;
    }
}

impl<S> Drop for InFlight<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            self.session.borrow_mut().state = self.restore;
        }
    }
}
