//! Fault injection hook for crash and failure testing

use super::transaction::WriteState;
use pagevault_core::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    Continue,
    /// Fail the next step as if it hit an I/O error; rollback runs
    Fail,
    /// Stop dead as if the process crashed; nothing is rolled back
    Halt,
}

/// Consulted after every write state transition
pub trait FaultInjector: Send + Sync {
    fn after(&self, resource: &ResourceId, state: WriteState) -> FaultAction;
}

/// The production injector
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn after(&self, _resource: &ResourceId, _state: WriteState) -> FaultAction {
        FaultAction::Continue
    }
}

/// Trigger `action` whenever a write reaches `state`
#[derive(Debug, Clone, Copy)]
pub struct FaultAt {
    pub state: WriteState,
    pub action: FaultAction,
}

impl FaultAt {
    pub fn new(state: WriteState, action: FaultAction) -> Self {
        Self { state, action }
    }
}

impl FaultInjector for FaultAt {
    fn after(&self, _resource: &ResourceId, state: WriteState) -> FaultAction {
        if state == self.state {
            self.action
        } else {
            FaultAction::Continue
        }
    }
}

impl<F> FaultInjector for F
where
    F: Fn(&ResourceId, WriteState) -> FaultAction + Send + Sync,
{
    fn after(&self, resource: &ResourceId, state: WriteState) -> FaultAction {
        self(resource, state)
    }
}
