//! Service lifecycle contract.
//!
//! The host process drives every service through `initialize → start → stop`
//! exactly once, in that order. State only ever moves forward.

use thiserror::Error;

use crate::error::BoxError;

/// A component whose lifecycle is owned by the host process.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    fn initialize(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn start(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Must be callable even if `start` was never reached.
    fn stop(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Lifecycle state of a service instance. Ordered: later variants are "beyond".
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
}

/// What a requested transition amounts to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The state moves forward; perform the work.
    Advance,
    /// Already in the target state or beyond it; do nothing.
    AlreadyThere,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("illegal lifecycle transition from {from:?} to {to:?}")]
    IllegalTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}

impl LifecycleState {
    /// Decide whether moving from `self` to `target` is work, a no-op, or illegal.
    ///
    /// Starting requires initialization first; stopping is always allowed.
    pub fn transition_to(self, target: LifecycleState) -> Result<Transition, LifecycleError> {
        if self >= target {
            return Ok(Transition::AlreadyThere);
        }
        match (self, target) {
            (LifecycleState::Uninitialized, LifecycleState::Started) => {
                Err(LifecycleError::IllegalTransition {
                    from: self,
                    to: target,
                })
            }
            _ => Ok(Transition::Advance),
        }
    }
}
