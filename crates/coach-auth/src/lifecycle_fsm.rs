//! Session lifecycle state machine using rust-fsm.
//!
//! ```text
//!                  StartupSucceeded / SessionEstablished
//!   ┌─────────┐ ───────────────────────────────────────► ┌───────────────┐
//!   │ Loading │                                          │ Authenticated │
//!   └────┬────┘                                          └───────┬───────┘
//!        │ StartupFailed / SafetyTimeout / LoggedOut             │ LoggedOut
//!        ▼                                                       ▼
//!   ┌─────────────────┐    StartupSucceeded / SessionEstablished
//!   │ Unauthenticated │ ───────────────────────────────────► Authenticated
//!   └─────────────────┘
//! ```
//!
//! A late startup result is only accepted where it makes sense: a success
//! after the safety timer still authenticates, a failure after a login does
//! not undo it.

use crate::session::User;
use rust_fsm::*;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub lifecycle_machine(Loading)

    Loading => {
        StartupSucceeded => Authenticated,
        SessionEstablished => Authenticated,
        StartupFailed => Unauthenticated,
        SafetyTimeout => Unauthenticated,
        LoggedOut => Unauthenticated
    },
    Unauthenticated => {
        StartupSucceeded => Authenticated,
        SessionEstablished => Authenticated,
        LoggedOut => Unauthenticated
    },
    Authenticated => {
        SessionEstablished => Authenticated,
        LoggedOut => Unauthenticated
    }
}

pub use lifecycle_machine::Input as LifecycleInput;
pub use lifecycle_machine::State as LifecycleState;
pub use lifecycle_machine::StateMachine as LifecycleMachine;

/// Externally visible lifecycle phase.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthPhase {
    /// Startup check still running.
    Loading,
    Authenticated(User),
    Unauthenticated,
}

impl AuthPhase {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthPhase::Authenticated(_))
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            AuthPhase::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub(crate) fn from_state(state: &LifecycleState, user: Option<User>) -> Self {
        match (state, user) {
            (LifecycleState::Loading, _) => AuthPhase::Loading,
            (LifecycleState::Authenticated, Some(user)) => AuthPhase::Authenticated(user),
            (LifecycleState::Authenticated, None) | (LifecycleState::Unauthenticated, _) => {
                AuthPhase::Unauthenticated
            }
        }
    }
}
