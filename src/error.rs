//! Registration error taxonomy.
//!
//! Validation problems and conflicts are reported as values; nothing here is
//! ever raised on the event-delivery thread.

use thiserror::Error;

use crate::registry::BindingId;

/// Why a registration request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("key list is empty or contains no recognizable keys")]
    EmptyKeys,

    #[error("a chord needs at least two distinct keys; register a tap binding for a single key")]
    SingleKeyChord,

    #[error("tap count must be at least 2, got {0}")]
    InvalidTapCount(u32),

    #[error("key has no canonical form")]
    InvalidKey,

    #[error("keys are already bound by hotkey {existing}")]
    Conflict { existing: BindingId },
}

impl RegisterError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RegisterError::Conflict { .. })
    }

    pub fn is_validation(&self) -> bool {
        !self.is_conflict()
    }
}
