//! Error taxonomy. `EndExecution` is deliberately *not* a variant here: it is
//! not a failure but a non-error control signal, so it is represented by
//! [`Termination`] instead, which [`crate::engine::EngineAdapter::invoke_main`]
//! returns.

use crate::types::StatusCode;

/// Typed failure kinds produced anywhere in the EEI, validator, or
/// dispatcher. Consensus-critical, so this is a proper enum rather than a
/// stringly-typed `Result<T, String>`.
#[derive(thiserror::Error, Debug, Clone)]
pub enum EeiError {
    #[error("out of gas")]
    OutOfGas,

    #[error("invalid memory access")]
    InvalidMemoryAccess,

    #[error("state-modifying call under STATIC context")]
    StaticModeViolation,

    #[error("contract validation failed: {0}")]
    ContractValidationFailure(String),

    #[error("wasm trap: {0}")]
    VMTrap(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl EeiError {
    /// Maps a typed error to its host-facing exit status.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EeiError::OutOfGas => StatusCode::OutOfGas,
            EeiError::InvalidMemoryAccess => StatusCode::InvalidMemoryAccess,
            EeiError::StaticModeViolation => StatusCode::StaticModeViolation,
            EeiError::ContractValidationFailure(_) => StatusCode::ContractValidationFailure,
            EeiError::VMTrap(_) => StatusCode::Failure,
            EeiError::InternalError(_) => StatusCode::InternalError,
        }
    }
}

/// The three ways a Wasm instance's `main` can stop.
#[derive(Debug, Clone)]
pub enum Termination {
    /// `main` returned normally without calling `finish`/`revert`.
    Completed,
    /// `finish` or `revert` was called.
    Ended { is_revert: bool, output: Vec<u8> },
    /// A typed error surfaced, either from the EEI or from the underlying
    /// engine reporting a trap.
    Failed(EeiError),
}
