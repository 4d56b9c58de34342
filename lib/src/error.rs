// Copyright (c) 2022-2023 The MobileCoin Foundation

use sigflow_core::{ErrorCode, FlowError};
use strum::Display;

/// Reason a pending signing result was cancelled
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CancelReason {
    /// Explicit reset / close
    UserCancelled,
    /// Replaced by a newer request
    Superseded,
}

/// Signature manager error type
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// Preparation RPC failed
    #[error("Preparation failed: {0}")]
    Prepare(String),

    /// Session cancelled
    #[error("Signing cancelled ({0})")]
    Cancelled(CancelReason),

    /// Send attempted while the guard forbids it
    #[error("Signing not permitted for the current context")]
    CantProcess,

    /// Direct send fee guard tripped
    #[error("Gas fee too high ({cost_usd:.2} USD, limit {limit_usd:.2} USD)")]
    GasFeeTooHigh { cost_usd: f64, limit_usd: f64 },

    /// Send RPC failed
    #[error("Send failed: {0}")]
    Send(String),

    /// Confirmation UI failed
    #[error("Opening signing UI failed: {0}")]
    OpenUi(String),

    /// Hardware wallet not connected
    #[error("Hardware wallet not connected")]
    DeviceNotConnected,

    /// Operation requires a prepared context
    #[error("No prepared signing context")]
    MissingContext,

    /// Request contained no items
    #[error("Empty signing request")]
    EmptyRequest,

    /// Operation not permitted in the current state
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),

    /// Typed-data signing failed
    #[error("Typed data signing failed: {0}")]
    TypedData(String),

    /// Other wallet controller failure
    #[error("Wallet controller error: {0}")]
    Controller(String),
}

impl Error {
    /// Map to the [ErrorCode] surfaced to UI callers
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Prepare(_) => ErrorCode::PrefetchFailure,
            Error::Cancelled(_) => ErrorCode::UserCancelled,
            Error::CantProcess => ErrorCode::CantProcess,
            Error::GasFeeTooHigh { .. } => ErrorCode::GasFeeTooHigh,
            Error::Send(_) | Error::Controller(_) => ErrorCode::SendFailure,
            Error::OpenUi(_) => ErrorCode::OpenUiFailure,
            Error::DeviceNotConnected => ErrorCode::DeviceNotConnected,
            Error::MissingContext | Error::EmptyRequest | Error::InvalidState(_) => {
                ErrorCode::InvalidRequest
            }
            Error::TypedData(_) => ErrorCode::TypedDataFailure,
        }
    }

    /// Check whether this error represents a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

/// Convert to the [FlowError] carried in state
impl From<&Error> for FlowError {
    fn from(e: &Error) -> Self {
        FlowError::new(e.code(), e.to_string())
    }
}

/// Collaborator failures are flattened to their message so errors remain [Clone]
impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Controller(format!("{e:#}"))
    }
}
