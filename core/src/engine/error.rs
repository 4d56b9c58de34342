// Copyright (c) 2022-2023 The MobileCoin Foundation

use alloc::string::String;

use strum::{Display, EnumString, IntoStaticStr};

/// Signing flow error codes, as surfaced to UI callers
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString, IntoStaticStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Preparation RPC failed
    PrefetchFailure,
    /// Explicit reset / close, or superseded by a newer request
    UserCancelled,
    /// Send attempted while the can-process guard forbids it
    CantProcess,
    /// Direct-mode fee guard tripped
    GasFeeTooHigh,
    /// Send RPC failed
    SendFailure,
    /// Opening the confirmation UI failed
    OpenUiFailure,
    /// Hardware wallet not connected
    DeviceNotConnected,
    /// Malformed or empty request
    InvalidRequest,
    /// Typed-data signing failed mid-sequence
    TypedDataFailure,
}

impl ErrorCode {
    /// Check whether a session failing with this code may be retried,
    /// direct-mode guard failures require a new session
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::GasFeeTooHigh | Self::DeviceNotConnected)
    }
}

/// Error carried in flow state
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
#[cfg_attr(feature = "thiserror", error("{code}: {message}"))]
pub struct FlowError {
    pub code: ErrorCode,
    pub message: String,
}

impl FlowError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(not(feature = "thiserror"))]
impl core::fmt::Display for FlowError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
