// Copyright (c) 2022-2023 The MobileCoin Foundation

use alloc::{string::String, vec::Vec};

use strum::IntoStaticStr;

use crate::types::{ConfigPatch, SignInfo, SignatureConfig, SignerCtx, TxHash};

use super::FlowError;

/// [`reduce`][super::reduce] input actions
///
/// All actions other than [Action::SetConfig], [Action::PrefetchStart] and
/// [Action::Reset] carry the fingerprint of the request they belong to and
/// are ignored when it does not match the current state.
#[derive(Clone, Debug, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Merge a partial configuration (fingerprint agnostic)
    SetConfig(ConfigPatch),

    /// Begin preparing a new request, replacing all state
    PrefetchStart {
        fingerprint: String,
        config: SignatureConfig,
        ctx: SignerCtx,
    },

    /// Preparation completed
    PrefetchSuccess { fingerprint: String, ctx: SignerCtx },

    /// Preparation failed
    PrefetchFailure {
        fingerprint: String,
        error: FlowError,
    },

    /// Confirmation UI opened with a placeholder context
    OpenUiSkeleton { fingerprint: String, ctx: SignerCtx },

    /// Confirmation UI populated with the prepared context
    OpenUiSuccess { fingerprint: String, ctx: SignerCtx },

    /// Confirmation UI could not be populated
    OpenUiFailure {
        fingerprint: String,
        error: FlowError,
    },

    /// Replace the context without changing status
    UpdateCtx { fingerprint: String, ctx: SignerCtx },

    /// Switch the context to the gasless method
    EnableGasless { fingerprint: String },

    /// Begin sending `total_txs` transactions
    SendStart {
        fingerprint: String,
        total_txs: usize,
    },

    /// Send progress update
    SendProgress {
        fingerprint: String,
        sign_info: SignInfo,
    },

    /// All transactions sent
    SendSuccess {
        fingerprint: String,
        hashes: Vec<TxHash>,
    },

    /// Sending failed
    SendFailure {
        fingerprint: String,
        error: FlowError,
    },

    /// Return to idle, dropping all fields
    Reset,
}

impl Action {
    /// Fingerprint guarding this action, `None` for fingerprint agnostic actions
    pub fn fingerprint(&self) -> Option<&str> {
        use Action::*;

        match self {
            SetConfig(_) | Reset => None,
            PrefetchStart { fingerprint, .. }
            | PrefetchSuccess { fingerprint, .. }
            | PrefetchFailure { fingerprint, .. }
            | OpenUiSkeleton { fingerprint, .. }
            | OpenUiSuccess { fingerprint, .. }
            | OpenUiFailure { fingerprint, .. }
            | UpdateCtx { fingerprint, .. }
            | EnableGasless { fingerprint }
            | SendStart { fingerprint, .. }
            | SendProgress { fingerprint, .. }
            | SendSuccess { fingerprint, .. }
            | SendFailure { fingerprint, .. } => Some(fingerprint),
        }
    }

    /// Action name for logging
    pub fn name(&self) -> &'static str {
        self.into()
    }
}
