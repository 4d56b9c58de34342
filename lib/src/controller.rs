// Copyright (c) 2022-2023 The MobileCoin Foundation

//! External collaborators
//!
//! The managers never sign, estimate gas or talk to devices directly,
//! these traits are implemented by the wallet backend (or a simulator)
//! and injected via [Collaborators].

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;

use sigflow_core::{
    types::{Account, GasLevel, SignInfo, SignatureConfig, SignerCtx, Tx},
    TxHash,
};

use crate::typed::TypedDataItem;

/// Options for [WalletController::prepare]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PrepareOptions {
    /// Prepared for silent (direct) sending rather than UI confirmation
    pub direct: bool,
}

/// Options for [WalletController::send]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SendOptions {
    /// Re-send following a failure, already broadcast items may be skipped
    pub retry: bool,
}

/// Send progress callback
pub type ProgressFn<'a> = &'a (dyn Fn(SignInfo) + Send + Sync);

/// Wallet RPC collaborator
#[async_trait]
pub trait WalletController: Send + Sync {
    /// Prepare a signing context for a batch of transactions
    async fn prepare(
        &self,
        txs: &[Tx],
        config: &SignatureConfig,
        opts: PrepareOptions,
    ) -> anyhow::Result<SignerCtx>;

    /// Finalise a prepared context for display in the confirmation UI
    async fn open_ui(&self, ctx: &SignerCtx, _config: &SignatureConfig) -> anyhow::Result<SignerCtx> {
        Ok(ctx.clone())
    }

    /// Recompute a context following a gas selection change
    async fn update_gas(
        &self,
        ctx: &SignerCtx,
        gas: Option<&GasLevel>,
        account: &Account,
    ) -> anyhow::Result<SignerCtx>;

    /// Sign and broadcast the prepared batch, reporting progress via `progress`
    async fn send(
        &self,
        ctx: &SignerCtx,
        config: &SignatureConfig,
        opts: SendOptions,
        progress: ProgressFn<'_>,
    ) -> anyhow::Result<Vec<TxHash>>;
}

/// Typed-data signing collaborator
#[async_trait]
pub trait TypedDataSigner: Send + Sync {
    /// Sign a single typed-data item, returning the signature
    async fn sign_typed_data(&self, account: &Account, item: &TypedDataItem) -> anyhow::Result<TxHash>;
}

/// Hardware connectivity collaborator
#[async_trait]
pub trait DeviceMonitor: Send + Sync {
    async fn has_connected_ledger_device(&self) -> bool;
}

/// Interactive passphrase / derivation modal
#[async_trait]
pub trait PassphrasePrompt: Send + Sync {
    /// Request the passphrase for the provided account, erroring where dismissed
    async fn request_passphrase(&self, account: &Account) -> anyhow::Result<()>;
}

/// Injected collaborator set shared by the managers
#[derive(Clone)]
pub struct Collaborators {
    pub controller: Arc<dyn WalletController>,
    pub typed_data: Arc<dyn TypedDataSigner>,
    pub devices: Arc<dyn DeviceMonitor>,
    pub prompt: Arc<dyn PassphrasePrompt>,
}

impl Collaborators {
    /// Use a single backend implementing every collaborator
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: WalletController + TypedDataSigner + DeviceMonitor + PassphrasePrompt + 'static,
    {
        Self {
            controller: backend.clone(),
            typed_data: backend.clone(),
            devices: backend.clone(),
            prompt: backend,
        }
    }
}

impl Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
