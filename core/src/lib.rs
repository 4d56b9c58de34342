// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Wallet signature flow core
//!
//! This provides the side-effect free parts of the signing workflow shared by
//! every wallet UI surface: request [fingerprint]s, the [engine] reducer that
//! governs a signing session, the [run] tracker used to discard stale async
//! results, and the [typed] resume bookkeeping for ordered typed-data signing.
//!
//! Nothing in this crate performs I/O, see the `sigflow` crate for the async
//! managers that drive the engine against a wallet controller.
//!
//! ## Operations
//!
//! ### Single-batch (transaction) signing
//!
//! 1. Compute the [`fingerprint`][fingerprint::fingerprint] for the batch, this is
//!    the sole identity of the signing intent and is carried by every
//!    [`Action`][engine::Action].
//! 2. Issue [`PrefetchStart`][engine::Action::PrefetchStart] with a
//!    [skeleton][types::SignerCtx::skeleton] context so there is something to
//!    render immediately.
//! 3. Mint a run via [`RunTracker::mark_run`][run::RunTracker::mark_run] and
//!    check [`RunTracker::is_active`][run::RunTracker::is_active] before
//!    applying any async result.
//! 4. Apply [`PrefetchSuccess`][engine::Action::PrefetchSuccess] or
//!    [`OpenUiSuccess`][engine::Action::OpenUiSuccess] with the prepared context.
//! 5. Check [`can_process`][engine::guard::can_process] (applying
//!    [`EnableGasless`][engine::Action::EnableGasless] where an automatic
//!    upgrade is available), then walk `SendStart` -> `SendProgress` ->
//!    `SendSuccess` / `SendFailure`.
//! 6. [`Reset`][engine::Action::Reset] returns the engine to
//!    [`Idle`][engine::Status::Idle] from any state.
//!
//! ### Typed-data signing
//!
//! Ordered typed-data signing keeps a [`ResumeState`][typed::ResumeState]
//! so a failure part-way through a sequence can be retried from the failed
//! item without re-signing completed items.
//!

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod types;

pub mod fingerprint;

pub mod engine;

pub mod run;

pub mod typed;

pub use engine::{ErrorCode, FlowError};
pub use types::TxHash;
