// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Wallet signature flow orchestration
//!
//! Async managers driving the [sigflow_core] engine against an injected
//! wallet backend (see [controller]):
//!
//! - [SignatureManager] for single-batch transaction signing
//!   (prefetch -> open UI / direct -> send -> retry)
//! - [TypedDataManager] for ordered, resumable typed-data signing
//!
//! Managers are explicitly constructed from a [Collaborators] set, state is
//! observed via `subscribe` / `watch` and each signing session resolves to a
//! single awaitable result.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use sigflow::{controller::*, *};
//! # async fn example<B>(backend: Arc<B>, request: SignatureRequest) -> Result<(), Error>
//! # where B: WalletController + TypedDataSigner + DeviceMonitor + PassphrasePrompt + 'static {
//! let service = SigningService::new(Collaborators::from_backend(backend));
//!
//! // Warm the context ahead of display
//! service.signature.prefetch(request.clone()).await;
//!
//! // Open the confirmation UI, resolving once the user sends
//! let s = service.signature.clone();
//! let pending = tokio::spawn(async move { s.open_ui(request).await });
//!
//! // ... on user confirmation
//! service.signature.send().await?;
//! # let _ = pending.await;
//! # Ok(())
//! # }
//! ```

/// Re-export `sigflow-core` for consumers
pub use sigflow_core::{self as flow};

pub use sigflow_core::{
    engine::{FlowState, Status},
    typed::{Progress, TypedStatus},
    types, ErrorCode, FlowError, TxHash,
};

mod bridge;

pub mod controller;
pub use controller::Collaborators;

mod error;
pub use error::{CancelReason, Error};

pub mod signature;
pub use signature::{SignatureManager, SignatureRequest};

pub mod store;

pub mod typed;
pub use typed::{TypedDataItem, TypedDataManager, TypedDataRequest, TypedDataState};

/// Signing service, both managers over a shared collaborator set
#[derive(Clone)]
pub struct SigningService {
    pub signature: SignatureManager,
    pub typed_data: TypedDataManager,
}

impl SigningService {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            signature: SignatureManager::new(collaborators.clone()),
            typed_data: TypedDataManager::new(collaborators),
        }
    }

    /// Close any open sessions, rejecting pending results as cancelled
    pub fn close(&self) {
        self.signature.close();
        self.typed_data.close();
    }
}
