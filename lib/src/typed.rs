// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Ordered typed-data signing
//!
//! The [TypedDataManager] signs a sequence of typed-data items in order.
//! A failure part-way through pauses the sequence in [TypedStatus::Error]
//! without settling the pending result, [TypedDataManager::retry] then
//! resumes from the failed item using the results retained so far.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::watch;

use sigflow_core::{
    typed::{Progress, ResumeState, TypedStatus},
    types::Account,
    FlowError, TxHash,
};

use crate::{
    bridge::{settle, ResultBridge},
    controller::Collaborators,
    error::CancelReason,
    store::{Store, Subscription},
    Error,
};

/// Typed-data encoding version
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum TypedDataVersion {
    V1,
    V3,
    #[default]
    V4,
}

/// Single typed-data payload to be signed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypedDataItem {
    #[serde(default)]
    pub version: TypedDataVersion,
    /// Structured payload, opaque to the manager
    pub data: serde_json::Value,
}

/// Ordered typed-data signing request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypedDataRequest {
    pub account: Account,
    pub items: Vec<TypedDataItem>,
}

/// Typed-data session state
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypedDataState {
    pub status: TypedStatus,
    pub request: Option<Arc<TypedDataRequest>>,
    pub error: Option<FlowError>,
    pub progress: Progress,
}

/// Orchestrates ordered typed-data signing sessions
///
/// Cloning returns a handle to the same manager.
#[derive(Clone)]
pub struct TypedDataManager {
    inner: Arc<Inner>,
}

struct Inner {
    collaborators: Collaborators,
    store: Store<TypedDataState>,
    /// Resume bookkeeping, also serialises generation changes
    resume: Mutex<ResumeState>,
    generation: AtomicU64,
    result: ResultBridge<Vec<TxHash>>,
}

impl TypedDataManager {
    /// Create a new manager with the provided collaborators
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            inner: Arc::new(Inner {
                collaborators,
                store: Store::new(TypedDataState::default()),
                resume: Mutex::new(ResumeState::new()),
                generation: AtomicU64::new(0),
                result: ResultBridge::new(),
            }),
        }
    }

    pub fn get_state(&self) -> Arc<TypedDataState> {
        self.inner.store.get()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Arc<TypedDataState>) + Send + Sync + 'static,
    {
        self.inner.store.subscribe(listener)
    }

    pub fn watch(&self) -> watch::Receiver<Arc<TypedDataState>> {
        self.inner.store.watch()
    }

    /// Fetch the retained resume point
    pub fn resume_state(&self) -> ResumeState {
        self.inner.resume().clone()
    }

    /// Sign every item in `request`, resolving with the signatures in order
    ///
    /// Any pending session is rejected as cancelled before this begins.
    /// Failures pause the session rather than rejecting, see [Self::retry].
    pub async fn start(&self, request: TypedDataRequest) -> Result<Vec<TxHash>, Error> {
        if request.items.is_empty() {
            return Err(Error::EmptyRequest);
        }

        let request = Arc::new(request);
        let total = request.items.len();

        let (gen, rx) = {
            let mut resume = self.inner.resume();

            let gen = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let rx = self.inner.result.begin();
            resume.clear();

            self.inner.store.set(TypedDataState {
                status: TypedStatus::Signing,
                request: Some(request.clone()),
                error: None,
                progress: Progress::new(0, total),
            });

            (gen, rx)
        };

        debug!("starting typed-data session {} ({} item(s))", gen, total);

        // Signing continues in the background, cancellation settles the pending result
        let this = self.clone();
        tokio::spawn(async move { this.run_session(gen, request).await });

        settle(rx).await
    }

    async fn run_session(self, gen: u64, request: Arc<TypedDataRequest>) {
        // Interactive accounts are unlocked once up front
        if request.account.kind.requires_passphrase() {
            let r = self
                .inner
                .collaborators
                .prompt
                .request_passphrase(&request.account)
                .await;

            if let Err(e) = r {
                warn!("passphrase request failed: {:#}", e);

                self.inner.with_current(gen, |resume| {
                    resume.clear();
                    self.inner.store.set(TypedDataState::default());
                    self.inner
                        .result
                        .reject(Error::Cancelled(CancelReason::UserCancelled));
                });

                return;
            }
        }

        // Attempt outcome is delivered via the pending result
        let _ = self.inner.run_from(gen).await;
    }

    /// Resume a paused session from the failed item
    ///
    /// Returns the outcome of this attempt, the result of the originating
    /// [Self::start] call resolves once the sequence completes.
    pub async fn retry(&self) -> Result<Vec<TxHash>, Error> {
        let gen = {
            let resume = self.inner.resume();

            let state = self.inner.store.get();
            if state.status != TypedStatus::Error {
                return Err(Error::InvalidState(state.status.to_string()));
            }

            let gen = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                "resuming typed-data session {} from item {}",
                gen,
                resume.resume_index()
            );

            self.inner.modify(|s| {
                s.status = TypedStatus::Signing;
                s.error = None;
            });

            gen
        };

        self.inner.run_from(gen).await
    }

    /// Close the session, rejecting any pending result as cancelled
    pub fn close(&self) {
        let mut resume = self.inner.resume();

        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        resume.clear();

        if self
            .inner
            .result
            .reject(Error::Cancelled(CancelReason::UserCancelled))
        {
            debug!("rejected pending typed-data result");
        }

        self.inner.store.set(TypedDataState::default());
    }
}

impl Inner {
    fn resume(&self) -> MutexGuard<'_, ResumeState> {
        self.resume.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` only where `gen` is the current generation
    fn with_current<R>(&self, gen: u64, f: impl FnOnce(&mut ResumeState) -> R) -> Option<R> {
        let mut resume = self.resume();

        if self.generation.load(Ordering::SeqCst) != gen {
            debug!("discarding typed-data update for stale generation {}", gen);
            return None;
        }

        Some(f(&mut resume))
    }

    fn modify(&self, f: impl FnOnce(&mut TypedDataState)) {
        self.store.update(|s| {
            let mut next = TypedDataState::clone(s);
            f(&mut next);
            Arc::new(next)
        });
    }

    fn publish_progress(&self, gen: u64, progress: Progress) -> bool {
        self.with_current(gen, |_| self.modify(|s| s.progress = progress))
            .is_some()
    }

    /// Sign items from the resume point onwards
    async fn run_from(&self, gen: u64) -> Result<Vec<TxHash>, Error> {
        let request = match self.store.get().request.clone() {
            Some(r) => r,
            None => return Err(Error::MissingContext),
        };

        let (start, mut signed) = self.resume().begin();
        let total = request.items.len();

        for (i, item) in request.items.iter().enumerate().skip(start) {
            if !self.publish_progress(gen, Progress::new(i, total)) {
                return Err(Error::Cancelled(CancelReason::Superseded));
            }

            debug!("signing typed-data item {}/{} ({})", i + 1, total, item.version);

            let r = self
                .collaborators
                .typed_data
                .sign_typed_data(&request.account, item)
                .await;

            match r {
                Ok(hash) => {
                    signed.push(hash);

                    if !self.publish_progress(gen, Progress::new(i + 1, total)) {
                        return Err(Error::Cancelled(CancelReason::Superseded));
                    }
                }
                Err(e) => {
                    let e = Error::TypedData(format!("{e:#}"));
                    warn!("typed-data item {} failed: {}", i, e);

                    let paused = self.with_current(gen, |resume| {
                        let progress = self.store.get().progress;
                        resume.record_failure(progress, i, signed);

                        self.modify(|s| {
                            s.status = TypedStatus::Error;
                            s.error = Some(FlowError::from(&e));
                        });
                    });

                    return match paused {
                        Some(_) => Err(e),
                        None => Err(Error::Cancelled(CancelReason::Superseded)),
                    };
                }
            }
        }

        let completed = self.with_current(gen, |resume| {
            resume.clear();

            self.modify(|s| {
                s.status = TypedStatus::Idle;
                s.request = None;
                s.error = None;
            });

            self.result.resolve(signed.clone());
        });

        match completed {
            Some(_) => {
                info!("typed-data signing complete ({} item(s))", signed.len());
                Ok(signed)
            }
            None => Err(Error::Cancelled(CancelReason::Superseded)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_request() {
        let r: TypedDataRequest = serde_json::from_str(
            r#"{
                "account": { "address": "0xabc", "kind": "mnemonic" },
                "items": [
                    { "data": { "primaryType": "Permit" } },
                    { "version": "v3", "data": {} }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(r.items.len(), 2);
        assert_eq!(r.items[0].version, TypedDataVersion::V4);
        assert_eq!(r.items[1].version, TypedDataVersion::V3);
        assert!(r.account.kind.requires_passphrase());
    }
}
