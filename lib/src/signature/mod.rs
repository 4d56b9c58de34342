// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Single-batch (transaction) signing
//!
//! The [SignatureManager] owns the canonical [FlowState] for a signing
//! session and drives prefetch -> open UI -> send -> retry transitions
//! against the injected [WalletController][crate::controller::WalletController].
//!
//! Every async continuation captures the [RunContext] current when it was
//! started and is discarded (no dispatch, no result) where a reset or newer
//! request has since replaced it.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use futures::FutureExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use sigflow_core::{
    engine::{guard, reduce, Action, FlowState, Status},
    fingerprint::fingerprint,
    run::{RunContext, RunTracker},
    types::{ConfigPatch, SignInfo, SignatureConfig, SignerCtx, Tx},
    FlowError, TxHash,
};

use crate::{
    bridge::{settle, ResultBridge, ResultReceiver},
    controller::{Collaborators, PrepareOptions, SendOptions},
    error::CancelReason,
    store::{Store, Subscription},
    Error,
};

mod cache;
use cache::ContextCache;

mod gas;

/// Signing request, a batch of transactions with session configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRequest {
    pub txs: Vec<Tx>,
    #[serde(default)]
    pub config: SignatureConfig,
}

impl SignatureRequest {
    pub fn new(txs: Vec<Tx>, config: SignatureConfig) -> Self {
        Self { txs, config }
    }

    /// Fingerprint identifying this signing intent
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.txs)
    }
}

/// Orchestrates single-batch signing sessions
///
/// Cloning returns a handle to the same manager.
#[derive(Clone)]
pub struct SignatureManager {
    inner: Arc<Inner>,
}

struct Inner {
    collaborators: Collaborators,
    store: Store<FlowState>,
    runs: Mutex<RunTracker>,
    cache: ContextCache,
    result: ResultBridge<Vec<TxHash>>,
    gas_revision: AtomicU64,
}

impl SignatureManager {
    /// Create a new manager with the provided collaborators
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            inner: Arc::new(Inner {
                collaborators,
                store: Store::new(FlowState::default()),
                runs: Mutex::new(RunTracker::new()),
                cache: ContextCache::new(),
                result: ResultBridge::new(),
                gas_revision: AtomicU64::new(0),
            }),
        }
    }

    /// Fetch a snapshot of the current state
    pub fn get_state(&self) -> Arc<FlowState> {
        self.inner.store.get()
    }

    /// Register a state listener, see [Store::subscribe]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Arc<FlowState>) + Send + Sync + 'static,
    {
        self.inner.store.subscribe(listener)
    }

    /// Fetch a state receiver for async consumers
    pub fn watch(&self) -> watch::Receiver<Arc<FlowState>> {
        self.inner.store.watch()
    }

    /// Merge a partial configuration into the current session
    pub fn set_config(&self, patch: ConfigPatch) {
        let state = self.inner.dispatch(Action::SetConfig(patch));

        // Derived flags depend on configuration
        if let (Some(fp), Some(ctx), Some(config)) =
            (&state.fingerprint, state.prepared_ctx(), &state.config)
        {
            let mut next = SignerCtx::clone(ctx);
            next.refresh_flags(config);

            if next != **ctx {
                self.inner.dispatch(Action::UpdateCtx {
                    fingerprint: fp.clone(),
                    ctx: next,
                });
            }
        }
    }

    /// Check whether sending is currently permitted, for display
    ///
    /// This includes any automatic gasless upgrade that would be applied on send,
    /// and never mutates state.
    pub fn can_process(&self) -> bool {
        let state = self.inner.store.get();

        match (state.prepared_ctx(), &state.config) {
            (Some(ctx), Some(config)) => {
                guard::can_process(ctx, config) || guard::gasless_upgrade_available(ctx, config)
            }
            _ => false,
        }
    }

    /// Prepare a signing context ahead of display
    ///
    /// Failures are surfaced through state rather than returned.
    pub async fn prefetch(&self, request: SignatureRequest) {
        let (run, _) = match self.begin_session(&request, false) {
            Ok(v) => v,
            Err(e) => {
                warn!("prefetch rejected: {}", e);
                return;
            }
        };
        let fp = run.fingerprint.clone();

        match self
            .ensure_context(&fp, &request, PrepareOptions::default())
            .await
        {
            // Only advance sessions still awaiting preparation
            Ok(ctx) if self.inner.store.get().status == Status::Prefetching => {
                self.inner.dispatch_for(
                    &run,
                    Action::PrefetchSuccess {
                        fingerprint: fp,
                        ctx: SignerCtx::clone(&ctx),
                    },
                );
                self.inner.apply_gasless_upgrade(&run);
            }
            Ok(_) => (),
            Err(e) => {
                warn!("prefetch failed: {}", e);
                self.inner.dispatch_for(
                    &run,
                    Action::PrefetchFailure {
                        fingerprint: fp,
                        error: FlowError::from(&e),
                    },
                );
            }
        }
    }

    /// Open the confirmation UI for a request
    ///
    /// A skeleton context is published before preparation completes, the
    /// returned future resolves once the session is sent (see [Self::send])
    /// or rejects on failure / cancellation.
    pub async fn open_ui(&self, request: SignatureRequest) -> Result<Vec<TxHash>, Error> {
        let (run, rx) = self.begin_session(&request, true)?;

        // Reuse a prepared context, otherwise publish a skeleton while preparing
        let prepared = self.inner.store.get().prepared_ctx().cloned();
        if prepared.is_none() {
            self.inner.dispatch_for(
                &run,
                Action::OpenUiSkeleton {
                    fingerprint: run.fingerprint.clone(),
                    ctx: SignerCtx::skeleton(&request.txs),
                },
            );
        }

        // Collaborator calls are never aborted, cancellation settles the
        // pending result and the late outcome is discarded
        let this = self.clone();
        tokio::spawn(async move { this.open_ui_task(run, request, prepared).await });

        settle_result(rx).await
    }

    async fn open_ui_task(
        self,
        run: RunContext,
        request: SignatureRequest,
        prepared: Option<Arc<SignerCtx>>,
    ) {
        let fp = run.fingerprint.clone();
        let config = request.config.clone();

        let ctx = match prepared {
            Some(ctx) => Ok(ctx),
            None => {
                self.ensure_context(&fp, &request, PrepareOptions::default())
                    .await
            }
        };

        let r = match ctx {
            Ok(ctx) => self
                .inner
                .collaborators
                .controller
                .open_ui(&ctx, &config)
                .await
                .map_err(|e| Error::OpenUi(format!("{e:#}"))),
            Err(e) => Err(e),
        };

        match r {
            Ok(mut ctx) => {
                ctx.skeleton = false;
                ctx.refresh_flags(&config);

                let applied = self.inner.dispatch_for(
                    &run,
                    Action::OpenUiSuccess {
                        fingerprint: fp,
                        ctx,
                    },
                );
                if applied {
                    self.inner.apply_gasless_upgrade(&run);
                }
            }
            Err(e) => {
                warn!("open ui failed: {}", e);
                self.inner.settle_run(
                    &run,
                    Action::OpenUiFailure {
                        fingerprint: fp,
                        error: FlowError::from(&e),
                    },
                    Err(e),
                );
            }
        }
    }

    /// Sign and send a request without user confirmation
    ///
    /// This enforces the fee limit and hardware connectivity before sending.
    pub async fn open_direct(&self, request: SignatureRequest) -> Result<Vec<TxHash>, Error> {
        let (run, rx) = self.begin_session(&request, true)?;

        let this = self.clone();
        tokio::spawn(async move { this.open_direct_task(run, request).await });

        settle_result(rx).await
    }

    async fn open_direct_task(self, run: RunContext, request: SignatureRequest) {
        let fp = run.fingerprint.clone();

        let opts = PrepareOptions { direct: true };
        let ctx = match self.ensure_context(&fp, &request, opts).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!("direct preparation failed: {}", e);
                self.inner.settle_run(
                    &run,
                    Action::PrefetchFailure {
                        fingerprint: fp,
                        error: FlowError::from(&e),
                    },
                    Err(e),
                );
                return;
            }
        };

        let applied = self.inner.dispatch_for(
            &run,
            Action::PrefetchSuccess {
                fingerprint: fp.clone(),
                ctx: SignerCtx::clone(&ctx),
            },
        );
        if !applied {
            return;
        }
        self.inner.apply_gasless_upgrade(&run);

        // Fee guard
        if guard::is_gas_fee_too_high(&ctx) {
            let e = Error::GasFeeTooHigh {
                cost_usd: ctx
                    .selected_gas_cost
                    .as_ref()
                    .map(|c| c.gas_cost_usd)
                    .unwrap_or_default(),
                limit_usd: guard::gas_fee_limit_usd(ctx.chain_id),
            };

            warn!("direct send blocked: {}", e);
            self.inner.fail(&run, e);
            return;
        }

        // Hardware wallets must be connected prior to sending
        if request.config.account.kind.is_hardware()
            && !self
                .inner
                .collaborators
                .devices
                .has_connected_ledger_device()
                .await
        {
            warn!("direct send blocked: no ledger device connected");
            self.inner.fail(&run, Error::DeviceNotConnected);
            return;
        }

        // Outcome is delivered via the pending result
        let _ = self.send_run(run, SendOptions::default()).await;
    }

    /// Send the prepared session
    pub async fn send(&self) -> Result<Vec<TxHash>, Error> {
        self.send_with(SendOptions::default()).await
    }

    /// Re-send a session following a send failure
    pub async fn retry(&self) -> Result<Vec<TxHash>, Error> {
        self.send_with(SendOptions { retry: true }).await
    }

    /// Reset the manager, rejecting any pending result as cancelled
    pub fn reset(&self) {
        let mut runs = self.inner.runs();
        runs.clear();

        if self
            .inner
            .result
            .reject(Error::Cancelled(CancelReason::UserCancelled))
        {
            debug!("rejected pending signing result");
        }

        self.inner.dispatch(Action::Reset);
    }

    /// Close the current session, see [Self::reset]
    pub fn close(&self) {
        debug!("closing signing session");
        self.reset();
    }

    /// Start or continue a session for `request`, optionally beginning a new pending result
    fn begin_session(
        &self,
        request: &SignatureRequest,
        with_result: bool,
    ) -> Result<(RunContext, Option<ResultReceiver<Vec<TxHash>>>), Error> {
        if request.txs.is_empty() {
            return Err(Error::EmptyRequest);
        }

        let fp = request.fingerprint();
        let state = self.inner.store.get();

        // Hold the run lock so session changes are applied atomically
        let mut runs = self.inner.runs();

        let same_intent = state.is_for(&fp) && state.config.as_ref() == Some(&request.config);

        let run = match state.status {
            Status::Signing if same_intent => {
                return Err(Error::InvalidState(state.status.to_string()));
            }
            Status::Prefetching | Status::Ready | Status::UiOpen if same_intent => {
                debug!("continuing session for {}", fp);
                runs.mark_run(&fp, None)
            }
            _ => {
                debug!("starting session for {}", fp);

                if self
                    .inner
                    .result
                    .reject(Error::Cancelled(CancelReason::Superseded))
                {
                    debug!("superseded pending signing result");
                }

                runs.clear();
                let run = runs.mark_run(&fp, None);

                self.inner.dispatch(Action::PrefetchStart {
                    fingerprint: fp,
                    config: request.config.clone(),
                    ctx: SignerCtx::skeleton(&request.txs),
                });

                run
            }
        };

        let rx = with_result.then(|| self.inner.result.begin());

        Ok((run, rx))
    }

    /// Fetch a prepared context, joining or starting a single-flight preparation
    async fn ensure_context(
        &self,
        fp: &str,
        request: &SignatureRequest,
        opts: PrepareOptions,
    ) -> Result<Arc<SignerCtx>, Error> {
        let state = self.inner.store.get();
        if state.is_for(fp) && matches!(state.status, Status::Ready | Status::UiOpen) {
            if let Some(ctx) = state.prepared_ctx() {
                debug!("reusing prepared context for {}", fp);
                return Ok(ctx.clone());
            }
        }

        let controller = self.inner.collaborators.controller.clone();
        let txs = request.txs.clone();
        let config = request.config.clone();

        let preparation = self.inner.cache.get_or_start(fp, move || {
            async move {
                debug!("preparing {} transaction(s)", txs.len());

                let mut ctx = controller
                    .prepare(&txs, &config, opts)
                    .await
                    .map_err(|e| Error::Prepare(format!("{e:#}")))?;

                ctx.refresh_flags(&config);

                Ok(Arc::new(ctx))
            }
            .boxed()
        });

        preparation.await
    }

    async fn send_with(&self, opts: SendOptions) -> Result<Vec<TxHash>, Error> {
        let state = self.inner.store.get();

        let fp = match (&state.fingerprint, state.prepared_ctx(), &state.config) {
            (Some(fp), Some(_), Some(_)) => fp.clone(),
            _ => return Err(Error::MissingContext),
        };

        let permitted = match opts.retry {
            true => state.status == Status::Error,
            false => matches!(state.status, Status::Ready | Status::UiOpen),
        };
        if !permitted {
            return Err(Error::InvalidState(state.status.to_string()));
        }

        // Direct-mode guard failures are not re-checked by a retry
        if let Some(e) = state.error.as_ref().filter(|e| !e.code.is_retryable()) {
            debug!("refusing retry following {}", e.code);
            return Err(Error::InvalidState(format!("{}: {}", state.status, e.code)));
        }

        let run = self.inner.runs().mark_run(&fp, None);

        self.send_run(run, opts).await
    }

    /// Send the current context for `run`, settling the pending result
    async fn send_run(&self, run: RunContext, opts: SendOptions) -> Result<Vec<TxHash>, Error> {
        let fp = run.fingerprint.clone();

        // Re-validate against the latest context
        self.inner.apply_gasless_upgrade(&run);

        // Snapshot and start under the run lock so no gas reconciliation lands in between
        let (ctx, config, permitted) = {
            let runs = self.inner.runs();

            if !runs.is_current(&run) {
                debug!("discarding send for stale run {}", run.id);
                return Err(Error::Cancelled(CancelReason::Superseded));
            }

            let state = self.inner.store.get();
            let (ctx, config) = match (state.prepared_ctx(), &state.config) {
                (Some(ctx), Some(config)) if state.is_for(&fp) => (ctx.clone(), config.clone()),
                _ => return Err(Error::MissingContext),
            };

            let permitted = guard::can_process(&ctx, &config);
            if permitted {
                // Outstanding gas selections are superseded by the send
                self.inner.gas_revision.fetch_add(1, Ordering::SeqCst);

                self.inner.dispatch(Action::SendStart {
                    fingerprint: fp.clone(),
                    total_txs: ctx.txs.len(),
                });
            }

            (ctx, config, permitted)
        };

        if !permitted {
            warn!("send blocked by can-process guard");
            self.inner.fail(&run, Error::CantProcess);
            return Err(Error::CantProcess);
        }

        let inner = self.inner.clone();
        let progress_run = run.clone();
        let progress = move |sign_info: SignInfo| {
            inner.dispatch_for(
                &progress_run,
                Action::SendProgress {
                    fingerprint: progress_run.fingerprint.clone(),
                    sign_info,
                },
            );
        };

        debug!(
            "sending {} transaction(s) (retry: {})",
            ctx.txs.len(),
            opts.retry
        );

        let r = self
            .inner
            .collaborators
            .controller
            .send(&ctx, &config, opts, &progress)
            .await;

        match r {
            Ok(hashes) => {
                let applied = self.inner.settle_run(
                    &run,
                    Action::SendSuccess {
                        fingerprint: fp,
                        hashes: hashes.clone(),
                    },
                    Ok(hashes.clone()),
                );
                if !applied {
                    return Err(Error::Cancelled(CancelReason::Superseded));
                }

                info!("signing complete ({} transaction(s))", hashes.len());

                Ok(hashes)
            }
            Err(e) => {
                let e = Error::Send(format!("{e:#}"));
                warn!("{}", e);

                let applied = self.inner.settle_run(
                    &run,
                    Action::SendFailure {
                        fingerprint: fp,
                        error: FlowError::from(&e),
                    },
                    Err(e.clone()),
                );
                if !applied {
                    return Err(Error::Cancelled(CancelReason::Superseded));
                }

                Err(e)
            }
        }
    }
}

/// Await the pending result where one was started
async fn settle_result(rx: Option<ResultReceiver<Vec<TxHash>>>) -> Result<Vec<TxHash>, Error> {
    match rx {
        Some(rx) => settle(rx).await,
        None => Err(Error::Cancelled(CancelReason::UserCancelled)),
    }
}

impl Inner {
    fn runs(&self) -> MutexGuard<'_, RunTracker> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, action: Action) -> Arc<FlowState> {
        self.store.update(|s| reduce(s, action))
    }

    /// Dispatch an action only where `run` is current
    fn dispatch_for(&self, run: &RunContext, action: Action) -> bool {
        let runs = self.runs();

        if !runs.is_current(run) {
            debug!("discarding {} for stale run {}", action.name(), run.id);
            return false;
        }

        self.dispatch(action);

        true
    }

    /// Apply a terminal action and settle the pending result where `run` is current,
    /// the run is cleared once settled
    fn settle_run(
        &self,
        run: &RunContext,
        action: Action,
        outcome: Result<Vec<TxHash>, Error>,
    ) -> bool {
        let mut runs = self.runs();

        if !runs.is_current(run) {
            debug!("discarding {} for stale run {}", action.name(), run.id);
            return false;
        }

        self.dispatch(action);

        match outcome {
            Ok(hashes) => self.result.resolve(hashes),
            Err(e) => self.result.reject(e),
        };

        runs.clear();

        true
    }

    /// Apply a gas selection where `run` and `revision` are current and the
    /// session is still awaiting confirmation
    fn dispatch_gas(&self, run: &RunContext, revision: u64, action: Action) -> bool {
        let runs = self.runs();
        let status = self.store.get().status;

        if !runs.is_current(run)
            || self.gas_revision.load(Ordering::SeqCst) != revision
            || !matches!(status, Status::Ready | Status::UiOpen)
        {
            debug!(
                "discarding {} (revision {}, status {})",
                action.name(),
                revision,
                status
            );
            return false;
        }

        self.dispatch(action);

        true
    }

    /// Fail the session for `run` prior to sending
    fn fail(&self, run: &RunContext, e: Error) -> bool {
        self.settle_run(
            run,
            Action::SendFailure {
                fingerprint: run.fingerprint.clone(),
                error: FlowError::from(&e),
            },
            Err(e),
        )
    }

    /// Apply the automatic gasless upgrade where available
    fn apply_gasless_upgrade(&self, run: &RunContext) {
        let state = self.store.get();

        if let (Some(ctx), Some(config)) = (state.prepared_ctx(), &state.config) {
            if guard::gasless_upgrade_available(ctx, config) {
                debug!("switching {} to gasless", run.fingerprint);

                self.dispatch_for(
                    run,
                    Action::EnableGasless {
                        fingerprint: run.fingerprint.clone(),
                    },
                );
            }
        }
    }
}
