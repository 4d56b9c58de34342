// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Scripted in-memory wallet backend
//!
//! [SimController] implements every `sigflow` collaborator with
//! configurable latency, gas figures and failure injection, and exposes
//! [Gate]s so callers can hold individual operations in-flight to exercise
//! single-flight and stale-result handling.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use clap::Parser;
use log::debug;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use sigflow::{
    controller::{
        DeviceMonitor, PassphrasePrompt, PrepareOptions, ProgressFn, SendOptions,
        TypedDataSigner, WalletController,
    },
    types::{
        Account, CheckError, CheckLevel, GasAccountInfo, GasCost, GasLevel, GaslessInfo,
        SignInfo, SignItemStatus, SignStatus, SignatureConfig, SignerCtx, Tx, TxCalc,
    },
    TxHash, TypedDataItem,
};

/// Gas price for the default (`normal`) level, `gas_cost_usd` is quoted at this price
pub const DEFAULT_GAS_PRICE: u64 = 10_000_000_000;

/// Check error code attached to forbidden contexts
pub const FORBIDDEN_CHECK_CODE: u32 = 1001;

/// Simulator options
#[derive(Clone, Debug, PartialEq, Parser, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimOptions {
    /// Latency applied to each collaborator call (ms)
    #[clap(long, default_value = "0")]
    pub latency_ms: u64,

    /// Fee for the default gas level (USD)
    #[clap(long, default_value = "1.0")]
    pub gas_cost_usd: f64,

    /// Fee for the default gas level (native units)
    #[clap(long, default_value = "0.001")]
    pub gas_cost_amount: f64,

    /// Report a connected ledger device
    #[clap(long)]
    pub ledger_connected: bool,

    /// Offer the gasless promotion
    #[clap(long)]
    pub gasless: bool,

    /// Report a sufficient gas account balance
    #[clap(long)]
    pub gas_account_balance: bool,

    /// Attach a forbidden security check to prepared contexts
    #[clap(long)]
    pub forbidden: bool,

    /// Fail preparation
    #[clap(long)]
    pub fail_prepare: bool,

    /// Fail sending once at the provided transaction index
    #[clap(long)]
    pub fail_send_at: Option<usize>,

    /// Fail the nth typed-data signing call (once)
    #[clap(long)]
    pub fail_typed_call: Option<usize>,

    /// Dismiss passphrase prompts
    #[clap(long)]
    pub dismiss_passphrase: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            gas_cost_usd: 1.0,
            gas_cost_amount: 0.001,
            ledger_connected: false,
            gasless: false,
            gas_account_balance: false,
            forbidden: false,
            fail_prepare: false,
            fail_send_at: None,
            fail_typed_call: None,
            dismiss_passphrase: false,
        }
    }
}

/// Gate used to hold an operation in-flight
#[derive(Debug)]
pub struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self { open }
    }

    /// Hold subsequent (and waiting) operations
    pub fn hold(&self) {
        self.open.send_replace(false);
    }

    /// Release held operations
    pub fn release(&self) {
        self.open.send_replace(true);
    }

    async fn wait(&self) {
        let mut rx = self.open.subscribe();

        loop {
            let open = *rx.borrow_and_update();
            if open || rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Call counters
#[derive(Debug, Default)]
pub struct Counters {
    pub prepare: AtomicUsize,
    pub update_gas: AtomicUsize,
    pub send: AtomicUsize,
    pub typed_data: AtomicUsize,
    pub passphrase: AtomicUsize,
}

#[derive(Debug, Default)]
struct SimState {
    options: SimOptions,
    /// Transactions broadcast so far
    broadcast: HashSet<TxHash>,
    /// Every transaction signing attempt, in order
    sent: Vec<TxHash>,
    /// Every typed-data signing attempt, in order
    typed: Vec<serde_json::Value>,
    fail_typed_items: Vec<serde_json::Value>,
}

/// Scripted wallet backend
#[derive(Debug)]
pub struct SimController {
    state: Mutex<SimState>,

    pub prepare_gate: Gate,
    pub gas_gate: Gate,
    pub send_gate: Gate,
    pub typed_gate: Gate,

    pub counters: Counters,
}

impl SimController {
    /// Create a new simulated backend with the provided options
    pub fn new(options: SimOptions) -> Self {
        Self {
            state: Mutex::new(SimState {
                options,
                ..Default::default()
            }),
            prepare_gate: Gate::new(),
            gas_gate: Gate::new(),
            send_gate: Gate::new(),
            typed_gate: Gate::new(),
            counters: Counters::default(),
        }
    }

    /// Fetch the current options
    pub fn options(&self) -> SimOptions {
        self.state().options.clone()
    }

    /// Modify options in place
    pub fn configure(&self, f: impl FnOnce(&mut SimOptions)) {
        f(&mut self.state().options);
    }

    /// Fail the next signing attempt for the provided typed-data payload
    pub fn fail_typed_once(&self, data: serde_json::Value) {
        self.state().fail_typed_items.push(data);
    }

    /// Transaction signing attempts, in order
    pub fn sent(&self) -> Vec<TxHash> {
        self.state().sent.clone()
    }

    /// Typed-data signing attempts (payloads), in order
    pub fn typed(&self) -> Vec<serde_json::Value> {
        self.state().typed.clone()
    }

    /// Compute the simulated hash for a transaction
    pub fn tx_hash(tx: &Tx, index: usize) -> TxHash {
        let nonce = tx.nonce.unwrap_or(index as u64);
        let b = format!(
            "{}:{}:{}:{}:{}:{}",
            tx.chain_id,
            tx.from,
            tx.to.as_deref().unwrap_or_default(),
            tx.value.as_deref().unwrap_or_default(),
            tx.data.as_deref().unwrap_or_default(),
            nonce
        );

        digest(b.as_bytes())
    }

    /// Compute the simulated signature for a typed-data item
    pub fn typed_hash(account: &Account, item: &TypedDataItem) -> TxHash {
        let data = serde_json::to_string(&item.data).unwrap_or_default();
        let b = format!("{}:{}:{}", account.address, item.version, data);

        digest(b.as_bytes())
    }

    /// Compute the fee for a gas price
    fn gas_cost(&self, price: u64) -> GasCost {
        let o = &self.state().options;
        let scale = price as f64 / DEFAULT_GAS_PRICE as f64;

        GasCost {
            gas_cost_usd: o.gas_cost_usd * scale,
            gas_cost_amount: o.gas_cost_amount * scale,
        }
    }

    async fn delay(&self) {
        let latency = self.state().options.latency_ms;
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimController {
    fn default() -> Self {
        Self::new(SimOptions::default())
    }
}

fn digest(b: &[u8]) -> TxHash {
    format!("0x{}", hex::encode(Sha256::digest(b)))
}

#[async_trait]
impl WalletController for SimController {
    async fn prepare(
        &self,
        txs: &[Tx],
        config: &SignatureConfig,
        opts: PrepareOptions,
    ) -> anyhow::Result<SignerCtx> {
        self.counters.prepare.fetch_add(1, Ordering::SeqCst);
        debug!("sim: prepare {} tx(s) (direct: {})", txs.len(), opts.direct);

        self.prepare_gate.wait().await;
        self.delay().await;

        let o = self.options();
        if o.fail_prepare {
            return Err(anyhow!("simulated preparation failure"));
        }

        let check_errors = match o.forbidden {
            true => vec![CheckError {
                code: FORBIDDEN_CHECK_CODE,
                msg: "simulated forbidden interaction".to_string(),
                level: CheckLevel::Forbidden,
            }],
            false => vec![],
        };

        Ok(SignerCtx {
            txs: txs.to_vec(),
            chain_id: txs.first().map(|t| t.chain_id).unwrap_or_default(),
            selected_gas: Some(GasLevel {
                level: "normal".to_string(),
                price: DEFAULT_GAS_PRICE,
            }),
            selected_gas_cost: Some(self.gas_cost(DEFAULT_GAS_PRICE)),
            tx_calcs: txs
                .iter()
                .map(|_| TxCalc {
                    check_errors: check_errors.clone(),
                })
                .collect(),
            gas_account: config.enable_gas_account.then(|| GasAccountInfo {
                balance_is_enough: o.gas_account_balance,
            }),
            gasless: Some(GaslessInfo {
                is_gasless: o.gasless,
            }),
            ..Default::default()
        })
    }

    async fn update_gas(
        &self,
        ctx: &SignerCtx,
        gas: Option<&GasLevel>,
        account: &Account,
    ) -> anyhow::Result<SignerCtx> {
        self.counters.update_gas.fetch_add(1, Ordering::SeqCst);
        debug!("sim: update gas for {} ({:?})", account.address, gas);

        self.gas_gate.wait().await;
        self.delay().await;

        let mut ctx = ctx.clone();
        if let Some(g) = gas {
            ctx.selected_gas = Some(g.clone());
            ctx.selected_gas_cost = Some(self.gas_cost(g.price));
        }

        Ok(ctx)
    }

    async fn send(
        &self,
        ctx: &SignerCtx,
        _config: &SignatureConfig,
        opts: SendOptions,
        progress: ProgressFn<'_>,
    ) -> anyhow::Result<Vec<TxHash>> {
        self.counters.send.fetch_add(1, Ordering::SeqCst);
        debug!("sim: send {} tx(s) (retry: {})", ctx.txs.len(), opts.retry);

        self.send_gate.wait().await;

        let total = ctx.txs.len();
        let mut info = SignInfo::start(total);
        let mut hashes = Vec::with_capacity(total);

        for (i, tx) in ctx.txs.iter().enumerate() {
            let hash = Self::tx_hash(tx, i);

            // Already broadcast transactions are skipped on retry
            if opts.retry && self.state().broadcast.contains(&hash) {
                debug!("sim: skipping broadcast tx {}", i);
                info.items[i] = SignItemStatus::Signed;
                hashes.push(hash);
                continue;
            }

            info.current_tx_index = i;
            info.items[i] = SignItemStatus::Signing;
            progress(info.clone());

            self.delay().await;

            let fail = {
                let mut s = self.state();
                s.sent.push(hash.clone());

                match s.options.fail_send_at {
                    Some(n) if n == i => {
                        s.options.fail_send_at = None;
                        true
                    }
                    _ => {
                        s.broadcast.insert(hash.clone());
                        false
                    }
                }
            };

            if fail {
                info.items[i] = SignItemStatus::Failed;
                info.status = SignStatus::Failed;
                progress(info);

                return Err(anyhow!("simulated send failure at tx {}", i));
            }

            info.items[i] = SignItemStatus::Signed;
            progress(info.clone());

            hashes.push(hash);
        }

        Ok(hashes)
    }
}

#[async_trait]
impl TypedDataSigner for SimController {
    async fn sign_typed_data(&self, account: &Account, item: &TypedDataItem) -> anyhow::Result<TxHash> {
        let call = self.counters.typed_data.fetch_add(1, Ordering::SeqCst);
        debug!("sim: sign typed data ({})", item.version);

        self.typed_gate.wait().await;
        self.delay().await;

        let fail = {
            let mut s = self.state();
            s.typed.push(item.data.clone());

            let by_call = match s.options.fail_typed_call {
                Some(n) if n == call => {
                    s.options.fail_typed_call = None;
                    true
                }
                _ => false,
            };

            let by_item = match s.fail_typed_items.iter().position(|d| d == &item.data) {
                Some(i) => {
                    s.fail_typed_items.remove(i);
                    true
                }
                None => false,
            };

            by_call || by_item
        };

        match fail {
            true => Err(anyhow!("simulated typed-data failure")),
            false => Ok(Self::typed_hash(account, item)),
        }
    }
}

#[async_trait]
impl DeviceMonitor for SimController {
    async fn has_connected_ledger_device(&self) -> bool {
        self.delay().await;
        self.state().options.ledger_connected
    }
}

#[async_trait]
impl PassphrasePrompt for SimController {
    async fn request_passphrase(&self, account: &Account) -> anyhow::Result<()> {
        self.counters.passphrase.fetch_add(1, Ordering::SeqCst);
        debug!("sim: passphrase requested for {}", account.address);

        self.delay().await;

        match self.state().options.dismiss_passphrase {
            true => Err(anyhow!("passphrase entry dismissed")),
            false => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use sigflow::types::AccountKind;

    use super::*;

    fn tx(nonce: u64) -> Tx {
        Tx {
            chain_id: 1,
            from: "0x01".to_string(),
            to: Some("0x02".to_string()),
            nonce: Some(nonce),
            ..Default::default()
        }
    }

    #[test]
    fn options_from_json() {
        let o: SimOptions = serde_json::from_str(r#"{ "gasCostUsd": 20.0, "failSendAt": 1 }"#).unwrap();

        assert_eq!(o.gas_cost_usd, 20.0);
        assert_eq!(o.fail_send_at, Some(1));
        assert_eq!(o.gas_cost_amount, 0.001);
    }

    #[test]
    fn hashes_are_stable() {
        assert_eq!(SimController::tx_hash(&tx(1), 0), SimController::tx_hash(&tx(1), 5));
        assert_ne!(SimController::tx_hash(&tx(1), 0), SimController::tx_hash(&tx(2), 0));

        let a = Account {
            address: "0x01".to_string(),
            kind: AccountKind::Private,
        };
        let item = TypedDataItem {
            version: Default::default(),
            data: serde_json::json!({ "n": 1 }),
        };
        assert_eq!(SimController::typed_hash(&a, &item).len(), 66);
    }

    #[tokio::test]
    async fn send_fails_once_then_skips_broadcast() {
        let sim = SimController::new(SimOptions {
            fail_send_at: Some(1),
            ..Default::default()
        });
        let ctx = SignerCtx {
            txs: vec![tx(1), tx(2)],
            ..Default::default()
        };
        let progress = |_: SignInfo| ();

        let r = sim.send(&ctx, &Default::default(), SendOptions::default(), &progress).await;
        assert!(r.is_err());

        let r = sim
            .send(&ctx, &Default::default(), SendOptions { retry: true }, &progress)
            .await
            .unwrap();
        assert_eq!(r.len(), 2);

        // First tx is not re-signed on retry
        let sent = sim.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1], sent[2]);
    }

    #[tokio::test]
    async fn gas_cost_scales_with_price() {
        let sim = SimController::new(SimOptions {
            gas_cost_usd: 2.0,
            ..Default::default()
        });

        let gas = GasLevel {
            level: "fast".to_string(),
            price: DEFAULT_GAS_PRICE * 3,
        };
        let ctx = sim
            .update_gas(&SignerCtx::default(), Some(&gas), &Account::default())
            .await
            .unwrap();

        assert_eq!(ctx.selected_gas_cost.map(|c| c.gas_cost_usd), Some(6.0));
    }
}
