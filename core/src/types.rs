// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Signing data model
//!
//! Contexts are produced by the wallet controller and carried through the
//! [engine][crate::engine] as typed values, the engine only inspects the
//! fields required for its own guards.

use alloc::{string::String, vec::Vec};

use strum::{Display, EnumString};

use crate::engine::guard;

/// Transaction hash (or typed-data signature) returned on completion
pub type TxHash = String;

/// Chain id for Ethereum mainnet, used to select fee limits
pub const ETH_CHAIN_ID: u64 = 1;

/// Transaction-like signing input
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Tx {
    /// EVM chain id
    pub chain_id: u64,
    /// Sender address
    pub from: String,
    /// Destination address, `None` for contract creation
    pub to: Option<String>,
    /// Hex encoded value
    pub value: Option<String>,
    /// Hex encoded call data
    pub data: Option<String>,
    /// Hex encoded gas limit
    pub gas: Option<String>,
    pub nonce: Option<u64>,
}

impl Tx {
    /// Length of the call payload in hex characters, excluding any `0x` prefix
    pub fn payload_len(&self) -> usize {
        self.data.as_deref().map(strip_hex_prefix).map(str::len).unwrap_or(0)
    }
}

/// Strip an optional `0x` / `0X` prefix from a hex string
pub(crate) fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Keyring backing an account
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case")]
pub enum AccountKind {
    /// Imported private key
    #[default]
    Private,
    /// HD keyring derived from a mnemonic (may carry a passphrase)
    Mnemonic,
    /// Ledger hardware wallet
    Ledger,
    /// Keystone QR wallet
    Keystone,
    /// Watch-only address
    WatchAddress,
}

impl AccountKind {
    /// Accounts requiring a connected USB device to sign
    pub fn is_hardware(&self) -> bool {
        matches!(self, AccountKind::Ledger)
    }

    /// Accounts requiring an interactive passphrase / derivation step
    pub fn requires_passphrase(&self) -> bool {
        matches!(self, AccountKind::Mnemonic)
    }
}

/// Signing account
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Account {
    pub address: String,
    pub kind: AccountKind,
}

/// Session configuration supplied by the caller
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct SignatureConfig {
    /// Account used for signing
    pub account: Account,
    /// Permit switching to the gasless method when the guard would otherwise fail
    pub auto_use_gasless: bool,
    /// Permit paying fees from the gas account balance
    pub enable_gas_account: bool,
    /// Originating surface, for analytics
    pub source: Option<String>,
}

impl SignatureConfig {
    /// Merge a partial configuration onto this one
    pub fn apply(&mut self, patch: ConfigPatch) {
        if let Some(v) = patch.account {
            self.account = v;
        }
        if let Some(v) = patch.auto_use_gasless {
            self.auto_use_gasless = v;
        }
        if let Some(v) = patch.enable_gas_account {
            self.enable_gas_account = v;
        }
        if let Some(v) = patch.source {
            self.source = Some(v);
        }
    }
}

/// Partial [SignatureConfig] update
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct ConfigPatch {
    pub account: Option<Account>,
    pub auto_use_gasless: Option<bool>,
    pub enable_gas_account: Option<bool>,
    pub source: Option<String>,
}

/// Selected gas price level
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GasLevel {
    /// Level name (`slow`, `normal`, `fast`, `custom`)
    pub level: String,
    /// Price in wei
    pub price: u64,
}

/// Cost of the selected gas level
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct GasCost {
    pub gas_cost_usd: f64,
    pub gas_cost_amount: f64,
}

/// Severity of a pre-execution check
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case")]
pub enum CheckLevel {
    Warning,
    Danger,
    /// Blocks sending outright
    Forbidden,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CheckError {
    pub code: u32,
    pub msg: String,
    pub level: CheckLevel,
}

/// Per-transaction calculation result
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TxCalc {
    pub check_errors: Vec<CheckError>,
}

impl TxCalc {
    pub fn is_forbidden(&self) -> bool {
        self.check_errors
            .iter()
            .any(|e| e.level == CheckLevel::Forbidden)
    }
}

/// Security engine verdict, carried opaquely
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineResult {
    pub id: String,
    pub level: String,
}

/// Fee payment method
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[strum(serialize_all = "camelCase")]
pub enum GasMethod {
    /// Paid from the account native balance
    #[default]
    Native,
    /// Paid from the secondary gas account balance
    GasAccount,
}

#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct GasAccountInfo {
    pub balance_is_enough: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct GaslessInfo {
    /// Gasless promotion available for this batch
    pub is_gasless: bool,
}

/// Overall send progress status
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case")]
pub enum SignStatus {
    #[default]
    Signing,
    Success,
    Failed,
}

/// Per-transaction send status
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case")]
pub enum SignItemStatus {
    #[default]
    Pending,
    Signing,
    Signed,
    Failed,
}

/// In-flight send progress
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SignInfo {
    pub current_tx_index: usize,
    pub total_txs: usize,
    pub status: SignStatus,
    pub items: Vec<SignItemStatus>,
}

impl SignInfo {
    /// Initial progress for a batch of `total_txs`
    pub fn start(total_txs: usize) -> Self {
        Self {
            current_tx_index: 0,
            total_txs,
            status: SignStatus::Signing,
            items: alloc::vec![SignItemStatus::Pending; total_txs],
        }
    }
}

/// Prepared signing session context
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct SignerCtx {
    /// Source transactions
    pub txs: Vec<Tx>,
    pub chain_id: u64,

    /// Placeholder published before preparation completes
    pub skeleton: bool,

    pub selected_gas: Option<GasLevel>,
    pub selected_gas_cost: Option<GasCost>,

    pub tx_calcs: Vec<TxCalc>,
    /// Calculations still pending
    pub calcs_loading: bool,

    pub engine_results: Vec<EngineResult>,

    pub gas_method: GasMethod,
    pub gas_account: Option<GasAccountInfo>,
    pub gasless: Option<GaslessInfo>,
    pub use_gasless: bool,

    /// Derived: send button disabled
    pub disabled_process: bool,
    /// Derived: selected fee exceeds the chain limit
    pub gas_fee_too_high: bool,

    pub sign_info: Option<SignInfo>,
}

impl SignerCtx {
    /// Build an inert placeholder context for the provided batch
    pub fn skeleton(txs: &[Tx]) -> Self {
        Self {
            txs: txs.to_vec(),
            chain_id: txs.first().map(|t| t.chain_id).unwrap_or_default(),
            skeleton: true,
            calcs_loading: true,
            disabled_process: true,
            ..Default::default()
        }
    }

    /// Recompute derived flags against the provided configuration
    pub fn refresh_flags(&mut self, config: &SignatureConfig) {
        self.disabled_process = !guard::can_process(self, config);
        self.gas_fee_too_high = guard::is_gas_fee_too_high(self);
    }

    /// Merge a resolved context onto this skeleton
    pub fn resolve(&self, mut resolved: SignerCtx) -> SignerCtx {
        if resolved.txs.is_empty() {
            resolved.txs = self.txs.clone();
        }
        if resolved.chain_id == 0 {
            resolved.chain_id = self.chain_id;
        }
        resolved.skeleton = false;
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_len_strips_prefix() {
        let mut tx = Tx::default();
        assert_eq!(tx.payload_len(), 0);

        tx.data = Some("0x".into());
        assert_eq!(tx.payload_len(), 0);

        tx.data = Some("0xa9059cbb".into());
        assert_eq!(tx.payload_len(), 8);

        tx.data = Some("a9059cbb".into());
        assert_eq!(tx.payload_len(), 8);
    }

    #[test]
    fn config_patch_merges_set_fields() {
        let mut c = SignatureConfig {
            source: Some("popup".into()),
            ..Default::default()
        };

        c.apply(ConfigPatch {
            auto_use_gasless: Some(true),
            ..Default::default()
        });

        assert!(c.auto_use_gasless);
        assert!(!c.enable_gas_account);
        assert_eq!(c.source.as_deref(), Some("popup"));
    }

    #[test]
    fn skeleton_is_inert() {
        let txs = [Tx {
            chain_id: 56,
            ..Default::default()
        }];
        let s = SignerCtx::skeleton(&txs);

        assert!(s.skeleton);
        assert!(s.calcs_loading);
        assert!(s.disabled_process);
        assert_eq!(s.chain_id, 56);

        let r = s.resolve(SignerCtx::default());
        assert!(!r.skeleton);
        assert_eq!(r.txs, txs.to_vec());
        assert_eq!(r.chain_id, 56);
    }
}
