// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Send guards
//!
//! These are pure predicates over a [SignerCtx] and [SignatureConfig],
//! callers apply any resulting transition (eg. [Action::EnableGasless][super::Action::EnableGasless])
//! explicitly.

use crate::types::{GasMethod, SignatureConfig, SignerCtx, TxCalc, ETH_CHAIN_ID};

/// Fee limit for Ethereum mainnet (USD)
pub const ETH_GAS_FEE_LIMIT_USD: f64 = 15.0;

/// Fee limit for all other chains (USD)
pub const DEFAULT_GAS_FEE_LIMIT_USD: f64 = 5.0;

/// Fetch the direct-send fee limit for a chain
pub fn gas_fee_limit_usd(chain_id: u64) -> f64 {
    match chain_id {
        ETH_CHAIN_ID => ETH_GAS_FEE_LIMIT_USD,
        _ => DEFAULT_GAS_FEE_LIMIT_USD,
    }
}

/// Check whether the selected fee exceeds the chain limit,
/// an unknown cost is never considered too high
pub fn is_gas_fee_too_high(ctx: &SignerCtx) -> bool {
    match &ctx.selected_gas_cost {
        Some(c) => c.gas_cost_usd > gas_fee_limit_usd(ctx.chain_id),
        None => false,
    }
}

/// Compute whether sending may proceed for the provided context
///
/// Evaluated in order:
/// 1. when paying from the gas account, the gas account balance must cover the cost
/// 2. when the gasless promotion applies and is selected, sending is permitted
/// 3. otherwise calculations must be complete with no forbidden check errors
pub fn can_process(ctx: &SignerCtx, _config: &SignatureConfig) -> bool {
    if ctx.gas_method == GasMethod::GasAccount {
        return ctx
            .gas_account
            .as_ref()
            .map(|g| g.balance_is_enough)
            .unwrap_or(false);
    }

    if ctx.use_gasless && gasless_promotion(ctx) {
        return true;
    }

    !ctx.calcs_loading && !ctx.tx_calcs.iter().any(TxCalc::is_forbidden)
}

/// Check whether an automatic switch to the gasless method applies,
/// ie. the guard currently fails, the configuration permits automatic
/// switching and a promotion is available.
pub fn gasless_upgrade_available(ctx: &SignerCtx, config: &SignatureConfig) -> bool {
    config.auto_use_gasless
        && ctx.gas_method == GasMethod::Native
        && !ctx.use_gasless
        && gasless_promotion(ctx)
        && !can_process(ctx, config)
}

fn gasless_promotion(ctx: &SignerCtx) -> bool {
    ctx.gasless.as_ref().map(|g| g.is_gasless).unwrap_or(false)
}
