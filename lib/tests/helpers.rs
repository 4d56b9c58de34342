#![allow(unused)]

use std::{str::FromStr, sync::Arc, time::Duration};

use log::LevelFilter;
use simplelog::SimpleLogger;
use tokio::sync::watch;

use sigflow::{
    types::{Account, AccountKind, SignatureConfig, Tx},
    Collaborators, SignatureRequest, SigningService, TypedDataItem, TypedDataRequest,
};
use sigflow_sim::{SimController, SimOptions};

/// Timeout for awaited state transitions
pub const TIMEOUT: Duration = Duration::from_secs(5);

// Setup logging, simulated backend and service
pub fn setup(opts: SimOptions) -> (Arc<SimController>, SigningService) {
    // Setup logging
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("sigflow")
        .build();

    let _ = SimpleLogger::init(log_level, log_cfg);

    let sim = Arc::new(SimController::new(opts));
    let service = SigningService::new(Collaborators::from_backend(sim.clone()));

    (sim, service)
}

pub fn account(kind: AccountKind) -> Account {
    Account {
        address: "0x5853ed4f26a3fcea565b3fbc698bb19cdf6deb85".to_string(),
        kind,
    }
}

pub fn tx(chain_id: u64, nonce: u64) -> Tx {
    Tx {
        chain_id,
        from: account(AccountKind::Private).address,
        to: Some("0xdac17f958d2ee523a2206206994597c13d831ec7".to_string()),
        value: Some("0x0".to_string()),
        data: Some(format!("0xa9059cbb{nonce:064x}")),
        gas: None,
        nonce: Some(nonce),
    }
}

/// Request for `n` transactions on `chain_id`
pub fn request(chain_id: u64, n: u64, kind: AccountKind) -> SignatureRequest {
    SignatureRequest::new(
        (0..n).map(|i| tx(chain_id, i)).collect(),
        SignatureConfig {
            account: account(kind),
            ..Default::default()
        },
    )
}

pub fn typed_item(name: &str) -> TypedDataItem {
    TypedDataItem {
        version: Default::default(),
        data: serde_json::json!({
            "primaryType": "Permit",
            "message": { "name": name },
        }),
    }
}

pub fn typed_request(kind: AccountKind, names: &[&str]) -> TypedDataRequest {
    TypedDataRequest {
        account: account(kind),
        items: names.iter().map(|n| typed_item(n)).collect(),
    }
}

/// Await a state matching `f`
pub async fn wait_for<S, F>(mut rx: watch::Receiver<Arc<S>>, f: F) -> Arc<S>
where
    F: Fn(&S) -> bool,
{
    let r = tokio::time::timeout(TIMEOUT, async {
        loop {
            let s = rx.borrow_and_update().clone();
            if f(&s) {
                return s;
            }

            if rx.changed().await.is_err() {
                panic!("State store closed");
            }
        }
    })
    .await;

    r.expect("Timeout awaiting state")
}

/// Await a condition polled from outside the store
pub async fn wait_until<F: Fn() -> bool>(f: F) {
    let r = tokio::time::timeout(TIMEOUT, async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    r.expect("Timeout awaiting condition")
}

/// Allow spawned continuations to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
