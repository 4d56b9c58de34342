use std::sync::atomic::Ordering;

use sigflow::{
    types::{AccountKind, GasLevel},
    CancelReason, Error, SignatureManager, Status,
};
use sigflow_sim::{SimOptions, DEFAULT_GAS_PRICE};

mod helpers;
use helpers::*;

fn level(name: &str, price: u64) -> GasLevel {
    GasLevel {
        level: name.to_string(),
        price,
    }
}

fn selected(s: &SignatureManager) -> (Option<String>, Option<f64>) {
    let state = s.get_state();
    let ctx = state.prepared_ctx().expect("missing context");

    (
        ctx.selected_gas.as_ref().map(|g| g.level.clone()),
        ctx.selected_gas_cost.as_ref().map(|c| c.gas_cost_usd),
    )
}

#[tokio::test]
async fn gas_update_is_optimistic() {
    let (sim, service) = setup(SimOptions {
        gas_cost_usd: 2.0,
        ..Default::default()
    });
    let s = service.signature;

    s.prefetch(request(1, 1, AccountKind::Private)).await;
    assert_eq!(selected(&s), (Some("normal".to_string()), Some(2.0)));

    sim.gas_gate.hold();

    let p = s.clone();
    let update = tokio::spawn(async move { p.update_gas(level("fast", DEFAULT_GAS_PRICE * 2)).await });

    // Selection applied prior to reconciliation
    wait_until(|| sim.counters.update_gas.load(Ordering::SeqCst) == 1).await;
    assert_eq!(selected(&s), (Some("fast".to_string()), Some(2.0)));

    sim.gas_gate.release();
    update.await.unwrap().unwrap();

    // Reconciled cost applied
    assert_eq!(selected(&s), (Some("fast".to_string()), Some(4.0)));
    assert_eq!(s.get_state().status, Status::Ready);
}

#[tokio::test]
async fn superseded_gas_updates_are_discarded() {
    let (sim, service) = setup(SimOptions {
        gas_cost_usd: 2.0,
        ..Default::default()
    });
    let s = service.signature;

    s.prefetch(request(1, 1, AccountKind::Private)).await;

    sim.gas_gate.hold();

    let p = s.clone();
    let first = tokio::spawn(async move { p.update_gas(level("fast", DEFAULT_GAS_PRICE * 3)).await });
    wait_until(|| sim.counters.update_gas.load(Ordering::SeqCst) == 1).await;

    let p = s.clone();
    let second = tokio::spawn(async move { p.update_gas(level("slow", DEFAULT_GAS_PRICE / 2)).await });
    wait_until(|| sim.counters.update_gas.load(Ordering::SeqCst) == 2).await;

    assert_eq!(selected(&s).0, Some("slow".to_string()));

    sim.gas_gate.release();
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // Only the latest selection is reconciled
    assert_eq!(selected(&s), (Some("slow".to_string()), Some(1.0)));
}

#[tokio::test]
async fn gas_update_after_reset_is_discarded() {
    let (sim, service) = setup(SimOptions::default());
    let s = service.signature;

    s.prefetch(request(1, 1, AccountKind::Private)).await;

    sim.gas_gate.hold();

    let p = s.clone();
    let update = tokio::spawn(async move { p.update_gas(level("fast", DEFAULT_GAS_PRICE * 2)).await });
    wait_until(|| sim.counters.update_gas.load(Ordering::SeqCst) == 1).await;

    s.reset();
    sim.gas_gate.release();
    update.await.unwrap().unwrap();

    let state = s.get_state();
    assert_eq!(state.status, Status::Idle);
    assert_eq!(state.ctx, None);
}

#[tokio::test]
async fn toggle_gasless() {
    let (_sim, service) = setup(SimOptions {
        gasless: true,
        ..Default::default()
    });
    let s = service.signature;

    s.prefetch(request(1, 1, AccountKind::Private)).await;
    let use_gasless = |s: &SignatureManager| s.get_state().prepared_ctx().unwrap().use_gasless;

    assert!(!use_gasless(&s));

    s.toggle_gasless(None).await.unwrap();
    assert!(use_gasless(&s));

    s.toggle_gasless(Some(true)).await.unwrap();
    assert!(use_gasless(&s));

    s.toggle_gasless(None).await.unwrap();
    assert!(!use_gasless(&s));
}

#[tokio::test]
async fn gas_requires_prepared_session() {
    let (sim, service) = setup(SimOptions::default());
    let s = service.signature;

    let r = s.update_gas(level("fast", DEFAULT_GAS_PRICE)).await;
    assert_eq!(r, Err(Error::MissingContext));

    // Not permitted while preparing
    sim.prepare_gate.hold();

    let p = s.clone();
    let pending = tokio::spawn(async move { p.open_ui(request(1, 1, AccountKind::Private)).await });
    wait_for(s.watch(), |s| s.status == Status::UiOpen).await;

    let r = s.update_gas(level("fast", DEFAULT_GAS_PRICE)).await;
    assert_eq!(r, Err(Error::MissingContext));

    s.close();
    sim.prepare_gate.release();

    assert_eq!(
        pending.await.unwrap(),
        Err(Error::Cancelled(CancelReason::UserCancelled))
    );
    assert_eq!(sim.counters.update_gas.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn gas_update_superseded_by_send() {
    let (sim, service) = setup(SimOptions::default());
    let s = service.signature;
    let req = request(1, 2, AccountKind::Private);

    s.prefetch(req.clone()).await;

    sim.gas_gate.hold();

    let p = s.clone();
    let update = tokio::spawn(async move { p.update_gas(level("fast", DEFAULT_GAS_PRICE * 2)).await });
    wait_until(|| sim.counters.update_gas.load(Ordering::SeqCst) == 1).await;

    sim.send_gate.hold();

    let p = s.clone();
    let sending = tokio::spawn(async move { p.send().await });
    wait_for(s.watch(), |s| s.status == Status::Signing).await;

    // Late reconciliation must not replace the signing context
    sim.gas_gate.release();
    update.await.unwrap().unwrap();

    let state = s.get_state();
    assert_eq!(state.status, Status::Signing);
    let info = state.ctx.as_ref().and_then(|c| c.sign_info.as_ref());
    assert_eq!(info.map(|i| i.total_txs), Some(2));

    // Selection reflects what was sent
    assert_eq!(selected(&s), (Some("fast".to_string()), Some(1.0)));

    sim.send_gate.release();
    assert!(sending.await.unwrap().is_ok());

    let state = s.get_state();
    assert_eq!(state.status, Status::Completed);
    assert_eq!(selected(&s), (Some("fast".to_string()), Some(1.0)));
}
