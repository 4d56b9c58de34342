// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use log::{debug, info, warn, LevelFilter};
use serde::Deserialize;

use sigflow::{
    types::{SignatureConfig, Tx},
    Collaborators, Error, SignatureRequest, SigningService, Status, TxHash, TypedDataItem,
    TypedDataRequest, TypedStatus,
};
use sigflow_sim::*;

/// Signature flow simulator
///
/// Drives a signing session from a JSON request file against the scripted
/// in-memory wallet backend, printing the resulting hashes.
#[derive(Clone, Debug, PartialEq, Parser)]
pub struct Args {
    /// JSON request file
    request: PathBuf,

    /// Signing mode
    #[clap(long, value_enum, default_value = "ui")]
    mode: Mode,

    /// Retry (resume) failed sessions once
    #[clap(long)]
    retry: bool,

    #[clap(flatten)]
    sim_opts: SimOptions,

    /// Log level
    #[clap(long, default_value = "debug")]
    log_level: LevelFilter,
}

#[derive(Copy, Clone, Debug, PartialEq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    /// Prefetch, open the confirmation UI then send
    Ui,
    /// Send without confirmation
    Direct,
    /// Sign typed-data items in order
    Typed,
}

/// Request file contents
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestFile {
    txs: Vec<Tx>,
    config: SignatureConfig,
    typed_data: Vec<TypedDataItem>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging
    let mut c = simplelog::ConfigBuilder::new();
    c.add_filter_allow_str("sigflow");

    let _ = simplelog::SimpleLogger::init(args.log_level, c.build());

    // Load request
    let s = std::fs::read_to_string(&args.request)?;
    let req: RequestFile = serde_json::from_str(&s)?;

    info!(
        "Running {} session for {} ({} tx(s), {} typed item(s))",
        args.mode,
        req.config.account.address,
        req.txs.len(),
        req.typed_data.len()
    );

    // Setup service against the simulated backend
    let sim = Arc::new(SimController::new(args.sim_opts.clone()));
    let service = SigningService::new(Collaborators::from_backend(sim.clone()));

    // Run session, closing on exit signal
    let r = tokio::select!(
        r = run(&service, &args, req) => r,
        _ = tokio::signal::ctrl_c() => {
            debug!("Exit!");
            service.close();
            Err(Error::Cancelled(sigflow::CancelReason::UserCancelled))
        },
    );

    match r {
        Ok(hashes) => {
            println!("{}", serde_json::to_string_pretty(&hashes)?);
        }
        Err(e) => {
            warn!("Session failed: {} ({})", e, e.code());
            return Err(e.into());
        }
    }

    debug!(
        "Calls: prepare {}, send {}, typed {}",
        sim.counters.prepare.load(std::sync::atomic::Ordering::SeqCst),
        sim.counters.send.load(std::sync::atomic::Ordering::SeqCst),
        sim.counters.typed_data.load(std::sync::atomic::Ordering::SeqCst),
    );

    Ok(())
}

async fn run(service: &SigningService, args: &Args, req: RequestFile) -> Result<Vec<TxHash>, Error> {
    match args.mode {
        Mode::Ui => run_ui(service, args.retry, req).await,
        Mode::Direct => {
            let r = SignatureRequest::new(req.txs, req.config);
            service.signature.open_direct(r).await
        }
        Mode::Typed => run_typed(service, args.retry, req).await,
    }
}

async fn run_ui(service: &SigningService, retry: bool, req: RequestFile) -> Result<Vec<TxHash>, Error> {
    let request = SignatureRequest::new(req.txs, req.config);
    let signature = service.signature.clone();

    let _sub = signature.subscribe(|s| debug!("State: {}", s.status));

    // Warm the context then open the UI
    signature.prefetch(request.clone()).await;

    let s = signature.clone();
    let pending = tokio::spawn(async move { s.open_ui(request).await });

    // Await the prepared UI
    let mut rx = signature.watch();
    loop {
        let ready = {
            let s = rx.borrow_and_update();
            match s.status {
                Status::UiOpen => s.prepared_ctx().is_some(),
                Status::Error | Status::PrefetchFailure | Status::Idle => true,
                _ => false,
            }
        };

        if ready || rx.changed().await.is_err() {
            break;
        }
    }

    info!("Confirming (can process: {})", signature.can_process());

    // Send failures also reject the pending result
    let retried = match signature.send().await {
        Err(e) if retry && !e.is_cancelled() => {
            info!("Retrying send ({})", e);
            Some(signature.retry().await)
        }
        _ => None,
    };

    let r = match pending.await {
        Ok(r) => r,
        Err(e) => Err(Error::InvalidState(e.to_string())),
    };

    retried.unwrap_or(r)
}

async fn run_typed(service: &SigningService, retry: bool, req: RequestFile) -> Result<Vec<TxHash>, Error> {
    let typed = service.typed_data.clone();
    let request = TypedDataRequest {
        account: req.config.account,
        items: req.typed_data,
    };

    let t = typed.clone();
    let pending = tokio::spawn(async move { t.start(request).await });

    // Watch for a paused session
    let mut rx = typed.watch();
    while rx.changed().await.is_ok() {
        let (status, progress) = {
            let s = rx.borrow_and_update();
            (s.status, s.progress)
        };

        debug!("Progress: {}/{} ({})", progress.current, progress.total, status);

        if status == TypedStatus::Error {
            if !retry {
                typed.close();
                break;
            }

            info!("Resuming from item {}", typed.resume_state().resume_index());
            if typed.retry().await.is_err() {
                typed.close();
            }
            break;
        }

        // Completed or cancelled
        if status == TypedStatus::Idle {
            break;
        }
    }

    match pending.await {
        Ok(r) => r,
        Err(e) => Err(Error::InvalidState(e.to_string())),
    }
}
