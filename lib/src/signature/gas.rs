// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Gas selection for prepared sessions
//!
//! Selection changes are applied to state immediately (prior to the first
//! await point) then reconciled against the controller. Reconciliation
//! results are applied only where the run is still current, no newer
//! selection has been made and sending has not started.

use std::sync::atomic::Ordering;

use log::{debug, warn};

use sigflow_core::{
    engine::{Action, Status},
    types::{GasLevel, GasMethod, SignerCtx},
};

use super::SignatureManager;
use crate::Error;

impl SignatureManager {
    /// Select a gas level
    pub async fn update_gas(&self, gas: GasLevel) -> Result<(), Error> {
        debug!("selecting gas level: {} ({})", gas.level, gas.price);

        self.reconcile_gas(move |ctx| ctx.selected_gas = Some(gas))
            .await
    }

    /// Select how gas is paid for
    pub async fn set_gas_method(&self, method: GasMethod) -> Result<(), Error> {
        debug!("selecting gas method: {}", method);

        self.reconcile_gas(move |ctx| ctx.gas_method = method).await
    }

    /// Enable or disable gasless sending, toggling where `enabled` is not provided
    pub async fn toggle_gasless(&self, enabled: Option<bool>) -> Result<(), Error> {
        self.reconcile_gas(move |ctx| ctx.use_gasless = enabled.unwrap_or(!ctx.use_gasless))
            .await
    }

    async fn reconcile_gas<F>(&self, apply: F) -> Result<(), Error>
    where
        F: FnOnce(&mut SignerCtx) + Send,
    {
        let state = self.inner.store.get();

        let (fp, ctx, config) = match (&state.fingerprint, state.prepared_ctx(), &state.config) {
            (Some(fp), Some(ctx), Some(config)) => (fp.clone(), ctx, config.clone()),
            _ => return Err(Error::MissingContext),
        };

        if !matches!(state.status, Status::Ready | Status::UiOpen) {
            return Err(Error::InvalidState(state.status.to_string()));
        }

        let mut next = SignerCtx::clone(ctx);
        apply(&mut next);
        next.refresh_flags(&config);

        let revision = self.inner.gas_revision.fetch_add(1, Ordering::SeqCst) + 1;
        let run = self.inner.runs().mark_run(&fp, None);

        // Optimistic update
        let applied = self.inner.dispatch_gas(
            &run,
            revision,
            Action::UpdateCtx {
                fingerprint: fp.clone(),
                ctx: next.clone(),
            },
        );
        if !applied {
            return Ok(());
        }

        let r = self
            .inner
            .collaborators
            .controller
            .update_gas(&next, next.selected_gas.as_ref(), &config.account)
            .await;

        if self.inner.gas_revision.load(Ordering::SeqCst) != revision {
            debug!("discarding superseded gas update (revision {})", revision);
            return Ok(());
        }

        match r {
            Ok(mut ctx) => {
                ctx.skeleton = false;
                ctx.refresh_flags(&config);

                // Re-checked under the run lock, a send may have started since
                self.inner.dispatch_gas(
                    &run,
                    revision,
                    Action::UpdateCtx {
                        fingerprint: fp,
                        ctx,
                    },
                );

                Ok(())
            }
            Err(e) => {
                warn!("gas update failed: {:#}", e);
                Err(Error::from(e))
            }
        }
    }
}
