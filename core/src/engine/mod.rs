// Copyright (c) 2022-2023 The MobileCoin Foundation

//! The signing flow engine.
//!
//! This handles [Action] inputs via [reduce], returning the next [FlowState].
//! The reducer is pure, async drivers are responsible for checking the
//! [run tracker][crate::run] before dispatching results.

use alloc::{sync::Arc, vec::Vec};

use strum::{Display, EnumIter, EnumString, EnumVariantNames};

use crate::types::{SignInfo, SignStatus, SignatureConfig, SignerCtx, TxHash};

mod action;
pub use action::Action;

mod error;
pub use error::{ErrorCode, FlowError};

pub mod guard;

/// Signing flow status
#[derive(
    Copy, Clone, PartialEq, Eq, Debug, Default, EnumString, Display, EnumVariantNames, EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    /// No session running
    #[default]
    Idle,
    /// Preparing the signing context
    Prefetching,
    /// Preparation failed
    PrefetchFailure,
    /// Context prepared
    Ready,
    /// Confirmation UI open
    #[cfg_attr(feature = "serde", serde(rename = "ui-open"))]
    #[strum(serialize = "ui-open")]
    UiOpen,
    /// Sending transactions
    Signing,
    /// All transactions sent
    Completed,
    /// Send / UI failure
    Error,
}

impl Status {
    /// Session-ending states, left only via [Action::Reset] or a new request
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Completed | Status::Error | Status::PrefetchFailure
        )
    }
}

/// Signing flow state, the single source of truth exposed to observers
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlowState {
    pub status: Status,
    pub fingerprint: Option<alloc::string::String>,
    pub config: Option<SignatureConfig>,
    /// Read-only snapshot of the session context
    pub ctx: Option<Arc<SignerCtx>>,
    pub error: Option<FlowError>,
    pub hashes: Vec<TxHash>,
}

impl FlowState {
    /// Check whether this state belongs to the provided fingerprint
    pub fn is_for(&self, fingerprint: &str) -> bool {
        self.fingerprint.as_deref() == Some(fingerprint)
    }

    /// Fetch the prepared (non-skeleton) context, if any
    pub fn prepared_ctx(&self) -> Option<&Arc<SignerCtx>> {
        self.ctx.as_ref().filter(|c| !c.skeleton)
    }
}

/// Apply an [Action] to the current state
///
/// Actions guarded by a fingerprint that does not match the current state
/// return the same [Arc] (no-op), callers may use [Arc::ptr_eq] to detect this.
pub fn reduce(state: &Arc<FlowState>, action: Action) -> Arc<FlowState> {
    #[cfg(feature = "log")]
    log::trace!("action: {} (status: {})", action.name(), state.status);

    // Fingerprint agnostic actions
    let action = match action {
        Action::Reset => return Arc::new(FlowState::default()),
        Action::SetConfig(patch) => {
            let mut next = FlowState::clone(state);
            next.config.get_or_insert_with(Default::default).apply(patch);
            return Arc::new(next);
        }
        Action::PrefetchStart {
            fingerprint,
            config,
            ctx,
        } => {
            return Arc::new(FlowState {
                status: Status::Prefetching,
                fingerprint: Some(fingerprint),
                config: Some(config),
                ctx: Some(Arc::new(ctx)),
                error: None,
                hashes: Vec::new(),
            })
        }
        a => a,
    };

    // Discard stale actions
    match action.fingerprint() {
        Some(f) if state.is_for(f) => (),
        _ => {
            #[cfg(feature = "log")]
            log::debug!("ignoring stale action: {}", action.name());

            return Arc::clone(state);
        }
    }

    let mut next = FlowState::clone(state);

    match action {
        Action::PrefetchSuccess { ctx, .. } => {
            let resolved = match &next.ctx {
                Some(skeleton) => skeleton.resolve(ctx),
                None => SignerCtx {
                    skeleton: false,
                    ..ctx
                },
            };

            next.status = Status::Ready;
            next.ctx = Some(Arc::new(resolved));
            next.error = None;
        }
        Action::PrefetchFailure { error, .. } => {
            next.status = Status::PrefetchFailure;
            next.error = Some(error);
        }
        Action::OpenUiSkeleton { ctx, .. } | Action::OpenUiSuccess { ctx, .. } => {
            next.status = Status::UiOpen;
            next.ctx = Some(Arc::new(ctx));
        }
        Action::OpenUiFailure { error, .. } => {
            next.status = Status::Error;
            next.error = Some(error);
        }
        Action::UpdateCtx { ctx, .. } => {
            next.ctx = Some(Arc::new(ctx));
        }
        Action::EnableGasless { .. } => {
            if let Some(ctx) = next.ctx.as_mut() {
                let ctx = Arc::make_mut(ctx);
                ctx.use_gasless = true;
                if let Some(config) = &next.config {
                    ctx.refresh_flags(config);
                }
            }
        }
        Action::SendStart { total_txs, .. } => {
            if let Some(ctx) = next.ctx.as_mut() {
                Arc::make_mut(ctx).sign_info = Some(SignInfo::start(total_txs));
            }

            next.status = Status::Signing;
            next.hashes.clear();
            next.error = None;
        }
        Action::SendProgress { sign_info, .. } => {
            if let Some(ctx) = next.ctx.as_mut() {
                Arc::make_mut(ctx).sign_info = Some(sign_info);
            }
        }
        Action::SendSuccess { hashes, .. } => {
            set_sign_status(&mut next, SignStatus::Success);

            next.status = Status::Completed;
            next.hashes = hashes;
        }
        Action::SendFailure { error, .. } => {
            set_sign_status(&mut next, SignStatus::Failed);

            next.status = Status::Error;
            next.error = Some(error);
        }
        // Handled above
        Action::Reset | Action::SetConfig(_) | Action::PrefetchStart { .. } => unreachable!(),
    }

    Arc::new(next)
}

fn set_sign_status(state: &mut FlowState, status: SignStatus) {
    if let Some(info) = state
        .ctx
        .as_mut()
        .and_then(|c| Arc::make_mut(c).sign_info.as_mut())
    {
        info.status = status;
    }
}

#[cfg(test)]
mod tests {
    use alloc::{string::String, vec};

    use strum::IntoEnumIterator;

    use super::*;
    use crate::types::{ConfigPatch, GaslessInfo, TxCalc};

    const FP: &str = "1|0xabc|0x0|0";

    fn fp() -> String {
        FP.into()
    }

    fn err(code: ErrorCode) -> FlowError {
        FlowError::new(code, "test")
    }

    fn prefetching() -> Arc<FlowState> {
        reduce(
            &Arc::new(FlowState::default()),
            Action::PrefetchStart {
                fingerprint: fp(),
                config: SignatureConfig::default(),
                ctx: SignerCtx::skeleton(&[]),
            },
        )
    }

    fn prepared() -> SignerCtx {
        SignerCtx {
            chain_id: 1,
            tx_calcs: vec![TxCalc::default()],
            ..Default::default()
        }
    }

    /// Every fingerprint guarded action for the provided fingerprint
    fn guarded(fingerprint: &str) -> Vec<Action> {
        let f = || String::from(fingerprint);

        vec![
            Action::PrefetchSuccess {
                fingerprint: f(),
                ctx: prepared(),
            },
            Action::PrefetchFailure {
                fingerprint: f(),
                error: err(ErrorCode::PrefetchFailure),
            },
            Action::OpenUiSkeleton {
                fingerprint: f(),
                ctx: SignerCtx::skeleton(&[]),
            },
            Action::OpenUiSuccess {
                fingerprint: f(),
                ctx: prepared(),
            },
            Action::OpenUiFailure {
                fingerprint: f(),
                error: err(ErrorCode::OpenUiFailure),
            },
            Action::UpdateCtx {
                fingerprint: f(),
                ctx: prepared(),
            },
            Action::EnableGasless { fingerprint: f() },
            Action::SendStart {
                fingerprint: f(),
                total_txs: 2,
            },
            Action::SendProgress {
                fingerprint: f(),
                sign_info: SignInfo::start(2),
            },
            Action::SendSuccess {
                fingerprint: f(),
                hashes: vec!["0x01".into()],
            },
            Action::SendFailure {
                fingerprint: f(),
                error: err(ErrorCode::SendFailure),
            },
        ]
    }

    #[test]
    fn stale_actions_are_noops() {
        let s = prefetching();

        for a in guarded("56|0xdef|0x0|0") {
            let name = a.name();
            let n = reduce(&s, a);
            assert!(Arc::ptr_eq(&n, &s), "{name} applied with stale fingerprint");
        }

        // Idle state has no fingerprint, nothing guarded applies
        let idle = Arc::new(FlowState::default());
        for a in guarded(FP) {
            let n = reduce(&idle, a);
            assert!(Arc::ptr_eq(&n, &idle));
        }
    }

    #[test]
    fn matching_actions_apply() {
        let s = prefetching();

        for a in guarded(FP) {
            let name = a.name();
            let n = reduce(&s, a);
            assert!(!Arc::ptr_eq(&n, &s), "{name} not applied");
        }
    }

    #[test]
    fn reset_from_any_state() {
        let s = prefetching();
        let states = [
            s.clone(),
            reduce(&s, guarded(FP).remove(0)),
            reduce(&s, guarded(FP).remove(1)),
            reduce(&s, guarded(FP).remove(9)),
            reduce(&s, guarded(FP).remove(10)),
        ];

        for s in states {
            let n = reduce(&s, Action::Reset);
            assert_eq!(*n, FlowState::default());
            assert_eq!(n.status, Status::Idle);
        }
    }

    #[test]
    fn set_config_ignores_fingerprint() {
        let idle = Arc::new(FlowState::default());

        let n = reduce(
            &idle,
            Action::SetConfig(ConfigPatch {
                auto_use_gasless: Some(true),
                ..Default::default()
            }),
        );

        assert_eq!(n.status, Status::Idle);
        assert!(n.config.as_ref().unwrap().auto_use_gasless);
    }

    #[test]
    fn send_lifecycle() {
        let s = prefetching();
        assert_eq!(s.status, Status::Prefetching);
        assert!(s.ctx.as_ref().unwrap().skeleton);
        assert!(s.prepared_ctx().is_none());

        let s = reduce(
            &s,
            Action::PrefetchSuccess {
                fingerprint: fp(),
                ctx: prepared(),
            },
        );
        assert_eq!(s.status, Status::Ready);
        assert!(s.prepared_ctx().is_some());

        let s = reduce(
            &s,
            Action::SendStart {
                fingerprint: fp(),
                total_txs: 2,
            },
        );
        assert_eq!(s.status, Status::Signing);
        assert_eq!(
            s.ctx.as_ref().unwrap().sign_info,
            Some(SignInfo::start(2)),
            "sign info seeded"
        );

        let mut info = SignInfo::start(2);
        info.current_tx_index = 1;
        let s = reduce(
            &s,
            Action::SendProgress {
                fingerprint: fp(),
                sign_info: info.clone(),
            },
        );
        assert_eq!(s.status, Status::Signing);
        assert_eq!(s.ctx.as_ref().unwrap().sign_info, Some(info));

        let s = reduce(
            &s,
            Action::SendSuccess {
                fingerprint: fp(),
                hashes: vec!["0x01".into(), "0x02".into()],
            },
        );
        assert_eq!(s.status, Status::Completed);
        assert!(s.status.is_terminal());
        assert_eq!(s.hashes.len(), 2);
        assert_eq!(
            s.ctx.as_ref().unwrap().sign_info.as_ref().unwrap().status,
            SignStatus::Success
        );
    }

    #[test]
    fn send_start_clears_prior_failure() {
        let s = reduce(
            &prefetching(),
            Action::SendFailure {
                fingerprint: fp(),
                error: err(ErrorCode::SendFailure),
            },
        );
        assert_eq!(s.status, Status::Error);
        assert!(s.error.is_some());

        let s = reduce(
            &s,
            Action::SendStart {
                fingerprint: fp(),
                total_txs: 1,
            },
        );
        assert_eq!(s.status, Status::Signing);
        assert!(s.error.is_none());
        assert!(s.hashes.is_empty());
    }

    #[test]
    fn enable_gasless_refreshes_flags() {
        let mut ctx = prepared();
        ctx.calcs_loading = true;
        ctx.gasless = Some(GaslessInfo { is_gasless: true });
        ctx.disabled_process = true;

        let s = reduce(
            &prefetching(),
            Action::PrefetchSuccess {
                fingerprint: fp(),
                ctx,
            },
        );

        let s = reduce(&s, Action::EnableGasless { fingerprint: fp() });
        let ctx = s.ctx.as_ref().unwrap();
        assert!(ctx.use_gasless);
        assert!(!ctx.disabled_process);
    }

    #[test]
    fn status_names() {
        for s in Status::iter() {
            let n = alloc::format!("{s}");
            assert_eq!(n.parse::<Status>().unwrap(), s);
        }
        assert_eq!(alloc::format!("{}", Status::UiOpen), "ui-open");
        assert_eq!(alloc::format!("{}", Status::PrefetchFailure), "prefetch_failure");
    }
}
