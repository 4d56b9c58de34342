// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Result bridge
//!
//! Converts observer-style state into a single awaitable outcome per
//! signing session. At most one result is pending at a time, beginning a
//! new session rejects the previous one as superseded.

use std::sync::{Mutex, PoisonError};

use log::debug;
use tokio::sync::oneshot;

use crate::{error::CancelReason, Error};

type Pending<T> = oneshot::Sender<Result<T, Error>>;

/// Single outstanding session result
#[derive(Debug)]
pub(crate) struct ResultBridge<T> {
    pending: Mutex<Option<Pending<T>>>,
}

/// Receiver for a pending session result
pub(crate) type ResultReceiver<T> = oneshot::Receiver<Result<T, Error>>;

impl<T> ResultBridge<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// Begin a new pending result, rejecting any outstanding one
    pub fn begin(&self) -> ResultReceiver<T> {
        let (tx, rx) = oneshot::channel();

        if let Some(old) = self.lock().replace(tx) {
            debug!("rejecting superseded signing result");
            let _ = old.send(Err(Error::Cancelled(CancelReason::Superseded)));
        }

        rx
    }

    /// Resolve the pending result, returns false where none was pending
    pub fn resolve(&self, value: T) -> bool {
        match self.lock().take() {
            Some(tx) => tx.send(Ok(value)).is_ok(),
            None => false,
        }
    }

    /// Reject the pending result, returns false where none was pending
    pub fn reject(&self, err: Error) -> bool {
        match self.lock().take() {
            Some(tx) => tx.send(Err(err)).is_ok(),
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Pending<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Await a pending result, a dropped sender is treated as cancellation
pub(crate) async fn settle<T>(rx: ResultReceiver<T>) -> Result<T, Error> {
    match rx.await {
        Ok(r) => r,
        Err(_) => Err(Error::Cancelled(CancelReason::UserCancelled)),
    }
}
