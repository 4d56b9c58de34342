// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Observable state store
//!
//! State is published through a [watch] channel, listeners run on their
//! own task so they are never invoked from within a dispatch and bursts of
//! updates within one scheduling tick coalesce to the latest state.

use std::sync::Arc;

use log::trace;
use tokio::{sync::watch, task::JoinHandle};

/// Shared state store
#[derive(Debug)]
pub struct Store<S> {
    tx: watch::Sender<Arc<S>>,
}

/// Listener registration, dropping this detaches the listener
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl<S: Send + Sync + 'static> Store<S> {
    /// Create a new store with the provided initial state
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Fetch a snapshot of the current state
    pub fn get(&self) -> Arc<S> {
        self.tx.borrow().clone()
    }

    /// Apply an update, publishing only where a new state is returned
    ///
    /// Returning the same [Arc] (by pointer) is a no-op.
    pub fn update<F>(&self, f: F) -> Arc<S>
    where
        F: FnOnce(&Arc<S>) -> Arc<S>,
    {
        let mut current = None;

        let changed = self.tx.send_if_modified(|s| {
            let next = f(s);
            let changed = !Arc::ptr_eq(&next, s);

            *s = next;
            current = Some(s.clone());

            changed
        });

        if !changed {
            trace!("store update discarded (no change)");
        }

        match current {
            Some(s) => s,
            None => self.get(),
        }
    }

    /// Replace the current state
    pub fn set(&self, state: S) -> Arc<S> {
        let next = Arc::new(state);
        self.update(|_| next)
    }

    /// Fetch a receiver for async consumers
    pub fn watch(&self) -> watch::Receiver<Arc<S>> {
        self.tx.subscribe()
    }

    /// Register a listener, called with the latest state following each change
    ///
    /// This MUST be called from within a tokio runtime.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Arc<S>) + Send + Sync + 'static,
    {
        let mut rx = self.tx.subscribe();

        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let s = rx.borrow_and_update().clone();
                listener(s);
            }
        });

        Subscription { handle }
    }
}

impl Subscription {
    /// Detach the listener
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
