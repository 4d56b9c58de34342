// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Single-flight context cache
//!
//! Maps fingerprints to the in-flight preparation for that fingerprint so
//! concurrent callers share one underlying prepare call. Entries remove
//! themselves once settled, regardless of outcome.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use futures::future::{BoxFuture, FutureExt, Shared};
use log::debug;

use sigflow_core::types::SignerCtx;

use crate::Error;

/// Shared preparation future
pub(crate) type Preparation = Shared<BoxFuture<'static, Result<Arc<SignerCtx>, Error>>>;

type Entries = HashMap<String, (u64, Preparation)>;

#[derive(Default)]
pub(crate) struct ContextCache {
    entries: Arc<Mutex<Entries>>,
    last_id: AtomicU64,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the pending preparation for `fingerprint`, or start one via `prepare`
    pub fn get_or_start<F>(&self, fingerprint: &str, prepare: F) -> Preparation
    where
        F: FnOnce() -> BoxFuture<'static, Result<Arc<SignerCtx>, Error>>,
    {
        let mut entries = lock(&self.entries);

        if let Some((_, p)) = entries.get(fingerprint) {
            debug!("joining pending preparation for {}", fingerprint);
            return p.clone();
        }

        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;

        let key = fingerprint.to_string();
        let map = self.entries.clone();
        let inner = prepare();

        let p = async move {
            let r = inner.await;

            // Remove our own entry only, a newer preparation may have replaced it
            let mut entries = lock(&map);
            if matches!(entries.get(&key), Some((i, _)) if *i == id) {
                entries.remove(&key);
            }

            r
        }
        .boxed()
        .shared();

        entries.insert(fingerprint.to_string(), (id, p.clone()));

        p
    }

    /// Check for a pending preparation
    #[cfg(test)]
    pub fn is_pending(&self, fingerprint: &str) -> bool {
        lock(&self.entries).contains_key(fingerprint)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn single_flight() {
        let cache = ContextCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();
        let mut gate = Some(gate);

        let mut start = |c: &ContextCache| {
            let calls = calls.clone();
            let gate = gate.take();

            c.get_or_start("fp", move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if let Some(g) = gate {
                        let _ = g.await;
                    }
                    Ok::<_, Error>(Arc::new(SignerCtx {
                        chain_id: 1,
                        ..Default::default()
                    }))
                }
                .boxed()
            })
        };

        let a = start(&cache);
        let b = start(&cache);
        assert!(cache.is_pending("fp"));

        let _ = release.send(());
        let (a, b) = futures::join!(a, b);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));

        // Settled entries are removed
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn failures_are_removed() {
        let cache = ContextCache::new();

        let r = cache
            .get_or_start("fp", || async { Err::<Arc<SignerCtx>, _>(Error::Prepare("nope".into())) }.boxed())
            .await;

        assert_eq!(r, Err(Error::Prepare("nope".into())));
        assert!(!cache.is_pending("fp"));

        // Next request starts a fresh preparation
        let r = cache
            .get_or_start("fp", || async { Ok::<_, Error>(Arc::new(SignerCtx::default())) }.boxed())
            .await;
        assert!(r.is_ok());
    }
}
