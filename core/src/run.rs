// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Run / generation tracking
//!
//! Async continuations capture the [RunContext] current when they were
//! started and must check [RunTracker::is_active] before applying any
//! effect, results from superseded runs are discarded rather than aborted.

use alloc::string::String;

/// Generation id paired with the fingerprint it belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunContext {
    pub id: u64,
    pub fingerprint: String,
}

/// Tracks the single current run
#[derive(Clone, Debug, Default)]
pub struct RunTracker {
    last_id: u64,
    current: Option<RunContext>,
}

impl RunTracker {
    pub const fn new() -> Self {
        Self {
            last_id: 0,
            current: None,
        }
    }

    /// Mark a run for the provided fingerprint
    ///
    /// Where the current run belongs to the same fingerprint (and matches
    /// `existing` when provided) it is reused, otherwise a new id is minted,
    /// invalidating the previous run regardless of fingerprint.
    pub fn mark_run(&mut self, fingerprint: &str, existing: Option<u64>) -> RunContext {
        if let Some(c) = &self.current {
            let same_id = existing.map(|id| id == c.id).unwrap_or(true);
            if c.fingerprint == fingerprint && same_id {
                return c.clone();
            }
        }

        self.last_id += 1;

        let run = RunContext {
            id: self.last_id,
            fingerprint: String::from(fingerprint),
        };

        #[cfg(feature = "log")]
        log::trace!("new run {} for {}", run.id, run.fingerprint);

        self.current = Some(run.clone());

        run
    }

    /// Check whether the provided run is still current
    pub fn is_active(&self, id: u64, fingerprint: &str) -> bool {
        match &self.current {
            Some(c) => c.id == id && c.fingerprint == fingerprint,
            None => false,
        }
    }

    /// Helper to check a captured [RunContext]
    pub fn is_current(&self, run: &RunContext) -> bool {
        self.is_active(run.id, &run.fingerprint)
    }

    /// Fetch the current run
    pub fn current(&self) -> Option<&RunContext> {
        self.current.as_ref()
    }

    /// Clear the current run, invalidating all outstanding continuations
    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    #[test]
    fn reuses_for_same_fingerprint() {
        let mut t = RunTracker::new();

        let a = t.mark_run("a", None);
        let b = t.mark_run("a", None);
        assert_eq!(a, b);
        assert!(t.is_current(&a));

        let c = t.mark_run("a", Some(a.id));
        assert_eq!(a, c);
    }

    #[test]
    fn mismatched_existing_mints() {
        let mut t = RunTracker::new();

        let a = t.mark_run("a", None);
        let b = t.mark_run("a", Some(a.id + 7));
        assert!(b.id > a.id);
        assert!(!t.is_current(&a));
        assert!(t.is_current(&b));
    }

    #[test]
    fn only_latest_is_active() {
        let mut t = RunTracker::new();
        let mut runs = Vec::new();

        for f in ["a", "b", "a", "c", "c", "b"] {
            runs.push(t.mark_run(f, None));

            let latest = runs.last().unwrap();
            for r in &runs {
                let expected = r.id == latest.id;
                assert_eq!(t.is_current(r), expected, "run {r:?} (latest {latest:?})");
            }
        }

        // Ids are monotonic
        for w in runs.windows(2) {
            assert!(w[1].id >= w[0].id);
        }

        // Id / fingerprint pairs must both match
        let latest = runs.last().unwrap().clone();
        assert!(!t.is_active(latest.id, "a"));
    }

    #[test]
    fn clear_invalidates_permanently() {
        let mut t = RunTracker::new();

        let a = t.mark_run("a", None);
        t.clear();
        assert!(!t.is_current(&a));
        assert!(t.current().is_none());

        let b = t.mark_run("a", None);
        assert_ne!(a.id, b.id);
        assert!(!t.is_current(&a));
        assert!(t.is_current(&b));
    }
}
