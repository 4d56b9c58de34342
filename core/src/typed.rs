// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Ordered typed-data signing state
//!
//! Sequences resume from the last completed item following a failure,
//! [ResumeState] holds the retained results between attempts.

use alloc::vec::Vec;

use strum::{Display, EnumString};

use crate::types::TxHash;

/// Typed-data session status
///
/// Success is represented by resolving the session result and returning to
/// [TypedStatus::Idle], there is no completed state.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Display, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case")]
pub enum TypedStatus {
    #[default]
    Idle,
    Signing,
    /// Paused following a failure, may be retried
    Error,
}

/// Sequence progress, `current` is the number of items completed
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

impl Progress {
    pub const fn new(current: usize, total: usize) -> Self {
        Self { current, total }
    }
}

/// Retained results for resuming a failed sequence
///
/// `partial_results().len() == resume_index()` always holds.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ResumeState {
    resume_index: usize,
    partial_results: Vec<TxHash>,
}

impl ResumeState {
    pub const fn new() -> Self {
        Self {
            resume_index: 0,
            partial_results: Vec::new(),
        }
    }

    /// Index of the first item still to be signed
    pub fn resume_index(&self) -> usize {
        self.resume_index
    }

    /// Results for items `0..resume_index`
    pub fn partial_results(&self) -> &[TxHash] {
        &self.partial_results
    }

    /// Fetch the starting index and seeded accumulator for the next attempt
    pub fn begin(&self) -> (usize, Vec<TxHash>) {
        (self.resume_index, self.partial_results.clone())
    }

    /// Record a failure at `failed_index` with the results signed so far
    ///
    /// The resume point is the later of the last published progress and the
    /// failing index, bounded by the results actually retained.
    pub fn record_failure(&mut self, progress: Progress, failed_index: usize, mut signed: Vec<TxHash>) {
        let index = progress.current.max(failed_index).min(signed.len());
        signed.truncate(index);

        #[cfg(feature = "log")]
        log::debug!("typed-data sequence paused at {index}");

        self.resume_index = index;
        self.partial_results = signed;
    }

    /// Drop retained results
    pub fn clear(&mut self) {
        self.resume_index = 0;
        self.partial_results.clear();
    }
}
