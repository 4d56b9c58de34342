// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Request fingerprints
//!
//! A fingerprint is the stable identity of a signing intent, used both as
//! the context cache key and as the guard on every [Action][crate::engine::Action].

use alloc::string::String;
use core::fmt::Write;

use crate::types::{strip_hex_prefix, Tx};

/// Separator between fields of a single transaction
pub const FIELD_SEPARATOR: char = '|';

/// Separator between transactions in a batch
pub const TX_SEPARATOR: char = ';';

/// Fingerprint returned for an empty batch
pub const EMPTY_FINGERPRINT: &str = "empty";

/// Compute the fingerprint for an ordered batch of transactions
///
/// Each transaction contributes `chain_id|to|value|payload_len`, with
/// addresses and values lower-cased and a missing value treated as `0x0`.
/// Identical batches always produce identical fingerprints.
pub fn fingerprint(txs: &[Tx]) -> String {
    if txs.is_empty() {
        return String::from(EMPTY_FINGERPRINT);
    }

    let mut s = String::new();

    for (i, tx) in txs.iter().enumerate() {
        if i > 0 {
            s.push(TX_SEPARATOR);
        }

        let to = tx.to.as_deref().unwrap_or_default();
        let value = tx.value.as_deref().map(normalise_value);

        // Writes to a String are infallible
        let _ = write!(
            s,
            "{}{sep}{}{sep}{}{sep}{}",
            tx.chain_id,
            to.to_ascii_lowercase(),
            value.as_deref().unwrap_or("0x0"),
            tx.payload_len(),
            sep = FIELD_SEPARATOR,
        );
    }

    s
}

/// Normalise hex quantities so `0x00`, `0X0` and `0x0` compare equal
fn normalise_value(v: &str) -> String {
    let digits = strip_hex_prefix(v).trim_start_matches('0');

    let mut s = String::from("0x");
    match digits.is_empty() {
        true => s.push('0'),
        false => s.push_str(&digits.to_ascii_lowercase()),
    }
    s
}
