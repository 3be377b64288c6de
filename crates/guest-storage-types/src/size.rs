// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conversion between human-readable disk sizes ("32G") and kibibyte counts.
//!
//! The suffix letters look like decimal prefixes but denote binary multiples
//! of a kibibyte: `K` is 1 KiB, `M` is 1024 KiB, and so on. The hypervisor's
//! native unit is the kibibyte, so this mapping must not be reinterpreted.

use std::fmt::Display;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const KIBIBYTE: u64 = 1;
pub const MEBIBYTE: u64 = 1024 * KIBIBYTE;
pub const GIBIBYTE: u64 = 1024 * MEBIBYTE;
pub const TEBIBYTE: u64 = 1024 * GIBIBYTE;

lazy_static! {
    static ref SIZE_GRAMMAR: Regex =
        Regex::new(r"^[1-9]\d*[KMGT]?$").expect("size grammar is valid");
}

/// Returns true if `s` is a well-formed size string: a positive decimal
/// integer without leading zeros, optionally followed by one of `K`, `M`,
/// `G` or `T`.
pub fn validate(s: &str) -> bool {
    SIZE_GRAMMAR.is_match(s)
}

fn multiplier(suffix: char) -> Option<u64> {
    match suffix {
        'K' => Some(KIBIBYTE),
        'M' => Some(MEBIBYTE),
        'G' => Some(GIBIBYTE),
        'T' => Some(TEBIBYTE),
        _ => None,
    }
}

/// Converts a size string to kibibytes. A bare number is read as gibibytes.
///
/// Callers are expected to have checked `s` with [`validate`]; malformed input
/// (including values that overflow) yields 0 rather than an error.
pub fn parse(s: &str) -> u64 {
    if !validate(s) {
        return 0;
    }

    let (digits, unit) = match s.chars().last().and_then(multiplier) {
        Some(unit) => (&s[..s.len() - 1], unit),
        None => (s, GIBIBYTE),
    };

    u64::from_str(digits)
        .ok()
        .and_then(|n| n.checked_mul(unit))
        .unwrap_or(0)
}

/// Renders a kibibyte count using the largest unit that divides it evenly,
/// falling back to a raw `K` value.
///
/// `parse(&format(k)) == k` holds for every `k`, but the literal input string
/// is not preserved: "1024M" comes back as "1G".
pub fn format(kib: u64) -> String {
    for (unit, suffix) in [(TEBIBYTE, 'T'), (GIBIBYTE, 'G'), (MEBIBYTE, 'M')] {
        if kib % unit == 0 {
            return format!("{}{}", kib / unit, suffix);
        }
    }
    format!("{kib}K")
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid disk size {0:?}: expected a positive integer with an optional K, M, G or T suffix")]
pub struct SizeError(pub String);

/// A disk size in kibibytes.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Default,
    Deserialize,
    Serialize,
    JsonSchema,
)]
#[serde(transparent)]
pub struct DiskSize(u64);

impl DiskSize {
    pub const fn from_kib(kib: u64) -> Self {
        Self(kib)
    }

    #[inline]
    pub const fn kib(&self) -> u64 {
        self.0
    }
}

impl FromStr for DiskSize {
    type Err = SizeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse(s) {
            0 => Err(SizeError(s.to_owned())),
            kib => Ok(Self(kib)),
        }
    }
}

impl Display for DiskSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format(self.0))
    }
}
