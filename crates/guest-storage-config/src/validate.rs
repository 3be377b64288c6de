// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Field validators and diff-suppression predicates.
//!
//! Validators turn one raw field into its typed value or a
//! [`DiskError::InvalidValue`] naming that field. An empty string means the
//! field was not supplied. Predicates decide whether two raw values denote the
//! same setting, so a caller comparing desired and current state can ignore
//! purely cosmetic differences.

use guest_storage_types::{
    bandwidth::BandwidthLimits, size, AsyncIo, CacheMode, DiskFormat,
    DiskSize, FlatBandwidth,
};
use lazy_static::lazy_static;
use regex::Regex;

use crate::diagnostics::DiskError;
use crate::fields::SharedOptions;

lazy_static! {
    static ref SERIAL: Regex =
        Regex::new(r"^[A-Za-z0-9_-]{1,60}$").expect("serial regex is valid");
    static ref WWN: Regex =
        Regex::new(r"^0x[0-9A-Fa-f]{16}$").expect("wwn regex is valid");
}

pub fn size(raw: &str) -> Result<DiskSize, DiskError> {
    raw.parse().map_err(|_| {
        DiskError::invalid(
            "size",
            raw,
            "expected a positive integer with an optional K, M, G or T suffix",
        )
    })
}

pub fn format(raw: &str) -> Result<DiskFormat, DiskError> {
    if raw.is_empty() {
        return Ok(DiskFormat::default());
    }
    raw.parse().map_err(|_| {
        DiskError::invalid(
            "format",
            raw,
            "expected one of raw, cow, qcow, qed, qcow2, vmdk, cloop",
        )
    })
}

pub fn cache(raw: &str) -> Result<Option<CacheMode>, DiskError> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(|_| {
        DiskError::invalid(
            "cache",
            raw,
            "expected one of none, directsync, unsafe, writeback, \
             writethrough",
        )
    })
}

pub fn async_io(raw: &str) -> Result<Option<AsyncIo>, DiskError> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(|_| {
        DiskError::invalid(
            "asyncio",
            raw,
            "expected one of native, threads, io_uring",
        )
    })
}

pub fn serial(raw: &str) -> Result<Option<String>, DiskError> {
    if raw.is_empty() {
        Ok(None)
    } else if SERIAL.is_match(raw) {
        Ok(Some(raw.to_owned()))
    } else {
        Err(DiskError::invalid(
            "serial",
            raw,
            "expected at most 60 characters from A-Z, a-z, 0-9, - and _",
        ))
    }
}

pub fn wwn(raw: &str) -> Result<Option<String>, DiskError> {
    if raw.is_empty() {
        Ok(None)
    } else if WWN.is_match(raw) {
        Ok(Some(raw.to_owned()))
    } else {
        Err(DiskError::invalid(
            "wwn",
            raw,
            "expected 0x followed by 16 hexadecimal digits",
        ))
    }
}

/// Splits an ISO reference such as `local:iso/ubuntu.iso` into its storage
/// pool and file path.
pub fn iso(raw: &str) -> Result<(String, String), DiskError> {
    match raw.split_once(':') {
        Some((storage, file)) if !storage.is_empty() && !file.is_empty() => {
            Ok((storage.to_owned(), file.to_owned()))
        }
        _ => Err(DiskError::invalid(
            "iso",
            raw,
            "expected <storage>:<path>, e.g. local:iso/image.iso",
        )),
    }
}

/// Checks the throttle keys of `raw`, reporting the first bad one.
pub fn bandwidth(raw: &SharedOptions) -> Result<BandwidthLimits, DiskError> {
    for (field, value) in raw.mbps_fields() {
        if !value.is_finite() || value < 0.0 {
            return Err(DiskError::invalid(
                field,
                value.to_string(),
                "expected a non-negative number",
            ));
        }
    }

    let mut iops = [0u32; 6];
    for ((field, value), limit) in raw.iops_fields().into_iter().zip(&mut iops)
    {
        *limit = u32::try_from(value).map_err(|_| {
            DiskError::invalid(
                field,
                value.to_string(),
                format!("expected an integer from 0 to {}", u32::MAX),
            )
        })?;
    }
    let [
        iops_r_burst,
        iops_r_burst_length,
        iops_r_concurrent,
        iops_wr_burst,
        iops_wr_burst_length,
        iops_wr_concurrent,
    ] = iops;

    Ok(BandwidthLimits::from(&FlatBandwidth {
        mbps_r_burst: raw.mbps_r_burst,
        mbps_r_concurrent: raw.mbps_r_concurrent,
        mbps_wr_burst: raw.mbps_wr_burst,
        mbps_wr_concurrent: raw.mbps_wr_concurrent,
        iops_r_burst,
        iops_r_burst_length,
        iops_r_concurrent,
        iops_wr_burst,
        iops_wr_burst_length,
        iops_wr_concurrent,
    }))
}

/// True if `old` and `new` are valid size strings for the same number of
/// kibibytes, e.g. "1024M" and "1G".
pub fn size_equivalent(old: &str, new: &str) -> bool {
    old == new
        || (size::validate(old)
            && size::validate(new)
            && size::parse(old) == size::parse(new))
}

/// True if `old` and `new` name the same image format, treating an empty
/// value as the default.
pub fn format_equivalent(old: &str, new: &str) -> bool {
    match (format(old), format(new)) {
        (Ok(a), Ok(b)) => a == b,
        _ => old == new,
    }
}
