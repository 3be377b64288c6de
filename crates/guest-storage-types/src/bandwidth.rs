// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Disk throttling limits.
//!
//! Users supply throttles as ten flat numeric keys ([`FlatBandwidth`]); the
//! canonical model groups them by direction and by unit
//! ([`BandwidthLimits`]). The two forms convert field by field with no
//! derived values. Zero means "no limit" everywhere.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Throughput limits in megabytes per second.
#[derive(
    Clone, Copy, PartialEq, Debug, Default, Deserialize, Serialize, JsonSchema,
)]
#[serde(default)]
pub struct MbpsLimits {
    pub burst: f64,
    pub concurrent: f64,
}

/// Operation-rate limits in I/O operations per second.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Debug,
    Default,
    Deserialize,
    Serialize,
    JsonSchema,
)]
#[serde(default)]
pub struct IopsLimits {
    pub burst: u32,

    /// How long, in seconds, the guest may sustain the burst rate.
    pub burst_length: u32,

    pub concurrent: u32,
}

#[derive(
    Clone, Copy, PartialEq, Debug, Default, Deserialize, Serialize, JsonSchema,
)]
#[serde(default)]
pub struct DirectionLimits {
    pub mbps: MbpsLimits,
    pub iops: IopsLimits,
}

#[derive(
    Clone, Copy, PartialEq, Debug, Default, Deserialize, Serialize, JsonSchema,
)]
#[serde(default)]
pub struct BandwidthLimits {
    pub read: DirectionLimits,
    pub write: DirectionLimits,
}

impl BandwidthLimits {
    pub fn is_unlimited(&self) -> bool {
        *self == Self::default()
    }
}

/// For `skip_serializing_if`: true if `v` is its type's "no limit" value.
pub fn is_zero<T: Default + PartialEq>(v: &T) -> bool {
    *v == T::default()
}

/// Throttle settings as they appear in user-facing configuration.
#[derive(Clone, Copy, PartialEq, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FlatBandwidth {
    #[serde(skip_serializing_if = "is_zero")]
    pub mbps_r_burst: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub mbps_r_concurrent: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub mbps_wr_burst: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub mbps_wr_concurrent: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops_r_burst: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops_r_burst_length: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops_r_concurrent: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops_wr_burst: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops_wr_burst_length: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops_wr_concurrent: u32,
}

impl From<&FlatBandwidth> for BandwidthLimits {
    fn from(flat: &FlatBandwidth) -> Self {
        Self {
            read: DirectionLimits {
                mbps: MbpsLimits {
                    burst: flat.mbps_r_burst,
                    concurrent: flat.mbps_r_concurrent,
                },
                iops: IopsLimits {
                    burst: flat.iops_r_burst,
                    burst_length: flat.iops_r_burst_length,
                    concurrent: flat.iops_r_concurrent,
                },
            },
            write: DirectionLimits {
                mbps: MbpsLimits {
                    burst: flat.mbps_wr_burst,
                    concurrent: flat.mbps_wr_concurrent,
                },
                iops: IopsLimits {
                    burst: flat.iops_wr_burst,
                    burst_length: flat.iops_wr_burst_length,
                    concurrent: flat.iops_wr_concurrent,
                },
            },
        }
    }
}

impl From<&BandwidthLimits> for FlatBandwidth {
    fn from(limits: &BandwidthLimits) -> Self {
        let BandwidthLimits { read, write } = limits;
        Self {
            mbps_r_burst: read.mbps.burst,
            mbps_r_concurrent: read.mbps.concurrent,
            mbps_wr_burst: write.mbps.burst,
            mbps_wr_concurrent: write.mbps.concurrent,
            iops_r_burst: read.iops.burst,
            iops_r_burst_length: read.iops.burst_length,
            iops_r_concurrent: read.iops.concurrent,
            iops_wr_burst: write.iops.burst,
            iops_wr_burst_length: write.iops.burst_length,
            iops_wr_concurrent: write.iops.concurrent,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn absent_fields_are_unlimited() {
        let flat: FlatBandwidth = serde_json::from_str("{}").unwrap();
        assert_eq!(flat, FlatBandwidth::default());
        assert!(BandwidthLimits::from(&flat).is_unlimited());
    }

    #[test]
    fn fields_map_to_their_direction() {
        let flat: FlatBandwidth = serde_json::from_str(
            r#"{
                "mbps_r_burst": 12.5,
                "mbps_wr_concurrent": 40,
                "iops_r_burst_length": 30,
                "iops_wr_burst": 1000
            }"#,
        )
        .unwrap();

        let limits = BandwidthLimits::from(&flat);
        assert_eq!(limits.read.mbps.burst, 12.5);
        assert_eq!(limits.read.mbps.concurrent, 0.0);
        assert_eq!(limits.write.mbps.concurrent, 40.0);
        assert_eq!(limits.read.iops.burst_length, 30);
        assert_eq!(limits.write.iops.burst, 1000);
        assert_eq!(limits.write.iops.burst_length, 0);
        assert_eq!(FlatBandwidth::from(&limits), flat);
    }

    #[test]
    fn partial_limits_fill_with_zero() {
        let limits: BandwidthLimits = serde_json::from_str(
            r#"{ "write": { "iops": { "concurrent": 250 } } }"#,
        )
        .unwrap();
        assert_eq!(limits.write.iops.concurrent, 250);
        assert_eq!(limits.write.iops.burst, 0);
        assert_eq!(limits.write.mbps, MbpsLimits::default());
        assert_eq!(limits.read, DirectionLimits::default());
    }

    #[test]
    fn unset_fields_are_not_serialized() {
        let flat = FlatBandwidth { iops_r_concurrent: 7, ..Default::default() };
        assert_eq!(
            serde_json::to_string(&flat).unwrap(),
            r#"{"iops_r_concurrent":7}"#
        );
    }
}
