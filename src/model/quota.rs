//! Byte-denominated usage counters and storage units.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Binary storage units, `B` through `YiB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StorageUnit {
    B,
    KiB,
    MiB,
    GiB,
    TiB,
    PiB,
    EiB,
    ZiB,
    YiB,
}

impl StorageUnit {
    const ALL: [StorageUnit; 9] = [
        StorageUnit::B,
        StorageUnit::KiB,
        StorageUnit::MiB,
        StorageUnit::GiB,
        StorageUnit::TiB,
        StorageUnit::PiB,
        StorageUnit::EiB,
        StorageUnit::ZiB,
        StorageUnit::YiB,
    ];

    /// Number of bytes in one unit.
    pub fn bytes(&self) -> u128 {
        1u128 << (10 * self.exponent())
    }

    fn exponent(&self) -> u32 {
        match self {
            StorageUnit::B => 0,
            StorageUnit::KiB => 1,
            StorageUnit::MiB => 2,
            StorageUnit::GiB => 3,
            StorageUnit::TiB => 4,
            StorageUnit::PiB => 5,
            StorageUnit::EiB => 6,
            StorageUnit::ZiB => 7,
            StorageUnit::YiB => 8,
        }
    }

    /// Converts `value` units to bytes, truncating any fractional byte.
    pub fn to_bytes(&self, value: f64) -> u128 {
        if value <= 0.0 {
            return 0;
        }
        (value * self.bytes() as f64) as u128
    }

    /// Expresses `bytes` in this unit.
    pub fn from_bytes(&self, bytes: u128) -> f64 {
        bytes as f64 / self.bytes() as f64
    }

    /// The largest unit in which `bytes` is at least 1.
    pub fn best_fit(bytes: u128) -> StorageUnit {
        Self::ALL
            .iter()
            .rev()
            .copied()
            .find(|unit| bytes >= unit.bytes())
            .unwrap_or(StorageUnit::B)
    }
}

impl fmt::Display for StorageUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageUnit::B => "B",
            StorageUnit::KiB => "KiB",
            StorageUnit::MiB => "MiB",
            StorageUnit::GiB => "GiB",
            StorageUnit::TiB => "TiB",
            StorageUnit::PiB => "PiB",
            StorageUnit::EiB => "EiB",
            StorageUnit::ZiB => "ZiB",
            StorageUnit::YiB => "YiB",
        };
        f.write_str(name)
    }
}

/// Non-negative byte count with signed-delta updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quota {
    bytes: u128,
}

impl Quota {
    pub const ZERO: Quota = Quota { bytes: 0 };

    pub fn from_bytes(bytes: u128) -> Self {
        Self { bytes }
    }

    pub fn from_units(value: f64, unit: StorageUnit) -> Self {
        Self {
            bytes: unit.to_bytes(value),
        }
    }

    pub fn bytes(&self) -> u128 {
        self.bytes
    }

    pub fn to_units(&self, unit: StorageUnit) -> f64 {
        unit.from_bytes(self.bytes)
    }

    /// Applies a signed delta. Returns `false` if the result would have gone
    /// negative, in which case the quota is clamped at zero.
    pub fn add_delta(&mut self, delta: i128) -> bool {
        if delta >= 0 {
            self.bytes = self.bytes.saturating_add(delta as u128);
            return true;
        }
        let decrement = delta.unsigned_abs();
        match self.bytes.checked_sub(decrement) {
            Some(rest) => {
                self.bytes = rest;
                true
            }
            None => {
                self.bytes = 0;
                false
            }
        }
    }

    pub fn add(&mut self, other: &Quota) {
        self.bytes = self.bytes.saturating_add(other.bytes);
    }

    /// `self - other` as a signed byte count.
    pub fn difference(&self, other: &Quota) -> i128 {
        self.bytes as i128 - other.bytes as i128
    }

    pub fn min(self, other: Quota) -> Quota {
        std::cmp::min(self, other)
    }

    /// Human friendly rendering, e.g. `1.5 MiB`.
    pub fn to_nice_string(&self) -> String {
        let unit = StorageUnit::best_fit(self.bytes);
        let value = self.to_units(unit);
        let rendered = format!("{value:.2}");
        let rendered = rendered.trim_end_matches('0');
        let rendered = if rendered.ends_with('.') {
            format!("{rendered}0")
        } else {
            rendered.to_string()
        };
        format!("{rendered} {unit}")
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.to_nice_string())
    }
}
