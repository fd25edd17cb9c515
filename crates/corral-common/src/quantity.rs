//! Resource quantity parsing and representation.
//!
//! Supports the quantity formats accepted on the command line and in
//! configuration files:
//! - CPU rate: "150" (percent of one logical CPU), "1.5c" (cores), "500m" (millicores)
//! - Memory: "20Mi", "1Gi", "512M", "1G", "1048576" (bytes)

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CorralError, CorralResult};

const KI: u64 = 1024;
const MI: u64 = 1024 * KI;
const GI: u64 = 1024 * MI;
const TI: u64 = 1024 * GI;

/// A CPU rate ceiling in percent of one logical CPU.
///
/// `100` is one full core, `150` one and a half. The value is signed so that
/// nonsensical input reaches the controller and is rejected there with the
/// OS-style cause rather than being silently clamped by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CpuRate(i64);

impl CpuRate {
    /// Create a rate from percent of one logical CPU.
    #[must_use]
    pub const fn percent(percent: i64) -> Self {
        Self(percent)
    }

    /// Create a rate from whole cores.
    #[must_use]
    pub const fn cores(cores: i64) -> Self {
        Self(cores * 100)
    }

    /// The rate in percent of one logical CPU.
    #[must_use]
    pub const fn as_percent(&self) -> i64 {
        self.0
    }

    /// Parse a CPU rate string.
    ///
    /// Formats:
    /// - "150" -> 150 percent
    /// - "1.5c" -> 150 percent
    /// - "500m" -> 50 percent
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidResourceQuantity`] for unparseable input.
    pub fn parse(s: &str) -> CorralResult<Self> {
        let s = s.trim();
        let invalid = || CorralError::InvalidResourceQuantity {
            value: s.to_string(),
        };

        if let Some(cores) = s.strip_suffix('c') {
            let cores: f64 = cores.parse().map_err(|_| invalid())?;
            return Ok(Self((cores * 100.0).round() as i64));
        }

        if let Some(millicores) = s.strip_suffix('m') {
            let millicores: i64 = millicores.parse().map_err(|_| invalid())?;
            return Ok(Self(millicores / 10));
        }

        s.parse().map(Self).map_err(|_| invalid())
    }
}

impl fmt::Display for CpuRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl FromStr for CpuRate {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A memory quantity in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MemoryQuantity(u64);

impl MemoryQuantity {
    /// Create a memory quantity from bytes.
    #[must_use]
    pub const fn bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create a memory quantity from mebibytes (MiB).
    #[must_use]
    pub const fn mebibytes(mib: u64) -> Self {
        Self(mib * MI)
    }

    /// Create a memory quantity from gibibytes (GiB).
    #[must_use]
    pub const fn gibibytes(gib: u64) -> Self {
        Self(gib * GI)
    }

    /// The quantity in bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> u64 {
        self.0
    }

    /// Parse a memory quantity string.
    ///
    /// Formats (binary - powers of 1024):
    /// - "128Ki" -> 128 * 1024 bytes
    /// - "20Mi" -> 20 * 1024^2 bytes
    /// - "1Gi" -> 1 * 1024^3 bytes
    ///
    /// Formats (decimal - powers of 1000):
    /// - "128k" -> 128 * 1000 bytes
    /// - "128M" -> 128 * 1000^2 bytes
    /// - "1G" -> 1 * 1000^3 bytes
    ///
    /// Plain number is bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidResourceQuantity`] for unparseable input
    /// or values that overflow 64 bits.
    pub fn parse(s: &str) -> CorralResult<Self> {
        let s = s.trim();
        let invalid = || CorralError::InvalidResourceQuantity {
            value: s.to_string(),
        };

        let suffixes = [
            ("Ki", KI),
            ("Mi", MI),
            ("Gi", GI),
            ("Ti", TI),
            ("k", 1000u64),
            ("M", 1000 * 1000),
            ("G", 1000 * 1000 * 1000),
            ("T", 1000 * 1000 * 1000 * 1000),
        ];

        for (suffix, multiplier) in suffixes {
            if let Some(stripped) = s.strip_suffix(suffix) {
                let value: u64 = stripped.parse().map_err(|_| invalid())?;
                return value.checked_mul(multiplier).map(Self).ok_or_else(invalid);
            }
        }

        s.parse().map(Self).map_err(|_| invalid())
    }
}

impl fmt::Display for MemoryQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= GI && self.0 % GI == 0 {
            write!(f, "{}Gi", self.0 / GI)
        } else if self.0 >= MI && self.0 % MI == 0 {
            write!(f, "{}Mi", self.0 / MI)
        } else if self.0 >= KI && self.0 % KI == 0 {
            write!(f, "{}Ki", self.0 / KI)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for MemoryQuantity {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Accepts either a bare number or a quantity string such as "20Mi".
struct QuantityVisitor<T>(std::marker::PhantomData<T>);

impl<'de> Visitor<'de> for QuantityVisitor<CpuRate> {
    type Value = CpuRate;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a CPU rate in percent or a string like \"1.5c\"")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(CpuRate(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v).map(CpuRate).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        CpuRate::parse(v).map_err(E::custom)
    }
}

impl<'de> Visitor<'de> for QuantityVisitor<MemoryQuantity> {
    type Value = MemoryQuantity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a byte count or a string like \"20Mi\"")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v).map(MemoryQuantity).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(MemoryQuantity(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        MemoryQuantity::parse(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for CpuRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor::<CpuRate>(std::marker::PhantomData))
    }
}

impl<'de> Deserialize<'de> for MemoryQuantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor::<MemoryQuantity>(std::marker::PhantomData))
    }
}
