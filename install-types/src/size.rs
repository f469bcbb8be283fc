//! Geometry model: byte quantities with an explicit unit and sector size

use std::fmt;
use std::str::FromStr;

use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

use crate::SizeError;

/// GPT alignment boundary (1 MiB) - standard for modern disks
pub const GPT_ALIGNMENT_BYTES: u64 = 1024 * 1024;

/// Unit a [`Size`] value is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    B,
    KiB,
    MiB,
    GiB,
    TiB,
    #[serde(rename = "s")]
    Sectors,
    /// Percent of the owning device, only meaningful against a total
    #[serde(rename = "%")]
    Percent,
}

impl Unit {
    /// Bytes per unit for the sector-independent absolute units
    pub fn multiplier(self) -> Option<u64> {
        match self {
            Self::B => Some(1),
            Self::KiB => Some(1 << 10),
            Self::MiB => Some(1 << 20),
            Self::GiB => Some(1 << 30),
            Self::TiB => Some(1 << 40),
            Self::Sectors | Self::Percent => None,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Self::B => "B",
            Self::KiB => "KiB",
            Self::MiB => "MiB",
            Self::GiB => "GiB",
            Self::TiB => "TiB",
            Self::Sectors => "s",
            Self::Percent => "%",
        }
    }

    fn parse_suffix(suffix: &str) -> Option<Self> {
        match suffix.to_ascii_lowercase().as_str() {
            "" | "b" => Some(Self::B),
            "k" | "kib" => Some(Self::KiB),
            "m" | "mib" => Some(Self::MiB),
            "g" | "gib" => Some(Self::GiB),
            "t" | "tib" => Some(Self::TiB),
            "s" | "sectors" => Some(Self::Sectors),
            "%" => Some(Self::Percent),
            _ => None,
        }
    }
}

/// Logical sector size of a device in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub struct SectorSize(u64);

impl SectorSize {
    pub const DEFAULT: Self = Self(512);

    /// A zero sector size is never valid, it falls back to 512 bytes.
    pub fn new(bytes: u64) -> Self {
        if bytes == 0 { Self::DEFAULT } else { Self(bytes) }
    }

    pub fn bytes(self) -> u64 {
        self.0
    }
}

impl From<u64> for SectorSize {
    fn from(bytes: u64) -> Self {
        Self::new(bytes)
    }
}

impl From<SectorSize> for u64 {
    fn from(sector_size: SectorSize) -> Self {
        sector_size.0
    }
}

impl Default for SectorSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// An immutable quantity of storage
///
/// Absolute units convert losslessly to bytes and sectors. `Percent` sizes
/// are relative to a device and must be resolved against its total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    value: u64,
    unit: Unit,
    #[serde(default)]
    sector_size: SectorSize,
}

impl Size {
    pub fn new(value: u64, unit: Unit, sector_size: SectorSize) -> Self {
        Self {
            value,
            unit,
            sector_size,
        }
    }

    pub fn from_bytes(bytes: u64, sector_size: SectorSize) -> Self {
        Self::new(bytes, Unit::B, sector_size)
    }

    pub fn from_sectors(sectors: u64, sector_size: SectorSize) -> Self {
        Self::new(sectors, Unit::Sectors, sector_size)
    }

    pub fn percent(value: u64, sector_size: SectorSize) -> Self {
        Self::new(value, Unit::Percent, sector_size)
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn sector_size(&self) -> SectorSize {
        self.sector_size
    }

    pub fn is_relative(&self) -> bool {
        self.unit == Unit::Percent
    }

    fn bytes_per_unit(&self) -> Option<u64> {
        match self.unit {
            Unit::Sectors => Some(self.sector_size.bytes()),
            unit => unit.multiplier(),
        }
    }

    /// Raw byte count; fails for relative sizes
    pub fn bytes(&self) -> Result<u64, SizeError> {
        let per_unit = self
            .bytes_per_unit()
            .ok_or(SizeError::RelativeWithoutTotal)?;
        self.value
            .checked_mul(per_unit)
            .ok_or(SizeError::Overflow(self.to_string()))
    }

    /// Raw byte count, resolving `Percent` against `total` bytes
    pub fn bytes_of(&self, total: u64) -> Result<u64, SizeError> {
        if self.unit != Unit::Percent {
            return self.bytes();
        }
        if self.value > 100 {
            return Err(SizeError::PercentOutOfRange(self.value));
        }
        Ok((u128::from(total) * u128::from(self.value) / 100) as u64)
    }

    /// Sector count, a trailing partial sector counts as a whole one
    pub fn sectors(&self) -> Result<u64, SizeError> {
        Ok(self.bytes()?.div_ceil(self.sector_size.bytes()))
    }

    /// Turn a relative size into an absolute byte size against `total`
    pub fn resolve(&self, total: &Size) -> Result<Size, SizeError> {
        let bytes = self.bytes_of(total.bytes()?)?;
        Ok(Self::from_bytes(bytes, self.sector_size))
    }

    /// Re-express in another absolute unit, rounding down
    pub fn convert(&self, unit: Unit) -> Result<Size, SizeError> {
        let bytes = self.bytes()?;
        let per_unit = match unit {
            Unit::Sectors => self.sector_size.bytes(),
            Unit::Percent => return Err(SizeError::RelativeWithoutTotal),
            other => other.multiplier().unwrap_or(1),
        };
        Ok(Self::new(bytes / per_unit, unit, self.sector_size))
    }

    pub fn checked_add(&self, other: &Size) -> Result<Size, SizeError> {
        let bytes = self
            .bytes()?
            .checked_add(other.bytes()?)
            .ok_or_else(|| SizeError::Overflow(format!("{self} + {other}")))?;
        Ok(Self::from_bytes(bytes, self.sector_size))
    }

    pub fn checked_sub(&self, other: &Size) -> Result<Size, SizeError> {
        let bytes = self
            .bytes()?
            .checked_sub(other.bytes()?)
            .ok_or_else(|| SizeError::Underflow(format!("{self} - {other}")))?;
        Ok(Self::from_bytes(bytes, self.sector_size))
    }

    pub fn is_aligned(&self, alignment: u64) -> bool {
        matches!(self.bytes(), Ok(bytes) if alignment != 0 && bytes % alignment == 0)
    }

    pub fn align_down(&self, alignment: u64) -> Result<Size, SizeError> {
        let bytes = self.bytes()?;
        Ok(Self::from_bytes(bytes - bytes % alignment.max(1), self.sector_size))
    }

    pub fn align_up(&self, alignment: u64) -> Result<Size, SizeError> {
        let alignment = alignment.max(1);
        let bytes = self
            .bytes()?
            .div_ceil(alignment)
            .checked_mul(alignment)
            .ok_or_else(|| SizeError::Overflow(self.to_string()))?;
        Ok(Self::from_bytes(bytes, self.sector_size))
    }

    /// Human readable form in the largest fitting unit
    pub fn format_highest(&self) -> String {
        match self.bytes() {
            Ok(bytes) => bytes_to_pretty(&bytes, false),
            Err(_) => self.to_string(),
        }
    }

    /// Parse `"512MiB"`, `"20 GiB"`, `"2048s"`, `"100%"` with a sector size
    pub fn parse_with(input: &str, sector_size: SectorSize) -> Result<Size, SizeError> {
        let trimmed = input.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (number, suffix) = trimmed.split_at(split);

        if number.is_empty() {
            return Err(SizeError::Parse(input.to_string()));
        }

        let value = number
            .parse::<u64>()
            .map_err(|_| SizeError::Parse(input.to_string()))?;
        let unit =
            Unit::parse_suffix(suffix.trim()).ok_or_else(|| SizeError::Parse(input.to_string()))?;

        if unit == Unit::Percent && value > 100 {
            return Err(SizeError::PercentOutOfRange(value));
        }

        Ok(Self::new(value, unit, sector_size))
    }
}

impl FromStr for Size {
    type Err = SizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with(s, SectorSize::DEFAULT)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Unit::Percent => write!(f, "{}%", self.value),
            unit => write!(f, "{} {}", self.value, unit.suffix()),
        }
    }
}

/// A byte range representing a contiguous region of a device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// Start byte (inclusive)
    pub start: u64,

    /// End byte (exclusive)
    pub end: u64,
}

impl ByteRange {
    pub fn from_start_len(start: u64, len: u64) -> Option<Self> {
        start.checked_add(len).map(|end| Self { start, end })
    }

    /// Check if this range is valid for a disk of the given size
    pub fn is_valid_for_disk(&self, disk_size: u64) -> bool {
        self.start < self.end && self.end <= disk_size
    }

    /// Clamp this range to fit within a disk of the given size
    pub fn clamp_to_disk(&self, disk_size: u64) -> Self {
        let start = self.start.min(disk_size);
        let end = self.end.min(disk_size);
        Self { start, end }
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Get the size of this range in bytes
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// Convert bytes to human-readable format (e.g., "1.50 GiB")
pub fn bytes_to_pretty(bytes: &u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = *bytes as f64;

    while val >= 1024. && steps < 6 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KiB",
        2 => "MiB",
        3 => "GiB",
        4 => "TiB",
        5 => "PiB",
        _ => "EiB",
    };

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, unit, bytes_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sector_size_from_json_falls_back() {
        let sector: SectorSize = serde_json::from_str("0").unwrap();
        assert_eq!(sector, SectorSize::DEFAULT);
        assert_eq!(serde_json::to_string(&SectorSize::new(4096)).unwrap(), "4096");

        let size: Size =
            serde_json::from_str(r#"{"value":4,"unit":"s","sector_size":0}"#).unwrap();
        assert_eq!(size.sectors().unwrap(), 4);
        assert_eq!(size.bytes().unwrap(), 4 * 512);
    }

    #[test]
    fn parses_common_size_strings() {
        let size: Size = "512MiB".parse().unwrap();
        assert_eq!(size.bytes().unwrap(), 512 * 1024 * 1024);

        let size: Size = "20 GiB".parse().unwrap();
        assert_eq!(size.unit(), Unit::GiB);

        let size = Size::parse_with("2048s", SectorSize::new(4096)).unwrap();
        assert_eq!(size.bytes().unwrap(), 2048 * 4096);
        assert_eq!(size.sectors().unwrap(), 2048);

        assert!("abc".parse::<Size>().is_err());
        assert!("12 parsecs".parse::<Size>().is_err());
        assert_eq!(
            "150%".parse::<Size>(),
            Err(SizeError::PercentOutOfRange(150))
        );
    }

    #[test]
    fn percent_sizes_need_a_total() {
        let half = Size::percent(50, SectorSize::DEFAULT);
        assert_eq!(half.bytes(), Err(SizeError::RelativeWithoutTotal));
        assert_eq!(half.bytes_of(1000).unwrap(), 500);

        let total = Size::new(10, Unit::GiB, SectorSize::DEFAULT);
        let resolved = half.resolve(&total).unwrap();
        assert_eq!(resolved.bytes().unwrap(), 5 * (1 << 30));
    }

    #[test]
    fn sector_conversion_rounds_partial_sectors_up() {
        let size = Size::from_bytes(513, SectorSize::DEFAULT);
        assert_eq!(size.sectors().unwrap(), 2);

        let mib = Size::new(1, Unit::MiB, SectorSize::new(4096));
        assert_eq!(mib.convert(Unit::Sectors).unwrap().value(), 256);
        assert_eq!(mib.convert(Unit::KiB).unwrap().value(), 1024);
    }

    #[test]
    fn arithmetic_is_checked() {
        let a = Size::new(1, Unit::GiB, SectorSize::DEFAULT);
        let b = Size::new(512, Unit::MiB, SectorSize::DEFAULT);
        assert_eq!(a.checked_sub(&b).unwrap().bytes().unwrap(), 512 << 20);
        assert!(b.checked_sub(&a).is_err());
        assert_eq!(a.checked_add(&b).unwrap().bytes().unwrap(), (1 << 30) + (512 << 20));
    }

    #[test]
    fn alignment_helpers() {
        let size = Size::from_bytes(GPT_ALIGNMENT_BYTES + 1, SectorSize::DEFAULT);
        assert!(!size.is_aligned(GPT_ALIGNMENT_BYTES));
        assert_eq!(
            size.align_up(GPT_ALIGNMENT_BYTES).unwrap().bytes().unwrap(),
            2 * GPT_ALIGNMENT_BYTES
        );
        assert_eq!(
            size.align_down(GPT_ALIGNMENT_BYTES).unwrap().bytes().unwrap(),
            GPT_ALIGNMENT_BYTES
        );
    }

    #[test]
    fn byte_ranges_overlap_only_when_sharing_bytes() {
        let a = ByteRange::from_start_len(0, 10).unwrap();
        let b = ByteRange::from_start_len(10, 10).unwrap();
        let c = ByteRange::from_start_len(5, 10).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
        assert!(b.is_valid_for_disk(20));
        assert!(!b.is_valid_for_disk(19));
    }

    #[test]
    fn pretty_printing() {
        assert_eq!(bytes_to_pretty(&512, false), "512.00 B");
        assert_eq!(bytes_to_pretty(&(1536 * 1024 * 1024), false), "1.50 GiB");
        assert_eq!(bytes_to_pretty(&1024, true), "1.00 KiB (1,024 bytes)");
    }

    #[test]
    fn test_size_serialization() {
        let size = Size::new(512, Unit::MiB, SectorSize::new(4096));
        let json = serde_json::to_string(&size).unwrap();
        let deserialized: Size = serde_json::from_str(&json).unwrap();
        assert_eq!(size, deserialized);
    }
}
