//! Device parameter table
//!
//! Maps every patch field the codec understands onto its address in the
//! unit's patch memory. The memory has two regions: a 32-byte common block
//! (patch name, section switches) and a 127-byte effect block holding the
//! amp-multi parameters.
//!
//! Raw values are 7-bit MIDI data bytes. Wider fields pack 7-bit groups,
//! most significant first.

use std::fmt;

use crate::patch::model::SectionId;

// ============================================================================
// Memory layout
// ============================================================================

/// Size of the common region in bytes
pub const COMMON_LENGTH: usize = 0x20;

/// Size of the effect region in bytes
pub const EFFECT_LENGTH: usize = 0x7F;

/// Patch name location within the common region
pub const NAME_OFFSET: usize = 16;

/// Patch name length in characters
pub const NAME_LENGTH: usize = 12;

/// Memory region selected by the frame's section byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Region {
    Common,
    Effect,
}

impl Region {
    pub fn from_byte(byte: u8) -> Option<Region> {
        match byte {
            0x00 => Some(Region::Common),
            0x01 => Some(Region::Effect),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Region::Common => 0x00,
            Region::Effect => 0x01,
        }
    }

    pub fn len(self) -> usize {
        match self {
            Region::Common => COMMON_LENGTH,
            Region::Effect => EFFECT_LENGTH,
        }
    }
}

/// A byte position in patch memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    pub region: Region,
    pub offset: u8,
}

impl Address {
    pub const fn common(offset: u8) -> Self {
        Self {
            region: Region::Common,
            offset,
        }
    }

    pub const fn effect(offset: u8) -> Self {
        Self {
            region: Region::Effect,
            offset,
        }
    }
}

// ============================================================================
// Fields
// ============================================================================

/// A logical patch field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Enabled(SectionId),
    Param(SectionId, &'static str),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Name => write!(f, "meta.name"),
            Field::Enabled(section) => write!(f, "{}.enabled", section),
            Field::Param(section, key) => write!(f, "{}.{}", section, key),
        }
    }
}

/// How a patch value maps onto raw device units
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scaling {
    /// Linear over `[min, max]` onto `0..=raw_max`
    Linear { min: f64, max: f64 },
    /// Logarithmic over `[min, max]` (min > 0)
    Log { min: f64, max: f64 },
    /// Named choices with their device ids
    Choice(&'static [(&'static str, u16)]),
    /// On/off switch
    Flag,
    /// ASCII characters, one byte each, written one character per frame
    Text,
}

/// One row of the parameter table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub field: Field,
    pub address: Address,
    pub width: usize,
    pub scaling: Scaling,
}

impl FieldSpec {
    /// Largest raw value this field can hold
    pub fn raw_max(&self) -> u32 {
        (1u32 << (7 * self.width as u32)) - 1
    }

    pub fn start(&self) -> usize {
        self.address.offset as usize
    }

    pub fn end(&self) -> usize {
        self.start() + self.width
    }

    pub fn covers(&self, address: Address) -> bool {
        address.region == self.address.region
            && (self.start()..self.end()).contains(&(address.offset as usize))
    }

    /// Map a continuous value to raw units, clamping to the field range
    pub fn to_raw(&self, value: f64) -> Option<u32> {
        let raw_max = self.raw_max() as f64;
        let normalized = match self.scaling {
            Scaling::Linear { min, max } => (value - min) / (max - min),
            Scaling::Log { min, max } => (value.max(min) / min).ln() / (max / min).ln(),
            _ => return None,
        };
        Some((normalized.clamp(0.0, 1.0) * raw_max).round() as u32)
    }

    /// Map raw units back to a continuous value
    pub fn from_raw(&self, raw: u32) -> Option<f64> {
        let t = raw.min(self.raw_max()) as f64 / self.raw_max() as f64;
        match self.scaling {
            Scaling::Linear { min, max } => Some(min + t * (max - min)),
            Scaling::Log { min, max } => Some(min * (max / min).powf(t)),
            _ => None,
        }
    }

    /// The value the device will actually hold after writing `value`
    pub fn quantize(&self, value: f64) -> Option<f64> {
        self.to_raw(value).and_then(|raw| self.from_raw(raw))
    }
}

/// Pack a raw value into `width` 7-bit bytes, most significant first
pub fn pack7(raw: u32, width: usize) -> Vec<u8> {
    (0..width)
        .rev()
        .map(|group| ((raw >> (7 * group as u32)) & 0x7F) as u8)
        .collect()
}

/// Inverse of [`pack7`]
pub fn unpack7(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, b| (acc << 7) | (*b as u32 & 0x7F))
}

// ============================================================================
// Choice tables
// ============================================================================

const AMP_MODELS: &[(&str, u16)] = &[
    ("BRIT_TOP_BOOST", 0x01),
    ("TWEED_BASSMAN", 0x02),
    ("JCM800", 0x03),
    ("AC30", 0x04),
    ("FENDER_TWIN", 0x05),
    ("MESA_BOOGIE", 0x06),
];

const CAB_MODELS: &[(&str, u16)] = &[
    ("2x12_ALNICO", 0x01),
    ("4x10_TWEED", 0x02),
    ("4x12_VINTAGE", 0x03),
    ("4x12_MODERN", 0x04),
    ("1x12_BLACKFACE", 0x05),
    ("2x12_CELESTION", 0x06),
];

const BOOSTER_TYPES: &[(&str, u16)] = &[
    ("TREBLE", 0x01),
    ("TUBE_SCREAMER", 0x02),
    ("CLEAN", 0x03),
    ("DISTORTION", 0x04),
    ("FUZZ", 0x05),
];

const MOD_TYPES: &[(&str, u16)] = &[
    ("CHORUS", 0x01),
    ("PHASER", 0x02),
    ("TREMOLO", 0x03),
    ("VIBRATO", 0x04),
    ("FLANGER", 0x05),
];

const REVERB_TYPES: &[(&str, u16)] = &[
    ("ROOM", 0x01),
    ("PLATE", 0x02),
    ("HALL", 0x03),
    ("SPRING", 0x04),
    ("CHURCH", 0x05),
];

// ============================================================================
// The table
// ============================================================================

const UNIT: Scaling = Scaling::Linear { min: 0.0, max: 1.0 };

const fn param(section: SectionId, key: &'static str, offset: u8, scaling: Scaling) -> FieldSpec {
    FieldSpec {
        field: Field::Param(section, key),
        address: Address::effect(offset),
        width: 1,
        scaling,
    }
}

const fn switch(section: SectionId, offset: u8) -> FieldSpec {
    FieldSpec {
        field: Field::Enabled(section),
        address: Address::common(offset),
        width: 1,
        scaling: Scaling::Flag,
    }
}

/// Every field the codec encodes, in transmission order
pub static PARAMETER_TABLE: &[FieldSpec] = &[
    FieldSpec {
        field: Field::Name,
        address: Address::common(NAME_OFFSET as u8),
        width: NAME_LENGTH,
        scaling: Scaling::Text,
    },
    switch(SectionId::Booster, 8),
    switch(SectionId::Amp, 9),
    switch(SectionId::Modulation, 10),
    switch(SectionId::Delay, 11),
    switch(SectionId::Reverb, 12),
    // Booster
    param(SectionId::Booster, "type", 8, Scaling::Choice(BOOSTER_TYPES)),
    param(SectionId::Booster, "level", 9, UNIT),
    // Amp
    param(SectionId::Amp, "model", 16, Scaling::Choice(AMP_MODELS)),
    param(SectionId::Amp, "cab", 17, Scaling::Choice(CAB_MODELS)),
    param(SectionId::Amp, "gain", 30, UNIT),
    param(SectionId::Amp, "master", 31, UNIT),
    param(SectionId::Amp, "bass", 33, UNIT),
    param(SectionId::Amp, "mid", 34, UNIT),
    param(SectionId::Amp, "treble", 36, UNIT),
    param(SectionId::Amp, "presence", 40, UNIT),
    // Modulation
    param(SectionId::Modulation, "type", 60, Scaling::Choice(MOD_TYPES)),
    param(
        SectionId::Modulation,
        "rate_hz",
        63,
        Scaling::Log { min: 0.1, max: 10.0 },
    ),
    param(SectionId::Modulation, "depth", 64, UNIT),
    param(SectionId::Modulation, "mix", 65, UNIT),
    // Delay
    FieldSpec {
        field: Field::Param(SectionId::Delay, "time_ms"),
        address: Address::effect(74),
        width: 2,
        scaling: Scaling::Linear {
            min: 30.0,
            max: 1500.0,
        },
    },
    param(SectionId::Delay, "feedback", 76, UNIT),
    param(SectionId::Delay, "mix", 78, UNIT),
    // Reverb
    param(SectionId::Reverb, "type", 82, Scaling::Choice(REVERB_TYPES)),
    param(
        SectionId::Reverb,
        "decay_s",
        85,
        Scaling::Linear { min: 0.1, max: 3.0 },
    ),
    param(SectionId::Reverb, "mix", 89, UNIT),
];

/// Look up a logical field
pub fn lookup(field: Field) -> Option<&'static FieldSpec> {
    PARAMETER_TABLE.iter().find(|spec| spec.field == field)
}

/// Look up a section parameter by key
pub fn lookup_param(section: SectionId, key: &str) -> Option<&'static FieldSpec> {
    PARAMETER_TABLE
        .iter()
        .find(|spec| matches!(spec.field, Field::Param(s, k) if s == section && k == key))
}

/// The payload width a single parameter-write frame at `address` must carry.
///
/// Text fields are written one character at a time. `None` means the
/// address is not the start of a known field.
pub fn frame_width(address: Address) -> Option<usize> {
    PARAMETER_TABLE.iter().find_map(|spec| match spec.scaling {
        Scaling::Text if spec.covers(address) => Some(1),
        _ if spec.address == address => Some(spec.width),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_table_fits_regions_without_overlap() {
        for (i, a) in PARAMETER_TABLE.iter().enumerate() {
            assert!(a.end() <= a.address.region.len(), "{} overflows", a.field);
            for b in &PARAMETER_TABLE[i + 1..] {
                let overlap = a.address.region == b.address.region
                    && a.start() < b.end()
                    && b.start() < a.end();
                assert!(!overlap, "{} overlaps {}", a.field, b.field);
            }
        }
    }

    #[test]
    fn test_pack7_round_trip() {
        assert_eq!(pack7(0x3FFF, 2), vec![0x7F, 0x7F]);
        assert_eq!(pack7(300, 2), vec![0x02, 0x2C]);
        assert_eq!(unpack7(&[0x02, 0x2C]), 300);
    }

    #[test]
    fn test_unit_scaling_matches_device_rounding() {
        let spec = lookup_param(SectionId::Delay, "mix").unwrap();
        assert_eq!(spec.to_raw(0.2), Some(25));
        assert_eq!(spec.to_raw(1.5), Some(127));
        assert_relative_eq!(spec.from_raw(127).unwrap(), 1.0);
    }

    #[test]
    fn test_log_scaling_endpoints() {
        let spec = lookup_param(SectionId::Modulation, "rate_hz").unwrap();
        assert_eq!(spec.to_raw(0.1), Some(0));
        assert_eq!(spec.to_raw(10.0), Some(127));
        assert_relative_eq!(spec.from_raw(127).unwrap(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_wide_field_resolution() {
        let spec = lookup_param(SectionId::Delay, "time_ms").unwrap();
        assert_eq!(spec.raw_max(), 16383);
        let q = spec.quantize(300.0).unwrap();
        assert!((q - 300.0).abs() < 1470.0 / 16383.0);
    }

    #[test]
    fn test_frame_width_for_name_characters() {
        assert_eq!(frame_width(Address::common(NAME_OFFSET as u8 + 3)), Some(1));
        assert_eq!(frame_width(Address::effect(74)), Some(2));
        assert_eq!(frame_width(Address::effect(75)), None);
    }
}
