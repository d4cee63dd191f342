//! SysEx codec for patches
//!
//! Three frame shapes travel on the wire:
//!
//! ```text
//! parameter write: F0 43 7D 40 55 42 | 20 | section | offset | payload.. | sum | F7
//! bulk dump:       F0 43 7D 30 55 42 39 39 | len_hi len_lo | 20 | section | offset | payload.. | sum | F7
//! dump request:    F0 43 7D 50 55 42 30 01 | patch | F7
//! ```
//!
//! The checksum covers every byte after the fixed header up to the checksum
//! itself and is `(-sum) & 0x7F`. The codec is a pure transform; it never
//! touches a port.

use log::debug;

use crate::error::{ProtocolError, Result};
use crate::patch::model::{ParamValue, Patch};
use crate::patch::table::{
    frame_width, pack7, unpack7, Address, Field, FieldSpec, Region, Scaling, COMMON_LENGTH,
    EFFECT_LENGTH, NAME_LENGTH, PARAMETER_TABLE,
};

// ============================================================================
// Wire constants
// ============================================================================

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;

/// Vendor header of a single parameter write
pub const PARAM_HEADER: [u8; 6] = [0xF0, 0x43, 0x7D, 0x40, 0x55, 0x42];

/// Vendor header of a bulk dump frame
pub const BULK_HEADER: [u8; 8] = [0xF0, 0x43, 0x7D, 0x30, 0x55, 0x42, 0x39, 0x39];

/// Vendor header of a patch dump request
pub const DUMP_REQUEST_HEADER: [u8; 8] = [0xF0, 0x43, 0x7D, 0x50, 0x55, 0x42, 0x30, 0x01];

const CMD_PARAMETER: u8 = 0x20;
const CMD_BULK_MARKER: u8 = 0x30;
const BULK_START: u8 = 0x01;
const BULK_END: u8 = 0x11;

/// `(-sum) & 0x7F` over the covered bytes
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum) & 0x7F
}

// ============================================================================
// Frames
// ============================================================================

/// An encoded SysEx frame ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    address: Option<Address>,
}

impl Frame {
    /// Wrap raw bytes that do not target a parameter address
    pub fn raw(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            address: None,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Target address of a parameter write; used for queue supersession
    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Concatenate frames into one byte stream
pub fn concat(frames: &[Frame]) -> Vec<u8> {
    frames.iter().flat_map(|f| f.bytes().iter().copied()).collect()
}

/// Result of parsing a single frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    Parameter { address: Address, payload: Vec<u8> },
    Bulk { address: Address, payload: Vec<u8> },
    BulkMarker { start: bool, patch_index: u8 },
}

// ============================================================================
// Patch memory image
// ============================================================================

/// Device patch memory with a record of which bytes were written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchImage {
    common: [u8; COMMON_LENGTH],
    effect: [u8; EFFECT_LENGTH],
    touched_common: [bool; COMMON_LENGTH],
    touched_effect: [bool; EFFECT_LENGTH],
}

impl Default for PatchImage {
    fn default() -> Self {
        Self {
            common: [0; COMMON_LENGTH],
            effect: [0; EFFECT_LENGTH],
            touched_common: [false; COMMON_LENGTH],
            touched_effect: [false; EFFECT_LENGTH],
        }
    }
}

impl PatchImage {
    /// Write `payload` starting at `address`
    pub fn write(&mut self, address: Address, payload: &[u8]) -> std::result::Result<(), ProtocolError> {
        let start = address.offset as usize;
        let region = address.region.len();
        if start + payload.len() > region {
            return Err(ProtocolError::OffsetOutOfRange {
                offset: start,
                len: payload.len(),
                region,
            });
        }
        let (bytes, touched): (&mut [u8], &mut [bool]) = match address.region {
            Region::Common => (&mut self.common[..], &mut self.touched_common[..]),
            Region::Effect => (&mut self.effect[..], &mut self.touched_effect[..]),
        };
        bytes[start..start + payload.len()].copy_from_slice(payload);
        touched[start..start + payload.len()]
            .iter_mut()
            .for_each(|t| *t = true);
        Ok(())
    }

    pub fn region(&self, region: Region) -> &[u8] {
        match region {
            Region::Common => &self.common,
            Region::Effect => &self.effect,
        }
    }

    /// Bytes of a field, only if every one of them has been written
    pub fn field(&self, spec: &FieldSpec) -> Option<&[u8]> {
        let touched = match spec.address.region {
            Region::Common => &self.touched_common[..],
            Region::Effect => &self.touched_effect[..],
        };
        let range = spec.start()..spec.end();
        if touched[range.clone()].iter().all(|t| *t) {
            Some(&self.region(spec.address.region)[range])
        } else {
            None
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Encoder/decoder between [`Patch`] values and device frames
#[derive(Debug, Clone)]
pub struct PatchCodec {
    table: &'static [FieldSpec],
}

impl Default for PatchCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchCodec {
    pub fn new() -> Self {
        Self {
            table: PARAMETER_TABLE,
        }
    }

    pub fn table(&self) -> &'static [FieldSpec] {
        self.table
    }

    // ------------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------------

    /// Encode every known field present in the patch as parameter writes
    pub fn encode(&self, patch: &Patch) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        for spec in self.table {
            if let Some(bytes) = field_bytes(spec, patch)? {
                frames.extend(field_frames(spec, &bytes, None));
            }
        }
        Ok(frames)
    }

    /// Encode one logical change: one frame, or one per character for text
    pub fn encode_field(&self, patch: &Patch, field: Field) -> Result<Vec<Frame>> {
        let spec = self
            .table
            .iter()
            .find(|s| s.field == field)
            .ok_or_else(|| ProtocolError::InvalidValue {
                field: field.to_string(),
                reason: "not in the parameter table".to_string(),
            })?;
        Ok(match field_bytes(spec, patch)? {
            Some(bytes) => field_frames(spec, &bytes, None),
            None => Vec::new(),
        })
    }

    /// Frames that turn device state `from` into `to`
    pub fn encode_diff(&self, from: &Patch, to: &Patch) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        for spec in self.table {
            let Some(next) = field_bytes(spec, to)? else {
                continue;
            };
            let previous = field_bytes(spec, from)?;
            if previous.as_deref() != Some(next.as_slice()) {
                frames.extend(field_frames(spec, &next, previous.as_deref()));
            }
        }
        debug!("Patch diff encodes to {} frames", frames.len());
        Ok(frames)
    }

    /// Memory image the patch produces on the device
    pub fn image(&self, patch: &Patch) -> Result<PatchImage> {
        let mut image = PatchImage::default();
        for spec in self.table {
            if let Some(bytes) = field_bytes(spec, patch)? {
                image.write(spec.address, &bytes)?;
            }
        }
        Ok(image)
    }

    /// Full bulk dump: start marker, common block, effect block, end marker
    pub fn encode_bulk(&self, patch: &Patch, patch_index: u8) -> Result<Vec<u8>> {
        let image = self.image(patch)?;
        let mut out = bulk_marker(true, patch_index);
        out.extend(bulk_frame(Address::common(0), image.region(Region::Common)));
        out.extend(bulk_frame(Address::effect(0), image.region(Region::Effect)));
        out.extend(bulk_marker(false, patch_index));
        Ok(out)
    }

    // ------------------------------------------------------------------------
    // Decoding
    // ------------------------------------------------------------------------

    /// Decode a stream of parameter writes and/or bulk frames into a patch
    pub fn decode(&self, bytes: &[u8]) -> Result<Patch> {
        let mut image = PatchImage::default();
        for frame in split_frames(bytes)? {
            match decode_frame(frame)? {
                DecodedFrame::Parameter { address, payload }
                | DecodedFrame::Bulk { address, payload } => image.write(address, &payload)?,
                DecodedFrame::BulkMarker { .. } => {}
            }
        }
        Ok(self.patch_from_image(&image))
    }

    /// Map every fully written field of a memory image back to a patch
    pub fn patch_from_image(&self, image: &PatchImage) -> Patch {
        let mut patch = Patch::default();
        for spec in self.table {
            let Some(bytes) = image.field(spec) else {
                continue;
            };
            match spec.field {
                Field::Name => {
                    let name: String = bytes.iter().map(|b| *b as char).collect();
                    patch.meta.name = name.trim_end_matches(|c| c == ' ' || c == '\0').to_string();
                }
                Field::Enabled(section) => {
                    patch.section_entry(section).enabled = bytes[0] != 0;
                }
                Field::Param(section, key) => {
                    let raw = unpack7(bytes);
                    let value = match spec.scaling {
                        Scaling::Choice(choices) => choices
                            .iter()
                            .find(|(_, id)| *id as u32 == raw)
                            .map(|(name, _)| ParamValue::Text(name.to_string()))
                            .unwrap_or(ParamValue::Number(raw as f64)),
                        Scaling::Flag => ParamValue::Number(raw.min(1) as f64),
                        _ => match spec.from_raw(raw) {
                            Some(v) => ParamValue::Number(v),
                            None => continue,
                        },
                    };
                    patch
                        .section_entry(section)
                        .params
                        .insert(key.to_string(), value);
                }
            }
        }
        patch
    }
}

// ============================================================================
// Encoding helpers
// ============================================================================

fn invalid(spec: &FieldSpec, reason: &str) -> ProtocolError {
    ProtocolError::InvalidValue {
        field: spec.field.to_string(),
        reason: reason.to_string(),
    }
}

/// Raw bytes of a field, or `None` when the patch does not carry it
fn field_bytes(spec: &FieldSpec, patch: &Patch) -> std::result::Result<Option<Vec<u8>>, ProtocolError> {
    match spec.field {
        Field::Name => {
            let mut bytes = Vec::with_capacity(NAME_LENGTH);
            for c in patch.name().chars().take(NAME_LENGTH) {
                if !(' '..='~').contains(&c) {
                    return Err(invalid(spec, "patch names are printable ASCII"));
                }
                bytes.push(c as u8);
            }
            bytes.resize(NAME_LENGTH, b' ');
            Ok(Some(bytes))
        }
        Field::Enabled(section) => Ok(patch
            .section(section)
            .map(|s| vec![u8::from(s.enabled)])),
        Field::Param(section, key) => {
            let Some(value) = patch.value(section, key) else {
                return Ok(None);
            };
            let raw = match (spec.scaling, value) {
                (Scaling::Linear { .. } | Scaling::Log { .. }, ParamValue::Number(v)) => {
                    if !v.is_finite() {
                        return Err(invalid(spec, "value is not finite"));
                    }
                    spec.to_raw(*v).ok_or_else(|| invalid(spec, "not a continuous field"))?
                }
                (Scaling::Choice(choices), ParamValue::Text(name)) => choices
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(name))
                    .map(|(_, id)| *id as u32)
                    .ok_or_else(|| invalid(spec, &format!("unknown choice '{}'", name)))?,
                (Scaling::Choice(_), ParamValue::Number(id)) if *id >= 0.0 => {
                    (*id as u32).min(spec.raw_max())
                }
                (Scaling::Flag, ParamValue::Number(v)) => u32::from(*v != 0.0),
                (Scaling::Flag, ParamValue::Other(serde_json::Value::Bool(b))) => u32::from(*b),
                _ => return Err(invalid(spec, "value has the wrong type")),
            };
            Ok(Some(pack7(raw, spec.width)))
        }
    }
}

/// Frames carrying `bytes` for one field.
///
/// Text fields become one frame per character; when `previous` is given
/// only the characters that differ are sent.
fn field_frames(spec: &FieldSpec, bytes: &[u8], previous: Option<&[u8]>) -> Vec<Frame> {
    match spec.scaling {
        Scaling::Text => bytes
            .iter()
            .enumerate()
            .filter(|(i, b)| previous.map_or(true, |p| p.get(*i) != Some(*b)))
            .map(|(i, b)| {
                let address = Address {
                    region: spec.address.region,
                    offset: spec.address.offset + i as u8,
                };
                parameter_frame(address, &[*b])
            })
            .collect(),
        _ => vec![parameter_frame(spec.address, bytes)],
    }
}

/// Build a single parameter-write frame
pub fn parameter_frame(address: Address, payload: &[u8]) -> Frame {
    let mut covered = Vec::with_capacity(3 + payload.len());
    covered.push(CMD_PARAMETER);
    covered.push(address.region.byte());
    covered.push(address.offset);
    covered.extend_from_slice(payload);

    let mut bytes = Vec::with_capacity(PARAM_HEADER.len() + covered.len() + 2);
    bytes.extend_from_slice(&PARAM_HEADER);
    bytes.extend_from_slice(&covered);
    bytes.push(checksum(&covered));
    bytes.push(SYSEX_END);

    Frame {
        bytes,
        address: Some(address),
    }
}

fn bulk_frame(address: Address, payload: &[u8]) -> Vec<u8> {
    let mut covered = pack7(payload.len() as u32, 2);
    covered.push(CMD_PARAMETER);
    covered.push(address.region.byte());
    covered.push(address.offset);
    covered.extend_from_slice(payload);

    let mut bytes = BULK_HEADER.to_vec();
    bytes.extend_from_slice(&covered);
    bytes.push(checksum(&covered));
    bytes.push(SYSEX_END);
    bytes
}

fn bulk_marker(start: bool, patch_index: u8) -> Vec<u8> {
    let sub = if start { BULK_START } else { BULK_END };
    let covered = [0x00, 0x00, CMD_BULK_MARKER, sub, patch_index & 0x7F];

    let mut bytes = BULK_HEADER.to_vec();
    bytes.extend_from_slice(&covered);
    bytes.push(checksum(&covered));
    bytes.push(SYSEX_END);
    bytes
}

/// Request the unit to dump patch `patch_index`
pub fn dump_request(patch_index: u8) -> Vec<u8> {
    let mut bytes = DUMP_REQUEST_HEADER.to_vec();
    bytes.push(patch_index & 0x7F);
    bytes.push(SYSEX_END);
    bytes
}

/// Patch index of a dump request, if `bytes` is one
pub fn parse_dump_request(bytes: &[u8]) -> Option<u8> {
    match bytes {
        [head @ .., index, SYSEX_END]
            if head == DUMP_REQUEST_HEADER.as_slice() && *index < 0x80 =>
        {
            Some(*index)
        }
        _ => None,
    }
}

// ============================================================================
// Decoding helpers
// ============================================================================

/// Split a byte stream into `F0 .. F7` frames
pub fn split_frames(bytes: &[u8]) -> std::result::Result<Vec<&[u8]>, ProtocolError> {
    let mut frames = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        if rest[0] != SYSEX_START {
            return Err(ProtocolError::MissingStart);
        }
        let end = rest
            .iter()
            .position(|b| *b == SYSEX_END)
            .ok_or(ProtocolError::MissingTerminator)?;
        frames.push(&rest[..=end]);
        rest = &rest[end + 1..];
    }
    Ok(frames)
}

fn verify_checksum(covered: &[u8], found: u8) -> std::result::Result<(), ProtocolError> {
    let expected = checksum(covered);
    if expected != found {
        return Err(ProtocolError::ChecksumMismatch { expected, found });
    }
    Ok(())
}

fn region_address(section: u8, offset: u8, len: usize) -> std::result::Result<Address, ProtocolError> {
    let region = Region::from_byte(section).ok_or(ProtocolError::UnknownSection(section))?;
    if offset as usize + len > region.len() {
        return Err(ProtocolError::OffsetOutOfRange {
            offset: offset as usize,
            len,
            region: region.len(),
        });
    }
    Ok(Address { region, offset })
}

/// Validate and parse exactly one frame
pub fn decode_frame(bytes: &[u8]) -> std::result::Result<DecodedFrame, ProtocolError> {
    if bytes.len() < 2 {
        return Err(ProtocolError::Truncated { len: bytes.len() });
    }
    if bytes[0] != SYSEX_START {
        return Err(ProtocolError::MissingStart);
    }
    if bytes[bytes.len() - 1] != SYSEX_END {
        return Err(ProtocolError::MissingTerminator);
    }

    let body = &bytes[1..bytes.len() - 1];
    if let Some(i) = body.iter().position(|b| b & 0x80 != 0) {
        return Err(ProtocolError::InvalidDataByte {
            index: i + 1,
            byte: body[i],
        });
    }

    if let Some(rest) = body.strip_prefix(&PARAM_HEADER[1..]) {
        // command, section, offset, payload (>= 1), checksum
        if rest.len() < 5 {
            return Err(ProtocolError::Truncated { len: bytes.len() });
        }
        let (covered, found) = rest.split_at(rest.len() - 1);
        if covered[0] != CMD_PARAMETER {
            return Err(ProtocolError::UnknownCommand(covered[0]));
        }
        verify_checksum(covered, found[0])?;

        let payload = &covered[3..];
        let address = region_address(covered[1], covered[2], payload.len())?;
        if let Some(declared) = frame_width(address) {
            if declared != payload.len() {
                return Err(ProtocolError::LengthMismatch {
                    declared,
                    actual: payload.len(),
                });
            }
        }
        return Ok(DecodedFrame::Parameter {
            address,
            payload: payload.to_vec(),
        });
    }

    if let Some(rest) = body.strip_prefix(&BULK_HEADER[1..]) {
        // len_hi, len_lo, command, two bytes, checksum
        if rest.len() < 6 {
            return Err(ProtocolError::Truncated { len: bytes.len() });
        }
        let (covered, found) = rest.split_at(rest.len() - 1);
        verify_checksum(covered, found[0])?;

        let declared = unpack7(&covered[..2]) as usize;
        match covered[2] {
            CMD_BULK_MARKER if declared == 0 => {
                if covered.len() != 5 {
                    return Err(ProtocolError::LengthMismatch {
                        declared: 0,
                        actual: covered.len() - 5,
                    });
                }
                let start = match covered[3] {
                    BULK_START => true,
                    BULK_END => false,
                    other => return Err(ProtocolError::UnknownCommand(other)),
                };
                Ok(DecodedFrame::BulkMarker {
                    start,
                    patch_index: covered[4],
                })
            }
            CMD_PARAMETER => {
                let payload = &covered[5..];
                if payload.len() != declared {
                    return Err(ProtocolError::LengthMismatch {
                        declared,
                        actual: payload.len(),
                    });
                }
                let address = region_address(covered[3], covered[4], payload.len())?;
                Ok(DecodedFrame::Bulk {
                    address,
                    payload: payload.to_vec(),
                })
            }
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    } else {
        Err(ProtocolError::UnknownHeader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::model::{Section, SectionId};
    use pretty_assertions::assert_eq;

    fn sample_patch() -> Patch {
        Patch::new("Crunch")
            .with_section(
                SectionId::Amp,
                Section::new(true)
                    .with("model", "JCM800")
                    .with("gain", 0.6)
                    .with("treble", 0.5),
            )
            .with_section(
                SectionId::Delay,
                Section::new(true)
                    .with("time_ms", 350.0)
                    .with("feedback", 0.3)
                    .with("mix", 0.2),
            )
    }

    #[test]
    fn test_checksum_definition() {
        // 0x20 + 0x01 + 0x4E + 0x19 = 0x88; -0x88 & 0x7F = 0x78
        assert_eq!(checksum(&[0x20, 0x01, 0x4E, 0x19]), 0x78);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_parameter_frame_layout() {
        let frame = parameter_frame(Address::effect(78), &[25]);
        assert_eq!(
            frame.bytes(),
            &[0xF0, 0x43, 0x7D, 0x40, 0x55, 0x42, 0x20, 0x01, 78, 25, 0x78, 0xF7]
        );
        assert_eq!(frame.address(), Some(Address::effect(78)));
    }

    #[test]
    fn test_name_is_sent_one_character_per_frame() {
        let codec = PatchCodec::new();
        let frames = codec.encode_field(&sample_patch(), Field::Name).unwrap();
        assert_eq!(frames.len(), NAME_LENGTH);
        assert!(frames.iter().all(|f| f.len() == PARAM_HEADER.len() + 6));
    }

    #[test]
    fn test_diff_only_sends_changes() {
        let codec = PatchCodec::new();
        let a = sample_patch();
        let b = a.with_number(SectionId::Delay, "mix", 0.5);

        let frames = codec.encode_diff(&a, &b).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].address(), Some(Address::effect(78)));

        let renamed = a.with_name("Crunchy");
        let frames = codec.encode_diff(&a, &renamed).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_decode_reproduces_quantized_values() {
        let codec = PatchCodec::new();
        let patch = sample_patch();
        let bytes = concat(&codec.encode(&patch).unwrap());
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(decoded.name(), "Crunch");
        assert_eq!(
            decoded.value(SectionId::Amp, "model"),
            Some(&ParamValue::Text("JCM800".into()))
        );
        let mix = crate::patch::table::lookup_param(SectionId::Delay, "mix").unwrap();
        assert_eq!(
            decoded.number(SectionId::Delay, "mix"),
            mix.quantize(0.2)
        );
        assert!(decoded.delay.as_ref().unwrap().enabled);
        assert!(decoded.reverb.is_none());
    }

    #[test]
    fn test_unknown_choice_rejected() {
        let codec = PatchCodec::new();
        let patch = sample_patch().with_value(SectionId::Amp, "model", "NOT_AN_AMP");
        let err = codec.encode(&patch).unwrap_err();
        assert_eq!(err.error_code(), "PROTOCOL_ERROR");
    }

    #[test]
    fn test_bulk_dump_round_trip() {
        let codec = PatchCodec::new();
        let patch = sample_patch();
        let dump = codec.encode_bulk(&patch, 5).unwrap();

        let frames = split_frames(&dump).unwrap();
        assert_eq!(frames.len(), 4);
        assert_eq!(
            decode_frame(frames[0]).unwrap(),
            DecodedFrame::BulkMarker {
                start: true,
                patch_index: 5
            }
        );

        let decoded = codec.decode(&dump).unwrap();
        assert_eq!(decoded.name(), "Crunch");
        assert_eq!(decoded.number(SectionId::Amp, "gain"), Some(76.0 / 127.0));
        // sections absent from the source patch come back switched off
        assert!(!decoded.reverb.as_ref().unwrap().enabled);
    }

    #[test]
    fn test_bulk_length_mismatch() {
        let mut frame = bulk_frame(Address::effect(0), &[1, 2, 3]);
        // declare 4 bytes instead of 3 and fix the checksum
        frame[9] = 4;
        let n = frame.len();
        frame[n - 2] = checksum(&frame[8..n - 2]);
        assert_eq!(
            decode_frame(&frame),
            Err(ProtocolError::LengthMismatch {
                declared: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_parameter_width_enforced() {
        // delay time is two bytes wide
        let frame = parameter_frame(Address::effect(74), &[0x10]);
        assert_eq!(
            decode_frame(frame.bytes()),
            Err(ProtocolError::LengthMismatch {
                declared: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_dump_request_round_trip() {
        let request = dump_request(12);
        assert_eq!(parse_dump_request(&request), Some(12));
        assert_eq!(parse_dump_request(&request[1..]), None);
        assert_eq!(decode_frame(&request), Err(ProtocolError::UnknownHeader));
    }
}
