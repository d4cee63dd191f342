//! Typed patch schema
//!
//! A patch is a closed set of known effect sections plus a passthrough
//! bucket for anything this crate does not understand. Unknown keys are
//! never encoded to the device, but they survive JSON round trips and every
//! edit the optimizer makes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StompError};

/// The effect blocks of the unit's amp-multi patch type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionId {
    Booster,
    Amp,
    Modulation,
    Delay,
    Reverb,
}

impl SectionId {
    pub const ALL: [SectionId; 5] = [
        SectionId::Booster,
        SectionId::Amp,
        SectionId::Modulation,
        SectionId::Delay,
        SectionId::Reverb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionId::Booster => "booster",
            SectionId::Amp => "amp",
            SectionId::Modulation => "modulation",
            SectionId::Delay => "delay",
            SectionId::Reverb => "reverb",
        }
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single parameter value as stored in patch JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
    /// Anything else (flags, nested objects) kept verbatim
    Other(Value),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

fn default_enabled() -> bool {
    true
}

/// One effect block: an enable flag and its named parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub params: BTreeMap<String, ParamValue>,
}

impl Default for Section {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Section {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            params: BTreeMap::new(),
        }
    }

    /// Builder-style parameter insertion
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(ParamValue::as_f64)
    }
}

/// Patch metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PatchMeta {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A complete device configuration.
///
/// Patches are values: every edit returns a new patch and leaves the
/// original untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default)]
    pub meta: PatchMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booster: Option<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amp: Option<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulation: Option<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverb: Option<Section>,
    /// Unknown top-level keys, preserved verbatim
    #[serde(flatten)]
    pub passthrough: BTreeMap<String, Value>,
}

/// A numeric difference between two patches
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterChange {
    pub section: SectionId,
    pub key: String,
    pub from: Option<f64>,
    pub to: Option<f64>,
}

impl Patch {
    /// Create an empty patch with the given name
    pub fn new(name: &str) -> Self {
        Self {
            meta: PatchMeta {
                name: name.to_string(),
                extra: BTreeMap::new(),
            },
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn section(&self, id: SectionId) -> Option<&Section> {
        match id {
            SectionId::Booster => self.booster.as_ref(),
            SectionId::Amp => self.amp.as_ref(),
            SectionId::Modulation => self.modulation.as_ref(),
            SectionId::Delay => self.delay.as_ref(),
            SectionId::Reverb => self.reverb.as_ref(),
        }
    }

    fn slot_mut(&mut self, id: SectionId) -> &mut Option<Section> {
        match id {
            SectionId::Booster => &mut self.booster,
            SectionId::Amp => &mut self.amp,
            SectionId::Modulation => &mut self.modulation,
            SectionId::Delay => &mut self.delay,
            SectionId::Reverb => &mut self.reverb,
        }
    }

    /// Mutable access to a section, creating it enabled if absent
    pub(crate) fn section_entry(&mut self, id: SectionId) -> &mut Section {
        self.slot_mut(id).get_or_insert_with(Section::default)
    }

    pub fn value(&self, id: SectionId, key: &str) -> Option<&ParamValue> {
        self.section(id).and_then(|s| s.get(key))
    }

    pub fn number(&self, id: SectionId, key: &str) -> Option<f64> {
        self.section(id).and_then(|s| s.number(key))
    }

    /// Builder-style section insertion
    pub fn with_section(mut self, id: SectionId, section: Section) -> Self {
        *self.slot_mut(id) = Some(section);
        self
    }

    /// Return a copy with one parameter replaced.
    ///
    /// A missing section is created enabled.
    pub fn with_value(&self, id: SectionId, key: &str, value: impl Into<ParamValue>) -> Self {
        let mut next = self.clone();
        next.slot_mut(id)
            .get_or_insert_with(Section::default)
            .params
            .insert(key.to_string(), value.into());
        next
    }

    pub fn with_number(&self, id: SectionId, key: &str, value: f64) -> Self {
        self.with_value(id, key, ParamValue::Number(value))
    }

    pub fn with_enabled(&self, id: SectionId, enabled: bool) -> Self {
        let mut next = self.clone();
        next.slot_mut(id).get_or_insert_with(Section::default).enabled = enabled;
        next
    }

    pub fn with_name(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.meta.name = name.to_string();
        next
    }

    /// Numeric parameters whose values differ between `self` and `other`
    pub fn numeric_changes(&self, other: &Patch) -> Vec<ParameterChange> {
        let mut changes = Vec::new();
        for id in SectionId::ALL {
            let mut keys: Vec<&String> = Vec::new();
            if let Some(s) = self.section(id) {
                keys.extend(s.params.keys());
            }
            if let Some(s) = other.section(id) {
                keys.extend(s.params.keys());
            }
            keys.sort();
            keys.dedup();

            for key in keys {
                let from = self.number(id, key);
                let to = other.number(id, key);
                if from != to && (from.is_some() || to.is_some()) {
                    changes.push(ParameterChange {
                        section: id,
                        key: key.clone(),
                        from,
                        to,
                    });
                }
            }
        }
        changes
    }

    // ------------------------------------------------------------------------
    // JSON storage
    // ------------------------------------------------------------------------

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StompError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "meta": {"name": "Lead", "author": "someone"},
        "amp": {"enabled": true, "model": "JCM800", "gain": 0.6, "treble": 0.5},
        "delay": {"enabled": false, "mix": 0.2, "tempo_sync": false},
        "cab": {"model": "4x12_VINTAGE"}
    }"#;

    #[test]
    fn test_json_preserves_unknown_keys() {
        let patch = Patch::from_json_str(SAMPLE).unwrap();
        assert_eq!(patch.name(), "Lead");
        assert_eq!(patch.number(SectionId::Amp, "gain"), Some(0.6));
        assert_eq!(
            patch.value(SectionId::Amp, "model"),
            Some(&ParamValue::Text("JCM800".into()))
        );
        assert!(patch.passthrough.contains_key("cab"));
        assert!(patch.meta.extra.contains_key("author"));

        let json = patch.to_json_pretty().unwrap();
        let again = Patch::from_json_str(&json).unwrap();
        assert_eq!(patch, again);
    }

    #[test]
    fn test_non_numeric_values_kept_verbatim() {
        let patch = Patch::from_json_str(SAMPLE).unwrap();
        assert_eq!(
            patch.value(SectionId::Delay, "tempo_sync"),
            Some(&ParamValue::Other(Value::Bool(false)))
        );
        assert!(!patch.delay.as_ref().unwrap().enabled);
    }

    #[test]
    fn test_with_number_is_copy_on_write() {
        let patch = Patch::from_json_str(SAMPLE).unwrap();
        let edited = patch.with_number(SectionId::Delay, "mix", 0.4);

        assert_eq!(patch.number(SectionId::Delay, "mix"), Some(0.2));
        assert_eq!(edited.number(SectionId::Delay, "mix"), Some(0.4));
        assert_eq!(edited.passthrough, patch.passthrough);
    }

    #[test]
    fn test_with_number_creates_missing_section() {
        let patch = Patch::new("x").with_number(SectionId::Reverb, "mix", 0.3);
        let reverb = patch.reverb.as_ref().unwrap();
        assert!(reverb.enabled);
        assert_eq!(reverb.number("mix"), Some(0.3));
    }

    #[test]
    fn test_numeric_changes() {
        let a = Patch::from_json_str(SAMPLE).unwrap();
        let b = a
            .with_number(SectionId::Amp, "gain", 0.7)
            .with_number(SectionId::Reverb, "mix", 0.1);

        let changes = a.numeric_changes(&b);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].section, SectionId::Amp);
        assert_eq!(changes[0].key, "gain");
        assert_eq!(changes[0].to, Some(0.7));
        assert_eq!(changes[1].section, SectionId::Reverb);
        assert_eq!(changes[1].from, None);
    }
}
