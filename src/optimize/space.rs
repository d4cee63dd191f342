//! Parameter search space
//!
//! Bounds, initial step, step decay and resolution floor for every patch
//! parameter the optimizer is allowed to move.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, StompError};
use crate::patch::{Patch, SectionId};

fn default_step_decay() -> f64 {
    0.5
}

/// Search bounds for one patch parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Unique name used in logs and reports, e.g. `delay_mix`
    pub name: String,
    pub section: SectionId,
    /// Parameter key inside the section
    pub key: String,
    pub min: f64,
    pub max: f64,
    pub initial_step: f64,
    #[serde(default = "default_step_decay")]
    pub step_decay: f64,
    /// Steps below this are not worth trying; one device unit when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_step: Option<f64>,
    /// Value used when building a fresh patch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,
    #[serde(default)]
    pub units: String,
}

impl ParameterSpec {
    pub fn new(name: &str, section: SectionId, key: &str, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: name.to_string(),
            section,
            key: key.to_string(),
            min,
            max,
            initial_step: step,
            step_decay: default_step_decay(),
            min_step: None,
            default: None,
            units: String::new(),
        }
    }

    pub fn with_default(mut self, value: f64) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = units.to_string();
        self
    }

    pub fn with_step_decay(mut self, decay: f64) -> Self {
        self.step_decay = decay;
        self
    }

    pub fn with_min_step(mut self, min_step: f64) -> Self {
        self.min_step = Some(min_step);
        self
    }

    /// Resolution floor for this parameter's step
    pub fn min_step(&self) -> f64 {
        self.min_step.unwrap_or((self.max - self.min) / 127.0)
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Current value of this parameter in `patch`
    pub fn resolve(&self, patch: &Patch) -> Result<f64> {
        patch
            .number(self.section, &self.key)
            .ok_or_else(|| StompError::MissingParameter {
                section: self.section.to_string(),
                key: self.key.clone(),
            })
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let fail = |reason: &str| ConfigError::InvalidParameter {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if !(self.min.is_finite() && self.max.is_finite()) || self.min > self.max {
            return Err(fail("min must not exceed max"));
        }
        if !(self.initial_step > 0.0) {
            return Err(fail("initial step must be positive"));
        }
        if !(self.step_decay > 0.0 && self.step_decay <= 1.0) {
            return Err(fail("step decay must be within (0, 1]"));
        }
        if let Some(min_step) = self.min_step {
            if !(min_step > 0.0) {
                return Err(fail("min step must be positive"));
            }
        }
        if let Some(default) = self.default {
            if default < self.min || default > self.max {
                return Err(fail("default lies outside [min, max]"));
            }
        }
        Ok(())
    }
}

/// Ordered set of searchable parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpace {
    specs: Vec<ParameterSpec>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self {
            specs: Self::default_specs(),
        }
    }
}

impl ParameterSpace {
    /// Validate and build a space; names must be unique
    pub fn new(specs: Vec<ParameterSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for spec in &specs {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateParameter(spec.name.clone()).into());
            }
        }
        Ok(Self { specs })
    }

    /// The parameters a typical amp-multi tone match moves
    pub fn default_specs() -> Vec<ParameterSpec> {
        use SectionId::*;
        vec![
            ParameterSpec::new("delay_mix", Delay, "mix", 0.0, 1.0, 0.08).with_default(0.2),
            ParameterSpec::new("delay_feedback", Delay, "feedback", 0.0, 0.95, 0.10)
                .with_default(0.3),
            ParameterSpec::new("delay_time_ms", Delay, "time_ms", 30.0, 1500.0, 25.0)
                .with_default(300.0)
                .with_units("ms"),
            ParameterSpec::new("reverb_mix", Reverb, "mix", 0.0, 1.0, 0.06).with_default(0.15),
            ParameterSpec::new("reverb_decay_s", Reverb, "decay_s", 0.1, 3.0, 0.4)
                .with_default(1.5)
                .with_units("s"),
            ParameterSpec::new("treble", Amp, "treble", 0.0, 1.0, 0.10).with_default(0.5),
            ParameterSpec::new("presence", Amp, "presence", 0.0, 1.0, 0.10).with_default(0.5),
            ParameterSpec::new("gain", Amp, "gain", 0.0, 1.0, 0.08).with_default(0.5),
            ParameterSpec::new("mod_depth", Modulation, "depth", 0.0, 1.0, 0.10)
                .with_default(0.35),
            ParameterSpec::new("mod_rate_hz", Modulation, "rate_hz", 0.1, 10.0, 0.2)
                .with_default(0.8)
                .with_units("Hz"),
            ParameterSpec::new("mod_mix", Modulation, "mix", 0.0, 1.0, 0.08).with_default(0.18),
        ]
    }

    pub fn specs(&self) -> &[ParameterSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.specs.iter().position(|s| s.name == name)
    }

    /// Clamp a value into a named parameter's bounds
    pub fn clamp(&self, name: &str, value: f64) -> Option<f64> {
        self.get(name).map(|s| s.clamp(value))
    }

    /// Every parameter must resolve to a number inside the patch
    pub fn check_patch(&self, patch: &Patch) -> Result<()> {
        for spec in &self.specs {
            spec.resolve(patch)?;
        }
        Ok(())
    }

    /// A patch with every parameter at its default (or range midpoint)
    pub fn default_patch(&self, name: &str) -> Patch {
        self.specs.iter().fold(Patch::new(name), |patch, spec| {
            let value = spec.default.unwrap_or((spec.min + spec.max) / 2.0);
            patch.with_number(spec.section, &spec.key, value)
        })
    }

    /// Musically doubtful parameter combinations. Advisory only.
    pub fn relationship_warnings(&self, patch: &Patch) -> Vec<String> {
        let mut warnings = Vec::new();
        let get = |section, key| patch.number(section, key);

        if let (Some(feedback), Some(mix)) =
            (get(SectionId::Delay, "feedback"), get(SectionId::Delay, "mix"))
        {
            if feedback > 0.8 && mix < 0.1 {
                warnings.push("High delay feedback with low mix may be inaudible".to_string());
            }
        }
        if let (Some(rate), Some(depth)) = (
            get(SectionId::Modulation, "rate_hz"),
            get(SectionId::Modulation, "depth"),
        ) {
            if rate > 8.0 && depth > 0.8 {
                warnings.push("Very fast, deep modulation may sound unnatural".to_string());
            }
        }
        if let (Some(decay), Some(mix)) =
            (get(SectionId::Reverb, "decay_s"), get(SectionId::Reverb, "mix"))
        {
            if decay > 2.5 && mix > 0.7 {
                warnings.push("Long reverb decay with high mix may muddy the sound".to_string());
            }
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_default_space_is_valid() {
        let space = ParameterSpace::new(ParameterSpace::default_specs()).unwrap();
        assert_eq!(space.len(), 11);
        assert_eq!(space.index_of("delay_mix"), Some(0));
        assert!(space.check_patch(&space.default_patch("Default")).is_ok());
    }

    #[test]
    fn test_missing_parameter_detected() {
        let space = ParameterSpace::default();
        let patch = space.default_patch("x").with_value(SectionId::Delay, "mix", "loud");
        let err = space.check_patch(&patch).unwrap_err();
        assert_eq!(err.error_code(), "MISSING_PARAMETER");
    }

    #[test_case(0.0, 1.0, 0.0, 0.5 ; "zero step")]
    #[test_case(1.0, 0.0, 0.1, 0.5 ; "inverted bounds")]
    #[test_case(0.0, 1.0, 0.1, 0.0 ; "zero decay")]
    #[test_case(0.0, 1.0, 0.1, 1.5 ; "decay above one")]
    fn test_invalid_specs_rejected(min: f64, max: f64, step: f64, decay: f64) {
        let spec = ParameterSpec::new("p", SectionId::Amp, "gain", min, max, step)
            .with_step_decay(decay);
        assert!(ParameterSpace::new(vec![spec]).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let spec = ParameterSpec::new("p", SectionId::Amp, "gain", 0.0, 1.0, 0.1);
        assert!(ParameterSpace::new(vec![spec.clone(), spec]).is_err());
    }

    #[test]
    fn test_clamp_and_floor() {
        let space = ParameterSpace::default();
        assert_eq!(space.clamp("delay_feedback", 1.2), Some(0.95));
        assert_eq!(space.clamp("delay_mix", -0.3), Some(0.0));
        assert_eq!(space.clamp("nope", 0.3), None);

        let time = space.get("delay_time_ms").unwrap();
        assert!((time.min_step() - 1470.0 / 127.0).abs() < 1e-12);
    }

    #[test]
    fn test_relationship_warnings() {
        let space = ParameterSpace::default();
        let patch = space
            .default_patch("x")
            .with_number(SectionId::Delay, "feedback", 0.9)
            .with_number(SectionId::Delay, "mix", 0.05);
        assert_eq!(space.relationship_warnings(&patch).len(), 1);
        assert!(space
            .relationship_warnings(&space.default_patch("y"))
            .is_empty());
    }
}
