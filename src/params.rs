//! Tunable channel parameters and their per-ear override model
//!
//! Every ear's effective value for a field is its override if one is set,
//! otherwise the base value. Edits go through [`StereoParameters::apply`],
//! the single mutation entry point used by the engine facade.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::audio::noise::NoiseType;

pub const VOLUME_RANGE: RangeInclusive<f32> = 0.0..=1.0;
pub const CENTER_FREQUENCY_RANGE: RangeInclusive<f32> = 20.0..=20_000.0;
/// Narrower center range offered to interactive editors
pub const UI_CENTER_FREQUENCY_RANGE: RangeInclusive<f32> = 2_000.0..=12_000.0;
pub const BANDWIDTH_RANGE: RangeInclusive<f32> = 0.3..=2.0;

/// Clamp an editor-supplied center frequency into [`UI_CENTER_FREQUENCY_RANGE`].
/// NaN passes through so the engine can reject it.
pub fn clamp_to_ui_center(hz: f32) -> f32 {
    if hz.is_nan() {
        return hz;
    }
    hz.clamp(*UI_CENTER_FREQUENCY_RANGE.start(), *UI_CENTER_FREQUENCY_RANGE.end())
}

/// Physical output channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ear {
    Left,
    Right,
}

impl Ear {
    pub const BOTH: [Ear; 2] = [Ear::Left, Ear::Right];

    /// Interleaved slot index in a stereo frame
    #[inline]
    pub fn slot(self) -> usize {
        match self {
            Ear::Left => 0,
            Ear::Right => 1,
        }
    }
}

/// Which ear the editing UI currently targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarSelector {
    #[default]
    Both,
    Left,
    Right,
}

impl EarSelector {
    pub fn ear(self) -> Option<Ear> {
        match self {
            EarSelector::Both => None,
            EarSelector::Left => Some(Ear::Left),
            EarSelector::Right => Some(Ear::Right),
        }
    }
}

impl From<Ear> for EarSelector {
    fn from(ear: Ear) -> Self {
        match ear {
            Ear::Left => EarSelector::Left,
            Ear::Right => EarSelector::Right,
        }
    }
}

impl std::str::FromStr for EarSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(EarSelector::Both),
            "left" => Ok(EarSelector::Left),
            "right" => Ok(EarSelector::Right),
            other => Err(format!("Unknown ear '{}'", other)),
        }
    }
}

/// A complete set of values for one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelParameters {
    pub noise_type: NoiseType,
    pub volume: f32,
    pub center_frequency: f32,
    pub bandwidth: f32,
}

impl Default for ChannelParameters {
    fn default() -> Self {
        Self {
            noise_type: NoiseType::White,
            volume: 0.2,
            center_frequency: 8000.0,
            bandwidth: 1.0,
        }
    }
}

impl ChannelParameters {
    pub fn is_valid(&self) -> bool {
        ParamField::ALL.iter().all(|f| self.get(*f).is_valid())
    }

    pub fn get(&self, field: ParamField) -> ParamValue {
        match field {
            ParamField::NoiseType => ParamValue::NoiseType(self.noise_type),
            ParamField::Volume => ParamValue::Volume(self.volume),
            ParamField::CenterFrequency => ParamValue::CenterFrequency(self.center_frequency),
            ParamField::Bandwidth => ParamValue::Bandwidth(self.bandwidth),
        }
    }

    fn set(&mut self, value: ParamValue) {
        match value {
            ParamValue::NoiseType(v) => self.noise_type = v,
            ParamValue::Volume(v) => self.volume = v,
            ParamValue::CenterFrequency(v) => self.center_frequency = v,
            ParamValue::Bandwidth(v) => self.bandwidth = v,
        }
    }
}

/// Sparse per-ear replacement of base values; each field is independent
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_type: Option<NoiseType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_frequency: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<f32>,
}

impl ChannelOverride {
    /// Every set override lies in its field's range
    pub fn is_valid(&self) -> bool {
        ParamField::ALL
            .iter()
            .filter_map(|f| self.get(*f))
            .all(ParamValue::is_valid)
    }

    pub fn is_empty(&self) -> bool {
        self.noise_type.is_none()
            && self.volume.is_none()
            && self.center_frequency.is_none()
            && self.bandwidth.is_none()
    }

    pub fn get(&self, field: ParamField) -> Option<ParamValue> {
        match field {
            ParamField::NoiseType => self.noise_type.map(ParamValue::NoiseType),
            ParamField::Volume => self.volume.map(ParamValue::Volume),
            ParamField::CenterFrequency => self.center_frequency.map(ParamValue::CenterFrequency),
            ParamField::Bandwidth => self.bandwidth.map(ParamValue::Bandwidth),
        }
    }

    /// Fold this override over `base`
    pub fn resolve(&self, base: &ChannelParameters) -> ChannelParameters {
        ChannelParameters {
            noise_type: self.noise_type.unwrap_or(base.noise_type),
            volume: self.volume.unwrap_or(base.volume),
            center_frequency: self.center_frequency.unwrap_or(base.center_frequency),
            bandwidth: self.bandwidth.unwrap_or(base.bandwidth),
        }
    }

    fn set(&mut self, value: ParamValue) {
        match value {
            ParamValue::NoiseType(v) => self.noise_type = Some(v),
            ParamValue::Volume(v) => self.volume = Some(v),
            ParamValue::CenterFrequency(v) => self.center_frequency = Some(v),
            ParamValue::Bandwidth(v) => self.bandwidth = Some(v),
        }
    }

    fn clear(&mut self, field: ParamField) {
        match field {
            ParamField::NoiseType => self.noise_type = None,
            ParamField::Volume => self.volume = None,
            ParamField::CenterFrequency => self.center_frequency = None,
            ParamField::Bandwidth => self.bandwidth = None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamField {
    NoiseType,
    Volume,
    CenterFrequency,
    Bandwidth,
}

impl ParamField {
    pub const ALL: [ParamField; 4] = [
        ParamField::NoiseType,
        ParamField::Volume,
        ParamField::CenterFrequency,
        ParamField::Bandwidth,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    NoiseType(NoiseType),
    Volume(f32),
    CenterFrequency(f32),
    Bandwidth(f32),
}

impl ParamValue {
    pub fn field(&self) -> ParamField {
        match self {
            ParamValue::NoiseType(_) => ParamField::NoiseType,
            ParamValue::Volume(_) => ParamField::Volume,
            ParamValue::CenterFrequency(_) => ParamField::CenterFrequency,
            ParamValue::Bandwidth(_) => ParamField::Bandwidth,
        }
    }

    /// Whether the value already lies in its field's range
    pub fn is_valid(self) -> bool {
        self.sanitized() == Some(self)
    }

    /// Clamp into the field's valid range; None for NaN
    pub fn sanitized(self) -> Option<Self> {
        fn clamp(v: f32, range: RangeInclusive<f32>) -> Option<f32> {
            if v.is_nan() {
                None
            } else {
                Some(v.clamp(*range.start(), *range.end()))
            }
        }

        match self {
            ParamValue::NoiseType(_) => Some(self),
            ParamValue::Volume(v) => clamp(v, VOLUME_RANGE).map(ParamValue::Volume),
            ParamValue::CenterFrequency(v) => {
                clamp(v, CENTER_FREQUENCY_RANGE).map(ParamValue::CenterFrequency)
            }
            ParamValue::Bandwidth(v) => clamp(v, BANDWIDTH_RANGE).map(ParamValue::Bandwidth),
        }
    }
}

/// One edit of the live parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterChange {
    /// Write `value` for `target`: base for Both, the ear's override otherwise
    Set { target: EarSelector, value: ParamValue },
    /// Drop one override so the ear inherits base again
    Clear { ear: Ear, field: ParamField },
}

impl ParameterChange {
    pub fn set(target: EarSelector, value: ParamValue) -> Self {
        Self::Set { target, value }
    }

    pub fn clear(ear: Ear, field: ParamField) -> Self {
        Self::Clear { ear, field }
    }

    pub fn field(&self) -> ParamField {
        match self {
            ParameterChange::Set { value, .. } => value.field(),
            ParameterChange::Clear { field, .. } => *field,
        }
    }

    /// Whether applying this change must restart the generators
    pub fn affects_noise_type(&self) -> bool {
        self.field() == ParamField::NoiseType
    }
}

/// Base values plus both ears' overrides: the live working copy
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StereoParameters {
    pub base: ChannelParameters,
    pub left: ChannelOverride,
    pub right: ChannelOverride,
}

impl StereoParameters {
    pub fn new(base: ChannelParameters) -> Self {
        Self {
            base,
            left: ChannelOverride::default(),
            right: ChannelOverride::default(),
        }
    }

    pub fn override_for(&self, ear: Ear) -> &ChannelOverride {
        match ear {
            Ear::Left => &self.left,
            Ear::Right => &self.right,
        }
    }

    fn override_for_mut(&mut self, ear: Ear) -> &mut ChannelOverride {
        match ear {
            Ear::Left => &mut self.left,
            Ear::Right => &mut self.right,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.base.is_valid() && self.left.is_valid() && self.right.is_valid()
    }

    /// Values the render path uses for `ear`
    pub fn effective(&self, ear: Ear) -> ChannelParameters {
        self.override_for(ear).resolve(&self.base)
    }

    /// Values shown to an editor focused on `selector`
    pub fn active(&self, selector: EarSelector) -> ChannelParameters {
        match selector.ear() {
            None => self.base,
            Some(ear) => self.effective(ear),
        }
    }

    pub fn effective_value(&self, field: ParamField, ear: Ear) -> ParamValue {
        self.override_for(ear)
            .get(field)
            .unwrap_or_else(|| self.base.get(field))
    }

    /// Apply an edit. Returns false if the value was rejected and nothing changed.
    pub fn apply(&mut self, change: &ParameterChange) -> bool {
        match *change {
            ParameterChange::Set { target, value } => {
                let Some(value) = value.sanitized() else {
                    return false;
                };
                match target.ear() {
                    None => self.base.set(value),
                    Some(ear) => self.override_for_mut(ear).set(value),
                }
                true
            }
            ParameterChange::Clear { ear, field } => {
                self.override_for_mut(ear).clear(field);
                true
            }
        }
    }

    /// Drop every override of `ear`
    pub fn clear_overrides(&mut self, ear: Ear) {
        *self.override_for_mut(ear) = ChannelOverride::default();
    }
}
