//! Presets: named snapshots of the base parameters plus both ears' overrides
//!
//! The collection is persisted as a whole after every mutation through a
//! [`KeyValueStore`]: the ordered preset list under [`PRESETS_KEY`] as a JSON
//! array, and the selected id under [`CURRENT_PRESET_KEY`] as a plain UUID
//! string (empty when nothing is selected).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::audio::noise::NoiseType;
use crate::error::{EngineError, Result};
use crate::params::{ChannelOverride, ChannelParameters, StereoParameters};
use crate::storage::KeyValueStore;

pub const PRESETS_KEY: &str = "savedPresets";
pub const CURRENT_PRESET_KEY: &str = "currentPresetId";
pub const DEFAULT_PRESET_NAME: &str = "Standard";

/// Opaque unique preset identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetId(Uuid);

impl PresetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for PresetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PresetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PresetRecord", into = "PresetRecord")]
pub struct Preset {
    pub id: PresetId,
    pub name: String,
    pub base: ChannelParameters,
    pub left: ChannelOverride,
    pub right: ChannelOverride,
}

impl Preset {
    /// Snapshot `params` under a fresh id
    pub fn new(name: impl Into<String>, params: &StereoParameters) -> Self {
        Self {
            id: PresetId::new(),
            name: name.into(),
            base: params.base,
            left: params.left,
            right: params.right,
        }
    }

    /// The built-in default: white noise, 0.2 volume, 8 kHz, one octave
    pub fn standard() -> Self {
        Self::new(DEFAULT_PRESET_NAME, &StereoParameters::default())
    }

    pub fn parameters(&self) -> StereoParameters {
        StereoParameters {
            base: self.base,
            left: self.left,
            right: self.right,
        }
    }

    fn store(&mut self, params: &StereoParameters) {
        self.base = params.base;
        self.left = params.left;
        self.right = params.right;
    }
}

/// On-disk layout: flat fields, absent overrides omitted
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresetRecord {
    id: PresetId,
    name: String,

    noise_type: NoiseType,
    volume: f32,
    center_frequency: f32,
    bandwidth: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    noise_type_left: Option<NoiseType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    volume_left: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    center_frequency_left: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bandwidth_left: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    noise_type_right: Option<NoiseType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    volume_right: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    center_frequency_right: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bandwidth_right: Option<f32>,
}

impl From<PresetRecord> for Preset {
    fn from(r: PresetRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
            base: ChannelParameters {
                noise_type: r.noise_type,
                volume: r.volume,
                center_frequency: r.center_frequency,
                bandwidth: r.bandwidth,
            },
            left: ChannelOverride {
                noise_type: r.noise_type_left,
                volume: r.volume_left,
                center_frequency: r.center_frequency_left,
                bandwidth: r.bandwidth_left,
            },
            right: ChannelOverride {
                noise_type: r.noise_type_right,
                volume: r.volume_right,
                center_frequency: r.center_frequency_right,
                bandwidth: r.bandwidth_right,
            },
        }
    }
}

impl From<Preset> for PresetRecord {
    fn from(p: Preset) -> Self {
        Self {
            id: p.id,
            name: p.name,
            noise_type: p.base.noise_type,
            volume: p.base.volume,
            center_frequency: p.base.center_frequency,
            bandwidth: p.base.bandwidth,
            noise_type_left: p.left.noise_type,
            volume_left: p.left.volume,
            center_frequency_left: p.left.center_frequency,
            bandwidth_left: p.left.bandwidth,
            noise_type_right: p.right.noise_type,
            volume_right: p.right.volume,
            center_frequency_right: p.right.center_frequency,
            bandwidth_right: p.right.bandwidth,
        }
    }
}

/// Presets in creation order plus the selected one
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresetCollection {
    presets: Vec<Preset>,
    current: Option<PresetId>,
}

impl PresetCollection {
    /// One "Standard" preset, selected
    pub fn with_default() -> Self {
        let preset = Preset::standard();
        Self {
            current: Some(preset.id),
            presets: vec![preset],
        }
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn current_id(&self) -> Option<PresetId> {
        self.current
    }

    pub fn current(&self) -> Option<&Preset> {
        self.current.and_then(|id| self.get(id))
    }

    pub fn get(&self, id: PresetId) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: PresetId) -> bool {
        self.get(id).is_some()
    }

    fn get_mut(&mut self, id: PresetId) -> Option<&mut Preset> {
        self.presets.iter_mut().find(|p| p.id == id)
    }

    fn select(&mut self, id: PresetId) -> bool {
        if self.contains(id) {
            self.current = Some(id);
            true
        } else {
            false
        }
    }

    /// Remove `id`; if it was current the first remaining preset takes over
    fn remove(&mut self, id: PresetId) -> Option<Preset> {
        let index = self.presets.iter().position(|p| p.id == id)?;
        let removed = self.presets.remove(index);
        if self.current == Some(id) {
            self.current = self.presets.first().map(|p| p.id);
        }
        Some(removed)
    }
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EngineError::EmptyName);
    }
    Ok(trimmed.to_string())
}

/// Parse a stored collection, rejecting out-of-range values and repeated ids
fn decode_presets(bytes: &[u8]) -> Result<Vec<Preset>> {
    let presets: Vec<Preset> = serde_json::from_slice(bytes)?;

    let mut seen = HashSet::with_capacity(presets.len());
    for preset in &presets {
        if !preset.parameters().is_valid() {
            return Err(EngineError::persistence(format!(
                "Preset '{}' ({}) has out-of-range values",
                preset.name, preset.id
            )));
        }
        if !seen.insert(preset.id) {
            return Err(EngineError::persistence(format!(
                "Preset id {} appears more than once",
                preset.id
            )));
        }
    }
    Ok(presets)
}

/// The preset collection bound to its durable storage
pub struct PresetStore {
    collection: PresetCollection,
    storage: Box<dyn KeyValueStore>,
    write_error: Option<EngineError>,
}

impl PresetStore {
    /// Load the collection from `storage`.
    ///
    /// Missing or unreadable data falls back to the single default preset.
    /// The stored selection is restored if it still exists, otherwise the
    /// first preset is selected.
    pub fn load(storage: Box<dyn KeyValueStore>) -> Self {
        let presets = match storage.read_blob(PRESETS_KEY) {
            Ok(Some(bytes)) => match decode_presets(&bytes) {
                Ok(presets) => Some(presets),
                Err(e) => {
                    log::warn!("Stored presets are unusable, using defaults: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("Failed to read presets, using defaults: {}", e);
                None
            }
        };

        let mut collection = match presets {
            Some(presets) => PresetCollection {
                presets,
                current: None,
            },
            None => PresetCollection::with_default(),
        };

        let saved_current = match storage.read_blob(CURRENT_PRESET_KEY) {
            Ok(bytes) => bytes
                .and_then(|b| String::from_utf8(b).ok())
                .and_then(|s| PresetId::parse(&s)),
            Err(e) => {
                log::warn!("Failed to read current preset id: {}", e);
                None
            }
        };

        collection.current = saved_current
            .filter(|id| collection.contains(*id))
            .or_else(|| collection.presets.first().map(|p| p.id));

        log::info!(
            "Loaded {} preset(s), current = {:?}",
            collection.len(),
            collection.current.map(|id| id.to_string())
        );

        Self {
            collection,
            storage,
            write_error: None,
        }
    }

    pub fn collection(&self) -> &PresetCollection {
        &self.collection
    }

    pub fn presets(&self) -> &[Preset] {
        self.collection.presets()
    }

    pub fn current_id(&self) -> Option<PresetId> {
        self.collection.current_id()
    }

    pub fn current(&self) -> Option<&Preset> {
        self.collection.current()
    }

    pub fn get(&self, id: PresetId) -> Option<&Preset> {
        self.collection.get(id)
    }

    /// Select `id` as current. Only the selection is written back.
    pub fn select(&mut self, id: PresetId) -> Result<&Preset> {
        if !self.collection.select(id) {
            return Err(EngineError::InvalidPresetReference(id));
        }
        self.record(|store| store.write_current());
        self.collection
            .get(id)
            .ok_or(EngineError::InvalidPresetReference(id))
    }

    /// Snapshot `params` as a new preset named `name` and select it
    pub fn save_as_new(&mut self, name: &str, params: &StereoParameters) -> Result<PresetId> {
        let name = validate_name(name)?;
        let preset = Preset::new(name, params);
        let id = preset.id;

        log::info!("Saving new preset '{}' ({})", preset.name, id);
        self.collection.presets.push(preset);
        self.collection.current = Some(id);
        self.record(|store| store.persist());
        Ok(id)
    }

    /// Overwrite the current preset with `params`.
    ///
    /// Returns false (and writes nothing) if no preset is selected.
    pub fn auto_save(&mut self, params: &StereoParameters) -> bool {
        let Some(id) = self.collection.current else {
            return false;
        };
        let Some(preset) = self.collection.get_mut(id) else {
            return false;
        };
        preset.store(params);
        self.record(|store| store.persist());
        true
    }

    /// Remove a preset. Deleting the current one promotes the first remaining.
    pub fn delete(&mut self, id: PresetId) -> Result<Preset> {
        let removed = self
            .collection
            .remove(id)
            .ok_or(EngineError::InvalidPresetReference(id))?;
        log::info!("Deleted preset '{}' ({})", removed.name, id);
        self.record(|store| store.persist());
        Ok(removed)
    }

    pub fn rename(&mut self, id: PresetId, name: &str) -> Result<()> {
        let name = validate_name(name)?;
        let preset = self
            .collection
            .get_mut(id)
            .ok_or(EngineError::InvalidPresetReference(id))?;
        preset.name = name;
        self.record(|store| store.persist());
        Ok(())
    }

    /// Write the whole collection and the selection.
    ///
    /// These are two separate blobs. If the second write fails the stored
    /// selection may be stale; `load` then falls back to the first preset
    /// when the stale id no longer exists.
    pub fn persist(&mut self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.collection.presets)?;
        self.storage.write_blob(PRESETS_KEY, &bytes)?;
        self.write_current()
    }

    fn write_current(&mut self) -> Result<()> {
        let id = self
            .collection
            .current
            .map(|id| id.to_string())
            .unwrap_or_default();
        self.storage.write_blob(CURRENT_PRESET_KEY, id.as_bytes())
    }

    /// Keep the in-memory change; remember a failed write for the caller
    fn record(&mut self, write: impl FnOnce(&mut Self) -> Result<()>) {
        if let Err(e) = write(self) {
            log::error!("Failed to persist presets: {}", e);
            self.write_error = Some(e);
        }
    }

    /// The last write failure since this was last called
    pub fn take_write_error(&mut self) -> Option<EngineError> {
        self.write_error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{EarSelector, ParamValue, ParameterChange};
    use crate::storage::MemoryStore;

    fn load(store: &MemoryStore) -> PresetStore {
        PresetStore::load(Box::new(store.clone()))
    }

    fn edited() -> StereoParameters {
        let mut p = StereoParameters::default();
        p.apply(&ParameterChange::set(EarSelector::Both, ParamValue::NoiseType(NoiseType::Pink)));
        p.apply(&ParameterChange::set(EarSelector::Left, ParamValue::Bandwidth(1.5)));
        p.apply(&ParameterChange::set(EarSelector::Right, ParamValue::Volume(0.6)));
        p.apply(&ParameterChange::set(
            EarSelector::Right,
            ParamValue::CenterFrequency(5000.0),
        ));
        p
    }

    #[test]
    fn test_default_install() {
        let storage = MemoryStore::new();
        let store = load(&storage);

        assert_eq!(store.presets().len(), 1);
        let preset = &store.presets()[0];
        assert_eq!(preset.name, "Standard");
        assert_eq!(preset.base.noise_type, NoiseType::White);
        assert_eq!(preset.base.volume, 0.2);
        assert_eq!(preset.base.center_frequency, 8000.0);
        assert_eq!(preset.base.bandwidth, 1.0);
        assert!(preset.left.is_empty() && preset.right.is_empty());
        assert_eq!(store.current_id(), Some(preset.id));
        // loading alone writes nothing
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn test_corrupt_storage_falls_back() {
        let storage = MemoryStore::with_blobs([(PRESETS_KEY, b"{not json".to_vec())]);
        let store = load(&storage);
        assert_eq!(store.presets().len(), 1);
        assert_eq!(store.presets()[0].name, DEFAULT_PRESET_NAME);
        assert!(store.current().is_some());
    }

    #[test]
    fn test_out_of_range_record_falls_back() {
        let id = PresetId::new();
        let blob = format!(
            r#"[{{"id":"{}","name":"Broken","noiseType":"white","volume":5.0,"centerFrequency":-100.0,"bandwidth":-3.0,"volumeLeft":42.0}}]"#,
            id
        );
        let storage = MemoryStore::with_blobs([
            (PRESETS_KEY, blob.into_bytes()),
            (CURRENT_PRESET_KEY, id.to_string().into_bytes()),
        ]);

        let store = load(&storage);
        assert_eq!(store.presets().len(), 1);
        let current = store.current().unwrap();
        assert_eq!(current.name, DEFAULT_PRESET_NAME);
        assert_eq!(current.parameters(), StereoParameters::default());
    }

    #[test]
    fn test_out_of_range_override_alone_falls_back() {
        let mut preset = Preset::standard();
        preset.left.volume = Some(42.0);
        let blob = serde_json::to_vec(&vec![preset]).unwrap();
        let storage = MemoryStore::with_blobs([(PRESETS_KEY, blob)]);

        let store = load(&storage);
        assert!(store.current().unwrap().left.is_empty());
    }

    #[test]
    fn test_duplicate_ids_fall_back() {
        let preset = Preset::standard();
        let mut twin = Preset::new("Twin", &edited());
        twin.id = preset.id;
        let blob = serde_json::to_vec(&vec![preset, twin]).unwrap();
        let storage = MemoryStore::with_blobs([(PRESETS_KEY, blob)]);

        let store = load(&storage);
        assert_eq!(store.presets().len(), 1);
        assert_eq!(store.presets()[0].name, DEFAULT_PRESET_NAME);
    }

    #[test]
    fn test_reload_restores_collection_and_selection() {
        let storage = MemoryStore::new();
        let mut store = load(&storage);
        let id = store.save_as_new("Night", &edited()).unwrap();
        let first = store.presets()[0].id;
        store.select(first).unwrap();

        let reloaded = load(&storage);
        assert_eq!(reloaded.presets(), store.presets());
        assert_eq!(reloaded.current_id(), Some(first));
        assert_eq!(reloaded.get(id).unwrap().parameters(), edited());
    }

    #[test]
    fn test_stale_selection_selects_first() {
        let storage = MemoryStore::new();
        let mut store = load(&storage);
        store.persist().unwrap();

        let mut raw = storage.clone();
        raw.write_blob(CURRENT_PRESET_KEY, PresetId::new().to_string().as_bytes())
            .unwrap();

        let reloaded = load(&storage);
        assert_eq!(reloaded.current_id(), Some(reloaded.presets()[0].id));
    }

    #[test]
    fn test_empty_stored_collection_stays_empty() {
        let storage = MemoryStore::with_blobs([(PRESETS_KEY, b"[]".to_vec())]);
        let store = load(&storage);
        assert!(store.presets().is_empty());
        assert_eq!(store.current_id(), None);
    }

    #[test]
    fn test_save_as_new_appends_and_selects() {
        let storage = MemoryStore::new();
        let mut store = load(&storage);
        let id = store.save_as_new("  Focus  ", &edited()).unwrap();

        assert_eq!(store.presets().len(), 2);
        assert_eq!(store.presets()[1].id, id);
        assert_eq!(store.presets()[1].name, "Focus");
        assert_eq!(store.current_id(), Some(id));
    }

    #[test]
    fn test_empty_name_rejected_without_mutation() {
        let storage = MemoryStore::new();
        let mut store = load(&storage);
        let before = store.collection().clone();

        assert!(matches!(store.save_as_new("", &edited()), Err(EngineError::EmptyName)));
        assert!(matches!(store.save_as_new("   ", &edited()), Err(EngineError::EmptyName)));
        assert_eq!(store.collection(), &before);
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn test_auto_save_overwrites_current_and_is_idempotent() {
        let storage = MemoryStore::new();
        let mut store = load(&storage);

        assert!(store.auto_save(&edited()));
        assert_eq!(store.current().unwrap().parameters(), edited());
        let first = storage.get(PRESETS_KEY).unwrap();

        assert!(store.auto_save(&edited()));
        assert_eq!(storage.get(PRESETS_KEY).unwrap(), first);
    }

    #[test]
    fn test_auto_save_without_current_is_noop() {
        let storage = MemoryStore::with_blobs([(PRESETS_KEY, b"[]".to_vec())]);
        let mut store = load(&storage);
        assert!(!store.auto_save(&edited()));
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn test_select_writes_only_selection() {
        let storage = MemoryStore::new();
        let mut store = load(&storage);
        let second = store.save_as_new("Second", &edited()).unwrap();
        let first = store.presets()[0].id;
        let presets_bytes = storage.get(PRESETS_KEY).unwrap();

        store.select(first).unwrap();
        assert_eq!(storage.get(PRESETS_KEY).unwrap(), presets_bytes);
        assert_eq!(storage.get(CURRENT_PRESET_KEY).unwrap(), first.to_string().into_bytes());

        assert!(matches!(
            store.select(PresetId::new()),
            Err(EngineError::InvalidPresetReference(_))
        ));
        assert_eq!(store.current_id(), Some(first));
        assert_ne!(first, second);
    }

    #[test]
    fn test_delete_current_promotes_first() {
        let storage = MemoryStore::new();
        let mut store = load(&storage);
        let standard = store.presets()[0].id;
        let a = store.save_as_new("A", &edited()).unwrap();
        let b = store.save_as_new("B", &edited()).unwrap();

        store.select(a).unwrap();
        store.delete(a).unwrap();
        assert_eq!(store.current_id(), Some(standard));

        // deleting a non-current preset keeps the selection
        store.delete(b).unwrap();
        assert_eq!(store.current_id(), Some(standard));

        // the built-in default may be deleted too
        store.delete(standard).unwrap();
        assert!(store.presets().is_empty());
        assert_eq!(store.current_id(), None);
        assert_eq!(storage.get(CURRENT_PRESET_KEY).unwrap(), Vec::<u8>::new());
        assert_eq!(storage.get(PRESETS_KEY).unwrap(), b"[]");
    }

    #[test]
    fn test_delete_unknown_is_reported() {
        let storage = MemoryStore::new();
        let mut store = load(&storage);
        let before = store.collection().clone();
        assert!(matches!(
            store.delete(PresetId::new()),
            Err(EngineError::InvalidPresetReference(_))
        ));
        assert_eq!(store.collection(), &before);
    }

    #[test]
    fn test_write_failure_keeps_change() {
        let storage = MemoryStore::new();
        let mut store = load(&storage);
        storage.set_fail_writes(true);

        let id = store.save_as_new("Offline", &edited()).unwrap();
        assert!(store.get(id).is_some());
        assert!(matches!(
            store.take_write_error(),
            Some(EngineError::PersistenceFailure(_))
        ));
        assert!(store.take_write_error().is_none());

        // next successful write reconciles
        storage.set_fail_writes(false);
        store.auto_save(&edited());
        assert!(store.take_write_error().is_none());
        assert_eq!(load(&storage).presets().len(), 2);
    }

    #[test]
    fn test_rename() {
        let storage = MemoryStore::new();
        let mut store = load(&storage);
        let id = store.presets()[0].id;
        store.rename(id, "Evening").unwrap();
        assert_eq!(store.get(id).unwrap().name, "Evening");
        assert!(matches!(store.rename(id, " "), Err(EngineError::EmptyName)));
    }

    #[test]
    fn test_record_layout_is_flat() {
        let mut preset = Preset::new("Flat", &edited());
        preset.id = PresetId::parse("6f1c1d2e-3a4b-4c5d-8e9f-0a1b2c3d4e5f").unwrap();
        let value = serde_json::to_value(&preset).unwrap();

        assert_eq!(value["noiseType"], "pink");
        assert_eq!(value["bandwidthLeft"], 1.5);
        assert_eq!(value["centerFrequencyRight"], 5000.0);
        assert!(value.get("noiseTypeLeft").is_none());
        assert_eq!(value["id"], "6f1c1d2e-3a4b-4c5d-8e9f-0a1b2c3d4e5f");

        let back: Preset = serde_json::from_value(value).unwrap();
        assert_eq!(back, preset);
    }
}
