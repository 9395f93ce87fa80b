//! Engine facade
//!
//! [`NoiseEngine`] owns the preset collection, the live working copy of the
//! parameters and the render graph's lifecycle. All edits funnel through
//! [`NoiseEngine::apply`], which updates the working copy, republishes the
//! render parameters and auto-saves the current preset in that order.
//! Loading a preset republishes but never auto-saves.

use crate::audio::engine::{AudioEngine, CpalBackend, EngineState, OutputBackend};
use crate::audio::noise::NoiseType;
use crate::audio::route::{OutputKind, RouteChangeReason, RouteEvent, RouteEventQueue};
use crate::audio::shared::ParamPublisher;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::params::{
    ChannelParameters, Ear, EarSelector, ParamField, ParamValue, ParameterChange, StereoParameters,
};
use crate::preset::{Preset, PresetId, PresetStore};
use crate::storage::{FileStore, KeyValueStore};

/// Observable state changes, delivered to subscribed listeners
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    RunningChanged(bool),
    PresetsChanged,
    CurrentPresetChanged(Option<PresetId>),
    ParametersChanged,
    SelectedEarChanged(EarSelector),
    OutputChanged(OutputKind),
    PersistenceFailed(String),
}

type Listener = Box<dyn Fn(&EngineEvent) + Send>;

pub struct NoiseEngine {
    audio: AudioEngine,
    publisher: ParamPublisher,
    store: PresetStore,
    working: StereoParameters,
    selected_ear: EarSelector,
    route_events: RouteEventQueue,
    output_kind: OutputKind,
    listeners: Vec<Listener>,
    pending_routes: Vec<RouteEvent>,
}

impl NoiseEngine {
    /// Load presets from `storage` and prepare (but don't start) the output
    pub fn new(backend: Box<dyn OutputBackend>, storage: Box<dyn KeyValueStore>) -> Self {
        let store = PresetStore::load(storage);
        let working = store
            .current()
            .map(Preset::parameters)
            .unwrap_or_default();

        let publisher = ParamPublisher::new(&working);
        let route_events = RouteEventQueue::default();
        let audio = AudioEngine::new(backend, publisher.shared(), route_events.clone());

        Self {
            audio,
            publisher,
            store,
            working,
            selected_ear: EarSelector::Both,
            route_events,
            output_kind: OutputKind::Unknown,
            listeners: Vec::new(),
            pending_routes: Vec::with_capacity(16),
        }
    }

    /// Engine on the configured cpal device with presets in the configured directory
    pub fn with_default_output(config: &EngineConfig) -> Result<Self> {
        let storage = FileStore::open(config.storage_dir())?;
        log::info!("Preset storage: {}", storage.dir().display());

        let backend = CpalBackend::new(config.device_name.clone(), config.audio.clone());
        let mut engine = Self::new(Box::new(backend), Box::new(storage));
        if let Some(name) = &config.device_name {
            engine.output_kind = OutputKind::classify(name);
        }
        Ok(engine)
    }

    pub fn subscribe(&mut self, listener: impl Fn(&EngineEvent) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn emit(&self, event: EngineEvent) {
        for listener in &self.listeners {
            listener(&event);
        }
    }

    fn flush_write_error(&mut self) {
        if let Some(e) = self.store.take_write_error() {
            self.emit(EngineEvent::PersistenceFailed(e.to_string()));
        }
    }

    // Lifecycle

    /// Start playback. No-op if already running; a failure leaves the engine stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.audio.is_running() {
            return Ok(());
        }
        self.audio.start()?;

        if let Some(kind) = self.audio.device_name().map(OutputKind::classify) {
            if kind != OutputKind::Unknown {
                self.set_output_kind(kind);
            }
        }
        self.emit(EngineEvent::RunningChanged(true));
        Ok(())
    }

    /// Stop playback. Returns once the render callback can no longer fire.
    pub fn stop(&mut self) {
        if !self.audio.is_running() {
            return;
        }
        self.audio.stop();
        self.emit(EngineEvent::RunningChanged(false));
    }

    pub fn is_running(&self) -> bool {
        self.audio.is_running()
    }

    pub fn state(&self) -> EngineState {
        self.audio.state()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.audio.sample_rate()
    }

    // Route handling

    /// Producer handle for route monitors
    pub fn route_events(&self) -> RouteEventQueue {
        self.route_events.clone()
    }

    /// Handle queued route events. Call periodically from the control thread.
    pub fn process_route_events(&mut self) {
        let mut pending = std::mem::take(&mut self.pending_routes);
        self.route_events.drain_into(&mut pending);

        for event in pending.drain(..) {
            match event {
                RouteEvent::DeviceLost => {
                    if self.is_running() {
                        log::warn!("Output device lost, stopping");
                        self.stop();
                    }
                }
                RouteEvent::DeviceRouteChanged { reason, output } => {
                    log::info!("Output route changed ({:?}): {:?}", reason, output);
                    self.set_output_kind(output);

                    let unsuitable = output == OutputKind::Speaker
                        || (reason == RouteChangeReason::OldDeviceUnavailable
                            && !output.is_headphones());
                    if self.is_running() && unsuitable {
                        log::info!("Headphones disconnected, stopping therapy");
                        self.stop();
                    }
                }
            }
        }

        self.pending_routes = pending;
    }

    fn set_output_kind(&mut self, kind: OutputKind) {
        if self.output_kind != kind {
            self.output_kind = kind;
            self.emit(EngineEvent::OutputChanged(kind));
        }
    }

    pub fn output_kind(&self) -> OutputKind {
        self.output_kind
    }

    pub fn is_headphones_connected(&self) -> bool {
        self.output_kind.is_headphones()
    }

    // Parameters

    pub fn selected_ear(&self) -> EarSelector {
        self.selected_ear
    }

    pub fn set_selected_ear(&mut self, ear: EarSelector) {
        if self.selected_ear != ear {
            self.selected_ear = ear;
            self.emit(EngineEvent::SelectedEarChanged(ear));
        }
    }

    pub fn working_parameters(&self) -> &StereoParameters {
        &self.working
    }

    /// What the render path plays on `ear`
    pub fn effective(&self, ear: Ear) -> ChannelParameters {
        self.working.effective(ear)
    }

    /// Parameters as seen by the editor for the selected ear
    pub fn active(&self) -> ChannelParameters {
        self.working.active(self.selected_ear)
    }

    pub fn active_noise_type(&self) -> NoiseType {
        self.active().noise_type
    }

    pub fn active_volume(&self) -> f32 {
        self.active().volume
    }

    pub fn active_center_frequency(&self) -> f32 {
        self.active().center_frequency
    }

    pub fn active_bandwidth(&self) -> f32 {
        self.active().bandwidth
    }

    pub fn set_active_noise_type(&mut self, noise_type: NoiseType) -> bool {
        self.apply(ParameterChange::set(self.selected_ear, ParamValue::NoiseType(noise_type)))
    }

    pub fn set_active_volume(&mut self, volume: f32) -> bool {
        self.apply(ParameterChange::set(self.selected_ear, ParamValue::Volume(volume)))
    }

    pub fn set_active_center_frequency(&mut self, hz: f32) -> bool {
        self.apply(ParameterChange::set(self.selected_ear, ParamValue::CenterFrequency(hz)))
    }

    pub fn set_active_bandwidth(&mut self, octaves: f32) -> bool {
        self.apply(ParameterChange::set(self.selected_ear, ParamValue::Bandwidth(octaves)))
    }

    /// Let `ear` inherit `field` from the base values again
    pub fn clear_override(&mut self, ear: Ear, field: ParamField) -> bool {
        self.apply(ParameterChange::clear(ear, field))
    }

    /// The single edit entry point: update, republish, auto-save.
    ///
    /// Returns false if the value was rejected (NaN) and nothing changed.
    pub fn apply(&mut self, change: ParameterChange) -> bool {
        if !self.working.apply(&change) {
            log::warn!("Rejected parameter change {:?}", change);
            return false;
        }

        self.commit(change.affects_noise_type());
        true
    }

    /// Drop every override of `ear` so it plays the base values again.
    ///
    /// Saved like any other edit. No-op if the ear has no overrides.
    pub fn clear_ear_overrides(&mut self, ear: Ear) {
        let overrides = self.working.override_for(ear);
        if overrides.is_empty() {
            return;
        }
        let reset_generators = overrides.noise_type.is_some();

        self.working.clear_overrides(ear);
        self.commit(reset_generators);
    }

    fn commit(&mut self, reset_generators: bool) {
        self.publisher.publish(&self.working, reset_generators);
        self.store.auto_save(&self.working);
        self.flush_write_error();
        self.emit(EngineEvent::ParametersChanged);
    }

    /// Replace the working copy with a preset's values without saving
    fn load_parameters(&mut self, params: StereoParameters) {
        self.working = params;
        self.publisher.publish(&self.working, true);
        self.emit(EngineEvent::ParametersChanged);
    }

    // Presets

    pub fn presets(&self) -> &[Preset] {
        self.store.presets()
    }

    pub fn current_preset_id(&self) -> Option<PresetId> {
        self.store.current_id()
    }

    pub fn current_preset(&self) -> Option<&Preset> {
        self.store.current()
    }

    /// Select a preset and load its values into the working copy
    pub fn set_current_preset_id(&mut self, id: PresetId) -> Result<()> {
        let params = self.store.select(id)?.parameters();
        self.flush_write_error();
        self.load_parameters(params);
        self.emit(EngineEvent::CurrentPresetChanged(Some(id)));
        Ok(())
    }

    /// Snapshot the working copy as a new preset and select it
    pub fn save_as_new_preset(&mut self, name: &str) -> Result<PresetId> {
        let id = self.store.save_as_new(name, &self.working)?;
        self.flush_write_error();
        self.emit(EngineEvent::PresetsChanged);
        self.emit(EngineEvent::CurrentPresetChanged(Some(id)));
        Ok(id)
    }

    pub fn delete_preset(&mut self, id: PresetId) -> Result<()> {
        let was_current = self.store.current_id() == Some(id);
        self.store.delete(id)?;
        self.flush_write_error();
        self.emit(EngineEvent::PresetsChanged);

        if was_current {
            if let Some(params) = self.store.current().map(Preset::parameters) {
                self.load_parameters(params);
            }
            self.emit(EngineEvent::CurrentPresetChanged(self.store.current_id()));
        }
        Ok(())
    }

    pub fn rename_preset(&mut self, id: PresetId, name: &str) -> Result<()> {
        self.store.rename(id, name)?;
        self.flush_write_error();
        self.emit(EngineEvent::PresetsChanged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::engine::OfflineBackend;
    use crate::error::EngineError;
    use crate::preset::PRESETS_KEY;
    use crate::storage::MemoryStore;
    use std::sync::{Arc, Mutex};

    struct Harness {
        engine: NoiseEngine,
        backend: OfflineBackend,
        storage: MemoryStore,
    }

    fn harness() -> Harness {
        harness_with(MemoryStore::new())
    }

    fn harness_with(storage: MemoryStore) -> Harness {
        let backend = OfflineBackend::new(48_000, 2);
        let engine = NoiseEngine::new(Box::new(backend.clone()), Box::new(storage.clone()));
        Harness {
            engine,
            backend,
            storage,
        }
    }

    fn record_events(engine: &mut NoiseEngine) -> Arc<Mutex<Vec<EngineEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        engine.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        events
    }

    #[test]
    fn test_default_install_state() {
        let h = harness();
        assert_eq!(h.engine.presets().len(), 1);
        let current = h.engine.current_preset().unwrap();
        assert_eq!(current.name, "Standard");
        assert_eq!(h.engine.active(), ChannelParameters::default());
        assert!(!h.engine.is_running());
        assert_eq!(h.engine.selected_ear(), EarSelector::Both);
    }

    #[test]
    fn test_left_volume_scenario() {
        let mut h = harness();
        h.engine.set_selected_ear(EarSelector::Left);
        assert!(h.engine.set_active_volume(0.5));

        assert_eq!(h.engine.active_volume(), 0.5);
        h.engine.set_selected_ear(EarSelector::Right);
        assert_eq!(h.engine.active_volume(), 0.2);
        h.engine.set_selected_ear(EarSelector::Both);
        assert_eq!(h.engine.active_volume(), 0.2);
    }

    #[test]
    fn test_edit_is_auto_saved() {
        let mut h = harness();
        h.engine.set_selected_ear(EarSelector::Right);
        h.engine.set_active_center_frequency(4200.0);

        let current = h.engine.current_preset().unwrap();
        assert_eq!(current.right.center_frequency, Some(4200.0));
        assert_eq!(current.base.center_frequency, 8000.0);

        // durable, not just in memory
        let reloaded = PresetStore::load(Box::new(h.storage.clone()));
        assert_eq!(reloaded.current().unwrap().right.center_frequency, Some(4200.0));
    }

    #[test]
    fn test_repeated_edit_writes_identical_bytes() {
        let mut h = harness();
        h.engine.set_active_bandwidth(1.25);
        let first = h.storage.get(PRESETS_KEY).unwrap();
        h.engine.set_active_bandwidth(1.25);
        assert_eq!(h.storage.get(PRESETS_KEY).unwrap(), first);
    }

    #[test]
    fn test_preset_round_trip() {
        let mut h = harness();
        let standard = h.engine.current_preset_id().unwrap();
        let id = h.engine.save_as_new_preset("Sleep").unwrap();
        assert_eq!(h.engine.current_preset_id(), Some(id));

        // edits land in the new preset
        h.engine.set_active_noise_type(NoiseType::Pink);
        h.engine.set_selected_ear(EarSelector::Left);
        h.engine.set_active_bandwidth(0.4);
        h.engine.set_selected_ear(EarSelector::Right);
        h.engine.set_active_volume(0.9);
        h.engine.set_active_noise_type(NoiseType::Brown);
        let saved = *h.engine.working_parameters();

        h.engine.set_current_preset_id(standard).unwrap();
        assert_eq!(*h.engine.working_parameters(), StereoParameters::default());

        h.engine.set_current_preset_id(id).unwrap();
        assert_eq!(*h.engine.working_parameters(), saved);
    }

    #[test]
    fn test_select_does_not_auto_save() {
        let mut h = harness();
        let standard = h.engine.current_preset_id().unwrap();
        h.engine.save_as_new_preset("Other").unwrap();
        let bytes = h.storage.get(PRESETS_KEY).unwrap();

        h.engine.set_current_preset_id(standard).unwrap();
        assert_eq!(h.storage.get(PRESETS_KEY).unwrap(), bytes);
    }

    #[test]
    fn test_invalid_preset_reference_is_noop() {
        let mut h = harness();
        let before = *h.engine.working_parameters();
        let current = h.engine.current_preset_id();

        let bogus = PresetId::new();
        assert!(matches!(
            h.engine.set_current_preset_id(bogus),
            Err(EngineError::InvalidPresetReference(_))
        ));
        assert!(h.engine.delete_preset(bogus).is_err());
        assert_eq!(*h.engine.working_parameters(), before);
        assert_eq!(h.engine.current_preset_id(), current);
    }

    #[test]
    fn test_delete_current_loads_promoted_preset() {
        let mut h = harness();
        let standard = h.engine.current_preset_id().unwrap();
        h.engine.set_active_volume(0.9);
        let id = h.engine.save_as_new_preset("Loud").unwrap();

        // make the standard preset distinct again
        h.engine.set_current_preset_id(standard).unwrap();
        h.engine.set_active_volume(0.1);
        h.engine.set_current_preset_id(id).unwrap();
        assert_eq!(h.engine.active_volume(), 0.9);

        h.engine.delete_preset(id).unwrap();
        assert_eq!(h.engine.current_preset_id(), Some(standard));
        assert_eq!(h.engine.active_volume(), 0.1);

        h.engine.delete_preset(standard).unwrap();
        assert_eq!(h.engine.current_preset_id(), None);
        assert!(h.engine.presets().is_empty());

        // edits still work, there is just nothing to save them into
        assert!(h.engine.set_active_volume(0.3));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut h = harness();
        assert!(matches!(h.engine.save_as_new_preset(" "), Err(EngineError::EmptyName)));
        assert_eq!(h.engine.presets().len(), 1);
    }

    #[test]
    fn test_noise_type_edit_resets_generators() {
        let mut h = harness();
        let epoch = h.engine.publisher.reset_epoch();

        h.engine.set_active_volume(0.4);
        assert_eq!(h.engine.publisher.reset_epoch(), epoch);

        h.engine.set_selected_ear(EarSelector::Left);
        h.engine.set_active_noise_type(NoiseType::Brown);
        assert_eq!(h.engine.publisher.reset_epoch(), epoch + 1);

        h.engine.clear_override(Ear::Left, ParamField::NoiseType);
        assert_eq!(h.engine.publisher.reset_epoch(), epoch + 2);
    }

    #[test]
    fn test_clear_ear_overrides_is_saved() {
        let mut h = harness();
        h.engine.set_selected_ear(EarSelector::Right);
        h.engine.set_active_volume(0.9);
        h.engine.set_active_noise_type(NoiseType::Brown);
        let epoch = h.engine.publisher.reset_epoch();
        let writes = h.storage.write_count();

        h.engine.clear_ear_overrides(Ear::Right);
        assert_eq!(h.engine.effective(Ear::Right), h.engine.working_parameters().base);
        assert!(h.engine.current_preset().unwrap().right.is_empty());
        assert_eq!(h.engine.publisher.reset_epoch(), epoch + 1);
        assert!(h.storage.write_count() > writes);

        // nothing left to clear
        let writes = h.storage.write_count();
        h.engine.clear_ear_overrides(Ear::Right);
        assert_eq!(h.storage.write_count(), writes);
    }

    #[test]
    fn test_start_stop_and_events() {
        let mut h = harness();
        let events = record_events(&mut h.engine);

        h.engine.start().unwrap();
        h.engine.start().unwrap();
        assert!(h.engine.is_running());
        assert_eq!(h.engine.sample_rate(), Some(48_000));

        h.engine.stop();
        h.engine.stop();
        assert!(!h.engine.is_running());

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![EngineEvent::RunningChanged(true), EngineEvent::RunningChanged(false)]
        );
    }

    #[test]
    fn test_start_failure_is_reported() {
        let mut h = harness();
        let events = record_events(&mut h.engine);
        h.backend.set_available(false);

        assert!(matches!(h.engine.start(), Err(EngineError::DeviceUnavailable(_))));
        assert!(!h.engine.is_running());
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_render_follows_edits_per_ear() {
        let mut h = harness();
        h.engine.start().unwrap();

        h.engine.set_selected_ear(EarSelector::Left);
        h.engine.set_active_volume(0.0);

        let mut buf = vec![0.0f32; 512 * 2];
        // first buffer ramps the old gain down
        h.backend.pull(&mut buf);
        h.backend.pull(&mut buf);
        assert!(buf.chunks(2).all(|f| f[0] == 0.0));
        assert!(buf.chunks(2).any(|f| f[1] != 0.0));
    }

    #[test]
    fn test_speaker_route_stops_without_resume() {
        let mut h = harness();
        let monitor = h.engine.route_events();
        h.engine.start().unwrap();

        monitor.route_changed(RouteChangeReason::NewDeviceAvailable, OutputKind::Wired);
        h.engine.process_route_events();
        assert!(h.engine.is_running());
        assert!(h.engine.is_headphones_connected());

        monitor.route_changed(RouteChangeReason::OldDeviceUnavailable, OutputKind::Speaker);
        h.engine.process_route_events();
        assert!(!h.engine.is_running());
        assert!(!h.engine.is_headphones_connected());

        monitor.route_changed(RouteChangeReason::NewDeviceAvailable, OutputKind::Wireless);
        h.engine.process_route_events();
        assert!(!h.engine.is_running());
    }

    #[test]
    fn test_device_lost_stops() {
        let mut h = harness();
        h.engine.start().unwrap();
        h.engine.route_events().push(RouteEvent::DeviceLost);
        h.engine.process_route_events();
        assert!(!h.engine.is_running());
        assert!(!h.backend.is_open());
    }

    #[test]
    fn test_unknown_output_keeps_playing() {
        let mut h = harness();
        h.engine.start().unwrap();
        h.engine
            .route_events()
            .route_changed(RouteChangeReason::CategoryChange, OutputKind::Unknown);
        h.engine.process_route_events();
        assert!(h.engine.is_running());
    }

    #[test]
    fn test_write_failure_emits_event_and_keeps_edit() {
        let mut h = harness();
        let events = record_events(&mut h.engine);
        h.storage.set_fail_writes(true);

        assert!(h.engine.set_active_volume(0.75));
        assert_eq!(h.engine.current_preset().unwrap().base.volume, 0.75);

        let events = events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::PersistenceFailed(_))));
        assert!(events.contains(&EngineEvent::ParametersChanged));
    }

    #[test]
    fn test_restores_stored_selection() {
        let storage = MemoryStore::new();
        let id = {
            let mut h = harness_with(storage.clone());
            h.engine.set_active_noise_type(NoiseType::Pink);
            h.engine.save_as_new_preset("Pink").unwrap()
        };

        let h = harness_with(storage);
        assert_eq!(h.engine.current_preset_id(), Some(id));
        assert_eq!(h.engine.active_noise_type(), NoiseType::Pink);
    }
}
