//! Dual-channel noise therapy engine
//!
//! Generates band-limited white, pink or brown noise independently for each
//! ear, manages named presets with auto-save, and stops playback when the
//! headphones go away. [`NoiseEngine`] is the entry point.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod params;
pub mod preset;
pub mod storage;

pub use audio::noise::NoiseType;
pub use audio::route::{OutputKind, RouteChangeReason, RouteEvent};
pub use config::EngineConfig;
pub use engine::{EngineEvent, NoiseEngine};
pub use error::{EngineError, Result};
pub use params::{ChannelParameters, Ear, EarSelector, ParameterChange, StereoParameters};
pub use preset::{Preset, PresetId};
