//! Audio side of the noise engine
//!
//! Provides real-time stereo noise playback with:
//! - White, pink and brown generators
//! - Per-ear band-pass filtering
//! - Lock-free parameter publication to the render callback
//! - cpal output with an offline backend for tests
//! - Output route notifications

pub mod device;
pub mod engine;
pub mod filter;
pub mod noise;
pub mod render;
pub mod route;
pub mod shared;
