// src/lib.rs
//! Hair SDK bridge for a host game engine.
//!
//! The engine thread loads shaders/assets/instances and records per-frame
//! commands; the render thread flushes them through the host's render event
//! callback. Mono, per-eye VR and single-pass stereo VR each get their own
//! replay schedule. The C ABI lives in [`ffi`]; Rust hosts can drive a
//! [`HairContext`] directly.

pub mod command_buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod ffi;
pub mod frame;
pub mod gpu;
pub mod hair_context;
pub mod lighting;
pub mod logging;
pub mod resource_table;
pub mod sdk;
pub mod shader_hot_reload;
pub mod skinning;

#[cfg(test)]
pub(crate) mod testing;

pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use ffi::register_backend;
pub use frame::{FlushReport, RenderEvent};
pub use gpu::{GpuDevice, WgpuDevice};
pub use hair_context::{Backend, HairCommand, HairContext};
pub use resource_table::Handle;
pub use sdk::HairSdk;
