// src/gpu/mod.rs
//! Abstract GPU device + immediate context used by the bridge.
//!
//! - Opaque ids for host textures, derived views and compiled pixel shaders
//! - [`GpuDevice`]: the narrow set of device/context calls the render path needs
//! - [`ViewCache`]: memoized texture -> view lookups
//! - [`WgpuDevice`]: wgpu implementation that records bindings for the host's render pass

mod view_cache;
mod wgpu_device;

pub use view_cache::ViewCache;
pub use wgpu_device::{BoundState, WgpuDevice};

use crate::error::Result;

// ---------- Ids ----------

/// Host texture identity (the engine's native texture pointer, or a registered id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Shader-resource or render-target view created by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelShaderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    ShaderResource,
    RenderTarget,
}

// ---------- Fixed-function state ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthCompare {
    LessEqual,
    GreaterEqual,
}

/// Depth test enabled, writes enabled; only the compare direction varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    pub compare: DepthCompare,
}

impl DepthState {
    pub fn for_reverse_z(reverse_z: bool) -> Self {
        Self {
            compare: if reverse_z {
                DepthCompare::GreaterEqual
            } else {
                DepthCompare::LessEqual
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Right-eye half of a side-by-side stereo target: same size, starting at x = width.
    pub fn right_eye(self) -> Self {
        Self {
            x: self.width,
            ..self
        }
    }
}

// ---------- Device contract ----------

/// One device + immediate context pair. All calls come from the render thread
/// except view and shader creation, which may also happen at load time.
pub trait GpuDevice: Send + Sync {
    fn create_pixel_shader(&self, bytecode: &[u8]) -> Result<PixelShaderId>;
    fn release_pixel_shader(&self, shader: PixelShaderId);

    fn create_view(&self, texture: TextureId, kind: ViewKind) -> Result<ViewId>;
    fn release_view(&self, view: ViewId);

    fn set_depth_state(&self, state: DepthState);
    fn bind_pixel_shader(&self, shader: Option<PixelShaderId>);
    fn bind_render_target(&self, color: Option<ViewId>, depth: Option<TextureId>);
    fn upload_constants(&self, bytes: &[u8]) -> Result<()>;
    fn bind_shader_resources(&self, first_slot: u32, views: &[Option<ViewId>]);
    fn bind_linear_sampler(&self, slot: u32);

    fn viewport(&self) -> Viewport;
    fn set_viewport(&self, viewport: Viewport);
}
