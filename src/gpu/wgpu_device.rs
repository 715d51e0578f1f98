// src/gpu/wgpu_device.rs
//! [`GpuDevice`] over wgpu.
//!
//! wgpu has no immediate context, so binds are recorded into a [`BoundState`]
//! that the host reads back when it encodes the hair render pass. Resource
//! creation (views, shader modules, the constant buffer) is real wgpu work.
//!
//! - Textures are registered by the host under a [`TextureId`]
//! - Pixel shaders are WGSL, validated inside an error scope
//! - Constants go to one uniform buffer sized for the light + SDK block

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use parking_lot::{Mutex, RwLock};

use super::{
    DepthCompare, DepthState, GpuDevice, PixelShaderId, TextureId, ViewId, ViewKind, Viewport,
};
use crate::error::{Error, Result};
use crate::lighting::HairConstantBuffer;

/// Everything bound since the last [`WgpuDevice::take_bound_state`].
#[derive(Debug, Clone, PartialEq)]
pub struct BoundState {
    pub depth: Option<DepthState>,
    pub pixel_shader: Option<PixelShaderId>,
    pub color_target: Option<ViewId>,
    pub depth_target: Option<TextureId>,
    pub shader_resources: BTreeMap<u32, ViewId>,
    pub sampler_slot: Option<u32>,
    pub viewport: Viewport,
    pub constants_len: usize,
}

impl BoundState {
    fn new(viewport: Viewport) -> Self {
        Self {
            depth: None,
            pixel_shader: None,
            color_target: None,
            depth_target: None,
            shader_resources: BTreeMap::new(),
            sampler_slot: None,
            viewport,
            constants_len: 0,
        }
    }
}

pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    textures: RwLock<HashMap<TextureId, wgpu::Texture>>,
    views: RwLock<HashMap<ViewId, wgpu::TextureView>>,
    shaders: RwLock<HashMap<PixelShaderId, wgpu::ShaderModule>>,
    constants: wgpu::Buffer,
    sampler: wgpu::Sampler,
    next_id: AtomicU64,
    bound: Mutex<BoundState>,
}

impl WgpuDevice {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, viewport: Viewport) -> Self {
        let constants = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("hair_constants"),
            size: std::mem::size_of::<HairConstantBuffer>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("hair_linear_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            device,
            queue,
            textures: RwLock::new(HashMap::new()),
            views: RwLock::new(HashMap::new()),
            shaders: RwLock::new(HashMap::new()),
            constants,
            sampler,
            next_id: AtomicU64::new(1),
            bound: Mutex::new(BoundState::new(viewport)),
        }
    }

    /// Standalone device for tools and tests that have no host renderer.
    pub fn headless(viewport: Viewport) -> anyhow::Result<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                dx12_shader_compiler: Default::default(),
                flags: wgpu::InstanceFlags::empty(),
                gles_minor_version: wgpu::Gles3MinorVersion::Automatic,
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .context("no wgpu adapter available")?;
            let (device, queue) = adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("hair_bridge_device"),
                        required_features: wgpu::Features::empty(),
                        required_limits: wgpu::Limits::default(),
                        memory_hints: Default::default(),
                    },
                    None,
                )
                .await
                .context("requesting wgpu device")?;
            Ok(Self::new(Arc::new(device), Arc::new(queue), viewport))
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Make a host texture addressable by id.
    pub fn register_texture(&self, id: TextureId, texture: wgpu::Texture) {
        self.textures.write().insert(id, texture);
    }

    pub fn unregister_texture(&self, id: TextureId) -> Option<wgpu::Texture> {
        self.textures.write().remove(&id)
    }

    pub fn constants_buffer(&self) -> &wgpu::Buffer {
        &self.constants
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    /// Run `f` against a created view, e.g. to build the host's bind group.
    pub fn with_view<T>(&self, view: ViewId, f: impl FnOnce(&wgpu::TextureView) -> T) -> Option<T> {
        self.views.read().get(&view).map(f)
    }

    pub fn with_shader<T>(
        &self,
        shader: PixelShaderId,
        f: impl FnOnce(&wgpu::ShaderModule) -> T,
    ) -> Option<T> {
        self.shaders.read().get(&shader).map(f)
    }

    /// Snapshot of recorded bindings, resetting everything but the viewport.
    pub fn take_bound_state(&self) -> BoundState {
        let mut bound = self.bound.lock();
        let viewport = bound.viewport;
        std::mem::replace(&mut *bound, BoundState::new(viewport))
    }

    /// Depth-stencil state matching the last [`GpuDevice::set_depth_state`].
    pub fn depth_stencil_state(&self, format: wgpu::TextureFormat) -> Option<wgpu::DepthStencilState> {
        let depth = self.bound.lock().depth?;
        Some(wgpu::DepthStencilState {
            format,
            depth_write_enabled: true,
            depth_compare: match depth.compare {
                DepthCompare::LessEqual => wgpu::CompareFunction::LessEqual,
                DepthCompare::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl GpuDevice for WgpuDevice {
    fn create_pixel_shader(&self, bytecode: &[u8]) -> Result<PixelShaderId> {
        let source = std::str::from_utf8(bytecode)
            .map_err(|_| Error::custom("pixel shader source is not UTF-8 WGSL"))?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("hair_pixel_shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            log::warn!("pixel shader rejected: {err}");
            return Err(Error::Device("pixel shader"));
        }

        let id = PixelShaderId(self.next_id());
        self.shaders.write().insert(id, module);
        Ok(id)
    }

    fn release_pixel_shader(&self, shader: PixelShaderId) {
        self.shaders.write().remove(&shader);
    }

    fn create_view(&self, texture: TextureId, kind: ViewKind) -> Result<ViewId> {
        let textures = self.textures.read();
        let Some(tex) = textures.get(&texture) else {
            return Err(Error::custom(format!("texture {:#x} is not registered", texture.0)));
        };
        let required = match kind {
            ViewKind::ShaderResource => wgpu::TextureUsages::TEXTURE_BINDING,
            ViewKind::RenderTarget => wgpu::TextureUsages::RENDER_ATTACHMENT,
        };
        if !tex.usage().contains(required) {
            return Err(Error::Device(match kind {
                ViewKind::ShaderResource => "shader resource view",
                ViewKind::RenderTarget => "render target view",
            }));
        }

        let view = tex.create_view(&wgpu::TextureViewDescriptor {
            label: Some("hair_view"),
            ..Default::default()
        });
        let id = ViewId(self.next_id());
        self.views.write().insert(id, view);
        Ok(id)
    }

    fn release_view(&self, view: ViewId) {
        self.views.write().remove(&view);
    }

    fn set_depth_state(&self, state: DepthState) {
        self.bound.lock().depth = Some(state);
    }

    fn bind_pixel_shader(&self, shader: Option<PixelShaderId>) {
        self.bound.lock().pixel_shader = shader;
    }

    fn bind_render_target(&self, color: Option<ViewId>, depth: Option<TextureId>) {
        let mut bound = self.bound.lock();
        bound.color_target = color;
        bound.depth_target = depth;
    }

    fn upload_constants(&self, bytes: &[u8]) -> Result<()> {
        crate::ensure!(
            bytes.len() as u64 <= self.constants.size(),
            "constant block of {} bytes exceeds buffer of {}",
            bytes.len(),
            self.constants.size()
        );
        crate::ensure!(
            bytes.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0,
            "constant block of {} bytes is not 4-byte aligned",
            bytes.len()
        );
        self.queue.write_buffer(&self.constants, 0, bytes);
        self.bound.lock().constants_len = bytes.len();
        Ok(())
    }

    fn bind_shader_resources(&self, first_slot: u32, views: &[Option<ViewId>]) {
        let mut bound = self.bound.lock();
        for (slot, view) in (first_slot..).zip(views) {
            match view {
                Some(v) => bound.shader_resources.insert(slot, *v),
                None => bound.shader_resources.remove(&slot),
            };
        }
    }

    fn bind_linear_sampler(&self, slot: u32) {
        self.bound.lock().sampler_slot = Some(slot);
    }

    fn viewport(&self) -> Viewport {
        self.bound.lock().viewport
    }

    fn set_viewport(&self, viewport: Viewport) {
        self.bound.lock().viewport = viewport;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &str = "@fragment\nfn main() -> @location(0) vec4<f32> {\n    return vec4<f32>(1.0, 1.0, 1.0, 1.0);\n}\n";

    /// `None` on machines without an adapter; those tests pass vacuously.
    fn device() -> Option<WgpuDevice> {
        match WgpuDevice::headless(Viewport::new(640.0, 480.0)) {
            Ok(device) => Some(device),
            Err(e) => {
                eprintln!("skipping wgpu test: {e:#}");
                None
            }
        }
    }

    fn texture(device: &WgpuDevice, usage: wgpu::TextureUsages) -> wgpu::Texture {
        device.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("test_texture"),
            size: wgpu::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage,
            view_formats: &[],
        })
    }

    #[test]
    fn views_require_matching_usage() {
        let Some(gpu) = device() else { return };
        let sampled = TextureId(1);
        gpu.register_texture(sampled, texture(&gpu, wgpu::TextureUsages::TEXTURE_BINDING));

        let view = gpu.create_view(sampled, ViewKind::ShaderResource).unwrap();
        assert!(gpu.with_view(view, |_| ()).is_some());
        assert!(matches!(
            gpu.create_view(sampled, ViewKind::RenderTarget),
            Err(Error::Device("render target view"))
        ));
        assert!(gpu.create_view(TextureId(99), ViewKind::ShaderResource).is_err());

        gpu.release_view(view);
        assert!(gpu.with_view(view, |_| ()).is_none());
        assert!(gpu.unregister_texture(sampled).is_some());
    }

    #[test]
    fn invalid_wgsl_is_rejected() {
        let Some(gpu) = device() else { return };
        let shader = gpu.create_pixel_shader(FRAGMENT.as_bytes()).unwrap();
        assert!(gpu.with_shader(shader, |_| ()).is_some());

        assert!(matches!(
            gpu.create_pixel_shader(b"fn main( {"),
            Err(Error::Device("pixel shader"))
        ));
        assert!(gpu.create_pixel_shader(&[0xff, 0xfe, 0x00]).is_err());

        gpu.release_pixel_shader(shader);
        assert!(gpu.with_shader(shader, |_| ()).is_none());
    }

    #[test]
    fn constants_are_size_and_alignment_checked() {
        let Some(gpu) = device() else { return };
        let size = std::mem::size_of::<HairConstantBuffer>();

        assert!(gpu.upload_constants(&vec![0u8; size + 4]).is_err());
        assert!(gpu.upload_constants(&[0u8; 6]).is_err());
        assert_eq!(gpu.take_bound_state().constants_len, 0);

        gpu.upload_constants(&vec![0u8; size]).unwrap();
        assert_eq!(gpu.take_bound_state().constants_len, size);
    }

    #[test]
    fn bound_state_records_and_resets() {
        let Some(gpu) = device() else { return };
        let eye = Viewport::new(320.0, 480.0);

        gpu.set_depth_state(DepthState::for_reverse_z(true));
        gpu.bind_pixel_shader(Some(PixelShaderId(7)));
        gpu.bind_render_target(Some(ViewId(3)), Some(TextureId(4)));
        gpu.bind_shader_resources(2, &[Some(ViewId(10)), None, Some(ViewId(12))]);
        gpu.bind_shader_resources(3, &[Some(ViewId(11))]);
        gpu.bind_shader_resources(4, &[None]);
        gpu.bind_linear_sampler(5);
        gpu.set_viewport(eye);

        let ds = gpu.depth_stencil_state(wgpu::TextureFormat::Depth32Float).unwrap();
        assert_eq!(ds.depth_compare, wgpu::CompareFunction::GreaterEqual);

        let bound = gpu.take_bound_state();
        assert_eq!(bound.depth, Some(DepthState::for_reverse_z(true)));
        assert_eq!(bound.pixel_shader, Some(PixelShaderId(7)));
        assert_eq!(bound.color_target, Some(ViewId(3)));
        assert_eq!(bound.depth_target, Some(TextureId(4)));
        assert_eq!(
            bound.shader_resources.into_iter().collect::<Vec<_>>(),
            vec![(2, ViewId(10)), (3, ViewId(11))]
        );
        assert_eq!(bound.sampler_slot, Some(5));

        let reset = gpu.take_bound_state();
        assert_eq!(reset, BoundState::new(eye));
        assert_eq!(gpu.viewport(), eye);
        assert!(gpu.depth_stencil_state(wgpu::TextureFormat::Depth32Float).is_none());
    }
}
