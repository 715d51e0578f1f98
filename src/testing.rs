// src/testing.rs
//! Recording fakes for the SDK and the device, shared by the unit tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use glam::{Mat4, Vec3, Vec4};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::gpu::{
    DepthState, GpuDevice, PixelShaderId, TextureId, ViewId, ViewKind, Viewport,
};
use crate::sdk::{
    AssetId, ConversionSettings, DualQuat, HairDescriptor, HairSdk, HairTextureType, InstanceId,
    SdkError, SdkResult, SdkShaderConstants, ShaderSettings, SDK_CONSTANT_VEC4S,
};

// ====================== SDK ======================

/// Every call is appended to a log as a short string, e.g. `"render_hairs #1 color"`.
#[derive(Default)]
pub struct MockSdk {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    loads: Mutex<Vec<ConversionSettings>>,
    next_asset: AtomicU32,
    next_instance: AtomicU32,
}

impl MockSdk {
    /// Make `call` return an error until [`succeed`](Self::succeed).
    pub fn fail(&self, call: &'static str) {
        self.failing.lock().insert(call);
    }

    pub fn succeed(&self, call: &'static str) {
        self.failing.lock().remove(call);
    }

    /// Calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Log from the first call starting with `prefix` onwards.
    pub fn calls_since(&self, prefix: &str) -> Vec<String> {
        let calls = self.calls.lock();
        match calls.iter().position(|c| c.starts_with(prefix)) {
            Some(i) => calls[i..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Settings of every successful `load_asset`, in order.
    pub fn loaded_settings(&self) -> Vec<ConversionSettings> {
        self.loads.lock().clone()
    }

    fn record(&self, call: &'static str, detail: String) -> SdkResult<()> {
        let line = if detail.is_empty() {
            call.to_string()
        } else {
            format!("{call} {detail}")
        };
        self.calls.lock().push(line);
        if self.failing.lock().contains(call) {
            return Err(SdkError::new(-1));
        }
        Ok(())
    }
}

impl HairSdk for MockSdk {
    fn version(&self) -> u32 {
        0x0105
    }

    fn init_render_resources(&self) -> SdkResult<()> {
        self.record("init_render_resources", String::new())
    }

    fn load_asset(&self, path: &Path, settings: &ConversionSettings) -> SdkResult<AssetId> {
        self.record("load_asset", path.display().to_string())?;
        self.loads.lock().push(*settings);
        Ok(AssetId(self.next_asset.fetch_add(1, Ordering::Relaxed) + 1))
    }

    fn free_asset(&self, asset: AssetId) -> SdkResult<()> {
        self.record("free_asset", asset.0.to_string())
    }

    fn bone_count(&self, _asset: AssetId) -> SdkResult<u32> {
        self.record("bone_count", String::new())?;
        Ok(4)
    }

    fn bone_name(&self, _asset: AssetId, bone: u32) -> SdkResult<String> {
        self.record("bone_name", bone.to_string())?;
        Ok(format!("bone{bone}"))
    }

    fn bone_indices(&self, _asset: AssetId) -> SdkResult<Vec4> {
        self.record("bone_indices", String::new())?;
        Ok(Vec4::new(0.0, 1.0, 2.0, 3.0))
    }

    fn bone_weights(&self, _asset: AssetId) -> SdkResult<Vec4> {
        self.record("bone_weights", String::new())?;
        Ok(Vec4::new(0.25, 0.25, 0.25, 0.25))
    }

    fn bind_pose(&self, _asset: AssetId, bone: u32) -> SdkResult<Mat4> {
        self.record("bind_pose", bone.to_string())?;
        Ok(Mat4::from_translation(Vec3::new(bone as f32, 0.0, 0.0)))
    }

    fn default_descriptor(&self, _asset: AssetId) -> SdkResult<HairDescriptor> {
        self.record("default_descriptor", String::new())?;
        Ok(HairDescriptor::default())
    }

    fn texture_name(&self, _asset: AssetId, texture: HairTextureType) -> SdkResult<String> {
        self.record("texture_name", format!("{texture:?}"))?;
        Ok(match texture {
            HairTextureType::RootColor => "root.png".into(),
            HairTextureType::TipColor => "tip.png".into(),
            _ => String::new(),
        })
    }

    fn create_instance(&self, asset: AssetId) -> SdkResult<InstanceId> {
        self.record("create_instance", asset.0.to_string())?;
        Ok(InstanceId(self.next_instance.fetch_add(1, Ordering::Relaxed) + 1))
    }

    fn free_instance(&self, instance: InstanceId) -> SdkResult<()> {
        self.record("free_instance", instance.to_string())
    }

    fn bounds(&self, instance: InstanceId) -> SdkResult<(Vec3, Vec3)> {
        self.record("bounds", instance.to_string())?;
        Ok((Vec3::splat(-1.0), Vec3::ONE))
    }

    fn current_descriptor(&self, instance: InstanceId) -> SdkResult<HairDescriptor> {
        self.record("current_descriptor", instance.to_string())?;
        Ok(HairDescriptor::default())
    }

    fn update_descriptor(&self, instance: InstanceId, _descriptor: &HairDescriptor) -> SdkResult<()> {
        self.record("update_descriptor", instance.to_string())
    }

    fn set_texture(&self, instance: InstanceId, texture: HairTextureType, view: ViewId) -> SdkResult<()> {
        self.record("set_texture", format!("{instance} {texture:?} {}", view.0))
    }

    fn texture_view(&self, instance: InstanceId, texture: HairTextureType) -> SdkResult<Option<ViewId>> {
        self.record("texture_view", format!("{instance} {texture:?}"))?;
        Ok(Some(ViewId(100 + texture as u64)))
    }

    fn update_skinning_matrices(&self, instance: InstanceId, matrices: &[Mat4]) -> SdkResult<()> {
        self.record("update_skinning_matrices", format!("{instance} {}", matrices.len()))
    }

    fn update_skinning_dqs(&self, instance: InstanceId, dqs: &[DualQuat]) -> SdkResult<()> {
        self.record("update_skinning_dqs", format!("{instance} {}", dqs.len()))
    }

    /// Logged with the view's x translation so tests can tell the eyes apart.
    fn set_view_projection(&self, view: &Mat4, _projection: &Mat4, _fov: f32) -> SdkResult<()> {
        self.record("set_view_projection", view.w_axis.x.to_string())
    }

    fn step_simulation(&self, _dt: f32) -> SdkResult<()> {
        self.record("step_simulation", String::new())
    }

    fn shader_resource_slots(&self) -> u32 {
        4
    }

    fn shader_resources(&self, instance: InstanceId) -> SdkResult<Vec<Option<ViewId>>> {
        self.record("shader_resources", instance.to_string())?;
        Ok(vec![Some(ViewId(1)), Some(ViewId(2)), None, Some(ViewId(3))])
    }

    fn prepare_shader_constants(&self, instance: InstanceId) -> SdkResult<SdkShaderConstants> {
        self.record("prepare_shader_constants", instance.to_string())?;
        Ok([Vec4::splat(instance.0 as f32); SDK_CONSTANT_VEC4S])
    }

    fn render_hairs(&self, instance: InstanceId, settings: ShaderSettings) -> SdkResult<()> {
        let pass = if settings.shadow_pass { "shadow" } else { "color" };
        self.record("render_hairs", format!("{instance} {pass}"))
    }

    fn render_visualization(&self, instance: InstanceId) -> SdkResult<()> {
        self.record("render_visualization", instance.to_string())
    }
}

// ====================== DEVICE ======================

pub struct MockDevice {
    next_id: AtomicU64,
    fail_views: AtomicBool,
    fail_shaders: AtomicBool,
    views_created: AtomicUsize,
    views_released: AtomicUsize,
    shaders_created: AtomicUsize,
    shaders_released: AtomicUsize,
    log: Mutex<Vec<String>>,
    viewport: Mutex<Viewport>,
    viewports: Mutex<Vec<Viewport>>,
    constants: Mutex<Vec<u8>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            fail_views: AtomicBool::new(false),
            fail_shaders: AtomicBool::new(false),
            views_created: AtomicUsize::new(0),
            views_released: AtomicUsize::new(0),
            shaders_created: AtomicUsize::new(0),
            shaders_released: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            viewport: Mutex::new(Viewport::new(1280.0, 720.0)),
            viewports: Mutex::new(Vec::new()),
            constants: Mutex::new(Vec::new()),
        }
    }
}

impl MockDevice {
    pub fn fail_views(&self, fail: bool) {
        self.fail_views.store(fail, Ordering::Relaxed);
    }

    pub fn fail_shaders(&self, fail: bool) {
        self.fail_shaders.store(fail, Ordering::Relaxed);
    }

    pub fn views_created(&self) -> usize {
        self.views_created.load(Ordering::Relaxed)
    }

    pub fn views_released(&self) -> usize {
        self.views_released.load(Ordering::Relaxed)
    }

    pub fn shaders_created(&self) -> usize {
        self.shaders_created.load(Ordering::Relaxed)
    }

    pub fn shaders_released(&self) -> usize {
        self.shaders_released.load(Ordering::Relaxed)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.log.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Every viewport set, in order.
    pub fn viewports(&self) -> Vec<Viewport> {
        self.viewports.lock().clone()
    }

    pub fn last_constants(&self) -> Vec<u8> {
        self.constants.lock().clone()
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn push(&self, line: String) {
        self.log.lock().push(line);
    }
}

impl GpuDevice for MockDevice {
    fn create_pixel_shader(&self, bytecode: &[u8]) -> Result<PixelShaderId> {
        if self.fail_shaders.load(Ordering::Relaxed) || bytecode.is_empty() {
            return Err(Error::Device("pixel shader"));
        }
        self.shaders_created.fetch_add(1, Ordering::Relaxed);
        Ok(PixelShaderId(self.next()))
    }

    fn release_pixel_shader(&self, shader: PixelShaderId) {
        self.shaders_released.fetch_add(1, Ordering::Relaxed);
        self.push(format!("release_pixel_shader {}", shader.0));
    }

    fn create_view(&self, texture: TextureId, kind: ViewKind) -> Result<ViewId> {
        if self.fail_views.load(Ordering::Relaxed) {
            return Err(Error::Device("view"));
        }
        self.views_created.fetch_add(1, Ordering::Relaxed);
        self.push(format!("create_view {:#x} {kind:?}", texture.0));
        Ok(ViewId(self.next()))
    }

    fn release_view(&self, view: ViewId) {
        self.views_released.fetch_add(1, Ordering::Relaxed);
        self.push(format!("release_view {}", view.0));
    }

    fn set_depth_state(&self, state: DepthState) {
        self.push(format!("set_depth_state {:?}", state.compare));
    }

    fn bind_pixel_shader(&self, shader: Option<PixelShaderId>) {
        self.push(format!("bind_pixel_shader {:?}", shader.map(|s| s.0)));
    }

    fn bind_render_target(&self, color: Option<ViewId>, depth: Option<TextureId>) {
        self.push(format!(
            "bind_render_target {:?} {:?}",
            color.map(|v| v.0),
            depth.map(|t| t.0)
        ));
    }

    fn upload_constants(&self, bytes: &[u8]) -> Result<()> {
        *self.constants.lock() = bytes.to_vec();
        self.push(format!("upload_constants {}", bytes.len()));
        Ok(())
    }

    fn bind_shader_resources(&self, first_slot: u32, views: &[Option<ViewId>]) {
        self.push(format!("bind_shader_resources {first_slot} {}", views.len()));
    }

    fn bind_linear_sampler(&self, slot: u32) {
        self.push(format!("bind_linear_sampler {slot}"));
    }

    fn viewport(&self) -> Viewport {
        *self.viewport.lock()
    }

    fn set_viewport(&self, viewport: Viewport) {
        *self.viewport.lock() = viewport;
        self.viewports.lock().push(viewport);
    }
}
