// src/hair_context.rs
//! The bridge context: resource tables, deferred hair commands and the render pass.
//!
//! - Engine thread: loads/releases resources, queries the SDK, enqueues per-frame commands
//! - Render thread: flushes the mono or VR queue, executing commands against the device
//! - Every public operation tolerates bad handles and an uninitialized context:
//!   it logs and returns a neutral value instead of failing

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use parking_lot::{Mutex, RwLock};
use xxhash_rust::xxh3::Xxh3;

use crate::config::BridgeConfig;
use crate::context::{Context, OptionContext};
use crate::error::{Error, ResourceKind, Result};
use crate::frame::{
    Eye, FlushReport, FrameController, PassInfo, PassTarget, RenderEvent,
};
use crate::gpu::{DepthState, GpuDevice, PixelShaderId, TextureId, ViewCache, ViewKind, Viewport};
use crate::lighting::{HairConstantBuffer, LightData, LightSet};
use crate::resource_table::{Handle, ResourceTable, SlotKey};
use crate::sdk::{
    AssetId, ConversionSettings, DualQuat, HairDescriptor, HairSdk, HairTextureType, InstanceId,
    ShaderSettings,
};
use crate::shader_hot_reload::ShaderWatcher;
use crate::skinning::{RingRange, SkinningRing};

// ====================== BACKEND ======================

/// SDK + device pair the context drives.
#[derive(Clone)]
pub struct Backend {
    pub sdk: Arc<dyn HairSdk>,
    pub device: Arc<dyn GpuDevice>,
}

impl Backend {
    pub fn new(sdk: Arc<dyn HairSdk>, device: Arc<dyn GpuDevice>) -> Self {
        Self { sdk, device }
    }
}

/// Reads pixel shader bytecode for a path.
pub type BytecodeLoader = Arc<dyn Fn(&Path) -> Result<Vec<u8>> + Send + Sync>;

fn read_bytecode(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading shader {}", path.display()))
}

// ====================== KEYS ======================

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderKey {
    pub path: PathBuf,
}

impl SlotKey for ShaderKey {
    fn digest(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(self.path.to_string_lossy().as_bytes());
        hasher.digest()
    }
}

/// Path plus the conversion settings the caller asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetKey {
    pub path: PathBuf,
    pub settings: ConversionSettings,
}

impl SlotKey for AssetKey {
    fn digest(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(self.path.to_string_lossy().as_bytes());
        self.settings.feed(&mut hasher);
        hasher.digest()
    }
}

// ====================== COMMANDS ======================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewProjection {
    pub view: Mat4,
    pub projection: Mat4,
    pub fov: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoViewProjection {
    pub eyes: [ViewProjection; 2],
    pub single_pass: bool,
}

/// One deferred call, captured by value at enqueue time.
/// Large payloads are boxed to keep the enum small.
#[derive(Debug)]
pub enum HairCommand {
    SetViewProjection(Box<ViewProjection>),
    SetViewProjectionStereo(Box<StereoViewProjection>),
    SetRenderTarget {
        color: Option<TextureId>,
        depth: Option<TextureId>,
    },
    SetShader(Handle),
    SetLights(Box<LightSet>),
    Render(Handle),
    RenderShadow(Handle),
    StepSimulation {
        dt: f32,
        vr: bool,
        single_pass: bool,
    },
    UpdateSkinning {
        instance: InstanceId,
        range: RingRange,
    },
}

// ====================== CONTEXT ======================

pub struct HairContext {
    config: BridgeConfig,
    backend: RwLock<Option<Backend>>,
    loader: BytecodeLoader,

    shaders: RwLock<ResourceTable<ShaderKey, PixelShaderId>>,
    assets: RwLock<ResourceTable<AssetKey, AssetId>>,
    // key: owning asset handle
    instances: RwLock<ResourceTable<Handle, InstanceId>>,

    srvs: ViewCache,
    rtvs: ViewCache,

    frames: FrameController<HairCommand>,
    skinning: Mutex<SkinningRing>,
    constants: Mutex<HairConstantBuffer>,
    watcher: Mutex<Option<ShaderWatcher>>,
}

impl HairContext {
    pub fn new(config: BridgeConfig) -> Self {
        let skinning = SkinningRing::new(config.skinning_capacity);
        Self {
            config,
            backend: RwLock::new(None),
            loader: Arc::new(read_bytecode),
            shaders: RwLock::new(ResourceTable::new(ResourceKind::Shader)),
            assets: RwLock::new(ResourceTable::new(ResourceKind::Asset)),
            instances: RwLock::new(ResourceTable::new(ResourceKind::Instance)),
            srvs: ViewCache::new(ViewKind::ShaderResource),
            rtvs: ViewCache::new(ViewKind::RenderTarget),
            frames: FrameController::new(),
            skinning: Mutex::new(skinning),
            constants: Mutex::new(HairConstantBuffer::default()),
            watcher: Mutex::new(None),
        }
    }

    /// Replace how shader bytecode is read (defaults to the filesystem).
    pub fn with_loader(mut self, loader: BytecodeLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn frames(&self) -> &FrameController<HairCommand> {
        &self.frames
    }

    // ---------- Lifecycle ----------

    /// Bring up SDK render resources on `backend` and attach it.
    pub fn initialize(&self, backend: Backend) -> Result<()> {
        if self.is_valid() {
            return Ok(());
        }
        backend
            .sdk
            .init_render_resources()
            .map_err(|e| Error::sdk("init_render_resources", e))?;

        if self.config.hot_reload_shaders {
            match ShaderWatcher::new(self.config.hot_reload_debounce()) {
                Ok(w) => *self.watcher.lock() = Some(w),
                Err(e) => log::warn!("shader hot reload disabled: {e:#}"),
            }
        }

        log::info!("hair context initialized (SDK version {})", backend.sdk.version());
        *self.backend.write() = Some(backend);
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.backend.read().is_some()
    }

    /// Release every resource and detach the backend. Safe to call repeatedly.
    pub fn finalize(&self) {
        let Some(b) = self.backend.write().take() else {
            return;
        };
        self.frames.clear();

        self.instances.write().drain(|h, id| {
            if let Err(e) = b.sdk.free_instance(id) {
                log::warn!("free_instance({h}) failed: {e}");
            }
        });
        self.assets.write().drain(|h, id| {
            if let Err(e) = b.sdk.free_asset(id) {
                log::warn!("free_asset({h}) failed: {e}");
            }
        });
        self.shaders.write().drain(|_, id| b.device.release_pixel_shader(id));
        self.srvs.teardown(&*b.device);
        self.rtvs.teardown(&*b.device);
        *self.watcher.lock() = None;

        log::info!("hair context finalized");
    }

    /// Take over all live state of `other`, leaving it empty. Anything this
    /// context still held is finalized first.
    pub fn adopt(&mut self, other: &mut HairContext) {
        self.finalize();

        *self.backend.get_mut() = other.backend.get_mut().take();
        *self.shaders.get_mut() = other.shaders.get_mut().take();
        *self.assets.get_mut() = other.assets.get_mut().take();
        *self.instances.get_mut() = other.instances.get_mut().take();
        self.srvs.absorb(other.srvs.take());
        self.rtvs.absorb(other.rtvs.take());
        *self.watcher.get_mut() = other.watcher.get_mut().take();
    }

    pub fn sdk_version(&self) -> u32 {
        self.backend.read().as_ref().map_or(0, |b| b.sdk.version())
    }

    fn backend(&self) -> Result<Backend> {
        self.backend.read().clone().ok_or(Error::NotInitialized)
    }

    fn asset_id(&self, asset: Handle) -> Result<AssetId> {
        self.assets.read().try_get(asset).copied()
    }

    fn instance_id(&self, instance: Handle) -> Result<InstanceId> {
        self.instances.read().try_get(instance).copied()
    }

    // ---------- Shaders ----------

    pub fn shader_load_from_file(&self, path: &Path) -> Handle {
        let Some(b) = report(self.backend()) else {
            return Handle::NULL;
        };
        let key = ShaderKey {
            path: path.to_path_buf(),
        };
        let handle = self.shaders.write().load(key, |k| {
            let created = (self.loader)(&k.path)
                .and_then(|bytes| b.device.create_pixel_shader(&bytes))
                .with_context(|| format!("loading shader {}", k.path.display()));
            report(created)
        });
        if handle.is_null() {
            return handle;
        }

        log::info!("shader {} -> handle {}", path.display(), handle);
        if let Some(w) = self.watcher.lock().as_mut() {
            if let Err(e) = w.watch(path, handle) {
                log::warn!("hot reload for {}: {e:#}", path.display());
            }
        }
        handle
    }

    pub fn shader_release(&self, shader: Handle) {
        let Some(b) = report(self.backend()) else {
            return;
        };
        let destroyed = self
            .shaders
            .write()
            .release(shader, |id| b.device.release_pixel_shader(id));
        if destroyed {
            log::info!("shader {} released", shader);
            if let Some(w) = self.watcher.lock().as_mut() {
                w.unwatch(shader);
            }
        }
    }

    /// Recompile from the path it was loaded from. On failure the handle stays allocated but invalid.
    pub fn shader_reload(&self, shader: Handle) {
        let Some(b) = report(self.backend()) else {
            return;
        };
        let ok = self.shaders.write().reload(
            shader,
            |id| b.device.release_pixel_shader(id),
            |k| {
                let created = (self.loader)(&k.path)
                    .and_then(|bytes| b.device.create_pixel_shader(&bytes))
                    .with_context(|| format!("reloading shader {}", k.path.display()));
                report(created)
            },
        );
        if ok {
            log::info!("shader {} reloaded", shader);
        }
    }

    /// Reload shaders whose files changed on disk. Returns how many were reloaded.
    pub fn poll_shader_reloads(&self) -> usize {
        let due = match self.watcher.lock().as_mut() {
            Some(w) => w.poll(),
            None => return 0,
        };
        for &shader in &due {
            self.shader_reload(shader);
        }
        due.len()
    }

    // ---------- Assets ----------

    /// `settings` of `None` means the SDK defaults. With forced engine
    /// conversion the SDK always sees left-handed Y-up, but the requested
    /// settings still decide which loads share a handle.
    pub fn asset_load_from_file(&self, path: &Path, settings: Option<ConversionSettings>) -> Handle {
        let Some(b) = report(self.backend()) else {
            return Handle::NULL;
        };
        let key = AssetKey {
            path: path.to_path_buf(),
            settings: settings.unwrap_or_default(),
        };
        let handle = self.assets.write().load(key, |k| {
            let effective = self.config.effective_conversion(k.settings);
            report(
                b.sdk
                    .load_asset(&k.path, &effective)
                    .map_err(|e| Error::sdk("load_asset", e))
                    .with_context(|| k.path.display().to_string()),
            )
        });
        if !handle.is_null() {
            log::info!("asset {} -> handle {}", path.display(), handle);
        }
        handle
    }

    pub fn asset_release(&self, asset: Handle) {
        let Some(b) = report(self.backend()) else {
            return;
        };
        let destroyed = self.assets.write().release(asset, |id| {
            if let Err(e) = b.sdk.free_asset(id) {
                log::warn!("free_asset({asset}) failed: {e}");
            }
        });
        if destroyed {
            log::info!("asset {} released", asset);
        }
    }

    /// Free and load again with the same path and settings.
    pub fn asset_reload(&self, asset: Handle) {
        let Some(b) = report(self.backend()) else {
            return;
        };
        let ok = self.assets.write().reload(
            asset,
            |id| {
                if let Err(e) = b.sdk.free_asset(id) {
                    log::warn!("free_asset({asset}) failed: {e}");
                }
            },
            |k| {
                let effective = self.config.effective_conversion(k.settings);
                report(
                    b.sdk
                        .load_asset(&k.path, &effective)
                        .map_err(|e| Error::sdk("load_asset", e))
                        .with_context(|| format!("reloading {}", k.path.display())),
                )
            },
        );
        if ok {
            log::info!("asset {} reloaded", asset);
        }
    }

    pub fn asset_bone_count(&self, asset: Handle) -> u32 {
        report(self.query_asset(asset, "bone_count", |sdk, id| sdk.bone_count(id))).unwrap_or(0)
    }

    pub fn asset_bone_name(&self, asset: Handle, bone: u32) -> String {
        report(self.query_asset(asset, "bone_name", |sdk, id| sdk.bone_name(id, bone)))
            .unwrap_or_default()
    }

    pub fn asset_bone_indices(&self, asset: Handle) -> Option<Vec4> {
        report(self.query_asset(asset, "bone_indices", |sdk, id| sdk.bone_indices(id)))
    }

    pub fn asset_bone_weights(&self, asset: Handle) -> Option<Vec4> {
        report(self.query_asset(asset, "bone_weights", |sdk, id| sdk.bone_weights(id)))
    }

    pub fn asset_bind_pose(&self, asset: Handle, bone: u32) -> Option<Mat4> {
        report(self.query_asset(asset, "bind_pose", |sdk, id| sdk.bind_pose(id, bone)))
    }

    pub fn asset_default_descriptor(&self, asset: Handle) -> Option<HairDescriptor> {
        report(self.query_asset(asset, "default_descriptor", |sdk, id| {
            sdk.default_descriptor(id)
        }))
    }

    pub fn asset_texture_name(&self, asset: Handle, texture: HairTextureType) -> Option<String> {
        report(self.query_asset(asset, "texture_name", |sdk, id| {
            sdk.texture_name(id, texture)
        }))
    }

    fn query_asset<T>(
        &self,
        asset: Handle,
        call: &'static str,
        f: impl FnOnce(&dyn HairSdk, AssetId) -> crate::sdk::SdkResult<T>,
    ) -> Result<T> {
        let b = self.backend()?;
        let id = self.asset_id(asset)?;
        f(&*b.sdk, id)
            .map_err(|e| Error::sdk(call, e))
            .with_context(|| format!("asset {asset}"))
    }

    // ---------- Instances ----------

    /// Every call creates a distinct SDK instance. Failure yields `Handle::NULL`.
    pub fn instance_create(&self, asset: Handle) -> Handle {
        let created = self.backend().and_then(|b| {
            let asset_id = self.asset_id(asset)?;
            Ok(self.instances.write().insert(asset, |_| {
                report(
                    b.sdk
                        .create_instance(asset_id)
                        .map_err(|e| Error::sdk("create_instance", e))
                        .with_context(|| format!("asset {asset}")),
                )
            }))
        });
        match report(created) {
            Some(handle) if !handle.is_null() => {
                log::info!("instance {} created from asset {}", handle, asset);
                handle
            }
            _ => Handle::NULL,
        }
    }

    pub fn instance_release(&self, instance: Handle) {
        let Some(b) = report(self.backend()) else {
            return;
        };
        let destroyed = self.instances.write().release(instance, |id| {
            if let Err(e) = b.sdk.free_instance(id) {
                log::warn!("free_instance({instance}) failed: {e}");
            }
        });
        if destroyed {
            log::info!("instance {} released", instance);
        }
    }

    /// Asset the instance was created from.
    pub fn instance_asset(&self, instance: Handle) -> Handle {
        self.instances
            .read()
            .key(instance)
            .copied()
            .unwrap_or(Handle::NULL)
    }

    /// (min, max)
    pub fn instance_bounds(&self, instance: Handle) -> Option<(Vec3, Vec3)> {
        report(self.query_instance(instance, "bounds", |sdk, id| sdk.bounds(id)))
    }

    pub fn instance_descriptor(&self, instance: Handle) -> Option<HairDescriptor> {
        report(self.query_instance(instance, "current_descriptor", |sdk, id| {
            sdk.current_descriptor(id)
        }))
    }

    pub fn instance_set_descriptor(&self, instance: Handle, descriptor: &HairDescriptor) {
        report(self.query_instance(instance, "update_descriptor", |sdk, id| {
            sdk.update_descriptor(id, descriptor)
        }));
    }

    /// Bind a host texture to one of the instance's texture channels (through the SRV cache).
    pub fn instance_set_texture(&self, instance: Handle, texture_type: HairTextureType, texture: TextureId) {
        let result = self.backend().and_then(|b| {
            let id = self.instance_id(instance)?;
            let view = self
                .srvs
                .get_view(&*b.device, texture)
                .with_context(|| format!("no shader resource view for texture {:#x}", texture.0))?;
            b.sdk
                .set_texture(id, texture_type, view)
                .map_err(|e| Error::sdk("set_texture", e))
                .with_context(|| format!("instance {instance}, {texture_type:?}"))
        });
        report(result);
    }

    /// Bind the linear sampler and the instance's root/tip color textures for the custom shader.
    pub fn instance_set_texture_into_device(&self, instance: Handle, _texture_type: HairTextureType) {
        let result = self.backend().and_then(|b| {
            let id = self.instance_id(instance)?;
            bind_color_textures(&b, id);
            Ok(())
        });
        report(result);
    }

    pub fn instance_update_skinning_matrices(&self, instance: Handle, matrices: &[Mat4]) {
        report(self.query_instance(instance, "update_skinning_matrices", |sdk, id| {
            sdk.update_skinning_matrices(id, matrices)
        }));
    }

    pub fn instance_update_skinning_dqs(&self, instance: Handle, dqs: &[DualQuat]) {
        report(self.query_instance(instance, "update_skinning_dqs", |sdk, id| {
            sdk.update_skinning_dqs(id, dqs)
        }));
    }

    /// Copy `matrices` into the ring now; the SDK receives them when the queue flushes.
    pub fn instance_update_skinning_matrices_async(&self, instance: Handle, matrices: &[Mat4], vr: bool) {
        if !self.is_valid() {
            return;
        }
        let Some(id) = report(self.instance_id(instance)) else {
            return;
        };
        let reserved = self
            .skinning
            .lock()
            .reserve(matrices)
            .with_context(|| format!("async skinning for instance {instance}"));
        if let Some(range) = report(reserved) {
            self.enqueue(vr, HairCommand::UpdateSkinning { instance: id, range });
        }
    }

    fn query_instance<T>(
        &self,
        instance: Handle,
        call: &'static str,
        f: impl FnOnce(&dyn HairSdk, InstanceId) -> crate::sdk::SdkResult<T>,
    ) -> Result<T> {
        let b = self.backend()?;
        let id = self.instance_id(instance)?;
        f(&*b.sdk, id)
            .map_err(|e| Error::sdk(call, e))
            .with_context(|| format!("instance {instance}"))
    }

    // ---------- Per-frame commands ----------

    pub fn begin_scene(&self, vr: bool) {
        self.frames.begin_scene(vr);
    }

    pub fn end_scene(&self, vr: bool) {
        self.frames.end_scene(vr);
    }

    fn enqueue(&self, vr: bool, command: HairCommand) {
        if !self.is_valid() {
            log::debug!("dropping {command:?}: context not initialized");
            return;
        }
        self.frames.push(vr, command);
    }

    /// Mono queue only.
    pub fn set_view_projection(&self, view: Mat4, projection: Mat4, fov: f32) {
        self.enqueue(
            false,
            HairCommand::SetViewProjection(Box::new(ViewProjection {
                view,
                projection,
                fov,
            })),
        );
    }

    /// VR queue only. Each eye's replay picks its own matrices.
    pub fn set_view_projection_stereo(
        &self,
        left: (Mat4, Mat4),
        right: (Mat4, Mat4),
        fov: f32,
        single_pass: bool,
    ) {
        let eye = |(view, projection): (Mat4, Mat4)| ViewProjection {
            view,
            projection,
            fov,
        };
        self.enqueue(
            true,
            HairCommand::SetViewProjectionStereo(Box::new(StereoViewProjection {
                eyes: [eye(left), eye(right)],
                single_pass,
            })),
        );
    }

    pub fn set_render_target(&self, color: Option<TextureId>, depth: Option<TextureId>, vr: bool) {
        self.enqueue(vr, HairCommand::SetRenderTarget { color, depth });
    }

    pub fn set_shader(&self, shader: Handle, vr: bool) {
        self.enqueue(vr, HairCommand::SetShader(shader));
    }

    /// At most `MAX_LIGHTS` are kept.
    pub fn set_lights(&self, lights: &[LightData], vr: bool) {
        self.enqueue(vr, HairCommand::SetLights(Box::new(LightSet::from_slice(lights))));
    }

    pub fn render(&self, instance: Handle, vr: bool) {
        self.enqueue(vr, HairCommand::Render(instance));
    }

    pub fn render_shadow(&self, instance: Handle, vr: bool) {
        self.enqueue(vr, HairCommand::RenderShadow(instance));
    }

    /// In VR the simulation steps once per frame: on the left eye of whichever
    /// counter `single_pass` selects.
    pub fn step_simulation(&self, dt: f32, vr: bool, single_pass: bool) {
        self.enqueue(vr, HairCommand::StepSimulation { dt, vr, single_pass });
    }

    // ---------- VR control ----------

    pub fn enable_vr_rendering(&self, enabled: bool) {
        self.frames.set_vr_enabled(enabled);
    }

    pub fn set_shutting_down(&self) {
        self.frames.signal_shutdown(self.config.shutdown_grace_frames);
        log::info!(
            "shutting down: discarding the next {} flushes per pipeline",
            self.config.shutdown_grace_frames
        );
    }

    pub fn reset_vr_pass(&self) {
        self.frames.reset_vr_pass();
    }

    // ---------- Render thread ----------

    fn render_pass(&self) -> Option<RenderPass<'_>> {
        let backend = self.backend().ok()?;
        Some(RenderPass {
            ctx: self,
            backend,
            depth: DepthState::for_reverse_z(self.config.reverse_z),
            base_viewport: None,
        })
    }

    pub fn flush(&self) -> FlushReport {
        match self.render_pass() {
            Some(mut pass) => self.frames.flush(&mut pass),
            None => FlushReport::default(),
        }
    }

    pub fn flush_vr(&self) -> FlushReport {
        match self.render_pass() {
            Some(mut pass) => self.frames.flush_vr(&mut pass),
            None => FlushReport::default(),
        }
    }

    pub fn flush_vr_single_pass(&self) -> FlushReport {
        match self.render_pass() {
            Some(mut pass) => self.frames.flush_vr_single_pass(&mut pass),
            None => FlushReport::default(),
        }
    }

    /// Dispatch a host render event code. Unknown codes are logged and ignored.
    pub fn handle_render_event(&self, code: i32) -> FlushReport {
        match RenderEvent::try_from(code) {
            Ok(RenderEvent::Flush) => self.flush(),
            Ok(RenderEvent::FlushVr) => self.flush_vr(),
            Ok(RenderEvent::FlushVrSinglePass) => self.flush_vr_single_pass(),
            Err(code) => {
                log::warn!("unknown render event {code}");
                FlushReport::default()
            }
        }
    }

    fn execute(&self, b: &Backend, command: &HairCommand, pass: &PassInfo) -> Result<()> {
        match command {
            HairCommand::SetViewProjection(vp) => b
                .sdk
                .set_view_projection(&vp.view, &vp.projection, vp.fov)
                .map_err(|e| Error::sdk("set_view_projection", e)),

            HairCommand::SetViewProjectionStereo(stereo) => {
                let vp = &stereo.eyes[pass.eye(stereo.single_pass).index()];
                b.sdk
                    .set_view_projection(&vp.view, &vp.projection, vp.fov)
                    .map_err(|e| Error::sdk("set_view_projection", e))
            }

            HairCommand::SetRenderTarget { color, depth } => {
                let view = match color {
                    Some(texture) => Some(
                        self.rtvs
                            .get_view(&*b.device, *texture)
                            .context("no render target view")?,
                    ),
                    None => None,
                };
                b.device.bind_render_target(view, *depth);
                Ok(())
            }

            HairCommand::SetShader(shader) => {
                let id = *self.shaders.read().try_get(*shader)?;
                b.device.bind_pixel_shader(Some(id));
                Ok(())
            }

            HairCommand::SetLights(lights) => {
                self.constants.lock().set_lights(lights);
                Ok(())
            }

            HairCommand::Render(instance) => self.render_instance(b, *instance),

            HairCommand::RenderShadow(instance) => {
                let id = self.instance_id(*instance)?;
                bind_sdk_resources(b, id);
                b.sdk
                    .render_hairs(id, ShaderSettings::SHADOW)
                    .map_err(|e| Error::sdk("render_hairs", e))
                    .with_context(|| format!("shadow of instance {instance}"))
            }

            HairCommand::StepSimulation { dt, vr, single_pass } => {
                if *vr && pass.eye(*single_pass) != Eye::Left {
                    return Ok(());
                }
                b.sdk
                    .step_simulation(*dt)
                    .map_err(|e| Error::sdk("step_simulation", e))
            }

            HairCommand::UpdateSkinning { instance, range } => {
                let ring = self.skinning.lock();
                let matrices = ring
                    .slice(*range)
                    .with_context(|| format!("skinning range {range:?} out of ring"))?;
                b.sdk
                    .update_skinning_matrices(*instance, matrices)
                    .map_err(|e| Error::sdk("update_skinning_matrices", e))
                    .with_context(|| format!("instance {instance}"))
            }
        }
    }

    fn render_instance(&self, b: &Backend, instance: Handle) -> Result<()> {
        let id = self.instance_id(instance)?;

        {
            let mut constants = self.constants.lock();
            match b.sdk.prepare_shader_constants(id) {
                Ok(block) => constants.set_hair_constants(&block),
                Err(e) => log::warn!("prepare_shader_constants({instance}) failed: {e}"),
            }
            if let Err(e) = b.device.upload_constants(constants.as_bytes()) {
                log::warn!("constant upload for instance {instance} failed: {e}");
            }
        }

        bind_sdk_resources(b, id);
        bind_color_textures(b, id);

        b.sdk
            .render_hairs(id, ShaderSettings::COLOR)
            .map_err(|e| Error::sdk("render_hairs", e))
            .with_context(|| format!("instance {instance}"))?;

        if let Err(e) = b.sdk.render_visualization(id) {
            log::debug!("render_visualization({instance}) failed: {e}");
        }
        Ok(())
    }
}

impl Drop for HairContext {
    fn drop(&mut self) {
        self.finalize();
    }
}

fn bind_sdk_resources(b: &Backend, id: InstanceId) {
    match b.sdk.shader_resources(id) {
        Ok(views) => b.device.bind_shader_resources(0, &views),
        Err(e) => log::warn!("shader_resources({id}) failed: {e}"),
    }
}

/// Sampler in slot 0, root and tip color right after the SDK's own resources.
fn bind_color_textures(b: &Backend, id: InstanceId) {
    b.device.bind_linear_sampler(0);
    let view = |texture| b.sdk.texture_view(id, texture).ok().flatten();
    let colors = [
        view(HairTextureType::RootColor),
        view(HairTextureType::TipColor),
    ];
    b.device
        .bind_shader_resources(b.sdk.shader_resource_slots(), &colors);
}

/// Log an error at the ABI boundary and turn it into `None`.
fn report<T>(result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_invalid_handle() || matches!(e.root(), Error::NotInitialized) => {
            log::debug!("{e}");
            None
        }
        Err(e) => {
            log::warn!("{e}");
            None
        }
    }
}

// ====================== RENDER PASS ======================

struct RenderPass<'a> {
    ctx: &'a HairContext,
    backend: Backend,
    depth: DepthState,
    base_viewport: Option<Viewport>,
}

impl PassTarget<HairCommand> for RenderPass<'_> {
    fn begin_pass(&mut self) {
        self.backend.device.set_depth_state(self.depth);
    }

    fn set_eye_viewport(&mut self, eye: Eye) {
        let device = &self.backend.device;
        let base = *self.base_viewport.get_or_insert_with(|| device.viewport());
        device.set_viewport(match eye {
            Eye::Left => base,
            Eye::Right => base.right_eye(),
        });
    }

    fn execute(&mut self, command: &HairCommand, pass: &PassInfo) {
        report(self.ctx.execute(&self.backend, command, pass));
    }

    fn end_pass(&mut self) {
        if let Some(base) = self.base_viewport.take() {
            self.backend.device.set_viewport(base);
        }
    }
}
