// src/ffi.rs
//! C plugin ABI.
//!
//! One process-wide [`HairContext`] built from the backend registered with
//! [`register_backend`]. Every entry point:
//! - tolerates an uninitialized context (auto-initializes once a backend exists)
//! - tolerates null pointers and bad handles
//! - catches panics and returns a neutral value
//!
//! Pointer arguments are read unaligned; matrices are 16 column-major floats.
//! Returned strings stay valid until the next string-returning call on the same thread.

use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use parking_lot::RwLock;

use crate::config::BridgeConfig;
use crate::gpu::{GpuDevice, TextureId};
use crate::hair_context::{Backend, HairContext};
use crate::lighting::{LightData, MAX_LIGHTS};
use crate::logging::{self, LogCallback};
use crate::resource_table::Handle;
use crate::sdk::{
    ConversionSettings, DualQuat, Handedness, HairDescriptor, HairSdk, HairTextureType, UpAxis,
};

struct Plugin {
    backend: Option<Backend>,
    context: Option<Arc<HairContext>>,
}

static PLUGIN: RwLock<Plugin> = parking_lot::const_rwlock(Plugin {
    backend: None,
    context: None,
});

thread_local! {
    static RETURN_STR: RefCell<CString> = RefCell::new(CString::default());
}

/// Hand the ABI the SDK and device to build its context from.
/// Takes effect at the next `hw_initialize` (or the first auto-initializing call).
pub fn register_backend(sdk: Arc<dyn HairSdk>, device: Arc<dyn GpuDevice>) {
    PLUGIN.write().backend = Some(Backend::new(sdk, device));
}

/// ABI-side conversion settings. `has_matrix == 0` ignores `matrix`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HwConversionSettings {
    pub up_axis: u32,
    pub handedness: u32,
    pub scene_unit: f32,
    pub has_matrix: u32,
    pub matrix: [f32; 16],
}

impl From<HwConversionSettings> for ConversionSettings {
    fn from(raw: HwConversionSettings) -> Self {
        ConversionSettings {
            up_axis: UpAxis::from_raw(raw.up_axis),
            handedness: Handedness::from_raw(raw.handedness),
            scene_unit: raw.scene_unit,
            conversion_matrix: (raw.has_matrix != 0).then(|| Mat4::from_cols_array(&raw.matrix)),
        }
    }
}

/// ABI-side hair descriptor. Flags are 32-bit, any nonzero value is true.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HwHairDescriptor {
    pub width: f32,
    pub width_root_scale: f32,
    pub width_tip_scale: f32,
    pub width_noise: f32,
    pub clump_scale: f32,
    pub clump_roundness: f32,
    pub clump_noise: f32,
    pub wave_scale: f32,
    pub wave_scale_noise: f32,
    pub wave_frequency: f32,
    pub wave_frequency_noise: f32,
    pub length_noise: f32,
    pub length_scale: f32,
    pub density: f32,
    pub stiffness: f32,
    pub stiffness_strength: f32,
    pub root_stiffness: f32,
    pub damping: f32,
    pub inertia_scale: f32,
    pub wind_noise: f32,
    pub gravity: [f32; 3],
    pub wind: [f32; 3],
    pub root_color: [f32; 4],
    pub tip_color: [f32; 4],
    pub specular_color: [f32; 4],
    pub lod_distance: f32,
    pub enable: u32,
    pub simulate: u32,
    pub cast_shadows: u32,
    pub receive_shadows: u32,
    pub use_textures: u32,
    pub visualize_bones: u32,
}

impl From<HwHairDescriptor> for HairDescriptor {
    fn from(raw: HwHairDescriptor) -> Self {
        HairDescriptor {
            width: raw.width,
            width_root_scale: raw.width_root_scale,
            width_tip_scale: raw.width_tip_scale,
            width_noise: raw.width_noise,
            clump_scale: raw.clump_scale,
            clump_roundness: raw.clump_roundness,
            clump_noise: raw.clump_noise,
            wave_scale: raw.wave_scale,
            wave_scale_noise: raw.wave_scale_noise,
            wave_frequency: raw.wave_frequency,
            wave_frequency_noise: raw.wave_frequency_noise,
            length_noise: raw.length_noise,
            length_scale: raw.length_scale,
            density: raw.density,
            stiffness: raw.stiffness,
            stiffness_strength: raw.stiffness_strength,
            root_stiffness: raw.root_stiffness,
            damping: raw.damping,
            inertia_scale: raw.inertia_scale,
            wind_noise: raw.wind_noise,
            gravity: Vec3::from_array(raw.gravity),
            wind: Vec3::from_array(raw.wind),
            root_color: Vec4::from_array(raw.root_color),
            tip_color: Vec4::from_array(raw.tip_color),
            specular_color: Vec4::from_array(raw.specular_color),
            lod_distance: raw.lod_distance,
            enable: raw.enable != 0,
            simulate: raw.simulate != 0,
            cast_shadows: raw.cast_shadows != 0,
            receive_shadows: raw.receive_shadows != 0,
            use_textures: raw.use_textures != 0,
            visualize_bones: raw.visualize_bones != 0,
        }
    }
}

impl From<HairDescriptor> for HwHairDescriptor {
    fn from(d: HairDescriptor) -> Self {
        HwHairDescriptor {
            width: d.width,
            width_root_scale: d.width_root_scale,
            width_tip_scale: d.width_tip_scale,
            width_noise: d.width_noise,
            clump_scale: d.clump_scale,
            clump_roundness: d.clump_roundness,
            clump_noise: d.clump_noise,
            wave_scale: d.wave_scale,
            wave_scale_noise: d.wave_scale_noise,
            wave_frequency: d.wave_frequency,
            wave_frequency_noise: d.wave_frequency_noise,
            length_noise: d.length_noise,
            length_scale: d.length_scale,
            density: d.density,
            stiffness: d.stiffness,
            stiffness_strength: d.stiffness_strength,
            root_stiffness: d.root_stiffness,
            damping: d.damping,
            inertia_scale: d.inertia_scale,
            wind_noise: d.wind_noise,
            gravity: d.gravity.to_array(),
            wind: d.wind.to_array(),
            root_color: d.root_color.to_array(),
            tip_color: d.tip_color.to_array(),
            specular_color: d.specular_color.to_array(),
            lod_distance: d.lod_distance,
            enable: d.enable.into(),
            simulate: d.simulate.into(),
            cast_shadows: d.cast_shadows.into(),
            receive_shadows: d.receive_shadows.into(),
            use_textures: d.use_textures.into(),
            visualize_bones: d.visualize_bones.into(),
        }
    }
}

// ====================== HELPERS ======================

fn guard<T>(entry: &'static str, fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            log::error!("{entry}: panic stopped at the plugin boundary");
            fallback
        }
    }
}

impl Plugin {
    /// Build the context from the registered backend. Config and logger setup
    /// only run once there is a backend to build from.
    fn start(&mut self, explicit: bool, load_config: impl FnOnce() -> anyhow::Result<BridgeConfig>) -> bool {
        if self.context.is_some() {
            return true;
        }
        let Some(backend) = self.backend.clone() else {
            if explicit {
                log::error!("hw_initialize: no SDK/device backend registered");
            }
            return false;
        };

        let loaded = load_config();
        let level = loaded
            .as_ref()
            .ok()
            .and_then(|c| c.level_filter().ok())
            .unwrap_or(log::LevelFilter::Info);
        logging::init(level);
        logging::install_panic_hook();
        let config = loaded.unwrap_or_else(|e| {
            log::warn!("bridge config ignored, using defaults: {e:#}");
            BridgeConfig::default()
        });

        let context = HairContext::new(config);
        match context.initialize(backend) {
            Ok(()) => {
                self.context = Some(Arc::new(context));
                true
            }
            Err(e) => {
                log::error!("hw_initialize: {e}");
                false
            }
        }
    }
}

fn initialize(explicit: bool) -> bool {
    PLUGIN.write().start(explicit, BridgeConfig::from_env)
}

fn live_context() -> Option<Arc<HairContext>> {
    PLUGIN.read().context.clone()
}

/// Run `f` on the live context, initializing it first if needed.
/// The plugin lock is released before `f` runs, since scene and flush calls can block.
fn with_context<T>(f: impl FnOnce(&HairContext) -> T) -> Option<T> {
    let ctx = match live_context() {
        Some(ctx) => ctx,
        None if initialize(false) => live_context()?,
        None => return None,
    };
    Some(f(&ctx))
}

fn handle(raw: u32) -> Handle {
    Handle::from_raw(raw)
}

unsafe fn path_arg(ptr: *const c_char) -> Option<PathBuf> {
    if ptr.is_null() {
        return None;
    }
    let text = CStr::from_ptr(ptr).to_string_lossy();
    if text.is_empty() {
        return None;
    }
    Some(PathBuf::from(text.as_ref()))
}

unsafe fn mat_arg(ptr: *const [f32; 16]) -> Option<Mat4> {
    if ptr.is_null() {
        return None;
    }
    Some(Mat4::from_cols_array(&ptr.read_unaligned()))
}

unsafe fn mats_arg(ptr: *const [f32; 16], count: i32) -> Vec<Mat4> {
    let count = usize::try_from(count).unwrap_or(0);
    if ptr.is_null() {
        return Vec::new();
    }
    (0..count)
        .map(|i| Mat4::from_cols_array(&ptr.add(i).read_unaligned()))
        .collect()
}

unsafe fn write_out<T>(ptr: *mut T, value: Option<T>) {
    if let (false, Some(value)) = (ptr.is_null(), value) {
        ptr.write_unaligned(value);
    }
}

fn texture_arg(ptr: *mut std::ffi::c_void) -> Option<TextureId> {
    (!ptr.is_null()).then(|| TextureId(ptr as usize as u64))
}

fn return_str(text: String) -> *const c_char {
    let owned = CString::new(text.replace('\0', "")).unwrap_or_default();
    RETURN_STR.with(|cell| {
        *cell.borrow_mut() = owned;
        cell.borrow().as_ptr()
    })
}

// ====================== LIFECYCLE ======================

#[no_mangle]
pub extern "C" fn hw_initialize() -> bool {
    guard("hw_initialize", false, || initialize(true))
}

#[no_mangle]
pub extern "C" fn hw_finalize() {
    guard("hw_finalize", (), || {
        let context = PLUGIN.write().context.take();
        if let Some(ctx) = context {
            ctx.finalize();
        }
    })
}

#[no_mangle]
pub extern "C" fn hw_get_sdk_version() -> i32 {
    guard("hw_get_sdk_version", 0, || {
        with_context(|ctx| ctx.sdk_version() as i32).unwrap_or(0)
    })
}

#[no_mangle]
pub extern "C" fn hw_set_log_callback(callback: Option<LogCallback>) {
    logging::set_callback(callback);
}

/// Event code for a mono flush, for hosts that issue plugin events by id.
#[no_mangle]
pub extern "C" fn hw_get_flush_event_id() -> i32 {
    0
}

// ====================== RESOURCES ======================

#[no_mangle]
pub unsafe extern "C" fn hw_shader_load_from_file(path: *const c_char) -> u32 {
    let Some(path) = path_arg(path) else {
        return Handle::NULL.raw();
    };
    guard("hw_shader_load_from_file", Handle::NULL.raw(), || {
        with_context(|ctx| ctx.shader_load_from_file(&path))
            .unwrap_or(Handle::NULL)
            .raw()
    })
}

#[no_mangle]
pub extern "C" fn hw_shader_release(shader: u32) {
    guard("hw_shader_release", (), || {
        with_context(|ctx| ctx.shader_release(handle(shader)));
    })
}

#[no_mangle]
pub extern "C" fn hw_shader_reload(shader: u32) {
    guard("hw_shader_reload", (), || {
        with_context(|ctx| ctx.shader_reload(handle(shader)));
    })
}

/// Reload shaders whose files changed. Returns how many were reloaded.
#[no_mangle]
pub extern "C" fn hw_poll_shader_reloads() -> i32 {
    guard("hw_poll_shader_reloads", 0, || {
        with_context(|ctx| ctx.poll_shader_reloads() as i32).unwrap_or(0)
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_asset_load_from_file(path: *const c_char) -> u32 {
    hw_asset_load_from_file_with_settings(path, std::ptr::null())
}

/// `settings` may be null for the SDK defaults.
#[no_mangle]
pub unsafe extern "C" fn hw_asset_load_from_file_with_settings(
    path: *const c_char,
    settings: *const HwConversionSettings,
) -> u32 {
    let Some(path) = path_arg(path) else {
        return Handle::NULL.raw();
    };
    let settings = (!settings.is_null()).then(|| ConversionSettings::from(settings.read_unaligned()));
    guard("hw_asset_load_from_file", Handle::NULL.raw(), || {
        with_context(|ctx| ctx.asset_load_from_file(&path, settings))
            .unwrap_or(Handle::NULL)
            .raw()
    })
}

#[no_mangle]
pub extern "C" fn hw_asset_release(asset: u32) {
    guard("hw_asset_release", (), || {
        with_context(|ctx| ctx.asset_release(handle(asset)));
    })
}

#[no_mangle]
pub extern "C" fn hw_asset_reload(asset: u32) {
    guard("hw_asset_reload", (), || {
        with_context(|ctx| ctx.asset_reload(handle(asset)));
    })
}

#[no_mangle]
pub extern "C" fn hw_asset_get_num_bones(asset: u32) -> i32 {
    guard("hw_asset_get_num_bones", 0, || {
        with_context(|ctx| ctx.asset_bone_count(handle(asset)) as i32).unwrap_or(0)
    })
}

#[no_mangle]
pub extern "C" fn hw_asset_get_bone_name(asset: u32, bone: i32) -> *const c_char {
    guard("hw_asset_get_bone_name", std::ptr::null(), || {
        let name = u32::try_from(bone)
            .ok()
            .and_then(|bone| with_context(|ctx| ctx.asset_bone_name(handle(asset), bone)))
            .unwrap_or_default();
        return_str(name)
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_asset_get_bone_indices(asset: u32, out: *mut [f32; 4]) {
    guard("hw_asset_get_bone_indices", (), || {
        let value = with_context(|ctx| ctx.asset_bone_indices(handle(asset))).flatten();
        write_out(out, value.map(|v| v.to_array()));
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_asset_get_bone_weights(asset: u32, out: *mut [f32; 4]) {
    guard("hw_asset_get_bone_weights", (), || {
        let value = with_context(|ctx| ctx.asset_bone_weights(handle(asset))).flatten();
        write_out(out, value.map(|v| v.to_array()));
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_asset_get_bind_pose(asset: u32, bone: i32, out: *mut [f32; 16]) {
    guard("hw_asset_get_bind_pose", (), || {
        let Ok(bone) = u32::try_from(bone) else {
            return;
        };
        let value = with_context(|ctx| ctx.asset_bind_pose(handle(asset), bone)).flatten();
        write_out(out, value.map(|m| m.to_cols_array()));
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_asset_get_default_descriptor(asset: u32, out: *mut HwHairDescriptor) {
    guard("hw_asset_get_default_descriptor", (), || {
        let value = with_context(|ctx| ctx.asset_default_descriptor(handle(asset))).flatten();
        write_out(out, value.map(HwHairDescriptor::from));
    })
}

/// Empty string for unknown texture types or missing textures.
#[no_mangle]
pub extern "C" fn hw_asset_get_texture_name(asset: u32, texture_type: i32) -> *const c_char {
    guard("hw_asset_get_texture_name", std::ptr::null(), || {
        let name = HairTextureType::from_raw(texture_type)
            .and_then(|ty| with_context(|ctx| ctx.asset_texture_name(handle(asset), ty)).flatten())
            .unwrap_or_default();
        return_str(name)
    })
}

// ====================== INSTANCES ======================

#[no_mangle]
pub extern "C" fn hw_instance_create(asset: u32) -> u32 {
    guard("hw_instance_create", Handle::NULL.raw(), || {
        with_context(|ctx| ctx.instance_create(handle(asset)))
            .unwrap_or(Handle::NULL)
            .raw()
    })
}

#[no_mangle]
pub extern "C" fn hw_instance_release(instance: u32) {
    guard("hw_instance_release", (), || {
        with_context(|ctx| ctx.instance_release(handle(instance)));
    })
}

#[no_mangle]
pub extern "C" fn hw_instance_get_asset(instance: u32) -> u32 {
    guard("hw_instance_get_asset", Handle::NULL.raw(), || {
        with_context(|ctx| ctx.instance_asset(handle(instance)))
            .unwrap_or(Handle::NULL)
            .raw()
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_instance_get_bounds(instance: u32, out_min: *mut [f32; 3], out_max: *mut [f32; 3]) {
    guard("hw_instance_get_bounds", (), || {
        let bounds: Option<(Vec3, Vec3)> =
            with_context(|ctx| ctx.instance_bounds(handle(instance))).flatten();
        write_out(out_min, bounds.map(|(min, _)| min.to_array()));
        write_out(out_max, bounds.map(|(_, max)| max.to_array()));
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_instance_get_descriptor(instance: u32, out: *mut HwHairDescriptor) {
    guard("hw_instance_get_descriptor", (), || {
        let value = with_context(|ctx| ctx.instance_descriptor(handle(instance))).flatten();
        write_out(out, value.map(HwHairDescriptor::from));
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_instance_set_descriptor(instance: u32, descriptor: *const HwHairDescriptor) {
    if descriptor.is_null() {
        return;
    }
    let descriptor = HairDescriptor::from(descriptor.read_unaligned());
    guard("hw_instance_set_descriptor", (), || {
        with_context(|ctx| ctx.instance_set_descriptor(handle(instance), &descriptor));
    })
}

/// `texture` is the host's native texture pointer.
#[no_mangle]
pub extern "C" fn hw_instance_set_texture(instance: u32, texture_type: i32, texture: *mut std::ffi::c_void) {
    let (Some(ty), Some(texture)) = (HairTextureType::from_raw(texture_type), texture_arg(texture)) else {
        return;
    };
    guard("hw_instance_set_texture", (), || {
        with_context(|ctx| ctx.instance_set_texture(handle(instance), ty, texture));
    })
}

#[no_mangle]
pub extern "C" fn hw_instance_set_texture_into_device(instance: u32, texture_type: i32) {
    let Some(ty) = HairTextureType::from_raw(texture_type) else {
        return;
    };
    guard("hw_instance_set_texture_into_device", (), || {
        with_context(|ctx| ctx.instance_set_texture_into_device(handle(instance), ty));
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_instance_update_skinning_matrices(
    instance: u32,
    num_bones: i32,
    matrices: *const [f32; 16],
) {
    let matrices = mats_arg(matrices, num_bones);
    guard("hw_instance_update_skinning_matrices", (), || {
        with_context(|ctx| ctx.instance_update_skinning_matrices(handle(instance), &matrices));
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_instance_update_skinning_matrices_async(
    instance: u32,
    num_bones: i32,
    matrices: *const [f32; 16],
    vr: bool,
) {
    let matrices = mats_arg(matrices, num_bones);
    guard("hw_instance_update_skinning_matrices_async", (), || {
        with_context(|ctx| {
            ctx.instance_update_skinning_matrices_async(handle(instance), &matrices, vr)
        });
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_instance_update_skinning_dqs(instance: u32, num_bones: i32, dqs: *const DualQuat) {
    let count = usize::try_from(num_bones).unwrap_or(0);
    let dqs: Vec<DualQuat> = if dqs.is_null() {
        Vec::new()
    } else {
        (0..count).map(|i| dqs.add(i).read_unaligned()).collect()
    };
    guard("hw_instance_update_skinning_dqs", (), || {
        with_context(|ctx| ctx.instance_update_skinning_dqs(handle(instance), &dqs));
    })
}

// ====================== PER FRAME ======================

#[no_mangle]
pub extern "C" fn hw_begin_scene(vr: bool) {
    guard("hw_begin_scene", (), || {
        with_context(|ctx| ctx.begin_scene(vr));
    })
}

#[no_mangle]
pub extern "C" fn hw_end_scene(vr: bool) {
    guard("hw_end_scene", (), || {
        with_context(|ctx| ctx.end_scene(vr));
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_set_view_projection(view: *const [f32; 16], proj: *const [f32; 16], fov: f32) {
    let (Some(view), Some(proj)) = (mat_arg(view), mat_arg(proj)) else {
        return;
    };
    guard("hw_set_view_projection", (), || {
        with_context(|ctx| ctx.set_view_projection(view, proj, fov));
    })
}

#[no_mangle]
pub unsafe extern "C" fn hw_set_view_projection_stereo(
    view: *const [f32; 16],
    proj: *const [f32; 16],
    view2: *const [f32; 16],
    proj2: *const [f32; 16],
    fov: f32,
    single_pass: bool,
) {
    let (Some(view), Some(proj), Some(view2), Some(proj2)) =
        (mat_arg(view), mat_arg(proj), mat_arg(view2), mat_arg(proj2))
    else {
        return;
    };
    guard("hw_set_view_projection_stereo", (), || {
        with_context(|ctx| ctx.set_view_projection_stereo((view, proj), (view2, proj2), fov, single_pass));
    })
}

#[no_mangle]
pub extern "C" fn hw_set_render_target(
    framebuffer: *mut std::ffi::c_void,
    depthbuffer: *mut std::ffi::c_void,
    vr: bool,
) {
    let (color, depth) = (texture_arg(framebuffer), texture_arg(depthbuffer));
    guard("hw_set_render_target", (), || {
        with_context(|ctx| ctx.set_render_target(color, depth, vr));
    })
}

#[no_mangle]
pub extern "C" fn hw_set_shader(shader: u32, vr: bool) {
    guard("hw_set_shader", (), || {
        with_context(|ctx| ctx.set_shader(handle(shader), vr));
    })
}

/// At most 8 lights are used.
#[no_mangle]
pub unsafe extern "C" fn hw_set_lights(num_lights: i32, lights: *const LightData, vr: bool) {
    let count = usize::try_from(num_lights).unwrap_or(0).min(MAX_LIGHTS);
    let lights: Vec<LightData> = if lights.is_null() {
        Vec::new()
    } else {
        (0..count).map(|i| lights.add(i).read_unaligned()).collect()
    };
    guard("hw_set_lights", (), || {
        with_context(|ctx| ctx.set_lights(&lights, vr));
    })
}

#[no_mangle]
pub extern "C" fn hw_render(instance: u32, vr: bool) {
    guard("hw_render", (), || {
        with_context(|ctx| ctx.render(handle(instance), vr));
    })
}

#[no_mangle]
pub extern "C" fn hw_render_shadow(instance: u32, vr: bool) {
    guard("hw_render_shadow", (), || {
        with_context(|ctx| ctx.render_shadow(handle(instance), vr));
    })
}

#[no_mangle]
pub extern "C" fn hw_step_simulation(dt: f32, vr: bool, single_pass: bool) {
    guard("hw_step_simulation", (), || {
        with_context(|ctx| ctx.step_simulation(dt, vr, single_pass));
    })
}

// ====================== VR ======================

#[no_mangle]
pub extern "C" fn hw_enable_vr_rendering(enable: bool) {
    guard("hw_enable_vr_rendering", (), || {
        with_context(|ctx| ctx.enable_vr_rendering(enable));
    })
}

#[no_mangle]
pub extern "C" fn hw_set_shutting_down_flag() {
    guard("hw_set_shutting_down_flag", (), || {
        with_context(|ctx| ctx.set_shutting_down());
    })
}

#[no_mangle]
pub extern "C" fn hw_reset_vr_pass() {
    guard("hw_reset_vr_pass", (), || {
        with_context(|ctx| ctx.reset_vr_pass());
    })
}

// ====================== RENDER THREAD ======================

extern "C" fn render_event(code: i32) {
    guard("render_event", (), || {
        with_context(|ctx| ctx.handle_render_event(code));
    })
}

/// Callback the host render thread invokes with a render event code.
#[no_mangle]
pub extern "C" fn hw_get_render_event_func() -> extern "C" fn(i32) {
    render_event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDevice, MockSdk};

    #[test]
    fn guard_turns_panic_into_fallback() {
        assert_eq!(guard("test", 7, || panic!("boom")), 7);
        assert_eq!(guard("test", 7, || 3), 3);
    }

    #[test]
    fn conversion_settings_from_abi() {
        let mut matrix = [0.0f32; 16];
        matrix[0] = 2.0;
        let raw = HwConversionSettings {
            up_axis: 2,
            handedness: 1,
            scene_unit: 0.01,
            has_matrix: 0,
            matrix,
        };
        let settings = ConversionSettings::from(raw);
        assert_eq!(settings.up_axis, UpAxis::ZUp);
        assert_eq!(settings.handedness, Handedness::RightHanded);
        assert!(settings.conversion_matrix.is_none());

        let settings = ConversionSettings::from(HwConversionSettings { has_matrix: 1, ..raw });
        assert_eq!(settings.conversion_matrix.map(|m| m.x_axis.x), Some(2.0));
    }

    #[test]
    fn matrices_are_read_unaligned() {
        let mut bytes = vec![0u8; 4 + 64];
        let cols = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)).to_cols_array();
        bytes[4..].copy_from_slice(bytemuck::cast_slice(&cols));
        let ptr = bytes[4..].as_ptr() as *const [f32; 16];
        let read = unsafe { mats_arg(ptr, 1) };
        assert_eq!(read[0].w_axis.x, 5.0);
        assert!(unsafe { mats_arg(std::ptr::null(), 3) }.is_empty());
        assert!(unsafe { mats_arg(ptr, -1) }.is_empty());
    }

    #[test]
    fn descriptor_flags_accept_any_nonzero_word() {
        let mut host = HwHairDescriptor::from(HairDescriptor::default());
        assert_eq!(host.enable, 1);
        assert_eq!(host.use_textures, 0);
        host.enable = 2;
        host.use_textures = 0xFFFF_FFFF;
        host.simulate = 0;
        host.gravity = [0.0, 0.0, -9.8];

        // host memory, not necessarily aligned
        let size = std::mem::size_of::<HwHairDescriptor>();
        let mut bytes = vec![0u8; 1 + size];
        unsafe {
            std::ptr::copy_nonoverlapping(
                &host as *const HwHairDescriptor as *const u8,
                bytes[1..].as_mut_ptr(),
                size,
            );
        }
        let read = unsafe { (bytes[1..].as_ptr() as *const HwHairDescriptor).read_unaligned() };
        let descriptor = HairDescriptor::from(read);
        assert!(descriptor.enable);
        assert!(descriptor.use_textures);
        assert!(!descriptor.simulate);
        assert_eq!(descriptor.gravity, Vec3::new(0.0, 0.0, -9.8));
        assert_eq!(HwHairDescriptor::from(descriptor).enable, 1);
    }

    #[test]
    fn start_skips_config_without_backend() {
        let mut plugin = Plugin {
            backend: None,
            context: None,
        };
        let mut loads = 0;
        assert!(!plugin.start(false, || {
            loads += 1;
            Ok(BridgeConfig::default())
        }));
        assert!(!plugin.start(true, || {
            loads += 1;
            Ok(BridgeConfig::default())
        }));
        assert_eq!(loads, 0);

        plugin.backend = Some(Backend::new(Arc::new(MockSdk::default()), Arc::new(MockDevice::default())));
        assert!(plugin.start(false, || {
            loads += 1;
            Err(anyhow::anyhow!("unreadable"))
        }));
        assert!(plugin.start(false, || {
            loads += 1;
            Ok(BridgeConfig::default())
        }));
        assert_eq!(loads, 1);
        assert!(plugin.context.as_ref().is_some_and(|ctx| ctx.is_valid()));
    }

    // The only test touching the process-wide plugin state.
    #[test]
    fn plugin_lifecycle() {
        let hair = CString::new("hair.apx").unwrap();
        let empty = CString::default();

        hw_finalize();
        PLUGIN.write().backend = None;
        assert!(!hw_initialize());
        assert_eq!(unsafe { hw_asset_load_from_file(hair.as_ptr()) }, Handle::NULL.raw());

        let sdk = Arc::new(MockSdk::default());
        let device = Arc::new(MockDevice::default());
        register_backend(sdk.clone(), device.clone());
        assert!(hw_initialize());
        assert!(hw_initialize());
        assert_eq!(hw_get_sdk_version(), 0x0105);

        let asset = unsafe { hw_asset_load_from_file(hair.as_ptr()) };
        assert_ne!(asset, Handle::NULL.raw());
        assert_eq!(unsafe { hw_asset_load_from_file(empty.as_ptr()) }, Handle::NULL.raw());
        assert_eq!(hw_asset_get_num_bones(asset), 4);

        let name = hw_asset_get_bone_name(asset, 1);
        assert_eq!(unsafe { CStr::from_ptr(name) }.to_str().unwrap(), "bone1");
        let name = hw_asset_get_bone_name(Handle::NULL.raw(), 1);
        assert_eq!(unsafe { CStr::from_ptr(name) }.to_bytes(), b"");

        let mut indices = [9.0f32; 4];
        unsafe { hw_asset_get_bone_indices(Handle::NULL.raw(), &mut indices) };
        assert_eq!(indices, [9.0; 4]);
        unsafe { hw_asset_get_bone_indices(asset, &mut indices) };
        assert_eq!(indices, [0.0, 1.0, 2.0, 3.0]);

        let instance = hw_instance_create(asset);
        assert_eq!(hw_instance_get_asset(instance), asset);

        let mut descriptor = HwHairDescriptor::from(HairDescriptor::default());
        descriptor.enable = 0;
        unsafe { hw_instance_get_descriptor(instance, &mut descriptor) };
        assert_eq!(descriptor.enable, 1);
        descriptor.visualize_bones = 7;
        unsafe { hw_instance_set_descriptor(instance, &descriptor) };
        assert_eq!(sdk.count("update_descriptor"), 1);

        // calls run with the plugin lock released
        assert_eq!(with_context(|_| PLUGIN.try_write().is_some()), Some(true));

        hw_begin_scene(false);
        hw_render(instance, false);
        hw_end_scene(false);
        let event = hw_get_render_event_func();
        event(hw_get_flush_event_id());
        assert_eq!(sdk.count("render_hairs"), 1);

        hw_finalize();
        assert_eq!(sdk.count("free_instance"), 1);
        assert_eq!(sdk.count("free_asset"), 1);
        PLUGIN.write().backend = None;
    }
}
