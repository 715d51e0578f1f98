// src/sdk.rs
//! Contract with the external hair simulation/rendering SDK.
//!
//! The SDK is an opaque capability: it loads assets, creates instances, applies
//! skinning, steps the simulation and draws. Every call reports success or a raw
//! status code; the bridge logs failures and never lets them escape the plugin ABI.

use std::fmt;
use std::path::Path;

use glam::{Mat4, Quat, Vec3, Vec4};
use thiserror::Error;
use xxhash_rust::xxh3::Xxh3;

use crate::gpu::ViewId;

/// Raw failure code returned by the SDK.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("SDK status {code}")]
pub struct SdkError {
    pub code: i32,
}

impl SdkError {
    pub const fn new(code: i32) -> Self {
        Self { code }
    }
}

pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// SDK-side asset identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetId(pub u32);

/// SDK-side instance identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------- Asset conversion ----------

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpAxis {
    #[default]
    Unknown = 0,
    YUp = 1,
    ZUp = 2,
}

impl UpAxis {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => UpAxis::YUp,
            2 => UpAxis::ZUp,
            _ => UpAxis::Unknown,
        }
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Handedness {
    #[default]
    Unknown = 0,
    RightHanded = 1,
    LeftHanded = 2,
}

impl Handedness {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Handedness::RightHanded,
            2 => Handedness::LeftHanded,
            _ => Handedness::Unknown,
        }
    }
}

/// How the SDK converts an asset into the engine's coordinate system.
/// Part of an asset's identity: the same file with different settings is a different asset.
/// Compared bit for bit, matching the digest fed by [`ConversionSettings::feed`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionSettings {
    pub up_axis: UpAxis,
    pub handedness: Handedness,
    /// 0.0 keeps the asset's own unit.
    pub scene_unit: f32,
    pub conversion_matrix: Option<Mat4>,
}

impl ConversionSettings {
    /// Left-handed, Y-up: what the engine side expects.
    pub fn engine() -> Self {
        Self {
            up_axis: UpAxis::YUp,
            handedness: Handedness::LeftHanded,
            ..Self::default()
        }
    }

    fn matrix_bytes(&self) -> Option<&[u8]> {
        self.conversion_matrix.as_ref().map(bytemuck::bytes_of)
    }

    pub(crate) fn feed(&self, hasher: &mut Xxh3) {
        hasher.update(&(self.up_axis as u32).to_le_bytes());
        hasher.update(&(self.handedness as u32).to_le_bytes());
        hasher.update(&self.scene_unit.to_bits().to_le_bytes());
        if let Some(bytes) = self.matrix_bytes() {
            hasher.update(bytes);
        }
    }
}

impl PartialEq for ConversionSettings {
    fn eq(&self, other: &Self) -> bool {
        self.up_axis == other.up_axis
            && self.handedness == other.handedness
            && self.scene_unit.to_bits() == other.scene_unit.to_bits()
            && self.matrix_bytes() == other.matrix_bytes()
    }
}

impl Eq for ConversionSettings {}

// ---------- Textures ----------

/// Texture channels an asset can reference.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HairTextureType {
    Density = 0,
    RootColor = 1,
    TipColor = 2,
    Width = 3,
    Stiffness = 4,
    RootStiffness = 5,
    ClumpScale = 6,
    ClumpRoundness = 7,
    WaveScale = 8,
    WaveFrequency = 9,
    Length = 10,
    Specular = 11,
    Weights = 12,
    Strand = 13,
}

impl HairTextureType {
    pub const COUNT: usize = 14;

    pub fn from_raw(raw: i32) -> Option<Self> {
        use HairTextureType::*;
        const ALL: [HairTextureType; HairTextureType::COUNT] = [
            Density,
            RootColor,
            TipColor,
            Width,
            Stiffness,
            RootStiffness,
            ClumpScale,
            ClumpRoundness,
            WaveScale,
            WaveFrequency,
            Length,
            Specular,
            Weights,
            Strand,
        ];
        usize::try_from(raw).ok().and_then(|i| ALL.get(i).copied())
    }
}

// ---------- Descriptor ----------

/// Per-instance hair parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HairDescriptor {
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
    pub gravity: Vec3,
    pub wind: Vec3,
    pub root_color: Vec4,
    pub tip_color: Vec4,
    pub specular_color: Vec4,
    pub lod_distance: f32,
    pub enable: bool,
    pub simulate: bool,
    pub cast_shadows: bool,
    pub receive_shadows: bool,
    pub use_textures: bool,
    pub visualize_bones: bool,
}

impl Default for HairDescriptor {
    fn default() -> Self {
        Self {
            width: 1.0,
            width_root_scale: 1.0,
            width_tip_scale: 0.1,
            width_noise: 0.0,
            clump_scale: 0.0,
            clump_roundness: 1.0,
            clump_noise: 0.0,
            wave_scale: 0.0,
            wave_scale_noise: 0.5,
            wave_frequency: 3.0,
            wave_frequency_noise: 0.5,
            length_noise: 1.0,
            length_scale: 1.0,
            density: 1.0,
            stiffness: 0.5,
            stiffness_strength: 1.0,
            root_stiffness: 0.5,
            damping: 0.0,
            inertia_scale: 1.0,
            wind_noise: 0.0,
            gravity: Vec3::new(0.0, -1.0, 0.0),
            wind: Vec3::ZERO,
            root_color: Vec4::ONE,
            tip_color: Vec4::ONE,
            specular_color: Vec4::ONE,
            lod_distance: 5.0,
            enable: true,
            simulate: true,
            cast_shadows: true,
            receive_shadows: true,
            use_textures: false,
            visualize_bones: false,
        }
    }
}

// ---------- Skinning ----------

/// Rigid transform as a dual quaternion, for dual-quaternion skinning.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DualQuat {
    pub real: Quat,
    pub dual: Quat,
}

// ---------- Rendering ----------

/// Block the SDK fills per instance before drawing, appended to the light constants.
pub const SDK_CONSTANT_VEC4S: usize = 64;
pub type SdkShaderConstants = [Vec4; SDK_CONSTANT_VEC4S];

/// What a `render_hairs` call should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderSettings {
    /// Use the engine-bound pixel shader instead of the SDK's built-in one.
    pub use_custom_shader: bool,
    /// Depth-only shadow pass.
    pub shadow_pass: bool,
}

impl ShaderSettings {
    pub const COLOR: ShaderSettings = ShaderSettings {
        use_custom_shader: true,
        shadow_pass: false,
    };
    pub const SHADOW: ShaderSettings = ShaderSettings {
        use_custom_shader: false,
        shadow_pass: true,
    };
}

// ---------- The SDK ----------

/// Narrow request/response contract with the hair SDK.
///
/// Implementations must be callable from both the engine thread (loads, queries)
/// and the render thread (deferred draws); the bridge serializes them per frame.
pub trait HairSdk: Send + Sync {
    fn version(&self) -> u32;

    /// Create the SDK's own GPU resources and make the device context current.
    fn init_render_resources(&self) -> SdkResult<()>;

    fn load_asset(&self, path: &Path, settings: &ConversionSettings) -> SdkResult<AssetId>;
    fn free_asset(&self, asset: AssetId) -> SdkResult<()>;

    fn bone_count(&self, asset: AssetId) -> SdkResult<u32>;
    fn bone_name(&self, asset: AssetId, bone: u32) -> SdkResult<String>;
    fn bone_indices(&self, asset: AssetId) -> SdkResult<Vec4>;
    fn bone_weights(&self, asset: AssetId) -> SdkResult<Vec4>;
    fn bind_pose(&self, asset: AssetId, bone: u32) -> SdkResult<Mat4>;
    fn default_descriptor(&self, asset: AssetId) -> SdkResult<HairDescriptor>;
    fn texture_name(&self, asset: AssetId, texture: HairTextureType) -> SdkResult<String>;

    fn create_instance(&self, asset: AssetId) -> SdkResult<InstanceId>;
    fn free_instance(&self, instance: InstanceId) -> SdkResult<()>;

    /// Axis-aligned bounds as (min, max).
    fn bounds(&self, instance: InstanceId) -> SdkResult<(Vec3, Vec3)>;
    fn current_descriptor(&self, instance: InstanceId) -> SdkResult<HairDescriptor>;
    fn update_descriptor(&self, instance: InstanceId, descriptor: &HairDescriptor) -> SdkResult<()>;
    fn set_texture(&self, instance: InstanceId, texture: HairTextureType, view: ViewId) -> SdkResult<()>;
    fn texture_view(&self, instance: InstanceId, texture: HairTextureType) -> SdkResult<Option<ViewId>>;

    fn update_skinning_matrices(&self, instance: InstanceId, matrices: &[Mat4]) -> SdkResult<()>;
    fn update_skinning_dqs(&self, instance: InstanceId, dqs: &[DualQuat]) -> SdkResult<()>;

    fn set_view_projection(&self, view: &Mat4, projection: &Mat4, fov: f32) -> SdkResult<()>;
    fn step_simulation(&self, dt: f32) -> SdkResult<()>;

    /// Number of shader resource slots the SDK binds; custom textures go after them.
    fn shader_resource_slots(&self) -> u32;
    fn shader_resources(&self, instance: InstanceId) -> SdkResult<Vec<Option<ViewId>>>;
    fn prepare_shader_constants(&self, instance: InstanceId) -> SdkResult<SdkShaderConstants>;
    fn render_hairs(&self, instance: InstanceId, settings: ShaderSettings) -> SdkResult<()>;
    fn render_visualization(&self, instance: InstanceId) -> SdkResult<()>;
}
