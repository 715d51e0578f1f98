// src/lighting.rs
//! Light data and the pixel-shader constant block for hair rendering.
//!
//! Layout matches the hair shaders: a light count padded to 16 bytes, a fixed
//! array of `MAX_LIGHTS` lights, then the SDK's own per-instance block.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::sdk::{SdkShaderConstants, SDK_CONSTANT_VEC4S};

pub const MAX_LIGHTS: usize = 8;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightType {
    Directional = 0,
    Point = 1,
}

/// One light as the engine passes it across the ABI.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct LightData {
    pub kind: u32,
    pub _pad: [u32; 3],
    /// w: range
    pub position: Vec4,
    pub direction: Vec4,
    pub color: Vec4,
}

impl Default for LightData {
    fn default() -> Self {
        Self::directional(Vec3::ZERO, Vec4::ONE)
    }
}

impl LightData {
    pub fn directional(direction: Vec3, color: Vec4) -> Self {
        Self {
            kind: LightType::Directional as u32,
            _pad: [0; 3],
            position: Vec4::ZERO,
            direction: direction.extend(0.0),
            color,
        }
    }

    pub fn point(position: Vec3, range: f32, color: Vec4) -> Self {
        Self {
            kind: LightType::Point as u32,
            _pad: [0; 3],
            position: position.extend(range),
            direction: Vec4::ZERO,
            color,
        }
    }

    pub fn light_type(&self) -> Option<LightType> {
        match self.kind {
            0 => Some(LightType::Directional),
            1 => Some(LightType::Point),
            _ => None,
        }
    }
}

/// Up to [`MAX_LIGHTS`] lights captured by value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LightSet {
    count: usize,
    lights: [LightData; MAX_LIGHTS],
}

impl LightSet {
    /// Copies at most `MAX_LIGHTS`; the rest are dropped.
    pub fn from_slice(lights: &[LightData]) -> Self {
        let count = lights.len().min(MAX_LIGHTS);
        let mut set = Self::default();
        set.lights[..count].copy_from_slice(&lights[..count]);
        set.count = count;
        set
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn as_slice(&self) -> &[LightData] {
        &self.lights[..self.count]
    }
}

/// Pixel-shader constant buffer: lights followed by the SDK block.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct HairConstantBuffer {
    pub num_lights: u32,
    pub _pad: [u32; 3],
    pub lights: [LightData; MAX_LIGHTS],
    pub hair: [Vec4; SDK_CONSTANT_VEC4S],
}

impl Default for HairConstantBuffer {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl HairConstantBuffer {
    pub fn set_lights(&mut self, set: &LightSet) {
        self.num_lights = set.len() as u32;
        self.lights[..set.len()].copy_from_slice(set.as_slice());
    }

    pub fn set_hair_constants(&mut self, constants: &SdkShaderConstants) {
        self.hair = *constants;
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
