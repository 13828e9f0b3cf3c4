//! MMD 材质定义

use bitflags::bitflags;
use glam::{Vec3, Vec4};

bitflags! {
    /// 材质绘制标志
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MaterialFlags: u8 {
        const DOUBLE_SIDED = 0x01;
        const GROUND_SHADOW = 0x02;
        const CAST_SELF_SHADOW = 0x04;
        const RECEIVE_SELF_SHADOW = 0x08;
        const EDGE = 0x10;
        const VERTEX_COLOR = 0x20;
        const POINT = 0x40;
        const LINE = 0x80;
    }
}

/// 球面贴图模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SphereMode {
    #[default]
    None,
    Multiply,
    Add,
    SubTexture,
}

impl SphereMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => SphereMode::Multiply,
            2 => SphereMode::Add,
            3 => SphereMode::SubTexture,
            _ => SphereMode::None,
        }
    }
}

/// Toon 引用：共享 toon（0..=9）或纹理索引
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToonRef {
    Shared(u8),
    Texture(i32),
}

impl Default for ToonRef {
    fn default() -> Self {
        ToonRef::Texture(-1)
    }
}

/// MMD 材质
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub name_en: String,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_power: f32,
    pub ambient: Vec3,
    pub flags: MaterialFlags,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture_index: i32,
    pub sphere_index: i32,
    pub sphere_mode: SphereMode,
    pub toon: ToonRef,
    pub memo: String,
    /// 该材质占用的索引数
    pub index_count: u32,
}

impl Material {
    pub fn is_double_sided(&self) -> bool {
        self.flags.contains(MaterialFlags::DOUBLE_SIDED)
    }

    pub fn has_edge(&self) -> bool {
        self.flags.contains(MaterialFlags::EDGE)
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            name_en: String::new(),
            diffuse: Vec4::ONE,
            specular: Vec3::ZERO,
            specular_power: 0.0,
            ambient: Vec3::splat(0.5),
            flags: MaterialFlags::empty(),
            edge_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            edge_size: 1.0,
            texture_index: -1,
            sphere_index: -1,
            sphere_mode: SphereMode::None,
            toon: ToonRef::default(),
            memo: String::new(),
            index_count: 0,
        }
    }
}
