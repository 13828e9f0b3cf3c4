//! Morph 变形系统
//!
//! 将模型的各类 Morph 按当前帧权重合成为每帧的增量集合 `MorphDeltas`。

mod evaluator;

pub use evaluator::MorphEvaluator;

use std::collections::BTreeMap;

use glam::{Quat, Vec3, Vec4};

use crate::model::Material;

/// 单个顶点的 Morph 增量
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexMorphDelta {
    pub position: Vec3,
    pub uv: Vec4,
    /// 追加 UV 1..=4
    pub extra_uvs: [Vec4; 4],
}

/// 单根骨骼的 Morph 增量
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneMorphDelta {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for BoneMorphDelta {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// 材质各通道
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialChannels {
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_power: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture_tint: Vec4,
    pub sphere_tint: Vec4,
    pub toon_tint: Vec4,
}

impl MaterialChannels {
    pub const ONE: Self = Self::splat(1.0);
    pub const ZERO: Self = Self::splat(0.0);

    const fn splat(v: f32) -> Self {
        Self {
            diffuse: Vec4::splat(v),
            specular: Vec3::splat(v),
            specular_power: v,
            ambient: Vec3::splat(v),
            edge_color: Vec4::splat(v),
            edge_size: v,
            texture_tint: Vec4::splat(v),
            sphere_tint: Vec4::splat(v),
            toon_tint: Vec4::splat(v),
        }
    }
}

/// 材质 Morph 增量：乘算与加算分开保存，渲染端按 `base * mul + add` 合成
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialDelta {
    pub mul: MaterialChannels,
    pub add: MaterialChannels,
}

impl Default for MaterialDelta {
    fn default() -> Self {
        Self {
            mul: MaterialChannels::ONE,
            add: MaterialChannels::ZERO,
        }
    }
}

impl MaterialDelta {
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// 合成后的材质颜色
    pub fn compose(&self, base: &Material) -> Material {
        let mut out = base.clone();
        out.diffuse = base.diffuse * self.mul.diffuse + self.add.diffuse;
        out.specular = base.specular * self.mul.specular + self.add.specular;
        out.specular_power = base.specular_power * self.mul.specular_power + self.add.specular_power;
        out.ambient = base.ambient * self.mul.ambient + self.add.ambient;
        out.edge_color = base.edge_color * self.mul.edge_color + self.add.edge_color;
        out.edge_size = base.edge_size * self.mul.edge_size + self.add.edge_size;
        out
    }
}

/// 每帧 Morph 增量
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MorphDeltas {
    /// 顶点索引 -> 增量（只包含被触及的顶点）
    pub vertices: BTreeMap<u32, VertexMorphDelta>,
    /// 骨骼索引 -> 增量
    pub bones: BTreeMap<usize, BoneMorphDelta>,
    /// 每个材质一项
    pub materials: Vec<MaterialDelta>,
}

impl MorphDeltas {
    pub fn new(material_count: usize) -> Self {
        Self {
            vertices: BTreeMap::new(),
            bones: BTreeMap::new(),
            materials: vec![MaterialDelta::default(); material_count],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
            && self.bones.is_empty()
            && self.materials.iter().all(MaterialDelta::is_identity)
    }

    pub fn vertex(&self, index: u32) -> Option<&VertexMorphDelta> {
        self.vertices.get(&index)
    }

    pub fn bone(&self, index: usize) -> BoneMorphDelta {
        self.bones.get(&index).copied().unwrap_or_default()
    }
}
