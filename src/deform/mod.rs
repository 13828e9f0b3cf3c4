//! 逐帧变形流水线
//!
//! Morph → 物理前骨骼 → 物理步进 → 物理后骨骼 → 全局矩阵 → 蒙皮，
//! 结果打包为 [`VmdDeltas`] 交给渲染端。

mod cache;
mod pipeline;

pub use cache::DeformCache;
pub use pipeline::{DeformRequest, ModelInput, ViewerPipeline};

use crate::animation::Motion;
use crate::model::{Material, PmxModel};
use crate::morph::MorphDeltas;
use crate::physics::PhysicsDeltas;
use crate::skeleton::BoneDeltas;
use crate::skinning::SkinningOutput;

/// 一帧的变形结果
#[derive(Clone, Debug)]
pub struct VmdDeltas {
    pub frame: f32,
    pub model_hash: u64,
    pub motion_hash: u64,
    pub bones: BoneDeltas,
    pub morphs: MorphDeltas,
    pub physics: PhysicsDeltas,
    /// 由物理写入的骨骼
    pub physics_bones: Vec<usize>,
    /// 未开启 CPU 蒙皮时为 `None`
    pub skinned: Option<SkinningOutput>,
}

impl VmdDeltas {
    /// 模型与动作的身份哈希都一致时才可复用
    pub fn is_valid_for(&self, model: &PmxModel, motion: &Motion) -> bool {
        self.model_hash == model.hash() && self.motion_hash == motion.hash()
    }

    /// Morph 合成后的材质
    pub fn materials(&self, model: &PmxModel) -> Vec<Material> {
        model
            .materials
            .iter()
            .enumerate()
            .map(|(i, m)| match self.morphs.materials.get(i) {
                Some(delta) => delta.compose(m),
                None => m.clone(),
            })
            .collect()
    }
}
