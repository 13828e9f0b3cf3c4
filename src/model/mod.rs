//! PMX 模型数据
//!
//! 加载后不可变。骨骼以连续数组存储，父子关系只保存索引，
//! 加载时保证父索引小于自身索引。

mod bone;
mod material;
mod morph;
mod reader;
mod rigid_body;

pub use bone::{Append, BoneDef, BoneFlags, BoneTail, IkDef, IkLink};
pub use material::{Material, MaterialFlags, SphereMode, ToonRef};
pub use morph::{
    BoneMorphOffset, GroupMorphOffset, ImpulseMorphOffset, MaterialMorphOffset, MaterialOp,
    MorphDef, MorphKind, UvMorphOffset, VertexMorphOffset,
};
pub use reader::{load_pmx, PmxHeader, PmxReader};
pub use rigid_body::{JointDef, PhysicsMode, RigidBodyDef, RigidBodyShape};

use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Vec2, Vec3, Vec4};

static MODEL_HASH: AtomicU64 = AtomicU64::new(1);

fn next_model_hash() -> u64 {
    MODEL_HASH.fetch_add(1, Ordering::Relaxed)
}

/// 顶点骨骼权重
#[derive(Clone, Debug, PartialEq)]
pub enum VertexWeight {
    Bdef1 { bone: i32 },
    Bdef2 { bones: [i32; 2], weight: f32 },
    Bdef4 { bones: [i32; 4], weights: [f32; 4] },
    Sdef { bones: [i32; 2], weight: f32, c: Vec3, r0: Vec3, r1: Vec3 },
    Qdef { bones: [i32; 4], weights: [f32; 4] },
}

impl Default for VertexWeight {
    fn default() -> Self {
        VertexWeight::Bdef1 { bone: 0 }
    }
}

impl VertexWeight {
    /// 展开为 (骨骼, 权重) 列表，最多 4 项
    pub fn influences(&self) -> Vec<(i32, f32)> {
        match self {
            VertexWeight::Bdef1 { bone } => vec![(*bone, 1.0)],
            VertexWeight::Bdef2 { bones, weight } | VertexWeight::Sdef { bones, weight, .. } => {
                vec![(bones[0], *weight), (bones[1], 1.0 - *weight)]
            }
            VertexWeight::Bdef4 { bones, weights } | VertexWeight::Qdef { bones, weights } => {
                bones.iter().copied().zip(weights.iter().copied()).collect()
            }
        }
    }

    pub fn weight_sum(&self) -> f32 {
        self.influences().iter().map(|(_, w)| w).sum()
    }

    /// 归一化权重，使其总和为 1
    pub fn normalize(&mut self) {
        match self {
            VertexWeight::Bdef1 { .. } => {}
            VertexWeight::Bdef2 { weight, .. } | VertexWeight::Sdef { weight, .. } => {
                if !weight.is_finite() {
                    *weight = 1.0;
                }
                *weight = weight.clamp(0.0, 1.0);
            }
            VertexWeight::Bdef4 { weights, .. } | VertexWeight::Qdef { weights, .. } => {
                for w in weights.iter_mut() {
                    if !w.is_finite() || *w < 0.0 {
                        *w = 0.0;
                    }
                }
                let sum: f32 = weights.iter().sum();
                if sum > 1e-6 {
                    for w in weights.iter_mut() {
                        *w /= sum;
                    }
                } else {
                    *weights = [1.0, 0.0, 0.0, 0.0];
                }
            }
        }
    }
}

/// 顶点
#[derive(Clone, Debug, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    /// 追加 UV（0..=4 个）
    pub extra_uvs: Vec<Vec4>,
    pub weight: VertexWeight,
    pub edge_scale: f32,
}

impl Vertex {
    pub fn new(position: Vec3, weight: VertexWeight) -> Self {
        Self {
            position,
            normal: Vec3::Y,
            uv: Vec2::ZERO,
            extra_uvs: Vec::new(),
            weight,
            edge_scale: 1.0,
        }
    }
}

/// 显示枠元素
#[derive(Clone, Debug, PartialEq)]
pub enum DisplayItem {
    Bone(i32),
    Morph(i32),
}

/// 显示枠
#[derive(Clone, Debug, PartialEq)]
pub struct DisplaySlot {
    pub name: String,
    pub name_en: String,
    pub special: bool,
    pub items: Vec<DisplayItem>,
}

/// PMX 模型
#[derive(Clone, Debug)]
pub struct PmxModel {
    pub name: String,
    pub name_en: String,
    pub comment: String,
    pub comment_en: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub textures: Vec<String>,
    pub materials: Vec<Material>,
    pub bones: Vec<BoneDef>,
    pub morphs: Vec<MorphDef>,
    pub display_slots: Vec<DisplaySlot>,
    pub rigid_bodies: Vec<RigidBodyDef>,
    pub joints: Vec<JointDef>,
    deform_order: Vec<usize>,
    hash: u64,
}

impl Default for PmxModel {
    fn default() -> Self {
        Self::new("")
    }
}

impl PmxModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            name_en: String::new(),
            comment: String::new(),
            comment_en: String::new(),
            vertices: Vec::new(),
            indices: Vec::new(),
            textures: Vec::new(),
            materials: Vec::new(),
            bones: Vec::new(),
            morphs: Vec::new(),
            display_slots: Vec::new(),
            rigid_bodies: Vec::new(),
            joints: Vec::new(),
            deform_order: Vec::new(),
            hash: next_model_hash(),
        }
    }

    /// 身份哈希，`finalize` 时重新分配
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// 加载或手工构造完成后调用：归一化权重、校验父骨骼、计算变形顺序
    pub fn finalize(&mut self) {
        for vertex in &mut self.vertices {
            vertex.weight.normalize();
        }

        let bone_count = self.bones.len() as i32;
        for (index, bone) in self.bones.iter_mut().enumerate() {
            let index = index as i32;
            if bone.parent >= index || bone.parent >= bone_count {
                log::warn!(
                    "骨骼 '{}' ({}) 的父骨骼 {} 不在其之前，已解除父子关系",
                    bone.name,
                    index,
                    bone.parent
                );
                bone.parent = -1;
            } else if bone.parent < -1 {
                bone.parent = -1;
            }
        }

        let mut order: Vec<usize> = (0..self.bones.len()).collect();
        order.sort_by_key(|&i| (self.bones[i].layer, i));
        self.deform_order = order;

        self.hash = next_model_hash();
    }

    /// 按 (变形阶层, 索引) 排序的骨骼顺序
    pub fn deform_order(&self) -> &[usize] {
        &self.deform_order
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    pub fn morph_index(&self, name: &str) -> Option<usize> {
        self.morphs.iter().position(|m| m.name == name)
    }

    pub fn rigid_body_index(&self, name: &str) -> Option<usize> {
        self.rigid_bodies.iter().position(|r| r.name == name)
    }

    pub fn bone(&self, index: i32) -> Option<&BoneDef> {
        usize::try_from(index).ok().and_then(|i| self.bones.get(i))
    }

    /// 骨骼 `index` 的所有祖先（由近到远）
    pub fn ancestors(&self, index: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut current = self.bones.get(index).and_then(|b| b.parent_index());
        while let Some(p) = current {
            if out.len() > self.bones.len() {
                break;
            }
            out.push(p);
            current = self.bones.get(p).and_then(|b| b.parent_index());
        }
        out
    }

    /// 相对父骨骼的初始偏移
    pub fn bone_offset(&self, index: usize) -> Vec3 {
        let bone = &self.bones[index];
        match bone.parent_index().and_then(|p| self.bones.get(p)) {
            Some(parent) => bone.position - parent.position,
            None => bone.position,
        }
    }

    /// 骨骼尾端在模型空间的初始位置
    pub fn bone_tail_position(&self, index: usize) -> Vec3 {
        let bone = &self.bones[index];
        match bone.tail {
            BoneTail::Bone(t) => self
                .bone(t)
                .map(|tail| tail.position)
                .unwrap_or(bone.position),
            BoneTail::Offset(offset) => bone.position + offset,
        }
    }

    pub fn has_after_physics_bones(&self) -> bool {
        self.bones.iter().any(|b| b.is_after_physics())
    }
}
