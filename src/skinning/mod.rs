//! 顶点蒙皮计算

mod skinning;

pub use skinning::{compute_skinning, skin_vertex};

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::model::Vertex;
use crate::morph::MorphDeltas;

/// 蒙皮输入数据
pub struct SkinningInput<'a> {
    /// 初始顶点
    pub vertices: &'a [Vertex],
    /// 骨骼蒙皮矩阵（全局 · 初始全局的逆）
    pub bone_matrices: &'a [Mat4],
    /// 顶点/UV Morph 增量
    pub morphs: &'a MorphDeltas,
}

/// 单个变形后的顶点
#[derive(Clone, Debug, PartialEq)]
pub struct SkinnedVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub extra_uvs: [Vec4; 4],
}

/// 蒙皮输出数据
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkinningOutput {
    pub vertices: Vec<SkinnedVertex>,
}

impl SkinningOutput {
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.vertices.iter().map(|v| v.position)
    }

    /// 平铺的 xyz 位置缓冲（上传 VBO 用）
    pub fn position_buffer(&self) -> Vec<f32> {
        self.vertices
            .iter()
            .flat_map(|v| v.position.to_array())
            .collect()
    }

    pub fn normal_buffer(&self) -> Vec<f32> {
        self.vertices
            .iter()
            .flat_map(|v| v.normal.to_array())
            .collect()
    }
}
