//! 顶点蒙皮计算

use glam::{Mat3, Mat4, Quat, Vec3, Vec4};
use rayon::prelude::*;

use crate::model::{Vertex, VertexWeight};
use crate::morph::VertexMorphDelta;

use super::{SkinnedVertex, SkinningInput, SkinningOutput};

/// 并行计算全部顶点
pub fn compute_skinning(input: &SkinningInput) -> SkinningOutput {
    let vertices = input
        .vertices
        .par_iter()
        .enumerate()
        .map(|(i, vertex)| {
            let morph = u32::try_from(i).ok().and_then(|i| input.morphs.vertex(i));
            skin_vertex(vertex, morph, input.bone_matrices)
        })
        .collect();
    SkinningOutput { vertices }
}

/// 计算单个顶点：Morph 位移在蒙皮之前加到初始位置上
pub fn skin_vertex(vertex: &Vertex, morph: Option<&VertexMorphDelta>, matrices: &[Mat4]) -> SkinnedVertex {
    let position = vertex.position + morph.map_or(Vec3::ZERO, |m| m.position);

    let (position, normal) = match &vertex.weight {
        VertexWeight::Sdef { bones, weight, c, r0, r1 } => {
            let m0 = get_matrix(matrices, bones[0]);
            let m1 = get_matrix(matrices, bones[1]);
            sdef(position, vertex.normal, (m0, m1), *weight, (*c, *r0, *r1))
        }
        weight => linear_blend(position, vertex.normal, &weight.influences(), matrices),
    };

    let mut uv = vertex.uv;
    let mut extra_uvs = [Vec4::ZERO; 4];
    for (slot, value) in extra_uvs.iter_mut().zip(&vertex.extra_uvs) {
        *slot = *value;
    }
    if let Some(m) = morph {
        uv += m.uv.truncate().truncate();
        for (slot, offset) in extra_uvs.iter_mut().zip(m.extra_uvs) {
            *slot += offset;
        }
    }

    SkinnedVertex {
        position,
        normal,
        uv,
        extra_uvs,
    }
}

/// BDEF1/2/4 与 QDEF：矩阵线性混合
fn linear_blend(position: Vec3, normal: Vec3, influences: &[(i32, f32)], matrices: &[Mat4]) -> (Vec3, Vec3) {
    let mut blended = Mat4::ZERO;
    for &(bone, w) in influences {
        if w == 0.0 {
            continue;
        }
        blended += get_matrix(matrices, bone) * w;
    }
    let rotation = Mat3::from_mat4(blended);
    (
        blended.transform_point3(position),
        (rotation * normal).normalize_or_zero(),
    )
}

/// SDEF 球面变形
///
/// W = α·R0 + (1−α)·R1，
/// P' = q·(P − C) + α·M0·(C + R0 − W) + (1−α)·M1·(C + R1 − W)，
/// 其中 q 为两根骨骼旋转按 1−α 的球面插值。
fn sdef(position: Vec3, normal: Vec3, (m0, m1): (Mat4, Mat4), alpha: f32, (c, r0, r1): (Vec3, Vec3, Vec3)) -> (Vec3, Vec3) {
    let beta = 1.0 - alpha;
    let w = r0 * alpha + r1 * beta;
    let p0 = m0.transform_point3(c + r0 - w);
    let p1 = m1.transform_point3(c + r1 - w);

    let q0 = Quat::from_mat3(&Mat3::from_mat4(m0)).normalize();
    let q1 = Quat::from_mat3(&Mat3::from_mat4(m1)).normalize();
    let q = q0.slerp(q1, beta).normalize();

    (
        q * (position - c) + p0 * alpha + p1 * beta,
        (q * normal).normalize_or_zero(),
    )
}

fn get_matrix(matrices: &[Mat4], index: i32) -> Mat4 {
    if index < 0 {
        return Mat4::IDENTITY;
    }
    matrices.get(index as usize).copied().unwrap_or(Mat4::IDENTITY)
}
