//! 旋转与矩阵辅助函数
//!
//! glam 之上的少量 MMD 专用运算：固定轴投影、欧拉角限制、
//! 轴角缩放、局部轴基底。

use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};

/// 判定为零向量的阈值
pub const EPSILON: f32 = 1e-6;

/// 将旋转投影到给定轴（swing-twist 分解中的 twist 部分）
///
/// 轴长度为零时原样返回旋转。
pub fn project_onto_axis(rotation: Quat, axis: Vec3) -> Quat {
    let axis = axis.normalize_or_zero();
    if axis.length_squared() < EPSILON {
        return rotation;
    }
    let v = Vec3::new(rotation.x, rotation.y, rotation.z);
    let p = axis * v.dot(axis);
    let twist = Quat::from_xyzw(p.x, p.y, p.z, rotation.w);
    let len = twist.length();
    if len < EPSILON {
        // 绕垂直轴 180°，twist 不确定
        return Quat::IDENTITY;
    }
    twist / len
}

/// 旋转在某轴之外的分量大小（`|v - (v·a)a|`）
pub fn off_axis_magnitude(rotation: Quat, axis: Vec3) -> f32 {
    let axis = axis.normalize_or_zero();
    let v = Vec3::new(rotation.x, rotation.y, rotation.z);
    (v - axis * v.dot(axis)).length()
}

/// 按轴角缩放旋转，允许 ratio 超出 [0, 1]
pub fn scale_rotation(rotation: Quat, ratio: f32) -> Quat {
    let q = if rotation.w < 0.0 { -rotation } else { rotation };
    let (axis, angle) = q.to_axis_angle();
    if angle.abs() < EPSILON || !axis.is_finite() {
        return Quat::IDENTITY;
    }
    Quat::from_axis_angle(axis, angle * ratio)
}

/// 以 XYZ 欧拉角分解并逐轴限制
pub fn clamp_euler_xyz(rotation: Quat, min: Vec3, max: Vec3) -> Quat {
    let (x, y, z) = rotation.to_euler(EulerRot::XYZ);
    Quat::from_euler(
        EulerRot::XYZ,
        clamp_ordered(x, min.x, max.x),
        clamp_ordered(y, min.y, max.y),
        clamp_ordered(z, min.z, max.z),
    )
}

fn clamp_ordered(v: f32, a: f32, b: f32) -> f32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    v.clamp(lo, hi)
}

/// 由局部 X 轴构造正交基底（列向量 X, Y, Z）
///
/// Z = X × 全局 Y；X 与 Y 平行时改用 X × 全局 Z。
pub fn local_axis_basis(local_x: Vec3) -> Option<Mat3> {
    let x = local_x.normalize_or_zero();
    if x.length_squared() < EPSILON {
        return None;
    }
    let mut z = x.cross(Vec3::Y);
    if z.length_squared() < EPSILON {
        z = x.cross(Vec3::Z);
    }
    let z = z.normalize();
    let y = z.cross(x).normalize();
    Some(Mat3::from_cols(x, y, z))
}

/// 把局部轴坐标下的旋转转换到骨骼空间
pub fn rotation_from_local_axis(rotation: Quat, local_x: Vec3) -> Quat {
    match local_axis_basis(local_x) {
        Some(basis) => {
            let b = Quat::from_mat3(&basis);
            (b * rotation * b.inverse()).normalize()
        }
        None => rotation,
    }
}

/// 矩阵的平移列
pub fn position_of(m: &Mat4) -> Vec3 {
    m.w_axis.truncate()
}

/// 矩阵的旋转部分（忽略缩放）
pub fn rotation_of(m: &Mat4) -> Quat {
    let (_, r, _) = m.to_scale_rotation_translation();
    r.normalize()
}

/// 四元数间夹角（弧度，最短路径）
pub fn angle_between(a: Quat, b: Quat) -> f32 {
    let d = a.dot(b).abs().min(1.0);
    2.0 * d.acos()
}
