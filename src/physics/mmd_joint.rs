//! MMD 关节（6 自由度弹簧约束）封装
//!
//! Rapier 的 GenericJoint 配合 limits 和 motors 实现 MMD 的弹簧关节。

use glam::{Mat4, Vec3};
use rapier3d::math::{Isometry, Real};
use rapier3d::prelude::*;

use crate::model::JointDef;

use super::config::PhysicsConfig;
use super::mmd_rigid_body::{isometry_to_mat4, mat4_to_isometry};

/// 上下限差小于此值的线性轴视为锁定
const LOCK_EPSILON: f32 = 1e-4;
/// 上下限相等的角度轴放宽到 ±此值（弧度）
const MIN_ANGULAR_RANGE: f32 = 0.1;

/// MMD 关节
pub struct MMDJoint {
    /// 关节名称
    pub name: String,
    /// 关节句柄
    pub joint_handle: Option<ImpulseJointHandle>,
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
    /// 线性弹簧刚度
    pub linear_spring: Vec3,
    /// 角度弹簧刚度
    pub angular_spring: Vec3,
    /// 关节在刚体 A 局部空间的变换
    pub local_frame_a: Isometry<Real>,
    /// 关节在刚体 B 局部空间的变换
    pub local_frame_b: Isometry<Real>,
}

impl MMDJoint {
    /// 从 PMX 关节定义创建
    ///
    /// `rb_a_transform` / `rb_b_transform` 为两刚体创建时的世界变换。
    pub fn from_def(
        def: &JointDef,
        rb_a_transform: &Isometry<Real>,
        rb_b_transform: &Isometry<Real>,
    ) -> Self {
        let joint_transform: Mat4 = def.transform();
        let local_a = isometry_to_mat4(rb_a_transform).inverse() * joint_transform;
        let local_b = isometry_to_mat4(rb_b_transform).inverse() * joint_transform;

        Self {
            name: def.name.clone(),
            joint_handle: None,
            linear_lower: def.translation_min,
            linear_upper: def.translation_max,
            angular_lower: def.rotation_min,
            angular_upper: def.rotation_max,
            linear_spring: def.spring_translation,
            angular_spring: def.spring_rotation,
            local_frame_a: mat4_to_isometry(local_a),
            local_frame_b: mat4_to_isometry(local_b),
        }
    }

    /// 创建 Rapier GenericJoint
    ///
    /// - 线性轴 lower == upper 时锁定
    /// - lower > upper 的轴不设限制
    /// - 角度轴不锁定，lower == upper 时放宽到一个小范围
    pub fn build_joint(&self, config: &PhysicsConfig) -> GenericJoint {
        let lin_axes = [
            (JointAxis::LinX, JointAxesMask::LIN_X, self.linear_lower.x, self.linear_upper.x, self.linear_spring.x),
            (JointAxis::LinY, JointAxesMask::LIN_Y, self.linear_lower.y, self.linear_upper.y, self.linear_spring.y),
            (JointAxis::LinZ, JointAxesMask::LIN_Z, self.linear_lower.z, self.linear_upper.z, self.linear_spring.z),
        ];
        let ang_axes = [
            (JointAxis::AngX, self.angular_lower.x, self.angular_upper.x, self.angular_spring.x),
            (JointAxis::AngY, self.angular_lower.y, self.angular_upper.y, self.angular_spring.y),
            (JointAxis::AngZ, self.angular_lower.z, self.angular_upper.z, self.angular_spring.z),
        ];

        let mut locked_axes = JointAxesMask::empty();
        for &(_, mask, lower, upper, _) in &lin_axes {
            if (upper - lower).abs() < LOCK_EPSILON {
                locked_axes |= mask;
            }
        }

        let mut joint = GenericJointBuilder::new(locked_axes)
            .local_frame1(self.local_frame_a)
            .local_frame2(self.local_frame_b)
            .build();

        // 禁用关节连接的刚体之间的碰撞
        joint.contacts_enabled = false;

        for &(axis, mask, lower, upper, spring) in &lin_axes {
            if locked_axes.contains(mask) {
                continue;
            }
            if lower <= upper {
                joint.set_limits(axis, [lower, upper]);
            }
            if spring != 0.0 {
                let stiffness = spring * config.linear_spring_stiffness_scale;
                let damping = (stiffness * config.linear_spring_damping_factor).abs().sqrt();
                joint.set_motor(axis, 0.0, 0.0, stiffness, damping);
            }
        }

        for &(axis, lower, upper, spring) in &ang_axes {
            if lower <= upper {
                if upper - lower < LOCK_EPSILON {
                    joint.set_limits(axis, [lower - MIN_ANGULAR_RANGE, lower + MIN_ANGULAR_RANGE]);
                } else {
                    joint.set_limits(axis, [lower, upper]);
                }
            }
            if spring != 0.0 {
                let stiffness = spring * config.angular_spring_stiffness_scale;
                let damping = (stiffness * config.angular_spring_damping_factor).abs().sqrt();
                joint.set_motor(axis, 0.0, 0.0, stiffness, damping);
            }
        }

        joint
    }
}
