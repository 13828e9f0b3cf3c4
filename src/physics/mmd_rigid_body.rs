//! MMD 刚体封装
//!
//! 把 PMX 刚体定义转换为 Rapier 的 RigidBody 与 Collider。

use glam::{Mat4, Quat, Vec3};
use rapier3d::math::{Isometry, Real, Vector};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;

use crate::model::{PhysicsMode, RigidBodyDef, RigidBodyShape};

use super::config::PhysicsConfig;
use super::wind::WindBody;

/// 动态刚体的最小质量，防止零质量刚体失控
const MIN_DYNAMIC_MASS: f32 = 1e-3;

/// MMD 刚体
pub struct MMDRigidBody {
    /// 刚体名称
    pub name: String,
    /// 物理模式
    pub mode: PhysicsMode,
    pub shape: RigidBodyShape,
    pub size: Vec3,
    /// 碰撞组
    pub group: u8,
    /// 碰撞掩码
    pub group_mask: u16,
    /// 刚体句柄
    pub rigid_body_handle: Option<RigidBodyHandle>,
    /// 碰撞体句柄
    pub collider_handle: Option<ColliderHandle>,
    /// 创建时的世界变换（关节局部坐标以此为准）
    pub initial_transform: Isometry<Real>,
    /// 质量（已缩放）
    pub mass: f32,
    /// 线性阻尼
    pub linear_damping: f32,
    /// 角阻尼
    pub angular_damping: f32,
    /// 弹性
    pub restitution: f32,
    /// 摩擦力
    pub friction: f32,
    /// 阵风相位
    pub wind_phase: f32,
}

impl MMDRigidBody {
    /// 从 PMX 刚体定义创建
    ///
    /// # 参数
    /// - `def`: PMX 刚体定义
    /// - `world`: 刚体的世界变换
    pub fn from_def(def: &RigidBodyDef, world: Mat4, config: &PhysicsConfig) -> Self {
        Self {
            name: def.name.clone(),
            mode: def.mode,
            shape: def.shape,
            size: def.size,
            group: def.group.min(15),
            group_mask: def.mask,
            rigid_body_handle: None,
            collider_handle: None,
            initial_transform: mat4_to_isometry(world),
            mass: def.mass * config.mass_scale,
            linear_damping: def.linear_damping * config.linear_damping_scale,
            angular_damping: def.angular_damping * config.angular_damping_scale,
            restitution: def.restitution,
            friction: def.friction,
            wind_phase: 0.0,
        }
    }

    pub fn is_kinematic(&self) -> bool {
        self.mode == PhysicsMode::Static
    }

    /// 创建 Rapier 刚体
    pub fn build_rigid_body(&self) -> RigidBody {
        let rb_type = if self.is_kinematic() {
            RigidBodyType::KinematicPositionBased
        } else {
            RigidBodyType::Dynamic
        };

        RigidBodyBuilder::new(rb_type)
            .position(self.initial_transform)
            .linear_damping(self.linear_damping)
            .angular_damping(self.angular_damping)
            .ccd_enabled(false)
            .can_sleep(false) // MMD 物理不使用休眠
            .build()
    }

    /// 创建 Rapier 碰撞体
    pub fn build_collider(&self) -> Collider {
        let collision_groups = InteractionGroups::new(
            Group::from_bits_truncate(1 << self.group),
            Group::from_bits_truncate(self.group_mask as u32),
        );

        let builder = ColliderBuilder::new(build_shape(self.shape, self.size))
            .restitution(self.restitution)
            .friction(self.friction)
            .collision_groups(collision_groups)
            .solver_groups(collision_groups);

        if self.is_kinematic() {
            builder.density(0.0).build()
        } else {
            builder.mass(self.dynamic_mass()).build()
        }
    }

    pub fn dynamic_mass(&self) -> f32 {
        self.mass.max(MIN_DYNAMIC_MASS)
    }

    pub fn wind_body(&self) -> WindBody {
        WindBody {
            shape: self.shape,
            size: self.size,
            mass: self.dynamic_mass(),
            phase: self.wind_phase,
        }
    }
}

/// PMX 尺寸到 Rapier 形状：球为半径，盒为半边长，胶囊为（半径, 高度）
pub fn build_shape(shape: RigidBodyShape, size: Vec3) -> SharedShape {
    match shape {
        RigidBodyShape::Sphere => SharedShape::ball(size.x.max(1e-4)),
        RigidBodyShape::Box => SharedShape::cuboid(
            size.x.max(1e-4),
            size.y.max(1e-4),
            size.z.max(1e-4),
        ),
        // Rapier capsule: 沿 Y 轴，半高 + 半径
        RigidBodyShape::Capsule => SharedShape::capsule_y((size.y / 2.0).max(0.0), size.x.max(1e-4)),
    }
}

/// 将 glam Mat4 转换为 Rapier Isometry
pub fn mat4_to_isometry(mat: Mat4) -> Isometry<Real> {
    let (_, rotation, translation) = mat.to_scale_rotation_translation();
    let rotation = rotation.normalize();
    Isometry::from_parts(
        Translation3::new(translation.x, translation.y, translation.z),
        UnitQuaternion::from_quaternion(Quaternion::new(rotation.w, rotation.x, rotation.y, rotation.z)),
    )
}

/// 将 Rapier Isometry 转换为 glam Mat4
pub fn isometry_to_mat4(iso: &Isometry<Real>) -> Mat4 {
    let t = iso.translation.vector;
    let q = iso.rotation.quaternion().coords;
    Mat4::from_rotation_translation(Quat::from_xyzw(q.x, q.y, q.z, q.w), Vec3::new(t.x, t.y, t.z))
}

/// 将 glam Vec3 转换为 Rapier Vector
pub fn vec3_to_rapier(v: Vec3) -> Vector<Real> {
    Vector::new(v.x, v.y, v.z)
}

/// 将 Rapier Vector 转换为 glam Vec3
pub fn rapier_to_vec3(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isometry_conversion_keeps_rigid_transform() {
        let m = Mat4::from_rotation_translation(
            Quat::from_euler(glam::EulerRot::YXZ, 0.3, -0.2, 1.1),
            Vec3::new(1.0, -2.0, 3.5),
        );
        let back = isometry_to_mat4(&mat4_to_isometry(m));
        assert!(back.abs_diff_eq(m, 1e-5));
    }

    #[test]
    fn static_bodies_are_kinematic_and_massless() {
        let config = PhysicsConfig::default();
        let def = RigidBodyDef::new("rb", 0, RigidBodyShape::Capsule, PhysicsMode::Static);
        let rb = MMDRigidBody::from_def(&def, Mat4::IDENTITY, &config);
        assert!(rb.build_rigid_body().is_kinematic());

        let def = RigidBodyDef::new("rb", 0, RigidBodyShape::Box, PhysicsMode::DynamicBoneAligned);
        let rb = MMDRigidBody::from_def(&def, Mat4::from_translation(Vec3::Y), &config);
        let body = rb.build_rigid_body();
        assert!(body.is_dynamic());
        assert!((body.position().translation.vector.y - 1.0).abs() < 1e-6);
        assert_eq!(rb.build_collider().collision_groups().memberships.bits(), 1);
    }
}
