//! MMD 物理世界（Rapier3D 实现）
//!
//! ## Bullet3 → Rapier 映射
//! | Bullet3 | Rapier |
//! |---------|--------|
//! | btDiscreteDynamicsWorld | PhysicsPipeline + RigidBodySet + ColliderSet + ImpulseJointSet |
//! | btDbvtBroadphase | DefaultBroadPhase |
//! | btCollisionDispatcher | NarrowPhase |
//! | btGeneric6DofSpringConstraint | GenericJoint（limits + motors） |

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use glam::{Mat4, Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rapier3d::math::{Real, Vector};
use rapier3d::prelude::*;

use crate::model::{JointDef, PhysicsMode, RigidBodyDef};
use crate::{MmdError, Result};

use super::backend::{BodyId, JointId, PhysicsBackend};
use super::config::{get_config, PhysicsConfig};
use super::mmd_joint::MMDJoint;
use super::mmd_rigid_body::{build_shape, isometry_to_mat4, mat4_to_isometry, rapier_to_vec3, vec3_to_rapier, MMDRigidBody};
use super::wind::WindSettings;

/// 判定子步数时容许的误差（避免 dt 恰为整数倍时多走一步）
const STEP_EPSILON: f32 = 1e-4;

/// Rapier 物理世界
pub struct RapierBackend {
    /// 物理流水线
    pub physics_pipeline: PhysicsPipeline,
    /// 积分参数
    pub integration_parameters: IntegrationParameters,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub rigid_body_set: RigidBodySet,
    pub collider_set: ColliderSet,
    pub impulse_joint_set: ImpulseJointSet,
    pub multibody_joint_set: MultibodyJointSet,
    pub ccd_solver: CCDSolver,
    /// 地面刚体句柄
    pub ground_handle: Option<RigidBodyHandle>,
    /// MMD 刚体
    bodies: BTreeMap<BodyId, MMDRigidBody>,
    /// MMD 关节
    joints: BTreeMap<JointId, MMDJoint>,
    /// 重力向量
    pub gravity: Vector<Real>,
    wind: WindSettings,
    /// 风的模拟时间（秒）
    wind_time: f32,
    rng: StdRng,
    config: PhysicsConfig,
}

impl RapierBackend {
    /// 以全局配置创建
    pub fn new() -> Self {
        Self::with_config(get_config())
    }

    pub fn with_config(config: PhysicsConfig) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = config.fixed_time_step();
        integration_parameters.num_solver_iterations =
            NonZeroUsize::new(config.solver_iterations).unwrap_or(NonZeroUsize::MIN);

        if config.debug_log {
            log::info!(
                "[物理配置] FPS={}, 重力Y={}, 求解器迭代={}, 最大子步={}",
                config.physics_fps,
                config.gravity_y,
                config.solver_iterations,
                config.max_substep_count
            );
        }

        let wind = WindSettings {
            max_acceleration: config.wind_max_acceleration,
            ..WindSettings::default()
        };
        let mut backend = Self {
            physics_pipeline: PhysicsPipeline::new(),
            integration_parameters,
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            ground_handle: None,
            bodies: BTreeMap::new(),
            joints: BTreeMap::new(),
            gravity: Vector::new(0.0, config.gravity_y, 0.0),
            wind,
            wind_time: 0.0,
            rng: StdRng::seed_from_u64(config.wind_seed),
            config,
        };
        backend.create_ground();
        backend
    }

    /// 地面：一个大的静态盒子，上表面位于 y = 0
    fn create_ground(&mut self) {
        if !self.config.ground_enabled {
            return;
        }
        let ground = RigidBodyBuilder::fixed()
            .translation(Vector::new(0.0, -50.0, 0.0))
            .build();
        let ground_handle = self.rigid_body_set.insert(ground);
        let ground_collider = ColliderBuilder::cuboid(1000.0, 50.0, 1000.0).build();
        self.collider_set
            .insert_with_parent(ground_collider, ground_handle, &mut self.rigid_body_set);
        self.ground_handle = Some(ground_handle);
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn wind(&self) -> &WindSettings {
        &self.wind
    }

    /// 执行一次物理步进
    fn step_once(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.apply_wind_forces(dt);
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
        self.clamp_velocities();
    }

    /// 每个子步重新计算风力
    fn apply_wind_forces(&mut self, dt: f32) {
        if !self.wind.enabled {
            return;
        }
        self.wind_time += dt;
        for mmd_rb in self.bodies.values() {
            if mmd_rb.is_kinematic() {
                continue;
            }
            let Some(handle) = mmd_rb.rigid_body_handle else {
                continue;
            };
            let Some(rb) = self.rigid_body_set.get_mut(handle) else {
                continue;
            };
            rb.reset_forces(true);
            let q = rb.rotation().quaternion().coords;
            let orientation = Quat::from_xyzw(q.x, q.y, q.z, q.w);
            let velocity = rapier_to_vec3(rb.linvel());
            if let Some(force) = self
                .wind
                .force(&mmd_rb.wind_body(), velocity, orientation, self.wind_time)
            {
                rb.add_force(vec3_to_rapier(force), true);
            }
        }
    }

    /// 限制刚体速度，防止物理爆炸
    fn clamp_velocities(&mut self) {
        let max_linear_velocity = self.config.max_linear_velocity;
        let max_angular_velocity = self.config.max_angular_velocity;

        for mmd_rb in self.bodies.values() {
            if mmd_rb.is_kinematic() {
                continue;
            }
            let Some(handle) = mmd_rb.rigid_body_handle else {
                continue;
            };
            let Some(rb) = self.rigid_body_set.get_mut(handle) else {
                continue;
            };

            let linvel = *rb.linvel();
            let linvel_mag = linvel.norm();
            if linvel_mag > max_linear_velocity {
                rb.set_linvel(linvel * (max_linear_velocity / linvel_mag), true);
            }

            let angvel = *rb.angvel();
            let angvel_mag = angvel.norm();
            if angvel_mag > max_angular_velocity {
                rb.set_angvel(angvel * (max_angular_velocity / angvel_mag), true);
            }
        }
    }

    /// 动态刚体出现非有限值时回到创建时的变换
    fn recover_non_finite(&mut self) -> usize {
        let mut recovered = 0;
        for mmd_rb in self.bodies.values() {
            let Some(handle) = mmd_rb.rigid_body_handle else {
                continue;
            };
            let Some(rb) = self.rigid_body_set.get_mut(handle) else {
                continue;
            };
            let p = rb.position();
            let finite = p.translation.vector.iter().all(|v| v.is_finite())
                && p.rotation.quaternion().coords.iter().all(|v| v.is_finite());
            if finite {
                continue;
            }
            rb.set_position(mmd_rb.initial_transform, true);
            rb.set_linvel(Vector::zeros(), true);
            rb.set_angvel(Vector::zeros(), true);
            recovered += 1;
        }
        recovered
    }
}

impl Default for RapierBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsBackend for RapierBackend {
    fn reset_world(&mut self, gravity: Vec3) {
        self.island_manager = IslandManager::new();
        self.broad_phase = DefaultBroadPhase::new();
        self.narrow_phase = NarrowPhase::new();
        self.rigid_body_set = RigidBodySet::new();
        self.collider_set = ColliderSet::new();
        self.impulse_joint_set = ImpulseJointSet::new();
        self.multibody_joint_set = MultibodyJointSet::new();
        self.ccd_solver = CCDSolver::new();
        self.physics_pipeline = PhysicsPipeline::new();
        self.ground_handle = None;
        self.bodies.clear();
        self.joints.clear();
        self.wind_time = 0.0;
        self.rng = StdRng::seed_from_u64(self.config.wind_seed);
        self.set_gravity(gravity);
        self.create_ground();
        log::debug!("物理世界已重置，重力=({:.2}, {:.2}, {:.2})", gravity.x, gravity.y, gravity.z);
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = vec3_to_rapier(gravity);
    }

    fn add_body(&mut self, id: BodyId, def: &RigidBodyDef, world: Mat4) -> Result<()> {
        if !world.is_finite() {
            return Err(MmdError::Physics(format!(
                "刚体 '{}' 的初始变换不是有限值",
                def.name
            )));
        }
        self.remove_body(id);

        let mut mmd_rb = MMDRigidBody::from_def(def, world, &self.config);
        mmd_rb.wind_phase = self.rng.random::<f32>() * std::f32::consts::TAU;

        let rb_handle = self.rigid_body_set.insert(mmd_rb.build_rigid_body());
        mmd_rb.rigid_body_handle = Some(rb_handle);
        let collider_handle = self.collider_set.insert_with_parent(
            mmd_rb.build_collider(),
            rb_handle,
            &mut self.rigid_body_set,
        );
        mmd_rb.collider_handle = Some(collider_handle);

        if self.config.debug_log {
            let pos = mmd_rb.initial_transform.translation.vector;
            log::debug!(
                "[刚体] {:?} '{}': 模式={:?}, 质量={}, 初始位置=({:.2},{:.2},{:.2})",
                id, mmd_rb.name, mmd_rb.mode, mmd_rb.mass, pos.x, pos.y, pos.z
            );
        }

        self.bodies.insert(id, mmd_rb);
        Ok(())
    }

    fn remove_body(&mut self, id: BodyId) -> bool {
        let Some(mmd_rb) = self.bodies.remove(&id) else {
            return false;
        };
        if let Some(handle) = mmd_rb.rigid_body_handle {
            self.rigid_body_set.remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            );
        }
        // 连接在该刚体上的关节已被 Rapier 一并移除
        self.joints.retain(|_, j| {
            j.joint_handle
                .map_or(false, |h| self.impulse_joint_set.get(h).is_some())
        });
        true
    }

    fn add_joint(&mut self, id: JointId, def: &JointDef, a: BodyId, b: BodyId) -> Result<()> {
        if !self.config.joints_enabled {
            return Ok(());
        }
        let (Some(rb_a), Some(rb_b)) = (self.bodies.get(&a), self.bodies.get(&b)) else {
            return Err(MmdError::NotFound(format!(
                "关节 '{}' 引用的刚体不存在: {:?} / {:?}",
                def.name, a, b
            )));
        };
        let (Some(handle_a), Some(handle_b)) = (rb_a.rigid_body_handle, rb_b.rigid_body_handle) else {
            return Err(MmdError::Internal(format!("关节 '{}' 的刚体尚未加入世界", def.name)));
        };

        let mut mmd_joint = MMDJoint::from_def(def, &rb_a.initial_transform, &rb_b.initial_transform);
        self.remove_joint(id);
        let joint = mmd_joint.build_joint(&self.config);
        let joint_handle = self.impulse_joint_set.insert(handle_a, handle_b, joint, true);
        mmd_joint.joint_handle = Some(joint_handle);
        self.joints.insert(id, mmd_joint);
        Ok(())
    }

    fn remove_joint(&mut self, id: JointId) -> bool {
        let Some(joint) = self.joints.remove(&id) else {
            return false;
        };
        if let Some(handle) = joint.joint_handle {
            self.impulse_joint_set.remove(handle, true);
        }
        true
    }

    fn update_transform(&mut self, id: BodyId, world: Mat4) {
        let Some(mmd_rb) = self.bodies.get(&id) else {
            return;
        };
        let Some(handle) = mmd_rb.rigid_body_handle else {
            return;
        };
        let Some(rb) = self.rigid_body_set.get_mut(handle) else {
            return;
        };
        match mmd_rb.mode {
            PhysicsMode::Static => rb.set_next_kinematic_position(mat4_to_isometry(world)),
            PhysicsMode::DynamicBoneAligned => {
                let p = world.w_axis.truncate();
                rb.set_translation(Vector::new(p.x, p.y, p.z), true);
            }
            PhysicsMode::Dynamic => {}
        }
    }

    fn update_shape_mass(&mut self, id: BodyId, size: Option<Vec3>, mass: Option<f32>) {
        let Some(mmd_rb) = self.bodies.get_mut(&id) else {
            return;
        };
        if let Some(size) = size {
            mmd_rb.size = size;
        }
        if let Some(mass) = mass {
            mmd_rb.mass = mass * self.config.mass_scale;
        }
        let Some(handle) = mmd_rb.collider_handle else {
            return;
        };
        let Some(collider) = self.collider_set.get_mut(handle) else {
            return;
        };
        if size.is_some() {
            collider.set_shape(build_shape(mmd_rb.shape, mmd_rb.size));
        }
        if mass.is_some() && !mmd_rb.is_kinematic() {
            collider.set_mass(mmd_rb.dynamic_mass());
        }
    }

    fn read_transform(&self, id: BodyId) -> Option<Mat4> {
        let handle = self.bodies.get(&id)?.rigid_body_handle?;
        let rb = self.rigid_body_set.get(handle)?;
        Some(isometry_to_mat4(rb.position()))
    }

    /// 固定步长子步，最多 `max_sub_steps` 步；超出 `max_sub_steps·fixed` 的时间丢弃
    fn step(&mut self, dt: f32, max_sub_steps: u32, fixed_time_step: f32) -> Result<u32> {
        if !dt.is_finite() || !fixed_time_step.is_finite() {
            return Err(MmdError::Physics(format!(
                "无效的时间步长 dt={}, fixed={}",
                dt, fixed_time_step
            )));
        }
        if dt <= 0.0 {
            return Ok(0);
        }
        let fixed_dt = if fixed_time_step > 0.0 {
            fixed_time_step
        } else {
            self.config.fixed_time_step()
        };
        let max_steps = max_sub_steps.max(1);
        let needed_steps = ((dt / fixed_dt - STEP_EPSILON).ceil() as u32).max(1);

        let steps = needed_steps.min(max_steps);
        if steps < needed_steps {
            log::trace!(
                "物理步进截断: dt={:.4} 需要 {} 步，只执行 {} 步",
                dt,
                needed_steps,
                steps
            );
        }
        for _ in 0..steps {
            self.step_once(fixed_dt);
        }

        let recovered = self.recover_non_finite();
        if recovered > 0 {
            return Err(MmdError::Physics(format!(
                "{} 个刚体出现非有限变换，已恢复到初始位置",
                recovered
            )));
        }
        Ok(steps)
    }

    fn enable_wind(&mut self, enabled: bool) {
        if self.wind.enabled && !enabled {
            for mmd_rb in self.bodies.values() {
                let Some(handle) = mmd_rb.rigid_body_handle else {
                    continue;
                };
                if let Some(rb) = self.rigid_body_set.get_mut(handle) {
                    rb.reset_forces(false);
                }
            }
        }
        self.wind.enabled = enabled;
    }

    fn set_wind(&mut self, direction: Vec3, speed: f32, randomness: f32) {
        self.wind.set(direction, speed, randomness);
    }

    fn set_wind_advanced(&mut self, drag_coeff: f32, lift_coeff: f32, turbulence_freq_hz: f32) {
        self.wind.set_advanced(drag_coeff, lift_coeff, turbulence_freq_hz);
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RigidBodyShape;

    fn backend() -> RapierBackend {
        let config = PhysicsConfig {
            ground_enabled: false,
            ..PhysicsConfig::default()
        };
        RapierBackend::with_config(config)
    }

    fn ball(mode: PhysicsMode) -> RigidBodyDef {
        RigidBodyDef::new("ball", 0, RigidBodyShape::Sphere, mode)
    }

    #[test]
    fn dynamic_body_falls_under_gravity() {
        let mut world = backend();
        let id = BodyId::new(0, 0);
        world
            .add_body(id, &ball(PhysicsMode::Dynamic), Mat4::from_translation(Vec3::Y * 10.0))
            .unwrap();
        let steps = world.step(1.0 / 30.0, 5, 1.0 / 60.0).unwrap();
        assert_eq!(steps, 2);
        let y = world.read_transform(id).unwrap().w_axis.y;
        assert!(y < 10.0, "y = {}", y);
    }

    #[test]
    fn kinematic_body_follows_bone() {
        let mut world = backend();
        let id = BodyId::new(0, 0);
        world.add_body(id, &ball(PhysicsMode::Static), Mat4::IDENTITY).unwrap();
        let target = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        world.update_transform(id, target);
        world.step(1.0 / 60.0, 1, 1.0 / 60.0).unwrap();
        assert!(world.read_transform(id).unwrap().abs_diff_eq(target, 1e-5));
    }

    #[test]
    fn substeps_are_capped() {
        let mut world = backend();
        assert_eq!(world.step(1.0, 3, 1.0 / 60.0).unwrap(), 3);
        assert_eq!(world.step(0.0, 3, 1.0 / 60.0).unwrap(), 0);
        assert!(world.step(f32::NAN, 3, 1.0 / 60.0).is_err());
    }

    #[test]
    fn long_frame_is_bounded_by_substep_budget() {
        let mut world = backend();
        let id = BodyId::new(0, 0);
        world
            .add_body(id, &ball(PhysicsMode::Dynamic), Mat4::from_translation(Vec3::Y * 10.0))
            .unwrap();
        let fixed = 1.0 / 60.0;
        assert_eq!(world.step(2.0, 2, fixed).unwrap(), 2);

        // 只模拟了 2/60 秒：自由落体约 0.0054
        let budget = 2.0 * fixed;
        let expected = 0.5 * 9.8 * budget * budget;
        let drop = 10.0 - world.read_transform(id).unwrap().w_axis.y;
        assert!(drop > 0.0, "drop = {}", drop);
        assert!(drop < expected * 3.0, "drop = {}", drop);
    }

    #[test]
    fn removing_body_drops_its_joints() {
        let mut world = backend();
        let a = BodyId::new(0, 0);
        let b = BodyId::new(0, 1);
        world.add_body(a, &ball(PhysicsMode::Static), Mat4::IDENTITY).unwrap();
        world
            .add_body(b, &ball(PhysicsMode::Dynamic), Mat4::from_translation(Vec3::Y))
            .unwrap();
        world.add_joint(JointId::new(0, 0), &JointDef::new("j", 0, 1), a, b).unwrap();
        assert_eq!(world.joint_count(), 1);
        assert!(world.remove_body(b));
        assert_eq!(world.joint_count(), 0);
        assert_eq!(world.body_count(), 1);
        assert!(world
            .add_joint(JointId::new(0, 1), &JointDef::new("j", 0, 1), a, b)
            .is_err());
    }

    #[test]
    fn wind_pushes_bodies_downwind() {
        let mut world = backend();
        world.set_gravity(Vec3::ZERO);
        let id = BodyId::new(0, 0);
        world.add_body(id, &ball(PhysicsMode::Dynamic), Mat4::IDENTITY).unwrap();
        world.enable_wind(true);
        world.set_wind(Vec3::X, 5.0, 0.0);
        world.set_wind_advanced(1.0, 0.0, 0.0);
        for _ in 0..10 {
            world.step(1.0 / 60.0, 1, 1.0 / 60.0).unwrap();
        }
        assert!(world.read_transform(id).unwrap().w_axis.x > 0.0);

        world.reset_world(Vec3::new(0.0, -9.8, 0.0));
        assert_eq!(world.body_count(), 0);
        assert!(world.read_transform(id).is_none());
    }
}
