//! 骨骼与刚体的双向耦合
//!
//! 绑定时记录刚体相对骨骼的偏移；步进前用骨骼驱动非动态刚体，
//! 步进后把动态刚体的变换写回骨骼。

use std::collections::BTreeMap;

use glam::{Mat4, Vec3};

use crate::animation::{Motion, WindFrame};
use crate::model::{PhysicsMode, PmxModel};
use crate::skeleton::BoneDeltas;

use super::backend::{BodyId, JointId, PhysicsBackend};
use super::config::get_config;
use super::mmd_physics::RapierBackend;
use super::reset::PhysicsResetType;

/// 单个刚体的尺寸 / 质量覆盖
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RigidBodyDelta {
    pub size: Option<Vec3>,
    pub mass: Option<f32>,
}

/// 每帧刚体参数覆盖（刚体索引 -> 覆盖）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysicsDeltas {
    pub rigid_bodies: BTreeMap<usize, RigidBodyDelta>,
}

impl PhysicsDeltas {
    /// 由动作的刚体参数轨道采样
    pub fn build(model: &PmxModel, motion: &Motion, frame: f32) -> Self {
        let mut rigid_bodies = BTreeMap::new();
        if !motion.has_rigid_body_tracks() {
            return Self { rigid_bodies };
        }
        for name in motion.rigid_body_track_names() {
            let Some(index) = model.rigid_body_index(name) else {
                log::trace!("动作中的刚体 '{}' 不在模型中", name);
                continue;
            };
            if let Some(k) = motion.rigid_body_at(name, frame) {
                rigid_bodies.insert(index, RigidBodyDelta { size: k.size, mass: k.mass });
            }
        }
        Self { rigid_bodies }
    }

    pub fn is_empty(&self) -> bool {
        self.rigid_bodies.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RigidBodyDelta> {
        self.rigid_bodies.get(&index)
    }
}

/// 已绑定的刚体
#[derive(Debug, Clone)]
struct BoundBody {
    id: BodyId,
    bone: Option<usize>,
    mode: PhysicsMode,
    /// 骨骼初始全局的逆 · 刚体初始变换
    offset: Mat4,
    inv_offset: Mat4,
}

#[derive(Debug, Default)]
struct ModelBinding {
    bodies: Vec<BoundBody>,
    joints: Vec<JointId>,
}

/// 物理桥
pub struct PhysicsBridge {
    backend: Box<dyn PhysicsBackend>,
    models: BTreeMap<usize, ModelBinding>,
}

impl PhysicsBridge {
    pub fn new(backend: Box<dyn PhysicsBackend>) -> Self {
        Self {
            backend,
            models: BTreeMap::new(),
        }
    }

    /// 使用 Rapier 后端
    pub fn rapier() -> Self {
        Self::new(Box::new(RapierBackend::new()))
    }

    pub fn backend(&self) -> &dyn PhysicsBackend {
        self.backend.as_ref()
    }

    pub fn is_attached(&self, slot: usize) -> bool {
        self.models.contains_key(&slot)
    }

    /// 绑定模型，刚体以 `bones` 的当前姿态放置，返回加入的刚体数
    pub fn attach(
        &mut self,
        slot: usize,
        model: &PmxModel,
        bones: &mut BoneDeltas,
        overrides: Option<&PhysicsDeltas>,
    ) -> usize {
        self.detach(slot);
        let mut binding = ModelBinding::default();

        for (index, def) in model.rigid_bodies.iter().enumerate() {
            let bone = def.bone_index().filter(|&b| b < bones.len());
            let rest = def.rest_transform();
            let offset = match bone {
                Some(b) => Mat4::from_translation(model.bones[b].position).inverse() * rest,
                None => rest,
            };
            let world = match bone {
                Some(b) => bones.global(b) * offset,
                None => offset,
            };

            let mut def = def.clone();
            if let Some(o) = overrides.and_then(|o| o.get(index)) {
                if let Some(size) = o.size {
                    def.size = size;
                }
                if let Some(mass) = o.mass {
                    def.mass = mass;
                }
            }

            let id = BodyId::new(slot, index);
            if let Err(e) = self.backend.add_body(id, &def, world) {
                log::warn!("刚体 '{}' 创建失败: {}", def.name, e);
                continue;
            }
            binding.bodies.push(BoundBody {
                id,
                bone,
                mode: def.mode,
                offset,
                inv_offset: offset.inverse(),
            });
        }

        if get_config().joints_enabled {
            for (index, def) in model.joints.iter().enumerate() {
                let (Ok(a), Ok(b)) = (usize::try_from(def.rigid_body_a), usize::try_from(def.rigid_body_b)) else {
                    continue;
                };
                let bound = |i: usize| binding.bodies.iter().any(|bb| bb.id.index == i);
                if a == b || !bound(a) || !bound(b) {
                    log::trace!("关节 '{}' 的刚体无效，跳过", def.name);
                    continue;
                }
                let id = JointId::new(slot, index);
                match self.backend.add_joint(id, def, BodyId::new(slot, a), BodyId::new(slot, b)) {
                    Ok(()) => binding.joints.push(id),
                    Err(e) => log::warn!("关节 '{}' 创建失败: {}", def.name, e),
                }
            }
        }

        let count = binding.bodies.len();
        log::info!(
            "模型 '{}' 绑定到槽位 {}: {} 个刚体, {} 个关节",
            model.name,
            slot,
            count,
            binding.joints.len()
        );
        self.models.insert(slot, binding);
        count
    }

    /// 解除绑定并销毁刚体
    pub fn detach(&mut self, slot: usize) {
        let Some(binding) = self.models.remove(&slot) else {
            return;
        };
        for id in binding.joints {
            self.backend.remove_joint(id);
        }
        for body in binding.bodies {
            self.backend.remove_body(body.id);
        }
        log::debug!("槽位 {} 的刚体已销毁", slot);
    }

    /// 清空整个世界（所有模型都需要重新绑定）
    pub fn reset_world(&mut self, gravity: Vec3) {
        self.models.clear();
        self.backend.reset_world(gravity);
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.backend.set_gravity(gravity);
    }

    /// 步进前：非动态刚体跟随骨骼
    pub fn sync_before_step(
        &mut self,
        slot: usize,
        bones: &mut BoneDeltas,
        enabled: bool,
        reset: PhysicsResetType,
    ) {
        if !enabled && reset == PhysicsResetType::None {
            return;
        }
        let Some(binding) = self.models.get(&slot) else {
            return;
        };
        for body in &binding.bodies {
            if body.mode == PhysicsMode::Dynamic {
                continue;
            }
            let Some(bone) = body.bone else {
                continue;
            };
            self.backend.update_transform(body.id, bones.global(bone) * body.offset);
        }
    }

    /// 重放尺寸 / 质量覆盖
    pub fn apply_overrides(&mut self, slot: usize, deltas: &PhysicsDeltas) {
        if !self.models.contains_key(&slot) {
            return;
        }
        for (&index, delta) in &deltas.rigid_bodies {
            self.backend
                .update_shape_mass(BodyId::new(slot, index), delta.size, delta.mass);
        }
    }

    pub fn apply_wind(&mut self, wind: &WindFrame) {
        self.backend.enable_wind(wind.enabled);
        self.backend.set_wind(wind.direction, wind.speed, wind.randomness);
        self.backend
            .set_wind_advanced(wind.drag_coeff, wind.lift_coeff, wind.turbulence_freq_hz);
    }

    /// 推进世界；失败时记录日志并视为零子步，下一帧重试
    pub fn step(&mut self, dt: f32, max_sub_steps: u32, fixed_time_step: f32) -> u32 {
        match self.backend.step(dt, max_sub_steps, fixed_time_step) {
            Ok(steps) => steps,
            Err(e) => {
                log::warn!("{}", e.describe());
                0
            }
        }
    }

    /// 步进后：动态刚体写回骨骼（父骨骼先行），返回被写入的骨骼
    pub fn feedback(&mut self, slot: usize, bones: &mut BoneDeltas) -> Vec<usize> {
        let Some(binding) = self.models.get(&slot) else {
            return Vec::new();
        };
        let mut dynamic: Vec<&BoundBody> = binding
            .bodies
            .iter()
            .filter(|b| b.mode != PhysicsMode::Static && b.bone.is_some())
            .collect();
        dynamic.sort_by_key(|b| b.bone);

        let mut written = Vec::with_capacity(dynamic.len());
        for body in dynamic {
            let Some(bone) = body.bone else {
                continue;
            };
            let Some(world) = self.backend.read_transform(body.id) else {
                continue;
            };
            let mut global = world * body.inv_offset;
            if body.mode == PhysicsMode::DynamicBoneAligned {
                global.w_axis = bones.global(bone).w_axis;
            }
            if !global.is_finite() {
                log::warn!("刚体 {:?} 的变换不是有限值，跳过写回", body.id);
                continue;
            }
            bones.set_global(bone, global);
            written.push(bone);
        }
        written
    }

    /// 刚体当前世界变换
    pub fn body_transform(&self, slot: usize, index: usize) -> Option<Mat4> {
        self.backend.read_transform(BodyId::new(slot, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::RigidBodyKeyframe;
    use crate::model::{BoneDef, JointDef, RigidBodyDef, RigidBodyShape};
    use crate::physics::mock::MockBackend;
    use glam::Quat;

    /// 根骨骼（静态刚体） + 子骨骼（动态刚体）
    fn pendulum(mode: PhysicsMode) -> PmxModel {
        let mut model = PmxModel::new("pendulum");
        model.bones.push(BoneDef::new("root", Vec3::new(0.0, 10.0, 0.0), -1));
        model.bones.push(BoneDef::new("hair", Vec3::new(0.0, 8.0, 0.0), 0));
        model.bones.push(BoneDef::new("tip", Vec3::new(0.0, 6.0, 0.0), 1));

        let mut head = RigidBodyDef::new("head", 0, RigidBodyShape::Sphere, PhysicsMode::Static);
        head.position = Vec3::new(0.0, 10.0, 0.0);
        model.rigid_bodies.push(head);
        let mut hair = RigidBodyDef::new("hair", 1, RigidBodyShape::Capsule, mode);
        hair.position = Vec3::new(0.0, 7.0, 0.0);
        hair.rotation = Vec3::new(0.0, 0.0, 0.3);
        model.rigid_bodies.push(hair);
        model.joints.push(JointDef::new("joint", 0, 1));
        model.finalize();
        model
    }

    fn bridge(drift: Vec3) -> PhysicsBridge {
        PhysicsBridge::new(Box::new(MockBackend::new(drift)))
    }

    #[test]
    fn zero_steps_after_attach_leave_bodies_at_rest() {
        let model = pendulum(PhysicsMode::Dynamic);
        let mut bones = BoneDeltas::rest(&model);
        let mut bridge = bridge(Vec3::ZERO);
        assert_eq!(bridge.attach(0, &model, &mut bones, None), 2);
        assert_eq!(bridge.backend().body_count(), 2);
        for (i, rb) in model.rigid_bodies.iter().enumerate() {
            let world = bridge.body_transform(0, i).unwrap();
            assert!(world.abs_diff_eq(rb.rest_transform(), 1e-5));
        }
    }

    #[test]
    fn attach_uses_current_pose() {
        let model = pendulum(PhysicsMode::Dynamic);
        let mut bones = BoneDeltas::rest(&model);
        bones.get_mut(0).unwrap().frame_translation = Vec3::X;
        bones.recompose(0);
        let mut bridge = bridge(Vec3::ZERO);
        bridge.attach(0, &model, &mut bones, None);
        let world = bridge.body_transform(0, 1).unwrap();
        let expected = Vec3::new(1.0, 7.0, 0.0);
        assert!(world.w_axis.truncate().abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn static_bodies_follow_bones_before_step() {
        let model = pendulum(PhysicsMode::Dynamic);
        let mut bones = BoneDeltas::rest(&model);
        let mut bridge = bridge(Vec3::ZERO);
        bridge.attach(0, &model, &mut bones, None);

        bones.get_mut(0).unwrap().frame_translation = Vec3::Z * 2.0;
        bones.recompose(0);
        bridge.sync_before_step(0, &mut bones, false, PhysicsResetType::None);
        assert!(bridge.body_transform(0, 0).unwrap().w_axis.z.abs() < 1e-6);

        bridge.sync_before_step(0, &mut bones, true, PhysicsResetType::None);
        assert!((bridge.body_transform(0, 0).unwrap().w_axis.z - 2.0).abs() < 1e-6);
        // 动态刚体不被传送
        assert!(bridge.body_transform(0, 1).unwrap().w_axis.z.abs() < 1e-6);
    }

    #[test]
    fn dynamic_bodies_drive_bones() {
        let model = pendulum(PhysicsMode::Dynamic);
        let mut bones = BoneDeltas::rest(&model);
        let mut bridge = bridge(Vec3::new(0.5, 0.0, 0.0));
        bridge.attach(0, &model, &mut bones, None);

        assert_eq!(bridge.step(1.0 / 60.0, 5, 1.0 / 60.0), 1);
        let written = bridge.feedback(0, &mut bones);
        assert_eq!(written, vec![1]);
        assert!(bones.get(1).unwrap().physics);
        assert!(bones.position(1).abs_diff_eq(Vec3::new(0.5, 8.0, 0.0), 1e-5));
        // 子骨骼随之移动
        assert!(bones.position(2).abs_diff_eq(Vec3::new(0.5, 6.0, 0.0), 1e-5));
    }

    #[test]
    fn bone_aligned_bodies_keep_bone_position() {
        let model = pendulum(PhysicsMode::DynamicBoneAligned);
        let mut bones = BoneDeltas::rest(&model);
        let mut bridge = bridge(Vec3::new(0.5, 0.0, 0.0));
        bridge.attach(0, &model, &mut bones, None);
        bridge.step(1.0 / 60.0, 5, 1.0 / 60.0);
        bridge.feedback(0, &mut bones);
        assert!(bones.position(1).abs_diff_eq(Vec3::new(0.0, 8.0, 0.0), 1e-5));
        let r = crate::math::rotation_of(&bones.global(1));
        assert!(r.abs_diff_eq(Quat::IDENTITY, 1e-5));
    }

    #[test]
    fn failed_step_advances_zero_substeps() {
        let mut mock = MockBackend::new(Vec3::X);
        mock.fail_steps = true;
        let mut bridge = PhysicsBridge::new(Box::new(mock));
        assert_eq!(bridge.step(1.0 / 60.0, 5, 1.0 / 60.0), 0);
    }

    #[test]
    fn detach_and_reset_remove_bodies() {
        let model = pendulum(PhysicsMode::Dynamic);
        let mut bones = BoneDeltas::rest(&model);
        let mut bridge = bridge(Vec3::ZERO);
        bridge.attach(0, &model, &mut bones, None);
        bridge.attach(1, &model, &mut bones, None);
        assert_eq!(bridge.backend().body_count(), 4);
        bridge.detach(0);
        assert!(!bridge.is_attached(0));
        assert_eq!(bridge.backend().body_count(), 2);
        bridge.reset_world(Vec3::ZERO);
        assert_eq!(bridge.backend().body_count(), 0);
        assert!(!bridge.is_attached(1));
    }

    #[test]
    fn physics_deltas_follow_rigid_body_tracks() {
        let model = pendulum(PhysicsMode::Dynamic);
        let mut motion = Motion::new();
        assert!(PhysicsDeltas::build(&model, &motion, 0.0).is_empty());
        let mut k = RigidBodyKeyframe::new(0);
        k.mass = Some(3.0);
        motion.insert_rigid_body_keyframe("hair", k);
        motion.insert_rigid_body_keyframe("missing", RigidBodyKeyframe::new(0));
        let deltas = PhysicsDeltas::build(&model, &motion, 10.0);
        assert_eq!(deltas.rigid_bodies.len(), 1);
        assert_eq!(deltas.get(1).unwrap().mass, Some(3.0));
    }
}
