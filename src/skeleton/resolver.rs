//! 骨骼求解器
//!
//! 基础姿态 → 附加变换 → IK → 附加变换（再次读取 IK 结果）→ 全局矩阵。

use glam::{Quat, Vec3};

use crate::animation::Motion;
use crate::math::{rotation_from_local_axis, scale_rotation};
use crate::model::PmxModel;
use crate::morph::MorphDeltas;

use super::{BoneDeltas, IkSolver};

/// 需要求解的骨骼范围
#[derive(Clone, Debug, PartialEq)]
pub enum BoneSelection {
    All,
    /// 非物理后变形骨骼及其祖先
    PrePhysics,
    /// 仅物理后变形骨骼
    AfterPhysics,
    /// 指定骨骼及其祖先
    Names(Vec<String>),
}

/// 骨骼求解器
#[derive(Clone, Debug)]
pub struct BoneResolver<'a> {
    model: &'a PmxModel,
    convert_local_axis: bool,
}

impl<'a> BoneResolver<'a> {
    pub fn new(model: &'a PmxModel) -> Self {
        Self {
            model,
            convert_local_axis: false,
        }
    }

    /// 把动作旋转视为局部轴坐标下的值
    pub fn with_local_axis(mut self, enabled: bool) -> Self {
        self.convert_local_axis = enabled;
        self
    }

    /// 从初始姿态开始求解
    pub fn resolve(
        &self,
        motion: &Motion,
        frame: f32,
        morphs: &MorphDeltas,
        selection: &BoneSelection,
        include_ik: bool,
    ) -> BoneDeltas {
        let mut deltas = BoneDeltas::rest(self.model);
        self.resolve_into(&mut deltas, motion, frame, morphs, selection, include_ik);
        deltas
    }

    /// 在已有增量上求解所选骨骼；物理写入的骨骼保持不变
    pub fn resolve_into(
        &self,
        deltas: &mut BoneDeltas,
        motion: &Motion,
        frame: f32,
        morphs: &MorphDeltas,
        selection: &BoneSelection,
        include_ik: bool,
    ) {
        if deltas.len() != self.model.bones.len() {
            log::warn!(
                "骨骼增量数量 {} 与模型 {} 不一致，重新初始化",
                deltas.len(),
                self.model.bones.len()
            );
            *deltas = BoneDeltas::rest(self.model);
        }

        let (requested, recompute) = self.targets(selection);
        let order: Vec<usize> = self
            .model
            .deform_order()
            .iter()
            .copied()
            .filter(|&i| recompute[i] && !is_physics(deltas, i))
            .collect();

        self.base_pass(deltas, motion, frame, morphs, &order);
        self.append_pass(deltas, &order);
        if include_ik {
            self.ik_pass(deltas, motion, frame, &recompute);
            self.append_pass(deltas, &order);
        }
        deltas.apply_global(requested);
    }

    /// 返回 (需要全局矩阵的骨骼, 需要重新计算局部量的骨骼掩码)
    fn targets(&self, selection: &BoneSelection) -> (Vec<usize>, Vec<bool>) {
        let bones = &self.model.bones;
        let n = bones.len();
        let requested: Vec<usize> = match selection {
            BoneSelection::All => (0..n).collect(),
            BoneSelection::PrePhysics => (0..n).filter(|&i| !bones[i].is_after_physics()).collect(),
            BoneSelection::AfterPhysics => (0..n).filter(|&i| bones[i].is_after_physics()).collect(),
            BoneSelection::Names(names) => names
                .iter()
                .filter_map(|name| {
                    let index = self.model.bone_index(name);
                    if index.is_none() {
                        log::trace!("骨骼 '{}' 不存在", name);
                    }
                    index
                })
                .collect(),
        };

        let mut recompute = vec![false; n];
        for &i in &requested {
            recompute[i] = true;
        }
        // 物理后骨骼的祖先已在前一阶段或由物理求得
        if *selection != BoneSelection::AfterPhysics {
            for &i in &requested {
                for a in self.model.ancestors(i) {
                    recompute[a] = true;
                }
            }
        }
        (requested, recompute)
    }

    fn base_pass(
        &self,
        deltas: &mut BoneDeltas,
        motion: &Motion,
        frame: f32,
        morphs: &MorphDeltas,
        order: &[usize],
    ) {
        for &i in order {
            let bone = &self.model.bones[i];
            let sample = motion.bone_transform(&bone.name, frame);
            let morph = morphs.bone(i);

            let translation = if bone.is_translatable() {
                sample.translation + morph.translation
            } else {
                Vec3::ZERO
            };
            let mut rotation = (sample.rotation * morph.rotation).normalize();
            if self.convert_local_axis {
                if let Some((x, _)) = bone.local_axis {
                    rotation = rotation_from_local_axis(rotation, x);
                }
            }

            if let Some(d) = deltas.get_mut(i) {
                d.frame_translation = translation;
                d.frame_rotation = rotation;
                d.append_translation = Vec3::ZERO;
                d.append_rotation = Quat::IDENTITY;
                d.ik_rotation = Quat::IDENTITY;
            }
            deltas.recompose(i);
        }
    }

    fn append_pass(&self, deltas: &mut BoneDeltas, order: &[usize]) {
        for &i in order {
            let bone = &self.model.bones[i];
            let Some((source, ratio)) = bone.append_source() else {
                continue;
            };
            if source >= i {
                log::trace!(
                    "骨骼 '{}' 的附加来源 {} 不在其之前，跳过",
                    bone.name,
                    source
                );
                continue;
            }
            let Some(src) = deltas.get(source) else {
                continue;
            };
            let (src_translation, src_rotation) = if bone.is_local_append() {
                (src.frame_translation, src.frame_rotation)
            } else {
                (src.translation, src.rotation)
            };

            let rotation = if bone.is_append_rotate() {
                scale_rotation(src_rotation, ratio)
            } else {
                Quat::IDENTITY
            };
            let translation = if bone.is_append_translate() {
                src_translation * ratio
            } else {
                Vec3::ZERO
            };

            if let Some(d) = deltas.get_mut(i) {
                d.append_rotation = rotation;
                d.append_translation = translation;
            }
            deltas.recompose(i);
        }
    }

    fn ik_pass(&self, deltas: &mut BoneDeltas, motion: &Motion, frame: f32, recompute: &[bool]) {
        for (i, bone) in self.model.bones.iter().enumerate() {
            let Some(ik) = bone.ik.as_ref() else {
                continue;
            };
            if !recompute[i] || !bone.is_ik() {
                continue;
            }
            if !motion.is_ik_enabled(&bone.name, frame) {
                continue;
            }
            let touches_physics = ik.links.iter().any(|l| {
                usize::try_from(l.bone).map_or(false, |b| is_physics(deltas, b))
            });
            if touches_physics {
                log::trace!("IK '{}' 的链接由物理驱动，跳过", bone.name);
                continue;
            }
            match IkSolver::new(i, ik).solve(self.model, deltas) {
                Some(outcome) => log::trace!(
                    "IK '{}': {} 次迭代，距离 {:.6}",
                    bone.name,
                    outcome.iterations,
                    outcome.distance
                ),
                None => log::trace!("IK '{}' 的目标或链接无效，跳过", bone.name),
            }
        }
    }
}

fn is_physics(deltas: &BoneDeltas, index: usize) -> bool {
    deltas.get(index).map_or(false, |d| d.physics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{BoneKeyframe, IkKeyframe};
    use crate::math::off_axis_magnitude;
    use crate::model::{Append, BoneDef, BoneFlags, IkDef, IkLink};
    use crate::morph::MorphEvaluator;
    use glam::Mat4;
    use std::f32::consts::FRAC_PI_2;

    fn five_bones() -> PmxModel {
        let mut model = PmxModel::new("five");
        for i in 0..5 {
            model
                .bones
                .push(BoneDef::new(format!("b{}", i), Vec3::X * i as f32, i as i32 - 1));
        }
        model.finalize();
        model
    }

    fn resolve(model: &PmxModel, motion: &Motion, frame: f32) -> BoneDeltas {
        let morphs = MorphEvaluator::evaluate(model, motion, frame);
        BoneResolver::new(model).resolve(motion, frame, &morphs, &BoneSelection::All, true)
    }

    #[test]
    fn empty_motion_is_identity() {
        let model = five_bones();
        let mut deltas = resolve(&model, &Motion::new(), 10.0);
        for i in 0..5 {
            let d = deltas.get(i).unwrap();
            assert!(d.is_identity());
            assert!(d.global().is_some());
            assert_eq!(deltas.skinning_matrix(i), Mat4::IDENTITY);
        }
    }

    #[test]
    fn translation_keyframe_is_interpolated() {
        let mut model = PmxModel::new("one");
        model.bones.push(BoneDef::new("センター", Vec3::ZERO, -1));
        model.finalize();
        let mut motion = Motion::new();
        motion.insert_bone_keyframe("センター", BoneKeyframe::new(0));
        motion.insert_bone_keyframe(
            "センター",
            BoneKeyframe::with_pose(30, Vec3::X, Quat::IDENTITY),
        );
        let deltas = resolve(&model, &motion, 15.0);
        assert!((deltas.get(0).unwrap().translation.x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn untranslatable_bone_ignores_translation() {
        let mut model = PmxModel::new("one");
        let mut bone = BoneDef::new("首", Vec3::ZERO, -1);
        bone.flags.remove(BoneFlags::TRANSLATABLE);
        model.bones.push(bone);
        model.finalize();
        let mut motion = Motion::new();
        motion.insert_bone_keyframe("首", BoneKeyframe::with_pose(0, Vec3::X, Quat::IDENTITY));
        let deltas = resolve(&model, &motion, 0.0);
        assert_eq!(deltas.get(0).unwrap().translation, Vec3::ZERO);
    }

    #[test]
    fn local_axis_rotation_is_mapped_to_bone_space() {
        let mut model = PmxModel::new("axis");
        let mut bone = BoneDef::new("左手首", Vec3::ZERO, -1);
        bone.flags |= BoneFlags::LOCAL_AXIS;
        // 局部 X 轴 = 全局 X 绕 Y 转 90°
        bone.local_axis = Some((Vec3::NEG_Z, Vec3::X));
        model.bones.push(bone);
        model.finalize();
        let mut motion = Motion::new();
        motion.insert_bone_keyframe(
            "左手首",
            BoneKeyframe::with_pose(0, Vec3::ZERO, Quat::from_rotation_x(0.5)),
        );
        let morphs = MorphEvaluator::evaluate(&model, &motion, 0.0);

        let converted = BoneResolver::new(&model).with_local_axis(true).resolve(
            &motion,
            0.0,
            &morphs,
            &BoneSelection::All,
            true,
        );
        let expected = Quat::from_axis_angle(Vec3::NEG_Z, 0.5);
        let rotation = converted.get(0).unwrap().rotation;
        assert!(rotation.abs_diff_eq(expected, 1e-5), "{:?}", rotation);

        let raw = resolve(&model, &motion, 0.0);
        assert!(raw.get(0).unwrap().rotation.abs_diff_eq(Quat::from_rotation_x(0.5), 1e-5));
    }

    #[test]
    fn fixed_axis_projects_rotation() {
        let mut model = PmxModel::new("axis");
        let mut bone = BoneDef::new("腕捩", Vec3::ZERO, -1);
        bone.flags |= BoneFlags::FIXED_AXIS;
        bone.fixed_axis = Some(Vec3::Y);
        model.bones.push(bone);
        model.finalize();
        let mut motion = Motion::new();
        motion.insert_bone_keyframe(
            "腕捩",
            BoneKeyframe::with_pose(0, Vec3::ZERO, Quat::from_rotation_x(FRAC_PI_2)),
        );
        let deltas = resolve(&model, &motion, 0.0);
        let rotation = deltas.get(0).unwrap().rotation;
        assert!(off_axis_magnitude(rotation, Vec3::Y) < 1e-6);
        assert!(rotation.abs_diff_eq(Quat::IDENTITY, 1e-6));
    }

    #[test]
    fn append_rotation_is_inherited_by_ratio() {
        let mut model = five_bones();
        model.bones[2].flags |= BoneFlags::APPEND_ROTATE;
        model.bones[2].append = Some(Append { parent: 1, ratio: 0.5 });
        model.finalize();
        let mut motion = Motion::new();
        motion.insert_bone_keyframe(
            "b1",
            BoneKeyframe::with_pose(0, Vec3::ZERO, Quat::from_rotation_z(FRAC_PI_2)),
        );
        let deltas = resolve(&model, &motion, 0.0);
        let expected = Quat::from_rotation_z(FRAC_PI_2 * 0.5);
        assert!(deltas.get(2).unwrap().rotation.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn forward_append_source_is_skipped() {
        let mut model = five_bones();
        model.bones[1].flags |= BoneFlags::APPEND_ROTATE | BoneFlags::APPEND_TRANSLATE;
        model.bones[1].append = Some(Append { parent: 3, ratio: 1.0 });
        model.finalize();
        let mut motion = Motion::new();
        motion.insert_bone_keyframe(
            "b3",
            BoneKeyframe::with_pose(0, Vec3::Y, Quat::from_rotation_z(FRAC_PI_2)),
        );
        let deltas = resolve(&model, &motion, 0.0);
        assert!(deltas.get(1).unwrap().is_identity());
    }

    fn ik_arm() -> PmxModel {
        let mut model = PmxModel::new("arm");
        model.bones.push(BoneDef::new("0", Vec3::ZERO, -1));
        model.bones.push(BoneDef::new("1", Vec3::X, 0));
        model.bones.push(BoneDef::new("2", Vec3::X * 2.0, 1));
        model.bones.push(BoneDef::new("tip", Vec3::X * 3.0, 2));
        let mut ik = BoneDef::new("ik", Vec3::X * 3.0, -1);
        ik.flags |= BoneFlags::IK;
        ik.ik = Some(IkDef {
            target: 3,
            loop_count: 20,
            limit_angle: 2.0,
            links: vec![IkLink::new(2), IkLink::new(1), IkLink::new(0)],
        });
        model.bones.push(ik);
        model.finalize();
        model
    }

    #[test]
    fn ik_follows_moved_goal() {
        let model = ik_arm();
        let mut motion = Motion::new();
        // IK 骨骼从 (3,0,0) 移动到 (1,2,0)
        motion.insert_bone_keyframe(
            "ik",
            BoneKeyframe::with_pose(0, Vec3::new(-2.0, 2.0, 0.0), Quat::IDENTITY),
        );
        let mut deltas = resolve(&model, &motion, 0.0);
        assert!((deltas.position(3) - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-3);

        motion.insert_ik_keyframe("ik", IkKeyframe::new(0, false));
        let mut deltas = resolve(&model, &motion, 0.0);
        assert!(deltas.position(3).abs_diff_eq(Vec3::X * 3.0, 1e-6));
    }

    #[test]
    fn pre_physics_selection_leaves_after_physics_unset() {
        let mut model = five_bones();
        model.bones[4].flags |= BoneFlags::AFTER_PHYSICS;
        model.finalize();
        let motion = Motion::new();
        let morphs = MorphDeltas::new(0);
        let resolver = BoneResolver::new(&model);
        let mut deltas =
            resolver.resolve(&motion, 0.0, &morphs, &BoneSelection::PrePhysics, true);
        assert!(deltas.get(3).unwrap().global().is_some());
        assert!(deltas.get(4).unwrap().global().is_none());

        resolver.resolve_into(&mut deltas, &motion, 0.0, &morphs, &BoneSelection::AfterPhysics, true);
        assert!(deltas.get(4).unwrap().global().is_some());
    }

    #[test]
    fn named_selection_fills_ancestors() {
        let model = five_bones();
        let deltas = BoneResolver::new(&model).resolve(
            &Motion::new(),
            0.0,
            &MorphDeltas::new(0),
            &BoneSelection::Names(vec!["b2".into(), "missing".into()]),
            false,
        );
        assert!(deltas.get(0).unwrap().global().is_some());
        assert!(deltas.get(2).unwrap().global().is_some());
        assert!(deltas.get(3).unwrap().global().is_none());
    }

    #[test]
    fn physics_bones_are_not_overwritten() {
        let model = five_bones();
        let motion = Motion::new();
        let morphs = MorphDeltas::new(0);
        let resolver = BoneResolver::new(&model);
        let mut deltas = resolver.resolve(&motion, 0.0, &morphs, &BoneSelection::All, true);
        let global = Mat4::from_rotation_translation(Quat::from_rotation_z(FRAC_PI_2), Vec3::X * 2.0);
        deltas.set_global(2, global);
        resolver.resolve_into(&mut deltas, &motion, 0.0, &morphs, &BoneSelection::All, true);
        assert!(deltas.get(2).unwrap().physics);
        assert!(deltas.global(2).abs_diff_eq(global, 1e-6));
        assert!(deltas.position(3).abs_diff_eq(Vec3::new(2.0, 1.0, 0.0), 1e-5));
    }

    #[test]
    fn same_frame_is_deterministic() {
        let model = ik_arm();
        let mut motion = Motion::new();
        motion.insert_bone_keyframe(
            "ik",
            BoneKeyframe::with_pose(0, Vec3::new(-1.0, 1.5, 0.0), Quat::IDENTITY),
        );
        assert_eq!(resolve(&model, &motion, 3.5), resolve(&model, &motion, 3.5));
    }
}
