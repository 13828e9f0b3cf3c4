//! 物理重置类型与 START_FIT_FRAME 过渡动作

use glam::{Quat, Vec3};

use crate::animation::{BoneKeyframe, Motion, MorphKeyframe};
use crate::math::angle_between;
use crate::model::PmxModel;

use super::config::PhysicsConfig;

/// 物理重置类型（数值越大优先级越高）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PhysicsResetType {
    /// 正常耦合
    #[default]
    None = 0,
    /// 保留世界，仅重放尺寸 / 质量覆盖并重新同步静态刚体
    ContinueFrame = 1,
    /// 以当前姿态重建刚体
    StartFrame = 2,
    /// 从初始姿态过渡到当前姿态后重建
    StartFitFrame = 3,
}

impl PhysicsResetType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(PhysicsResetType::None),
            1 => Some(PhysicsResetType::ContinueFrame),
            2 => Some(PhysicsResetType::StartFrame),
            3 => Some(PhysicsResetType::StartFitFrame),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 是否需要销毁并重建刚体
    pub fn rebuilds_world(self) -> bool {
        self >= PhysicsResetType::StartFrame
    }
}

/// 右腕 / 左腕 与其 x 方向符号
const STANCE_ARMS: [(&str, f32); 2] = [("右腕", 1.0), ("左腕", -1.0)];

/// 过渡帧数：max(最大平移 / 每帧平移, 最大旋转 / 每帧旋转, 最少帧数)
pub fn settle_frame_count(
    model: &PmxModel,
    motion: &Motion,
    frame: f32,
    config: &PhysicsConfig,
) -> u32 {
    let mut max_translate = 0.0f32;
    let mut max_rotate_deg = 0.0f32;
    for bone in &model.bones {
        if motion.bone_track(&bone.name).is_none() {
            continue;
        }
        let t = motion.bone_transform(&bone.name, frame);
        max_translate = max_translate.max(t.translation.length());
        max_rotate_deg = max_rotate_deg.max(angle_between(t.rotation, Quat::IDENTITY).to_degrees());
    }

    let by_translate = per_frame(max_translate, config.fit_translate_per_frame);
    let by_rotate = per_frame(max_rotate_deg, config.fit_rotate_deg_per_frame);
    by_translate.max(by_rotate).max(config.fit_min_settle_frames)
}

fn per_frame(amount: f32, step: f32) -> u32 {
    if step <= 0.0 || !amount.is_finite() {
        return 0;
    }
    (amount / step).ceil() as u32
}

/// Y 字站姿下手臂的局部旋转
///
/// 把手臂方向（尾端 - 根部）对齐到 normalize(-sign, 1.3, 0)。
pub fn y_stance_rotation(model: &PmxModel, bone: usize, sign: f32) -> Quat {
    let Some(def) = model.bones.get(bone) else {
        return Quat::IDENTITY;
    };
    let arm = (model.bone_tail_position(bone) - def.position).normalize_or_zero();
    if arm == Vec3::ZERO {
        log::trace!("骨骼 '{}' 没有尾端方向，跳过 Y 字站姿", def.name);
        return Quat::IDENTITY;
    }
    let target = Vec3::new(-sign, 1.3, 0.0).normalize();
    Quat::from_rotation_arc(arm, target)
}

/// 构造过渡用动作
///
/// - 第 0 帧：全部骨骼恒等，手臂为 Y 字站姿
/// - 第 `initial` 帧：与第 0 帧相同
/// - 第 `initial + settle` 帧：当前动作在 `frame` 的姿态
pub fn build_fit_motion(
    model: &PmxModel,
    motion: &Motion,
    frame: f32,
    settle: u32,
    initial: u32,
) -> Motion {
    let mut fit = Motion::new();
    fit.model_name = motion.model_name.clone();
    let end = initial + settle;

    for (index, bone) in model.bones.iter().enumerate() {
        let stance = STANCE_ARMS
            .iter()
            .find(|(name, _)| *name == bone.name)
            .map(|&(_, sign)| y_stance_rotation(model, index, sign))
            .unwrap_or(Quat::IDENTITY);

        fit.insert_bone_keyframe(&bone.name, BoneKeyframe::with_pose(0, Vec3::ZERO, stance));
        fit.insert_bone_keyframe(&bone.name, BoneKeyframe::with_pose(initial, Vec3::ZERO, stance));

        if motion.bone_track(&bone.name).is_some() {
            let t = motion.bone_transform(&bone.name, frame);
            fit.insert_bone_keyframe(&bone.name, BoneKeyframe::with_pose(end, t.translation, t.rotation));
        } else if stance != Quat::IDENTITY {
            // 无轨道的手臂回到初始姿态
            fit.insert_bone_keyframe(&bone.name, BoneKeyframe::with_pose(end, Vec3::ZERO, Quat::IDENTITY));
        }
    }

    for morph in &model.morphs {
        if motion.morph_track(&morph.name).is_none() {
            continue;
        }
        fit.insert_morph_keyframe(&morph.name, MorphKeyframe::new(initial, 0.0));
        fit.insert_morph_keyframe(&morph.name, MorphKeyframe::new(end, motion.morph_weight(&morph.name, frame)));
    }

    fit
}
