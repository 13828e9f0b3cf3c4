//! 动画轨道
//!
//! 存储单个骨骼 / Morph / IK / 刚体通道的所有关键帧，并提供查找和插值功能。
//! 关键帧以整数帧号为键，采样帧为实数。

use std::collections::BTreeMap;
use std::ops::Bound;

use glam::{Quat, Vec3};

use super::keyframe::{BoneKeyframe, IkKeyframe, MorphKeyframe, RigidBodyKeyframe};

/// 骨骼帧变换结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneFrameTransform {
    /// 平移
    pub translation: Vec3,
    /// 旋转
    pub rotation: Quat,
}

impl Default for BoneFrameTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// 动画轨道 trait
pub trait MotionTrack {
    type Keyframe;
    type Frame;

    /// 插入关键帧，同帧覆盖并返回旧值
    fn insert(&mut self, keyframe: Self::Keyframe) -> Option<Self::Keyframe>;

    /// 查找精确帧
    fn find(&self, frame: u32) -> Option<&Self::Keyframe>;

    /// 求值指定帧（支持帧间插值）
    fn sample(&self, frame: f32) -> Self::Frame;

    /// 闭区间 [a, b] 内的关键帧
    fn range(&self, a: u32, b: u32) -> Vec<&Self::Keyframe>;

    /// 获取轨道长度
    fn len(&self) -> usize;

    /// 是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 获取最大帧索引
    fn max_frame(&self) -> u32;
}

/// 非法帧号（负数、NaN）按 0 处理
pub(crate) fn sanitize_frame(frame: f32) -> f32 {
    if frame.is_finite() && frame > 0.0 {
        frame
    } else {
        0.0
    }
}

/// 前一关键帧（帧号 ≤ frame）与后一关键帧（帧号 > frame）
fn search_closest<K>(keyframes: &BTreeMap<u32, K>, frame: f32) -> (Option<&K>, Option<&K>) {
    let frame = sanitize_frame(frame);
    let floor = frame.floor().min(u32::MAX as f32) as u32;
    let prev = keyframes.range(..=floor).next_back().map(|(_, k)| k);
    let next = keyframes
        .range((Bound::Excluded(floor), Bound::Unbounded))
        .next()
        .map(|(_, k)| k);
    (prev, next)
}

fn range_of<K>(keyframes: &BTreeMap<u32, K>, a: u32, b: u32) -> Vec<&K> {
    if a > b {
        return Vec::new();
    }
    keyframes.range(a..=b).map(|(_, k)| k).collect()
}

fn last_key<K>(keyframes: &BTreeMap<u32, K>) -> u32 {
    keyframes.keys().next_back().copied().unwrap_or(0)
}

fn coefficient(prev: u32, next: u32, frame: f32) -> f32 {
    let interval = next.saturating_sub(prev) as f32;
    if interval <= 0.0 {
        return 0.0;
    }
    ((frame - prev as f32) / interval).clamp(0.0, 1.0)
}

fn lerp_f32(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// 骨骼动画轨道
#[derive(Debug, Clone, Default)]
pub struct BoneMotionTrack {
    /// 关键帧映射（帧索引 -> 关键帧）
    pub keyframes: BTreeMap<u32, BoneKeyframe>,
}

impl BoneMotionTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// 移除关键帧
    pub fn remove(&mut self, frame: u32) -> Option<BoneKeyframe> {
        self.keyframes.remove(&frame)
    }
}

impl MotionTrack for BoneMotionTrack {
    type Keyframe = BoneKeyframe;
    type Frame = BoneFrameTransform;

    fn insert(&mut self, keyframe: BoneKeyframe) -> Option<BoneKeyframe> {
        self.keyframes.insert(keyframe.frame, keyframe)
    }

    fn find(&self, frame: u32) -> Option<&BoneKeyframe> {
        self.keyframes.get(&frame)
    }

    fn sample(&self, frame: f32) -> BoneFrameTransform {
        let frame = sanitize_frame(frame);
        match search_closest(&self.keyframes, frame) {
            (Some(prev), Some(next)) => {
                if frame == prev.frame as f32 {
                    return BoneFrameTransform {
                        translation: prev.translation,
                        rotation: prev.rotation,
                    };
                }
                // 插值曲线取后一关键帧
                let t = coefficient(prev.frame, next.frame, frame);
                let amounts = Vec3::new(
                    next.interp_x.evaluate(t),
                    next.interp_y.evaluate(t),
                    next.interp_z.evaluate(t),
                );
                let translation = prev.translation + (next.translation - prev.translation) * amounts;
                let r = next.interp_rotation.evaluate(t);
                let rotation = prev.rotation.slerp(next.rotation, r).normalize();
                BoneFrameTransform {
                    translation,
                    rotation,
                }
            }
            // 最后一帧之后保持最后的值
            (Some(prev), None) => BoneFrameTransform {
                translation: prev.translation,
                rotation: prev.rotation,
            },
            // 第一帧之前为单位姿势
            (None, _) => BoneFrameTransform::default(),
        }
    }

    fn range(&self, a: u32, b: u32) -> Vec<&BoneKeyframe> {
        range_of(&self.keyframes, a, b)
    }

    fn len(&self) -> usize {
        self.keyframes.len()
    }

    fn max_frame(&self) -> u32 {
        last_key(&self.keyframes)
    }
}

/// Morph 动画轨道
#[derive(Debug, Clone, Default)]
pub struct MorphMotionTrack {
    /// 关键帧映射（帧索引 -> 关键帧）
    pub keyframes: BTreeMap<u32, MorphKeyframe>,
}

impl MorphMotionTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// 移除关键帧
    pub fn remove(&mut self, frame: u32) -> Option<MorphKeyframe> {
        self.keyframes.remove(&frame)
    }
}

impl MotionTrack for MorphMotionTrack {
    type Keyframe = MorphKeyframe;
    type Frame = f32;

    fn insert(&mut self, keyframe: MorphKeyframe) -> Option<MorphKeyframe> {
        self.keyframes.insert(keyframe.frame, keyframe)
    }

    fn find(&self, frame: u32) -> Option<&MorphKeyframe> {
        self.keyframes.get(&frame)
    }

    fn sample(&self, frame: f32) -> f32 {
        let frame = sanitize_frame(frame);
        match search_closest(&self.keyframes, frame) {
            (Some(prev), Some(next)) => {
                // Morph 使用线性插值
                let t = coefficient(prev.frame, next.frame, frame);
                lerp_f32(prev.weight, next.weight, t)
            }
            (Some(prev), None) => prev.weight,
            (None, _) => 0.0,
        }
    }

    fn range(&self, a: u32, b: u32) -> Vec<&MorphKeyframe> {
        range_of(&self.keyframes, a, b)
    }

    fn len(&self) -> usize {
        self.keyframes.len()
    }

    fn max_frame(&self) -> u32 {
        last_key(&self.keyframes)
    }
}

/// IK 动画轨道
#[derive(Debug, Clone, Default)]
pub struct IkMotionTrack {
    /// 关键帧映射（帧索引 -> 关键帧）
    pub keyframes: BTreeMap<u32, IkKeyframe>,
}

impl IkMotionTrack {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MotionTrack for IkMotionTrack {
    type Keyframe = IkKeyframe;
    type Frame = bool;

    fn insert(&mut self, keyframe: IkKeyframe) -> Option<IkKeyframe> {
        self.keyframes.insert(keyframe.frame, keyframe)
    }

    fn find(&self, frame: u32) -> Option<&IkKeyframe> {
        self.keyframes.get(&frame)
    }

    /// 指定帧的 IK 启用状态，默认启用
    fn sample(&self, frame: f32) -> bool {
        match search_closest(&self.keyframes, frame) {
            (Some(prev), _) => prev.enabled,
            (None, _) => true,
        }
    }

    fn range(&self, a: u32, b: u32) -> Vec<&IkKeyframe> {
        range_of(&self.keyframes, a, b)
    }

    fn len(&self) -> usize {
        self.keyframes.len()
    }

    fn max_frame(&self) -> u32 {
        last_key(&self.keyframes)
    }
}

/// 刚体参数轨道（阶梯采样）
#[derive(Debug, Clone, Default)]
pub struct RigidBodyMotionTrack {
    pub keyframes: BTreeMap<u32, RigidBodyKeyframe>,
}

impl RigidBodyMotionTrack {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MotionTrack for RigidBodyMotionTrack {
    type Keyframe = RigidBodyKeyframe;
    type Frame = Option<RigidBodyKeyframe>;

    fn insert(&mut self, keyframe: RigidBodyKeyframe) -> Option<RigidBodyKeyframe> {
        self.keyframes.insert(keyframe.frame, keyframe)
    }

    fn find(&self, frame: u32) -> Option<&RigidBodyKeyframe> {
        self.keyframes.get(&frame)
    }

    /// 前后关键帧都有值时线性插值，否则沿用前一帧
    fn sample(&self, frame: f32) -> Option<RigidBodyKeyframe> {
        let frame = sanitize_frame(frame);
        match search_closest(&self.keyframes, frame) {
            (Some(prev), Some(next)) => {
                let t = coefficient(prev.frame, next.frame, frame);
                let size = match (prev.size, next.size) {
                    (Some(a), Some(b)) => Some(a.lerp(b, t)),
                    (a, _) => a,
                };
                let mass = match (prev.mass, next.mass) {
                    (Some(a), Some(b)) => Some(lerp_f32(a, b, t)),
                    (a, _) => a,
                };
                Some(RigidBodyKeyframe {
                    frame: frame.floor() as u32,
                    size,
                    mass,
                })
            }
            (Some(prev), None) => Some(prev.clone()),
            (None, _) => None,
        }
    }

    fn range(&self, a: u32, b: u32) -> Vec<&RigidBodyKeyframe> {
        range_of(&self.keyframes, a, b)
    }

    fn len(&self) -> usize {
        self.keyframes.len()
    }

    fn max_frame(&self) -> u32 {
        last_key(&self.keyframes)
    }
}

/// 物理世界 / 风参数的阶梯轨道
///
/// 采样优先级：同帧 → 下一关键帧 → 上一关键帧 → 默认值。
#[derive(Debug, Clone, Default)]
pub struct StepTrack<T> {
    pub keyframes: BTreeMap<u32, T>,
}

impl<T: Clone> StepTrack<T> {
    pub fn new() -> Self {
        Self {
            keyframes: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, frame: u32, value: T) -> Option<T> {
        self.keyframes.insert(frame, value)
    }

    pub fn sample_or(&self, frame: f32, default: T) -> T {
        let frame = sanitize_frame(frame);
        let floor = frame.floor().min(u32::MAX as f32) as u32;
        if frame == floor as f32 {
            if let Some(v) = self.keyframes.get(&floor) {
                return v.clone();
            }
        }
        if let Some((_, v)) = self
            .keyframes
            .range((Bound::Excluded(floor), Bound::Unbounded))
            .next()
        {
            return v.clone();
        }
        match self.keyframes.range(..=floor).next_back() {
            Some((_, v)) => v.clone(),
            None => default,
        }
    }

    pub fn range(&self, a: u32, b: u32) -> Vec<&T> {
        range_of(&self.keyframes, a, b)
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    pub fn max_frame(&self) -> u32 {
        last_key(&self.keyframes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn empty_track_is_identity() {
        let track = BoneMotionTrack::new();
        assert_eq!(track.sample(0.0), BoneFrameTransform::default());
        assert_eq!(track.sample(10.0), BoneFrameTransform::default());
    }

    #[test]
    fn linear_translation_midpoint() {
        let mut track = BoneMotionTrack::new();
        track.insert(BoneKeyframe::with_pose(0, Vec3::ZERO, Quat::IDENTITY));
        track.insert(BoneKeyframe::with_pose(30, Vec3::X, Quat::IDENTITY));
        let f = track.sample(15.0);
        assert!((f.translation.x - 0.5).abs() < 1e-6);
        let f = track.sample(7.5);
        assert!((f.translation.x - 0.25).abs() < 1e-6);
    }

    #[test]
    fn before_first_is_identity_after_last_repeats() {
        let mut track = BoneMotionTrack::new();
        let rot = Quat::from_rotation_y(FRAC_PI_2);
        track.insert(BoneKeyframe::with_pose(10, Vec3::Y, rot));
        track.insert(BoneKeyframe::with_pose(20, Vec3::Z, rot));
        assert_eq!(track.sample(5.0), BoneFrameTransform::default());
        let last = track.sample(100.0);
        assert_eq!(last.translation, Vec3::Z);
        assert_eq!(last.rotation, rot);
        // 负帧号按 0 处理
        assert_eq!(track.sample(-3.0), BoneFrameTransform::default());
    }

    #[test]
    fn rotation_slerps_on_short_arc() {
        let mut track = BoneMotionTrack::new();
        track.insert(BoneKeyframe::with_pose(0, Vec3::ZERO, Quat::IDENTITY));
        // 取反表示同一旋转
        let end = -Quat::from_rotation_z(FRAC_PI_2);
        track.insert(BoneKeyframe::with_pose(10, Vec3::ZERO, end));
        let mid = track.sample(5.0).rotation;
        let expected = Quat::from_rotation_z(FRAC_PI_2 / 2.0);
        assert!(mid.dot(expected).abs() > 1.0 - 1e-5);
    }

    #[test]
    fn duplicate_insert_overwrites() {
        let mut track = MorphMotionTrack::new();
        assert!(track.insert(MorphKeyframe::new(3, 0.2)).is_none());
        let old = track.insert(MorphKeyframe::new(3, 0.8));
        assert_eq!(old.map(|k| k.weight), Some(0.2));
        assert_eq!(track.len(), 1);
        assert_eq!(track.sample(3.0), 0.8);
    }

    #[test]
    fn range_is_inclusive() {
        let mut track = MorphMotionTrack::new();
        for f in [0, 5, 10, 15, 20] {
            track.insert(MorphKeyframe::new(f, f as f32));
        }
        let frames: Vec<u32> = track.range(5, 15).iter().map(|k| k.frame).collect();
        assert_eq!(frames, vec![5, 10, 15]);
        assert!(track.range(16, 19).is_empty());
        assert!(track.range(10, 5).is_empty());
        assert_eq!(track.max_frame(), 20);
    }

    #[test]
    fn ik_defaults_to_enabled() {
        let mut track = IkMotionTrack::new();
        assert!(track.sample(0.0));
        track.insert(IkKeyframe::new(10, false));
        assert!(track.sample(5.0));
        assert!(!track.sample(10.0));
        assert!(!track.sample(99.5));
    }

    #[test]
    fn step_track_prefers_next_keyframe() {
        let mut track = StepTrack::new();
        assert_eq!(track.sample_or(4.0, 7), 7);
        track.insert(10, 1);
        track.insert(20, 2);
        assert_eq!(track.sample_or(10.0, 0), 1);
        assert_eq!(track.sample_or(12.0, 0), 2);
        assert_eq!(track.sample_or(3.0, 0), 1);
        assert_eq!(track.sample_or(25.0, 0), 2);
    }
}
