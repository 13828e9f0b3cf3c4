//! Motion 核心数据结构
//!
//! 存储完整的动画数据：骨骼、Morph、IK 启用与刚体参数轨道。
//! 每次修改都会换一个新的身份哈希，帧缓存据此判断是否失效。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::keyframe::{BoneKeyframe, IkKeyframe, MorphKeyframe, RigidBodyKeyframe};
use super::motion_track::{
    BoneFrameTransform, BoneMotionTrack, IkMotionTrack, MorphMotionTrack, MotionTrack,
    RigidBodyMotionTrack,
};

static MOTION_HASH: AtomicU64 = AtomicU64::new(1);

/// 分配一个新的动作身份哈希（进程内单调递增，不为 0）
pub(crate) fn next_motion_hash() -> u64 {
    MOTION_HASH.fetch_add(1, Ordering::Relaxed)
}

/// 动画数据
#[derive(Debug, Clone)]
pub struct Motion {
    /// VMD 中记录的模型名
    pub model_name: String,
    /// 骨骼动画轨道（骨骼名称 -> 轨道）
    bone_tracks: HashMap<String, BoneMotionTrack>,
    /// Morph 动画轨道（Morph 名称 -> 轨道）
    morph_tracks: HashMap<String, MorphMotionTrack>,
    /// IK 动画轨道（IK 骨骼名称 -> 轨道）
    ik_tracks: HashMap<String, IkMotionTrack>,
    /// 刚体参数轨道（刚体名称 -> 轨道）
    rigid_body_tracks: HashMap<String, RigidBodyMotionTrack>,
    hash: u64,
}

impl Motion {
    /// 创建空的 Motion
    pub fn new() -> Self {
        Self {
            model_name: String::new(),
            bone_tracks: HashMap::new(),
            morph_tracks: HashMap::new(),
            ik_tracks: HashMap::new(),
            rigid_body_tracks: HashMap::new(),
            hash: next_motion_hash(),
        }
    }

    /// 身份哈希
    pub fn hash(&self) -> u64 {
        self.hash
    }

    fn touch(&mut self) {
        self.hash = next_motion_hash();
    }

    /// 所有轨道中的最大帧号
    pub fn max_frame(&self) -> u32 {
        let bone = self.bone_tracks.values().map(|t| t.max_frame());
        let morph = self.morph_tracks.values().map(|t| t.max_frame());
        let ik = self.ik_tracks.values().map(|t| t.max_frame());
        let rb = self.rigid_body_tracks.values().map(|t| t.max_frame());
        bone.chain(morph).chain(ik).chain(rb).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.bone_tracks.is_empty()
            && self.morph_tracks.is_empty()
            && self.ik_tracks.is_empty()
            && self.rigid_body_tracks.is_empty()
    }

    /// 插入骨骼关键帧，同帧覆盖
    pub fn insert_bone_keyframe(&mut self, name: &str, keyframe: BoneKeyframe) {
        self.bone_tracks
            .entry(name.to_string())
            .or_default()
            .insert(keyframe);
        self.touch();
    }

    /// 插入 Morph 关键帧
    pub fn insert_morph_keyframe(&mut self, name: &str, keyframe: MorphKeyframe) {
        self.morph_tracks
            .entry(name.to_string())
            .or_default()
            .insert(keyframe);
        self.touch();
    }

    /// 插入 IK 关键帧
    pub fn insert_ik_keyframe(&mut self, name: &str, keyframe: IkKeyframe) {
        self.ik_tracks
            .entry(name.to_string())
            .or_default()
            .insert(keyframe);
        self.touch();
    }

    /// 插入刚体参数关键帧
    pub fn insert_rigid_body_keyframe(&mut self, name: &str, keyframe: RigidBodyKeyframe) {
        self.rigid_body_tracks
            .entry(name.to_string())
            .or_default()
            .insert(keyframe);
        self.touch();
    }

    /// 移除骨骼关键帧
    pub fn remove_bone_keyframe(&mut self, name: &str, frame: u32) -> Option<BoneKeyframe> {
        let removed = self.bone_tracks.get_mut(name)?.remove(frame);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// 获取骨骼帧变换，没有轨道时为恒等
    pub fn bone_transform(&self, name: &str, frame: f32) -> BoneFrameTransform {
        self.bone_tracks
            .get(name)
            .map(|t| t.sample(frame))
            .unwrap_or_default()
    }

    /// 获取 Morph 权重，没有轨道时为 0
    pub fn morph_weight(&self, name: &str, frame: f32) -> f32 {
        self.morph_tracks
            .get(name)
            .map(|t| t.sample(frame))
            .unwrap_or(0.0)
    }

    /// 获取 IK 在指定帧的启用状态（默认启用）
    pub fn is_ik_enabled(&self, name: &str, frame: f32) -> bool {
        self.ik_tracks.get(name).map_or(true, |t| t.sample(frame))
    }

    /// 获取刚体参数覆盖
    pub fn rigid_body_at(&self, name: &str, frame: f32) -> Option<RigidBodyKeyframe> {
        self.rigid_body_tracks.get(name).and_then(|t| t.sample(frame))
    }

    pub fn bone_track(&self, name: &str) -> Option<&BoneMotionTrack> {
        self.bone_tracks.get(name)
    }

    pub fn morph_track(&self, name: &str) -> Option<&MorphMotionTrack> {
        self.morph_tracks.get(name)
    }

    pub fn bone_track_names(&self) -> impl Iterator<Item = &String> {
        self.bone_tracks.keys()
    }

    pub fn morph_track_names(&self) -> impl Iterator<Item = &String> {
        self.morph_tracks.keys()
    }

    pub fn rigid_body_track_names(&self) -> impl Iterator<Item = &String> {
        self.rigid_body_tracks.keys()
    }

    /// 是否有任何刚体参数轨道
    pub fn has_rigid_body_tracks(&self) -> bool {
        !self.rigid_body_tracks.is_empty()
    }

    /// 所有骨骼轨道在 [a, b] 内的关键帧数
    pub fn bone_keyframes_in(&self, a: u32, b: u32) -> usize {
        self.bone_tracks.values().map(|t| t.range(a, b).len()).sum()
    }

    /// 合并另一个 Motion（同帧覆盖）
    pub fn merge(&mut self, other: &Motion) {
        for (name, track) in &other.bone_tracks {
            let entry = self.bone_tracks.entry(name.clone()).or_default();
            for keyframe in track.keyframes.values() {
                entry.insert(keyframe.clone());
            }
        }
        for (name, track) in &other.morph_tracks {
            let entry = self.morph_tracks.entry(name.clone()).or_default();
            for keyframe in track.keyframes.values() {
                entry.insert(keyframe.clone());
            }
        }
        for (name, track) in &other.ik_tracks {
            let entry = self.ik_tracks.entry(name.clone()).or_default();
            for keyframe in track.keyframes.values() {
                entry.insert(keyframe.clone());
            }
        }
        self.touch();
    }
}

impl Default for Motion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn every_mutation_changes_hash() {
        let mut motion = Motion::new();
        let h0 = motion.hash();
        motion.insert_bone_keyframe("センター", BoneKeyframe::new(0));
        let h1 = motion.hash();
        motion.insert_morph_keyframe("あ", MorphKeyframe::new(10, 1.0));
        let h2 = motion.hash();
        assert_ne!(h0, h1);
        assert_ne!(h1, h2);
        assert!(motion.remove_bone_keyframe("センター", 5).is_none());
        assert_eq!(motion.hash(), h2);
    }

    #[test]
    fn missing_tracks_use_defaults() {
        let motion = Motion::new();
        assert_eq!(motion.bone_transform("x", 10.0), BoneFrameTransform::default());
        assert_eq!(motion.morph_weight("x", 10.0), 0.0);
        assert!(motion.is_ik_enabled("左足ＩＫ", 10.0));
        assert!(motion.rigid_body_at("x", 0.0).is_none());
        assert_eq!(motion.max_frame(), 0);
    }

    #[test]
    fn max_frame_spans_all_tracks() {
        let mut motion = Motion::new();
        motion.insert_bone_keyframe("a", BoneKeyframe::with_pose(30, Vec3::X, Quat::IDENTITY));
        motion.insert_ik_keyframe("ik", IkKeyframe::new(90, false));
        assert_eq!(motion.max_frame(), 90);
        assert!(!motion.is_ik_enabled("ik", 95.0));
        assert_eq!(motion.bone_keyframes_in(0, 30), 1);
    }

    #[test]
    fn merge_overwrites_same_frame() {
        let mut a = Motion::new();
        a.insert_bone_keyframe("a", BoneKeyframe::with_pose(0, Vec3::X, Quat::IDENTITY));
        let mut b = Motion::new();
        b.insert_bone_keyframe("a", BoneKeyframe::with_pose(0, Vec3::Y, Quat::IDENTITY));
        a.merge(&b);
        assert_eq!(a.bone_transform("a", 0.0).translation, Vec3::Y);
    }
}
