//! 每个模型槽位的变形缓存

use crate::animation::Motion;
use crate::model::PmxModel;
use crate::morph::{MorphDeltas, MorphEvaluator};
use crate::physics::PhysicsDeltas;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheKey {
    model_hash: u64,
    motion_hash: u64,
    frame_bits: u32,
}

impl CacheKey {
    fn new(model: &PmxModel, motion: &Motion, frame: f32) -> Self {
        Self {
            model_hash: model.hash(),
            motion_hash: motion.hash(),
            frame_bits: frame.to_bits(),
        }
    }
}

/// 变形缓存
///
/// 模型、动作哈希与帧号都不变时复用 Morph 与刚体参数的求值结果。
#[derive(Debug, Default)]
pub struct DeformCache {
    key: Option<CacheKey>,
    morphs: MorphDeltas,
    physics: PhysicsDeltas,
    hits: u64,
}

impl DeformCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Morph 与刚体参数覆盖
    pub fn evaluate(
        &mut self,
        model: &PmxModel,
        motion: &Motion,
        frame: f32,
    ) -> (MorphDeltas, PhysicsDeltas) {
        let key = CacheKey::new(model, motion, frame);
        if self.key == Some(key) {
            self.hits += 1;
        } else {
            self.morphs = MorphEvaluator::evaluate(model, motion, frame);
            self.physics = PhysicsDeltas::build(model, motion, frame);
            self.key = Some(key);
        }
        (self.morphs.clone(), self.physics.clone())
    }

    /// 模型被替换时丢弃缓存
    pub fn invalidate(&mut self) {
        self.key = None;
    }

    /// 命中次数
    pub fn hits(&self) -> u64 {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::MorphKeyframe;
    use crate::model::{MorphDef, MorphKind, VertexMorphOffset};
    use glam::Vec3;

    fn model() -> PmxModel {
        let mut model = PmxModel::new("m");
        model.morphs.push(MorphDef::new(
            "smile",
            MorphKind::Vertex(vec![VertexMorphOffset {
                vertex: 0,
                offset: Vec3::Y,
            }]),
        ));
        model.finalize();
        model
    }

    #[test]
    fn same_key_reuses_results() {
        let model = model();
        let mut motion = Motion::new();
        motion.insert_morph_keyframe("smile", MorphKeyframe::new(0, 1.0));
        let mut cache = DeformCache::new();
        let (a, _) = cache.evaluate(&model, &motion, 5.0);
        let (b, _) = cache.evaluate(&model, &motion, 5.0);
        assert_eq!(a, b);
        assert_eq!(cache.hits(), 1);

        cache.evaluate(&model, &motion, 6.0);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn motion_mutation_forces_rebuild() {
        let model = model();
        let mut motion = Motion::new();
        motion.insert_morph_keyframe("smile", MorphKeyframe::new(0, 1.0));
        let mut cache = DeformCache::new();
        cache.evaluate(&model, &motion, 0.0);

        motion.insert_morph_keyframe("smile", MorphKeyframe::new(0, 0.5));
        let (morphs, _) = cache.evaluate(&model, &motion, 0.0);
        assert_eq!(cache.hits(), 0);
        assert_eq!(morphs.vertex(0).unwrap().position, Vec3::Y * 0.5);
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let model = model();
        let mut motion = Motion::new();
        motion.insert_morph_keyframe("smile", MorphKeyframe::new(0, 1.0));
        let mut cache = DeformCache::new();
        cache.evaluate(&model, &motion, 3.0);
        cache.invalidate();
        let (morphs, _) = cache.evaluate(&model, &motion, 3.0);
        assert_eq!(cache.hits(), 0);
        assert_eq!(morphs.vertex(0).unwrap().position, Vec3::Y);
    }
}
