//! 每个视窗一条的变形流水线

use std::collections::BTreeMap;

use crate::animation::{Motion, PhysicsWorldMotion, WindMotion};
use crate::model::PmxModel;
use crate::morph::{MorphDeltas, MorphEvaluator};
use crate::physics::{build_fit_motion, get_config, settle_frame_count, PhysicsBridge, PhysicsDeltas, PhysicsResetType};
use crate::skeleton::{BoneDeltas, BoneResolver, BoneSelection};
use crate::skinning::{compute_skinning, SkinningInput};

use super::{DeformCache, VmdDeltas};

/// 一个模型槽位的输入
#[derive(Clone, Copy)]
pub struct ModelInput<'a> {
    pub slot: usize,
    pub model: &'a PmxModel,
    pub motion: &'a Motion,
}

/// 一帧的请求参数
#[derive(Clone, Copy)]
pub struct DeformRequest<'a> {
    pub frame: f32,
    /// 距上一帧的秒数
    pub dt: f32,
    pub physics_enabled: bool,
    /// 来自共享状态的重置请求
    pub reset: PhysicsResetType,
    pub world: &'a PhysicsWorldMotion,
    pub wind: &'a WindMotion,
}

#[derive(Debug, Default)]
struct SlotState {
    cache: DeformCache,
    model_hash: u64,
}

/// 变形流水线
///
/// 所有模型共享一个物理世界：先对每个模型做 Morph 与物理前骨骼，
/// 世界步进一次，再逐个模型写回物理结果、求解物理后骨骼并蒙皮。
pub struct ViewerPipeline {
    bridge: PhysicsBridge,
    slots: BTreeMap<usize, SlotState>,
    convert_local_axis: bool,
    skinning: bool,
}

struct Phase1 {
    morphs: MorphDeltas,
    physics: PhysicsDeltas,
    bones: BoneDeltas,
}

impl ViewerPipeline {
    pub fn new(bridge: PhysicsBridge) -> Self {
        Self {
            bridge,
            slots: BTreeMap::new(),
            convert_local_axis: false,
            skinning: true,
        }
    }

    /// 使用 Rapier 物理世界
    pub fn rapier() -> Self {
        Self::new(PhysicsBridge::rapier())
    }

    pub fn with_local_axis(mut self, enabled: bool) -> Self {
        self.convert_local_axis = enabled;
        self
    }

    /// 关闭后不做 CPU 蒙皮（`VmdDeltas::skinned` 为 `None`）
    pub fn with_skinning(mut self, enabled: bool) -> Self {
        self.skinning = enabled;
        self
    }

    pub fn bridge(&self) -> &PhysicsBridge {
        &self.bridge
    }

    pub fn cache(&self, slot: usize) -> Option<&DeformCache> {
        self.slots.get(&slot).map(|s| &s.cache)
    }

    /// 移除槽位并销毁其刚体
    pub fn remove_slot(&mut self, slot: usize) {
        self.slots.remove(&slot);
        self.bridge.detach(slot);
    }

    /// 计算一帧，结果按 `models` 的顺序返回
    pub fn deform(&mut self, models: &[ModelInput<'_>], req: &DeformRequest<'_>) -> Vec<VmdDeltas> {
        self.retain_slots(models);

        let world = req.world.frame_at(req.frame);
        let reset = req.reset.max(world.reset_type);
        self.bridge.set_gravity(world.gravity);

        let mut reset_for_step = reset;
        if reset.rebuilds_world() {
            log::debug!("物理重置 {:?} @ {}", reset, req.frame);
            self.bridge.reset_world(world.gravity);
        }
        if reset == PhysicsResetType::StartFitFrame {
            self.settle(models, req);
            reset_for_step = PhysicsResetType::None;
        }

        let mut staged: Vec<Phase1> = models.iter().map(|input| self.phase1(input, req.frame)).collect();

        for (input, stage) in models.iter().zip(staged.iter_mut()) {
            if !self.bridge.is_attached(input.slot) {
                self.bridge.attach(input.slot, input.model, &mut stage.bones, Some(&stage.physics));
            } else if !stage.physics.is_empty() {
                self.bridge.apply_overrides(input.slot, &stage.physics);
            }
            self.bridge
                .sync_before_step(input.slot, &mut stage.bones, req.physics_enabled, reset_for_step);
        }

        let stepping = (req.physics_enabled || reset_for_step != PhysicsResetType::None)
            && reset != PhysicsResetType::StartFrame;
        if stepping {
            self.bridge.apply_wind(&req.wind.frame_at(req.frame));
            let steps = self.bridge.step(req.dt, world.max_sub_steps, world.fixed_time_step);
            log::trace!("物理步进 {} 子步 (dt={:.4})", steps, req.dt);
        }

        models
            .iter()
            .zip(staged)
            .map(|(input, stage)| self.phase2(input, stage, req.frame, req.physics_enabled))
            .collect()
    }

    /// 丢弃已不存在的槽位；模型被替换的槽位重新绑定
    fn retain_slots(&mut self, models: &[ModelInput<'_>]) {
        let gone: Vec<usize> = self
            .slots
            .keys()
            .copied()
            .filter(|slot| !models.iter().any(|m| m.slot == *slot))
            .collect();
        for slot in gone {
            self.remove_slot(slot);
        }

        for input in models {
            let hash = input.model.hash();
            let state = self.slots.entry(input.slot).or_default();
            if state.model_hash != hash {
                state.cache.invalidate();
                state.model_hash = hash;
                self.bridge.detach(input.slot);
            }
        }
    }

    fn phase1(&mut self, input: &ModelInput<'_>, frame: f32) -> Phase1 {
        let (morphs, physics) = match self.slots.get_mut(&input.slot) {
            Some(state) => state.cache.evaluate(input.model, input.motion, frame),
            None => (
                MorphEvaluator::evaluate(input.model, input.motion, frame),
                PhysicsDeltas::build(input.model, input.motion, frame),
            ),
        };
        let bones = self.resolver(input.model).resolve(
            input.motion,
            frame,
            &morphs,
            &BoneSelection::PrePhysics,
            true,
        );
        Phase1 { morphs, physics, bones }
    }

    fn phase2(&mut self, input: &ModelInput<'_>, stage: Phase1, frame: f32, physics_enabled: bool) -> VmdDeltas {
        let Phase1 { morphs, physics, mut bones } = stage;

        let physics_bones = if physics_enabled {
            self.bridge.feedback(input.slot, &mut bones)
        } else {
            Vec::new()
        };

        if input.model.has_after_physics_bones() {
            self.resolver(input.model).resolve_into(
                &mut bones,
                input.motion,
                frame,
                &morphs,
                &BoneSelection::AfterPhysics,
                true,
            );
        }
        bones.apply_global_all();

        let skinned = self.skinning.then(|| {
            let matrices = bones.skinning_matrices();
            compute_skinning(&SkinningInput {
                vertices: &input.model.vertices,
                bone_matrices: &matrices,
                morphs: &morphs,
            })
        });

        VmdDeltas {
            frame,
            model_hash: input.model.hash(),
            motion_hash: input.motion.hash(),
            bones,
            morphs,
            physics,
            physics_bones,
            skinned,
        }
    }

    /// START_FIT_FRAME：从初始姿态经若干帧过渡到当前姿态，让动态刚体跟上
    fn settle(&mut self, models: &[ModelInput<'_>], req: &DeformRequest<'_>) {
        let config = get_config();
        let world = req.world.frame_at(req.frame);

        let fits: Vec<(Motion, u32)> = models
            .iter()
            .map(|input| {
                let settle = settle_frame_count(input.model, input.motion, req.frame, &config);
                let fit = build_fit_motion(
                    input.model,
                    input.motion,
                    req.frame,
                    settle,
                    config.fit_initial_frames,
                );
                (fit, config.fit_initial_frames + settle)
            })
            .collect();
        let total = fits.iter().map(|(_, end)| *end).max().unwrap_or(0) + config.fit_tail_frames;
        log::info!("物理过渡 {} 帧", total + 1);

        for (input, (fit, _)) in models.iter().zip(&fits) {
            let morphs = MorphEvaluator::evaluate(input.model, fit, 0.0);
            let physics = PhysicsDeltas::build(input.model, input.motion, req.frame);
            let mut bones = self
                .resolver(input.model)
                .resolve(fit, 0.0, &morphs, &BoneSelection::PrePhysics, true);
            self.bridge.attach(input.slot, input.model, &mut bones, Some(&physics));
        }

        for f in 0..=total {
            let mut staged = Vec::with_capacity(models.len());
            for (input, (fit, end)) in models.iter().zip(&fits) {
                let fit_frame = f.min(*end) as f32;
                let morphs = MorphEvaluator::evaluate(input.model, fit, fit_frame);
                let mut bones = self
                    .resolver(input.model)
                    .resolve(fit, fit_frame, &morphs, &BoneSelection::PrePhysics, true);
                self.bridge
                    .sync_before_step(input.slot, &mut bones, true, PhysicsResetType::StartFitFrame);
                staged.push(bones);
            }

            self.bridge
                .step(world.fixed_time_step, world.max_sub_steps, world.fixed_time_step);

            for (input, bones) in models.iter().zip(staged.iter_mut()) {
                self.bridge.feedback(input.slot, bones);
            }
        }
    }

    fn resolver<'m>(&self, model: &'m PmxModel) -> BoneResolver<'m> {
        BoneResolver::new(model).with_local_axis(self.convert_local_axis)
    }
}
