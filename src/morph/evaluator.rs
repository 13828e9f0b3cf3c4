//! Morph 求值器

use crate::animation::Motion;
use crate::math::scale_rotation;
use crate::model::{MaterialMorphOffset, MaterialOp, MorphKind, PmxModel};

use super::{MaterialChannels, MorphDeltas};

/// Morph 求值器
///
/// 合成顺序固定：顶点、UV、追加 UV、骨骼、材质。组 Morph 先展开为
/// 各目标的有效权重。
pub struct MorphEvaluator;

impl MorphEvaluator {
    /// 组 Morph 展开的最大层数
    pub const MAX_GROUP_DEPTH: usize = 8;

    /// 以 motion 在 `frame` 的权重求值
    pub fn evaluate(model: &PmxModel, motion: &Motion, frame: f32) -> MorphDeltas {
        let weights: Vec<f32> = model
            .morphs
            .iter()
            .map(|m| motion.morph_weight(&m.name, frame))
            .collect();
        Self::evaluate_weights(model, &weights)
    }

    /// 以给定的每个 Morph 权重求值（索引与 `model.morphs` 对应）
    pub fn evaluate_weights(model: &PmxModel, weights: &[f32]) -> MorphDeltas {
        let effective = Self::expand_groups(model, weights);
        let mut deltas = MorphDeltas::new(model.materials.len());

        for (morph, &w) in model.morphs.iter().zip(&effective) {
            if let MorphKind::Vertex(offsets) = &morph.kind {
                let w = w.clamp(0.0, 1.0);
                if w == 0.0 {
                    continue;
                }
                for o in offsets {
                    deltas.vertices.entry(o.vertex).or_default().position += o.offset * w;
                }
            }
        }

        for (morph, &w) in model.morphs.iter().zip(&effective) {
            if let MorphKind::Uv(offsets) = &morph.kind {
                let w = w.clamp(0.0, 1.0);
                if w == 0.0 {
                    continue;
                }
                for o in offsets {
                    deltas.vertices.entry(o.vertex).or_default().uv += o.offset * w;
                }
            }
        }

        for (morph, &w) in model.morphs.iter().zip(&effective) {
            if let MorphKind::ExtendedUv(channel, offsets) = &morph.kind {
                let w = w.clamp(0.0, 1.0);
                let slot = (*channel as usize).saturating_sub(1);
                if w == 0.0 || slot >= 4 {
                    continue;
                }
                for o in offsets {
                    deltas.vertices.entry(o.vertex).or_default().extra_uvs[slot] += o.offset * w;
                }
            }
        }

        // 骨骼 Morph 不限制权重
        for (morph, &w) in model.morphs.iter().zip(&effective) {
            if let MorphKind::Bone(offsets) = &morph.kind {
                if w == 0.0 {
                    continue;
                }
                for o in offsets {
                    let Ok(bone) = usize::try_from(o.bone) else {
                        continue;
                    };
                    if bone >= model.bones.len() {
                        continue;
                    }
                    let entry = deltas.bones.entry(bone).or_default();
                    entry.translation += o.translation * w;
                    entry.rotation = (entry.rotation * scale_rotation(o.rotation, w)).normalize();
                }
            }
        }

        for (morph, &w) in model.morphs.iter().zip(&effective) {
            match &morph.kind {
                MorphKind::Material(offsets) => {
                    let w = w.clamp(0.0, 1.0);
                    if w == 0.0 {
                        continue;
                    }
                    for o in offsets {
                        apply_material_offset(&mut deltas, o, w);
                    }
                }
                MorphKind::Flip(_) | MorphKind::Impulse(_) if w != 0.0 => {
                    log::trace!("{} morph '{}' 不参与求值", morph.kind.type_name(), morph.name);
                }
                _ => {}
            }
        }

        deltas
    }

    /// 展开组 Morph，返回每个 Morph 的有效权重
    fn expand_groups(model: &PmxModel, weights: &[f32]) -> Vec<f32> {
        let mut effective = vec![0.0f32; model.morphs.len()];
        let mut truncated = false;
        for (index, &w) in weights.iter().enumerate().take(model.morphs.len()) {
            if w == 0.0 {
                continue;
            }
            Self::distribute(model, index, w, 0, &mut effective, &mut truncated);
        }
        if truncated {
            log::warn!(
                "组 Morph 嵌套超过 {} 层，已截断（可能存在循环引用）",
                Self::MAX_GROUP_DEPTH
            );
        }
        effective
    }

    fn distribute(
        model: &PmxModel,
        index: usize,
        weight: f32,
        depth: usize,
        effective: &mut [f32],
        truncated: &mut bool,
    ) {
        let MorphKind::Group(children) = &model.morphs[index].kind else {
            effective[index] += weight;
            return;
        };
        if depth >= Self::MAX_GROUP_DEPTH {
            *truncated = true;
            return;
        }
        // 组 Morph 的权重限制在 [0, 1]
        let weight = weight.clamp(0.0, 1.0);
        for child in children {
            let Ok(target) = usize::try_from(child.morph) else {
                continue;
            };
            if target >= model.morphs.len() {
                continue;
            }
            Self::distribute(model, target, weight * child.ratio, depth + 1, effective, truncated);
        }
    }
}

fn apply_material_offset(deltas: &mut MorphDeltas, o: &MaterialMorphOffset, w: f32) {
    let targets: Vec<usize> = if o.material < 0 {
        (0..deltas.materials.len()).collect()
    } else {
        let i = o.material as usize;
        if i >= deltas.materials.len() {
            return;
        }
        vec![i]
    };

    for i in targets {
        let delta = &mut deltas.materials[i];
        match o.op {
            MaterialOp::Multiply => {
                let m = &mut delta.mul;
                let one = MaterialChannels::ONE;
                m.diffuse *= one.diffuse.lerp(o.diffuse, w);
                m.specular *= one.specular.lerp(o.specular, w);
                m.specular_power *= 1.0 + (o.specular_power - 1.0) * w;
                m.ambient *= one.ambient.lerp(o.ambient, w);
                m.edge_color *= one.edge_color.lerp(o.edge_color, w);
                m.edge_size *= 1.0 + (o.edge_size - 1.0) * w;
                m.texture_tint *= one.texture_tint.lerp(o.texture_tint, w);
                m.sphere_tint *= one.sphere_tint.lerp(o.sphere_tint, w);
                m.toon_tint *= one.toon_tint.lerp(o.toon_tint, w);
            }
            MaterialOp::Add => {
                let a = &mut delta.add;
                a.diffuse += o.diffuse * w;
                a.specular += o.specular * w;
                a.specular_power += o.specular_power * w;
                a.ambient += o.ambient * w;
                a.edge_color += o.edge_color * w;
                a.edge_size += o.edge_size * w;
                a.texture_tint += o.texture_tint * w;
                a.sphere_tint += o.sphere_tint * w;
                a.toon_tint += o.toon_tint * w;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::MorphKeyframe;
    use crate::model::{
        BoneDef, BoneMorphOffset, GroupMorphOffset, Material, MorphDef, UvMorphOffset,
        VertexMorphOffset,
    };
    use glam::{Quat, Vec3, Vec4};
    use std::f32::consts::FRAC_PI_2;

    fn model() -> PmxModel {
        let mut m = PmxModel::new("m");
        m.bones.push(BoneDef::new("root", Vec3::ZERO, -1));
        m.materials.push(Material::default());
        m.materials.push(Material::default());
        m.morphs.push(MorphDef::new(
            "vertex",
            MorphKind::Vertex(vec![VertexMorphOffset {
                vertex: 3,
                offset: Vec3::new(0.0, 2.0, 0.0),
            }]),
        ));
        m.morphs.push(MorphDef::new(
            "bone",
            MorphKind::Bone(vec![BoneMorphOffset {
                bone: 0,
                translation: Vec3::X,
                rotation: Quat::from_rotation_z(FRAC_PI_2),
            }]),
        ));
        m.morphs.push(MorphDef::new(
            "group",
            MorphKind::Group(vec![GroupMorphOffset { morph: 0, ratio: 0.5 }]),
        ));
        m.morphs.push(MorphDef::new(
            "loop",
            MorphKind::Group(vec![
                GroupMorphOffset { morph: 3, ratio: 1.0 },
                GroupMorphOffset { morph: 0, ratio: 1.0 },
            ]),
        ));
        m.morphs.push(MorphDef::new(
            "uv",
            MorphKind::Uv(vec![UvMorphOffset {
                vertex: 3,
                offset: Vec4::new(0.1, 0.0, 0.0, 0.0),
            }]),
        ));
        m.morphs.push(MorphDef::new(
            "fade",
            MorphKind::Material(vec![MaterialMorphOffset {
                material: -1,
                op: MaterialOp::Multiply,
                diffuse: Vec4::new(1.0, 1.0, 1.0, 0.0),
                specular: Vec3::ONE,
                specular_power: 1.0,
                ambient: Vec3::ONE,
                edge_color: Vec4::ONE,
                edge_size: 1.0,
                texture_tint: Vec4::ONE,
                sphere_tint: Vec4::ONE,
                toon_tint: Vec4::ONE,
            }]),
        ));
        m.finalize();
        m
    }

    #[test]
    fn no_weights_yield_empty_deltas() {
        let model = model();
        let deltas = MorphEvaluator::evaluate(&model, &Motion::new(), 0.0);
        assert!(deltas.is_empty());
        assert_eq!(deltas.materials.len(), 2);
    }

    #[test]
    fn vertex_weights_are_clamped_bone_weights_are_not() {
        let model = model();
        let deltas = MorphEvaluator::evaluate_weights(&model, &[2.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(deltas.vertex(3).unwrap().position, Vec3::new(0.0, 2.0, 0.0));
        let bone = deltas.bone(0);
        assert_eq!(bone.translation, Vec3::new(2.0, 0.0, 0.0));
        let expected = Quat::from_rotation_z(std::f32::consts::PI);
        assert!(bone.rotation.dot(expected).abs() > 0.9999);
    }

    #[test]
    fn group_morph_distributes_weight() {
        let model = model();
        let mut motion = Motion::new();
        motion.insert_morph_keyframe("group", MorphKeyframe::new(0, 1.0));
        let deltas = MorphEvaluator::evaluate(&model, &motion, 0.0);
        assert_eq!(deltas.vertex(3).unwrap().position, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn cyclic_group_is_truncated() {
        let model = model();
        let deltas = MorphEvaluator::evaluate_weights(&model, &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        // 每层都向 morph 0 贡献 1.0，最终限制到 1
        assert_eq!(deltas.vertex(3).unwrap().position, Vec3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn uv_and_material_for_all_targets() {
        let model = model();
        let deltas = MorphEvaluator::evaluate_weights(&model, &[0.0, 0.0, 0.0, 0.0, 0.5, 0.5]);
        assert!((deltas.vertex(3).unwrap().uv.x - 0.05).abs() < 1e-6);
        for (mat, delta) in model.materials.iter().zip(&deltas.materials) {
            let composed = delta.compose(mat);
            assert!((composed.diffuse.w - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn same_input_is_deterministic() {
        let model = model();
        let w = [0.3, 1.5, 0.2, 0.0, 0.7, 0.1];
        assert_eq!(
            MorphEvaluator::evaluate_weights(&model, &w),
            MorphEvaluator::evaluate_weights(&model, &w)
        );
    }
}
