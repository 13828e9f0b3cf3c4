//! CCD IK 求解器

use glam::{Mat4, Quat, Vec3};

use crate::math::{clamp_euler_xyz, project_onto_axis};
use crate::model::{IkDef, PmxModel};

use super::BoneDeltas;

/// 判定收敛的距离（模型单位）
pub const IK_EPSILON: f32 = 1e-4;

/// 小于该角度的修正忽略
const MIN_CORRECTION_ANGLE: f32 = 1e-3 * std::f32::consts::PI / 180.0;

/// 求解结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IkOutcome {
    pub iterations: u32,
    pub distance: f32,
}

/// IK 求解器
#[derive(Clone, Debug)]
pub struct IkSolver<'a> {
    pub bone_index: usize,
    pub config: &'a IkDef,
}

impl<'a> IkSolver<'a> {
    pub fn new(bone_index: usize, config: &'a IkDef) -> Self {
        Self { bone_index, config }
    }

    /// 求解并把结果写入各链接骨骼的 `ik_rotation`
    ///
    /// 未收敛时跑满迭代次数，最后恢复距离最小的一次结果。
    pub fn solve(&self, model: &PmxModel, deltas: &mut BoneDeltas) -> Option<IkOutcome> {
        let n = deltas.len();
        let target = usize::try_from(self.config.target).ok().filter(|&t| t < n)?;
        if self.bone_index >= n {
            return None;
        }
        let links: Vec<(usize, &crate::model::IkLink)> = self
            .config
            .links
            .iter()
            .filter_map(|l| usize::try_from(l.bone).ok().filter(|&i| i < n).map(|i| (i, l)))
            .collect();
        if links.is_empty() {
            return None;
        }

        for &(i, _) in &links {
            if let Some(d) = deltas.get_mut(i) {
                d.ik_rotation = Quat::IDENTITY;
            }
            deltas.recompose(i);
        }

        let loops = self.config.loop_count.max(1);
        let mut best_distance = self.distance(deltas, target);
        let mut best: Vec<Quat> = links.iter().map(|_| Quat::IDENTITY).collect();
        let mut iterations = 0;

        for _ in 0..loops {
            if best_distance < IK_EPSILON {
                break;
            }
            iterations += 1;
            for &(link, def) in &links {
                if link == target {
                    continue;
                }
                self.rotate_link(model, deltas, link, def, target);
            }

            let distance = self.distance(deltas, target);
            if distance < best_distance {
                best_distance = distance;
                for (slot, &(i, _)) in best.iter_mut().zip(&links) {
                    *slot = deltas.get(i).map_or(Quat::IDENTITY, |d| d.ik_rotation);
                }
            }
        }

        // 恢复最佳结果
        for (rot, &(i, _)) in best.iter().zip(&links) {
            if let Some(d) = deltas.get_mut(i) {
                d.ik_rotation = *rot;
            }
            deltas.recompose(i);
        }

        Some(IkOutcome {
            iterations,
            distance: best_distance,
        })
    }

    fn distance(&self, deltas: &mut BoneDeltas, target: usize) -> f32 {
        let goal = deltas.position(self.bone_index);
        (deltas.position(target) - goal).length()
    }

    fn rotate_link(
        &self,
        model: &PmxModel,
        deltas: &mut BoneDeltas,
        link: usize,
        def: &crate::model::IkLink,
        target: usize,
    ) {
        let goal = deltas.position(self.bone_index);
        let effector = deltas.position(target);
        let inv: Mat4 = deltas.global(link).inverse();

        let to_effector = inv.transform_point3(effector).normalize_or_zero();
        let to_goal = inv.transform_point3(goal).normalize_or_zero();
        if to_effector == Vec3::ZERO || to_goal == Vec3::ZERO {
            log::trace!("IK 链接 {} 与效应器或目标重合，本次跳过", link);
            return;
        }

        let angle = to_effector.dot(to_goal).clamp(-1.0, 1.0).acos();
        if angle < MIN_CORRECTION_ANGLE {
            return;
        }
        let angle = if self.config.limit_angle > 0.0 {
            angle.min(self.config.limit_angle)
        } else {
            angle
        };
        let axis = to_effector.cross(to_goal).normalize_or_zero();
        if axis == Vec3::ZERO {
            return;
        }

        let Some(delta) = deltas.get(link) else {
            return;
        };
        // 局部旋转 = ik · frame · append，修正量乘在最右侧
        let base = delta.frame_rotation * delta.append_rotation;
        let mut chain = delta.ik_rotation * base * Quat::from_axis_angle(axis, angle);

        if let Some(fixed) = model.bones[link].fixed_axis {
            chain = project_onto_axis(chain, fixed);
        }
        if let Some((min, max)) = def.limits {
            chain = clamp_euler_xyz(chain, min, max);
        }

        if let Some(d) = deltas.get_mut(link) {
            d.ik_rotation = (chain * base.inverse()).normalize();
        }
        deltas.recompose(link);
    }
}
