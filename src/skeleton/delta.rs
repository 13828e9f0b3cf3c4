//! 每帧骨骼增量
//!
//! 局部量在求解时写入；全局矩阵按需填充，只有经过 `apply_global`
//! （或 `global` 访问）之后才可信。

use glam::{Mat4, Quat, Vec3};

use crate::math::{position_of, project_onto_axis, rotation_of};
use crate::model::PmxModel;

/// 单根骨骼的增量
#[derive(Clone, Debug, PartialEq)]
pub struct BoneDelta {
    pub parent: Option<usize>,
    /// 相对父骨骼的初始偏移
    pub offset: Vec3,
    /// 动作 + 骨骼 Morph 平移
    pub frame_translation: Vec3,
    /// 动作 × 骨骼 Morph 旋转
    pub frame_rotation: Quat,
    pub append_translation: Vec3,
    pub append_rotation: Quat,
    pub ik_rotation: Quat,
    /// 固定轴（合成时投影）
    pub fixed_axis: Option<Vec3>,
    /// 合成后的局部平移（不含初始偏移）
    pub translation: Vec3,
    /// 合成后的局部旋转
    pub rotation: Quat,
    /// 由物理结果写入，后续骨骼求解不再覆盖
    pub physics: bool,
    local: Option<Mat4>,
    global: Option<Mat4>,
}

impl BoneDelta {
    pub fn new(parent: Option<usize>, offset: Vec3) -> Self {
        Self {
            parent,
            offset,
            frame_translation: Vec3::ZERO,
            frame_rotation: Quat::IDENTITY,
            append_translation: Vec3::ZERO,
            append_rotation: Quat::IDENTITY,
            ik_rotation: Quat::IDENTITY,
            fixed_axis: None,
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            physics: false,
            local: None,
            global: None,
        }
    }

    /// 重新合成局部平移与旋转：r = ik × frame × append
    pub fn compose(&mut self) {
        self.translation = self.frame_translation + self.append_translation;
        let rotation = (self.ik_rotation * self.frame_rotation * self.append_rotation).normalize();
        self.rotation = match self.fixed_axis {
            Some(axis) => project_onto_axis(rotation, axis),
            None => rotation,
        };
        self.local = None;
    }

    /// 局部矩阵 T(offset + translation) · R(rotation)
    pub fn local_matrix(&mut self) -> Mat4 {
        if let Some(m) = self.local {
            return m;
        }
        let m = Mat4::from_rotation_translation(self.rotation, self.offset + self.translation);
        self.local = Some(m);
        m
    }

    /// 已填充的全局矩阵
    pub fn global(&self) -> Option<Mat4> {
        self.global
    }

    pub fn is_identity(&self) -> bool {
        self.translation == Vec3::ZERO && self.rotation == Quat::IDENTITY
    }
}

/// 按骨骼索引排列的增量集合
#[derive(Clone, Debug, PartialEq)]
pub struct BoneDeltas {
    deltas: Vec<BoneDelta>,
    children: Vec<Vec<usize>>,
    /// 初始位置，用于蒙皮矩阵
    rest_positions: Vec<Vec3>,
}

impl BoneDeltas {
    /// 初始姿态（全部恒等，全局矩阵未填充）
    pub fn rest(model: &PmxModel) -> Self {
        let n = model.bones.len();
        let mut deltas = Vec::with_capacity(n);
        let mut children = vec![Vec::new(); n];
        for (i, bone) in model.bones.iter().enumerate() {
            let parent = bone.parent_index().filter(|&p| p < n);
            if let Some(p) = parent {
                children[p].push(i);
            }
            let mut delta = BoneDelta::new(parent, model.bone_offset(i));
            delta.fixed_axis = bone.fixed_axis;
            deltas.push(delta);
        }
        Self {
            deltas,
            children,
            rest_positions: model.bones.iter().map(|b| b.position).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BoneDelta> {
        self.deltas.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut BoneDelta> {
        self.deltas.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoneDelta> {
        self.deltas.iter()
    }

    /// 按需计算全局矩阵（父骨骼先行）
    pub fn global(&mut self, index: usize) -> Mat4 {
        if index >= self.deltas.len() {
            return Mat4::IDENTITY;
        }
        if let Some(m) = self.deltas[index].global {
            return m;
        }
        // 收集尚未填充的祖先链，自上而下计算
        let mut chain = vec![index];
        let mut current = self.deltas[index].parent;
        while let Some(p) = current {
            if self.deltas[p].global.is_some() || chain.len() > self.deltas.len() {
                break;
            }
            chain.push(p);
            current = self.deltas[p].parent;
        }
        let mut parent_global = match current {
            Some(p) => self.deltas[p].global.unwrap_or(Mat4::IDENTITY),
            None => Mat4::IDENTITY,
        };
        for &i in chain.iter().rev() {
            let m = parent_global * self.deltas[i].local_matrix();
            self.deltas[i].global = Some(m);
            parent_global = m;
        }
        parent_global
    }

    /// 全局位置
    pub fn position(&mut self, index: usize) -> Vec3 {
        position_of(&self.global(index))
    }

    /// 为给定骨骼及其祖先填充全局矩阵
    pub fn apply_global(&mut self, indices: impl IntoIterator<Item = usize>) {
        let mut targets: Vec<usize> = indices.into_iter().filter(|&i| i < self.len()).collect();
        targets.sort_unstable();
        for i in targets {
            self.global(i);
        }
    }

    /// 填充全部骨骼
    pub fn apply_global_all(&mut self) {
        for i in 0..self.len() {
            self.global(i);
        }
    }

    /// 清除 `index` 及其子孙的缓存矩阵；物理写入的骨骼保持不变
    pub fn invalidate(&mut self, index: usize) {
        if index >= self.len() {
            return;
        }
        self.deltas[index].local = None;
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            // 未填充的子树无需继续
            if i != index && (self.deltas[i].physics || self.deltas[i].global.is_none()) {
                continue;
            }
            self.deltas[i].global = None;
            stack.extend(self.children[i].iter().copied());
        }
    }

    /// 重新合成局部量并使子树失效
    pub fn recompose(&mut self, index: usize) {
        if let Some(d) = self.deltas.get_mut(index) {
            d.compose();
            self.invalidate(index);
        }
    }

    /// 以全局矩阵覆盖骨骼（物理结果回写），局部量由父骨骼反推
    pub fn set_global(&mut self, index: usize, global: Mat4) {
        if index >= self.len() {
            return;
        }
        let parent_global = match self.deltas[index].parent {
            Some(p) => self.global(p),
            None => Mat4::IDENTITY,
        };
        let local = parent_global.inverse() * global;
        let rotation = rotation_of(&local);
        let translation = position_of(&local) - self.deltas[index].offset;

        let d = &mut self.deltas[index];
        d.frame_translation = translation;
        d.frame_rotation = rotation;
        d.append_translation = Vec3::ZERO;
        d.append_rotation = Quat::IDENTITY;
        d.ik_rotation = Quat::IDENTITY;
        d.translation = translation;
        d.rotation = rotation;
        d.physics = true;
        d.local = Some(local);

        self.invalidate(index);
        self.deltas[index].global = Some(global);
    }

    /// 蒙皮矩阵 = 全局 · 初始全局的逆
    pub fn skinning_matrix(&mut self, index: usize) -> Mat4 {
        let rest = self.rest_positions.get(index).copied().unwrap_or(Vec3::ZERO);
        self.global(index) * Mat4::from_translation(-rest)
    }

    /// 全部蒙皮矩阵（会填充所有全局矩阵）
    pub fn skinning_matrices(&mut self) -> Vec<Mat4> {
        (0..self.len()).map(|i| self.skinning_matrix(i)).collect()
    }
}
