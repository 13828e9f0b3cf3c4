//! 动画关键帧

use glam::{Quat, Vec3};

use super::BezierCurve;

/// 骨骼关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct BoneKeyframe {
    pub frame: u32,
    pub translation: Vec3,
    pub rotation: Quat,
    pub interp_x: BezierCurve,
    pub interp_y: BezierCurve,
    pub interp_z: BezierCurve,
    pub interp_rotation: BezierCurve,
}

impl BoneKeyframe {
    pub fn new(frame: u32) -> Self {
        Self {
            frame,
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            interp_x: BezierCurve::linear(),
            interp_y: BezierCurve::linear(),
            interp_z: BezierCurve::linear(),
            interp_rotation: BezierCurve::linear(),
        }
    }

    pub fn with_pose(frame: u32, translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
            ..Self::new(frame)
        }
    }

    /// 由 VMD 64 字节插值块设置四条曲线
    pub fn set_vmd_interpolation(&mut self, data: &[u8; 64]) {
        self.interp_x = BezierCurve::from_vmd_data(&[data[0], data[4], data[8], data[12]]);
        self.interp_y = BezierCurve::from_vmd_data(&[data[1], data[5], data[9], data[13]]);
        self.interp_z = BezierCurve::from_vmd_data(&[data[2], data[6], data[10], data[14]]);
        self.interp_rotation = BezierCurve::from_vmd_data(&[data[3], data[7], data[11], data[15]]);
    }
}

/// Morph 关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct MorphKeyframe {
    pub frame: u32,
    pub weight: f32,
}

impl MorphKeyframe {
    pub fn new(frame: u32, weight: f32) -> Self {
        Self { frame, weight }
    }
}

/// IK 启用关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct IkKeyframe {
    pub frame: u32,
    pub enabled: bool,
}

impl IkKeyframe {
    pub fn new(frame: u32, enabled: bool) -> Self {
        Self { frame, enabled }
    }
}

/// 刚体参数关键帧（尺寸 / 质量覆盖）
#[derive(Clone, Debug, PartialEq)]
pub struct RigidBodyKeyframe {
    pub frame: u32,
    pub size: Option<Vec3>,
    pub mass: Option<f32>,
}

impl RigidBodyKeyframe {
    pub fn new(frame: u32) -> Self {
        Self {
            frame,
            size: None,
            mass: None,
        }
    }
}
