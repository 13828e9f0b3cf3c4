//! 刚体与关节定义

use glam::{Mat4, Quat, Vec3};

/// 刚体形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidBodyShape {
    Sphere,
    Box,
    Capsule,
}

impl RigidBodyShape {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(RigidBodyShape::Sphere),
            1 => Some(RigidBodyShape::Box),
            2 => Some(RigidBodyShape::Capsule),
            _ => None,
        }
    }
}

/// 刚体物理模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsMode {
    /// 跟随骨骼（运动学）
    Static,
    /// 完全由物理驱动
    Dynamic,
    /// 由物理驱动旋转，位置跟随骨骼
    DynamicBoneAligned,
}

impl PhysicsMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(PhysicsMode::Static),
            1 => Some(PhysicsMode::Dynamic),
            2 => Some(PhysicsMode::DynamicBoneAligned),
            _ => None,
        }
    }

    pub fn is_dynamic(self) -> bool {
        self != PhysicsMode::Static
    }
}

/// 刚体定义
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBodyDef {
    pub name: String,
    pub name_en: String,
    /// 关联骨骼，-1 表示无
    pub bone: i32,
    pub group: u8,
    /// 碰撞掩码（PMX 原值，置位的组参与碰撞）
    pub mask: u16,
    pub shape: RigidBodyShape,
    pub size: Vec3,
    pub position: Vec3,
    /// 欧拉角（弧度）
    pub rotation: Vec3,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
    pub mode: PhysicsMode,
}

impl RigidBodyDef {
    pub fn new(name: impl Into<String>, bone: i32, shape: RigidBodyShape, mode: PhysicsMode) -> Self {
        Self {
            name: name.into(),
            name_en: String::new(),
            bone,
            group: 0,
            mask: 0xFFFF,
            shape,
            size: Vec3::splat(0.5),
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            mass: 1.0,
            linear_damping: 0.5,
            angular_damping: 0.5,
            restitution: 0.0,
            friction: 0.5,
            mode,
        }
    }

    pub fn bone_index(&self) -> Option<usize> {
        usize::try_from(self.bone).ok()
    }

    /// 欧拉角按 Y-X-Z 顺序合成
    pub fn orientation(&self) -> Quat {
        let rx = Quat::from_rotation_x(self.rotation.x);
        let ry = Quat::from_rotation_y(self.rotation.y);
        let rz = Quat::from_rotation_z(self.rotation.z);
        ry * rx * rz
    }

    /// 模型空间初始变换
    pub fn rest_transform(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation(), self.position)
    }
}

/// 6 自由度弹簧关节定义
#[derive(Debug, Clone, PartialEq)]
pub struct JointDef {
    pub name: String,
    pub name_en: String,
    pub rigid_body_a: i32,
    pub rigid_body_b: i32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub translation_min: Vec3,
    pub translation_max: Vec3,
    pub rotation_min: Vec3,
    pub rotation_max: Vec3,
    pub spring_translation: Vec3,
    pub spring_rotation: Vec3,
}

impl JointDef {
    pub fn new(name: impl Into<String>, a: i32, b: i32) -> Self {
        Self {
            name: name.into(),
            name_en: String::new(),
            rigid_body_a: a,
            rigid_body_b: b,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            translation_min: Vec3::ZERO,
            translation_max: Vec3::ZERO,
            rotation_min: Vec3::ZERO,
            rotation_max: Vec3::ZERO,
            spring_translation: Vec3::ZERO,
            spring_rotation: Vec3::ZERO,
        }
    }

    /// 欧拉角按 Z-Y-X 顺序合成
    pub fn orientation(&self) -> Quat {
        let rx = Quat::from_rotation_x(self.rotation.x);
        let ry = Quat::from_rotation_y(self.rotation.y);
        let rz = Quat::from_rotation_z(self.rotation.z);
        rz * ry * rx
    }

    pub fn transform(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation(), self.position)
    }
}
