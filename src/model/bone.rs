//! 骨骼定义（加载后不可变）

use bitflags::bitflags;
use glam::Vec3;

bitflags! {
    /// PMX 骨骼标志位
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BoneFlags: u16 {
        const TAIL_IS_BONE = 0x0001;
        const ROTATABLE = 0x0002;
        const TRANSLATABLE = 0x0004;
        const VISIBLE = 0x0008;
        const OPERABLE = 0x0010;
        const IK = 0x0020;
        const LOCAL_APPEND = 0x0080;
        const APPEND_ROTATE = 0x0100;
        const APPEND_TRANSLATE = 0x0200;
        const FIXED_AXIS = 0x0400;
        const LOCAL_AXIS = 0x0800;
        const AFTER_PHYSICS = 0x1000;
        const EXTERNAL_PARENT = 0x2000;
    }
}

/// 骨骼尾端：指向另一根骨骼或相对偏移
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoneTail {
    Bone(i32),
    Offset(Vec3),
}

impl Default for BoneTail {
    fn default() -> Self {
        BoneTail::Bone(-1)
    }
}

/// IK 链接信息
#[derive(Clone, Debug, PartialEq)]
pub struct IkLink {
    pub bone: i32,
    /// 每轴角度限制 (min, max)，弧度，按存储顺序解释
    pub limits: Option<(Vec3, Vec3)>,
}

impl IkLink {
    pub fn new(bone: i32) -> Self {
        Self { bone, limits: None }
    }

    pub fn with_limits(bone: i32, min: Vec3, max: Vec3) -> Self {
        Self {
            bone,
            limits: Some((min, max)),
        }
    }
}

/// IK 配置
#[derive(Clone, Debug, PartialEq)]
pub struct IkDef {
    /// 被拉向 IK 骨骼位置的末端骨骼
    pub target: i32,
    pub loop_count: u32,
    /// 单次迭代的角度上限（弧度）
    pub limit_angle: f32,
    /// 从末端向根部排列
    pub links: Vec<IkLink>,
}

/// 附加变换（付与）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Append {
    pub parent: i32,
    pub ratio: f32,
}

/// 骨骼定义
#[derive(Clone, Debug, PartialEq)]
pub struct BoneDef {
    pub name: String,
    pub name_en: String,
    /// 模型空间初始位置
    pub position: Vec3,
    pub parent: i32,
    /// 变形阶层
    pub layer: i32,
    pub flags: BoneFlags,
    pub tail: BoneTail,
    pub append: Option<Append>,
    pub fixed_axis: Option<Vec3>,
    /// 局部轴 (X, Z)
    pub local_axis: Option<(Vec3, Vec3)>,
    pub external_parent_key: Option<i32>,
    pub ik: Option<IkDef>,
}

impl BoneDef {
    pub fn new(name: impl Into<String>, position: Vec3, parent: i32) -> Self {
        Self {
            name: name.into(),
            name_en: String::new(),
            position,
            parent,
            layer: 0,
            flags: BoneFlags::ROTATABLE | BoneFlags::TRANSLATABLE | BoneFlags::VISIBLE | BoneFlags::OPERABLE,
            tail: BoneTail::default(),
            append: None,
            fixed_axis: None,
            local_axis: None,
            external_parent_key: None,
            ik: None,
        }
    }

    pub fn parent_index(&self) -> Option<usize> {
        usize::try_from(self.parent).ok()
    }

    pub fn is_translatable(&self) -> bool {
        self.flags.contains(BoneFlags::TRANSLATABLE)
    }

    pub fn is_rotatable(&self) -> bool {
        self.flags.contains(BoneFlags::ROTATABLE)
    }

    pub fn is_after_physics(&self) -> bool {
        self.flags.contains(BoneFlags::AFTER_PHYSICS)
    }

    pub fn is_ik(&self) -> bool {
        self.flags.contains(BoneFlags::IK) && self.ik.is_some()
    }

    pub fn is_append_rotate(&self) -> bool {
        self.flags.contains(BoneFlags::APPEND_ROTATE)
    }

    pub fn is_append_translate(&self) -> bool {
        self.flags.contains(BoneFlags::APPEND_TRANSLATE)
    }

    pub fn is_local_append(&self) -> bool {
        self.flags.contains(BoneFlags::LOCAL_APPEND)
    }

    /// 有附加变换且指向合法索引
    pub fn append_source(&self) -> Option<(usize, f32)> {
        if !(self.is_append_rotate() || self.is_append_translate()) {
            return None;
        }
        let append = self.append?;
        usize::try_from(append.parent).ok().map(|i| (i, append.ratio))
    }
}
