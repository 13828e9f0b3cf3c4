//! Morph 定义
//!
//! 各类 Morph 是一个封闭集合，用带数据的枚举表示。

use glam::{Quat, Vec3, Vec4};

/// 顶点 Morph 偏移
#[derive(Clone, Debug, PartialEq)]
pub struct VertexMorphOffset {
    pub vertex: u32,
    pub offset: Vec3,
}

/// UV Morph 偏移（UV 与追加 UV 共用）
#[derive(Clone, Debug, PartialEq)]
pub struct UvMorphOffset {
    pub vertex: u32,
    pub offset: Vec4,
}

/// 骨骼 Morph 偏移
#[derive(Clone, Debug, PartialEq)]
pub struct BoneMorphOffset {
    pub bone: i32,
    pub translation: Vec3,
    pub rotation: Quat,
}

/// 材质 Morph 运算方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialOp {
    Multiply,
    Add,
}

/// 材质 Morph 偏移，`material == -1` 表示全部材质
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialMorphOffset {
    pub material: i32,
    pub op: MaterialOp,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_power: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture_tint: Vec4,
    pub sphere_tint: Vec4,
    pub toon_tint: Vec4,
}

/// 组 Morph 引用
#[derive(Clone, Debug, PartialEq)]
pub struct GroupMorphOffset {
    pub morph: i32,
    pub ratio: f32,
}

/// 冲量 Morph 偏移
#[derive(Clone, Debug, PartialEq)]
pub struct ImpulseMorphOffset {
    pub rigid_body: i32,
    pub local: bool,
    pub velocity: Vec3,
    pub torque: Vec3,
}

/// Morph 种类
#[derive(Clone, Debug, PartialEq)]
pub enum MorphKind {
    Group(Vec<GroupMorphOffset>),
    Vertex(Vec<VertexMorphOffset>),
    Bone(Vec<BoneMorphOffset>),
    Uv(Vec<UvMorphOffset>),
    /// 追加 UV 通道 1..=4
    ExtendedUv(u8, Vec<UvMorphOffset>),
    Material(Vec<MaterialMorphOffset>),
    Flip(Vec<GroupMorphOffset>),
    Impulse(Vec<ImpulseMorphOffset>),
}

impl MorphKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            MorphKind::Group(_) => "group",
            MorphKind::Vertex(_) => "vertex",
            MorphKind::Bone(_) => "bone",
            MorphKind::Uv(_) => "uv",
            MorphKind::ExtendedUv(..) => "extended uv",
            MorphKind::Material(_) => "material",
            MorphKind::Flip(_) => "flip",
            MorphKind::Impulse(_) => "impulse",
        }
    }
}

/// Morph 定义
#[derive(Clone, Debug, PartialEq)]
pub struct MorphDef {
    pub name: String,
    pub name_en: String,
    /// 操作面板分类
    pub panel: u8,
    pub kind: MorphKind,
}

impl MorphDef {
    pub fn new(name: impl Into<String>, kind: MorphKind) -> Self {
        Self {
            name: name.into(),
            name_en: String::new(),
            panel: 0,
            kind,
        }
    }
}
