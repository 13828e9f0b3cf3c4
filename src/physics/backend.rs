//! 刚体模拟器接口

use glam::{Mat4, Vec3};

use crate::model::{JointDef, RigidBodyDef};
use crate::Result;

/// 刚体标识：模型槽位 + PMX 刚体索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyId {
    pub model: usize,
    pub index: usize,
}

impl BodyId {
    pub fn new(model: usize, index: usize) -> Self {
        Self { model, index }
    }
}

/// 关节标识：模型槽位 + PMX 关节索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JointId {
    pub model: usize,
    pub index: usize,
}

impl JointId {
    pub fn new(model: usize, index: usize) -> Self {
        Self { model, index }
    }
}

/// 刚体模拟器
///
/// 所有变换均为 MMD 模型空间（左手系）下的刚体世界变换。
pub trait PhysicsBackend: Send {
    /// 清空世界并设置重力
    fn reset_world(&mut self, gravity: Vec3);

    fn set_gravity(&mut self, gravity: Vec3);

    /// 以世界变换 `world` 创建刚体，同一 id 重复添加时先移除旧刚体
    fn add_body(&mut self, id: BodyId, def: &RigidBodyDef, world: Mat4) -> Result<()>;

    fn remove_body(&mut self, id: BodyId) -> bool;

    /// 连接两个刚体，关节局部坐标由两刚体创建时的变换求出
    fn add_joint(&mut self, id: JointId, def: &JointDef, a: BodyId, b: BodyId) -> Result<()>;

    fn remove_joint(&mut self, id: JointId) -> bool;

    /// 以骨骼驱动刚体：静态刚体整体跟随，骨骼对齐刚体只跟随位置，动态刚体忽略
    fn update_transform(&mut self, id: BodyId, world: Mat4);

    /// 尺寸 / 质量覆盖，`None` 表示保持
    fn update_shape_mass(&mut self, id: BodyId, size: Option<Vec3>, mass: Option<f32>);

    fn read_transform(&self, id: BodyId) -> Option<Mat4>;

    /// 推进 `dt` 秒，返回实际执行的子步数
    fn step(&mut self, dt: f32, max_sub_steps: u32, fixed_time_step: f32) -> Result<u32>;

    fn enable_wind(&mut self, enabled: bool);

    fn set_wind(&mut self, direction: Vec3, speed: f32, randomness: f32);

    fn set_wind_advanced(&mut self, drag_coeff: f32, lift_coeff: f32, turbulence_freq_hz: f32);

    fn body_count(&self) -> usize;
}
