//! 骨骼系统
//!
//! `BoneDeltas` 保存每帧的局部/全局变换，`BoneResolver` 负责按动作、
//! Morph、附加变换与 IK 填充它。

mod delta;
mod ik_solver;
mod resolver;

pub use delta::{BoneDelta, BoneDeltas};
pub use ik_solver::{IkOutcome, IkSolver, IK_EPSILON};
pub use resolver::{BoneResolver, BoneSelection};
