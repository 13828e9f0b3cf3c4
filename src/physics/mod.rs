//! MMD 物理系统
//!
//! 刚体模拟器接口（`PhysicsBackend`）、Rapier3D 实现、骨骼与刚体的耦合桥，
//! 以及四种物理重置策略。

mod backend;
mod bridge;
pub mod config;
mod mmd_joint;
mod mmd_physics;
mod mmd_rigid_body;
mod reset;
mod wind;

#[cfg(test)]
pub(crate) mod mock;

pub use backend::{BodyId, JointId, PhysicsBackend};
pub use bridge::{PhysicsBridge, PhysicsDeltas, RigidBodyDelta};
pub use config::{get_config, reset_config, set_config, PhysicsConfig};
pub use mmd_joint::MMDJoint;
pub use mmd_physics::RapierBackend;
pub use mmd_rigid_body::{isometry_to_mat4, mat4_to_isometry, MMDRigidBody};
pub use reset::{build_fit_motion, settle_frame_count, y_stance_rotation, PhysicsResetType};
pub use wind::{cross_section_area, WindBody, WindSettings};
