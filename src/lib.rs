//! MMD Deform - MMD 变形与物理模拟核心
//!
//! 给定 PMX 模型与 VMD 动作，逐帧计算：
//! - 关键帧采样（骨骼、Morph、IK、物理世界、风）
//! - Morph 合成
//! - 骨骼求解（付与、固定轴、局部轴、CCD IK）
//! - 刚体物理耦合与四种重置策略
//! - BDEF/SDEF 顶点蒙皮
//! - 共享状态与帧调度

pub mod animation;
pub mod audio;
pub mod config;
pub mod deform;
pub mod error;
pub mod logging;
pub mod math;
pub mod model;
pub mod morph;
pub mod physics;
pub mod scheduler;
pub mod skeleton;
pub mod skinning;
pub mod state;

pub use animation::{Motion, VmdFile};
pub use deform::{DeformCache, ViewerPipeline, VmdDeltas};
pub use error::{ErrorKind, ErrorRecord};
pub use model::{load_pmx, PmxModel};
pub use morph::{MorphDeltas, MorphEvaluator};
pub use physics::{PhysicsBackend, PhysicsBridge, PhysicsResetType, RapierBackend};
pub use scheduler::{FrameScheduler, TickOutcome};
pub use skeleton::{BoneDelta, BoneDeltas, BoneResolver};
pub use state::SharedState;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MmdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("PMX parse error: {0}")]
    PmxParse(String),

    #[error("VMD parse error: {0}")]
    VmdParse(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid value: {0}")]
    Validate(String),

    #[error("Physics error: {0}")]
    Physics(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MmdError>;
