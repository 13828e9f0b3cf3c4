//! 动画系统
//!
//! 提供 VMD 动画解析、关键帧存储与插值、物理世界参数轨道。

mod bezier;
mod keyframe;
mod motion;
mod motion_track;
mod vmd_loader;
mod world;

pub use bezier::BezierCurve;
pub use keyframe::{BoneKeyframe, IkKeyframe, MorphKeyframe, RigidBodyKeyframe};
pub use motion::Motion;
pub use motion_track::{
    BoneFrameTransform, BoneMotionTrack, IkMotionTrack, MorphMotionTrack, MotionTrack,
    RigidBodyMotionTrack, StepTrack,
};
pub use vmd_loader::VmdFile;
pub use world::{
    PhysicsWorldMotion, WindFrame, WindMotion, WorldFrame, DEFAULT_FIXED_TIME_STEP,
    DEFAULT_GRAVITY, DEFAULT_MAX_SUB_STEPS,
};
