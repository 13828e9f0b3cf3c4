//! 物理世界与风的参数动作
//!
//! 每个 viewer 各持有一份，独立于模型动作。所有通道都是阶梯采样，
//! 同帧优先，其次下一关键帧，再次上一关键帧。

use glam::Vec3;

use super::motion::next_motion_hash;
use super::motion_track::StepTrack;
use crate::physics::PhysicsResetType;

pub const DEFAULT_GRAVITY: Vec3 = Vec3::new(0.0, -9.8, 0.0);
pub const DEFAULT_MAX_SUB_STEPS: u32 = 2;
pub const DEFAULT_FIXED_TIME_STEP: f32 = 1.0 / 60.0;

/// 某一帧的物理世界参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldFrame {
    pub gravity: Vec3,
    pub max_sub_steps: u32,
    pub fixed_time_step: f32,
    pub reset_type: PhysicsResetType,
}

impl Default for WorldFrame {
    fn default() -> Self {
        Self {
            gravity: DEFAULT_GRAVITY,
            max_sub_steps: DEFAULT_MAX_SUB_STEPS,
            fixed_time_step: DEFAULT_FIXED_TIME_STEP,
            reset_type: PhysicsResetType::None,
        }
    }
}

/// 物理世界动作
#[derive(Debug, Clone)]
pub struct PhysicsWorldMotion {
    gravity: StepTrack<Vec3>,
    max_sub_steps: StepTrack<u32>,
    fixed_time_step: StepTrack<f32>,
    reset: StepTrack<PhysicsResetType>,
    hash: u64,
}

impl Default for PhysicsWorldMotion {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsWorldMotion {
    pub fn new() -> Self {
        Self {
            gravity: StepTrack::new(),
            max_sub_steps: StepTrack::new(),
            fixed_time_step: StepTrack::new(),
            reset: StepTrack::new(),
            hash: next_motion_hash(),
        }
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn insert_gravity(&mut self, frame: u32, gravity: Vec3) {
        self.gravity.insert(frame, gravity);
        self.hash = next_motion_hash();
    }

    pub fn insert_max_sub_steps(&mut self, frame: u32, steps: u32) {
        self.max_sub_steps.insert(frame, steps);
        self.hash = next_motion_hash();
    }

    /// 以每秒步数登记，非正数按 60 处理
    pub fn insert_fixed_time_step_num(&mut self, frame: u32, steps_per_second: f32) {
        let step = if steps_per_second > 0.0 {
            1.0 / steps_per_second
        } else {
            DEFAULT_FIXED_TIME_STEP
        };
        self.fixed_time_step.insert(frame, step);
        self.hash = next_motion_hash();
    }

    pub fn insert_reset(&mut self, frame: u32, reset_type: PhysicsResetType) {
        self.reset.insert(frame, reset_type);
        self.hash = next_motion_hash();
    }

    pub fn gravity_at(&self, frame: f32) -> Vec3 {
        self.gravity.sample_or(frame, DEFAULT_GRAVITY)
    }

    pub fn max_sub_steps_at(&self, frame: f32) -> u32 {
        self.max_sub_steps.sample_or(frame, DEFAULT_MAX_SUB_STEPS)
    }

    pub fn fixed_time_step_at(&self, frame: f32) -> f32 {
        self.fixed_time_step.sample_or(frame, DEFAULT_FIXED_TIME_STEP)
    }

    pub fn reset_type_at(&self, frame: f32) -> PhysicsResetType {
        self.reset.sample_or(frame, PhysicsResetType::None)
    }

    pub fn frame_at(&self, frame: f32) -> WorldFrame {
        WorldFrame {
            gravity: self.gravity_at(frame),
            max_sub_steps: self.max_sub_steps_at(frame),
            fixed_time_step: self.fixed_time_step_at(frame),
            reset_type: self.reset_type_at(frame),
        }
    }

    pub fn max_frame(&self) -> u32 {
        self.gravity
            .max_frame()
            .max(self.max_sub_steps.max_frame())
            .max(self.fixed_time_step.max_frame())
            .max(self.reset.max_frame())
    }
}

/// 某一帧的风参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindFrame {
    pub enabled: bool,
    pub direction: Vec3,
    pub speed: f32,
    pub randomness: f32,
    pub drag_coeff: f32,
    pub lift_coeff: f32,
    pub turbulence_freq_hz: f32,
}

impl Default for WindFrame {
    fn default() -> Self {
        Self {
            enabled: false,
            direction: Vec3::X,
            speed: 60.0,
            randomness: 0.0,
            drag_coeff: 60.0,
            lift_coeff: 60.0,
            turbulence_freq_hz: 0.0,
        }
    }
}

/// 风动作
#[derive(Debug, Clone)]
pub struct WindMotion {
    enabled: StepTrack<bool>,
    direction: StepTrack<Vec3>,
    speed: StepTrack<f32>,
    randomness: StepTrack<f32>,
    drag_coeff: StepTrack<f32>,
    lift_coeff: StepTrack<f32>,
    turbulence_freq_hz: StepTrack<f32>,
    hash: u64,
}

impl Default for WindMotion {
    fn default() -> Self {
        Self::new()
    }
}

impl WindMotion {
    pub fn new() -> Self {
        Self {
            enabled: StepTrack::new(),
            direction: StepTrack::new(),
            speed: StepTrack::new(),
            randomness: StepTrack::new(),
            drag_coeff: StepTrack::new(),
            lift_coeff: StepTrack::new(),
            turbulence_freq_hz: StepTrack::new(),
            hash: next_motion_hash(),
        }
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// 同帧所有通道一次登记
    pub fn insert(&mut self, frame: u32, wind: WindFrame) {
        self.enabled.insert(frame, wind.enabled);
        self.direction.insert(frame, wind.direction);
        self.speed.insert(frame, wind.speed);
        self.randomness.insert(frame, wind.randomness);
        self.drag_coeff.insert(frame, wind.drag_coeff);
        self.lift_coeff.insert(frame, wind.lift_coeff);
        self.turbulence_freq_hz.insert(frame, wind.turbulence_freq_hz);
        self.hash = next_motion_hash();
    }

    pub fn insert_enabled(&mut self, frame: u32, enabled: bool) {
        self.enabled.insert(frame, enabled);
        self.hash = next_motion_hash();
    }

    pub fn insert_direction(&mut self, frame: u32, direction: Vec3) {
        self.direction.insert(frame, direction);
        self.hash = next_motion_hash();
    }

    pub fn insert_speed(&mut self, frame: u32, speed: f32) {
        self.speed.insert(frame, speed);
        self.hash = next_motion_hash();
    }

    pub fn frame_at(&self, frame: f32) -> WindFrame {
        let d = WindFrame::default();
        WindFrame {
            enabled: self.enabled.sample_or(frame, d.enabled),
            direction: self.direction.sample_or(frame, d.direction),
            speed: self.speed.sample_or(frame, d.speed),
            randomness: self.randomness.sample_or(frame, d.randomness),
            drag_coeff: self.drag_coeff.sample_or(frame, d.drag_coeff),
            lift_coeff: self.lift_coeff.sample_or(frame, d.lift_coeff),
            turbulence_freq_hz: self.turbulence_freq_hz.sample_or(frame, d.turbulence_freq_hz),
        }
    }

    pub fn max_frame(&self) -> u32 {
        [
            self.enabled.max_frame(),
            self.direction.max_frame(),
            self.speed.max_frame(),
            self.randomness.max_frame(),
            self.drag_coeff.max_frame(),
            self.lift_coeff.max_frame(),
            self.turbulence_freq_hz.max_frame(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}
