//! 测试用的确定性模拟器

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use glam::{Mat4, Vec3};

use crate::model::{JointDef, PhysicsMode, RigidBodyDef};
use crate::{MmdError, Result};

use super::backend::{BodyId, JointId, PhysicsBackend};
use super::wind::WindSettings;

/// `update_shape_mass` 的调用记录
pub(crate) type ShapeMassLog = Arc<Mutex<Vec<(BodyId, Option<Vec3>, Option<f32>)>>>;

/// 每个子步把动态刚体平移 `drift`
pub(crate) struct MockBackend {
    pub bodies: BTreeMap<BodyId, (PhysicsMode, Mat4)>,
    pub joints: BTreeSet<JointId>,
    pub gravity: Vec3,
    pub wind: WindSettings,
    pub drift: Vec3,
    pub fail_steps: bool,
    pub shape_mass: ShapeMassLog,
}

impl MockBackend {
    pub fn new(drift: Vec3) -> Self {
        Self {
            bodies: BTreeMap::new(),
            joints: BTreeSet::new(),
            gravity: Vec3::ZERO,
            wind: WindSettings::default(),
            drift,
            fail_steps: false,
            shape_mass: ShapeMassLog::default(),
        }
    }
}

impl PhysicsBackend for MockBackend {
    fn reset_world(&mut self, gravity: Vec3) {
        self.bodies.clear();
        self.joints.clear();
        self.gravity = gravity;
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    fn add_body(&mut self, id: BodyId, def: &RigidBodyDef, world: Mat4) -> Result<()> {
        self.bodies.insert(id, (def.mode, world));
        Ok(())
    }

    fn remove_body(&mut self, id: BodyId) -> bool {
        self.bodies.remove(&id).is_some()
    }

    fn add_joint(&mut self, id: JointId, _def: &JointDef, a: BodyId, b: BodyId) -> Result<()> {
        if !self.bodies.contains_key(&a) || !self.bodies.contains_key(&b) {
            return Err(MmdError::NotFound(format!("{:?}", id)));
        }
        self.joints.insert(id);
        Ok(())
    }

    fn remove_joint(&mut self, id: JointId) -> bool {
        self.joints.remove(&id)
    }

    fn update_transform(&mut self, id: BodyId, world: Mat4) {
        if let Some((mode, current)) = self.bodies.get_mut(&id) {
            match mode {
                PhysicsMode::Static => *current = world,
                PhysicsMode::DynamicBoneAligned => current.w_axis = world.w_axis,
                PhysicsMode::Dynamic => {}
            }
        }
    }

    fn update_shape_mass(&mut self, id: BodyId, size: Option<Vec3>, mass: Option<f32>) {
        if let Ok(mut log) = self.shape_mass.lock() {
            log.push((id, size, mass));
        }
    }

    fn read_transform(&self, id: BodyId) -> Option<Mat4> {
        self.bodies.get(&id).map(|(_, m)| *m)
    }

    fn step(&mut self, dt: f32, max_sub_steps: u32, fixed_time_step: f32) -> Result<u32> {
        if self.fail_steps {
            return Err(MmdError::Physics("mock failure".into()));
        }
        if dt <= 0.0 {
            return Ok(0);
        }
        let steps = ((dt / fixed_time_step - 1e-4).ceil() as u32).clamp(1, max_sub_steps.max(1));
        for (mode, m) in self.bodies.values_mut() {
            if *mode != PhysicsMode::Static {
                *m = Mat4::from_translation(self.drift * steps as f32) * *m;
            }
        }
        Ok(steps)
    }

    fn enable_wind(&mut self, enabled: bool) {
        self.wind.enabled = enabled;
    }

    fn set_wind(&mut self, direction: Vec3, speed: f32, randomness: f32) {
        self.wind.set(direction, speed, randomness);
    }

    fn set_wind_advanced(&mut self, drag_coeff: f32, lift_coeff: f32, turbulence_freq_hz: f32) {
        self.wind.set_advanced(drag_coeff, lift_coeff, turbulence_freq_hz);
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }
}
