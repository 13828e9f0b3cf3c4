//! 风力模型
//!
//! 每个动态刚体按相对风速受阻力与升力，风速带正弦阵风。

use std::f32::consts::PI;

use glam::{Quat, Vec3};

use crate::model::RigidBodyShape;

/// 风参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindSettings {
    pub enabled: bool,
    /// 风向（未归一化）
    pub direction: Vec3,
    pub speed: f32,
    /// 阵风强度，限制在 [0, 1]
    pub randomness: f32,
    pub drag_coeff: f32,
    pub lift_coeff: f32,
    pub turbulence_freq_hz: f32,
    /// 最大加速度，0 表示不限制
    pub max_acceleration: f32,
}

impl Default for WindSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            direction: Vec3::X,
            speed: 0.0,
            randomness: 0.0,
            drag_coeff: 0.0,
            lift_coeff: 0.0,
            turbulence_freq_hz: 0.0,
            max_acceleration: 0.0,
        }
    }
}

impl WindSettings {
    /// 基础风参数；负的随机度按 0 处理
    pub fn set(&mut self, direction: Vec3, speed: f32, randomness: f32) {
        self.direction = direction;
        self.speed = speed;
        self.randomness = randomness.max(0.0);
    }

    /// 高级参数；负值忽略
    pub fn set_advanced(&mut self, drag_coeff: f32, lift_coeff: f32, turbulence_freq_hz: f32) {
        if drag_coeff >= 0.0 {
            self.drag_coeff = drag_coeff;
        }
        if lift_coeff >= 0.0 {
            self.lift_coeff = lift_coeff;
        }
        if turbulence_freq_hz >= 0.0 {
            self.turbulence_freq_hz = turbulence_freq_hz;
        }
    }

    /// 阵风倍率 `1 + r·(0.6 sin(2πft + φ) + 0.4 sin(2π·1.73ft + 0.9 + φ))`
    pub fn gust(&self, time: f32, phase: f32) -> f32 {
        let r = self.randomness.clamp(0.0, 1.0);
        if r == 0.0 {
            return 1.0;
        }
        let f = self.turbulence_freq_hz.max(1e-4);
        let a = (2.0 * PI * f * time + phase).sin();
        let b = (2.0 * PI * 1.73 * f * time + 0.9 + phase).sin();
        1.0 + r * (0.6 * a + 0.4 * b)
    }

    /// 风速向量
    pub fn velocity(&self, time: f32, phase: f32) -> Vec3 {
        self.direction.normalize_or_zero() * self.speed * self.gust(time, phase)
    }

    /// 作用在刚体上的风力
    ///
    /// `orientation` 用于把相对风向换到刚体局部坐标求迎风面积。
    pub fn force(
        &self,
        body: &WindBody,
        linear_velocity: Vec3,
        orientation: Quat,
        time: f32,
    ) -> Option<Vec3> {
        if !self.enabled || body.mass <= 0.0 {
            return None;
        }
        let rel = linear_velocity - self.velocity(time, body.phase);
        let speed_sq = rel.length_squared();
        if speed_sq < 1e-12 {
            return None;
        }
        let n = rel / speed_sq.sqrt();
        let local_dir = orientation.inverse() * n;
        let area = cross_section_area(body.shape, body.size, local_dir);

        let mut force = -self.drag_coeff * area * speed_sq * n;
        if self.lift_coeff > 0.0 {
            let lift_dir = (Vec3::Y - Vec3::Y.dot(n) * n).normalize_or_zero();
            force += self.lift_coeff * area * speed_sq * lift_dir;
        }

        if self.max_acceleration > 0.0 {
            let max_force = self.max_acceleration * body.mass;
            let len = force.length();
            if len > max_force {
                force *= max_force / len;
            }
        }
        force.is_finite().then_some(force)
    }
}

/// 风力计算所需的刚体参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindBody {
    pub shape: RigidBodyShape,
    pub size: Vec3,
    pub mass: f32,
    /// 阵风相位偏移
    pub phase: f32,
}

/// 沿局部方向 `dir`（单位向量）的迎风面积
pub fn cross_section_area(shape: RigidBodyShape, size: Vec3, dir: Vec3) -> f32 {
    match shape {
        RigidBodyShape::Sphere => PI * size.x * size.x,
        RigidBodyShape::Box => {
            let w = size * 2.0;
            dir.x.abs() * (w.y * w.z) + dir.y.abs() * (w.x * w.z) + dir.z.abs() * (w.x * w.y)
        }
        RigidBodyShape::Capsule => {
            let r = size.x;
            let h = size.y;
            let w = dir.y.abs().min(1.0);
            w * PI * r * r + (1.0 - w) * (2.0 * r * h + PI * r * r)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wind(speed: f32) -> WindSettings {
        WindSettings {
            enabled: true,
            direction: Vec3::new(2.0, 0.0, 0.0),
            speed,
            drag_coeff: 1.0,
            ..Default::default()
        }
    }

    fn sphere() -> WindBody {
        WindBody {
            shape: RigidBodyShape::Sphere,
            size: Vec3::splat(1.0),
            mass: 1.0,
            phase: 0.0,
        }
    }

    #[test]
    fn areas_per_shape() {
        assert!((cross_section_area(RigidBodyShape::Sphere, Vec3::splat(2.0), Vec3::X) - 4.0 * PI).abs() < 1e-5);
        let b = cross_section_area(RigidBodyShape::Box, Vec3::new(1.0, 2.0, 3.0), Vec3::X);
        assert!((b - 4.0 * 6.0).abs() < 1e-5);
        let end_on = cross_section_area(RigidBodyShape::Capsule, Vec3::new(1.0, 4.0, 0.0), Vec3::Y);
        assert!((end_on - PI).abs() < 1e-5);
        let side_on = cross_section_area(RigidBodyShape::Capsule, Vec3::new(1.0, 4.0, 0.0), Vec3::X);
        assert!((side_on - (8.0 + PI)).abs() < 1e-5);
    }

    #[test]
    fn drag_pushes_resting_body_downwind() {
        let f = wind(2.0)
            .force(&sphere(), Vec3::ZERO, Quat::IDENTITY, 0.0)
            .unwrap();
        // rel = (-2,0,0)，|rel|² = 4，面积 π
        assert!(f.abs_diff_eq(Vec3::new(4.0 * PI, 0.0, 0.0), 1e-4));
    }

    #[test]
    fn body_moving_with_wind_feels_nothing() {
        let w = wind(2.0);
        assert!(w.force(&sphere(), Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY, 0.0).is_none());
        let mut off = w;
        off.enabled = false;
        assert!(off.force(&sphere(), Vec3::ZERO, Quat::IDENTITY, 0.0).is_none());
    }

    #[test]
    fn lift_is_perpendicular_to_flow() {
        let mut w = wind(1.0);
        w.drag_coeff = 0.0;
        w.lift_coeff = 1.0;
        let f = w.force(&sphere(), Vec3::ZERO, Quat::IDENTITY, 0.0).unwrap();
        assert!(f.x.abs() < 1e-6);
        assert!(f.y > 0.0);
    }

    #[test]
    fn acceleration_is_clamped() {
        let mut w = wind(100.0);
        w.max_acceleration = 5.0;
        let f = w.force(&sphere(), Vec3::ZERO, Quat::IDENTITY, 0.0).unwrap();
        assert!((f.length() - 5.0).abs() < 1e-3);
    }

    #[test]
    fn gust_stays_within_randomness_band() {
        let mut w = wind(1.0);
        assert_eq!(w.gust(0.3, 0.0), 1.0);
        w.set(Vec3::X, 1.0, 3.0);
        w.set_advanced(-1.0, -1.0, 2.0);
        assert_eq!(w.drag_coeff, 1.0);
        assert_eq!(w.turbulence_freq_hz, 2.0);
        for i in 0..100 {
            let g = w.gust(i as f32 * 0.037, 0.5);
            assert!((0.0..=2.0).contains(&g));
        }
        w.set(Vec3::X, 1.0, -0.5);
        assert_eq!(w.randomness, 0.0);
    }
}
