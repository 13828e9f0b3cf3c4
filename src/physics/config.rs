//! MMD 物理配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 物理配置（扁平化，不嵌套）
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsConfig {
    // ========== 重力 ==========
    /// 重力 Y 分量（负数向下），物理世界动作未指定时使用
    pub gravity_y: f32,

    // ========== 模拟参数 ==========
    /// 物理 FPS，决定默认固定步长
    pub physics_fps: f32,
    /// 每帧最大子步数
    pub max_substep_count: u32,
    /// 求解器迭代次数
    pub solver_iterations: usize,

    // ========== 刚体 ==========
    /// 线性阻尼缩放（乘以 PMX 原值）
    pub linear_damping_scale: f32,
    /// 角速度阻尼缩放（乘以 PMX 原值）
    pub angular_damping_scale: f32,
    /// 质量缩放（乘以 PMX 原值）
    pub mass_scale: f32,

    // ========== 关节弹簧 ==========
    pub linear_spring_stiffness_scale: f32,
    pub angular_spring_stiffness_scale: f32,
    /// 公式：damping = sqrt(stiffness * 此值)
    pub linear_spring_damping_factor: f32,
    pub angular_spring_damping_factor: f32,

    // ========== 速度限制 ==========
    /// 最大线速度
    pub max_linear_velocity: f32,
    /// 最大角速度 (rad/s)
    pub max_angular_velocity: f32,

    // ========== 风 ==========
    /// 风力产生的最大加速度，0 表示不限制
    pub wind_max_acceleration: f32,
    /// 湍流相位的随机种子
    pub wind_seed: u64,

    // ========== START_FIT_FRAME ==========
    /// 每帧允许的平移量
    pub fit_translate_per_frame: f32,
    /// 每帧允许的旋转角度（度）
    pub fit_rotate_deg_per_frame: f32,
    /// 最少过渡帧数
    pub fit_min_settle_frames: u32,
    /// 初始姿态保持帧数
    pub fit_initial_frames: u32,
    /// 过渡结束后追加的帧数
    pub fit_tail_frames: u32,

    // ========== 调试 ==========
    /// 是否启用关节
    pub joints_enabled: bool,
    /// 是否启用地面
    pub ground_enabled: bool,
    /// 是否输出调试日志
    pub debug_log: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            // MMD 单位下的标准重力
            gravity_y: -9.8,

            physics_fps: 60.0,
            max_substep_count: 5,
            solver_iterations: 4,

            linear_damping_scale: 1.0,
            angular_damping_scale: 1.0,
            mass_scale: 1.0,

            linear_spring_stiffness_scale: 1.0,
            angular_spring_stiffness_scale: 1.0,
            linear_spring_damping_factor: 0.1,
            angular_spring_damping_factor: 0.1,

            // 超过此速度会被强制限制，防止物理爆炸
            max_linear_velocity: 200.0,
            max_angular_velocity: 30.0,

            wind_max_acceleration: 0.0,
            wind_seed: 0x4d4d_445f_5749_4e44,

            fit_translate_per_frame: 0.5,
            fit_rotate_deg_per_frame: 1.0,
            fit_min_settle_frames: 60,
            fit_initial_frames: 60,
            fit_tail_frames: 3,

            joints_enabled: true,
            ground_enabled: true,
            debug_log: false,
        }
    }
}

impl PhysicsConfig {
    /// 默认固定步长（秒）
    pub fn fixed_time_step(&self) -> f32 {
        if self.physics_fps > 0.0 {
            1.0 / self.physics_fps
        } else {
            1.0 / 60.0
        }
    }
}

/// 全局配置实例
static PHYSICS_CONFIG: Lazy<RwLock<PhysicsConfig>> = Lazy::new(|| {
    RwLock::new(PhysicsConfig::default())
});

/// 获取当前配置（只读）
pub fn get_config() -> PhysicsConfig {
    PHYSICS_CONFIG
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: PhysicsConfig) {
    *PHYSICS_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *PHYSICS_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = PhysicsConfig::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_fit_knobs() {
        let config = PhysicsConfig::default();
        assert_eq!(config.max_substep_count, 5);
        assert_eq!(config.fit_min_settle_frames, 60);
        assert_eq!(config.fit_initial_frames, 60);
        assert_eq!(config.fit_tail_frames, 3);
        assert!((config.fixed_time_step() - 1.0 / 60.0).abs() < 1e-9);
    }
}
