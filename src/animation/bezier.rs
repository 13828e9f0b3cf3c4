//! 贝塞尔曲线插值

/// 贝塞尔曲线（用于 VMD 动画插值）
///
/// 端点固定为 (0,0) 与 (1,1)，控制点归一化到 [0, 1]。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BezierCurve {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Default for BezierCurve {
    fn default() -> Self {
        Self::linear()
    }
}

impl BezierCurve {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 线性插值（MMD 默认控制点 20/127, 107/127）
    pub fn linear() -> Self {
        Self::new(20.0 / 127.0, 20.0 / 127.0, 107.0 / 127.0, 107.0 / 127.0)
    }

    /// 从 VMD 插值数据创建，顺序 [x1, y1, x2, y2]，取值 0..=127
    pub fn from_vmd_data(data: &[u8; 4]) -> Self {
        Self {
            x1: data[0] as f32 / 127.0,
            y1: data[1] as f32 / 127.0,
            x2: data[2] as f32 / 127.0,
            y2: data[3] as f32 / 127.0,
        }
    }

    /// 写回 VMD 字节
    pub fn to_vmd_data(&self) -> [u8; 4] {
        let q = |v: f32| (v * 127.0).round().clamp(0.0, 127.0) as u8;
        [q(self.x1), q(self.y1), q(self.x2), q(self.y2)]
    }

    /// 控制点位于对角线上
    pub fn is_linear(&self) -> bool {
        self.x1 == self.y1 && self.x2 == self.y2
    }

    /// x 控制点超出 [0,1] 时 x(s) 不再单调
    fn is_malformed(&self) -> bool {
        let bad = |v: f32| !v.is_finite() || !(0.0..=1.0).contains(&v);
        bad(self.x1) || bad(self.x2) || !self.y1.is_finite() || !self.y2.is_finite()
    }

    /// 评估贝塞尔曲线
    pub fn evaluate(&self, t: f32) -> f32 {
        if t <= 0.0 {
            return 0.0;
        }
        if t >= 1.0 {
            return 1.0;
        }
        if self.is_linear() || self.is_malformed() {
            return t;
        }

        // 使用牛顿法求解 x(s) = t 的 s 值
        let mut s = t;
        for _ in 0..15 {
            let x = self.bezier_x(s);
            let dx = self.bezier_dx(s);

            if dx.abs() < 1e-6 {
                break;
            }

            let new_s = (s - (x - t) / dx).clamp(0.0, 1.0);
            if (new_s - s).abs() < 1e-6 {
                s = new_s;
                break;
            }
            s = new_s;
        }

        // 牛顿法在端点附近可能停滞，二分兜底
        if (self.bezier_x(s) - t).abs() > 1e-4 {
            s = self.bisect(t);
        }

        self.bezier_y(s)
    }

    fn bisect(&self, t: f32) -> f32 {
        let (mut lo, mut hi) = (0.0f32, 1.0f32);
        let mut mid = t;
        for _ in 0..32 {
            mid = (lo + hi) * 0.5;
            if self.bezier_x(mid) < t {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        mid
    }

    fn bezier_x(&self, s: f32) -> f32 {
        let s2 = s * s;
        let s3 = s2 * s;
        let t = 1.0 - s;
        let t2 = t * t;

        3.0 * t2 * s * self.x1 + 3.0 * t * s2 * self.x2 + s3
    }

    fn bezier_y(&self, s: f32) -> f32 {
        let s2 = s * s;
        let s3 = s2 * s;
        let t = 1.0 - s;
        let t2 = t * t;

        3.0 * t2 * s * self.y1 + 3.0 * t * s2 * self.y2 + s3
    }

    fn bezier_dx(&self, s: f32) -> f32 {
        let s2 = s * s;
        let t = 1.0 - s;

        3.0 * t * t * self.x1 + 6.0 * t * s * (self.x2 - self.x1) + 3.0 * s2 * (1.0 - self.x2)
    }
}
