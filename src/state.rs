//! 进程级共享状态
//!
//! UI 线程与模拟 / 渲染线程之间唯一的通信通道。每个槽位单写多读，
//! 写入时整体替换为新的 `Arc`，读者总是拿到最近一次发布的快照。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bitflags::bitflags;
use once_cell::sync::Lazy;

use crate::animation::{Motion, PhysicsWorldMotion, WindMotion};
use crate::model::PmxModel;
use crate::physics::PhysicsResetType;

bitflags! {
    /// 显示 / 行为开关
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StateFlags: u32 {
        const FRAME_DROP = 1 << 0;
        const PHYSICS_ENABLED = 1 << 1;
        const SHOW_NORMAL = 1 << 2;
        const SHOW_WIRE = 1 << 3;
        const SHOW_BONE_ALL = 1 << 4;
        const SHOW_BONE_IK = 1 << 5;
        const SHOW_BONE_EFFECTOR = 1 << 6;
        const SHOW_BONE_FIXED = 1 << 7;
        const SHOW_BONE_ROTATE = 1 << 8;
        const SHOW_BONE_TRANSLATE = 1 << 9;
        const SHOW_BONE_VISIBLE = 1 << 10;
        const SHOW_RIGID_BODY_FRONT = 1 << 11;
        const SHOW_RIGID_BODY_BACK = 1 << 12;
        const SHOW_JOINT = 1 << 13;
        const SHOW_INFO = 1 << 14;
        const CAMERA_SYNC = 1 << 15;
        const PLAYING = 1 << 16;
        const WINDOW_LINKAGE = 1 << 17;
        /// 控制窗口移动中，等待 viewer 跟随
        const CONTROL_MOVED = 1 << 18;
        /// FPS 上限变更，等待同步 VSync
        const FPS_LIMIT_TRIGGERED = 1 << 19;
        const FOCUS_LINKED = 1 << 20;
        const CLOSE_REQUESTED = 1 << 21;

        const SHOW_BONES = Self::SHOW_BONE_ALL.bits()
            | Self::SHOW_BONE_IK.bits()
            | Self::SHOW_BONE_EFFECTOR.bits()
            | Self::SHOW_BONE_FIXED.bits()
            | Self::SHOW_BONE_ROTATE.bits()
            | Self::SHOW_BONE_TRANSLATE.bits()
            | Self::SHOW_BONE_VISIBLE.bits();
    }
}

/// 一组按键索引的不可变引用槽位
#[derive(Debug)]
pub struct Slots<K, T> {
    map: RwLock<BTreeMap<K, Arc<T>>>,
    revision: AtomicU64,
}

impl<K: Ord + Copy, T> Default for Slots<K, T> {
    fn default() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
        }
    }
}

impl<K: Ord + Copy, T> Slots<K, T> {
    /// 发布新值，返回新的修订号
    pub fn store(&self, key: K, value: impl Into<Arc<T>>) -> u64 {
        let value = value.into();
        match self.map.write() {
            Ok(mut map) => {
                map.insert(key, value);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key, value);
            }
        }
        self.revision.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn load(&self, key: K) -> Option<Arc<T>> {
        match self.map.read() {
            Ok(map) => map.get(&key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&key).cloned(),
        }
    }

    pub fn take(&self, key: K) -> Option<Arc<T>> {
        let taken = match self.map.write() {
            Ok(mut map) => map.remove(&key),
            Err(poisoned) => poisoned.into_inner().remove(&key),
        };
        if taken.is_some() {
            self.revision.fetch_add(1, Ordering::AcqRel);
        }
        taken
    }

    pub fn keys(&self) -> Vec<K> {
        match self.map.read() {
            Ok(map) => map.keys().copied().collect(),
            Err(poisoned) => poisoned.into_inner().keys().copied().collect(),
        }
    }

    /// 每次 store / take 递增
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }
}

/// 控制窗口位置与上次移动量，整体读写
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowPlacement {
    pub x: i32,
    pub y: i32,
    pub diff_x: i32,
    pub diff_y: i32,
}

/// 共享状态
#[derive(Debug)]
pub struct SharedState {
    flags: AtomicU32,
    frame: AtomicU32,
    max_frame: AtomicU32,
    frame_interval: AtomicU32,
    reset: AtomicU8,
    closed: AtomicBool,
    control_window: Mutex<WindowPlacement>,
    control_handle: AtomicI32,
    viewer_handles: RwLock<BTreeMap<usize, i32>>,
    focused_handle: AtomicI32,

    pub models: Slots<(usize, usize), PmxModel>,
    pub motions: Slots<(usize, usize), Motion>,
    /// (viewer, model, delta) 的录制差分动作
    pub delta_motions: Slots<(usize, usize, usize), Motion>,
    pub world_motions: Slots<usize, PhysicsWorldMotion>,
    pub wind_motions: Slots<usize, WindMotion>,
}

static SHARED_STATE: Lazy<Arc<SharedState>> = Lazy::new(|| Arc::new(SharedState::new()));

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    /// 独立实例
    pub fn new() -> Self {
        Self {
            flags: AtomicU32::new(StateFlags::PHYSICS_ENABLED.bits()),
            frame: AtomicU32::new(0f32.to_bits()),
            max_frame: AtomicU32::new(0f32.to_bits()),
            frame_interval: AtomicU32::new((-1f32).to_bits()),
            reset: AtomicU8::new(PhysicsResetType::None.as_u8()),
            closed: AtomicBool::new(false),
            control_window: Mutex::new(WindowPlacement::default()),
            control_handle: AtomicI32::new(0),
            viewer_handles: RwLock::new(BTreeMap::new()),
            focused_handle: AtomicI32::new(0),
            models: Slots::default(),
            motions: Slots::default(),
            delta_motions: Slots::default(),
            world_motions: Slots::default(),
            wind_motions: Slots::default(),
        }
    }

    /// 进程级实例；调度器与 UI 线程共享同一个 `Arc`
    pub fn global() -> Arc<SharedState> {
        Arc::clone(&SHARED_STATE)
    }

    pub fn flags(&self) -> StateFlags {
        StateFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn is_set(&self, flag: StateFlags) -> bool {
        self.flags().contains(flag)
    }

    pub fn set_flag(&self, flag: StateFlags, enabled: bool) {
        if enabled {
            self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
        }
    }

    /// 读取并清除
    pub fn take_flag(&self, flag: StateFlags) -> bool {
        let old = self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
        StateFlags::from_bits_truncate(old).contains(flag)
    }

    pub fn is_playing(&self) -> bool {
        self.is_set(StateFlags::PLAYING)
    }

    pub fn set_playing(&self, playing: bool) {
        self.set_flag(StateFlags::PLAYING, playing);
    }

    pub fn is_physics_enabled(&self) -> bool {
        self.is_set(StateFlags::PHYSICS_ENABLED)
    }

    pub fn set_physics_enabled(&self, enabled: bool) {
        self.set_flag(StateFlags::PHYSICS_ENABLED, enabled);
    }

    pub fn is_frame_drop(&self) -> bool {
        self.is_set(StateFlags::FRAME_DROP)
    }

    pub fn set_frame_drop(&self, enabled: bool) {
        self.set_flag(StateFlags::FRAME_DROP, enabled);
    }

    pub fn frame(&self) -> f32 {
        f32::from_bits(self.frame.load(Ordering::Acquire))
    }

    pub fn set_frame(&self, frame: f32) {
        self.frame.store(frame.to_bits(), Ordering::Release);
    }

    pub fn max_frame(&self) -> f32 {
        f32::from_bits(self.max_frame.load(Ordering::Acquire))
    }

    pub fn set_max_frame(&self, frame: f32) {
        self.max_frame.store(frame.to_bits(), Ordering::Release);
    }

    /// 每帧秒数，负数表示不限
    pub fn frame_interval(&self) -> f32 {
        f32::from_bits(self.frame_interval.load(Ordering::Acquire))
    }

    pub fn set_frame_interval(&self, spf: f32) {
        self.frame_interval.store(spf.to_bits(), Ordering::Release);
        self.set_flag(StateFlags::FPS_LIMIT_TRIGGERED, true);
    }

    /// 以 FPS 上限设置帧间隔（-1 为不限）
    pub fn set_fps_limit(&self, fps: i32) {
        let spf = if fps > 0 { 1.0 / fps as f32 } else { -1.0 };
        self.set_frame_interval(spf);
    }

    /// 登记重置请求，保留优先级最高的一个
    pub fn request_reset(&self, reset: PhysicsResetType) {
        self.reset.fetch_max(reset.as_u8(), Ordering::AcqRel);
    }

    pub fn pending_reset(&self) -> PhysicsResetType {
        PhysicsResetType::from_u8(self.reset.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn take_reset(&self) -> PhysicsResetType {
        let v = self.reset.swap(PhysicsResetType::None.as_u8(), Ordering::AcqRel);
        PhysicsResetType::from_u8(v).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::Release);
    }

    pub fn control_window(&self) -> WindowPlacement {
        match self.control_window.lock() {
            Ok(p) => *p,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// 控制窗口移动到 (x, y)，记录移动量并通知 viewer 跟随
    pub fn move_control_window(&self, x: i32, y: i32) {
        let mut guard = match self.control_window.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = WindowPlacement {
            x,
            y,
            diff_x: x - guard.x,
            diff_y: y - guard.y,
        };
        drop(guard);
        self.set_flag(StateFlags::CONTROL_MOVED, true);
    }

    pub fn control_window_handle(&self) -> i32 {
        self.control_handle.load(Ordering::Acquire)
    }

    pub fn set_control_window_handle(&self, handle: i32) {
        self.control_handle.store(handle, Ordering::Release);
    }

    pub fn viewer_window_handle(&self, viewer: usize) -> i32 {
        match self.viewer_handles.read() {
            Ok(h) => h.get(&viewer).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(&viewer).copied().unwrap_or(0),
        }
    }

    pub fn set_viewer_window_handle(&self, viewer: usize, handle: i32) {
        match self.viewer_handles.write() {
            Ok(mut h) => {
                h.insert(viewer, handle);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(viewer, handle);
            }
        }
    }

    /// 句柄是否属于本应用的某个窗口
    pub fn is_own_window(&self, handle: i32) -> bool {
        if handle == 0 {
            return false;
        }
        if handle == self.control_window_handle() {
            return true;
        }
        match self.viewer_handles.read() {
            Ok(h) => h.values().any(|&v| v == handle),
            Err(poisoned) => poisoned.into_inner().values().any(|&v| v == handle),
        }
    }

    pub fn focused_window_handle(&self) -> i32 {
        self.focused_handle.load(Ordering::Acquire)
    }

    /// 焦点变化；落在本应用窗口上时请求联动置前
    pub fn set_focused_window_handle(&self, handle: i32) {
        self.focused_handle.store(handle, Ordering::Release);
        if self.is_set(StateFlags::WINDOW_LINKAGE) && self.is_own_window(handle) {
            self.set_flag(StateFlags::FOCUS_LINKED, true);
        }
    }

    /// viewer 已绑定的模型槽位数
    pub fn model_count(&self, viewer: usize) -> usize {
        self.models.keys().iter().filter(|(v, _)| *v == viewer).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_set_and_take() {
        let state = SharedState::new();
        assert!(state.is_physics_enabled());
        assert!(!state.is_playing());

        state.set_playing(true);
        state.set_flag(StateFlags::SHOW_BONE_IK, true);
        assert!(state.flags().intersects(StateFlags::SHOW_BONES));
        assert!(state.take_flag(StateFlags::PLAYING));
        assert!(!state.is_playing());
        assert!(!state.take_flag(StateFlags::PLAYING));
    }

    #[test]
    fn reset_requests_keep_highest_priority() {
        let state = SharedState::new();
        state.request_reset(PhysicsResetType::StartFitFrame);
        state.request_reset(PhysicsResetType::StartFrame);
        assert_eq!(state.pending_reset(), PhysicsResetType::StartFitFrame);
        assert_eq!(state.take_reset(), PhysicsResetType::StartFitFrame);
        assert_eq!(state.take_reset(), PhysicsResetType::None);
    }

    #[test]
    fn slots_publish_snapshots() {
        let state = SharedState::new();
        assert!(state.models.load((0, 0)).is_none());
        let rev = state.models.store((0, 0), PmxModel::new("a"));
        assert_eq!(rev, 1);
        let first = state.models.load((0, 0)).unwrap();

        state.models.store((0, 0), PmxModel::new("b"));
        // 旧快照仍然有效
        assert_eq!(first.name, "a");
        assert_eq!(state.models.load((0, 0)).unwrap().name, "b");
        assert_eq!(state.model_count(0), 1);

        assert!(state.models.take((0, 0)).is_some());
        assert_eq!(state.models.revision(), 3);
        assert_eq!(state.model_count(0), 0);
    }

    #[test]
    fn frame_scalars_round_trip() {
        let state = SharedState::new();
        assert_eq!(state.frame_interval(), -1.0);
        state.set_frame(12.5);
        state.set_max_frame(300.0);
        state.set_fps_limit(30);
        assert_eq!(state.frame(), 12.5);
        assert_eq!(state.max_frame(), 300.0);
        assert!((state.frame_interval() - 1.0 / 30.0).abs() < 1e-7);
        assert!(state.take_flag(StateFlags::FPS_LIMIT_TRIGGERED));
    }

    #[test]
    fn control_window_move_records_diff() {
        let state = SharedState::new();
        state.move_control_window(100, 50);
        state.move_control_window(110, 40);
        let p = state.control_window();
        assert_eq!((p.x, p.y, p.diff_x, p.diff_y), (110, 40, 10, -10));
        assert!(state.is_set(StateFlags::CONTROL_MOVED));
    }

    #[test]
    fn linked_focus_only_for_own_windows() {
        let state = SharedState::new();
        state.set_flag(StateFlags::WINDOW_LINKAGE, true);
        state.set_control_window_handle(7);
        state.set_viewer_window_handle(0, 9);
        state.set_focused_window_handle(42);
        assert!(!state.is_set(StateFlags::FOCUS_LINKED));
        state.set_focused_window_handle(9);
        assert!(state.take_flag(StateFlags::FOCUS_LINKED));
    }

    #[test]
    fn global_instance_is_shared() {
        let a = SharedState::global();
        let b = SharedState::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &Arc::new(SharedState::new())));
    }
}
