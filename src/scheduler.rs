//! 帧调度器
//!
//! 在模拟 / 渲染线程上循环：窗口联动 → 焦点 → VSync → 计时 →
//! 物理重置汇总 → 逐 viewer 变形 → 逆序渲染 → 推进帧号。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::animation::{Motion, PhysicsWorldMotion, WindMotion};
use crate::audio::AudioPlayer;
use crate::deform::{DeformRequest, ModelInput, ViewerPipeline, VmdDeltas};
use crate::model::PmxModel;
use crate::physics::PhysicsResetType;
use crate::state::{SharedState, StateFlags};

/// MMD 的标准帧率
pub const DEFAULT_FPS: f32 = 30.0;
pub const DEFAULT_SPF: f32 = 1.0 / DEFAULT_FPS;

/// 渲染端收到的一项
pub struct RenderItem<'a> {
    pub model: &'a PmxModel,
    pub deltas: &'a VmdDeltas,
}

/// 一个 viewer 窗口
pub trait ViewerWindow: Send {
    fn position(&self) -> (i32, i32);
    fn set_position(&mut self, x: i32, y: i32);
    /// 置前但不激活
    fn bring_to_front(&mut self);
    fn set_vsync(&mut self, enabled: bool);
    fn render(&mut self, frame: f32, items: &[RenderItem<'_>]);
}

/// 一次 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// 已关闭，所有 viewer 已销毁
    Closed,
    /// 未到渲染时间，建议睡眠
    Waiting(Duration),
    Rendered,
}

struct MergedMotion {
    base_hash: u64,
    revision: u64,
    motion: Arc<Motion>,
}

/// viewer 窗口与它的物理世界
pub struct Viewer {
    window: Box<dyn ViewerWindow>,
    pipeline: ViewerPipeline,
    merged: BTreeMap<usize, MergedMotion>,
}

impl Viewer {
    pub fn new(window: Box<dyn ViewerWindow>, pipeline: ViewerPipeline) -> Self {
        Self {
            window,
            pipeline,
            merged: BTreeMap::new(),
        }
    }

    pub fn pipeline(&self) -> &ViewerPipeline {
        &self.pipeline
    }
}

/// 帧调度器
pub struct FrameScheduler {
    state: Arc<SharedState>,
    viewers: Vec<Viewer>,
    audio: Option<Box<dyn AudioPlayer>>,
    prev: Option<Instant>,
    was_playing: bool,
    rendered: u64,
    empty_motion: Arc<Motion>,
    empty_world: Arc<PhysicsWorldMotion>,
    empty_wind: Arc<WindMotion>,
}

impl FrameScheduler {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self {
            state,
            viewers: Vec::new(),
            audio: None,
            prev: None,
            was_playing: false,
            rendered: 0,
            empty_motion: Arc::new(Motion::new()),
            empty_world: Arc::new(PhysicsWorldMotion::new()),
            empty_wind: Arc::new(WindMotion::new()),
        }
    }

    /// 追加 viewer，返回其索引
    pub fn add_viewer(&mut self, viewer: Viewer) -> usize {
        self.viewers.push(viewer);
        self.viewers.len() - 1
    }

    pub fn set_audio(&mut self, audio: Box<dyn AudioPlayer>) {
        self.audio = Some(audio);
    }

    pub fn audio(&self) -> Option<&dyn AudioPlayer> {
        self.audio.as_deref()
    }

    pub fn viewer(&self, index: usize) -> Option<&Viewer> {
        self.viewers.get(index)
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// 已渲染的帧数
    pub fn rendered_frames(&self) -> u64 {
        self.rendered
    }

    /// 以真实时钟循环直到关闭
    pub fn run(&mut self) {
        loop {
            match self.tick(Instant::now()) {
                TickOutcome::Closed => break,
                TickOutcome::Waiting(d) => std::thread::sleep(d),
                TickOutcome::Rendered => {}
            }
        }
    }

    /// 执行一次循环
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.state.is_closed() {
            self.close();
            return TickOutcome::Closed;
        }

        self.handle_window_linkage();
        self.handle_focus();
        self.handle_vsync();

        let elapsed = match self.prev {
            Some(prev) => now.saturating_duration_since(prev).as_secs_f32(),
            None => DEFAULT_SPF,
        };
        let interval = self.state.frame_interval();
        if interval > 0.0 && elapsed < interval {
            return TickOutcome::Waiting(Duration::from_secs_f32((interval - elapsed) * 0.9));
        }
        self.prev = Some(now);

        let playing = self.state.is_playing();
        let dt = if !self.state.is_frame_drop() && !playing {
            elapsed.clamp(0.0, DEFAULT_SPF)
        } else {
            elapsed
        };
        self.sync_audio(playing);

        let frame = self.state.frame();
        let mut reset = self.state.take_reset();
        for index in 0..self.viewers.len() {
            reset = reset.max(self.world_motion(index).reset_type_at(frame));
        }
        if reset != PhysicsResetType::None {
            log::debug!("帧 {} 物理重置 {:?}", frame, reset);
        }

        self.deform_and_render(frame, dt, reset);
        self.rendered += 1;

        if playing {
            self.advance(frame, elapsed);
        }
        TickOutcome::Rendered
    }

    fn close(&mut self) {
        if self.viewers.is_empty() {
            return;
        }
        if let Some(audio) = self.audio.as_mut() {
            if audio.is_loaded() {
                if let Err(e) = audio.stop() {
                    log::warn!("音频停止失败: {}", e);
                }
            }
        }
        log::info!("关闭 {} 个 viewer", self.viewers.len());
        self.viewers.clear();
    }

    fn handle_window_linkage(&mut self) {
        if !self.state.is_set(StateFlags::WINDOW_LINKAGE) {
            return;
        }
        if !self.state.take_flag(StateFlags::CONTROL_MOVED) {
            return;
        }
        let placement = self.state.control_window();
        if placement.diff_x == 0 && placement.diff_y == 0 {
            return;
        }
        for viewer in &mut self.viewers {
            let (x, y) = viewer.window.position();
            viewer
                .window
                .set_position(x + placement.diff_x, y + placement.diff_y);
        }
    }

    fn handle_focus(&mut self) {
        if !self.state.take_flag(StateFlags::FOCUS_LINKED) {
            return;
        }
        for viewer in &mut self.viewers {
            viewer.window.bring_to_front();
        }
    }

    fn handle_vsync(&mut self) {
        if !self.state.take_flag(StateFlags::FPS_LIMIT_TRIGGERED) {
            return;
        }
        let vsync = self.state.frame_interval() > 0.0;
        for viewer in &mut self.viewers {
            viewer.window.set_vsync(vsync);
        }
    }

    fn sync_audio(&mut self, playing: bool) {
        if playing == self.was_playing {
            return;
        }
        self.was_playing = playing;
        let Some(audio) = self.audio.as_mut() else {
            return;
        };
        if !audio.is_loaded() {
            return;
        }
        let result = if playing {
            let seconds = f64::from(self.state.frame() / DEFAULT_FPS);
            audio.seek(seconds).and_then(|_| audio.play())
        } else {
            audio.pause()
        };
        if let Err(e) = result {
            log::warn!("音频控制失败: {}", e);
        }
    }

    fn advance(&mut self, frame: f32, elapsed: f32) {
        let mut next = frame + elapsed * DEFAULT_FPS;
        let max_frame = self.state.max_frame();
        if max_frame > 0.0 && next > max_frame {
            next = 0.0;
            self.state.request_reset(PhysicsResetType::StartFrame);
            if let Some(audio) = self.audio.as_mut().filter(|a| a.is_loaded()) {
                if let Err(e) = audio.seek(0.0) {
                    log::warn!("音频定位失败: {}", e);
                }
            }
        }
        // 帧号最后发布
        self.state.set_frame(next);
    }

    fn world_motion(&self, viewer: usize) -> Arc<PhysicsWorldMotion> {
        self.state
            .world_motions
            .load(viewer)
            .unwrap_or_else(|| self.empty_world.clone())
    }

    fn wind_motion(&self, viewer: usize) -> Arc<WindMotion> {
        self.state
            .wind_motions
            .load(viewer)
            .unwrap_or_else(|| self.empty_wind.clone())
    }

    /// 模型动作叠加录制的差分动作
    fn motion_for(&mut self, viewer: usize, model: usize) -> Arc<Motion> {
        let base = self
            .state
            .motions
            .load((viewer, model))
            .unwrap_or_else(|| self.empty_motion.clone());

        let deltas: Vec<(usize, usize, usize)> = self
            .state
            .delta_motions
            .keys()
            .into_iter()
            .filter(|&(v, m, _)| v == viewer && m == model)
            .collect();
        let Some(slot) = self.viewers.get_mut(viewer) else {
            return base;
        };
        if deltas.is_empty() {
            slot.merged.remove(&model);
            return base;
        }

        let revision = self.state.delta_motions.revision();
        if let Some(cached) = slot.merged.get(&model) {
            if cached.base_hash == base.hash() && cached.revision == revision {
                return cached.motion.clone();
            }
        }

        let mut merged = (*base).clone();
        for key in deltas {
            if let Some(delta) = self.state.delta_motions.load(key) {
                merged.merge(&delta);
            }
        }
        let merged = Arc::new(merged);
        slot.merged.insert(
            model,
            MergedMotion {
                base_hash: base.hash(),
                revision,
                motion: merged.clone(),
            },
        );
        merged
    }

    fn deform_and_render(&mut self, frame: f32, dt: f32, reset: PhysicsResetType) {
        let physics_enabled = self.state.is_physics_enabled();
        let model_keys = self.state.models.keys();

        let mut outputs: Vec<(Vec<Arc<PmxModel>>, Vec<VmdDeltas>)> = Vec::with_capacity(self.viewers.len());
        for index in 0..self.viewers.len() {
            let mut models = Vec::new();
            let mut motions = Vec::new();
            let mut slots = Vec::new();
            for &(v, m) in model_keys.iter().filter(|(v, _)| *v == index) {
                let Some(model) = self.state.models.load((v, m)) else {
                    continue;
                };
                motions.push(self.motion_for(v, m));
                models.push(model);
                slots.push(m);
            }

            let world = self.world_motion(index);
            let wind = self.wind_motion(index);
            let inputs: Vec<ModelInput<'_>> = slots
                .iter()
                .zip(models.iter().zip(&motions))
                .map(|(&slot, (model, motion))| ModelInput {
                    slot,
                    model: model.as_ref(),
                    motion: motion.as_ref(),
                })
                .collect();
            let request = DeformRequest {
                frame,
                dt,
                physics_enabled,
                reset,
                world: &world,
                wind: &wind,
            };
            let deltas = self.viewers[index].pipeline.deform(&inputs, &request);
            outputs.push((models, deltas));
        }

        // 主 viewer 最后绘制
        for (viewer, (models, deltas)) in self.viewers.iter_mut().zip(&outputs).rev() {
            let items: Vec<RenderItem<'_>> = models
                .iter()
                .zip(deltas)
                .map(|(model, deltas)| RenderItem {
                    model: model.as_ref(),
                    deltas,
                })
                .collect();
            viewer.window.render(frame, &items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SilentPlayer;
    use crate::model::{BoneDef, PhysicsMode, RigidBodyDef, RigidBodyShape};
    use crate::physics::mock::MockBackend;
    use crate::physics::PhysicsBridge;
    use glam::Vec3;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Render(usize, f32, usize),
        Moved(usize, i32, i32),
        Front(usize),
        Vsync(usize, bool),
    }

    struct TestWindow {
        id: usize,
        pos: (i32, i32),
        log: Arc<Mutex<Vec<Event>>>,
    }

    impl ViewerWindow for TestWindow {
        fn position(&self) -> (i32, i32) {
            self.pos
        }

        fn set_position(&mut self, x: i32, y: i32) {
            self.pos = (x, y);
            self.log.lock().unwrap().push(Event::Moved(self.id, x, y));
        }

        fn bring_to_front(&mut self) {
            self.log.lock().unwrap().push(Event::Front(self.id));
        }

        fn set_vsync(&mut self, enabled: bool) {
            self.log.lock().unwrap().push(Event::Vsync(self.id, enabled));
        }

        fn render(&mut self, frame: f32, items: &[RenderItem<'_>]) {
            self.log
                .lock()
                .unwrap()
                .push(Event::Render(self.id, frame, items.len()));
        }
    }

    fn hair_model() -> PmxModel {
        let mut model = PmxModel::new("hair");
        model.bones.push(BoneDef::new("root", Vec3::ZERO, -1));
        model.bones.push(BoneDef::new("hair", Vec3::new(0.0, 7.0, 0.0), 0));
        let mut hair = RigidBodyDef::new("hair", 1, RigidBodyShape::Sphere, PhysicsMode::Dynamic);
        hair.position = Vec3::new(0.0, 7.0, 0.0);
        model.rigid_bodies.push(hair);
        model.finalize();
        model
    }

    fn scheduler(viewers: usize) -> (FrameScheduler, Arc<SharedState>, Arc<Mutex<Vec<Event>>>) {
        let state = Arc::new(SharedState::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = FrameScheduler::new(state.clone());
        for id in 0..viewers {
            let window = TestWindow {
                id,
                pos: (0, 0),
                log: log.clone(),
            };
            let pipeline = ViewerPipeline::new(PhysicsBridge::new(Box::new(MockBackend::new(Vec3::Z))));
            scheduler.add_viewer(Viewer::new(Box::new(window), pipeline));
        }
        (scheduler, state, log)
    }

    fn renders(log: &Arc<Mutex<Vec<Event>>>) -> Vec<Event> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::Render(..)))
            .cloned()
            .collect()
    }

    #[test]
    fn closed_flag_destroys_viewers() {
        let (mut scheduler, state, _) = scheduler(2);
        state.set_closed(true);
        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::Closed);
        assert_eq!(scheduler.viewer_count(), 0);
    }

    #[test]
    fn renders_back_to_front() {
        let (mut scheduler, state, log) = scheduler(2);
        state.models.store((0, 0), hair_model());
        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::Rendered);
        assert_eq!(renders(&log), vec![Event::Render(1, 0.0, 0), Event::Render(0, 0.0, 1)]);
    }

    #[test]
    fn waits_until_interval_elapsed() {
        let (mut scheduler, state, _) = scheduler(1);
        state.set_fps_limit(30);
        let t0 = Instant::now();
        assert_eq!(scheduler.tick(t0), TickOutcome::Rendered);
        match scheduler.tick(t0 + Duration::from_millis(10)) {
            TickOutcome::Waiting(d) => {
                let expected = (1.0 / 30.0 - 0.010) * 0.9;
                assert!((d.as_secs_f32() - expected).abs() < 1e-3);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(scheduler.tick(t0 + Duration::from_millis(40)), TickOutcome::Rendered);
        assert_eq!(scheduler.rendered_frames(), 2);
    }

    #[test]
    fn playing_advances_and_wraps() {
        let (mut scheduler, state, _) = scheduler(1);
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.wav");
        std::fs::write(&song, b"RIFF").unwrap();
        let mut player = SilentPlayer::new();
        player.load(&song).unwrap();
        scheduler.set_audio(Box::new(player));

        state.set_max_frame(10.0);
        state.set_frame(5.0);
        state.set_playing(true);
        let t0 = Instant::now();
        scheduler.tick(t0);
        assert!((state.frame() - 6.0).abs() < 1e-4);
        assert!(scheduler.audio().unwrap().is_playing());

        state.set_frame(9.5);
        scheduler.tick(t0 + Duration::from_millis(100));
        assert_eq!(state.frame(), 0.0);
        assert_eq!(state.pending_reset(), PhysicsResetType::StartFrame);

        state.set_playing(false);
        scheduler.tick(t0 + Duration::from_millis(200));
        assert!(!scheduler.audio().unwrap().is_playing());
        assert_eq!(state.pending_reset(), PhysicsResetType::None);
    }

    #[test]
    fn scrubbing_clamps_dt() {
        let (mut scheduler, state, _) = scheduler(1);
        state.models.store((0, 0), hair_model());
        let mut world = PhysicsWorldMotion::new();
        world.insert_max_sub_steps(0, 100);
        state.world_motions.store(0, world);

        let t0 = Instant::now();
        scheduler.tick(t0);
        // 两秒后的一帧只推进 1/30 秒（两个子步）
        scheduler.tick(t0 + Duration::from_secs(2));
        let body = scheduler.viewer(0).unwrap().pipeline().bridge().body_transform(0, 0).unwrap();
        assert!((body.w_axis.z - 4.0).abs() < 1e-4);
    }

    #[test]
    fn reset_request_rebuilds_bodies() {
        let (mut scheduler, state, _) = scheduler(1);
        state.models.store((0, 0), hair_model());
        let t0 = Instant::now();
        scheduler.tick(t0);
        let z = |s: &FrameScheduler| {
            s.viewer(0).unwrap().pipeline().bridge().body_transform(0, 0).unwrap().w_axis.z
        };
        assert!(z(&scheduler) > 0.0);

        state.request_reset(PhysicsResetType::StartFrame);
        scheduler.tick(t0 + Duration::from_millis(33));
        assert!(z(&scheduler).abs() < 1e-6);
        assert_eq!(state.pending_reset(), PhysicsResetType::None);
    }

    #[test]
    fn linkage_moves_viewers_and_syncs_vsync() {
        let (mut scheduler, state, log) = scheduler(2);
        state.set_flag(StateFlags::WINDOW_LINKAGE, true);
        state.move_control_window(10, 20);
        state.set_fps_limit(60);
        state.set_control_window_handle(3);
        state.set_focused_window_handle(3);
        scheduler.tick(Instant::now());

        let events = log.lock().unwrap().clone();
        assert!(events.contains(&Event::Moved(0, 10, 20)));
        assert!(events.contains(&Event::Moved(1, 10, 20)));
        assert!(events.contains(&Event::Front(1)));
        assert!(events.contains(&Event::Vsync(0, true)));
        assert!(!state.is_set(StateFlags::CONTROL_MOVED));
    }

    #[test]
    fn delta_motions_are_merged_once() {
        let (mut scheduler, state, _) = scheduler(1);
        state.motions.store((0, 0), Motion::new());
        let mut delta = Motion::new();
        delta.insert_morph_keyframe("smile", crate::animation::MorphKeyframe::new(0, 1.0));
        state.delta_motions.store((0, 0, 0), delta);

        let a = scheduler.motion_for(0, 0);
        let b = scheduler.motion_for(0, 0);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.morph_weight("smile", 0.0), 1.0);

        state.delta_motions.take((0, 0, 0));
        let c = scheduler.motion_for(0, 0);
        assert_eq!(c.morph_weight("smile", 0.0), 0.0);
    }
}
