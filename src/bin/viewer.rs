//! 无头参考 viewer
//!
//! `viewer [paths…]`：`.pmx` 依次放入模型槽位，`.vmd` 依次放入动作槽位。
//! 模拟线程运行帧调度器，主线程读取标准输入，`q` 结束。
//!
//! 退出码：0 正常结束，1 初始化失败，2 用户中断。

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use mmd_deform::audio::{AudioPlayer, SilentPlayer};
use mmd_deform::config::UserConfig;
use mmd_deform::scheduler::{RenderItem, Viewer, ViewerWindow};
use mmd_deform::state::StateFlags;
use mmd_deform::{
    load_pmx, logging, FrameScheduler, MmdError, Result, SharedState, TickOutcome, ViewerPipeline,
    VmdFile,
};

#[derive(Parser, Debug)]
#[command(name = "viewer", about = "MMD deformation viewer (headless)")]
struct Args {
    /// .pmx / .vmd 文件
    paths: Vec<PathBuf>,

    /// 渲染指定帧数后退出
    #[arg(long)]
    frames: Option<u64>,

    /// FPS 上限（30 / 60 / -1）
    #[arg(long)]
    fps: Option<i32>,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// 退出时保存日志快照
    #[arg(long)]
    snapshot: Option<String>,

    /// 与动作同步播放的音频
    #[arg(long)]
    audio: Option<PathBuf>,

    /// 关闭物理
    #[arg(long)]
    no_physics: bool,
}

/// 只统计渲染结果的窗口
struct HeadlessWindow {
    position: (i32, i32),
    rendered: Arc<AtomicU64>,
}

impl ViewerWindow for HeadlessWindow {
    fn position(&self) -> (i32, i32) {
        self.position
    }

    fn set_position(&mut self, x: i32, y: i32) {
        self.position = (x, y);
    }

    fn bring_to_front(&mut self) {}

    fn set_vsync(&mut self, enabled: bool) {
        log::debug!("VSync {}", if enabled { "ON" } else { "OFF" });
    }

    fn render(&mut self, frame: f32, items: &[RenderItem<'_>]) {
        for item in items {
            let vertices = item.deltas.skinned.as_ref().map_or(0, |s| s.len());
            log::trace!(
                "帧 {:.2}: '{}' 顶点 {} 物理骨骼 {}",
                frame,
                item.model.name,
                vertices,
                item.deltas.physics_bones.len()
            );
        }
        self.rendered.fetch_add(1, Ordering::Relaxed);
    }
}

enum Finish {
    Completed,
    Cancelled,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = match logging::parse_level(&args.log_level) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("{}", e.describe());
            return ExitCode::from(1);
        }
    };
    logging::init(level);

    let state = SharedState::global();
    {
        let state = state.clone();
        logging::install_panic_hook(move || state.frame());
    }

    let mut user_config = match UserConfig::load_default() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("用户配置不可用: {}", e);
            UserConfig::load(".")
        }
    };

    if let Err(e) = setup(&args, &state, &mut user_config) {
        log::error!("{}", e.describe());
        eprintln!("{}", e.describe());
        save_snapshot(&args);
        return ExitCode::from(1);
    }

    let finish = run(&args, state);
    save_snapshot(&args);
    match finish {
        Ok(Finish::Completed) => ExitCode::SUCCESS,
        Ok(Finish::Cancelled) => ExitCode::from(2),
        Err(e) => {
            eprintln!("{}", e.describe());
            ExitCode::from(1)
        }
    }
}

/// 读取文件并发布到共享状态
fn setup(args: &Args, state: &SharedState, user_config: &mut UserConfig) -> Result<()> {
    let fps = args.fps.unwrap_or_else(|| user_config.fps_limit());
    user_config.set_fps_limit(fps)?;
    state.set_fps_limit(fps);
    state.set_frame_drop(user_config.frame_drop());
    state.set_flag(StateFlags::WINDOW_LINKAGE, user_config.window_linkage());
    state.set_physics_enabled(!args.no_physics);

    let mut model_slot = 0;
    let mut motion_slot = 0;
    let mut max_frame = 0u32;
    for path in &args.paths {
        match extension(path).as_deref() {
            Some("pmx") => {
                let model = load_pmx(path)?;
                state.models.store((0, model_slot), model);
                model_slot += 1;
                user_config.push_history("pmx", &path.display().to_string());
            }
            Some("vmd") => {
                let motion = VmdFile::load(path)?.into_motion();
                max_frame = max_frame.max(motion.max_frame());
                state.motions.store((0, motion_slot), motion);
                motion_slot += 1;
                user_config.push_history("vmd", &path.display().to_string());
            }
            _ => {
                return Err(MmdError::Validate(format!(
                    "不支持的文件类型: {}",
                    path.display()
                )))
            }
        }
    }
    state.set_max_frame(max_frame as f32);
    state.set_playing(motion_slot > 0);

    if let Err(e) = user_config.save() {
        log::warn!("用户配置保存失败: {}", e);
    }
    log::info!("模型 {} 个, 动作 {} 个, 最大帧 {}", model_slot, motion_slot, max_frame);
    Ok(())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// 模拟线程跑调度器，主线程处理输入
fn run(args: &Args, state: Arc<SharedState>) -> Result<Finish> {
    let mut audio: Option<Box<dyn AudioPlayer>> = None;
    if let Some(path) = &args.audio {
        let mut player = SilentPlayer::new();
        player.load(path)?;
        audio = Some(Box::new(player));
    }

    let frames = args.frames;
    let rendered = Arc::new(AtomicU64::new(0));
    let sim_state = state.clone();
    let sim_rendered = rendered.clone();
    let simulation = thread::Builder::new()
        .name("simulation".into())
        .spawn(move || {
            let mut scheduler = FrameScheduler::new(sim_state.clone());
            if let Some(audio) = audio {
                scheduler.set_audio(audio);
            }
            let window = HeadlessWindow {
                position: (0, 0),
                rendered: sim_rendered,
            };
            scheduler.add_viewer(Viewer::new(Box::new(window), ViewerPipeline::rapier()));

            loop {
                match scheduler.tick(Instant::now()) {
                    TickOutcome::Closed => return Finish::Cancelled,
                    TickOutcome::Waiting(d) => thread::sleep(d),
                    TickOutcome::Rendered => {
                        if frames.is_some_and(|n| scheduler.rendered_frames() >= n) {
                            sim_state.set_closed(true);
                            scheduler.tick(Instant::now());
                            return Finish::Completed;
                        }
                    }
                }
            }
        })?;

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    while !simulation.is_finished() {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(line) if line.trim() == "q" => {
                log::info!("用户中断 @ 帧 {}", state.frame());
                state.set_closed(true);
            }
            Ok(line) if line.trim() == "p" => state.set_playing(!state.is_playing()),
            Ok(line) if line.trim() == "r" => {
                state.request_reset(mmd_deform::PhysicsResetType::StartFitFrame)
            }
            _ => {}
        }
    }

    let finish = simulation
        .join()
        .map_err(|_| MmdError::Internal(format!("模拟线程异常结束 @ 帧 {}", state.frame())))?;
    log::info!("渲染 {} 帧", rendered.load(Ordering::Relaxed));
    Ok(finish)
}

fn save_snapshot(args: &Args) {
    let Some(label) = &args.snapshot else {
        return;
    };
    let root = mmd_deform::config::app_root_dir().unwrap_or_else(|_| PathBuf::from("."));
    if let Err(e) = logging::save_snapshot(&root, label) {
        eprintln!("{}", e.describe());
    }
}
