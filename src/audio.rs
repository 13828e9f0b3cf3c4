//! 音频播放接口
//!
//! 核心只通过 [`AudioPlayer`] 与播放器交互；[`SilentPlayer`] 记录状态但不出声，
//! 供无头运行与测试使用。

use std::path::{Path, PathBuf};

use crate::{MmdError, Result};

pub const VOLUME_MAX: u8 = 100;
pub const DEFAULT_VOLUME: u8 = 50;

pub fn clamp_volume(volume: i32) -> u8 {
    volume.clamp(0, VOLUME_MAX as i32) as u8
}

/// 音频播放器
pub trait AudioPlayer: Send {
    fn load(&mut self, path: &Path) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    /// 跳到 `seconds` 秒处
    fn seek(&mut self, seconds: f64) -> Result<()>;
    /// 音量 0-100，越界值被截断
    fn set_volume(&mut self, volume: i32) -> Result<()>;
    fn volume(&self) -> u8;
    fn is_loaded(&self) -> bool;
    fn is_playing(&self) -> bool;
}

/// 不输出声音的播放器
#[derive(Debug, Clone, PartialEq)]
pub struct SilentPlayer {
    path: Option<PathBuf>,
    playing: bool,
    position: f64,
    volume: u8,
}

impl Default for SilentPlayer {
    fn default() -> Self {
        Self {
            path: None,
            playing: false,
            position: 0.0,
            volume: DEFAULT_VOLUME,
        }
    }
}

impl SilentPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.path.is_none() {
            return Err(MmdError::Validate("音频未加载".into()));
        }
        Ok(())
    }
}

impl AudioPlayer for SilentPlayer {
    fn load(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(MmdError::NotFound(path.display().to_string()));
        }
        log::debug!("音频加载: {}", path.display());
        self.path = Some(path.to_path_buf());
        self.playing = false;
        self.position = 0.0;
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.ensure_loaded()?;
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.ensure_loaded()?;
        self.playing = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.ensure_loaded()?;
        self.playing = false;
        self.position = 0.0;
        Ok(())
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        self.ensure_loaded()?;
        if !seconds.is_finite() {
            return Err(MmdError::Validate(format!("seek 位置无效: {}", seconds)));
        }
        self.position = seconds.max(0.0);
        Ok(())
    }

    fn set_volume(&mut self, volume: i32) -> Result<()> {
        self.volume = clamp_volume(volume);
        log::trace!("音量设置: {}", self.volume);
        Ok(())
    }

    fn volume(&self) -> u8 {
        self.volume
    }

    fn is_loaded(&self) -> bool {
        self.path.is_some()
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}
