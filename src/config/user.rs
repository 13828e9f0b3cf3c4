//! 用户配置（`user_config.json`）
//!
//! 每个键对应一个字符串列表：历史记录按最近使用排列，
//! 开关与数值只用第一个元素。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::{MmdError, Result};

pub const USER_CONFIG_FILE_NAME: &str = "user_config.json";
pub const USER_CONFIG_LEGACY_FILE_NAME: &str = "history.json";

pub const KEY_FPS_LIMIT: &str = "fps_limit";
pub const KEY_LANG: &str = "lang";
pub const KEY_WINDOW_LINKAGE: &str = "window_linkage";
pub const KEY_FRAME_DROP: &str = "frame_drop";

/// 历史记录上限
pub const HISTORY_LIMIT: usize = 50;

const FPS_LIMITS: [i32; 3] = [30, 60, -1];
const LANGS: [&str; 4] = ["ja", "en", "zh", "ko"];

/// 可执行文件所在目录
pub fn app_root_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| MmdError::NotFound(format!("{} 没有父目录", exe.display())))
}

/// 用户配置
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserConfig {
    dir: PathBuf,
    entries: BTreeMap<String, Value>,
}

impl UserConfig {
    /// 读取 `dir` 下的配置；主文件不存在时读取旧的 `history.json`
    pub fn load<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let text = [USER_CONFIG_FILE_NAME, USER_CONFIG_LEGACY_FILE_NAME]
            .iter()
            .find_map(|name| std::fs::read_to_string(dir.join(name)).ok());

        let entries = match text {
            Some(text) => serde_json::from_str::<BTreeMap<String, Value>>(&text).unwrap_or_else(|e| {
                log::warn!("用户配置解析失败，按空配置处理: {}", e);
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };
        Self { dir, entries }
    }

    /// 可执行文件旁的配置
    pub fn load_default() -> Result<Self> {
        Ok(Self::load(app_root_dir()?))
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(USER_CONFIG_FILE_NAME)
    }

    /// 键对应的字符串列表；类型不符时为空
    pub fn values(&self, key: &str) -> Vec<String> {
        let Some(Value::Array(items)) = self.entries.get(key) else {
            return Vec::new();
        };
        let strings: Option<Vec<String>> = items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect();
        strings.unwrap_or_default()
    }

    pub fn first(&self, key: &str) -> Option<String> {
        self.values(key).into_iter().next()
    }

    /// 把 `value` 放到最前，去重并截断到 `limit` 项
    pub fn push(&mut self, key: &str, value: &str, limit: usize) {
        if value.is_empty() || limit == 0 {
            return;
        }
        let mut values = vec![value.to_string()];
        values.extend(self.values(key).into_iter().filter(|v| v != value));
        values.truncate(limit);
        self.entries.insert(
            key.to_string(),
            Value::Array(values.into_iter().map(Value::String).collect()),
        );
    }

    /// 追加一条历史记录
    pub fn push_history(&mut self, key: &str, value: &str) {
        self.push(key, value, HISTORY_LIMIT);
    }

    pub fn save(&self) -> Result<()> {
        let text = serde_json::to_string(&self.entries)?;
        std::fs::write(self.path(), text)?;
        Ok(())
    }

    fn bool_value(&self, key: &str, default: bool) -> bool {
        match self.first(key) {
            Some(v) => v == "ON",
            None => default,
        }
    }

    fn set_bool(&mut self, key: &str, value: bool) {
        self.push(key, if value { "ON" } else { "OFF" }, 1);
    }

    /// 30 / 60 / -1（不限），默认 30
    pub fn fps_limit(&self) -> i32 {
        self.first(KEY_FPS_LIMIT)
            .and_then(|v| v.parse::<i32>().ok())
            .filter(|v| FPS_LIMITS.contains(v))
            .unwrap_or(30)
    }

    pub fn set_fps_limit(&mut self, fps: i32) -> Result<()> {
        if !FPS_LIMITS.contains(&fps) {
            return Err(MmdError::Validate(format!("fps_limit 只能是 30/60/-1: {}", fps)));
        }
        self.push(KEY_FPS_LIMIT, &fps.to_string(), 1);
        Ok(())
    }

    /// ja / en / zh / ko，默认 ja
    pub fn lang(&self) -> String {
        self.first(KEY_LANG)
            .filter(|v| LANGS.contains(&v.as_str()))
            .unwrap_or_else(|| "ja".to_string())
    }

    pub fn set_lang(&mut self, lang: &str) -> Result<()> {
        if !LANGS.contains(&lang) {
            return Err(MmdError::Validate(format!("不支持的语言: {}", lang)));
        }
        self.push(KEY_LANG, lang, 1);
        Ok(())
    }

    pub fn window_linkage(&self) -> bool {
        self.bool_value(KEY_WINDOW_LINKAGE, false)
    }

    pub fn set_window_linkage(&mut self, enabled: bool) {
        self.set_bool(KEY_WINDOW_LINKAGE, enabled);
    }

    pub fn frame_drop(&self) -> bool {
        self.bool_value(KEY_FRAME_DROP, false)
    }

    pub fn set_frame_drop(&mut self, enabled: bool) {
        self.set_bool(KEY_FRAME_DROP, enabled);
    }
}
