//! 只读应用配置

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{MmdError, Result};

pub const APP_CONFIG_FILE_PATH: &str = "app/app_config.json";

const DEFAULT_CURSOR_POSITION_LIMIT: i32 = 100;

/// 运行环境
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    #[default]
    Dev,
    Stg,
    Prod,
}

impl AppEnv {
    /// 构建时指定的环境名；无法识别时返回 `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "debug" => Some(AppEnv::Dev),
            "stg" => Some(AppEnv::Stg),
            "prod" => Some(AppEnv::Prod),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WindowSize {
    pub width: i32,
    pub height: i32,
}

/// 应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAppConfig", rename_all = "PascalCase")]
pub struct AppConfig {
    pub app_name: String,
    pub version: String,
    pub env: AppEnv,
    pub horizontal: bool,
    pub control_window_size: WindowSize,
    pub viewer_window_size: WindowSize,
    pub close_confirm: bool,
    pub icon_image_path: String,
    pub cursor_position_limit: i32,
}

impl Default for AppConfig {
    fn default() -> Self {
        RawAppConfig::default().into()
    }
}

/// 磁盘格式，兼容旧键 `Name` / `ViewWindowSize`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawAppConfig {
    app_name: Option<String>,
    name: Option<String>,
    version: String,
    env: Option<String>,
    horizontal: bool,
    control_window_size: WindowSize,
    viewer_window_size: Option<WindowSize>,
    view_window_size: Option<WindowSize>,
    close_confirm: bool,
    icon_image_path: String,
    cursor_position_limit: i32,
}

impl From<RawAppConfig> for AppConfig {
    fn from(raw: RawAppConfig) -> Self {
        let env = match raw.env.as_deref() {
            None | Some("") => AppEnv::Dev,
            Some(v) => AppEnv::parse(v).unwrap_or_else(|| {
                log::warn!("未知的 Env '{}'，按 dev 处理", v);
                AppEnv::Dev
            }),
        };
        let cursor_position_limit = if raw.cursor_position_limit > 0 {
            raw.cursor_position_limit
        } else {
            DEFAULT_CURSOR_POSITION_LIMIT
        };
        Self {
            app_name: raw.app_name.or(raw.name).unwrap_or_default(),
            version: raw.version,
            env,
            horizontal: raw.horizontal,
            control_window_size: raw.control_window_size,
            viewer_window_size: raw.viewer_window_size.or(raw.view_window_size).unwrap_or_default(),
            close_confirm: raw.close_confirm,
            icon_image_path: raw.icon_image_path,
            cursor_position_limit,
        }
    }
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MmdError::NotFound(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        log::debug!("应用配置: {} {} ({:?})", config.app_name, config.version, config.env);
        Ok(config)
    }

    /// 以构建时环境覆盖；空值或未知值保持原样
    pub fn apply_build_env(&mut self, build_env: &str) {
        if let Some(env) = AppEnv::parse(build_env) {
            self.env = env;
        }
    }

    pub fn is_dev(&self) -> bool {
        self.env == AppEnv::Dev
    }

    pub fn is_prod(&self) -> bool {
        self.env == AppEnv::Prod
    }
}
