//! 应用配置与用户配置
//!
//! - [`AppConfig`]：随程序发布的只读配置（`app/app_config.json`）
//! - [`UserConfig`]：可执行文件旁的 `user_config.json`，值都是字符串列表

mod app;
mod user;

pub use app::{AppConfig, AppEnv, WindowSize, APP_CONFIG_FILE_PATH};
pub use user::{
    app_root_dir, UserConfig, HISTORY_LIMIT, KEY_FPS_LIMIT, KEY_FRAME_DROP, KEY_LANG,
    KEY_WINDOW_LINKAGE, USER_CONFIG_FILE_NAME, USER_CONFIG_LEGACY_FILE_NAME,
};
