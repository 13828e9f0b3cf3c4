//! 错误分类与错误 ID 登记表
//!
//! 每个 [`MmdError`] 归入五类之一，并带有固定的五位错误 ID。
//! 致命错误对话框 / 日志行通过 [`lookup`] 取得摘要与处理建议。

use std::fmt;

use crate::MmdError;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 输入超出定义域
    Validate,
    /// 缺少骨骼 / 纹理 / 关键帧名
    NotFound,
    /// 未知的 PMX/VMD 版本字段
    NotSupported,
    /// IO、操作系统、图形、物理失败
    External,
    /// 不变量断言失败
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validate => "validate",
            ErrorKind::NotFound => "not-found",
            ErrorKind::NotSupported => "not-supported",
            ErrorKind::External => "external",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// 登记表条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRecord {
    pub id: u32,
    pub kind: ErrorKind,
    pub summary: &'static str,
    pub remedy: &'static str,
}

pub const ID_VALIDATE: u32 = 95101;
pub const ID_PMX_PARSE: u32 = 95201;
pub const ID_VMD_PARSE: u32 = 95202;
pub const ID_UNSUPPORTED: u32 = 95203;
pub const ID_NOT_FOUND: u32 = 95204;
pub const ID_PHYSICS: u32 = 95301;
pub const ID_INTERNAL: u32 = 95901;
pub const ID_IO: u32 = 99001;
pub const ID_JSON: u32 = 99002;

static REGISTRY: &[ErrorRecord] = &[
    ErrorRecord {
        id: ID_VALIDATE,
        kind: ErrorKind::Validate,
        summary: "入力値が範囲外です",
        remedy: "Check the value against the documented range and retry.",
    },
    ErrorRecord {
        id: ID_PMX_PARSE,
        kind: ErrorKind::Validate,
        summary: "PMX ファイルの読み込みに失敗しました",
        remedy: "Re-export the model from PMXEditor and load it again.",
    },
    ErrorRecord {
        id: ID_VMD_PARSE,
        kind: ErrorKind::Validate,
        summary: "VMD ファイルの読み込みに失敗しました",
        remedy: "Re-save the motion from MikuMikuDance and load it again.",
    },
    ErrorRecord {
        id: ID_UNSUPPORTED,
        kind: ErrorKind::NotSupported,
        summary: "未対応のファイル形式です",
        remedy: "Only PMX 2.0/2.1 models and VMD motions are supported.",
    },
    ErrorRecord {
        id: ID_NOT_FOUND,
        kind: ErrorKind::NotFound,
        summary: "対象が見つかりません",
        remedy: "Make sure the referenced bone, morph or file exists.",
    },
    ErrorRecord {
        id: ID_PHYSICS,
        kind: ErrorKind::External,
        summary: "物理演算に失敗しました",
        remedy: "Reset physics; the next frame retries the simulation.",
    },
    ErrorRecord {
        id: ID_INTERNAL,
        kind: ErrorKind::Internal,
        summary: "内部エラーが発生しました",
        remedy: "Save the console log and report it together with the files used.",
    },
    ErrorRecord {
        id: ID_IO,
        kind: ErrorKind::External,
        summary: "ファイルの入出力に失敗しました",
        remedy: "Check that the path exists and is readable.",
    },
    ErrorRecord {
        id: ID_JSON,
        kind: ErrorKind::External,
        summary: "設定ファイルの解析に失敗しました",
        remedy: "Fix or delete the configuration file; defaults are used when it is missing.",
    },
];

/// 按错误 ID 查表
pub fn lookup(id: u32) -> Option<&'static ErrorRecord> {
    REGISTRY.iter().find(|r| r.id == id)
}

impl MmdError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MmdError::Validate(_) | MmdError::PmxParse(_) | MmdError::VmdParse(_) => {
                ErrorKind::Validate
            }
            MmdError::NotFound(_) => ErrorKind::NotFound,
            MmdError::Unsupported(_) => ErrorKind::NotSupported,
            MmdError::Io(_) | MmdError::Json(_) | MmdError::Physics(_) => ErrorKind::External,
            MmdError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            MmdError::Io(_) => ID_IO,
            MmdError::Json(_) => ID_JSON,
            MmdError::PmxParse(_) => ID_PMX_PARSE,
            MmdError::VmdParse(_) => ID_VMD_PARSE,
            MmdError::Unsupported(_) => ID_UNSUPPORTED,
            MmdError::NotFound(_) => ID_NOT_FOUND,
            MmdError::Validate(_) => ID_VALIDATE,
            MmdError::Physics(_) => ID_PHYSICS,
            MmdError::Internal(_) => ID_INTERNAL,
        }
    }

    /// 登记表中的条目（所有变体都已登记）
    pub fn record(&self) -> Option<&'static ErrorRecord> {
        lookup(self.id())
    }

    /// `[id] summary: remedy` 形式的一行说明
    pub fn describe(&self) -> String {
        match self.record() {
            Some(r) => format!("[{}] {}: {} ({})", r.id, r.summary, r.remedy, self),
            None => format!("[{}] {}", self.id(), self),
        }
    }
}
