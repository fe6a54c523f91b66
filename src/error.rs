//! 错误处理模块
//! 定义了所有应用级别的错误类型

use crate::config::exit;
use thiserror::Error;

/// 应用主错误类型
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// 配置错误，在任何网络活动之前检测
    #[error("Configuration error: {0}")]
    Config(String),
    /// 运行时创建错误
    #[error("Runtime create error: {0}")]
    RuntimeCreate(String),
    /// 建立连接失败（包括拨号超时）
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    /// 单次读写失败
    #[error("failed to {op} key: {key}, got err: {reason}")]
    Operation {
        op: &'static str,
        key: String,
        reason: String,
    },
    /// 读到的值与写入值不一致
    #[error("value mismatch for key: {key}")]
    ValueMismatch { key: String },
    /// 按前缀删除失败
    #[error("failed to delete prefix {prefix}: {reason}")]
    Cleanup { prefix: String, reason: String },
    /// 协议错误
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// IO错误
    #[error("IO error: {0}")]
    Io(String),
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl AppError {
    /// 对应的进程退出码
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) => exit::BAD_CONFIG,
            _ => exit::ERROR,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, AppError::Config(_))
    }
}

/// 错误上下文扩展trait
pub trait ErrorContext<T> {
    /// 添加上下文信息
    fn with_context(self, context: &str) -> Result<T>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn with_context(self, context: &str) -> Result<T> {
        self.map_err(|e| match e {
            AppError::Config(msg) => AppError::Config(format!("{}: {}", context, msg)),
            AppError::RuntimeCreate(msg) => AppError::RuntimeCreate(format!("{}: {}", context, msg)),
            AppError::Connect { endpoint, reason } => AppError::Connect {
                endpoint,
                reason: format!("{}: {}", context, reason),
            },
            AppError::Operation { op, key, reason } => AppError::Operation {
                op,
                key,
                reason: format!("{}: {}", context, reason),
            },
            AppError::ValueMismatch { key } => AppError::ValueMismatch { key },
            AppError::Cleanup { prefix, reason } => AppError::Cleanup {
                prefix,
                reason: format!("{}: {}", context, reason),
            },
            AppError::Protocol(msg) => AppError::Protocol(format!("{}: {}", context, msg)),
            AppError::Io(msg) => AppError::Io(format!("{}: {}", context, msg)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_split_config_from_runtime() {
        assert_eq!(AppError::Config("x".into()).exit_code(), exit::BAD_CONFIG);
        let op = AppError::Operation {
            op: "put",
            key: "k".into(),
            reason: "boom".into(),
        };
        assert_eq!(op.exit_code(), exit::ERROR);
        assert_eq!(AppError::Io("eof".into()).exit_code(), exit::ERROR);
    }

    #[test]
    fn context_keeps_variant() {
        let res: Result<()> = Err(AppError::Config("bad".into()));
        let err = res.with_context("round 0").unwrap_err();
        assert!(err.is_config());
        assert_eq!(err.to_string(), "Configuration error: round 0: bad");
    }
}
