//! 错误类型
//!
//! 所有错误都通过返回值交给调用方，库内部不做任何重试或恢复。

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DyadError>;

/// 错误类别，用于调用方按类别分支
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Server,
    NotRegistered,
    IdentityProvider,
    PushRegistry,
    RegistrationInProgress,
    Channel,
    InvalidSecret,
    Canceled,
    Config,
    Storage,
}

#[derive(Debug, Error)]
pub enum DyadError {
    /// 传输层失败（连接、DNS、读写）
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// 服务器返回了非预期的状态码或无法解析的响应体
    #[error("server responded with status {status}: {body}")]
    Server { status: u16, body: String },

    #[error("account is not registered")]
    NotRegistered,

    #[error("identity provider failed: {0}")]
    IdentityProvider(String),

    #[error("push registration failed: {0}")]
    PushRegistry(String),

    #[error("a registration is already in progress")]
    RegistrationInProgress,

    /// 近场通道断开或读写失败
    #[error("proximity channel: {0}")]
    Channel(String),

    #[error("bonding secret must be 32 bytes, got {0}")]
    InvalidSecret(usize),

    #[error("request canceled")]
    Canceled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("failed to parse stored data: {0}")]
    Decode(#[from] toml::de::Error),

    #[error("failed to serialize stored data: {0}")]
    Encode(#[from] toml::ser::Error),
}

impl DyadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DyadError::Network(_) => ErrorKind::Network,
            DyadError::Server { .. } => ErrorKind::Server,
            DyadError::NotRegistered => ErrorKind::NotRegistered,
            DyadError::IdentityProvider(_) => ErrorKind::IdentityProvider,
            DyadError::PushRegistry(_) => ErrorKind::PushRegistry,
            DyadError::RegistrationInProgress => ErrorKind::RegistrationInProgress,
            DyadError::Channel(_) => ErrorKind::Channel,
            DyadError::InvalidSecret(_) => ErrorKind::InvalidSecret,
            DyadError::Canceled => ErrorKind::Canceled,
            DyadError::Config(_) => ErrorKind::Config,
            DyadError::Storage(_) | DyadError::Decode(_) | DyadError::Encode(_) => {
                ErrorKind::Storage
            }
        }
    }

    pub(crate) fn server(status: reqwest::StatusCode, body: &[u8]) -> Self {
        DyadError::Server {
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_keeps_raw_body() {
        let err = DyadError::server(reqwest::StatusCode::FORBIDDEN, b"{\"error\":\"nope\"}");
        assert_eq!(err.kind(), ErrorKind::Server);
        match err {
            DyadError::Server { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "{\"error\":\"nope\"}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_storage_kinds() {
        let io = DyadError::from(std::io::Error::other("disk"));
        assert_eq!(io.kind(), ErrorKind::Storage);
        assert_eq!(DyadError::Canceled.kind(), ErrorKind::Canceled);
    }
}
