//! 客户端配置和持久化
//!
//! 提供 Dyad 服务器地址、推送 Sender ID 等设置的存储和读取。

use crate::error::{DyadError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 客户端设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Dyad 服务器主机名
    pub server_host: String,
    /// Dyad 服务器端口
    pub server_port: u16,
    /// 是否使用 HTTPS
    pub use_tls: bool,
    /// 推送服务的 Sender ID
    pub push_sender_id: String,
    /// 单个请求的超时时间（秒），为空则不限时
    pub request_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "localhost".to_string(),
            server_port: 8080,
            use_tls: false,
            push_sender_id: String::new(),
            request_timeout_secs: None,
        }
    }
}

impl ClientConfig {
    /// 获取配置目录
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dyad")
    }

    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => {
                        debug!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse config: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// 从 `host:port` 或 `http(s)://host:port` 形式覆盖服务器地址
    pub fn set_server(&mut self, server: &str) -> Result<()> {
        let rest = if let Some(rest) = server.strip_prefix("https://") {
            self.use_tls = true;
            rest
        } else if let Some(rest) = server.strip_prefix("http://") {
            self.use_tls = false;
            rest
        } else {
            server
        };
        let rest = rest.trim_end_matches('/');

        match rest.rsplit_once(':') {
            Some((host, port)) => {
                self.server_host = host.to_string();
                self.server_port = port
                    .parse()
                    .map_err(|_| DyadError::Config(format!("invalid port in {server}")))?;
            }
            None => self.server_host = rest.to_string(),
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_host.is_empty() {
            return Err(DyadError::Config("server_host".to_string()));
        }
        if self.server_port == 0 {
            return Err(DyadError::Config("server_port".to_string()));
        }
        Ok(())
    }

    /// 服务器基础 URL，例如 `http://localhost:8080`
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.server_host, self.server_port)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
