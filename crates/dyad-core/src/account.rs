//! 账户状态和持久化
//!
//! 账户的全部状态都保存在服务器端。注册完成后本地只需保留会话令牌和
//! 身份名称两个字符串。

use crate::error::Result;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError, RwLock};

pub const KEY_SESSION_TOKEN: &str = "session_token";
pub const KEY_IDENTITY_NAME: &str = "identity_name";

/// 持久化的账户数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_name: Option<String>,
}

impl AccountData {
    pub fn is_registered(&self) -> bool {
        self.session_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Dyad 账户
///
/// 通过 `Arc<Account>` 在请求任务之间共享；注册响应会直接写入会话令牌。
#[derive(Debug, Default)]
pub struct Account {
    data: RwLock<AccountData>,
}

impl Account {
    /// 创建一个尚未注册的账户
    pub fn new() -> Self {
        Self::default()
    }

    /// 用已有的数据重建账户（例如从存储中读取）
    pub fn from_data(data: AccountData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub fn snapshot(&self) -> AccountData {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_registered(&self) -> bool {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_registered()
    }

    /// 已注册时返回会话令牌
    pub fn session_token(&self) -> Option<String> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.session_token.clone().filter(|t| !t.is_empty())
    }

    pub fn identity_name(&self) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .identity_name
            .clone()
    }

    pub fn set_session_token(&self, token: Option<String>) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .session_token = token;
    }

    pub fn set_identity_name(&self, name: Option<String>) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .identity_name = name;
    }

    /// 整体替换账户数据
    pub fn restore(&self, data: AccountData) {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = data;
    }

    pub fn clear(&self) {
        self.restore(AccountData::default());
    }
}

/// 账户的键值存储
pub trait AccountStore: Send + Sync {
    fn load(&self) -> Result<AccountData>;
    fn save(&self, data: &AccountData) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// 基于 TOML 文件的存储，默认位于 `~/.config/dyad/account.toml`
pub struct FileAccountStore {
    path: PathBuf,
}

impl FileAccountStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> PathBuf {
        crate::config::ClientConfig::config_dir().join("account.toml")
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Default for FileAccountStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

impl AccountStore for FileAccountStore {
    fn load(&self) -> Result<AccountData> {
        if !self.path.exists() {
            return Ok(AccountData::default());
        }
        let content = fs::read_to_string(&self.path)?;
        let values: HashMap<String, String> = toml::from_str(&content)?;
        debug!("Loaded account from {:?}", self.path);
        Ok(AccountData {
            session_token: values.get(KEY_SESSION_TOKEN).cloned(),
            identity_name: values.get(KEY_IDENTITY_NAME).cloned(),
        })
    }

    fn save(&self, data: &AccountData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(data)?;
        fs::write(&self.path, content)?;
        debug!("Saved account to {:?}", self.path);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 内存存储，进程退出即丢失
#[derive(Default)]
pub struct MemoryAccountStore {
    data: Mutex<AccountData>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryAccountStore {
    fn load(&self) -> Result<AccountData> {
        Ok(self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, data: &AccountData) -> Result<()> {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = data.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = AccountData::default();
        Ok(())
    }
}
