//! Dyad Web API v1
//!
//! 每个接口对应一个实现了 [`ApiCall`] 的类型：
//!
//! | 调用 | 方法与路径 | 成功状态 |
//! |------|-----------|---------|
//! | [`RegisterCall`] | `POST /v1/register` | 200 / 201 |
//! | [`PushTokenCall`] | `POST /v1/gcm` | 200 |
//! | [`BondCall`] | `POST /v1/bond` | 200 / 202 |
//! | [`DyadsCall`] | `GET /v1/dyads/{session_token}` | 200 |

use crate::account::Account;
use crate::error::{DyadError, Result};
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const AUTH_HEADER: &str = "X-Dyad-Authentication";

const API_VERSION: &str = "v1";

fn api_path(call: &str) -> String {
    format!("/{API_VERSION}/{call}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        }
    }
}

/// 一个构建完成、不可变的 HTTP 请求
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    path: String,
    method: Method,
    body: Option<Value>,
    auth: Option<String>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: Method::Get,
            body: None,
            auth: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            path: path.into(),
            method: Method::Post,
            body: Some(body),
            auth: None,
        }
    }

    /// 添加会话令牌认证头；账户未注册时失败
    pub fn authenticated(mut self, account: &Account) -> Result<Self> {
        let token = account.session_token().ok_or(DyadError::NotRegistered)?;
        self.auth = Some(token);
        Ok(self)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn auth(&self) -> Option<&str> {
        self.auth.as_deref()
    }
}

/// 一次 API 调用：请求本身加上对响应的处理
pub trait ApiCall: Send + Sync + 'static {
    type Output: Send + 'static;

    fn request(&self) -> &Request;

    /// 处理响应。注册调用会在这里把会话令牌写入账户。
    fn finish(self, status: StatusCode, body: &[u8], account: &Account) -> Result<Self::Output>;
}

fn parse_json<T: for<'de> Deserialize<'de>>(status: StatusCode, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        debug!("Unparsable response body ({}): {}", status, e);
        DyadError::server(status, body)
    })
}

/// 用身份提供方的 OAuth 令牌注册账户，对已注册账户同样有效
#[derive(Debug, Clone)]
pub struct RegisterCall {
    request: Request,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    #[serde(alias = "sessionToken")]
    session_token: String,
}

impl RegisterCall {
    pub fn new(auth_token: &str, push_id: Option<&str>) -> Self {
        let mut body = serde_json::json!({ "token": auth_token });
        if let Some(id) = push_id {
            body["c2dm_id"] = Value::from(id);
        }
        Self {
            request: Request::post(api_path("register"), body),
        }
    }
}

impl ApiCall for RegisterCall {
    type Output = String;

    fn request(&self) -> &Request {
        &self.request
    }

    fn finish(self, status: StatusCode, body: &[u8], account: &Account) -> Result<String> {
        match status.as_u16() {
            // 200 登录已有账户，201 新建账户
            200 | 201 => {}
            _ => return Err(DyadError::server(status, body)),
        }
        let response: RegisterResponse = parse_json(status, body)?;
        if response.session_token.is_empty() {
            return Err(DyadError::server(status, body));
        }
        account.set_session_token(Some(response.session_token.clone()));
        Ok(response.session_token)
    }
}

/// 上报设备的推送注册 ID，仅对已注册账户有效
#[derive(Debug, Clone)]
pub struct PushTokenCall {
    request: Request,
}

impl PushTokenCall {
    pub fn new(account: &Account, push_id: &str) -> Result<Self> {
        let request = Request::post(api_path("gcm"), serde_json::json!({ "gcm_id": push_id }))
            .authenticated(account)?;
        Ok(Self { request })
    }
}

impl ApiCall for PushTokenCall {
    type Output = ();

    fn request(&self) -> &Request {
        &self.request
    }

    fn finish(self, status: StatusCode, body: &[u8], _account: &Account) -> Result<()> {
        match status.as_u16() {
            200 => Ok(()),
            _ => Err(DyadError::server(status, body)),
        }
    }
}

/// 提交绑定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondOutcome {
    /// 服务器已收到双方相同的密钥
    Bonded,
    /// 密钥已保存，等待对端提交
    Pending,
}

/// 双方都要提交的绑定请求
#[derive(Debug, Clone)]
pub struct BondCall {
    request: Request,
}

impl BondCall {
    pub fn new(account: &Account, secret: &str) -> Result<Self> {
        let request = Request::post(api_path("bond"), serde_json::json!({ "secret": secret }))
            .authenticated(account)?;
        Ok(Self { request })
    }
}

impl ApiCall for BondCall {
    type Output = BondOutcome;

    fn request(&self) -> &Request {
        &self.request
    }

    fn finish(self, status: StatusCode, body: &[u8], _account: &Account) -> Result<BondOutcome> {
        match status.as_u16() {
            200 => Ok(BondOutcome::Bonded),
            202 => Ok(BondOutcome::Pending),
            _ => Err(DyadError::server(status, body)),
        }
    }
}

/// 账户下的一个 Dyad
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dyad {
    pub id: String,
}

/// 获取账户下的所有 Dyad
#[derive(Debug, Clone)]
pub struct DyadsCall {
    request: Request,
}

impl DyadsCall {
    pub fn new(account: &Account) -> Result<Self> {
        let token = account.session_token().ok_or(DyadError::NotRegistered)?;
        // 令牌作为单个路径段，保留字符需要编码
        let path = format!("{}/{}", api_path("dyads"), urlencoding::encode(&token));
        let request = Request::get(path).authenticated(account)?;
        Ok(Self { request })
    }
}

impl ApiCall for DyadsCall {
    type Output = Vec<Dyad>;

    fn request(&self) -> &Request {
        &self.request
    }

    fn finish(self, status: StatusCode, body: &[u8], _account: &Account) -> Result<Vec<Dyad>> {
        if status != StatusCode::OK {
            return Err(DyadError::server(status, body));
        }
        let items: Vec<Value> = parse_json(status, body)?;
        Ok(items
            .into_iter()
            .map(|item| Dyad {
                id: match item {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
            })
            .collect())
    }
}
