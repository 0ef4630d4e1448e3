//! 账户注册
//!
//! 状态机：`Unregistered → TokenPending → Registered`。
//!
//! 1. 向身份提供方请求 OAuth 令牌（外部调用，期间处于 `TokenPending`）
//! 2. 用该令牌调用 `POST /v1/register` 换取会话令牌
//! 3. 保存账户并通知监听者
//!
//! 任一步骤失败都会回到 `Unregistered` 并把错误交给调用方，不会自动重试。

use crate::account::{Account, AccountStore};
use crate::api::{PushTokenCall, RegisterCall};
use crate::error::{DyadError, Result};
use crate::executor::RequestExecutor;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 身份提供方返回的授权结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityGrant {
    /// OAuth 令牌
    pub auth_token: String,
    /// 用户选择的身份名称（例如邮箱）
    pub account_name: String,
}

/// 外部身份提供方（OAuth）
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// 获取授权令牌
    ///
    /// `account_name` 为上次注册时使用的身份；为空时由提供方让用户选择。
    async fn auth_token(
        &self,
        account_name: Option<&str>,
    ) -> std::result::Result<IdentityGrant, BoxError>;
}

/// 固定令牌的身份提供方，用于命令行和测试
pub struct StaticIdentityProvider {
    grant: IdentityGrant,
}

impl StaticIdentityProvider {
    pub fn new(auth_token: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            grant: IdentityGrant {
                auth_token: auth_token.into(),
                account_name: account_name.into(),
            },
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn auth_token(
        &self,
        _account_name: Option<&str>,
    ) -> std::result::Result<IdentityGrant, BoxError> {
        Ok(self.grant.clone())
    }
}

/// 外部推送服务
#[async_trait]
pub trait PushRegistry: Send + Sync {
    /// 设备当前的推送注册 ID
    async fn registration_id(&self) -> Option<String>;

    /// 向推送服务发起注册，ID 稍后通过 [`AccountRegistrar::send_push_id`] 上报
    async fn register(&self, sender_id: &str) -> std::result::Result<(), BoxError>;
}

/// 已知注册 ID 的推送服务
pub struct StaticPushRegistry {
    id: Option<String>,
}

impl StaticPushRegistry {
    pub fn new(id: Option<String>) -> Self {
        Self { id }
    }
}

#[async_trait]
impl PushRegistry for StaticPushRegistry {
    async fn registration_id(&self) -> Option<String> {
        self.id.clone()
    }

    async fn register(&self, _sender_id: &str) -> std::result::Result<(), BoxError> {
        Err("no push service available".into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    /// 身份提供方调用进行中
    TokenPending,
    Registered,
}

/// 推送注册结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// 注册 ID 已上报服务器
    Sent,
    /// 已向推送服务发起注册，尚无 ID
    Pending,
}

/// 注册事件监听器
pub trait DyadListener: Send + Sync {
    fn on_registered(&self, _identity_name: &str) {}
    fn on_registration_failed(&self, _error: &DyadError) {}
    fn on_push_registered(&self) {}
    fn on_push_registration_failed(&self, _error: &DyadError) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DyadEvent {
    Registered { identity_name: String },
    RegistrationFailed(String),
    PushRegistered,
    PushRegistrationFailed(String),
}

/// 把监听器回调转发到 channel
pub struct ChannelListener {
    tx: mpsc::Sender<DyadEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::Receiver<DyadEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (Self { tx }, rx)
    }
}

impl DyadListener for ChannelListener {
    fn on_registered(&self, identity_name: &str) {
        let _ = self.tx.try_send(DyadEvent::Registered {
            identity_name: identity_name.to_string(),
        });
    }

    fn on_registration_failed(&self, error: &DyadError) {
        let _ = self
            .tx
            .try_send(DyadEvent::RegistrationFailed(error.to_string()));
    }

    fn on_push_registered(&self) {
        let _ = self.tx.try_send(DyadEvent::PushRegistered);
    }

    fn on_push_registration_failed(&self, error: &DyadError) {
        let _ = self
            .tx
            .try_send(DyadEvent::PushRegistrationFailed(error.to_string()));
    }
}

/// 注册进行期间持有；未解除就被丢弃（例如 future 被取消）时状态回到 `Unregistered`
struct PendingGuard<'a> {
    state: &'a Mutex<RegistrationState>,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Registration dropped before completion");
            *self.state.lock().unwrap_or_else(PoisonError::into_inner) =
                RegistrationState::Unregistered;
        }
    }
}

/// 账户注册器
pub struct AccountRegistrar {
    executor: RequestExecutor,
    account: Arc<Account>,
    store: Arc<dyn AccountStore>,
    identity: Arc<dyn IdentityProvider>,
    push: Option<Arc<dyn PushRegistry>>,
    push_sender_id: String,
    state: Mutex<RegistrationState>,
    listeners: Mutex<Vec<Arc<dyn DyadListener>>>,
}

impl AccountRegistrar {
    /// 创建注册器，并从存储中恢复账户
    pub fn new(
        executor: RequestExecutor,
        store: Arc<dyn AccountStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        let account = Arc::new(Account::from_data(store.load()?));
        let state = if account.is_registered() {
            debug!("Restored registered account");
            RegistrationState::Registered
        } else {
            debug!("No stored session token");
            RegistrationState::Unregistered
        };

        Ok(Self {
            executor,
            account,
            store,
            identity,
            push: None,
            push_sender_id: String::new(),
            state: Mutex::new(state),
            listeners: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn with_push(
        mut self,
        registry: Arc<dyn PushRegistry>,
        sender_id: impl Into<String>,
    ) -> Self {
        self.push = Some(registry);
        self.push_sender_id = sender_id.into();
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn DyadListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn account(&self) -> Arc<Account> {
        self.account.clone()
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn state(&self) -> RegistrationState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RegistrationState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn notify(&self, f: impl Fn(&dyn DyadListener)) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }

    /// 注册（或重新注册）账户，返回新的会话令牌
    pub async fn register(&self, cancel: &CancellationToken) -> Result<String> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == RegistrationState::TokenPending {
                return Err(DyadError::RegistrationInProgress);
            }
            *state = RegistrationState::TokenPending;
        }
        let guard = PendingGuard {
            state: &self.state,
            armed: true,
        };
        info!("Starting registration");

        let result = self.run_registration(cancel).await;
        guard.disarm();
        match result {
            Ok((token, identity_name)) => {
                self.set_state(RegistrationState::Registered);
                info!("Registered as {}", identity_name);
                self.notify(|l| l.on_registered(&identity_name));
                Ok(token)
            }
            Err(e) => {
                self.set_state(RegistrationState::Unregistered);
                warn!("Registration failed: {}", e);
                self.notify(|l| l.on_registration_failed(&e));
                Err(e)
            }
        }
    }

    async fn run_registration(&self, cancel: &CancellationToken) -> Result<(String, String)> {
        let remembered = self.account.identity_name();
        let grant = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DyadError::Canceled),
            res = self.identity.auth_token(remembered.as_deref()) => {
                res.map_err(|e| DyadError::IdentityProvider(e.to_string()))?
            }
        };
        debug!("Got auth token for {}", grant.account_name);

        let push_id = match &self.push {
            Some(push) => push.registration_id().await,
            None => None,
        };

        let previous = self.account.snapshot();
        let call = RegisterCall::new(&grant.auth_token, push_id.as_deref());
        let token = self
            .executor
            .submit_with_cancel(call, self.account.clone(), cancel.clone())
            .await?;

        // 内存中的账户只在保存成功后才换成新令牌
        self.account.set_identity_name(Some(grant.account_name.clone()));
        if let Err(e) = self.store.save(&self.account.snapshot()) {
            self.account.restore(previous);
            return Err(e);
        }
        Ok((token, grant.account_name))
    }

    /// 向服务器上报推送注册 ID；设备尚无 ID 时先向推送服务发起注册
    pub async fn register_push(&self, cancel: &CancellationToken) -> Result<PushStatus> {
        let res = self.run_push_registration(cancel).await;
        if let Err(e) = &res {
            warn!("Push registration failed: {}", e);
            self.notify(|l| l.on_push_registration_failed(e));
        }
        res
    }

    async fn run_push_registration(&self, cancel: &CancellationToken) -> Result<PushStatus> {
        let push = self
            .push
            .as_ref()
            .ok_or_else(|| DyadError::Config("push registry".to_string()))?;

        match push.registration_id().await {
            Some(id) => {
                self.upload_push_id(&id, cancel).await?;
                Ok(PushStatus::Sent)
            }
            None => {
                if self.push_sender_id.is_empty() {
                    return Err(DyadError::Config("push_sender_id".to_string()));
                }
                debug!("No push id yet, registering with sender {}", self.push_sender_id);
                push.register(&self.push_sender_id)
                    .await
                    .map_err(|e| DyadError::PushRegistry(e.to_string()))?;
                Ok(PushStatus::Pending)
            }
        }
    }

    /// 推送服务回调新的注册 ID 时调用
    pub async fn send_push_id(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let res = self.upload_push_id(id, cancel).await;
        if let Err(e) = &res {
            warn!("Push id upload failed: {}", e);
            self.notify(|l| l.on_push_registration_failed(e));
        }
        res
    }

    async fn upload_push_id(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let call = PushTokenCall::new(&self.account, id)?;
        self.executor
            .submit_with_cancel(call, self.account.clone(), cancel.clone())
            .await?;
        info!("Push id registered with server");
        self.notify(|l| l.on_push_registered());
        Ok(())
    }

    /// 清除本地账户
    pub fn reset(&self) -> Result<()> {
        info!("Resetting account");
        self.account.clear();
        self.store.clear()?;
        self.set_state(RegistrationState::Unregistered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountData, MemoryAccountStore};
    use crate::config::ClientConfig;
    use crate::error::ErrorKind;

    struct FailingProvider;

    #[async_trait]
    impl IdentityProvider for FailingProvider {
        async fn auth_token(
            &self,
            _account_name: Option<&str>,
        ) -> std::result::Result<IdentityGrant, BoxError> {
            Err("user canceled account picker".into())
        }
    }

    /// 第一次调用永不返回，之后的调用直接失败
    #[derive(Default)]
    struct StallingProvider {
        called: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl IdentityProvider for StallingProvider {
        async fn auth_token(
            &self,
            _account_name: Option<&str>,
        ) -> std::result::Result<IdentityGrant, BoxError> {
            if !self.called.swap(true, std::sync::atomic::Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Err("account picker closed".into())
        }
    }

    fn executor() -> RequestExecutor {
        RequestExecutor::new(&ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_state_restored_from_store() {
        let store = Arc::new(MemoryAccountStore::new());
        store
            .save(&AccountData {
                session_token: Some("tok".to_string()),
                identity_name: Some("bob".to_string()),
            })
            .unwrap();

        let registrar = AccountRegistrar::new(
            executor(),
            store.clone(),
            Arc::new(StaticIdentityProvider::new("oauth", "bob")),
        )
        .unwrap();
        assert_eq!(registrar.state(), RegistrationState::Registered);
        assert_eq!(registrar.account().session_token().as_deref(), Some("tok"));

        registrar.reset().unwrap();
        assert_eq!(registrar.state(), RegistrationState::Unregistered);
        assert!(!registrar.account().is_registered());
        assert_eq!(store.load().unwrap(), AccountData::default());
    }

    #[tokio::test]
    async fn test_identity_failure_returns_to_unregistered() {
        let registrar = AccountRegistrar::new(
            executor(),
            Arc::new(MemoryAccountStore::new()),
            Arc::new(FailingProvider),
        )
        .unwrap();
        let (listener, mut rx) = ChannelListener::new();
        registrar.add_listener(Arc::new(listener));

        let err = registrar
            .register(&CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentityProvider);
        assert_eq!(registrar.state(), RegistrationState::Unregistered);
        assert!(matches!(
            rx.recv().await,
            Some(DyadEvent::RegistrationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_push_requires_registry_and_sender() {
        let registrar = AccountRegistrar::new(
            executor(),
            Arc::new(MemoryAccountStore::new()),
            Arc::new(StaticIdentityProvider::new("oauth", "bob")),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        assert_eq!(
            registrar.register_push(&cancel).await.unwrap_err().kind(),
            ErrorKind::Config
        );

        let registrar = registrar.with_push(Arc::new(StaticPushRegistry::new(None)), "");
        assert_eq!(
            registrar.register_push(&cancel).await.unwrap_err().kind(),
            ErrorKind::Config
        );

        let registrar = registrar.with_push(Arc::new(StaticPushRegistry::new(None)), "42");
        assert_eq!(
            registrar.register_push(&cancel).await.unwrap_err().kind(),
            ErrorKind::PushRegistry
        );

        // 有 ID 但账户未注册
        let registrar =
            registrar.with_push(Arc::new(StaticPushRegistry::new(Some("reg-1".into()))), "42");
        assert_eq!(
            registrar.register_push(&cancel).await.unwrap_err().kind(),
            ErrorKind::NotRegistered
        );
    }

    #[tokio::test]
    async fn test_canceled_registration() {
        let registrar = AccountRegistrar::new(
            executor(),
            Arc::new(MemoryAccountStore::new()),
            Arc::new(StaticIdentityProvider::new("oauth", "bob")),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            registrar.register(&cancel).await.unwrap_err().kind(),
            ErrorKind::Canceled
        );
        assert_eq!(registrar.state(), RegistrationState::Unregistered);
    }

    #[tokio::test]
    async fn test_dropped_registration_returns_to_unregistered() {
        let registrar = AccountRegistrar::new(
            executor(),
            Arc::new(MemoryAccountStore::new()),
            Arc::new(StallingProvider::default()),
        )
        .unwrap();
        let cancel = CancellationToken::new();

        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            registrar.register(&cancel),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(registrar.state(), RegistrationState::Unregistered);

        // 下一次注册可以正常开始
        assert_eq!(
            registrar.register(&cancel).await.unwrap_err().kind(),
            ErrorKind::IdentityProvider
        );
        assert_eq!(registrar.state(), RegistrationState::Unregistered);
    }
}
