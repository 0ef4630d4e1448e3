//! Dyad Core Library
//!
//! Dyad 客户端：两台设备通过账户服务器结成绑定关系（Dyad）。
//!
//! # 模块
//!
//! - **account**: 账户状态和键值持久化
//! - **api**: Web API v1 的请求与响应处理
//! - **executor**: 在 tokio 任务中执行请求，支持取消
//! - **registrar**: 注册状态机、推送 ID 上报
//! - **bond**: 近场通道上的密钥交换与提交
//!
//! # 使用示例
//!
//! ```ignore
//! use dyad_core::{AccountRegistrar, BondCoordinator, ClientConfig, FileAccountStore,
//!     RequestExecutor, StaticIdentityProvider, TcpChannel};
//! use tokio_util::sync::CancellationToken;
//!
//! // 1. 注册账户
//! let executor = RequestExecutor::new(&ClientConfig::load())?;
//! let registrar = AccountRegistrar::new(
//!     executor.clone(),
//!     Arc::new(FileAccountStore::default()),
//!     Arc::new(StaticIdentityProvider::new(oauth_token, "alice@example.org")),
//! )?;
//! let cancel = CancellationToken::new();
//! registrar.register(&cancel).await?;
//!
//! // 2. 与对端交换密钥并提交
//! let mut channel = TcpChannel::connect("192.168.1.20:7000").await?;
//! let coordinator = BondCoordinator::new(executor, registrar.account());
//! let outcome = coordinator.bond(&mut channel, &cancel).await?;
//! ```

pub mod account;
pub mod api;
pub mod bond;
pub mod config;
pub mod error;
pub mod executor;
pub mod registrar;

pub use account::{Account, AccountData, AccountStore, FileAccountStore, MemoryAccountStore};
pub use api::{
    ApiCall, BondCall, BondOutcome, Dyad, DyadsCall, PushTokenCall, RegisterCall, Request,
};
pub use bond::{BondCoordinator, BondingSecret, MemoryChannel, ProximityChannel, TcpChannel};
pub use config::ClientConfig;
pub use error::{DyadError, ErrorKind, Result};
pub use executor::{Pending, RequestExecutor};
pub use registrar::{
    AccountRegistrar, BoxError, ChannelListener, DyadEvent, DyadListener, IdentityGrant,
    IdentityProvider, PushRegistry, PushStatus, RegistrationState, StaticIdentityProvider,
    StaticPushRegistry,
};
