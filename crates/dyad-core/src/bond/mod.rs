//! 设备绑定
//!
//! 通道确认后：
//! 1. 生成 32 字节本地密钥并发送给对端
//! 2. 等待对端的密钥
//! 3. 异或合并后提交 `POST /v1/bond`
//!
//! 服务器端的匹配与超时策略不在客户端假设范围内：服务器返回 202 时只把
//! [`BondOutcome::Pending`] 交给调用方，不做轮询。

pub mod channel;
pub mod secret;

pub use channel::{MemoryChannel, ProximityChannel, TcpChannel};
pub use secret::{BondingSecret, SECRET_LENGTH};

use crate::account::Account;
use crate::api::{BondCall, BondOutcome};
use crate::error::{DyadError, Result};
use crate::executor::RequestExecutor;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 绑定协调器
pub struct BondCoordinator {
    executor: RequestExecutor,
    account: Arc<Account>,
}

impl BondCoordinator {
    pub fn new(executor: RequestExecutor, account: Arc<Account>) -> Self {
        Self { executor, account }
    }

    /// 通过已确认的近场通道交换密钥并提交给服务器
    pub async fn bond<P: ProximityChannel + ?Sized>(
        &self,
        channel: &mut P,
        cancel: &CancellationToken,
    ) -> Result<BondOutcome> {
        if !self.account.is_registered() {
            return Err(DyadError::NotRegistered);
        }

        let shared = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DyadError::Canceled),
            res = exchange(channel) => res?,
        };

        let call = BondCall::new(&self.account, &shared.to_base64())?;
        let outcome = self
            .executor
            .submit_with_cancel(call, self.account.clone(), cancel.clone())
            .await
            .inspect_err(|e| warn!("Bond submission failed: {}", e))?;

        info!("Bond submitted: {:?}", outcome);
        Ok(outcome)
    }
}

/// 交换两半密钥并返回合并结果
pub async fn exchange<P: ProximityChannel + ?Sized>(channel: &mut P) -> Result<BondingSecret> {
    let mine = BondingSecret::generate();
    channel.send(mine.as_bytes()).await?;
    debug!("Sent local secret half");

    let theirs = channel.recv().await?;
    let theirs = BondingSecret::from_bytes(&theirs)?;
    debug!("Received peer secret half");

    Ok(mine.combine(&theirs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_exchange_yields_same_secret() {
        let (mut a, mut b) = MemoryChannel::pair();
        let (left, right) = tokio::join!(exchange(&mut a), exchange(&mut b));
        assert_eq!(left.unwrap(), right.unwrap());
    }

    #[tokio::test]
    async fn test_exchange_rejects_short_peer_half() {
        let (mut a, mut b) = MemoryChannel::pair();
        let peer = tokio::spawn(async move {
            b.recv().await.unwrap();
            b.send(&[1, 2, 3]).await.unwrap();
        });
        let err = exchange(&mut a).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSecret);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_bond_requires_registration() {
        let executor = RequestExecutor::new(&ClientConfig::default()).unwrap();
        let coordinator = BondCoordinator::new(executor, Arc::new(Account::new()));
        let (mut a, _b) = MemoryChannel::pair();

        let err = coordinator
            .bond(&mut a, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRegistered);
    }

    #[tokio::test]
    async fn test_bond_canceled_while_waiting_for_peer() {
        let executor = RequestExecutor::new(&ClientConfig::default()).unwrap();
        let account = Arc::new(Account::new());
        account.set_session_token(Some("tok".to_string()));
        let coordinator = BondCoordinator::new(executor, account);

        // 对端永远不回应
        let (mut a, _b) = MemoryChannel::pair();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = coordinator.bond(&mut a, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canceled);
    }
}
