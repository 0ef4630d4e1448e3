//! 请求执行器
//!
//! 每个请求作为一个独立的 tokio 任务执行，调用方从不阻塞。结果通过
//! [`Pending`] 交回给等待它的任务；并发请求之间没有顺序保证。

use crate::account::Account;
use crate::api::{AUTH_HEADER, ApiCall};
use crate::config::ClientConfig;
use crate::error::{DyadError, Result};
use log::{debug, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 执行 Dyad API 调用的客户端，内部复用一个连接池
#[derive(Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl RequestExecutor {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        // 3xx 按服务器错误处理，认证头不会被转发到其他主机
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("dyad/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 在后台任务中执行调用，立即返回
    pub fn submit<C: ApiCall>(&self, call: C, account: Arc<Account>) -> Pending<C::Output> {
        self.submit_with_cancel(call, account, CancellationToken::new())
    }

    /// 同 [`submit`](Self::submit)，但使用调用方提供的取消令牌
    pub fn submit_with_cancel<C: ApiCall>(
        &self,
        call: C,
        account: Arc<Account>,
        cancel: CancellationToken,
    ) -> Pending<C::Output> {
        let executor = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(DyadError::Canceled),
                res = executor.execute(call, &account) => res,
            }
        });
        Pending { handle, cancel }
    }

    /// 在当前任务中执行调用
    pub async fn execute<C: ApiCall>(&self, call: C, account: &Account) -> Result<C::Output> {
        let request = call.request();
        let url = format!("{}{}", self.base_url, request.path());
        debug!("{:?} {}", request.method(), url);

        let mut builder = self.client.request(request.method().into(), &url);
        if let Some(token) = request.auth() {
            builder = builder.header(AUTH_HEADER, token);
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!("Request to {} failed: {}", url, e);
            DyadError::Network(e)
        })?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!("{} -> {} ({} bytes)", url, status, body.len());

        if !status.is_success() {
            warn!("Server rejected {}: {}", url, status);
            return Err(DyadError::server(status, &body));
        }

        call.finish(status, &body, account)
    }
}

/// 一个正在执行的请求
///
/// 实现了 `Future`，也可以通过 [`cancel`](Self::cancel) 提前中止。
pub struct Pending<T> {
    handle: JoinHandle<Result<T>>,
    cancel: CancellationToken,
}

impl<T> Pending<T> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(e)) => {
                warn!("Request task did not complete: {}", e);
                Poll::Ready(Err(DyadError::Canceled))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RegisterCall;
    use crate::error::ErrorKind;

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ClientConfig {
            server_port: 0,
            ..Default::default()
        };
        assert!(matches!(
            RequestExecutor::new(&config),
            Err(DyadError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        // 绑定后立即释放，端口上不再有监听者
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = ClientConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: port,
            ..Default::default()
        };
        let executor = RequestExecutor::new(&config).unwrap();
        let account = Arc::new(Account::new());

        let err = executor
            .submit(RegisterCall::new("oauth", None), account.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!account.is_registered());
    }

    #[tokio::test]
    async fn test_cancel_before_completion() {
        let config = ClientConfig {
            // TEST-NET-1，连接会一直挂起
            server_host: "192.0.2.1".to_string(),
            ..Default::default()
        };
        let executor = RequestExecutor::new(&config).unwrap();
        let pending = executor.submit(RegisterCall::new("oauth", None), Arc::new(Account::new()));
        pending.cancel();
        assert_eq!(pending.await.unwrap_err().kind(), ErrorKind::Canceled);
    }
}
