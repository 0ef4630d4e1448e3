//! Dyad CLI
//!
//! 命令行客户端：注册账户、上报推送 ID、列出 Dyad、通过 TCP 与对端绑定。
//!
//! # 日志
//!
//! 默认级别为 `info,dyad_core=debug`，可通过 `RUST_LOG` 覆盖：
//!
//! ```bash
//! RUST_LOG=trace dyad dyads
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dyad_core::{
    Account, AccountRegistrar, AccountStore, BondCoordinator, BondOutcome, ClientConfig, DyadsCall,
    FileAccountStore, PushStatus, RequestExecutor, StaticIdentityProvider, StaticPushRegistry,
    TcpChannel,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dyad", version, about = "Dyad - 设备绑定客户端")]
struct Cli {
    /// 配置文件路径 (默认: ~/.config/dyad/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 覆盖服务器地址，例如 http://localhost:8080
    #[arg(long, global = true)]
    server: Option<String>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 用身份提供方的令牌注册账户
    Register {
        /// OAuth 令牌
        #[arg(long)]
        token: String,
        /// 身份名称 (默认沿用上次注册的名称)
        #[arg(long)]
        name: Option<String>,
    },
    /// 上报推送注册 ID
    Push {
        #[arg(long)]
        id: String,
    },
    /// 列出账户下的 Dyad
    Dyads,
    /// 与附近设备交换密钥并提交绑定
    Bond {
        /// 等待对端连接的地址
        #[arg(long, conflicts_with = "connect", required_unless_present = "connect")]
        listen: Option<String>,
        /// 对端地址
        #[arg(long)]
        connect: Option<String>,
    },
    /// 查看注册状态
    Status,
    /// 清除本地账户
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::config_path);
    let mut config = ClientConfig::load_from(&config_path);
    if let Some(server) = &cli.server {
        config.set_server(server)?;
    }

    let store = Arc::new(FileAccountStore::default());
    let stored_name = store.load()?.identity_name;

    // Ctrl-C 取消进行中的请求
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, canceling...");
            trigger.cancel();
        }
    });

    let executor = RequestExecutor::new(&config).context("invalid configuration")?;

    match cli.command {
        Commands::Register { token, name } => {
            let name = name.or(stored_name).unwrap_or_default();
            let registrar = AccountRegistrar::new(
                executor,
                store,
                Arc::new(StaticIdentityProvider::new(token, name)),
            )?;
            let session = registrar.register(&cancel).await?;
            println!("✅ 注册成功");
            println!("   会话令牌: {}", session);
        }
        Commands::Push { id } => {
            let registrar = AccountRegistrar::new(
                executor,
                store,
                Arc::new(StaticIdentityProvider::new("", "")),
            )?
            .with_push(
                Arc::new(StaticPushRegistry::new(Some(id))),
                config.push_sender_id.clone(),
            );
            match registrar.register_push(&cancel).await? {
                PushStatus::Sent => println!("✅ 推送 ID 已上报"),
                PushStatus::Pending => println!("⏳ 等待推送服务分配 ID"),
            }
        }
        Commands::Dyads => {
            let account = Arc::new(Account::from_data(store.load()?));
            let dyads = executor
                .submit_with_cancel(DyadsCall::new(&account)?, account.clone(), cancel)
                .await?;
            if dyads.is_empty() {
                println!("   暂无 Dyad");
            } else {
                for (i, dyad) in dyads.iter().enumerate() {
                    println!("   [{}] {}", i, dyad.id);
                }
            }
        }
        Commands::Bond { listen, connect } => {
            let account = Arc::new(Account::from_data(store.load()?));
            let coordinator = BondCoordinator::new(executor, account);

            let mut channel = match (listen, connect) {
                (Some(addr), _) => {
                    let listener = tokio::net::TcpListener::bind(&addr)
                        .await
                        .with_context(|| format!("failed to bind {addr}"))?;
                    println!("📡 等待对端连接 {}...", addr);
                    TcpChannel::accept(&listener).await?
                }
                (None, Some(addr)) => TcpChannel::connect(addr).await?,
                (None, None) => anyhow::bail!("either --listen or --connect is required"),
            };

            match coordinator.bond(&mut channel, &cancel).await? {
                BondOutcome::Bonded => println!("✅ 绑定完成"),
                BondOutcome::Pending => println!("⏳ 密钥已提交，等待对端"),
            }
        }
        Commands::Status => {
            let data = store.load()?;
            println!("服务器: {}", config.base_url());
            println!(
                "状态: {}",
                if data.is_registered() { "已注册" } else { "未注册" }
            );
            if let Some(name) = data.identity_name {
                println!("身份: {}", name);
            }
        }
        Commands::Reset => {
            let registrar = AccountRegistrar::new(
                executor,
                store,
                Arc::new(StaticIdentityProvider::new("", "")),
            )?;
            registrar.reset()?;
            println!("🗑️  本地账户已清除");
        }
    }

    Ok(())
}

/// 初始化日志系统
fn init_logging(verbose: bool) {
    // 桥接 log crate（dyad-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let default = if verbose {
        "debug"
    } else {
        "info,dyad_core=debug"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
