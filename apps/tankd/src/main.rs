//! # tankd
//!
//! 坦克本机控制程序：单线程协作式调度生成履带 PWM、舵机脉冲和超声波时序，
//! 同时接受本机键盘和 TCP 遥控客户端的命令。
//!
//! ```bash
//! # 使用默认接线和默认配置文件位置
//! tankd
//!
//! # 不访问硬件的演练
//! tankd --mock --listen 127.0.0.1:8888
//! ```
//!
//! 日志写到 stderr，状态行写到 stdout。

mod config;
mod control;
mod server;
mod tank;

use anyhow::{Context, Result};
use clap::Parser;
use config::TankConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tank::Tank;
use tank_gpio::MockProvider;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 坦克控制程序
#[derive(Parser, Debug)]
#[command(name = "tankd")]
#[command(about = "Tank control program - software PWM drive with keyboard and TCP remote control", long_about = None)]
#[command(version)]
struct Args {
    /// 配置文件路径
    ///
    /// 默认: <config_dir>/tank/tankd.toml，不存在时使用内置默认值
    #[arg(long)]
    config: Option<PathBuf>,

    /// TCP 监听地址（覆盖配置文件）
    ///
    /// 格式: IP:PORT (例如: 0.0.0.0:8888)
    #[arg(long)]
    listen: Option<String>,

    /// 使用 mock GPIO 后端（不访问硬件）
    #[arg(long)]
    mock: bool,

    /// 不读取本机键盘
    #[arg(long)]
    no_keyboard: bool,

    /// 存活检查窗口（秒，覆盖配置文件）
    #[arg(long)]
    keepalive_secs: Option<u64>,

    /// GPIO 字符设备所在目录
    #[arg(long, default_value = "/dev")]
    dev_root: PathBuf,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tankd=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(target_os = "linux")]
fn assemble_hardware(config: &TankConfig, dev_root: &Path) -> Result<Tank> {
    let mut provider = tank_gpio::CdevProvider::new(dev_root);
    Tank::assemble(config, &mut provider)
}

#[cfg(not(target_os = "linux"))]
fn assemble_hardware(_config: &TankConfig, _dev_root: &Path) -> Result<Tank> {
    anyhow::bail!("GPIO character devices are only available on Linux, use --mock")
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let mut config = TankConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(secs) = args.keepalive_secs {
        config.server.keepalive_secs = secs;
    }
    let listen: SocketAddr = config
        .server
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address '{}'", config.server.listen))?;

    let quit = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&quit);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    #[cfg(feature = "realtime")]
    tank_driver::raise_thread_priority();

    let mut tank = if args.mock {
        info!("Using mock GPIO backend");
        Tank::assemble(&config, &mut MockProvider::new())?
    } else {
        assemble_hardware(&config, &args.dev_root)?
    };

    let options = control::Options {
        listen,
        keepalive: config.server.keepalive(),
        idle_sleep: config.scheduler.idle_sleep(),
        keyboard: !args.no_keyboard,
    };
    let result = control::run(&mut tank, &options, &quit);
    tank.shutdown();
    result
}
