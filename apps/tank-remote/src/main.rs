//! # tank-remote
//!
//! 坦克 TCP 遥控客户端。
//!
//! ```bash
//! tank-remote 192.168.1.50 8888
//! ```
//!
//! 按键与坦克本机键盘一致，`q` 断开连接。收到存活检查 `'o'` 时自动回送 `'0'`。

mod session;

use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::Parser;
use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, IsTerminal, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tank_protocol::ServerMessage;
use tank_tools::{HELP_TEXT, KeyAction, KeyboardInput, RawTerminal, action_for_key, redraw};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const SOCKET: Token = Token(0);
const KEYBOARD: Token = Token(1);

/// 握手超时
const GREETING_TIMEOUT: Duration = Duration::from_secs(5);

/// 没有事件时检查退出标志的间隔
const IDLE_POLL: Duration = Duration::from_millis(100);

/// 坦克遥控客户端
#[derive(Parser, Debug)]
#[command(name = "tank-remote")]
#[command(about = "Remote control client for the tank", long_about = None)]
#[command(version)]
struct Args {
    /// 坦克主机名或 IP 地址
    host: String,

    /// 坦克监听端口
    port: u16,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tank_remote=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}:{}", host, port))?
        .next()
        .with_context(|| format!("No address found for {}:{}", host, port))
}

/// 连接并完成握手，返回非阻塞套接字
fn connect(addr: SocketAddr) -> Result<TcpStream> {
    let mut stream = std::net::TcpStream::connect_timeout(&addr, GREETING_TIMEOUT)
        .with_context(|| format!("Failed to connect to {}", addr))?;
    stream.set_read_timeout(Some(GREETING_TIMEOUT))?;
    session::greet(&mut stream).context("Handshake failed")?;
    stream.set_nodelay(true)?;
    stream.set_nonblocking(true)?;
    info!("Connected to {}", addr);
    Ok(TcpStream::from_std(stream))
}

/// 连接结束的原因
enum Exit {
    Quit,
    ServerClosed,
}

/// 读空套接字并处理所有完整消息
fn on_socket_readable(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    show_status: bool,
) -> Result<Option<Exit>> {
    let mut chunk = [0u8; 256];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return Ok(Some(Exit::ServerClosed)),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Socket read failed"),
        }
    }

    for message in session::drain_messages(buf).context("Invalid message from server")? {
        if let Some(reply) = session::reply_for(&message) {
            debug!("liveness check answered");
            session::send_command(stream, reply).context("Failed to answer liveness check")?;
        }
        if let ServerMessage::State(status) = message
            && show_status
        {
            redraw(&mut io::stdout(), &status)?;
        }
    }
    Ok(None)
}

fn run(stream: &mut TcpStream, quit: &AtomicBool) -> Result<Exit> {
    let mut poll = Poll::new().context("Failed to create poll instance")?;
    let mut events = Events::with_capacity(16);
    poll.registry()
        .register(stream, SOCKET, Interest::READABLE)
        .context("Failed to register socket")?;

    let mut keyboard = KeyboardInput::open().context("Failed to open stdin")?;
    let fd = keyboard.raw_fd();
    poll.registry()
        .register(&mut SourceFd(&fd), KEYBOARD, Interest::READABLE)
        .context("Failed to register stdin")?;
    let _raw_terminal = RawTerminal::enable().context("Failed to switch terminal to raw mode")?;

    let show_status = io::stdout().is_terminal();
    if show_status {
        println!("{}", HELP_TEXT);
    }

    let mut buf = BytesMut::with_capacity(256);
    while !quit.load(Ordering::SeqCst) {
        let timeout = keyboard
            .deadline()
            .map_or(IDLE_POLL, |deadline| {
                deadline.saturating_duration_since(Instant::now()).min(IDLE_POLL)
            });
        match poll.poll(&mut events, Some(timeout)) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("poll failed"),
        }

        let mut keys = Vec::new();
        for event in events.iter() {
            match event.token() {
                SOCKET => {
                    if let Some(exit) = on_socket_readable(stream, &mut buf, show_status)? {
                        return Ok(exit);
                    }
                },
                KEYBOARD => {
                    let read = keyboard.read_keys().context("Keyboard read failed")?;
                    keys.extend(read.keys);
                    if read.closed {
                        info!("stdin closed");
                        return Ok(Exit::Quit);
                    }
                },
                _ => {},
            }
        }
        keys.extend(keyboard.poll_timeout(Instant::now()));

        for key in &keys {
            match action_for_key(key) {
                KeyAction::Command(cmd) => {
                    session::send_command(stream, cmd).context("Failed to send command")?;
                },
                KeyAction::Quit => return Ok(Exit::Quit),
                KeyAction::Ignore => {},
            }
        }
    }
    Ok(Exit::Quit)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let quit = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&quit);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let addr = resolve(&args.host, args.port)?;
    let mut stream = connect(addr)?;

    let result = run(&mut stream, &quit);
    println!();
    match result {
        Ok(Exit::Quit) => {
            info!("Disconnected");
            Ok(())
        },
        Ok(Exit::ServerClosed) => {
            warn!("Server closed the connection");
            Ok(())
        },
        Err(e) => Err(e),
    }
}
