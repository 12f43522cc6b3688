//! TCP 遥控服务
//!
//! 连接流程：
//!
//! 1. accept 后立即发送服务器问候
//! 2. 校验客户端问候，匹配后标记为就绪，并立即发送一条 `'k'` 状态消息
//! 3. 之后客户端发送单字节命令流，服务器在状态变化时广播 `'k'`
//!
//! 存活检查：一个窗口内没有收到客户端任何字节时发送 `'o'`，
//! 下一个窗口内仍然没有字节则关闭连接。握手未完成的连接在一个窗口后直接关闭。
//!
//! 握手失败、未知命令字节、写入失败或部分写入都只关闭对应连接。

use bytes::BytesMut;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tank_protocol::{
    Command, Handshake, HandshakeProgress, ProtocolError, SERVER_GREETING, ServerMessage,
    TankStatus,
};
use tracing::{debug, info, warn};

/// 监听套接字的 token
pub const LISTENER: Token = Token(0);

/// 连接被关闭的原因
#[derive(Debug)]
enum CloseReason {
    PeerClosed,
    Io(io::Error),
    Protocol(ProtocolError),
    PartialWrite { written: usize, expected: usize },
    HandshakeTimeout,
    LivenessTimeout,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::Io(e) => write!(f, "I/O error: {}", e),
            CloseReason::Protocol(e) => write!(f, "protocol violation: {}", e),
            CloseReason::PartialWrite { written, expected } => {
                write!(f, "partial write ({}/{} bytes)", written, expected)
            },
            CloseReason::HandshakeTimeout => write!(f, "handshake timed out"),
            CloseReason::LivenessTimeout => write!(f, "liveness check unanswered"),
        }
    }
}

struct Connection {
    stream: TcpStream,
    addr: SocketAddr,
    handshake: Handshake,
    last_seen: Instant,
    /// 已发送 `'o'`，等待任意字节
    probed: bool,
}

impl Connection {
    fn is_ready(&self) -> bool {
        self.handshake.is_complete()
    }

    /// 写入整块数据，部分写入视为失败
    fn send(&mut self, bytes: &[u8]) -> Result<(), CloseReason> {
        match self.stream.write(bytes) {
            Ok(n) if n == bytes.len() => Ok(()),
            Ok(n) => Err(CloseReason::PartialWrite {
                written: n,
                expected: bytes.len(),
            }),
            Err(e) => Err(CloseReason::Io(e)),
        }
    }

    /// 处理收到的字节：先完成握手，剩余字节按命令解析
    fn receive(
        &mut self,
        mut bytes: &[u8],
        status: &TankStatus,
        commands: &mut Vec<Command>,
    ) -> Result<(), CloseReason> {
        if !self.is_ready() {
            let (progress, used) = self.handshake.feed(bytes).map_err(CloseReason::Protocol)?;
            bytes = &bytes[used..];
            if progress == HandshakeProgress::Pending {
                return Ok(());
            }
            info!("Client {} handshake complete", self.addr);
            self.send(&ServerMessage::State(*status).to_vec())?;
        }

        for &byte in bytes {
            match Command::from_byte(byte).map_err(CloseReason::Protocol)? {
                Command::LivenessAck => {},
                cmd => commands.push(cmd),
            }
        }
        Ok(())
    }
}

/// TCP 遥控服务
pub struct Server {
    listener: TcpListener,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    keepalive: Duration,
}

impl Server {
    /// 绑定监听地址并注册到 `registry`
    ///
    /// 客户端连接的 token 从 `first_client_token` 开始分配。
    pub fn bind(
        addr: SocketAddr,
        keepalive: Duration,
        registry: &Registry,
        first_client_token: usize,
    ) -> io::Result<Self> {
        let mut listener = TcpListener::bind(addr)?;
        registry.register(&mut listener, LISTENER, Interest::READABLE)?;
        info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            connections: HashMap::new(),
            next_token: first_client_token,
            keepalive,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// 已完成握手的连接数
    pub fn ready_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_ready()).count()
    }

    /// 接受所有挂起的连接并发送服务器问候
    pub fn accept(&mut self, registry: &Registry, now: Instant) {
        loop {
            let (mut stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                },
            };

            let token = Token(self.next_token);
            self.next_token += 1;

            if let Err(e) = registry.register(&mut stream, token, Interest::READABLE) {
                warn!("Failed to register client {}: {}", addr, e);
                continue;
            }
            if let Err(e) = stream.set_nodelay(true) {
                debug!("set_nodelay failed for {}: {}", addr, e);
            }

            let mut conn = Connection {
                stream,
                addr,
                handshake: Handshake::server(),
                last_seen: now,
                probed: false,
            };
            info!("Client {} connected", addr);

            match conn.send(SERVER_GREETING) {
                Ok(()) => {
                    self.connections.insert(token, conn);
                },
                Err(reason) => {
                    Self::close(registry, conn, reason);
                },
            }
        }
    }

    /// 读空客户端可用的字节，收到的命令追加到 `commands`
    ///
    /// `status` 用于握手完成时发送的第一条状态消息。
    pub fn on_readable(
        &mut self,
        registry: &Registry,
        token: Token,
        now: Instant,
        status: &TankStatus,
        commands: &mut Vec<Command>,
    ) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        let mut buf = [0u8; 256];
        let result = loop {
            match conn.stream.read(&mut buf) {
                Ok(0) => break Err(CloseReason::PeerClosed),
                Ok(n) => {
                    conn.last_seen = now;
                    conn.probed = false;
                    if let Err(reason) = conn.receive(&buf[..n], status, commands) {
                        break Err(reason);
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(CloseReason::Io(e)),
            }
        };

        if let Err(reason) = result
            && let Some(conn) = self.connections.remove(&token)
        {
            Self::close(registry, conn, reason);
        }
    }

    /// 存活检查，返回被关闭的连接数
    pub fn check_liveness(&mut self, registry: &Registry, now: Instant) -> usize {
        let keepalive = self.keepalive;
        let liveness = ServerMessage::LivenessCheck.to_vec();
        let mut expired = Vec::new();

        for (&token, conn) in self.connections.iter_mut() {
            let idle = now.saturating_duration_since(conn.last_seen);
            if !conn.is_ready() {
                if idle >= keepalive {
                    expired.push((token, CloseReason::HandshakeTimeout));
                }
                continue;
            }
            if conn.probed {
                if idle >= keepalive * 2 {
                    expired.push((token, CloseReason::LivenessTimeout));
                }
            } else if idle >= keepalive {
                debug!("Client {} idle for {:?}, sending liveness check", conn.addr, idle);
                match conn.send(&liveness) {
                    Ok(()) => conn.probed = true,
                    Err(reason) => expired.push((token, reason)),
                }
            }
        }

        let closed = expired.len();
        for (token, reason) in expired {
            if let Some(conn) = self.connections.remove(&token) {
                Self::close(registry, conn, reason);
            }
        }
        closed
    }

    /// 下一次存活检查的时刻
    pub fn next_deadline(&self) -> Option<Instant> {
        self.connections
            .values()
            .map(|conn| {
                let windows = if conn.probed { 2 } else { 1 };
                conn.last_seen + self.keepalive * windows
            })
            .min()
    }

    /// 向所有就绪的客户端发送状态消息
    pub fn broadcast(&mut self, registry: &Registry, status: &TankStatus) {
        let message = ServerMessage::State(*status);
        let mut buf = BytesMut::with_capacity(message.encoded_len());
        message.encode(&mut buf);

        let mut failed = Vec::new();
        for (&token, conn) in self.connections.iter_mut().filter(|(_, c)| c.is_ready()) {
            if let Err(reason) = conn.send(&buf) {
                failed.push((token, reason));
            }
        }
        for (token, reason) in failed {
            if let Some(conn) = self.connections.remove(&token) {
                Self::close(registry, conn, reason);
            }
        }
    }

    /// 关闭所有连接
    pub fn shutdown(&mut self, registry: &Registry) {
        for (_, mut conn) in self.connections.drain() {
            if let Err(e) = registry.deregister(&mut conn.stream) {
                debug!("deregister {} failed: {}", conn.addr, e);
            }
        }
    }

    fn close(registry: &Registry, mut conn: Connection, reason: CloseReason) {
        match reason {
            CloseReason::PeerClosed => info!("Client {} disconnected", conn.addr),
            reason => warn!("Closing client {}: {}", conn.addr, reason),
        }
        if let Err(e) = registry.deregister(&mut conn.stream) {
            debug!("deregister {} failed: {}", conn.addr, e);
        }
    }
}
