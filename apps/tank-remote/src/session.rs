//! 客户端协议处理
//!
//! - [`greet`]: 校验服务器问候并回送客户端问候
//! - [`drain_messages`]: 从接收缓冲区中取出所有完整的服务器消息
//! - [`reply_for`]: 需要应答的消息（存活检查）对应的回复字节

use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use tank_protocol::{CLIENT_GREETING, Command, Handshake, HandshakeProgress, ServerMessage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] tank_protocol::ProtocolError),
}

/// 阻塞读取服务器问候，匹配后回送客户端问候
pub fn greet(stream: &mut (impl Read + Write)) -> Result<(), SessionError> {
    let mut handshake = Handshake::client();
    let mut buf = [0u8; 64];

    loop {
        // 只读取问候剩余的长度，不吞掉后续消息
        let want = handshake.remaining().min(buf.len());
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during greeting",
            )
            .into());
        }
        let (progress, _) = handshake.feed(&buf[..n])?;
        if progress == HandshakeProgress::Complete {
            break;
        }
    }

    stream.write_all(CLIENT_GREETING)?;
    stream.flush()?;
    Ok(())
}

/// 取出缓冲区中所有完整的消息，不完整的尾部留在缓冲区中
pub fn drain_messages(buf: &mut BytesMut) -> Result<Vec<ServerMessage>, SessionError> {
    let mut messages = Vec::new();
    while let Some((message, used)) = ServerMessage::decode(buf)? {
        buf.advance(used);
        messages.push(message);
    }
    Ok(messages)
}

/// 存活检查用 `'0'` 应答，其他消息不需要应答
pub fn reply_for(message: &ServerMessage) -> Option<Command> {
    match message {
        ServerMessage::LivenessCheck => Some(Command::LivenessAck),
        ServerMessage::State(_) => None,
    }
}

/// 发送单字节命令，部分写入视为失败
pub fn send_command(stream: &mut impl Write, cmd: Command) -> io::Result<()> {
    match stream.write(&[cmd.as_byte()]) {
        Ok(1) => Ok(()),
        Ok(_) => Err(io::Error::new(io::ErrorKind::WriteZero, "command not written")),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tank_protocol::{SERVER_GREETING, TankStatus};

    /// 读取来自固定输入，写入记录到 `written`
    struct Duplex {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn duplex(input: &[u8]) -> Duplex {
        Duplex {
            input: Cursor::new(input.to_vec()),
            written: Vec::new(),
        }
    }

    #[test]
    fn test_greet_answers_valid_greeting() {
        let mut input = SERVER_GREETING.to_vec();
        input.push(b'k');
        let mut stream = duplex(&input);

        greet(&mut stream).unwrap();
        assert_eq!(stream.written, CLIENT_GREETING);
        // 问候之后的字节没有被读走
        assert_eq!(stream.input.position() as usize, SERVER_GREETING.len());
    }

    #[test]
    fn test_greet_rejects_wrong_greeting() {
        let mut stream = duplex(b"i tunchik raspberry!!");
        let err = greet(&mut stream).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
        assert!(stream.written.is_empty());
    }

    #[test]
    fn test_greet_fails_on_early_close() {
        let mut stream = duplex(&SERVER_GREETING[..4]);
        assert!(matches!(greet(&mut stream), Err(SessionError::Io(_))));
    }

    #[test]
    fn test_drain_keeps_partial_message() {
        let status = TankStatus {
            right_speed_pct: 40,
            ..TankStatus::default()
        };
        let state = ServerMessage::State(status).to_vec();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"o");
        buf.extend_from_slice(&state);
        buf.extend_from_slice(&state[..5]);

        let messages = drain_messages(&mut buf).unwrap();
        assert_eq!(
            messages,
            vec![ServerMessage::LivenessCheck, ServerMessage::State(status)]
        );
        assert_eq!(buf.len(), 5);

        buf.extend_from_slice(&state[5..]);
        assert_eq!(drain_messages(&mut buf).unwrap(), vec![ServerMessage::State(status)]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        let mut buf = BytesMut::from(&b"x"[..]);
        assert!(matches!(drain_messages(&mut buf), Err(SessionError::Protocol(_))));
    }

    #[test]
    fn test_liveness_check_is_answered() {
        assert_eq!(
            reply_for(&ServerMessage::LivenessCheck),
            Some(Command::LivenessAck)
        );
        assert_eq!(reply_for(&ServerMessage::State(TankStatus::default())), None);

        let mut out = Vec::new();
        send_command(&mut out, Command::LivenessAck).unwrap();
        assert_eq!(out, b"0");
    }
}
