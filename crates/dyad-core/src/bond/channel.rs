//! 近场通道
//!
//! 绑定只需要一个能收发字节消息的通道。这里提供两种实现：
//! - [`MemoryChannel`]：进程内的一对通道，用于测试
//! - [`TcpChannel`]：长度前缀帧（4 字节大端长度 + 数据）

use crate::error::{DyadError, Result};
use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 1024;

/// 两台设备之间已确认的通道
#[async_trait]
pub trait ProximityChannel: Send {
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// 等待对端的下一条消息；对端断开时返回 [`DyadError::Channel`]
    async fn recv(&mut self) -> Result<Vec<u8>>;
}

pub struct MemoryChannel {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl MemoryChannel {
    /// 创建一对相互连接的通道
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(8);
        let (b_tx, b_rx) = mpsc::channel(8);
        (
            Self { tx: a_tx, rx: b_rx },
            Self { tx: b_tx, rx: a_rx },
        )
    }
}

#[async_trait]
impl ProximityChannel for MemoryChannel {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.tx
            .send(data.to_vec())
            .await
            .map_err(|_| DyadError::Channel("peer disconnected".to_string()))
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| DyadError::Channel("peer disconnected".to_string()))
    }
}

pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// 连接到对端
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| DyadError::Channel(format!("connect failed: {e}")))?;
        debug!("Connected to peer {:?}", stream.peer_addr().ok());
        Ok(Self::new(stream))
    }

    /// 等待一个对端连接
    pub async fn accept(listener: &TcpListener) -> Result<Self> {
        let (stream, addr) = listener
            .accept()
            .await
            .map_err(|e| DyadError::Channel(format!("accept failed: {e}")))?;
        debug!("Accepted peer {}", addr);
        Ok(Self::new(stream))
    }
}

fn io_error(e: std::io::Error) -> DyadError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        DyadError::Channel("peer disconnected".to_string())
    } else {
        DyadError::Channel(e.to_string())
    }
}

#[async_trait]
impl ProximityChannel for TcpChannel {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or_else(|| DyadError::Channel(format!("frame too large: {}", data.len())))?;
        let mut frame = Vec::with_capacity(LEN_SIZE + data.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(data);
        self.stream.write_all(&frame).await.map_err(io_error)?;
        self.stream.flush().await.map_err(io_error)
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; LEN_SIZE];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .map_err(io_error)?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            return Err(DyadError::Channel(format!("frame too large: {len}")));
        }
        let mut data = vec![0u8; len as usize];
        self.stream.read_exact(&mut data).await.map_err(io_error)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_memory_pair() {
        let (mut a, mut b) = MemoryChannel::pair();
        a.send(b"hello").await.unwrap();
        b.send(b"world").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), b"hello");
        assert_eq!(a.recv().await.unwrap(), b"world");

        drop(a);
        assert_eq!(b.recv().await.unwrap_err().kind(), ErrorKind::Channel);
    }

    #[tokio::test]
    async fn test_tcp_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut channel = TcpChannel::accept(&listener).await.unwrap();
            let data = channel.recv().await.unwrap();
            channel.send(&data).await.unwrap();
            // 对端关闭后读到 EOF
            channel.recv().await.unwrap_err().kind()
        });

        let mut client = TcpChannel::connect(addr).await.unwrap();
        client.send(&[9u8; 32]).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), vec![9u8; 32]);
        assert!(client.send(&[0u8; 2048]).await.is_err());
        drop(client);

        assert_eq!(server.await.unwrap(), ErrorKind::Channel);
    }

    #[tokio::test]
    async fn test_tcp_rejects_oversized_header() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut channel = TcpChannel::accept(&listener).await.unwrap();
            channel.recv().await.unwrap_err()
        });

        // 声明 4096 字节的帧，超过上限
        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(&[0, 0, 0x10, 0]).await.unwrap();

        let err = server.await.unwrap();
        assert_eq!(err.kind(), ErrorKind::Channel);
        assert!(err.to_string().contains("frame too large"));
    }

    #[tokio::test]
    async fn test_tcp_eof_inside_frame_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut channel = TcpChannel::accept(&listener).await.unwrap();
            channel.recv().await.unwrap_err()
        });

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(&[0, 0, 0, 8, 1, 2, 3]).await.unwrap();
        drop(raw);

        let err = server.await.unwrap();
        assert_eq!(err.kind(), ErrorKind::Channel);
        assert!(err.to_string().contains("peer disconnected"));
    }
}
