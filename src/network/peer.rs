// Peer connections: one message per TCP connection

use crate::error::{NodeError, Result};
use crate::network::MAX_MESSAGE_SIZE;
use crate::network::Message;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Dial `addr`, write one framed message and close the connection
pub async fn send_message(addr: &str, message: &Message, connect_timeout: Duration) -> Result<()> {
    let unreachable = |reason: String| NodeError::PeerUnreachable {
        addr: addr.to_string(),
        reason,
    };

    let mut stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| unreachable("connect timed out".to_string()))?
        .map_err(|e| unreachable(e.to_string()))?;

    stream
        .write_all(&message.serialize())
        .await
        .map_err(|e| unreachable(e.to_string()))?;
    stream.shutdown().await.map_err(|e| unreachable(e.to_string()))?;

    log::debug!("Sent {} to {}", message.message_type().as_str(), addr);
    Ok(())
}

/// Read one message until the sender closes its half of the connection
pub async fn read_message<S>(stream: &mut S, read_timeout: Duration) -> Result<Message>
where
    S: AsyncRead + Unpin,
{
    let mut data = Vec::new();
    let mut limited = stream.take(MAX_MESSAGE_SIZE as u64 + 1);

    timeout(read_timeout, limited.read_to_end(&mut data))
        .await
        .map_err(|_| NodeError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out")))??;

    if data.len() > MAX_MESSAGE_SIZE {
        return Err(NodeError::Serialization(format!(
            "Message exceeds {} bytes",
            MAX_MESSAGE_SIZE
        )));
    }

    Message::deserialize(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_and_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let message = Message::GetBlocks {
            addr_from: "127.0.0.1:1".to_string(),
        };

        let reader = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_message(&mut stream, Duration::from_secs(5)).await.unwrap()
        });

        send_message(&addr, &message, Duration::from_secs(5)).await.unwrap();
        assert_eq!(reader.await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let message = Message::Addr { addresses: vec![] };
        let err = send_message(&addr, &message, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, NodeError::PeerUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_garbage_is_rejected() {
        let mut data: &[u8] = b"definitely not a frame";
        assert!(read_message(&mut data, Duration::from_secs(1)).await.is_err());
    }
}
