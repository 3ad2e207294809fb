//! TCP transport for Pyro connections

use crate::transport::{AsyncReader, AsyncWriter, MAX_MESSAGE_LEN};
use async_trait::async_trait;
use pyro_core::{PyroError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// TCP read wrapper
pub struct TcpReadWrapper(pub OwnedReadHalf);

#[async_trait]
impl AsyncReader for TcpReadWrapper {
    async fn read_message(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.0).await
    }
}

/// TCP write wrapper
pub struct TcpWriteWrapper(pub OwnedWriteHalf);

#[async_trait]
impl AsyncWriter for TcpWriteWrapper {
    async fn write_message(&mut self, data: &[u8]) -> Result<()> {
        write_frame(&mut self.0, data).await
    }
}

pub(crate) async fn read_frame<S: AsyncReadExt + Unpin>(stream: &mut S) -> Result<Vec<u8>> {
    // Read 4-byte length prefix (little-endian)
    let mut len_bytes = [0u8; 4];
    stream
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| PyroError::IpcError(format!("TCP read length failed: {}", e)))?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_LEN {
        return Err(PyroError::ProtocolError(format!(
            "Message too large: {} bytes",
            len
        )));
    }

    let mut data = vec![0u8; len];
    stream
        .read_exact(&mut data)
        .await
        .map_err(|e| PyroError::IpcError(format!("TCP read data failed: {}", e)))?;

    Ok(data)
}

pub(crate) async fn write_frame<S: AsyncWriteExt + Unpin>(stream: &mut S, data: &[u8]) -> Result<()> {
    if data.len() > MAX_MESSAGE_LEN {
        return Err(PyroError::ProtocolError(format!(
            "Message too large: {} bytes",
            data.len()
        )));
    }

    let len = (data.len() as u32).to_le_bytes();
    stream
        .write_all(&len)
        .await
        .map_err(|e| PyroError::IpcError(format!("TCP write length failed: {}", e)))?;

    stream
        .write_all(data)
        .await
        .map_err(|e| PyroError::IpcError(format!("TCP write data failed: {}", e)))?;

    // Flush to ensure data is sent
    stream
        .flush()
        .await
        .map_err(|e| PyroError::IpcError(format!("TCP flush failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn test_frames_cross_a_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (_, write_half) = stream.into_split();
            let mut writer = TcpWriteWrapper(write_half);
            writer.write_message("peer.Enter()".as_bytes()).await.unwrap();
            writer.write_message(b"").await.unwrap();
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, _) = stream.into_split();
        let mut reader = TcpReadWrapper(read_half);
        assert_eq!(reader.read_message().await.unwrap(), b"peer.Enter()");
        assert_eq!(reader.read_message().await.unwrap(), b"");
        client.await.unwrap();
        assert!(matches!(
            reader.read_message().await,
            Err(PyroError::IpcError(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let mut frame: &[u8] = &(MAX_MESSAGE_LEN as u32 + 1).to_le_bytes();
        assert!(matches!(
            read_frame(&mut frame).await,
            Err(PyroError::ProtocolError(_))
        ));
    }
}
