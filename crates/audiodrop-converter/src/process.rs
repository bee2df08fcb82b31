//! Helpers shared by the external tool adapters.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ConversionError;

/// Read `reader` to the end, keeping only the last `limit` bytes.
pub async fn drain_tail<R>(mut reader: R, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}

/// Map a spawn failure to a conversion error.
pub fn spawn_error(binary: &str, err: io::Error) -> ConversionError {
    if err.kind() == io::ErrorKind::NotFound {
        ConversionError::ToolNotFound {
            tool: binary.to_string(),
        }
    } else {
        ConversionError::Io(err)
    }
}
