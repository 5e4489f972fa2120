//! External antivirus engines.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::AntivirusConfig;

const INSTREAM_CHUNK: usize = 64 * 1024;
const MAX_REPLY_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AntivirusVerdict {
    Clean,
    Infected(Vec<String>),
}

#[derive(Error, Debug)]
pub enum AntivirusError {
    #[error("Antivirus engine unavailable: {0}")]
    Unavailable(String),

    #[error("Antivirus scan timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected antivirus reply: {0}")]
    Protocol(String),
}

/// An engine that can scan a byte buffer for known signatures.
#[async_trait]
pub trait AntivirusEngine: Send + Sync {
    /// Identifier reported in scan results.
    fn name(&self) -> &str;

    async fn scan(&self, bytes: &[u8]) -> Result<AntivirusVerdict, AntivirusError>;
}

/// Client for a clamd daemon using the `INSTREAM` command over TCP.
pub struct ClamdScanner {
    address: String,
    timeout: Duration,
}

impl ClamdScanner {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AntivirusConfig) -> Self {
        Self::new(
            config.address.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    async fn instream(&self, bytes: &[u8]) -> Result<String, AntivirusError> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| AntivirusError::Unavailable(format!("{}: {}", self.address, e)))?;

        let io_err = |e: std::io::Error| AntivirusError::Unavailable(e.to_string());

        stream.write_all(b"zINSTREAM\0").await.map_err(io_err)?;
        for chunk in bytes.chunks(INSTREAM_CHUNK) {
            let len = u32::try_from(chunk.len())
                .map_err(|_| AntivirusError::Protocol("chunk too large".to_string()))?;
            stream.write_all(&len.to_be_bytes()).await.map_err(io_err)?;
            stream.write_all(chunk).await.map_err(io_err)?;
        }
        stream.write_all(&0u32.to_be_bytes()).await.map_err(io_err)?;
        stream.flush().await.map_err(io_err)?;

        let mut reply = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let n = stream.read(&mut buf).await.map_err(io_err)?;
            if n == 0 {
                break;
            }
            reply.extend_from_slice(&buf[..n]);
            if reply.contains(&0) || reply.len() >= MAX_REPLY_BYTES {
                break;
            }
        }

        let text = String::from_utf8_lossy(&reply);
        Ok(text.trim_end_matches(['\0', '\n']).to_string())
    }
}

/// Parses a clamd reply line such as `stream: OK` or
/// `stream: Eicar-Test-Signature FOUND`.
pub fn parse_clamd_reply(reply: &str) -> Result<AntivirusVerdict, AntivirusError> {
    let body = reply
        .split_once(": ")
        .map(|(_, rest)| rest)
        .unwrap_or(reply)
        .trim();

    if body == "OK" {
        return Ok(AntivirusVerdict::Clean);
    }
    if let Some(signature) = body.strip_suffix(" FOUND") {
        return Ok(AntivirusVerdict::Infected(vec![signature.trim().to_string()]));
    }

    Err(AntivirusError::Protocol(reply.to_string()))
}

#[async_trait]
impl AntivirusEngine for ClamdScanner {
    fn name(&self) -> &str {
        "clamd"
    }

    async fn scan(&self, bytes: &[u8]) -> Result<AntivirusVerdict, AntivirusError> {
        let reply = tokio::time::timeout(self.timeout, self.instream(bytes))
            .await
            .map_err(|_| AntivirusError::Timeout(self.timeout))??;
        parse_clamd_reply(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_clean_reply() {
        assert_eq!(
            parse_clamd_reply("stream: OK").unwrap(),
            AntivirusVerdict::Clean
        );
    }

    #[test]
    fn test_parse_found_reply() {
        assert_eq!(
            parse_clamd_reply("stream: Win.Test.EICAR_HDB-1 FOUND").unwrap(),
            AntivirusVerdict::Infected(vec!["Win.Test.EICAR_HDB-1".to_string()])
        );
    }

    #[test]
    fn test_parse_error_reply() {
        assert!(parse_clamd_reply("INSTREAM size limit exceeded. ERROR").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let scanner = ClamdScanner::new(addr.to_string(), Duration::from_secs(2));
        let result = scanner.scan(b"hello").await;
        assert!(matches!(result, Err(AntivirusError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_instream_round_trip_against_fake_daemon() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut command = [0u8; 10];
            socket.read_exact(&mut command).await.unwrap();
            assert_eq!(&command, b"zINSTREAM\0");

            let mut received = Vec::new();
            loop {
                let mut len = [0u8; 4];
                socket.read_exact(&mut len).await.unwrap();
                let len = u32::from_be_bytes(len) as usize;
                if len == 0 {
                    break;
                }
                let mut chunk = vec![0u8; len];
                socket.read_exact(&mut chunk).await.unwrap();
                received.extend_from_slice(&chunk);
            }
            socket
                .write_all(b"stream: Eicar-Test-Signature FOUND\0")
                .await
                .unwrap();
            received
        });

        let scanner = ClamdScanner::new(addr.to_string(), Duration::from_secs(5));
        let verdict = scanner.scan(b"payload bytes").await.unwrap();
        assert_eq!(
            verdict,
            AntivirusVerdict::Infected(vec!["Eicar-Test-Signature".to_string()])
        );
        assert_eq!(server.await.unwrap(), b"payload bytes");
    }
}
