//! ClamAV daemon client speaking the INSTREAM protocol: a command line,
//! then length-prefixed chunks (4-byte big-endian), terminated by a
//! zero-length chunk. The daemon answers `stream: OK` or
//! `stream: <signature> FOUND`.

use async_trait::async_trait;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ClamavConfig;
use crate::error::{AppError, Result};
use crate::scanner::{ScanOutcome, VirusScanner};

pub struct ClamdScanner {
    host: String,
    port: u16,
    timeout: Duration,
    http: reqwest::Client,
}

impl ClamdScanner {
    pub fn new(config: &ClamavConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            timeout: Duration::from_secs(config.timeout_secs),
            http: reqwest::Client::new(),
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| AppError::Upstream(format!("clamd connection failed: {}", e)))
    }

    async fn scan_inner(&self, url: &str) -> Result<ScanOutcome> {
        let started = Instant::now();

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("scan download failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "scan download failed: {}",
                resp.status()
            )));
        }

        let mut socket = self.connect().await?;
        socket
            .write_all(b"nINSTREAM\n")
            .await
            .map_err(|e| AppError::Upstream(format!("clamd write failed: {}", e)))?;

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AppError::Upstream(format!("scan download failed: {}", e)))?;
            if chunk.is_empty() {
                continue;
            }
            socket
                .write_all(&(chunk.len() as u32).to_be_bytes())
                .await
                .map_err(|e| AppError::Upstream(format!("clamd write failed: {}", e)))?;
            socket
                .write_all(&chunk)
                .await
                .map_err(|e| AppError::Upstream(format!("clamd write failed: {}", e)))?;
        }

        // Zero-length chunk terminates the stream.
        socket
            .write_all(&0u32.to_be_bytes())
            .await
            .map_err(|e| AppError::Upstream(format!("clamd write failed: {}", e)))?;

        let mut response = String::new();
        socket
            .read_to_string(&mut response)
            .await
            .map_err(|e| AppError::Upstream(format!("clamd read failed: {}", e)))?;

        let (infected, virus_name) = parse_scan_response(&response)?;
        Ok(ScanOutcome {
            infected,
            virus_name,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Parse a clamd INSTREAM reply.
fn parse_scan_response(response: &str) -> Result<(bool, Option<String>)> {
    let response = response.trim_end_matches(['\0', '\n']);

    if response.contains("stream: OK") {
        return Ok((false, None));
    }
    if let Some(rest) = response.split("stream: ").nth(1) {
        if let Some(name) = rest.strip_suffix(" FOUND") {
            return Ok((true, Some(name.to_string())));
        }
    }
    Err(AppError::Upstream(format!(
        "unexpected clamd response: {}",
        response
    )))
}

#[async_trait]
impl VirusScanner for ClamdScanner {
    async fn scan_url(&self, url: &str) -> Result<ScanOutcome> {
        match tokio::time::timeout(self.timeout, self.scan_inner(url)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Upstream("clamd scan timed out".to_string())),
        }
    }

    async fn ping(&self) -> bool {
        let fut = async {
            let mut socket = self.connect().await.ok()?;
            socket.write_all(b"nPING\n").await.ok()?;
            let mut buf = [0u8; 16];
            let n = socket.read(&mut buf).await.ok()?;
            Some(String::from_utf8_lossy(&buf[..n]).contains("PONG"))
        };
        matches!(
            tokio::time::timeout(Duration::from_secs(5), fut).await,
            Ok(Some(true))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean() {
        let (infected, name) = parse_scan_response("stream: OK\0").unwrap();
        assert!(!infected);
        assert!(name.is_none());
    }

    #[test]
    fn test_parse_infected() {
        let (infected, name) =
            parse_scan_response("stream: Eicar-Test-Signature FOUND\n").unwrap();
        assert!(infected);
        assert_eq!(name.as_deref(), Some("Eicar-Test-Signature"));
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse_scan_response("INSTREAM size limit exceeded").is_err());
    }
}
