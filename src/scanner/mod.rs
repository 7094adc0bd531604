pub mod clamd;

use async_trait::async_trait;

use crate::error::Result;

pub use clamd::ClamdScanner;

/// Verdict from a completed scan
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub infected: bool,
    pub virus_name: Option<String>,
    pub elapsed_ms: u64,
}

/// Malware scan capability: stream bytes, get a verdict.
#[async_trait]
pub trait VirusScanner: Send + Sync {
    /// Download the object at `url` and stream it through the scanner.
    async fn scan_url(&self, url: &str) -> Result<ScanOutcome>;

    /// Liveness check.
    async fn ping(&self) -> bool;
}
