//! S3-compatible object store client (MinIO, AWS).
//!
//! Signs requests with SigV4 query presigning; the same presigned URLs are
//! handed to browsers for direct part uploads and used by the server for its
//! own multipart bookkeeping calls.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::S3Config;
use crate::error::{AppError, Result};
use crate::storage::{CompletedPart, ObjectStore};

type HmacSha256 = Hmac<Sha256>;

pub struct S3Store {
    http: reqwest::Client,
    endpoint: String,
    host: String,
    region: String,
    bucket: String,
    access_key: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateMultipartUploadResult {
    upload_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CompleteMultipartUploadResult {
    e_tag: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUploadXml {
    #[serde(rename = "Part")]
    parts: Vec<PartXml>,
}

#[derive(Debug, Serialize)]
struct PartXml {
    #[serde(rename = "PartNumber")]
    part_number: i64,
    #[serde(rename = "ETag")]
    etag: String,
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SigV4 URI encoding: unreserved characters pass through, '/' is kept as a
/// path separator, everything else percent-encoded.
fn encode_path(key: &str) -> String {
    key.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn encode_query(params: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

impl S3Store {
    pub fn new(config: &S3Config) -> Result<Self> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let url = reqwest::Url::parse(&endpoint)
            .map_err(|e| AppError::Internal(format!("Invalid S3 endpoint: {}", e)))?;

        let mut host = url
            .host_str()
            .ok_or_else(|| AppError::Internal("S3 endpoint has no host".to_string()))?
            .to_string();
        if let Some(port) = url.port() {
            host = format!("{}:{}", host, port);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            host,
            region: config.region.clone(),
            bucket: config.bucket.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    /// Build a SigV4 query-presigned URL for one request against `key`.
    fn presign(
        &self,
        method: &str,
        key: &str,
        extra_query: &[(String, String)],
        ttl: Duration,
    ) -> String {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let datestamp = now.format("%Y%m%d").to_string();
        let scope = format!("{}/{}/s3/aws4_request", datestamp, self.region);
        let credential = format!("{}/{}", self.access_key, scope);

        // Path-style addressing (required for MinIO).
        let canonical_uri = format!("/{}/{}", self.bucket, encode_path(key));

        let mut query: Vec<(String, String)> = vec![
            ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
            ("X-Amz-Credential".to_string(), credential),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), ttl.as_secs().to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        query.extend_from_slice(extra_query);
        let canonical_query = encode_query(&query);

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            method, canonical_uri, canonical_query, self.host
        );

        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", self.secret_key).as_bytes(),
            datestamp.as_bytes(),
        );
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, b"s3");
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

        format!(
            "{}{}?{}&X-Amz-Signature={}",
            self.endpoint, canonical_uri, canonical_query, signature
        )
    }

    async fn check_status(&self, resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(AppError::Upstream(format!(
            "S3 {} failed: {} {}",
            what, status, body
        )))
    }
}

const SERVER_CALL_TTL: Duration = Duration::from_secs(60);

#[async_trait]
impl ObjectStore for S3Store {
    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String> {
        let url = self.presign(
            "POST",
            key,
            &[("uploads".to_string(), String::new())],
            SERVER_CALL_TTL,
        );

        let resp = self
            .http
            .post(&url)
            .header("content-type", content_type.to_string())
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("S3 create multipart: {}", e)))?;
        let resp = self.check_status(resp, "create multipart").await?;

        let body = resp
            .text()
            .await
            .map_err(|e| AppError::Upstream(format!("S3 create multipart body: {}", e)))?;
        let parsed: InitiateMultipartUploadResult = quick_xml::de::from_str(&body)
            .map_err(|e| AppError::Internal(format!("Invalid InitiateMultipartUpload response: {}", e)))?;

        Ok(parsed.upload_id)
    }

    async fn presign_part_url(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i64,
        ttl: Duration,
    ) -> Result<String> {
        Ok(self.presign(
            "PUT",
            key,
            &[
                ("partNumber".to_string(), part_number.to_string()),
                ("uploadId".to_string(), upload_id.to_string()),
            ],
            ttl,
        ))
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String> {
        let mut sorted: Vec<&CompletedPart> = parts.iter().collect();
        sorted.sort_by_key(|p| p.part_number);

        let body = CompleteMultipartUploadXml {
            parts: sorted
                .into_iter()
                .map(|p| PartXml {
                    part_number: p.part_number,
                    etag: p.etag.clone(),
                })
                .collect(),
        };
        let body = quick_xml::se::to_string(&body)
            .map_err(|e| AppError::Internal(format!("Encode CompleteMultipartUpload: {}", e)))?;

        let url = self.presign(
            "POST",
            key,
            &[("uploadId".to_string(), upload_id.to_string())],
            SERVER_CALL_TTL,
        );

        let resp = self
            .http
            .post(&url)
            .header("content-type", "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("S3 complete multipart: {}", e)))?;
        let resp = self.check_status(resp, "complete multipart").await?;

        let body = resp
            .text()
            .await
            .map_err(|e| AppError::Upstream(format!("S3 complete multipart body: {}", e)))?;
        // S3 can return 200 with an error document; a missing ETag means
        // the completion did not happen.
        let parsed: CompleteMultipartUploadResult = quick_xml::de::from_str(&body)
            .map_err(|_| AppError::Upstream(format!("S3 complete multipart rejected: {}", body)))?;

        Ok(parsed.e_tag)
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        let url = self.presign(
            "DELETE",
            key,
            &[("uploadId".to_string(), upload_id.to_string())],
            SERVER_CALL_TTL,
        );

        let resp = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("S3 abort multipart: {}", e)))?;

        // 404 means the session is already gone, which is the desired state.
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        let status = resp.status();
        Err(AppError::Upstream(format!("S3 abort multipart failed: {}", status)))
    }

    async fn presign_put_url(
        &self,
        key: &str,
        _content_type: &str,
        ttl: Duration,
    ) -> Result<String> {
        Ok(self.presign("PUT", key, &[], ttl))
    }

    async fn presign_download_url(&self, key: &str, ttl: Duration) -> Result<String> {
        Ok(self.presign("GET", key, &[], ttl))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let url = self.presign("DELETE", key, &[], SERVER_CALL_TTL);

        let resp = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("S3 delete object: {}", e)))?;

        // Deleting an already-missing key is fine.
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        let status = resp.status();
        Err(AppError::Upstream(format!("S3 delete object failed: {}", status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> S3Store {
        S3Store::new(&S3Config {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            bucket: "userfiles".to_string(),
            access_key: "minio".to_string(),
            secret_key: "minio123".to_string(),
            presign_ttl_secs: 3600,
        })
        .unwrap()
    }

    #[test]
    fn test_encode_path_preserves_separators() {
        assert_eq!(encode_path("a/b c/d.txt"), "a/b%20c/d.txt");
        assert_eq!(encode_path("plain.txt"), "plain.txt");
    }

    #[test]
    fn test_encode_query_sorts_and_encodes() {
        let q = vec![
            ("uploadId".to_string(), "ab+cd".to_string()),
            ("partNumber".to_string(), "3".to_string()),
        ];
        assert_eq!(encode_query(&q), "partNumber=3&uploadId=ab%2Bcd");
    }

    #[test]
    fn test_presign_shape() {
        let s = store();
        let url = s.presign(
            "PUT",
            "acct/123-file.bin",
            &[
                ("partNumber".to_string(), "1".to_string()),
                ("uploadId".to_string(), "xyz".to_string()),
            ],
            Duration::from_secs(3600),
        );

        assert!(url.starts_with("http://localhost:9000/userfiles/acct/123-file.bin?"));
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("partNumber=1"));
        assert!(url.contains("uploadId=xyz"));

        let sig = url.rsplit("X-Amz-Signature=").next().unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hmac_deterministic() {
        let a = hmac_sha256(b"key", b"data");
        let b = hmac_sha256(b"key", b"data");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
