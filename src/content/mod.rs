//! IPFS gateway fetcher.
//!
//! No retry here: a failed fetch leaves the question unprocessed, so the next
//! poll cycle is the retry.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid content hash {0:?}")]
    InvalidHash(String),
    #[error("gateway request failed: {0}")]
    Request(reqwest::Error),
    #[error("gateway returned status {status} for {hash}")]
    Status { hash: String, status: u16 },
    #[error("document {hash} exceeds {limit} bytes")]
    TooLarge { hash: String, limit: usize },
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Request(e.without_url())
    }
}

/// Resolves a content hash to the document bytes.
pub trait ContentSource {
    fn fetch(&self, content_hash: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Public-gateway fetcher, `GET {gateway}/ipfs/{hash}`.
pub struct ContentFetcher {
    http: reqwest::Client,
    gateway_url: String,
    max_bytes: usize,
}

impl ContentFetcher {
    pub fn new(gateway_url: &str, max_bytes: usize, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            max_bytes,
        })
    }

    fn url_for(&self, content_hash: &str) -> Result<String, FetchError> {
        let hash = content_hash.trim();
        let hash = hash.strip_prefix("ipfs://").unwrap_or(hash);
        let valid = !hash.is_empty() && hash.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(FetchError::InvalidHash(content_hash.to_string()));
        }
        Ok(format!("{}/ipfs/{}", self.gateway_url, hash))
    }
}

impl ContentSource for ContentFetcher {
    async fn fetch(&self, content_hash: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.url_for(content_hash)?;
        let mut resp = self.http.get(&url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                hash: content_hash.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(len) = resp.content_length() {
            if len as usize > self.max_bytes {
                return Err(FetchError::TooLarge {
                    hash: content_hash.to_string(),
                    limit: self.max_bytes,
                });
            }
        }

        // Chunked responses carry no length; stop reading once past the cap.
        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge {
                    hash: content_hash.to_string(),
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(hash = %content_hash, bytes = body.len(), "document fetched");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering with a chunked body of `chunks` × `chunk_len` bytes.
    async fn chunked_gateway(chunks: usize, chunk_len: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = sock.read(&mut buf).await;

            let mut resp = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
            for _ in 0..chunks {
                resp.extend_from_slice(format!("{:x}\r\n", chunk_len).as_bytes());
                resp.extend(std::iter::repeat(b'a').take(chunk_len));
                resp.extend_from_slice(b"\r\n");
            }
            resp.extend_from_slice(b"0\r\n\r\n");
            let _ = sock.write_all(&resp).await;
            let _ = sock.shutdown().await;
        });
        format!("http://{}", addr)
    }

    fn fetcher() -> ContentFetcher {
        ContentFetcher::new("https://ipfs.io/", 1024, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_url_for_cid() {
        let f = fetcher();
        assert_eq!(
            f.url_for("QmPK1s3pNYLi9ERiq3BDxKa4XosgWwFRQUydHUtz4YgpqB").unwrap(),
            "https://ipfs.io/ipfs/QmPK1s3pNYLi9ERiq3BDxKa4XosgWwFRQUydHUtz4YgpqB"
        );
        assert_eq!(f.url_for("ipfs://bafy123").unwrap(), "https://ipfs.io/ipfs/bafy123");
    }

    #[test]
    fn test_rejects_path_injection() {
        let f = fetcher();
        assert!(matches!(f.url_for(""), Err(FetchError::InvalidHash(_))));
        assert!(matches!(f.url_for("../etc/passwd"), Err(FetchError::InvalidHash(_))));
        assert!(matches!(f.url_for("Qm?x=1"), Err(FetchError::InvalidHash(_))));
    }

    #[tokio::test]
    async fn test_chunked_body_over_cap_is_rejected() {
        let gateway = chunked_gateway(8, 512).await;
        let f = ContentFetcher::new(&gateway, 1024, Duration::from_secs(5)).unwrap();
        let err = f.fetch("QmBig").await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 1024, .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_chunked_body_within_cap() {
        let gateway = chunked_gateway(2, 100).await;
        let f = ContentFetcher::new(&gateway, 1024, Duration::from_secs(5)).unwrap();
        let body = f.fetch("QmSmall").await.unwrap();
        assert_eq!(body.len(), 200);
    }
}
