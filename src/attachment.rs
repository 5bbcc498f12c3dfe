// ABOUTME: Attachment resolution — turns an image reference (URL, path, data URI, base64, raw) into bytes.
// ABOUTME: Fetch failures are hard errors; decode failures fall back to the reference's UTF-8 bytes.

use std::path::Path;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::debug;

use crate::error::AttachmentError;

/// Default timeout for remote attachment fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// An image supplied by the caller, either already as bytes or as a reference
/// to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentRef {
    Bytes(Vec<u8>),
    Reference(String),
}

impl From<Vec<u8>> for AttachmentRef {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<String> for AttachmentRef {
    fn from(reference: String) -> Self {
        Self::Reference(reference)
    }
}

impl From<&str> for AttachmentRef {
    fn from(reference: &str) -> Self {
        Self::Reference(reference.to_string())
    }
}

/// Resolves image references into raw bytes.
#[derive(Debug, Clone)]
pub struct AttachmentResolver {
    client: reqwest::Client,
}

impl AttachmentResolver {
    /// Create a resolver whose remote fetches time out after `timeout`.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Create a resolver over an existing HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Resolve a caller-supplied attachment into bytes.
    pub async fn resolve_ref(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, AttachmentError> {
        match attachment {
            AttachmentRef::Bytes(bytes) => Ok(bytes.clone()),
            AttachmentRef::Reference(reference) => self.resolve(reference).await,
        }
    }

    /// Resolve a string reference. The first matching rule wins:
    ///
    /// 1. `http://`, `https://` or an absolute `/` path is fetched; failure is an error.
    /// 2. An existing local file is read.
    /// 3. A `data:` URI prefix is stripped.
    /// 4. The remainder is decoded as strict base64.
    /// 5. Otherwise the reference's own UTF-8 bytes are returned.
    pub async fn resolve(&self, reference: &str) -> Result<Vec<u8>, AttachmentError> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return self.fetch(reference).await;
        }
        if reference.starts_with('/') {
            return read_file(reference).await;
        }
        if is_local_file(reference).await {
            return read_file(reference).await;
        }
        Ok(decode_inline(reference))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AttachmentError> {
        debug!(url, "fetching attachment");
        let fetch_error = |source| AttachmentError::Fetch {
            reference: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_error)?;
        let bytes = response.bytes().await.map_err(fetch_error)?;
        Ok(bytes.to_vec())
    }
}

async fn is_local_file(reference: &str) -> bool {
    tokio::fs::metadata(Path::new(reference))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn read_file(path: &str) -> Result<Vec<u8>, AttachmentError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| AttachmentError::Read {
            reference: path.to_string(),
            source,
        })
}

/// Decode an inline reference: data URI or base64, falling back to raw bytes.
pub fn decode_inline(reference: &str) -> Vec<u8> {
    let payload = strip_data_uri(reference);
    match BASE64.decode(payload) {
        Ok(bytes) => bytes,
        Err(_) => reference.as_bytes().to_vec(),
    }
}

/// Strip a `data:<mime>;base64,` prefix, if present.
fn strip_data_uri(reference: &str) -> &str {
    if reference.starts_with("data:") {
        if let Some((_, payload)) = reference.split_once(',') {
            return payload;
        }
    }
    reference
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> AttachmentResolver {
        AttachmentResolver::with_client(reqwest::Client::new())
    }

    #[test]
    fn base64_roundtrip() {
        let bytes: Vec<u8> = (0..=255).collect();
        let encoded = BASE64.encode(&bytes);
        assert_eq!(decode_inline(&encoded), bytes);
    }

    #[test]
    fn data_uri_prefix_is_stripped() {
        let encoded = BASE64.encode(b"\x89PNG fake");
        let uri = format!("data:image/png;base64,{}", encoded);
        assert_eq!(decode_inline(&uri), b"\x89PNG fake");
    }

    #[test]
    fn non_base64_falls_back_to_utf8_bytes() {
        assert_eq!(decode_inline("not base64!"), b"not base64!");
        assert_eq!(decode_inline("çilek"), "çilek".as_bytes());
    }

    #[test]
    fn bad_padding_is_not_accepted() {
        // Valid alphabet, wrong length: strict decoding rejects it.
        assert_eq!(decode_inline("abc"), b"abc");
    }

    #[test]
    fn undecodable_data_uri_falls_back_to_whole_reference() {
        let uri = "data:image/png;base64,%%%";
        assert_eq!(decode_inline(uri), uri.as_bytes());
    }

    #[tokio::test]
    async fn local_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.jpg");
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();

        let bytes = resolver().resolve(path.to_str().unwrap()).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn missing_absolute_path_is_a_hard_error() {
        let err = resolver()
            .resolve("/definitely/not/here.png")
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::Read { .. }));
    }

    #[tokio::test]
    async fn raw_bytes_pass_through() {
        let bytes = resolver()
            .resolve_ref(&AttachmentRef::Bytes(vec![9, 8, 7]))
            .await
            .unwrap();
        assert_eq!(bytes, vec![9, 8, 7]);
    }
}
