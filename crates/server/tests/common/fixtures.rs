//! Test fixtures for generating test data and request bodies.

use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::{BzEncoder, GzipEncoder};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use stash_core::Checksum;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Compute SHA-256 hash of data as hex string.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn sha256_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// MD5 of data as lowercase hex, as reported in `file.checksum.md5`.
#[allow(dead_code)]
pub fn md5_hex(data: &[u8]) -> String {
    Checksum::compute(data).to_hex()
}

/// Gzip-compress data.
#[allow(dead_code)]
pub async fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(data).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

/// Bzip2-compress data.
#[allow(dead_code)]
pub async fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut encoder = BzEncoder::new(Vec::new());
    encoder.write_all(data).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

/// Decompress a gzip body.
#[allow(dead_code)]
pub async fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut decoder = GzipDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).await.unwrap();
    out
}

/// Entries of a tar archive as `(path, content)` in archive order.
#[allow(dead_code)]
pub fn read_tar(data: &[u8]) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;
    let mut archive = tar::Archive::new(data);
    let mut entries = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        entries.push((path, content));
    }
    entries
}

/// Entries of a zip archive as `(name, content)` in archive order.
#[allow(dead_code)]
pub fn read_zip(data: &[u8]) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        entries.push((file.name().to_string(), content));
    }
    entries
}

/// A `multipart/form-data` body builder.
#[allow(dead_code)]
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

#[allow(dead_code)]
impl MultipartForm {
    pub fn new() -> Self {
        Self {
            boundary: "stash-test-boundary-7MA4YWxkTrZu0gW".to_string(),
            body: Vec::new(),
        }
    }

    /// Append a plain text field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Append a file field.
    pub fn file(mut self, name: &str, filename: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn into_body(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let a = seeded_bytes(42, 100);
        let b = seeded_bytes(42, 100);
        assert_eq!(a, b);

        let c = seeded_bytes(43, 100);
        assert_ne!(a, c);
    }

    #[test]
    fn test_multipart_form_layout() {
        let body = MultipartForm::new()
            .text("attributes_str", "{}")
            .into_body();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("name=\"attributes_str\"\r\n\r\n{}\r\n"));
        assert!(text.ends_with("--\r\n"));
    }
}
