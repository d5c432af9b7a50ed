//! Utility functions

use md5::{Digest, Md5};
use uuid::Uuid;

/// Generate a unique upload or request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string().replace('-', "").to_uppercase()
}

/// Generate an ETag from content hash
pub fn generate_etag(md5_hash: &str) -> String {
    format!("\"{}\"", md5_hash)
}

/// Parse ETag (remove quotes)
pub fn parse_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// Hex MD5 of a buffer
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// ETag of a completed multipart object: MD5 over the concatenated binary
/// part digests, suffixed with the part count.
pub fn multipart_etag<S: AsRef<str>>(part_etags: &[S]) -> String {
    let mut hasher = Md5::new();
    for etag in part_etags {
        if let Ok(raw) = hex::decode(parse_etag(etag.as_ref())) {
            hasher.update(&raw);
        }
    }
    format!("{}-{}", hex::encode(hasher.finalize()), part_etags.len())
}

/// Format datetime for S3 responses
pub fn format_s3_datetime(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_and_etag() {
        let hash = md5_hex(b"hello");
        assert_eq!(hash, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(generate_etag(&hash), "\"5d41402abc4b2a76b9719d911017c592\"");
        assert_eq!(parse_etag("\"abc\""), "abc");
    }

    #[test]
    fn test_multipart_etag_suffix() {
        let parts = vec![md5_hex(b"one"), md5_hex(b"two")];
        let etag = multipart_etag(&parts);
        assert!(etag.ends_with("-2"));
        assert_eq!(etag.len(), 32 + 2);
        assert_ne!(etag, multipart_etag(&parts[..1]));
    }

    #[test]
    fn test_request_id_shape() {
        let id = generate_request_id();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }
}
