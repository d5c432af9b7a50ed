//! Server-side copy types

use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use super::{ByteRange, ObjectAttributes};

/// Characters left as-is when encoding a copy source header.
const COPY_SOURCE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Source object of a copy, as carried by `x-amz-copy-source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySource {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
}

impl CopySource {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
        }
    }

    /// Parse a URL-encoded `bucket/key[?versionId=id]` descriptor.
    ///
    /// The query is split off before decoding, so an encoded `?` stays
    /// part of the key.
    pub fn parse(encoded: &str) -> Result<Self, crate::Error> {
        let (path, query) = match encoded.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (encoded, None),
        };
        let path = decode(path)?;
        let path = path.strip_prefix('/').unwrap_or(&path);

        let (bucket, key) = path.split_once('/').ok_or_else(|| {
            crate::Error::InvalidArgument(format!("Invalid copy source, missing key: {}", encoded))
        })?;
        if bucket.is_empty() {
            return Err(crate::Error::InvalidArgument(format!(
                "Invalid copy source, missing bucket: {}",
                encoded
            )));
        }
        if key.is_empty() {
            return Err(crate::Error::InvalidArgument(format!(
                "Invalid copy source, missing key: {}",
                encoded
            )));
        }

        let version_id = match query {
            Some(q) => q
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(name, _)| *name == "versionId")
                .map(|(_, value)| decode(value))
                .transpose()?
                .filter(|v| !v.is_empty()),
            None => None,
        };

        Ok(CopySource {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id,
        })
    }

    /// Encoded header value.
    pub fn to_header(&self) -> String {
        let mut header = format!(
            "{}/{}",
            utf8_percent_encode(&self.bucket, COPY_SOURCE_ENCODE_SET),
            utf8_percent_encode(&self.key, COPY_SOURCE_ENCODE_SET)
        );
        if let Some(version) = &self.version_id {
            header.push_str("?versionId=");
            header.push_str(&utf8_percent_encode(version, COPY_SOURCE_ENCODE_SET).to_string());
        }
        header
    }

    pub fn object_ref(&self) -> super::ObjectRef {
        super::ObjectRef {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            version_id: self.version_id.clone(),
        }
    }
}

fn decode(value: &str) -> Result<String, crate::Error> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|v| v.into_owned())
        .map_err(|e| crate::Error::InvalidArgument(format!("Invalid copy source encoding: {}", e)))
}

/// Whether a copy keeps the source metadata or replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetadataDirective {
    #[default]
    Copy,
    Replace,
}

impl MetadataDirective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "COPY",
            Self::Replace => "REPLACE",
        }
    }
}

/// Preconditions evaluated against the copy source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyConditions {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

impl CopyConditions {
    pub fn is_empty(&self) -> bool {
        self.if_match.is_none()
            && self.if_none_match.is_none()
            && self.if_modified_since.is_none()
            && self.if_unmodified_since.is_none()
    }

    /// Evaluate against the source's current etag and modification time.
    ///
    /// Date conditions fail when the modification time is unknown.
    pub fn check(
        &self,
        etag: &str,
        last_modified: Option<DateTime<Utc>>,
    ) -> Result<(), crate::Error> {
        let etag = crate::utils::parse_etag(etag);
        if let Some(expected) = &self.if_match {
            if crate::utils::parse_etag(expected) != etag {
                return Err(crate::Error::PreconditionFailed);
            }
        }
        if let Some(unexpected) = &self.if_none_match {
            if crate::utils::parse_etag(unexpected) == etag {
                return Err(crate::Error::PreconditionFailed);
            }
        }
        if let Some(since) = self.if_modified_since {
            if last_modified.map_or(true, |modified| modified <= since) {
                return Err(crate::Error::PreconditionFailed);
            }
        }
        if let Some(since) = self.if_unmodified_since {
            if last_modified.map_or(true, |modified| modified > since) {
                return Err(crate::Error::PreconditionFailed);
            }
        }
        Ok(())
    }
}

/// Single-request copy of a whole object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyObjectRequest {
    pub bucket: String,
    pub key: String,
    pub source: CopySource,
    pub metadata_directive: MetadataDirective,
    /// Only applied with [`MetadataDirective::Replace`].
    pub attributes: ObjectAttributes,
    pub conditions: CopyConditions,
}

/// Copy of one source range into a multipart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPartCopyRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number: i32,
    pub source: CopySource,
    pub source_range: ByteRange,
    pub conditions: CopyConditions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_copy_source_parse() {
        let src = CopySource::parse("a/b/c.txt").unwrap();
        assert_eq!(src.bucket, "a");
        assert_eq!(src.key, "b/c.txt");
        assert_eq!(src.version_id, None);

        let src = CopySource::parse("a/b/c.txt?versionId=foo").unwrap();
        assert_eq!(src.bucket, "a");
        assert_eq!(src.key, "b/c.txt");
        assert_eq!(src.version_id.as_deref(), Some("foo"));

        let src = CopySource::parse("a/b%20c%2Fd.txt").unwrap();
        assert_eq!(src.key, "b c/d.txt");

        let src = CopySource::parse("a/report%3F.csv?versionId=v%2B1").unwrap();
        assert_eq!(src.key, "report?.csv");
        assert_eq!(src.version_id.as_deref(), Some("v+1"));

        for bad in ["", "a", "a/", "/b"] {
            assert!(CopySource::parse(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_copy_source_header_round_trip() {
        let src = CopySource {
            bucket: "bucket".into(),
            key: "dir/file name+1.txt".into(),
            version_id: Some("v1".into()),
        };
        let header = src.to_header();
        assert_eq!(header, "bucket/dir/file%20name%2B1.txt?versionId=v1");
        assert_eq!(CopySource::parse(&header).unwrap(), src);

        let src = CopySource::new("src", "report?.csv");
        let header = src.to_header();
        assert_eq!(header, "src/report%3F.csv");
        assert_eq!(CopySource::parse(&header).unwrap(), src);
    }

    #[test]
    fn test_conditions_check() {
        let modified = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut cond = CopyConditions::default();
        assert!(cond.is_empty());
        assert!(cond.check("\"abc\"", Some(modified)).is_ok());

        cond.if_match = Some("abc".into());
        assert!(cond.check("\"abc\"", Some(modified)).is_ok());
        assert!(cond.check("\"def\"", Some(modified)).is_err());

        let cond = CopyConditions {
            if_unmodified_since: Some(before),
            ..Default::default()
        };
        assert!(matches!(
            cond.check("\"abc\"", Some(modified)),
            Err(crate::Error::PreconditionFailed)
        ));

        let cond = CopyConditions {
            if_modified_since: Some(before),
            ..Default::default()
        };
        assert!(cond.check("\"abc\"", Some(modified)).is_ok());
        assert!(cond.check("\"abc\"", None).is_err());

        let cond = CopyConditions {
            if_unmodified_since: Some(modified),
            ..Default::default()
        };
        assert!(cond.check("\"abc\"", Some(before)).is_ok());
        assert!(matches!(
            cond.check("\"abc\"", None),
            Err(crate::Error::PreconditionFailed)
        ));
    }
}
