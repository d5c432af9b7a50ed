//! Byte range types

use std::fmt;

/// Closed byte interval `[start, end]` of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for a `Range` or `x-amz-copy-source-range` header.
    pub fn to_header(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

/// A `Range` request as a caller spells it: open ended and suffix forms
/// are allowed, and it only becomes a [`ByteRange`] once the object size
/// is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl RangeSpec {
    pub fn parse(header: &str) -> Result<Self, crate::Error> {
        let range_str = header
            .strip_prefix("bytes=")
            .ok_or_else(|| crate::Error::InvalidRange("Invalid range format".into()))?;

        let (start, end) = range_str
            .split_once('-')
            .ok_or_else(|| crate::Error::InvalidRange("Invalid range format".into()))?;

        let start = if start.is_empty() {
            None
        } else {
            Some(
                start
                    .parse::<u64>()
                    .map_err(|_| crate::Error::InvalidRange("Invalid range start".into()))?,
            )
        };

        let end = if end.is_empty() {
            None
        } else {
            Some(
                end.parse::<u64>()
                    .map_err(|_| crate::Error::InvalidRange("Invalid range end".into()))?,
            )
        };

        if start.is_none() && end.is_none() {
            return Err(crate::Error::InvalidRange("Invalid range".into()));
        }

        Ok(RangeSpec { start, end })
    }

    pub fn resolve(&self, size: u64) -> Result<ByteRange, crate::Error> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => {
                if start > end || start >= size {
                    return Err(crate::Error::InvalidRange("Range not satisfiable".into()));
                }
                Ok(ByteRange::new(start, end.min(size - 1)))
            }
            (Some(start), None) => {
                if start >= size {
                    return Err(crate::Error::InvalidRange("Range not satisfiable".into()));
                }
                Ok(ByteRange::new(start, size - 1))
            }
            (None, Some(suffix)) => {
                if suffix == 0 || size == 0 {
                    return Err(crate::Error::InvalidRange("Range not satisfiable".into()));
                }
                Ok(ByteRange::new(size.saturating_sub(suffix), size - 1))
            }
            (None, None) => Err(crate::Error::InvalidRange("Invalid range".into())),
        }
    }
}

impl From<ByteRange> for RangeSpec {
    fn from(range: ByteRange) -> Self {
        Self {
            start: Some(range.start),
            end: Some(range.end),
        }
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("bytes=")?;
        if let Some(start) = self.start {
            write!(f, "{}", start)?;
        }
        f.write_str("-")?;
        if let Some(end) = self.end {
            write!(f, "{}", end)?;
        }
        Ok(())
    }
}

/// Parsed `Content-Range` response header, e.g. `bytes 0-9/100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub range: Option<ByteRange>,
    /// Total object size, `None` when the server sent `*`.
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn parse(header: &str) -> Result<Self, crate::Error> {
        let invalid = || crate::Error::InvalidRange(format!("Invalid content range: {}", header));

        let rest = header.trim().strip_prefix("bytes ").ok_or_else(invalid)?;
        let (range, total) = rest.split_once('/').ok_or_else(invalid)?;

        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse::<u64>().map_err(|_| invalid())?),
        };

        let range = match range.trim() {
            "*" => None,
            r => {
                let (start, end) = r.split_once('-').ok_or_else(invalid)?;
                let start = start.parse::<u64>().map_err(|_| invalid())?;
                let end = end.parse::<u64>().map_err(|_| invalid())?;
                if start > end {
                    return Err(invalid());
                }
                Some(ByteRange::new(start, end))
            }
        };

        Ok(ContentRange { range, total })
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("bytes ")?;
        match self.range {
            Some(r) => write!(f, "{}-{}", r.start, r.end)?,
            None => f.write_str("*")?,
        }
        match self.total {
            Some(t) => write!(f, "/{}", t),
            None => f.write_str("/*"),
        }
    }
}
