//! Download sinks

use std::io::{self, SeekFrom};
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Destination that accepts writes at arbitrary offsets, possibly from
/// several tasks at once.
#[async_trait]
pub trait WriteAt: Send + Sync {
    async fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Called once the final size is known.
    async fn set_len(&self, _size: u64) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    /// Create or truncate `path`.
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::create(path).await?))
    }

    pub fn new(file: File) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }

    pub async fn flush(&self) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        file.sync_all().await
    }
}

#[async_trait]
impl WriteAt for FileSink {
    async fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await
    }

    async fn set_len(&self, size: u64) -> io::Result<()> {
        self.file.lock().await.set_len(size).await
    }
}

/// Growable in-memory buffer.
#[derive(Debug, Default)]
pub struct MemorySink {
    data: parking_lot::Mutex<Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

#[async_trait]
impl WriteAt for MemorySink {
    async fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        let end = start + data.len();
        let mut buf = self.data.lock();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn set_len(&self, size: u64) -> io::Result<()> {
        let size = usize::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "size too large"))?;
        self.data.lock().resize(size, 0);
        Ok(())
    }
}
