//! Upload sources

use std::fmt;
use std::io::{self, SeekFrom};
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::debug;

/// Random-access byte source of known size.
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Fill `buf` completely with the bytes starting at `offset`.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn size(&self) -> u64;
}

#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Bytes,
}

impl BytesSource {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }
}

#[async_trait]
impl ReadAt for BytesSource {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(|_| short_read(offset))?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| short_read(offset))?;
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// File read through one shared handle.
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let file = File::open(path.into()).await?;
        Self::from_file(file).await
    }

    pub async fn from_file(file: File) -> io::Result<Self> {
        let size = file.metadata().await?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

#[async_trait]
impl ReadAt for FileSource {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(buf).await?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}

fn short_read(offset: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("read past end of source at offset {}", offset),
    )
}

/// What to upload.
pub enum UploadBody {
    Bytes(Bytes),
    File(PathBuf),
    /// Stream of unknown length, staged to a temporary file before planning
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl UploadBody {
    pub fn from_reader<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        UploadBody::Reader(Box::new(reader))
    }

    /// Turn the body into a random-access source.
    pub(crate) async fn into_source(self) -> io::Result<Box<dyn ReadAt>> {
        match self {
            UploadBody::Bytes(data) => Ok(Box::new(BytesSource::new(data))),
            UploadBody::File(path) => Ok(Box::new(FileSource::open(path).await?)),
            UploadBody::Reader(mut reader) => {
                let staging = tokio::task::spawn_blocking(tempfile::tempfile)
                    .await
                    .map_err(io::Error::other)??;
                let mut file = File::from_std(staging);
                let staged = tokio::io::copy(&mut reader, &mut file).await?;
                file.seek(SeekFrom::Start(0)).await?;
                debug!("Staged {} bytes of streamed upload body", staged);
                Ok(Box::new(FileSource::from_file(file).await?))
            }
        }
    }
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            UploadBody::File(p) => f.debug_tuple("File").field(p).finish(),
            UploadBody::Reader(_) => f.write_str("Reader"),
        }
    }
}

impl From<Bytes> for UploadBody {
    fn from(data: Bytes) -> Self {
        UploadBody::Bytes(data)
    }
}

impl From<Vec<u8>> for UploadBody {
    fn from(data: Vec<u8>) -> Self {
        UploadBody::Bytes(Bytes::from(data))
    }
}

impl From<&'static str> for UploadBody {
    fn from(data: &'static str) -> Self {
        UploadBody::Bytes(Bytes::from_static(data.as_bytes()))
    }
}

impl From<PathBuf> for UploadBody {
    fn from(path: PathBuf) -> Self {
        UploadBody::File(path)
    }
}
