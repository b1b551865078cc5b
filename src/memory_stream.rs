use crate::Result;
use crate::engine::{FileStream, StreamFactory};
use futures::{AsyncRead, AsyncSeek, AsyncWrite};
use std::cmp::max;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::Poll::Ready;
use std::task::{Context, Poll};

/// In-memory stream factory: backs `:memory:` databases and tests. The
/// underlying buffer can be shared between factories (and kept across
/// close/open) by cloning it out with [`shared_buffer`](Self::shared_buffer).
pub struct MemoryStreamFactory {
    buffer: Mutex<Option<Arc<Mutex<Vec<u8>>>>>,
    backup: Mutex<Option<Vec<u8>>>,
}

impl MemoryStreamFactory {
    /// An absent file: the first writable open creates it.
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(None),
            backup: Mutex::new(None),
        }
    }

    /// A factory over an existing shared buffer.
    pub fn with_data(buffer: Arc<Mutex<Vec<u8>>>) -> Self {
        Self {
            buffer: Mutex::new(Some(buffer)),
            backup: Mutex::new(None),
        }
    }

    /// The live buffer, creating it when absent.
    pub fn shared_buffer(&self) -> Arc<Mutex<Vec<u8>>> {
        self.buffer
            .lock()
            .unwrap()
            .get_or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Content stashed away by `rename_with_suffix` (the `-backup` file of
    /// a rebuild).
    pub fn backup_data(&self) -> Option<Vec<u8>> {
        self.backup.lock().unwrap().clone()
    }
}

impl Default for MemoryStreamFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFactory for MemoryStreamFactory {
    fn get_stream(&self) -> Pin<Box<dyn Future<Output = Result<Box<dyn FileStream>>> + '_>> {
        Box::pin(async move {
            let buffer = self.shared_buffer();
            Ok(Box::new(MemoryStream {
                buffer,
                position: 0,
            }) as Box<dyn FileStream>)
        })
    }

    fn exists(&self) -> Pin<Box<dyn Future<Output = bool> + '_>> {
        Box::pin(async move { self.buffer.lock().unwrap().is_some() })
    }

    fn len(&self) -> Pin<Box<dyn Future<Output = Result<u64>> + '_>> {
        Box::pin(async move {
            Ok(self
                .buffer
                .lock()
                .unwrap()
                .as_ref()
                .map(|buffer| buffer.lock().unwrap().len() as u64)
                .unwrap_or(0))
        })
    }

    fn delete(&self) -> Pin<Box<dyn Future<Output = Result<()>> + '_>> {
        Box::pin(async move {
            *self.buffer.lock().unwrap() = None;
            Ok(())
        })
    }

    fn rename_with_suffix(&self, _suffix: &str) -> Pin<Box<dyn Future<Output = Result<()>> + '_>> {
        Box::pin(async move {
            let taken = self.buffer.lock().unwrap().take();
            *self.backup.lock().unwrap() = taken.map(|buffer| buffer.lock().unwrap().clone());
            Ok(())
        })
    }
}

pub(crate) struct MemoryStream {
    buffer: Arc<Mutex<Vec<u8>>>,
    position: usize,
}

impl FileStream for MemoryStream {
    fn set_len(&self, len: u64) -> Pin<Box<dyn Future<Output = Result<()>> + '_>> {
        Box::pin(async move {
            self.buffer.lock().unwrap().resize(len as usize, 0);
            Ok(())
        })
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = Pin::into_inner(self);
        let buffer = this.buffer.lock().unwrap();

        let available = buffer.len().saturating_sub(this.position);
        let read = available.min(buf.len());
        buf[..read].copy_from_slice(&buffer[this.position..this.position + read]);
        this.position += read;

        Ready(Ok(read))
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = Pin::into_inner(self);
        let mut buffer = this.buffer.lock().unwrap();

        let write_end = this
            .position
            .checked_add(buf.len())
            .ok_or(io::ErrorKind::InvalidInput)?;
        let new_len = max(write_end, buffer.len());
        buffer.resize(new_len, 0u8);
        buffer[this.position..write_end].copy_from_slice(buf);
        this.position = write_end;

        Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Ready(Ok(()))
    }
}

impl AsyncSeek for MemoryStream {
    fn poll_seek(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
        pos: SeekFrom,
    ) -> Poll<io::Result<u64>> {
        let this = Pin::into_inner(self);
        let len = this.buffer.lock().unwrap().len() as i64;

        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => len + offset,
            SeekFrom::Current(offset) => this.position as i64 + offset,
        };

        if target < 0 {
            return Ready(Err(io::ErrorKind::InvalidInput.into()));
        }

        this.position = target as usize;
        Ready(Ok(target as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

    #[tokio::test]
    async fn write_seek_read() {
        let factory = MemoryStreamFactory::new();
        let mut stream = factory.get_stream().await.unwrap();

        stream.write_all(b"hello world").await.unwrap();
        stream.seek(SeekFrom::Start(6)).await.unwrap();

        let mut out = [0u8; 5];
        stream.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"world");

        assert_eq!(factory.len().await.unwrap(), 11);
        assert!(factory.exists().await);
    }

    #[tokio::test]
    async fn rename_stashes_backup() {
        let factory = MemoryStreamFactory::new();
        let mut stream = factory.get_stream().await.unwrap();
        stream.write_all(b"data").await.unwrap();
        drop(stream);

        factory.rename_with_suffix("-backup").await.unwrap();
        assert!(!factory.exists().await);
        assert_eq!(factory.backup_data().unwrap(), b"data");
    }
}
