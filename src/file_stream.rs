use crate::Result;
use crate::engine::{FileStream, StreamFactory};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

/// On-disk stream factory backed by tokio files.
pub struct FileStreamFactory {
    path: PathBuf,
}

impl FileStreamFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `data.db` + `-backup` → `data-backup.db`.
    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("database");
        let mut name = format!("{stem}{suffix}");
        if let Some(extension) = self.path.extension().and_then(|e| e.to_str()) {
            name.push('.');
            name.push_str(extension);
        }
        self.path.with_file_name(name)
    }
}

impl FileStream for Compat<tokio::fs::File> {
    fn set_len(&self, len: u64) -> Pin<Box<dyn Future<Output = Result<()>> + '_>> {
        Box::pin(async move { Ok(self.get_ref().set_len(len).await?) })
    }
}

impl StreamFactory for FileStreamFactory {
    fn get_stream(&self) -> Pin<Box<dyn Future<Output = Result<Box<dyn FileStream>>> + '_>> {
        Box::pin(async move {
            let file = tokio::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)
                .await?;
            Ok(Box::new(file.compat()) as Box<dyn FileStream>)
        })
    }

    fn exists(&self) -> Pin<Box<dyn Future<Output = bool> + '_>> {
        Box::pin(async move { tokio::fs::try_exists(&self.path).await.unwrap_or(false) })
    }

    fn len(&self) -> Pin<Box<dyn Future<Output = Result<u64>> + '_>> {
        Box::pin(async move { Ok(tokio::fs::metadata(&self.path).await?.len()) })
    }

    fn delete(&self) -> Pin<Box<dyn Future<Output = Result<()>> + '_>> {
        Box::pin(async move {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn rename_with_suffix(&self, suffix: &str) -> Pin<Box<dyn Future<Output = Result<()>> + '_>> {
        let target = self.with_suffix(suffix);
        Box::pin(async move {
            // an older backup gives way to the new one
            let _ = tokio::fs::remove_file(&target).await;
            tokio::fs::rename(&self.path, &target).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_goes_before_the_extension() {
        let factory = FileStreamFactory::new("/tmp/app.db");
        assert_eq!(
            factory.with_suffix("-backup"),
            PathBuf::from("/tmp/app-backup.db")
        );

        let bare = FileStreamFactory::new("/tmp/app");
        assert_eq!(bare.with_suffix("-log"), PathBuf::from("/tmp/app-log"));
    }
}
