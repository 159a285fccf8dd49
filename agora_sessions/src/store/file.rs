//! A file-backed session store

use std::{io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;

use super::{SessionStore, StoreError};
use crate::Session;

/// A session store backed by a local JSON file
///
/// The session survives process restarts. The file is created with mode
/// `0o600` on Unix so other local users cannot read the credentials.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Constructs a store persisting to `path`
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read_session(&self) -> Result<Option<Session>, io::Error> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error),
        };
        let mut data = String::new();
        file.read_to_string(&mut data).await?;
        let session = serde_json::from_str(&data)?;
        Ok(Some(session))
    }

    async fn write_session(&self, session: &Session) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(session)?;
        file.write_all(data.as_bytes()).await?;
        Ok(())
    }

    async fn remove_session(&self) -> Result<(), io::Error> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn read(&self) -> Result<Option<Session>, StoreError> {
        Ok(self.read_session().await?)
    }

    async fn write(&self, session: &Session) -> Result<(), StoreError> {
        Ok(self.write_session(session).await?)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        Ok(self.remove_session().await?)
    }
}
