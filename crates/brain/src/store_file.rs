//! Directory-backed brain: one file per key, written atomically.

use std::path::{Path, PathBuf};

use {async_trait::async_trait, tokio::fs, tracing::info};

use crate::{
    Result,
    error::{Context, Error},
    store::SimpleBrain,
};

pub struct FileBrain {
    dir: PathBuf,
}

impl FileBrain {
    /// Open (creating if needed) the brain directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating brain directory {}", dir.display()))?;
        let meta = fs::metadata(&dir).await?;
        if !meta.is_dir() {
            return Err(Error::message(format!(
                "brain directory {} is not a directory",
                dir.display()
            )));
        }
        info!(dir = %dir.display(), "initialized file-backed brain");
        Ok(Self { dir })
    }

    fn datum_path(&self, key: &str) -> PathBuf {
        let name = key.replace(['/', '\\'], ":");
        self.dir.join(name)
    }
}

#[async_trait]
impl SimpleBrain for FileBrain {
    async fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.datum_path(key);
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, value)
            .await
            .with_context(|| format!("writing datum {key}"))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming datum {key}"))?;
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.datum_path(key);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::external(format!("reading datum {key}"), e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") {
                continue;
            }
            keys.push(name);
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.datum_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::external(format!("deleting datum {key}"), e)),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    #[tokio::test]
    async fn file_brain_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let brain = FileBrain::open(tmp.path().join("brain")).await.unwrap();

        brain.store("lists:listmap", b"{}").await.unwrap();
        assert_eq!(
            brain.retrieve("lists:listmap").await.unwrap(),
            Some(b"{}".to_vec())
        );
        assert!(brain.retrieve("missing").await.unwrap().is_none());
        assert_eq!(brain.list().await.unwrap(), vec!["lists:listmap"]);
    }

    #[tokio::test]
    async fn overwrite_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let brain = FileBrain::open(tmp.path()).await.unwrap();

        brain.store("k", b"one").await.unwrap();
        brain.store("k", b"two").await.unwrap();
        assert_eq!(brain.retrieve("k").await.unwrap(), Some(b"two".to_vec()));
        assert!(!tmp.path().join("k.tmp").exists());
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let tmp = TempDir::new().unwrap();
        let brain = FileBrain::open(tmp.path()).await.unwrap();
        brain.delete("nope").await.unwrap();
        brain.store("k", b"v").await.unwrap();
        brain.delete("k").await.unwrap();
        assert!(brain.list().await.unwrap().is_empty());
    }
}
