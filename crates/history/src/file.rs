//! File history: `<dir>/<tag>/run-<index>.log`.

use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use {
    chrono::Local,
    serde::Deserialize,
    tracing::{error, info, warn},
};

use crate::{
    Error, Result,
    error::Context,
    provider::{HistoryLogger, HistoryProvider, expired_below, sanitize_tag},
};

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileHistoryConfig {
    #[serde(default)]
    pub directory: PathBuf,
    /// Web root serving `directory`, for permanent links.
    #[serde(default, rename = "URLPrefix")]
    pub url_prefix: Option<String>,
}

pub struct FileHistory {
    dir: PathBuf,
    url_prefix: Option<String>,
}

impl FileHistory {
    pub fn open(config: FileHistoryConfig) -> Result<Self> {
        if config.directory.as_os_str().is_empty() {
            return Err(Error::message(
                "HistoryConfig missing Directory required by the file history provider",
            ));
        }
        fs::create_dir_all(&config.directory).with_context(|| {
            format!("creating history directory {}", config.directory.display())
        })?;
        info!(dir = %config.directory.display(), "initialized file history provider");
        Ok(Self {
            dir: config.directory,
            url_prefix: config
                .url_prefix
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        })
    }

    fn run_path(&self, tag: &str, index: u64) -> PathBuf {
        self.dir
            .join(sanitize_tag(tag))
            .join(format!("run-{index}.log"))
    }
}

struct FileLogger {
    path: PathBuf,
    file: Mutex<Option<File>>,
    keep: bool,
}

impl FileLogger {
    fn write_line(&self, text: &str) {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(f) = file.as_mut()
            && let Err(e) = writeln!(f, "{text}")
        {
            warn!(path = %self.path.display(), error = %e, "writing history line");
        }
    }
}

impl HistoryLogger for FileLogger {
    fn log(&self, line: &str) {
        let ts = Local::now().format(TIMESTAMP_FORMAT);
        self.write_line(&format!("{ts} {line}"));
    }

    fn line(&self, line: &str) {
        self.write_line(line);
    }

    fn close(&self) {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut f) = file.take() {
            let _ = f.flush();
        }
    }

    fn finalize(&self) {
        self.close();
        if !self.keep
            && let Err(e) = fs::remove_file(&self.path)
        {
            warn!(path = %self.path.display(), error = %e, "removing unretained history");
        }
    }
}

fn prune(dir: &Path, below: u64) {
    let mut i = below;
    while i > 0 {
        i -= 1;
        let path = dir.join(format!("run-{i}.log"));
        if !path.exists() {
            break;
        }
        if let Err(e) = fs::remove_file(&path) {
            // Further attempts would most likely fail the same way.
            error!(path = %path.display(), error = %e, "removing old history");
            break;
        }
    }
}

impl HistoryProvider for FileHistory {
    fn new_history(
        &self,
        tag: &str,
        index: u64,
        max_histories: u64,
    ) -> Result<Arc<dyn HistoryLogger>> {
        let path = self.run_path(tag, index);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.dir.clone());
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating history directory {}", dir.display()))?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("creating history file {}", path.display()))?;
        prune(&dir, expired_below(index, max_histories));
        Ok(Arc::new(FileLogger {
            path,
            file: Mutex::new(Some(file)),
            keep: max_histories > 0,
        }))
    }

    fn get_history(&self, tag: &str, index: u64) -> Result<Box<dyn Read + Send>> {
        let path = self.run_path(tag, index);
        match File::open(&path) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(tag, index))
            },
            Err(e) => Err(e.into()),
        }
    }

    fn get_history_url(&self, tag: &str, index: u64) -> Option<String> {
        let prefix = self.url_prefix.as_ref()?;
        Some(format!("{prefix}/{}/run-{index}.log", sanitize_tag(tag)))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    fn provider(dir: &Path, prefix: Option<&str>) -> FileHistory {
        FileHistory::open(FileHistoryConfig {
            directory: dir.to_path_buf(),
            url_prefix: prefix.map(String::from),
        })
        .unwrap()
    }

    #[test]
    fn writes_prunes_and_reads() {
        let tmp = TempDir::new().unwrap();
        let h = provider(tmp.path(), None);
        for i in 0..4 {
            let log = h.new_history("update", i, 2).unwrap();
            log.line(&format!("*** update - run {i}"));
            log.log("working");
            log.finalize();
        }
        let dir = tmp.path().join("update");
        assert!(!dir.join("run-1.log").exists());
        assert!(dir.join("run-2.log").exists());
        assert!(dir.join("run-3.log").exists());

        let mut text = String::new();
        h.get_history("update", 3).unwrap().read_to_string(&mut text).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("*** update - run 3"));
        assert!(lines.next().unwrap().ends_with(" working"));
    }

    #[test]
    fn zero_retention_removes_log() {
        let tmp = TempDir::new().unwrap();
        let h = provider(tmp.path(), None);
        let log = h.new_history("ping", 0, 0).unwrap();
        log.log("x");
        log.finalize();
        assert!(matches!(
            h.get_history("ping", 0).err().unwrap(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn url_prefix_mints_links() {
        let tmp = TempDir::new().unwrap();
        let h = provider(tmp.path(), Some("https://bot.example.com/history/"));
        assert_eq!(
            h.get_history_url("deploy/web", 12).as_deref(),
            Some("https://bot.example.com/history/deploy:web/run-12.log")
        );
        let plain = provider(tmp.path(), None);
        assert!(plain.get_history_url("deploy", 1).is_none());
    }

    #[test]
    fn missing_directory_is_rejected() {
        assert!(FileHistory::open(FileHistoryConfig::default()).is_err());
    }
}
