//! In-memory history provider, mostly for tests.

use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
    sync::{Arc, Mutex},
};

use crate::{
    Error, Result,
    provider::{HistoryLogger, HistoryProvider, expired_below},
};

type Runs = Arc<Mutex<BTreeMap<(String, u64), Vec<String>>>>;

#[derive(Default, Clone)]
pub struct MemHistory {
    runs: Runs,
}

impl MemHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines recorded for a run, if it still exists.
    pub fn lines(&self, tag: &str, index: u64) -> Option<Vec<String>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.get(&(tag.to_string(), index)).cloned()
    }

    pub fn indexes(&self, tag: &str) -> Vec<u64> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.keys()
            .filter(|(t, _)| t == tag)
            .map(|(_, i)| *i)
            .collect()
    }
}

struct MemLogger {
    runs: Runs,
    key: (String, u64),
    keep: bool,
}

impl MemLogger {
    fn push(&self, line: String) {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lines) = runs.get_mut(&self.key) {
            lines.push(line);
        }
    }
}

impl HistoryLogger for MemLogger {
    fn log(&self, line: &str) {
        self.push(line.to_string());
    }

    fn line(&self, line: &str) {
        self.push(line.to_string());
    }

    fn close(&self) {}

    fn finalize(&self) {
        if !self.keep {
            let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
            runs.remove(&self.key);
        }
    }
}

impl HistoryProvider for MemHistory {
    fn new_history(
        &self,
        tag: &str,
        index: u64,
        max_histories: u64,
    ) -> Result<Arc<dyn HistoryLogger>> {
        let below = expired_below(index, max_histories);
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.retain(|(t, i), _| t != tag || *i >= below);
        runs.insert((tag.to_string(), index), Vec::new());
        Ok(Arc::new(MemLogger {
            runs: Arc::clone(&self.runs),
            key: (tag.to_string(), index),
            keep: max_histories > 0,
        }))
    }

    fn get_history(&self, tag: &str, index: u64) -> Result<Box<dyn Read + Send>> {
        let lines = self
            .lines(tag, index)
            .ok_or_else(|| Error::not_found(tag, index))?;
        let mut text = lines.join("\n");
        text.push('\n');
        Ok(Box::new(Cursor::new(text.into_bytes())))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_prunes_old_runs() {
        let h = MemHistory::new();
        for i in 0..5 {
            let log = h.new_history("backup", i, 2).unwrap();
            log.log(&format!("run {i}"));
            log.close();
        }
        assert_eq!(h.indexes("backup"), vec![3, 4]);
        assert_eq!(h.lines("backup", 4).unwrap(), vec!["run 4"]);
    }

    #[test]
    fn zero_retention_discards_on_finalize() {
        let h = MemHistory::new();
        let log = h.new_history("ping", 0, 0).unwrap();
        log.log("hello");
        assert!(h.lines("ping", 0).is_some());
        log.finalize();
        assert!(h.lines("ping", 0).is_none());
    }

    #[test]
    fn get_history_reads_lines() {
        let h = MemHistory::new();
        let log = h.new_history("job", 7, 1).unwrap();
        log.line("*** job - started");
        log.log("done");
        let mut out = String::new();
        h.get_history("job", 7).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "*** job - started\ndone\n");
        assert!(h.get_history("job", 8).is_err());
    }
}
