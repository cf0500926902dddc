use std::{io::Read, sync::Arc};

use crate::Result;

/// Output sink for a single run.
pub trait HistoryLogger: Send + Sync {
    /// A timestamped line.
    fn log(&self, line: &str);

    /// An unformatted line, used as a section separator between tasks.
    fn line(&self, line: &str);

    fn close(&self);

    /// Close, and discard the run entirely if the job keeps no history.
    fn finalize(&self);
}

pub trait HistoryProvider: Send + Sync {
    /// Open the log for run `index` of `tag`, pruning runs older than the
    /// last `max_histories`.
    fn new_history(
        &self,
        tag: &str,
        index: u64,
        max_histories: u64,
    ) -> Result<Arc<dyn HistoryLogger>>;

    fn get_history(&self, tag: &str, index: u64) -> Result<Box<dyn Read + Send>>;

    /// A permanent link to the run, if this provider serves them.
    fn get_history_url(&self, _tag: &str, _index: u64) -> Option<String> {
        None
    }

    /// Publish the run somewhere linkable and return the link.
    fn make_history_url(&self, _tag: &str, _index: u64) -> Option<String> {
        None
    }
}

/// Logger used for pipelines that keep no history.
pub struct NullLogger;

impl HistoryLogger for NullLogger {
    fn log(&self, _line: &str) {}

    fn line(&self, _line: &str) {}

    fn close(&self) {}

    fn finalize(&self) {}
}

/// Replace path separators so a tag is a single directory component.
pub(crate) fn sanitize_tag(tag: &str) -> String {
    tag.replace(['/', '\\'], ":")
}

/// Indexes that fall outside the retention window once `index` is opened.
pub(crate) fn expired_below(index: u64, max_histories: u64) -> u64 {
    if max_histories == 0 {
        index
    } else {
        (index + 1).saturating_sub(max_histories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_window() {
        // keep 3: opening run 5 keeps 3, 4, 5
        assert_eq!(expired_below(5, 3), 3);
        assert_eq!(expired_below(1, 3), 0);
        // keep 0: everything before the current run goes
        assert_eq!(expired_below(5, 0), 5);
    }

    #[test]
    fn tags_become_single_components() {
        assert_eq!(sanitize_tag("deploy/web\\prod"), "deploy:web:prod");
    }
}
