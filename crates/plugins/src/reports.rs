//! Pipeline reporting tasks, for use as `FailTask` / `FinalTask` steps.

use std::sync::Arc;

use {
    async_trait::async_trait,
    warren_common::TaskRetVal,
    warren_engine::{Robot, TaskDef, TaskHandler},
};

const PIPE_NAME: &str = "GOPHER_PIPE_NAME";

pub fn fail_report() -> TaskDef {
    TaskDef::task("fail-report", Arc::new(Report { failed: true }))
}

pub fn update_report() -> TaskDef {
    TaskDef::task("update-report", Arc::new(Report { failed: false }))
}

struct Report {
    failed: bool,
}

#[async_trait]
impl TaskHandler for Report {
    async fn handle(&self, r: &Robot, _command: &str, _args: &[String]) -> TaskRetVal {
        let mut name = r.get_parameter(PIPE_NAME);
        if name.is_empty() {
            name = r.pipeline_name().to_string();
        }
        let outcome = if self.failed { "failed" } else { "succeeded" };
        r.say(&format!("Pipeline {outcome}: {name}")).await;
        TaskRetVal::Normal
    }
}
