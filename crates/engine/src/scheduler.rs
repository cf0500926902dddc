//! Cron-scheduled jobs from `ScheduledJobs`.

use std::{collections::HashMap, str::FromStr, sync::Arc};

use {
    chrono::{DateTime, Utc},
    cron::Schedule,
    tracing::{debug, info, warn},
    warren_common::Message,
    warren_config::{RobotConfig, normalize_schedule},
};

use crate::{
    engine::Shared,
    pipeline::{self, Invocation},
    task::TaskKind,
};

struct Entry {
    job: String,
    args: Vec<String>,
    schedule: Schedule,
    next: Option<DateTime<Utc>>,
}

fn entries(config: &RobotConfig, now: DateTime<Utc>) -> Vec<Entry> {
    config
        .scheduled_jobs
        .iter()
        .filter_map(|sj| match Schedule::from_str(&normalize_schedule(&sj.schedule)) {
            Ok(schedule) => Some(Entry {
                job: sj.name.clone(),
                args: sj.arguments.clone(),
                next: schedule.after(&now).next(),
                schedule,
            }),
            Err(e) => {
                warn!(
                    job = %sj.name,
                    schedule = %sj.schedule,
                    error = %e,
                    "skipping unparsable schedule"
                );
                None
            },
        })
        .collect()
}

fn next_due(entries: &[Entry]) -> Option<DateTime<Utc>> {
    entries.iter().filter_map(|e| e.next).min()
}

async fn sleep_until(at: Option<DateTime<Utc>>) {
    match at {
        Some(at) => {
            let wait = (at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
        },
        None => std::future::pending().await,
    }
}

/// Fire scheduled jobs until shutdown, re-reading the schedule after each
/// reload.
pub(crate) async fn run(shared: Arc<Shared>) {
    'reload: loop {
        let mut entries = entries(&shared.snapshot().config, Utc::now());
        debug!(jobs = entries.len(), "job schedule loaded");
        loop {
            tokio::select! {
                () = shared.stop.cancelled() => return,
                () = shared.reloaded.notified() => continue 'reload,
                () = sleep_until(next_due(&entries)) => {},
            }
            let now = Utc::now();
            for entry in entries.iter_mut().filter(|e| e.next.is_some_and(|t| t <= now)) {
                fire(&shared, &entry.job, &entry.args);
                entry.next = entry.schedule.after(&now).next();
            }
        }
    }
}

fn fire(shared: &Arc<Shared>, job: &str, args: &[String]) {
    let snapshot = shared.snapshot();
    let Some(task) = snapshot.task(job) else {
        warn!(job, "scheduled job is not defined");
        return;
    };
    if task.disabled {
        debug!(job, "scheduled job is disabled");
        return;
    }
    if task.kind != TaskKind::Job {
        warn!(job, kind = %task.kind, "scheduled task is not a job");
        return;
    }
    let channel = task
        .config
        .channel
        .clone()
        .filter(|c| !c.is_empty())
        .or_else(|| snapshot.config.default_job_channel.clone())
        .unwrap_or_default();
    info!(job, channel = %channel, "starting scheduled job");
    pipeline::spawn(
        shared,
        Arc::clone(&snapshot),
        Invocation::run(Arc::clone(task), args.to_vec()),
        Message::synthetic(shared.connector.protocol(), &channel),
        HashMap::new(),
    );
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::{TimeZone, Timelike},
        warren_config::ScheduledJob,
    };

    fn job(name: &str, schedule: &str) -> ScheduledJob {
        ScheduledJob {
            name: name.into(),
            schedule: schedule.into(),
            arguments: vec!["quick".into()],
        }
    }

    #[test]
    fn five_field_schedules_fire_on_the_minute() {
        let mut config = RobotConfig::default();
        config.scheduled_jobs = vec![
            job("backup", "*/5 * * * *"),
            job("broken", "every tuesday"),
            job("report", "0 30 * * * *"),
        ];
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 30).unwrap();
        let entries = entries(&config, now);
        assert_eq!(entries.len(), 2);
        let backup = entries[0].next.unwrap();
        assert_eq!((backup.minute(), backup.second()), (5, 0));
        assert_eq!(entries[0].args, vec!["quick"]);
        let report = entries[1].next.unwrap();
        assert_eq!((report.minute(), report.second()), (30, 0));
        assert_eq!(next_due(&entries), Some(backup));
    }

    #[test]
    fn nothing_due_without_jobs() {
        let entries = entries(&RobotConfig::default(), Utc::now());
        assert!(next_due(&entries).is_none());
    }
}
