//! Dependency scheduler.
//!
//! Orders a batch of capture jobs into groups, one per root job (a job
//! without a dependency). A group lists its root first and then every job
//! whose dependency chain leads to that root, each after its dependency.
//! A job with `wait_seconds` is triggered that long after its dependency.
//! Groups run concurrently; a failed trigger skips the failed job's
//! dependents but never the rest of the run.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep_until};
use tracing::{info, warn};

use crate::Result;
use crate::alert::{Alerter, notify_quietly};
use crate::domain::{CaptureSpec, DependsOn};

const ALERT_SOURCE: &str = "scheduler";

/// A schedulable capture job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureJob {
    pub name: String,
    pub capture_type: String,
    pub depends_on: Option<DependsOn>,
}

impl CaptureJob {
    pub fn new(name: impl Into<String>, capture_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capture_type: capture_type.into(),
            depends_on: None,
        }
    }

    pub fn depends_on(mut self, name: impl Into<String>, wait_seconds: u64) -> Self {
        self.depends_on = Some(DependsOn {
            name: name.into(),
            wait_seconds,
        });
        self
    }

    pub fn from_spec(spec: &CaptureSpec) -> Self {
        Self {
            name: spec.name.clone(),
            capture_type: spec.capture_type.clone(),
            depends_on: spec.depends_on.clone(),
        }
    }
}

/// A job placed in a group, with its delay from the group's start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub job: CaptureJob,
    pub offset: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobGroup {
    pub root: String,
    /// Root first; every job after its dependency, ordered by offset.
    pub jobs: Vec<ScheduledJob>,
}

impl JobGroup {
    pub fn names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.job.name.as_str()).collect()
    }
}

/// A job left out of the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedJob {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub groups: Vec<JobGroup>,
    pub rejected: Vec<RejectedJob>,
}

/// Find the root a job's dependency chain leads to.
fn resolve_root(name: &str, jobs: &HashMap<&str, &CaptureJob>) -> std::result::Result<String, String> {
    let mut current = name;
    let mut visited = HashSet::from([name]);

    loop {
        let Some(dep) = jobs.get(current).and_then(|j| j.depends_on.as_ref()) else {
            return Ok(current.to_string());
        };
        let dep_name = dep.name.as_str();

        if !jobs.contains_key(dep_name) {
            return Err(if current == name {
                format!("depends on unknown job '{dep_name}'")
            } else {
                format!("depends on '{current}', which depends on unknown job '{dep_name}'")
            });
        }
        if !visited.insert(dep_name) {
            return Err(format!("dependency cycle through '{dep_name}'"));
        }
        current = dep_name;
    }
}

/// Build the execution groups for `jobs`.
pub fn schedule(jobs: Vec<CaptureJob>) -> Schedule {
    let mut rejected = Vec::new();
    let mut unique: Vec<CaptureJob> = Vec::with_capacity(jobs.len());
    let mut seen = HashSet::new();

    for job in jobs {
        if seen.insert(job.name.clone()) {
            unique.push(job);
        } else {
            rejected.push(RejectedJob {
                reason: "duplicate job name".into(),
                name: job.name,
            });
        }
    }

    let by_name: HashMap<&str, &CaptureJob> = unique.iter().map(|j| (j.name.as_str(), j)).collect();

    let mut roots: Vec<&CaptureJob> = Vec::new();
    let mut valid: HashSet<&str> = HashSet::new();
    for job in &unique {
        match resolve_root(&job.name, &by_name) {
            Ok(_) => {
                valid.insert(job.name.as_str());
                if job.depends_on.is_none() {
                    roots.push(job);
                }
            }
            Err(reason) => rejected.push(RejectedJob {
                name: job.name.clone(),
                reason,
            }),
        }
    }

    let mut children: HashMap<&str, Vec<&CaptureJob>> = HashMap::new();
    for job in &unique {
        if let Some(dep) = &job.depends_on {
            if valid.contains(job.name.as_str()) {
                children.entry(dep.name.as_str()).or_default().push(job);
            }
        }
    }

    let groups = roots
        .into_iter()
        .map(|root| {
            let mut jobs = vec![ScheduledJob {
                job: root.clone(),
                offset: Duration::ZERO,
            }];
            let mut queue = VecDeque::from([(root.name.as_str(), Duration::ZERO)]);

            while let Some((parent, parent_offset)) = queue.pop_front() {
                for child in children.get(parent).into_iter().flatten() {
                    let wait = child
                        .depends_on
                        .as_ref()
                        .map_or(0, |d| d.wait_seconds);
                    let offset = parent_offset + Duration::from_secs(wait);
                    jobs.push(ScheduledJob {
                        job: (*child).clone(),
                        offset,
                    });
                    queue.push_back((child.name.as_str(), offset));
                }
            }

            // Stable: ties keep discovery order, so a dependency stays ahead.
            jobs.sort_by_key(|j| j.offset);
            JobGroup {
                root: root.name.clone(),
                jobs,
            }
        })
        .collect();

    Schedule { groups, rejected }
}

/// Starts a capture job. Returns once the job is handed off.
#[async_trait]
pub trait JobTrigger: Send + Sync {
    async fn trigger(&self, job: &CaptureJob) -> Result<()>;
}

/// Outcome of a scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub triggered: Vec<String>,
    pub failed: Vec<String>,
    /// Jobs not triggered because a dependency failed.
    pub skipped: Vec<String>,
    pub rejected: Vec<RejectedJob>,
}

#[derive(Default)]
struct GroupReport {
    triggered: Vec<String>,
    failed: Vec<String>,
    skipped: Vec<String>,
}

pub struct DependencyScheduler {
    trigger: Arc<dyn JobTrigger>,
    alerter: Arc<dyn Alerter>,
}

impl DependencyScheduler {
    pub fn new(trigger: Arc<dyn JobTrigger>, alerter: Arc<dyn Alerter>) -> Self {
        Self { trigger, alerter }
    }

    /// Schedule and trigger `jobs`, waiting out every configured delay.
    pub async fn run(&self, jobs: Vec<CaptureJob>) -> RunSummary {
        let Schedule { groups, rejected } = schedule(jobs);

        for job in &rejected {
            warn!(job = %job.name, reason = %job.reason, "Job rejected");
            notify_quietly(
                self.alerter.as_ref(),
                ALERT_SOURCE,
                &format!("job '{}' rejected: {}", job.name, job.reason),
            )
            .await;
        }

        info!(groups = groups.len(), rejected = rejected.len(), "Starting scheduled run");
        let reports = join_all(groups.iter().map(|group| self.run_group(group))).await;

        let mut summary = RunSummary {
            rejected,
            ..Default::default()
        };
        for report in reports {
            summary.triggered.extend(report.triggered);
            summary.failed.extend(report.failed);
            summary.skipped.extend(report.skipped);
        }
        summary
    }

    async fn run_group(&self, group: &JobGroup) -> GroupReport {
        let start = Instant::now();
        let mut report = GroupReport::default();
        let mut blocked: HashSet<&str> = HashSet::new();

        for scheduled in &group.jobs {
            let job = &scheduled.job;

            if let Some(dep) = &job.depends_on {
                if blocked.contains(dep.name.as_str()) {
                    info!(job = %job.name, dependency = %dep.name, "Skipping job, dependency failed");
                    blocked.insert(job.name.as_str());
                    report.skipped.push(job.name.clone());
                    continue;
                }
            }

            sleep_until(start + scheduled.offset).await;

            match self.trigger.trigger(job).await {
                Ok(()) => {
                    info!(job = %job.name, group = %group.root, offset_secs = scheduled.offset.as_secs(), "Job triggered");
                    report.triggered.push(job.name.clone());
                }
                Err(e) => {
                    warn!(job = %job.name, error = %e, "Job trigger failed");
                    notify_quietly(
                        self.alerter.as_ref(),
                        ALERT_SOURCE,
                        &format!("job '{}' failed to start: {e}", job.name),
                    )
                    .await;
                    blocked.insert(job.name.as_str());
                    report.failed.push(job.name.clone());
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_dependency() {
        let schedule = schedule(vec![
            CaptureJob::new("A", "daily"),
            CaptureJob::new("B", "daily").depends_on("A", 60),
        ]);

        assert_eq!(schedule.groups.len(), 1);
        assert_eq!(schedule.groups[0].names(), vec!["A", "B"]);
        assert_eq!(schedule.groups[0].jobs[1].offset, Duration::from_secs(60));
        assert!(schedule.rejected.is_empty());
    }

    #[test]
    fn test_dependent_listed_before_root() {
        let schedule = schedule(vec![
            CaptureJob::new("C", "daily").depends_on("B", 10),
            CaptureJob::new("B", "daily").depends_on("A", 20),
            CaptureJob::new("A", "daily"),
            CaptureJob::new("X", "daily"),
        ]);

        assert_eq!(schedule.groups.len(), 2);
        assert_eq!(schedule.groups[0].names(), vec!["A", "B", "C"]);
        assert_eq!(schedule.groups[0].jobs[2].offset, Duration::from_secs(30));
        assert_eq!(schedule.groups[1].names(), vec!["X"]);
    }

    #[test]
    fn test_siblings_ordered_by_offset() {
        let schedule = schedule(vec![
            CaptureJob::new("A", "daily"),
            CaptureJob::new("slow", "daily").depends_on("A", 120),
            CaptureJob::new("fast", "daily").depends_on("A", 5),
            CaptureJob::new("now", "daily").depends_on("A", 0),
        ]);

        assert_eq!(schedule.groups[0].names(), vec!["A", "now", "fast", "slow"]);
    }

    #[test]
    fn test_rejections() {
        let schedule = schedule(vec![
            CaptureJob::new("A", "daily"),
            CaptureJob::new("A", "daily"),
            CaptureJob::new("orphan", "daily").depends_on("missing", 0),
            CaptureJob::new("grand", "daily").depends_on("orphan", 0),
            CaptureJob::new("p", "daily").depends_on("q", 0),
            CaptureJob::new("q", "daily").depends_on("p", 0),
        ]);

        let mut names: Vec<&str> = schedule.rejected.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["A", "grand", "orphan", "p", "q"]);
        assert_eq!(schedule.groups.len(), 1);
        assert_eq!(schedule.groups[0].names(), vec!["A"]);
    }

    /// Records the instant each job is triggered; fails the named jobs.
    #[derive(Default)]
    struct RecordingTrigger {
        fired: parking_lot::Mutex<Vec<(String, Instant)>>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl JobTrigger for RecordingTrigger {
        async fn trigger(&self, job: &CaptureJob) -> Result<()> {
            self.fired.lock().push((job.name.clone(), Instant::now()));
            if self.failing.contains(&job.name) {
                return Err(crate::Error::config("boom"));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependent_waits_after_dependency() {
        let trigger = Arc::new(RecordingTrigger::default());
        let alerter = Arc::new(crate::alert::MemoryAlerter::new());
        let scheduler = DependencyScheduler::new(trigger.clone(), alerter.clone());

        let summary = scheduler
            .run(vec![
                CaptureJob::new("B", "daily").depends_on("A", 60),
                CaptureJob::new("A", "daily"),
                CaptureJob::new("X", "daily"),
            ])
            .await;

        assert_eq!(summary.triggered.len(), 3);
        let fired = trigger.fired.lock().clone();
        let at = |name: &str| fired.iter().find(|(n, _)| n == name).map(|(_, t)| *t).unwrap();
        assert!(at("B") - at("A") >= Duration::from_secs(60));
        assert!(at("X") - at("A") < Duration::from_secs(1));
        assert!(alerter.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trigger_skips_dependents_only() {
        let trigger = Arc::new(RecordingTrigger {
            failing: vec!["A".into()],
            ..Default::default()
        });
        let alerter = Arc::new(crate::alert::MemoryAlerter::new());
        let scheduler = DependencyScheduler::new(trigger.clone(), alerter.clone());

        let summary = scheduler
            .run(vec![
                CaptureJob::new("A", "daily"),
                CaptureJob::new("B", "daily").depends_on("A", 10),
                CaptureJob::new("C", "daily").depends_on("B", 10),
                CaptureJob::new("X", "daily"),
                CaptureJob::new("Y", "daily").depends_on("ghost", 0),
            ])
            .await;

        assert_eq!(summary.failed, vec!["A"]);
        assert_eq!(summary.skipped, vec!["B", "C"]);
        assert_eq!(summary.triggered, vec!["X"]);
        assert_eq!(summary.rejected.len(), 1);
        assert_eq!(alerter.len(), 2);
    }

    #[test]
    fn test_from_spec() {
        let spec: CaptureSpec = serde_json::from_value(serde_json::json!({
            "name": "B", "capture_type": "daily", "url": "https://x",
            "depends_on": {"name": "A", "wait_seconds": 60},
            "parameters": [{"type": "static"}]
        }))
        .unwrap();
        assert_eq!(CaptureJob::from_spec(&spec), CaptureJob::new("B", "daily").depends_on("A", 60));
    }
}
