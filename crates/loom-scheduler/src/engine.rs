use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    schedule::compute_next_run,
    types::{Job, JobPatch, Payload, Schedule, SessionTarget},
};

fn load_jobs(path: &Path) -> Vec<Job> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(err = %e, path = %path.display(), "malformed job store, starting empty");
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}

fn persist_jobs(path: &Path, jobs: &[Job]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(jobs)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Shared handle for job management (list/add/remove/update) independent of
/// the engine's own tick loop — both operate over the same in-memory store.
#[derive(Clone)]
pub struct SchedulerHandle {
    jobs: Arc<Mutex<Vec<Job>>>,
    path: Arc<PathBuf>,
}

impl SchedulerHandle {
    pub fn new(path: PathBuf) -> Self {
        let jobs = load_jobs(&path);
        Self { jobs: Arc::new(Mutex::new(jobs)), path: Arc::new(path) }
    }

    fn persist(&self, jobs: &[Job]) {
        if let Err(e) = persist_jobs(&self.path, jobs) {
            error!(err = %e, "failed to persist job store");
        }
    }

    /// Assigns an id if missing, schedules if enabled.
    pub fn add_job(&self, name: &str, schedule: Schedule, payload: Payload, session_target: SessionTarget) -> Job {
        let mut job = Job::new(name, schedule, payload, session_target);
        job.next_run_at = compute_next_run(&job.schedule, Utc::now());
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job.clone());
        self.persist(&jobs);
        info!(job_id = %job.id, name = %job.name, "job added");
        job
    }

    pub fn update_job(&self, id: &str, patch: JobPatch) -> Result<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;

        if let Some(name) = patch.name {
            job.name = name;
        }
        if let Some(schedule) = patch.schedule {
            job.schedule = schedule;
        }
        if let Some(payload) = patch.payload {
            job.payload = payload;
        }
        if let Some(enabled) = patch.enabled {
            job.enabled = enabled;
        }
        job.next_run_at = if job.enabled { compute_next_run(&job.schedule, Utc::now()) } else { None };
        let updated = job.clone();
        self.persist(&jobs);
        Ok(updated)
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        self.persist(&jobs);
        info!(job_id = %id, "job removed");
        Ok(())
    }

    pub fn list_jobs(&self, include_disabled: bool) -> Vec<Job> {
        let jobs = self.jobs.lock().unwrap();
        jobs.iter().filter(|j| include_disabled || j.enabled).cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned()
    }

    /// Fires `id` immediately regardless of `next_run_at`, returning the job
    /// so the caller can dispatch its payload. Does not reschedule.
    pub fn run_job(&self, id: &str) -> Result<Job> {
        self.get(id).ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
    }

    pub fn status(&self) -> SchedulerStatus {
        let jobs = self.jobs.lock().unwrap();
        SchedulerStatus {
            total: jobs.len(),
            enabled: jobs.iter().filter(|j| j.enabled).count(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStatus {
    pub total: usize,
    pub enabled: usize,
}

/// Drives job execution at ~1s precision over the store owned by a
/// [`SchedulerHandle`]. Due jobs are forwarded to `fired_tx` (non-blocking)
/// so a slow handler never stalls the tick loop.
pub struct SchedulerEngine {
    handle: SchedulerHandle,
    fired_tx: Option<mpsc::Sender<Job>>,
}

impl SchedulerEngine {
    pub fn new(handle: SchedulerHandle, fired_tx: Option<mpsc::Sender<Job>>) -> Self {
        Self { handle, fired_tx }
    }

    /// Main event loop. Ticks every second until `shutdown` broadcasts `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        self.mark_missed_on_startup();

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Jobs with a `next_run_at` already in the past at startup get their
    /// last_result annotated; they still fire on the next tick (no separate
    /// Missed state — the spec tracks this via `last_result` alone).
    fn mark_missed_on_startup(&mut self) {
        let now = Utc::now();
        let mut jobs = self.handle.jobs.lock().unwrap();
        let mut count = 0;
        for job in jobs.iter_mut() {
            if job.enabled {
                if let Some(next) = job.next_run_at {
                    if next < now && job.last_run_at.is_none() {
                        job.last_result = Some("missed while offline, firing now".to_string());
                        count += 1;
                    }
                }
            }
        }
        if count > 0 {
            warn!(count, "jobs missed while offline");
            self.handle.persist(&jobs);
        }
    }

    fn tick(&mut self) {
        let now = Utc::now();
        let due: Vec<Job> = {
            let jobs = self.handle.jobs.lock().unwrap();
            jobs.iter()
                .filter(|j| j.enabled && j.next_run_at.map(|t| t <= now).unwrap_or(false))
                .cloned()
                .collect()
        };

        for job in due {
            let next = compute_next_run(&job.schedule, now);
            let result = if next.is_none() && !matches!(job.schedule, crate::types::Schedule::Once { .. } | crate::types::Schedule::Interval { .. }) {
                Some("schedule evaluation failed".to_string())
            } else {
                None
            };

            {
                let mut jobs = self.handle.jobs.lock().unwrap();
                if let Some(stored) = jobs.iter_mut().find(|j| j.id == job.id) {
                    stored.last_run_at = Some(now);
                    stored.next_run_at = next;
                    if result.is_some() {
                        stored.last_result = result.clone();
                    } else {
                        stored.last_result = Some("ok".to_string());
                    }
                }
                self.handle.persist(&jobs);
            }

            info!(job_id = %job.id, name = %job.name, "job fired");

            if let Some(ref tx) = self.fired_tx {
                if tx.try_send(job).is_err() {
                    warn!("delivery channel full or closed — fired job dropped");
                }
            }
        }
    }
}
