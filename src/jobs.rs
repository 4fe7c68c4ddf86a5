//! The job table: background and stopped process groups tracked by id.
//!
//! Jobs are created by the executor, mutated by reaper events drained on
//! the main loop, and removed once Done at the top of each loop iteration.

use log::{debug, info};
use nix::unistd::{getpgid, Pid};
use std::fmt;

/// Upper bound on concurrently tracked jobs. On overflow new jobs are
/// dropped from the table but still execute.
pub const MAX_JOBS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Running => f.write_str("Running"),
            JobState::Stopped => f.write_str("Stopped"),
            JobState::Done => f.write_str("Done"),
        }
    }
}

/// A child-status transition observed by the reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// The process exited or was killed by a signal.
    Done,
    /// The process was stopped (SIGTSTP, SIGSTOP, ...).
    Stopped,
    /// The process resumed after SIGCONT.
    Continued,
}

/// One tracked pipeline: job id, its process group, the raw command line
/// it was started with, and its current state.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u32,
    pub pgid: Pid,
    pub cmdline: String,
    pub state: JobState,
}

#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
    next_id: u32,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable {
            jobs: Vec::new(),
            next_id: 1,
        }
    }

    /// Track a new job. Returns its id, or `None` when the table is full
    /// (the pipeline still runs, it just cannot be addressed by `fg`/`bg`).
    pub fn add(&mut self, pgid: Pid, cmdline: &str, state: JobState) -> Option<u32> {
        if self.jobs.len() >= MAX_JOBS {
            debug!("job table full, not tracking pgid {}", pgid);
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        info!("job [{}] pgid {} {}: {}", id, pgid, state, cmdline);
        self.jobs.push(Job {
            id,
            pgid,
            cmdline: cmdline.to_string(),
            state,
        });
        Some(id)
    }

    pub fn get(&self, id: u32) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    fn get_by_pgid_mut(&mut self, pgid: Pid) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.pgid == pgid)
    }

    /// Apply a reaped child status to the owning job.
    ///
    /// The pipeline leader's pid equals the pgid; for other members the
    /// current process group is queried, which is best-effort once the
    /// process has already been reaped.
    pub fn apply(&mut self, pid: Pid, event: StatusEvent) {
        let pgid = if self.jobs.iter().any(|j| j.pgid == pid) {
            pid
        } else {
            getpgid(Some(pid)).unwrap_or(pid)
        };
        if let Some(job) = self.get_by_pgid_mut(pgid) {
            let state = match event {
                StatusEvent::Done => JobState::Done,
                StatusEvent::Stopped => JobState::Stopped,
                StatusEvent::Continued => JobState::Running,
            };
            debug!("job [{}] {} -> {}", job.id, job.state, state);
            job.state = state;
        }
    }

    /// Drop all Done jobs, returning them so the caller can report their
    /// completion.
    pub fn remove_done(&mut self) -> Vec<Job> {
        let mut done = Vec::new();
        self.jobs.retain(|job| {
            if job.state == JobState::Done {
                done.push(job.clone());
                false
            } else {
                true
            }
        });
        done
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Count of jobs currently in the given state.
    pub fn count(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pgid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    #[test]
    fn ids_start_at_one_and_strictly_increase() {
        let mut table = JobTable::new();
        let a = table.add(pgid(100), "sleep 1 &", JobState::Running).unwrap();
        let b = table.add(pgid(200), "sleep 2 &", JobState::Running).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);

        // Ids are never reused, even after removal.
        table.get_mut(a).unwrap().state = JobState::Done;
        table.remove_done();
        let c = table.add(pgid(300), "sleep 3 &", JobState::Running).unwrap();
        assert_eq!(c, 3);
    }

    #[test]
    fn leader_pid_events_update_state() {
        let mut table = JobTable::new();
        let id = table.add(pgid(4242), "sleep 9 &", JobState::Running).unwrap();

        table.apply(pgid(4242), StatusEvent::Stopped);
        assert_eq!(table.get(id).unwrap().state, JobState::Stopped);

        table.apply(pgid(4242), StatusEvent::Continued);
        assert_eq!(table.get(id).unwrap().state, JobState::Running);

        table.apply(pgid(4242), StatusEvent::Done);
        assert_eq!(table.get(id).unwrap().state, JobState::Done);
    }

    #[test]
    fn events_for_unknown_pids_are_ignored() {
        let mut table = JobTable::new();
        table.add(pgid(10), "x &", JobState::Running);
        table.apply(pgid(999_999), StatusEvent::Done);
        assert_eq!(table.get(1).unwrap().state, JobState::Running);
    }

    #[test]
    fn remove_done_reports_and_drops() {
        let mut table = JobTable::new();
        table.add(pgid(1), "a &", JobState::Running);
        table.add(pgid(2), "b &", JobState::Running);
        table.apply(pgid(2), StatusEvent::Done);

        let done = table.remove_done();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].cmdline, "b &");
        assert_eq!(table.len(), 1);
        assert!(table.get(2).is_none());
    }

    #[test]
    fn table_overflow_drops_silently() {
        let mut table = JobTable::new();
        for i in 0..MAX_JOBS {
            assert!(table
                .add(pgid(1000 + i as i32), "x &", JobState::Running)
                .is_some());
        }
        assert!(table.add(pgid(9999), "y &", JobState::Running).is_none());
        assert_eq!(table.len(), MAX_JOBS);
    }

    #[test]
    fn state_counts() {
        let mut table = JobTable::new();
        table.add(pgid(1), "a &", JobState::Running);
        table.add(pgid(2), "b &", JobState::Stopped);
        assert_eq!(table.count(JobState::Running), 1);
        assert_eq!(table.count(JobState::Stopped), 1);
        assert_eq!(table.count(JobState::Done), 0);
    }
}
