//! Child process records and the teardown supervisor.
//!
//! Every process spawned for a session is tracked as a [`ProcessRecord`]
//! inside an ordered [`ProcessGroup`]. Teardown walks the group in strict
//! reverse start order, escalating from graceful termination to a forced
//! kill, and swallows per-process failures so one stuck process cannot
//! block cleanup of the rest.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tokio::time::timeout;
use tracing::{debug, warn};

/// How long a process gets to exit after graceful termination before it is
/// force-killed.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Control surface of one spawned child process.
///
/// Abstracted as a trait so teardown ordering and error handling can be
/// exercised against stubs; production code always uses [`ChildProcess`].
#[async_trait]
pub trait ProcessHandle: Send {
    /// Request graceful termination (SIGTERM on Unix).
    async fn terminate(&mut self) -> std::io::Result<()>;

    /// Force-kill the process.
    async fn kill(&mut self) -> std::io::Result<()>;

    /// Wait for the process to exit.
    async fn wait(&mut self) -> std::io::Result<()>;
}

/// A [`ProcessHandle`] backed by a real tokio child process.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

#[async_trait]
impl ProcessHandle for ChildProcess {
    async fn terminate(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            match self.child.id() {
                Some(pid) => {
                    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                    if rc == 0 {
                        Ok(())
                    } else {
                        Err(std::io::Error::last_os_error())
                    }
                }
                // Already reaped.
                None => Ok(()),
            }
        }

        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        self.child.wait().await.map(|_| ())
    }
}

/// One spawned child: a display name plus its control handle.
///
/// Records are owned exclusively by the [`ProcessGroup`] that spawned them.
pub struct ProcessRecord {
    name: String,
    handle: Box<dyn ProcessHandle>,
}

impl std::fmt::Debug for ProcessRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The boxed handle has no useful rendering.
        f.debug_struct("ProcessRecord")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ProcessRecord {
    pub fn new(name: impl Into<String>, handle: Box<dyn ProcessHandle>) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    /// Display name of the underlying process.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered sequence of spawned processes for one session.
///
/// Push order is start order; [`ProcessGroup::teardown`] visits the records
/// in exact reverse of it, regardless of how many processes started before
/// a launch failure.
#[derive(Debug, Default)]
pub struct ProcessGroup {
    records: Vec<ProcessRecord>,
}

impl ProcessGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record in start order.
    pub fn push(&mut self, record: ProcessRecord) {
        self.records.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Stop every process in reverse start order.
    ///
    /// Per process: graceful terminate, wait up to the grace period, then
    /// force-kill and wait unconditionally. Failures while stopping one
    /// process are logged and never propagated, so every remaining process
    /// still gets its termination attempt. The group is empty afterwards;
    /// calling this again is a no-op.
    pub async fn teardown(&mut self) {
        for record in self.records.drain(..).rev() {
            stop_one(record).await;
        }
    }
}

async fn stop_one(mut record: ProcessRecord) {
    let name = record.name.clone();

    match record.handle.terminate().await {
        Ok(()) => match timeout(GRACE_PERIOD, record.handle.wait()).await {
            Ok(Ok(())) => {
                debug!(process = %name, "stopped");
                return;
            }
            Ok(Err(err)) => {
                warn!(process = %name, error = %err, "wait after terminate failed");
            }
            Err(_) => {
                warn!(
                    process = %name,
                    "did not exit within {}s, killing",
                    GRACE_PERIOD.as_secs()
                );
            }
        },
        Err(err) => {
            warn!(process = %name, error = %err, "terminate failed");
        }
    }

    if let Err(err) = record.handle.kill().await {
        warn!(process = %name, error = %err, "kill failed");
        return;
    }
    if let Err(err) = record.handle.wait().await {
        warn!(process = %name, error = %err, "wait after kill failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Stub handle that records every call it receives.
    struct StubProcess {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_terminate: bool,
        hang_until_killed: bool,
        killed: bool,
    }

    impl StubProcess {
        fn record(&self, call: &str) {
            self.log.lock().unwrap().push(format!("{}:{}", self.name, call));
        }
    }

    #[async_trait]
    impl ProcessHandle for StubProcess {
        async fn terminate(&mut self) -> std::io::Result<()> {
            self.record("terminate");
            if self.fail_terminate {
                Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no such process",
                ))
            } else {
                Ok(())
            }
        }

        async fn kill(&mut self) -> std::io::Result<()> {
            self.record("kill");
            self.killed = true;
            Ok(())
        }

        async fn wait(&mut self) -> std::io::Result<()> {
            self.record("wait");
            if self.hang_until_killed && !self.killed {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    fn group_of(stubs: Vec<StubProcess>) -> ProcessGroup {
        let mut group = ProcessGroup::new();
        for stub in stubs {
            let name = stub.name;
            group.push(ProcessRecord::new(name, Box::new(stub)));
        }
        group
    }

    fn stub(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> StubProcess {
        StubProcess {
            name,
            log: Arc::clone(log),
            fail_terminate: false,
            hang_until_killed: false,
            killed: false,
        }
    }

    fn terminate_calls(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.ends_with(":terminate"))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn teardown_visits_records_in_reverse_start_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut group = group_of(vec![
            stub("xvfb", &log),
            stub("openbox", &log),
            stub("x11vnc", &log),
            stub("novnc", &log),
            stub("playwright", &log),
        ]);

        group.teardown().await;

        assert_eq!(
            terminate_calls(&log),
            vec![
                "playwright:terminate",
                "novnc:terminate",
                "x11vnc:terminate",
                "openbox:terminate",
                "xvfb:terminate",
            ]
        );
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn one_failing_stop_does_not_block_the_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut failing = stub("openbox", &log);
        failing.fail_terminate = true;

        let mut group = group_of(vec![stub("xvfb", &log), failing, stub("x11vnc", &log)]);
        group.teardown().await;

        // The failing record escalates to kill; its siblings still stop.
        assert_eq!(
            terminate_calls(&log),
            vec!["x11vnc:terminate", "openbox:terminate", "xvfb:terminate"]
        );
        assert!(log.lock().unwrap().contains(&"openbox:kill".to_string()));
    }

    #[test]
    fn debug_rendering_names_each_record() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let group = group_of(vec![stub("xvfb", &log), stub("openbox", &log)]);

        let rendered = format!("{group:?}");
        assert!(rendered.contains("xvfb"));
        assert!(rendered.contains("openbox"));
    }

    #[tokio::test]
    async fn partial_group_teardown_touches_only_started_processes() {
        // Launch failed after two of five steps: only those two exist.
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut group = group_of(vec![stub("xvfb", &log), stub("openbox", &log)]);

        group.teardown().await;

        assert_eq!(terminate_calls(&log), vec!["openbox:terminate", "xvfb:terminate"]);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut group = group_of(vec![stub("xvfb", &log), stub("openbox", &log)]);

        group.teardown().await;
        let calls_after_first = log.lock().unwrap().len();

        group.teardown().await;
        assert_eq!(log.lock().unwrap().len(), calls_after_first);
        assert!(group.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_process_is_force_killed_after_the_grace_period() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stuck = stub("playwright", &log);
        stuck.hang_until_killed = true;

        let mut group = group_of(vec![stub("xvfb", &log), stuck]);
        group.teardown().await;

        let entries = log.lock().unwrap();
        assert!(entries.contains(&"playwright:kill".to_string()));
        // The process behind it still got its termination attempt.
        assert!(entries.contains(&"xvfb:terminate".to_string()));
    }
}
