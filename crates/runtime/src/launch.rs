//! Sequential process-group launch.
//!
//! A launch plan is an ordered list of [`CommandSpec`]s. Each step may
//! depend on state established by the previous one (the virtual display
//! must exist before anything binds to it), so the plan is spawned strictly
//! in order, never in parallel. A failure at any step tears down everything
//! started so far and surfaces a fatal error; a partially-started group is
//! never returned to the caller.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::process::{ChildProcess, ProcessGroup, ProcessRecord};

/// Upper bound on waiting for a step's TCP port to start accepting
/// connections before continuing anyway.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between readiness probes.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One step of a launch plan.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    name: String,
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    settle_delay: Option<Duration>,
    ready_port: Option<u16>,
}

impl CommandSpec {
    /// Creates a step that runs `program` with no arguments.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            settle_delay: None,
            ready_port: None,
        }
    }

    /// Appends command-line arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment override on top of the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sleeps for a fixed window after spawning, for dependencies with no
    /// probeable readiness surface.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = Some(delay);
        self
    }

    /// Polls the given loopback TCP port after spawning, bounded by
    /// [`READY_TIMEOUT`], before moving on to the next step.
    pub fn ready_port(mut self, port: u16) -> Self {
        self.ready_port = Some(port);
        self
    }

    /// Display name of this step.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program invoked by this step.
    pub fn program(&self) -> &str {
        &self.program
    }
}

/// Spawn every step of the plan in order.
///
/// # Errors
///
/// Returns [`Error::DependencyMissing`] when the OS cannot locate a step's
/// program and [`Error::Launch`] for any other spawn failure. In both cases
/// everything already started has been torn down before the error is
/// returned, and no later step was spawned.
pub async fn launch(plan: Vec<CommandSpec>) -> Result<ProcessGroup> {
    let mut group = ProcessGroup::new();

    for spec in plan {
        let child = match spawn(&spec) {
            Ok(mut child) => {
                forward_output(&spec.name, &mut child);
                child
            }
            Err(err) => {
                match &err {
                    Error::DependencyMissing { program } => {
                        error!(program = %program, "required program not found, aborting launch");
                    }
                    other => {
                        error!(stage = %spec.name, error = %other, "launch step failed, aborting");
                    }
                }
                group.teardown().await;
                return Err(err);
            }
        };
        debug!(process = %spec.name, "started");
        group.push(ProcessRecord::new(spec.name.clone(), Box::new(ChildProcess::new(child))));

        if let Some(delay) = spec.settle_delay {
            sleep(delay).await;
        }
        if let Some(port) = spec.ready_port {
            if !wait_for_port(port, READY_TIMEOUT).await {
                warn!(
                    process = %spec.name,
                    port,
                    "not accepting connections after {}s, continuing",
                    READY_TIMEOUT.as_secs()
                );
            }
        }
    }

    Ok(group)
}

fn spawn(spec: &CommandSpec) -> Result<Child> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        // Captured, not inherited: child chatter must not pollute the
        // caller's console, and failures can still be logged.
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Safety net for cancelled launch futures.
        .kill_on_drop(true);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    cmd.spawn().map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => Error::DependencyMissing {
            program: spec.program.clone(),
        },
        _ => Error::Launch {
            stage: spec.name.clone(),
            source: err,
        },
    })
}

fn forward_output(name: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_stream(name.to_string(), "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_stream(name.to_string(), "stderr", stderr));
    }
}

/// Drain one captured stream into the log. Without a reader on the other
/// end, a chatty child fills the pipe buffer and stalls mid-session.
/// Returns the number of lines forwarded.
async fn forward_stream<R>(process: String, stream: &'static str, reader: R) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut forwarded = 0;
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(process = %process, stream, "{line}");
        forwarded += 1;
    }
    forwarded
}

/// Poll a loopback port until it accepts a connection or the deadline
/// passes. Returns whether the port became reachable.
async fn wait_for_port(port: u16, max_wait: Duration) -> bool {
    let deadline = Instant::now() + max_wait;
    loop {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(READY_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn sleeper(name: &str) -> CommandSpec {
        CommandSpec::new(name, "sleep").args(["30"])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launches_every_step_in_order() {
        let plan = vec![sleeper("first"), sleeper("second")];
        let mut group = launch(plan).await.expect("launch failed");
        assert_eq!(group.len(), 2);
        group.teardown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_mid_plan_aborts_and_names_it() {
        let plan = vec![
            sleeper("first"),
            sleeper("second"),
            CommandSpec::new("third", "sbx-test-no-such-program"),
            // Also bogus, but never reached: the plan stops at the third step.
            CommandSpec::new("fourth", "sbx-test-also-missing"),
        ];

        let err = launch(plan).await.expect_err("launch should fail");
        assert_eq!(err.missing_program(), Some("sbx-test-no-such-program"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_mid_plan_stops_already_started_children() {
        // Unique argument so the survivors check cannot match anything else.
        let marker = "31415.926535";
        let plan = vec![
            CommandSpec::new("first", "sleep").args([marker]),
            CommandSpec::new("second", "sleep").args([marker]),
            CommandSpec::new("third", "sbx-test-no-such-program"),
        ];

        let err = launch(plan).await.expect_err("launch should fail");
        assert!(matches!(err, Error::DependencyMissing { .. }));

        // Teardown completes before the error returns, so both sleepers
        // must already be gone.
        let survivors = std::process::Command::new("pgrep")
            .args(["-f", &format!("sleep {marker}")])
            .output()
            .expect("pgrep failed to run");
        assert!(
            !survivors.status.success(),
            "children leaked: {}",
            String::from_utf8_lossy(&survivors.stdout)
        );
    }

    #[tokio::test]
    async fn missing_program_as_first_step_is_a_dependency_error() {
        let plan = vec![CommandSpec::new("only", "sbx-test-no-such-program")];
        let err = launch(plan).await.expect_err("launch should fail");
        assert!(matches!(err, Error::DependencyMissing { .. }));
    }

    #[tokio::test]
    async fn output_forwarding_drains_past_the_pipe_buffer_size() {
        // Well past the usual 64 KiB pipe buffer, as a single line.
        let data = vec![b'x'; 200_000];
        let lines = forward_stream("stub".to_string(), "stdout", &data[..]).await;
        assert_eq!(lines, 1);
    }

    #[tokio::test]
    async fn port_probe_sees_a_listening_socket() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(wait_for_port(port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn port_probe_gives_up_at_the_deadline() {
        // Allocate then release so nothing is listening.
        let port = {
            let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!wait_for_port(port, Duration::from_millis(200)).await);
    }
}
