//! VNC browser session lifecycle.
//!
//! A session boots five child processes on top of an isolated virtual
//! display: Xvfb, an openbox window-manager session, x11vnc, the noVNC web
//! bridge, and a Playwright server script run under node. Once up, the
//! session exposes a control endpoint for automation clients
//! (`ws://127.0.0.1:<port>/<token>`) and a visual endpoint for humans
//! (`http://127.0.0.1:<port>/vnc.html`).
//!
//! The VNC server runs with `-nopw -shared` and is therefore only safe
//! inside an isolated sandbox (one session per container, no network
//! exposure). The display itself never listens on TCP (`-nolisten tcp`).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::launch::{CommandSpec, launch};
use crate::port::{PortReservation, allocate_port};
use crate::process::ProcessGroup;

/// Loopback host every endpoint binds to.
pub const HOSTNAME: &str = "127.0.0.1";

/// External programs a session spawns, in start order.
pub const REQUIRED_PROGRAMS: [&str; 5] =
    ["Xvfb", "openbox-session", "x11vnc", "novnc", "node"];

const DISPLAY: &str = ":99";
const SCREEN_GEOMETRY: &str = "1440x900x24";
/// Fixed port x11vnc serves on; only the noVNC bridge connects to it.
const VNC_PORT: u16 = 5900;
/// Window for the display to come up. Its readiness surface is a Unix
/// socket, so there is no TCP port to probe.
const DISPLAY_SETTLE: Duration = Duration::from_secs(1);

const DEFAULT_CONTROL_PORT: u16 = 37367;
const DEFAULT_VISUAL_PORT: u16 = 6080;

/// Configuration for one sandbox session.
///
/// Immutable once the session starts. A port of 0 means "allocate any free
/// loopback port"; a `None` token means "generate a fresh one".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Port the Playwright server listens on.
    pub control_port: u16,
    /// Port the noVNC web bridge listens on.
    pub visual_port: u16,
    /// Secret path component of the control endpoint.
    pub token: Option<String>,
    /// Entry point of the Playwright server, run via `node`.
    pub server_script: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control_port: DEFAULT_CONTROL_PORT,
            visual_port: DEFAULT_VISUAL_PORT,
            token: None,
            server_script: PathBuf::from("playwright-server.js"),
        }
    }
}

impl SessionConfig {
    /// Config that allocates both ports from the ephemeral range, for
    /// running several sessions side by side.
    pub fn ephemeral() -> Self {
        Self {
            control_port: 0,
            visual_port: 0,
            ..Self::default()
        }
    }

    /// Sets the control-endpoint port (0 = allocate).
    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    /// Sets the visual-endpoint port (0 = allocate).
    pub fn with_visual_port(mut self, port: u16) -> Self {
        self.visual_port = port;
        self
    }

    /// Sets an explicit control-endpoint token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the Playwright server entry point.
    pub fn with_server_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.server_script = script.into();
        self
    }
}

/// Endpoints resolved from a [`SessionConfig`], rendered exactly once.
struct ResolvedEndpoints {
    control_port: u16,
    visual_port: u16,
    token: String,
    control_address: String,
    visual_address: String,
}

/// Resolve ports and token for a session.
///
/// Returned reservations keep requested-as-0 ports bound; the caller drops
/// them immediately before spawning the children that take the ports over.
fn resolve_endpoints(
    config: &SessionConfig,
) -> Result<(ResolvedEndpoints, Vec<PortReservation>)> {
    let mut reservations = Vec::new();

    let control_port = match config.control_port {
        0 => {
            let reservation = allocate_port()?;
            let port = reservation.port();
            reservations.push(reservation);
            port
        }
        port => port,
    };
    let visual_port = match config.visual_port {
        0 => {
            let reservation = allocate_port()?;
            let port = reservation.port();
            reservations.push(reservation);
            port
        }
        port => port,
    };
    let token = config.token.clone().unwrap_or_else(generate_token);

    let endpoints = ResolvedEndpoints {
        control_port,
        visual_port,
        control_address: format!("ws://{HOSTNAME}:{control_port}/{token}"),
        visual_address: format!("http://{HOSTNAME}:{visual_port}/vnc.html"),
        token,
    };
    Ok((endpoints, reservations))
}

/// 32-char lowercase hex token, the shared secret in the control address.
fn generate_token() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

fn launch_plan(config: &SessionConfig, endpoints: &ResolvedEndpoints) -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("Xvfb", "Xvfb")
            .args([DISPLAY, "-screen", "0", SCREEN_GEOMETRY, "-ac", "-nolisten", "tcp"])
            .settle_delay(DISPLAY_SETTLE),
        CommandSpec::new("openbox", "openbox-session").env("DISPLAY", DISPLAY),
        CommandSpec::new("x11vnc", "x11vnc")
            .args(["-display", DISPLAY, "-forever", "-shared", "-nopw"]),
        CommandSpec::new("novnc", "novnc")
            .args([
                "--vnc".to_string(),
                format!("localhost:{VNC_PORT}"),
                "--listen".to_string(),
                endpoints.visual_port.to_string(),
            ])
            .ready_port(endpoints.visual_port),
        CommandSpec::new("playwright-server", "node")
            .args([config.server_script.to_string_lossy().into_owned()])
            .env("DISPLAY", DISPLAY)
            .env("WS_PATH", &endpoints.token)
            .env("PLAYWRIGHT_PORT", endpoints.control_port.to_string())
            .ready_port(endpoints.control_port),
    ]
}

/// A running sandbox session.
///
/// Obtained only from [`VncBrowserSession::start`], which either returns a
/// fully-started session or tears down whatever it managed to spawn and
/// returns the error. Addresses are rendered once at start and never
/// regenerated: changing them mid-session would silently disconnect any
/// automation client already attached.
pub struct VncBrowserSession {
    control_port: u16,
    visual_port: u16,
    control_address: String,
    visual_address: String,
    group: ProcessGroup,
}

impl VncBrowserSession {
    /// Allocate endpoints and bring up the full process group.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Resource`] when no free port is available,
    /// [`crate::Error::DependencyMissing`] when one of the five external
    /// programs is not installed, [`crate::Error::Launch`] for any other
    /// spawn failure. On every error path the partially-started group has
    /// already been torn down.
    pub async fn start(config: SessionConfig) -> Result<Self> {
        let (endpoints, reservations) = resolve_endpoints(&config)?;
        info!(
            control = %endpoints.control_address,
            visual = %endpoints.visual_address,
            "starting sandbox session"
        );

        let plan = launch_plan(&config, &endpoints);
        // Release the reserved ports only now, just before the children
        // that take them over are spawned.
        drop(reservations);
        let group = launch(plan).await?;

        Ok(Self {
            control_port: endpoints.control_port,
            visual_port: endpoints.visual_port,
            control_address: endpoints.control_address,
            visual_address: endpoints.visual_address,
            group,
        })
    }

    /// `ws://` endpoint for automation clients, token path included.
    pub fn control_address(&self) -> &str {
        &self.control_address
    }

    /// `http://` endpoint serving the noVNC viewer page.
    pub fn visual_address(&self) -> &str {
        &self.visual_address
    }

    /// Raw control port, for reverse-proxy configuration and the like.
    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    /// Raw visual port.
    pub fn visual_port(&self) -> u16 {
        self.visual_port
    }

    /// Whether the process group is still held.
    pub fn is_running(&self) -> bool {
        !self.group.is_empty()
    }

    /// Stop every session process in reverse start order.
    ///
    /// Idempotent and infallible: per-process failures are logged, never
    /// returned, so a stuck automation server cannot leak the display or
    /// the VNC server behind it.
    pub async fn close(&mut self) {
        if self.group.is_empty() {
            return;
        }
        info!("stopping sandbox session");
        self.group.teardown().await;
    }
}
