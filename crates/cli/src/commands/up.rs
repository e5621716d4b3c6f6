//! `sbx up`: bring a session up, print its endpoints, hold until Ctrl-C.

use std::future::Future;

use async_trait::async_trait;
use sbx_runtime::{SessionConfig, VncBrowserSession};
use tracing::info;

use crate::cli::{OutputFormat, UpArgs};
use crate::error::Result;

pub async fn run(args: UpArgs, format: OutputFormat) -> Result<()> {
	let mut config = SessionConfig::default().with_server_script(args.server_script);
	if args.ephemeral {
		config.control_port = 0;
		config.visual_port = 0;
	} else {
		config = config
			.with_control_port(args.control_port)
			.with_visual_port(args.visual_port);
	}

	let mut session = VncBrowserSession::start(config).await?;
	print_addresses(&session, format);
	info!("session up, press Ctrl-C to stop");

	wait_then_close(&mut session, tokio::signal::ctrl_c()).await
}

/// Seam over session shutdown so the close-on-every-path rule below is
/// testable without spawning the process group.
#[async_trait]
trait SessionLifecycle: Send {
	async fn close(&mut self);
}

#[async_trait]
impl SessionLifecycle for VncBrowserSession {
	async fn close(&mut self) {
		VncBrowserSession::close(self).await;
	}
}

/// Await the shutdown signal, then close the session. The session is
/// closed whether the wait completed or errored; only afterwards is the
/// wait's outcome surfaced.
async fn wait_then_close<S, W>(session: &mut S, shutdown: W) -> Result<()>
where
	S: SessionLifecycle,
	W: Future<Output = std::io::Result<()>> + Send,
{
	let outcome = shutdown.await;
	session.close().await;
	Ok(outcome?)
}

fn print_addresses(session: &VncBrowserSession, format: OutputFormat) {
	match format {
		OutputFormat::Json => {
			let value = serde_json::json!({
				"controlAddress": session.control_address(),
				"visualAddress": session.visual_address(),
				"controlPort": session.control_port(),
				"visualPort": session.visual_port(),
			});
			println!("{value}");
		}
		OutputFormat::Text => {
			println!("control: {}", session.control_address());
			println!("visual:  {}", session.visual_address());
		}
	}
}
