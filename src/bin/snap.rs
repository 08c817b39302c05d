//! snap - capture one frame, upload it, print the locator.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use camera_relay::ui::Ui;
use camera_relay::{Destination, Pipeline, PipelineEvent, RelayConfig, UploadResult};
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture one frame and upload it")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Capture device override (stub://name, http(s) snapshot URL, /dev/videoN, or file).
    #[arg(long)]
    device: Option<String>,

    /// Destination object path override.
    #[arg(long)]
    destination: Option<String>,

    /// Output mode: auto, plain or pretty.
    #[arg(long, default_value = "auto")]
    ui: String,

    /// Disable spinners in auto mode.
    #[arg(long, env = "NO_COLOR")]
    no_pretty: bool,

    /// How long to wait for capture and upload to finish.
    #[arg(long, default_value_t = 60)]
    wait_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let mut config = RelayConfig::load_from(args.config.as_deref())?;
    if let Some(device) = args.device {
        config.capture.device = device;
    }
    if let Some(destination) = args.destination.as_deref() {
        config.upload.destination = Destination::parse(destination)?;
    }

    let ui = Ui::from_args(
        Some(args.ui.as_str()),
        std::io::stderr().is_terminal(),
        args.no_pretty,
    );

    let open_stage = ui.stage("Opening camera");
    let opened = Pipeline::from_config(&config);
    open_stage.finish(&opened);
    let (pipeline, events) = opened?;

    let stage = ui.stage("Capture and upload");
    let outcome = match pipeline.trigger() {
        Ok(()) => {
            stage.progress("capturing");
            wait_for_locator(&events, Duration::from_secs(args.wait_secs))
        }
        Err(e) => Err(anyhow!("trigger rejected: {}", e)),
    };
    stage.finish(&outcome);
    pipeline.shutdown()?;

    let locator = outcome?;
    println!("{}", locator);
    Ok(())
}

fn wait_for_locator(events: &Receiver<PipelineEvent>, wait: Duration) -> Result<Url> {
    match events.recv_timeout(wait) {
        Ok(PipelineEvent::CaptureFailed { error }) => Err(anyhow!("capture failed: {}", error)),
        Ok(PipelineEvent::UploadFinished { result, .. }) => match result {
            UploadResult::Success { locator } => Ok(locator),
            UploadResult::Failure { reason } => Err(anyhow!("upload failed: {}", reason)),
        },
        Err(RecvTimeoutError::Timeout) => Err(anyhow!("no result after {}s", wait.as_secs())),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("pipeline stopped without a result")),
    }
}
