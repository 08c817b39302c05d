//! relayd - camera relay daemon
//!
//! This daemon:
//! 1. Opens the configured capture device on its worker thread
//! 2. Treats every line on stdin as a trigger (the capture "button")
//! 3. Uploads each captured frame to the configured destination
//! 4. Logs every outcome; nothing is retried
//! 5. Shuts down on Ctrl-C or end of stdin

use anyhow::Result;
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use camera_relay::{Pipeline, PipelineEvent, RelayConfig, UploadResult};

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture a frame per stdin line and upload it")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
}

enum Control {
    Trigger,
    Shutdown,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = RelayConfig::load_from(args.config.as_deref())?;
    log::info!(
        "relayd: capture={} endpoint={} destination={}",
        config.capture.device,
        config.upload.endpoint,
        config.upload.destination
    );

    let (pipeline, events) = Pipeline::from_config(&config)?;
    let stats = pipeline.stats();

    let (control_tx, control_rx) = mpsc::channel();
    let signal_tx = control_tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(Control::Shutdown);
    })
    .expect("error setting Ctrl-C handler");

    thread::Builder::new()
        .name("trigger-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                if line.is_err() || control_tx.send(Control::Trigger).is_err() {
                    break;
                }
            }
            let _ = control_tx.send(Control::Shutdown);
        })?;

    let reporter = thread::Builder::new()
        .name("event-log".to_string())
        .spawn(move || {
            for event in events {
                match event {
                    PipelineEvent::CaptureFailed { error } => {
                        log::warn!("relayd: capture failed, no upload attempted: {}", error);
                    }
                    PipelineEvent::UploadFinished {
                        sequence,
                        bytes,
                        result: UploadResult::Success { locator },
                    } => {
                        log::info!("relayd: frame #{} ({} bytes) -> {}", sequence, bytes, locator);
                    }
                    PipelineEvent::UploadFinished {
                        sequence,
                        result: UploadResult::Failure { reason },
                        ..
                    } => {
                        log::warn!("relayd: frame #{} upload failed: {}", sequence, reason);
                    }
                }
            }
        })?;

    log::info!("relayd running. press Enter to capture, Ctrl-C to stop");
    while let Ok(Control::Trigger) = control_rx.recv() {
        if let Err(e) = pipeline.trigger() {
            log::warn!("relayd: trigger ignored: {}", e);
        }
    }

    log::info!("shutdown requested, releasing camera...");
    pipeline.shutdown()?;
    // Upload threads hold the last event senders; the reporter ends once they finish.
    let _ = reporter.join();
    let counters = stats.snapshot();
    log::info!(
        "relayd stopped: triggers={} rejected={} frames={} capture_failures={} uploads_ok={} uploads_failed={}",
        counters.triggers,
        counters.rejected_triggers,
        counters.frames_captured,
        counters.capture_failures,
        counters.uploads_succeeded,
        counters.uploads_failed
    );
    Ok(())
}
