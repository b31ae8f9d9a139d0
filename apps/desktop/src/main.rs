mod config;
mod overlay;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use countdown::{CountdownController, CountdownStore};
use local_recording::{LocalRecordingManager, RecordingRequest};
use native_media::{FileCaptureBackend, NativeMediaBackend};
use shared::{domain::RecordingMode, protocol::RecordingEvent};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::WatchStream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::overlay::CountdownOverlay;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a TOML config file (defaults to ./recorder.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print recording events as JSON lines.
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count down, record for a while, then stop.
    Record {
        #[arg(long, default_value_t = 5)]
        duration_secs: u64,
        /// Stop before capture begins to exercise cancellation.
        #[arg(long)]
        cancel_after_secs: Option<u64>,
        #[arg(long)]
        audio_only: bool,
        #[arg(long)]
        only_self: bool,
    },
    List,
    Export {
        name: String,
        destination: PathBuf,
    },
    Cleanup {
        #[arg(long, default_value_t = 5)]
        keep: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    let settings = config::load_settings(args.config.as_deref())?;
    info!(dir = %settings.recordings_dir.display(), "recordings directory");

    let backend: Arc<dyn NativeMediaBackend> =
        Arc::new(FileCaptureBackend::new(&settings.recordings_dir));
    let store = CountdownStore::new();
    let controller = Arc::new(CountdownController::new(
        Arc::clone(&store),
        settings.countdown(),
    )?);

    match args.command {
        Command::Record {
            duration_secs,
            cancel_after_secs,
            audio_only,
            only_self,
        } => {
            let mode = if audio_only {
                RecordingMode::AudioOnly
            } else {
                settings.recording_mode()
            };
            let manager = LocalRecordingManager::new(backend, controller, mode);
            let session = RecordSession {
                store,
                manager,
                json: args.json,
            };
            session
                .run(
                    only_self,
                    Duration::from_secs(duration_secs),
                    cancel_after_secs.map(Duration::from_secs),
                )
                .await?;
        }
        Command::List => {
            let manager = LocalRecordingManager::new(backend, controller, settings.recording_mode());
            let files = manager.list_recordings().await?;
            if args.json {
                println!("{}", serde_json::to_string(&files)?);
            } else if files.is_empty() {
                println!("No recordings in {}", settings.recordings_dir.display());
            } else {
                for file in files {
                    println!("- {} ({} bytes)", file.name, file.size_bytes);
                }
            }
        }
        Command::Export { name, destination } => {
            let manager = LocalRecordingManager::new(backend, controller, settings.recording_mode());
            let target = manager.export_recording(&name, &destination).await?;
            println!("Exported {name} to {}", target.display());
        }
        Command::Cleanup { keep } => {
            let manager = LocalRecordingManager::new(backend, controller, settings.recording_mode());
            let removed = manager.cleanup_recordings(keep).await?;
            println!("Removed {removed} recording(s), kept up to {keep}");
        }
    }

    Ok(())
}

struct RecordSession {
    store: Arc<CountdownStore>,
    manager: Arc<LocalRecordingManager>,
    json: bool,
}

impl RecordSession {
    async fn run(
        &self,
        only_self: bool,
        duration: Duration,
        cancel_after: Option<Duration>,
    ) -> Result<()> {
        let overlay_task = tokio::spawn(render_overlay(WatchStream::new(self.store.subscribe())));
        let mut events = self.manager.subscribe_events();
        let printer_task = tokio::spawn(print_events(self.manager.subscribe_events(), self.json));

        let outcome = self.record(only_self, duration, cancel_after, &mut events).await;

        self.manager.stop_local_recording().await;
        // Let the printer drain the stop event before exiting.
        tokio::time::sleep(Duration::from_millis(50)).await;
        overlay_task.abort();
        printer_task.abort();
        outcome
    }

    async fn record(
        &self,
        only_self: bool,
        duration: Duration,
        cancel_after: Option<Duration>,
        events: &mut broadcast::Receiver<RecordingEvent>,
    ) -> Result<()> {
        match self.manager.start_local_recording(only_self).await {
            RecordingRequest::CountdownStarted => {}
            RecordingRequest::AlreadyRecording => bail!("a local recording is already running"),
            RecordingRequest::Unsupported => bail!("local recording is not supported here"),
        }

        if let Some(cancel_after) = cancel_after {
            tokio::select! {
                _ = tokio::time::sleep(cancel_after) => info!("cancelling countdown"),
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
            }
            return Ok(());
        }

        tokio::select! {
            started = wait_for_capture(events) => started?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted during countdown");
                return Ok(());
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = tokio::signal::ctrl_c() => info!("interrupted; stopping recording"),
        }
        Ok(())
    }
}

async fn wait_for_capture(events: &mut broadcast::Receiver<RecordingEvent>) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(RecordingEvent::RecordingStarted { .. }) => return Ok(()),
            Ok(RecordingEvent::RecordingFailed { error }) => {
                bail!("recording failed to start: {}", error.message)
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "recording event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => bail!("recording events closed"),
        }
    }
}

async fn render_overlay(mut snapshots: WatchStream<countdown::CountdownSnapshot>) {
    let mut overlay = CountdownOverlay::new();
    while let Some(snapshot) = snapshots.next().await {
        if let Some(frame) = overlay.render(snapshot) {
            println!("{frame}");
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<RecordingEvent>, json: bool) {
    loop {
        match events.recv().await {
            Ok(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!("failed to encode event: {err}"),
            },
            Ok(RecordingEvent::RecordingStopped { files, .. }) => {
                for file in files {
                    println!("saved {} ({} bytes)", file.path.display(), file.size_bytes);
                }
            }
            Ok(RecordingEvent::RecordingFailed { error }) => {
                println!("recording failed: {}", error.message);
            }
            Ok(event) => println!("{event:?}"),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
