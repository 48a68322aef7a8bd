use anyhow::{Context, Result};
use picam_capture::{CaptureConfig, GstCapture};
use picam_core::PreviewConfig;
use picam_display::{DisplayConfig, GstDisplay};
use picam_snapshot::JpegSnapshotWriter;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::session;

/// Preview entry point.
///
/// # Flow
/// 1. Listen for Ctrl-C on the runtime; it cancels the session token
/// 2. Run the capture → display → snapshot loop on a blocking thread
/// 3. The loop releases the camera and closes the window on every exit path
///
/// Startup failures (camera or window unavailable) surface as errors and a
/// non-zero exit code. Once the loop is running, every way of stopping it
/// (quit key, lost frame, closed window, Ctrl-C) exits with 0.
pub async fn run(config: PreviewConfig) -> Result<()> {
    let cancel = CancellationToken::new();

    // ── Interrupt → cancellation token ─────────────────────────────────────
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping preview");
                signal_token.cancel();
            }
            Err(e) => warn!("Interrupt handler unavailable: {e}"),
        }
    });

    // ── Dedicated blocking thread for capture + display ────────────────────
    let session_token = cancel;
    let report = tokio::task::spawn_blocking(move || {
        let snapshots = JpegSnapshotWriter::new(&config.snapshot_dir);
        session::run_session(
            || GstCapture::open(CaptureConfig::from(&config)),
            || GstDisplay::open(DisplayConfig::from(&config)),
            &snapshots,
            &config,
            &session_token,
        )
    })
    .await
    .context("Preview thread panicked")??;

    info!(
        "Session ended ({}): frames={} snapshots={} snapshot_failures={}",
        report.reason, report.frames, report.snapshots_written, report.snapshot_failures
    );
    Ok(())
}

/// One-line summary of what the session will capture and where snapshots go.
pub fn describe(config: &PreviewConfig) -> String {
    let snapshots = match config.snapshot_interval {
        0 => "snapshots off".to_owned(),
        n => format!("snapshot every {n} frames into {}", config.snapshot_dir.display()),
    };
    format!(
        "{} {}@{}fps, {}, quit with '{}'",
        config.source,
        config.resolution(),
        config.fps,
        snapshots,
        config.quit_key
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_names_source_and_snapshot_target() {
        let config = PreviewConfig {
            source: "v4l2src".to_owned(),
            snapshot_dir: "/var/tmp/picam".into(),
            ..PreviewConfig::default()
        };
        assert_eq!(
            describe(&config),
            "v4l2src 1280×720@30fps, snapshot every 60 frames into /var/tmp/picam, quit with 'q'"
        );
    }

    #[test]
    fn describe_reports_disabled_snapshots() {
        let config = PreviewConfig { snapshot_interval: 0, ..PreviewConfig::default() };
        assert!(describe(&config).starts_with("libcamerasrc 1280×720@30fps, snapshots off"));
    }
}
