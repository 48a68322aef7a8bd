//! One preview session: INIT → RUNNING → TERMINATING → RELEASED.
//!
//! The loop is synchronous and single-threaded. Its only waits are the
//! bounded frame pull and the bounded key poll; the cancellation token is
//! checked once per iteration so an interrupt still runs the cleanup below.

use picam_capture::FrameSource;
use picam_core::{CaptureError, ExitReason, PreviewConfig};
use picam_display::{DisplayError, DisplayEvent, DisplaySink};
use picam_snapshot::{is_snapshot_index, SnapshotSink};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Frames between progress log lines.
const PROGRESS_EVERY: u64 = 300;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Display(#[from] DisplayError),
}

/// Outcome of a session that got past startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub reason: ExitReason,
    /// Frames successfully read.
    pub frames: u64,
    pub snapshots_written: u64,
    pub snapshot_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames: u64,
    snapshots_written: u64,
    snapshot_failures: u64,
}

/// Run a full session.
///
/// The display is opened only after the capture source opened, so a camera
/// failure never shows a window, and neither does an interrupt that lands
/// while the camera is opening. Once both are open, the capture handle is
/// released and the display destroyed exactly once, whatever ends the loop.
pub fn run_session<C, D, S>(
    open_capture: impl FnOnce() -> Result<C, CaptureError>,
    open_display: impl FnOnce() -> Result<D, DisplayError>,
    snapshots: &S,
    config: &PreviewConfig,
    cancel: &CancellationToken,
) -> Result<SessionReport, SessionError>
where
    C: FrameSource,
    D: DisplaySink,
    S: SnapshotSink + ?Sized,
{
    // ── INIT ───────────────────────────────────────────────────────────────
    let mut capture = open_capture()?;
    if cancel.is_cancelled() {
        debug!("Interrupted while the camera was opening");
        capture.release();
        return Ok(SessionReport {
            reason: ExitReason::Interrupted,
            frames: 0,
            snapshots_written: 0,
            snapshot_failures: 0,
        });
    }
    let mut display = match open_display() {
        Ok(display) => display,
        Err(e) => {
            capture.release();
            return Err(e.into());
        }
    };

    info!("Live preview: press '{}' to quit", config.quit_key);

    // ── RUNNING ────────────────────────────────────────────────────────────
    let mut counters = Counters::default();
    let reason = preview_loop(&mut capture, &mut display, snapshots, config, cancel, &mut counters);

    // ── TERMINATING → RELEASED ─────────────────────────────────────────────
    debug!("Preview loop stopped: {}", reason);
    capture.release();
    display.destroy_all();

    Ok(SessionReport {
        reason,
        frames: counters.frames,
        snapshots_written: counters.snapshots_written,
        snapshot_failures: counters.snapshot_failures,
    })
}

fn preview_loop<C, D, S>(
    capture: &mut C,
    display: &mut D,
    snapshots: &S,
    config: &PreviewConfig,
    cancel: &CancellationToken,
    counters: &mut Counters,
) -> ExitReason
where
    C: FrameSource,
    D: DisplaySink,
    S: SnapshotSink + ?Sized,
{
    let poll_timeout = config.key_poll_timeout();
    let mut index: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return ExitReason::Interrupted;
        }

        let frame = match capture.read() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Lost frame #{}: {}", index, e);
                return ExitReason::ReadFailed;
            }
        };
        counters.frames += 1;

        if let Err(e) = display.show(&frame) {
            warn!("Frame #{} not displayed: {}", index, e);
            return ExitReason::DisplayFailed;
        }

        if is_snapshot_index(index, config.snapshot_interval) {
            match snapshots.write(index, &frame) {
                Ok(path) => {
                    counters.snapshots_written += 1;
                    debug!("Snapshot #{} → {}", index, path.display());
                }
                Err(e) => {
                    counters.snapshot_failures += 1;
                    warn!("Snapshot #{} failed: {}", index, e);
                }
            }
        }
        drop(frame);

        match display.poll_key(poll_timeout) {
            Some(DisplayEvent::Key(key)) if key == config.quit_key => return ExitReason::QuitKey,
            Some(DisplayEvent::Key(key)) => debug!("Ignoring key '{}'", key),
            Some(DisplayEvent::Closed) => return ExitReason::WindowClosed,
            Some(DisplayEvent::Failed(_)) => return ExitReason::DisplayFailed,
            None => {}
        }

        if counters.frames % PROGRESS_EVERY == 0 {
            info!("Previewed {} frames ({} snapshots)", counters.frames, counters.snapshots_written);
        }
        index += 1;
    }
}
