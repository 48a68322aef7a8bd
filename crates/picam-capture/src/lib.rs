//! picam-capture: camera frame source for the picam preview.
//!
//! # Pipeline
//!
//! ```text
//! libcamerasrc
//!   → video/x-raw,format=NV12,width=W,height=H,framerate=F/1
//!   → videoconvert
//!   → video/x-raw,format=RGBA
//!   → appsink (drop=true, max-buffers=1, sync=false) ──► read()
//! ```
//!
//! The appsink keeps only the newest frame and never waits on the clock, so a
//! slow consumer makes the camera drop frames instead of stalling.
//!
//! # Usage
//!
//! ```rust,no_run
//! use picam_capture::{CaptureConfig, FrameSource, GstCapture};
//! let mut capture = GstCapture::open(CaptureConfig::default())?;
//! let frame = capture.read()?;
//! // frame.data: tightly packed RGBA, frame.width × frame.height
//! capture.release();
//! # Ok::<(), picam_core::CaptureError>(())
//! ```

use std::time::Duration;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video as gst_video;
use picam_core::{CaptureError, Frame, PixelFormat, PreviewConfig};
use tracing::{debug, info, warn};

// ── FrameSource ───────────────────────────────────────────────────────────────

/// A pull-based frame producer with a single release point.
pub trait FrameSource {
    /// Pull the next frame. An error ends the session.
    fn read(&mut self) -> Result<Frame, CaptureError>;

    /// Release the underlying device. Consumes the handle.
    fn release(self)
    where
        Self: Sized;
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Configuration for the capture pipeline.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Source element at the head of the pipeline (`libcamerasrc`, `v4l2src`, …).
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Requested camera frame rate.
    pub fps: u32,
    /// Longest `read()` waits for a sample before failing.
    pub read_timeout: Duration,
    /// Longest `open()` waits for the pipeline to reach PLAYING.
    pub open_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from(&PreviewConfig::default())
    }
}

impl From<&PreviewConfig> for CaptureConfig {
    fn from(cfg: &PreviewConfig) -> Self {
        Self {
            source: cfg.source.clone(),
            width: cfg.width,
            height: cfg.height,
            fps: cfg.fps,
            read_timeout: cfg.read_timeout(),
            open_timeout: cfg.open_timeout(),
        }
    }
}

/// Build the `gst-launch` description for `config`.
pub fn pipeline_description(config: &CaptureConfig) -> String {
    let CaptureConfig { source, width, height, fps, .. } = config;
    format!(
        "{source} \
         ! video/x-raw,format=NV12,width={width},height={height},framerate={fps}/1 \
         ! videoconvert \
         ! video/x-raw,format=RGBA \
         ! appsink name=sink drop=true max-buffers=1 sync=false emit-signals=false"
    )
}

// ── GstCapture ────────────────────────────────────────────────────────────────

/// Open camera pipeline. Pulls frames synchronously from the appsink.
///
/// Blocking: run it on a dedicated thread (`tokio::task::spawn_blocking`).
pub struct GstCapture {
    pipeline: gst::Pipeline,
    appsink: AppSink,
    bus: gst::Bus,
    config: CaptureConfig,
}

impl GstCapture {
    /// Build the pipeline and bring it to PLAYING.
    ///
    /// Fails with [`CaptureError::Open`] when the description does not parse,
    /// the source element is missing, or the camera refuses to start. There
    /// is no retry and no fallback pipeline.
    pub fn open(config: CaptureConfig) -> Result<Self, CaptureError> {
        gst::init().map_err(|e| CaptureError::Init(e.to_string()))?;

        let desc = pipeline_description(&config);
        debug!("Capture pipeline: {}", desc);

        let pipeline = gst::parse::launch(&desc)
            .map_err(|e| CaptureError::open(format!("parsing pipeline: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CaptureError::open("expected a Pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| CaptureError::open("no appsink named 'sink'"))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| CaptureError::open("pipeline has no bus"))?;

        if let Err(reason) = start(&pipeline, &bus, config.open_timeout) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(CaptureError::Open { reason });
        }

        info!(
            "Capture ready: {} {}x{}@{}fps",
            config.source, config.width, config.height, config.fps
        );
        Ok(Self { pipeline, appsink, bus, config })
    }

    /// Best description of why the appsink produced nothing.
    fn read_failure_reason(&self) -> String {
        if let Some(err) = pop_bus_error(&self.bus) {
            return err;
        }
        if self.appsink.is_eos() {
            return "end of stream".to_owned();
        }
        format!("no frame within {} ms", self.config.read_timeout.as_millis())
    }
}

impl FrameSource for GstCapture {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        let timeout = gst::ClockTime::from_mseconds(self.config.read_timeout.as_millis() as u64);
        match self.appsink.try_pull_sample(timeout) {
            Some(sample) => frame_from_sample(&sample),
            None => Err(CaptureError::read(self.read_failure_reason())),
        }
    }

    fn release(self) {
        info!("Releasing capture pipeline ({})", self.config.source);
        if self.pipeline.set_state(gst::State::Null).is_err() {
            warn!("Capture pipeline refused to stop cleanly");
        }
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Set PLAYING and wait up to `timeout` for the change to land.
fn start(pipeline: &gst::Pipeline, bus: &gst::Bus, timeout: Duration) -> Result<(), String> {
    if pipeline.set_state(gst::State::Playing).is_err() {
        return Err(pop_bus_error(bus).unwrap_or_else(|| "pipeline refused PLAYING".to_owned()));
    }

    let wait = gst::ClockTime::from_mseconds(timeout.as_millis() as u64);
    match pipeline.state(wait) {
        (Ok(gst::StateChangeSuccess::Success), _, _)
        | (Ok(gst::StateChangeSuccess::NoPreroll), _, _) => Ok(()),
        (Ok(_), current, pending) => Err(format!(
            "pipeline stuck in {current:?} (pending {pending:?}) after {} ms",
            timeout.as_millis()
        )),
        (Err(_), _, _) => {
            Err(pop_bus_error(bus).unwrap_or_else(|| "pipeline failed to start".to_owned()))
        }
    }
}

/// Pop the first pending error message off the bus, formatted for humans.
fn pop_bus_error(bus: &gst::Bus) -> Option<String> {
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
        gst::MessageView::Error(err) => Some(match err.debug() {
            Some(debug) => format!("{} ({})", err.error(), debug),
            None => err.error().to_string(),
        }),
        _ => None,
    }
}

/// Copy an RGBA sample into a tightly packed [`Frame`].
fn frame_from_sample(sample: &gst::Sample) -> Result<Frame, CaptureError> {
    let caps = sample
        .caps()
        .ok_or_else(|| CaptureError::read("sample without caps"))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| CaptureError::read(format!("unreadable caps: {e}")))?;
    if info.format() != gst_video::VideoFormat::Rgba {
        return Err(CaptureError::read(format!("unexpected format {:?}", info.format())));
    }

    let buffer = sample
        .buffer()
        .ok_or_else(|| CaptureError::read("sample without buffer"))?;
    let timestamp_us = buffer.pts().map(|t| t.useconds()).unwrap_or(0);
    let map = buffer
        .map_readable()
        .map_err(|_| CaptureError::read("buffer not readable"))?;

    let format = PixelFormat::Rgba;
    let row_bytes = info.width() as usize * format.bytes_per_pixel();
    let data = pack_rows(
        map.as_slice(),
        info.offset()[0],
        info.stride()[0] as usize,
        row_bytes,
        info.height() as usize,
    )
    .ok_or_else(|| {
        CaptureError::read(format!(
            "buffer of {} bytes too small for {}x{}",
            map.size(),
            info.width(),
            info.height()
        ))
    })?;

    Ok(Frame {
        data: Bytes::from(data),
        width: info.width(),
        height: info.height(),
        timestamp_us,
        format,
    })
}

/// Strip per-row padding. `None` if `src` is shorter than the layout claims.
fn pack_rows(
    src: &[u8],
    offset: usize,
    stride: usize,
    row_bytes: usize,
    rows: usize,
) -> Option<Vec<u8>> {
    if rows == 0 {
        return Some(Vec::new());
    }
    if stride < row_bytes {
        return None;
    }
    let needed = offset + stride * (rows - 1) + row_bytes;
    if src.len() < needed {
        return None;
    }
    if stride == row_bytes {
        return Some(src[offset..offset + row_bytes * rows].to_vec());
    }

    let mut out = Vec::with_capacity(row_bytes * rows);
    for row in 0..rows {
        let start = offset + row * stride;
        out.extend_from_slice(&src[start..start + row_bytes]);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_requests_nv12_and_drops_under_backpressure() {
        let desc = pipeline_description(&CaptureConfig::default());
        assert!(desc.starts_with("libcamerasrc "));
        assert!(desc.contains("format=NV12,width=1280,height=720,framerate=30/1"));
        assert!(desc.contains("! videoconvert"));
        assert!(desc.contains("drop=true"));
        assert!(desc.contains("sync=false"));
    }

    #[test]
    fn description_uses_configured_source_and_size() {
        let cfg = CaptureConfig {
            source: "videotestsrc is-live=true".to_owned(),
            width: 640,
            height: 480,
            fps: 15,
            ..CaptureConfig::default()
        };
        let desc = pipeline_description(&cfg);
        assert!(desc.starts_with("videotestsrc is-live=true "));
        assert!(desc.contains("width=640,height=480,framerate=15/1"));
    }

    #[test]
    fn pack_rows_passes_through_unpadded_buffers() {
        let src: Vec<u8> = (0..24).collect();
        let out = pack_rows(&src, 0, 8, 8, 3).expect("fits");
        assert_eq!(out, src);
    }

    #[test]
    fn pack_rows_strips_row_padding() {
        // 2 rows of 3 payload bytes, stride 4, 1 byte of leading offset.
        let src = [9, 1, 2, 3, 0, 4, 5, 6, 0];
        let out = pack_rows(&src, 1, 4, 3, 2).expect("fits");
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn pack_rows_rejects_short_buffers() {
        assert!(pack_rows(&[0u8; 10], 0, 4, 4, 3).is_none());
        assert!(pack_rows(&[0u8; 16], 0, 2, 4, 2).is_none());
    }

    #[test]
    fn missing_source_element_fails_to_open() {
        let cfg = CaptureConfig {
            source: "picam-no-such-element".to_owned(),
            ..CaptureConfig::default()
        };
        match GstCapture::open(cfg) {
            Err(CaptureError::Open { reason }) => assert!(reason.contains("parsing pipeline")),
            Err(other) => panic!("expected Open error, got {other}"),
            Ok(_) => panic!("pipeline with a missing element must not open"),
        }
    }
}
