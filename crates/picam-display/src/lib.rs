//! picam-display: on-screen preview window.
//!
//! # Pipeline
//! ```text
//! appsrc (RGBA, live, leaky) → videoconvert → autovideosink (sync=false)
//! ```
//!
//! Key presses in the preview window reach us as navigation messages on the
//! display bus: the video sink forwards each navigation event upstream and,
//! when nothing upstream handles it, posts it as a `GstNavigationMessage`.
//! [`GstDisplay::poll_key`] drains that bus with a short timeout, which is
//! also the preview loop's only yield point.

use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use picam_core::{Frame, PixelFormat, PreviewConfig};
use thiserror::Error;
use tracing::{debug, info, warn};

// MARK: - DisplaySink trait

/// A window that shows frames and reports key presses.
pub trait DisplaySink {
    /// Render one frame. Must not block on the display clock.
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError>;

    /// Wait at most `timeout` for a key press or window close.
    fn poll_key(&mut self, timeout: Duration) -> Option<DisplayEvent>;

    /// Close every window this sink opened. Consumes the sink.
    fn destroy_all(self)
    where
        Self: Sized;
}

/// Something the user did to the preview window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    /// Key pressed, by navigation key name (`"q"`, `"Escape"`, …).
    Key(String),
    /// The window was closed or the video sink stopped.
    Closed,
    /// Some other element of the display pipeline failed.
    Failed(String),
}

// MARK: - DisplayError

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("GStreamer initialisation failed: {0}")]
    Init(String),

    #[error("Failed to open preview window: {0}")]
    Open(String),

    #[error("Failed to show frame: {0}")]
    Show(String),
}

// MARK: - DisplayConfig

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    pub window_title: String,
}

impl From<&PreviewConfig> for DisplayConfig {
    fn from(cfg: &PreviewConfig) -> Self {
        Self { window_title: cfg.window_title.clone() }
    }
}

const PIPELINE: &str = "appsrc name=src is-live=true format=time do-timestamp=true \
                        max-buffers=2 leaky-type=downstream \
                        ! videoconvert \
                        ! autovideosink name=sink sync=false";

// MARK: - GstDisplay

/// Explicit display context: owns the preview pipeline and its bus.
///
/// The window itself appears with the first frame, sized to that frame.
pub struct GstDisplay {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    bus: gst::Bus,
    config: DisplayConfig,
    negotiated: Option<(u32, u32, PixelFormat)>,
    frames_shown: u64,
}

impl GstDisplay {
    pub fn open(config: DisplayConfig) -> Result<Self, DisplayError> {
        gst::init().map_err(|e| DisplayError::Init(e.to_string()))?;

        let pipeline = gst::parse::launch(PIPELINE)
            .map_err(|e| DisplayError::Open(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| DisplayError::Open("Not a pipeline".into()))?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|element| element.downcast::<AppSrc>().ok())
            .ok_or_else(|| DisplayError::Open("No appsrc".into()))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| DisplayError::Open("No bus".into()))?;

        if pipeline.set_state(gst::State::Playing).is_err() {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(DisplayError::Open(
                "video sink refused to start (no display available?)".into(),
            ));
        }

        debug!("Display pipeline ready for '{}'", config.window_title);
        Ok(Self { pipeline, appsrc, bus, config, negotiated: None, frames_shown: 0 })
    }

    /// Window managers pick the sink window title up from the title tag.
    fn announce_title(&self) {
        let mut tags = gst::TagList::new();
        tags.make_mut()
            .add::<gst::tags::Title>(&self.config.window_title.as_str(), gst::TagMergeMode::Replace);
        if !self.appsrc.send_event(gst::event::Tag::new(tags)) {
            debug!("Window title tag was not accepted");
        }
    }
}

impl DisplaySink for GstDisplay {
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        let shape = (frame.width, frame.height, frame.format);
        if self.negotiated != Some(shape) {
            self.appsrc.set_caps(Some(&frame_caps(frame)));
            self.negotiated = Some(shape);
            debug!("Display caps set to {}x{} {:?}", frame.width, frame.height, frame.format);
        }

        let buffer = gst::Buffer::from_slice(frame.data.clone());
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| DisplayError::Show(format!("appsrc push_buffer: {e:?}")))?;

        self.frames_shown += 1;
        if self.frames_shown == 1 {
            self.announce_title();
            info!("Preview window '{}' showing {}x{}", self.config.window_title, frame.width, frame.height);
        }
        Ok(())
    }

    fn poll_key(&mut self, timeout: Duration) -> Option<DisplayEvent> {
        let types = [gst::MessageType::Element, gst::MessageType::Eos, gst::MessageType::Error];
        let mut wait = gst::ClockTime::from_mseconds(timeout.as_millis() as u64);
        // First pop waits; the rest drain whatever is already queued
        // (pointer motion floods the bus with navigation messages).
        while let Some(msg) = self.bus.timed_pop_filtered(wait, &types) {
            wait = gst::ClockTime::ZERO;
            if let Some(event) = display_event_from_message(&msg) {
                return Some(event);
            }
        }
        None
    }

    fn destroy_all(self) {
        info!("Closing preview window '{}'", self.config.window_title);
        let _ = self.appsrc.end_of_stream();
        if self.pipeline.set_state(gst::State::Null).is_err() {
            warn!("Display pipeline refused to stop cleanly");
        }
    }
}

impl Drop for GstDisplay {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

// MARK: - Bus message mapping

fn frame_caps(frame: &Frame) -> gst::Caps {
    gst::Caps::builder("video/x-raw")
        .field("format", frame.format.caps_name())
        .field("width", frame.width as i32)
        .field("height", frame.height as i32)
        .field("framerate", gst::Fraction::new(0, 1))
        .build()
}

/// Map a display bus message to a [`DisplayEvent`], if it is one.
pub fn display_event_from_message(msg: &gst::MessageRef) -> Option<DisplayEvent> {
    match msg.view() {
        gst::MessageView::Eos(_) => Some(DisplayEvent::Closed),
        gst::MessageView::Error(err) if posted_by_sink(msg) => {
            info!("Preview window gone: {}", err.error());
            Some(DisplayEvent::Closed)
        }
        gst::MessageView::Error(err) => {
            let source = msg.src().map(|s| s.path_string().to_string()).unwrap_or_default();
            warn!("Display pipeline error from {}: {}", source, err.error());
            Some(DisplayEvent::Failed(err.error().to_string()))
        }
        gst::MessageView::Element(_) => {
            navigation_key_press(msg.structure()?).map(DisplayEvent::Key)
        }
        _ => None,
    }
}

/// Video sinks report a closed window as an error of their own.
fn posted_by_sink(msg: &gst::MessageRef) -> bool {
    msg.src()
        .and_then(|src| src.downcast_ref::<gst::Element>())
        .is_some_and(|element| element.element_flags().contains(gst::ElementFlags::SINK))
}

/// Key name of a `GstNavigationMessage` carrying a `key-press` event.
fn navigation_key_press(s: &gst::StructureRef) -> Option<String> {
    if !s.has_name("GstNavigationMessage") || s.get::<&str>("type").ok()? != "event" {
        return None;
    }
    let event = s.get::<gst::Event>("event").ok()?;
    let nav = event.structure()?;
    if nav.get::<&str>("event").ok()? != "key-press" {
        return None;
    }
    nav.get::<&str>("key").ok().map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn navigation_message(kind: &str, key: &str) -> gst::Message {
        gst::init().expect("gstreamer init");
        let nav = gst::Structure::builder("application/x-gst-navigation")
            .field("event", kind)
            .field("key", key)
            .build();
        let event = gst::event::Navigation::new(nav);
        let s = gst::Structure::builder("GstNavigationMessage")
            .field("type", "event")
            .field("event", event)
            .build();
        gst::message::Element::new(s)
    }

    #[test]
    fn key_press_becomes_key_event() {
        let msg = navigation_message("key-press", "q");
        assert_eq!(display_event_from_message(&msg), Some(DisplayEvent::Key("q".into())));
    }

    #[test]
    fn key_release_is_ignored() {
        let msg = navigation_message("key-release", "q");
        assert_eq!(display_event_from_message(&msg), None);
    }

    #[test]
    fn unrelated_element_message_is_ignored() {
        gst::init().expect("gstreamer init");
        let msg = gst::message::Element::new(gst::Structure::new_empty("level"));
        assert_eq!(display_event_from_message(&msg), None);
    }

    #[test]
    fn eos_means_window_closed() {
        gst::init().expect("gstreamer init");
        let msg = gst::message::Eos::new();
        assert_eq!(display_event_from_message(&msg), Some(DisplayEvent::Closed));
    }

    fn error_from(factory: &str, text: &str) -> gst::Message {
        gst::init().expect("gstreamer init");
        let element = gst::ElementFactory::make(factory).build().expect("core element");
        gst::message::Error::builder(gst::CoreError::Failed, text)
            .src(&element)
            .build()
    }

    #[test]
    fn sink_error_means_window_closed() {
        let msg = error_from("fakesink", "Output window was closed");
        assert_eq!(display_event_from_message(&msg), Some(DisplayEvent::Closed));
    }

    #[test]
    fn upstream_error_is_a_display_failure() {
        let msg = error_from("identity", "not-negotiated");
        match display_event_from_message(&msg) {
            Some(DisplayEvent::Failed(reason)) => assert!(reason.contains("not-negotiated")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn caps_follow_frame_shape() {
        gst::init().expect("gstreamer init");
        let frame = Frame::blank(picam_core::Resolution::new(64, 48), PixelFormat::Rgba);
        let caps = frame_caps(&frame);
        let s = caps.structure(0).expect("one structure");
        assert_eq!(s.get::<&str>("format").unwrap(), "RGBA");
        assert_eq!(s.get::<i32>("width").unwrap(), 64);
        assert_eq!(s.get::<i32>("height").unwrap(), 48);
    }
}
