use thiserror::Error;

#[derive(Error, Debug)]
pub enum PicamError {
    #[error("Configuration invalid: {reason}")]
    ConfigurationInvalid { reason: String },

    #[error("Configuration file unreadable: {0}")]
    ConfigurationParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("GStreamer initialisation failed: {0}")]
    Init(String),

    /// The capture pipeline could not be opened. Fatal at startup.
    #[error("Could not open camera pipeline: {reason}")]
    Open { reason: String },

    /// A read from an already-open pipeline failed. Ends the session.
    #[error("Failed to read frame: {reason}")]
    Read { reason: String },
}

impl CaptureError {
    pub fn open(reason: impl Into<String>) -> Self {
        Self::Open { reason: reason.into() }
    }

    pub fn read(reason: impl Into<String>) -> Self {
        Self::Read { reason: reason.into() }
    }
}
