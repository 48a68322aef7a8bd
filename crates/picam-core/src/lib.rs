pub mod config;
pub mod errors;
pub mod types;

pub use config::PreviewConfig;
pub use errors::{CaptureError, PicamError};
pub use types::*;
