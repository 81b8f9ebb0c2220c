//! Error taxonomy for the playback pipeline.
//!
//! Only genuinely fatal conditions are errors. Backpressure (full queue) and
//! underrun (empty queue at callback time) are normal operating states and
//! have no representation here.

/// Fatal errors surfaced by the pipeline.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PlayerError {
    /// The output device could not be opened. Aborts playback startup.
    #[error("audio device initialization failed: {0}")]
    DeviceInit(String),

    /// A decoder could not be constructed for one track. The control loop
    /// recovers by advancing to the next playlist entry.
    #[error("decoder initialization failed for {path}: {reason}")]
    DecoderInit { path: String, reason: String },

    /// The filter chain cannot express the requested format conversion.
    #[error("unsupported conversion: {0}")]
    UnsupportedConversion(String),
}
