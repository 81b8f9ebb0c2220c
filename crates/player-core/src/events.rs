//! Outbound notifications for observers (UI, CLI).
//!
//! Non-audio elements travel through the bounded element queue so they stay
//! ordered relative to the audio they describe; the output callback forwards
//! them onto the notification channel as it encounters them.

/// Tag data for the currently playing track.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<String>,
    pub date: Option<String>,
}

/// Events delivered to external observers in emission order.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// Tags for the track now reaching the output.
    Metadata(TrackMetadata),
    /// Total stream duration in seconds, once the decoder reports it.
    TotalTime(f64),
    /// Playback ceased with nothing left to play.
    PlaybackStop,
}
