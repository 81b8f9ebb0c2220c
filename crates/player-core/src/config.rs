/// Tuning parameters shared by the decode loop and the output callback.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Element queue capacity (decoded units, not frames).
    pub queue_capacity: usize,
    /// How long the decode loop backs off when the queue is full.
    pub full_backoff_ms: u64,
    /// How long the loop idles when no playlist entry is available.
    pub idle_sleep_ms: u64,
    /// Initial gain multiplier (1.0 = unity, no stage inserted).
    pub gain: f64,
}

impl Default for PlayerConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            full_backoff_ms: 20,
            idle_sleep_ms: 50,
            gain: 1.0,
        }
    }
}
