use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "player", version)]
pub struct Args {
    /// Audio files to play, in order
    pub files: Vec<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Preferred output sample rate in Hz (defaults to the device maximum)
    #[arg(long)]
    pub rate: Option<u32>,

    /// Constant gain applied to every sample
    #[arg(long, default_value_t = 1.0)]
    pub gain: f64,

    /// Playback queue capacity in elements. Larger absorbs decode stalls
    /// better but makes seeks discard more.
    #[arg(long, default_value_t = 32)]
    pub queue_capacity: usize,
}
