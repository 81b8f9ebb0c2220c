pub mod buffer;
pub mod config;
pub mod decoder;
pub mod device;
pub mod error;
pub mod events;
pub mod filter;
pub mod format;
pub mod player;
pub mod queue;
pub mod render;
