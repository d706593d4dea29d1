/// Registers FFmpeg components. Call once at startup before opening any
/// input or codec.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

/// Sets libav's own log verbosity. Independent of the `log` facade.
pub fn set_ffmpeg_log_level(level: ffmpeg_next::util::log::Level) {
    ffmpeg_next::util::log::set_level(level);
}

pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod frame;
pub mod hw;
pub mod input;
pub mod job;
pub mod packet;
pub mod pipeline;
pub mod pool;
pub mod runner;
pub mod scaler;
pub mod stats;
pub mod stream;
pub mod task;

#[cfg(test)]
mod mock;

pub use engine::FfmpegEngine;
pub use error::PipelineError;
pub use job::{OutputSpec, PipelineJobSpec};
pub use pipeline::{RunReport, Strategy};
pub use runner::BenchSummary;
