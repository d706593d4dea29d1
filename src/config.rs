use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use ffmpeg_bench::task::HwAccel;
use ffmpeg_next::util::log::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HwArg {
    None,
    Qsv,
    Nvidia,
    Amf,
}

impl From<HwArg> for HwAccel {
    fn from(arg: HwArg) -> Self {
        match arg {
            HwArg::None => HwAccel::None,
            HwArg::Qsv => HwAccel::Qsv,
            HwArg::Nvidia => HwAccel::Nvidia,
            HwArg::Amf => HwAccel::Amf,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FfmpegLogLevel {
    Quiet,
    Panic,
    Fatal,
    Error,
    Warning,
    Info,
    Verbose,
    Debug,
    Trace,
}

impl From<FfmpegLogLevel> for Level {
    fn from(level: FfmpegLogLevel) -> Self {
        match level {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }
}

/// Decode/scale/encode throughput benchmark.
#[derive(Parser, Debug)]
#[command(name = "transcode-bench")]
#[command(version)]
#[command(about = "Measures how many times faster than real time FFmpeg pipelines run")]
pub struct Args {
    /// Task name, or all_task for every task
    #[arg(short, long, default_value = "h264_to_d1_h264")]
    pub task: String,

    /// Pipeline replicas run at the same time
    #[arg(short, long, default_value_t = 1)]
    pub concurrency: usize,

    /// Most units pre-read from each input
    #[arg(short, long, default_value_t = usize::MAX)]
    pub frames: usize,

    /// H.264 elementary stream or container
    #[arg(long, default_value = "/media/1080p.25fps.4M.264")]
    pub h264_input: PathBuf,

    /// H.265 elementary stream or container
    #[arg(long, default_value = "/media/1080p.25fps.3M.265")]
    pub h265_input: PathBuf,

    /// Hardware codecs to use
    #[arg(long, value_enum, default_value_t = HwArg::None)]
    pub hw: HwArg,

    /// Threads per software codec
    #[arg(long, default_value_t = 1)]
    pub threads: usize,

    /// libav log verbosity
    #[arg(short = 'l', long, value_enum, default_value_t = FfmpegLogLevel::Info)]
    pub ffmpeg_log_level: FfmpegLogLevel,

    /// Custom job as a JSON file; replaces --task
    #[arg(long, requires = "input")]
    pub job: Option<PathBuf>,

    /// Input read by a custom job
    #[arg(long, requires = "job")]
    pub input: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["transcode-bench"]);
        assert_eq!(args.task, "h264_to_d1_h264");
        assert_eq!(args.concurrency, 1);
        assert_eq!(args.hw, HwArg::None);
        assert!(args.job.is_none());
    }

    #[test]
    fn test_hw_and_job_flags() {
        let args = Args::parse_from([
            "transcode-bench",
            "--hw",
            "nvidia",
            "-c",
            "4",
            "--job",
            "job.json",
            "--input",
            "in.264",
        ]);
        assert_eq!(HwAccel::from(args.hw), HwAccel::Nvidia);
        assert_eq!(args.concurrency, 4);
        assert_eq!(args.input, Some(PathBuf::from("in.264")));
    }

    #[test]
    fn test_job_needs_input() {
        assert!(Args::try_parse_from(["transcode-bench", "--job", "job.json"]).is_err());
    }
}
