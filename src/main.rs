use std::collections::HashMap;
use std::path::Path;

use clap::Parser;
use ffmpeg_bench::input::Demuxer;
use ffmpeg_bench::packet::CompressedUnit;
use ffmpeg_bench::stream::VideoStream;
use ffmpeg_bench::task::{self, HwAccel, VideoCodec};
use ffmpeg_bench::{FfmpegEngine, PipelineJobSpec, runner};

mod config;

use config::Args;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_bench", log::LevelFilter::Info)
        .filter_module("transcode_bench", log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Units of one input, read once and shared by every task using it.
struct Input {
    stream: VideoStream,
    units: Vec<CompressedUnit>,
}

impl Input {
    fn load(path: &Path, frames: usize) -> anyhow::Result<Self> {
        let mut demuxer = Demuxer::open(&path.to_string_lossy())?;
        let units = demuxer.read_units(frames);
        if units.is_empty() {
            anyhow::bail!("no video units in {}", path.display());
        }
        Ok(Self {
            stream: demuxer.stream().clone(),
            units,
        })
    }
}

/// Runs one job and reports whether it completed.
fn bench(job: &PipelineJobSpec, input: &Input, concurrency: usize) -> bool {
    let job = job.clone().with_stream(&input.stream);
    match runner::run(&FfmpegEngine, &job, &input.units, concurrency) {
        Ok(summary) => {
            log::info!(
                "{}: {} replica(s), total speed {:.2}x",
                summary.task_id,
                summary.concurrency,
                summary.total_speed
            );
            true
        }
        Err(e) => {
            log::error!("{}: {} (status {})", job.task_id, e, e.status());
            false
        }
    }
}

fn run_custom_job(args: &Args, job_path: &Path, input_path: &Path) -> anyhow::Result<usize> {
    let text = std::fs::read_to_string(job_path)?;
    let job: PipelineJobSpec = serde_json::from_str(&text)?;
    let input = Input::load(input_path, args.frames)?;
    Ok(usize::from(!bench(&job, &input, args.concurrency)))
}

fn run_tasks(args: &Args) -> anyhow::Result<usize> {
    let Some(tasks) = task::resolve(&args.task) else {
        anyhow::bail!(
            "unknown task {}, supported: {}",
            args.task,
            task::support_list()
        );
    };
    let accel = HwAccel::from(args.hw);
    let mut inputs: HashMap<VideoCodec, Input> = HashMap::new();
    let mut failed = 0;

    for task in tasks {
        let codec = task.input();
        if !inputs.contains_key(&codec) {
            let path = match codec {
                VideoCodec::H264 => &args.h264_input,
                VideoCodec::H265 => &args.h265_input,
            };
            match Input::load(path, args.frames) {
                Ok(input) => {
                    if VideoCodec::from_stream_codec(input.stream.codec_name()) != Some(codec) {
                        log::warn!(
                            "{} carries {}, expected {:?}",
                            path.display(),
                            input.stream.codec_name(),
                            codec
                        );
                    }
                    inputs.insert(codec, input);
                }
                Err(e) => {
                    log::error!("{}: {:#}", task.name(), e);
                    failed += 1;
                    continue;
                }
            }
        }
        let Some(input) = inputs.get(&codec) else {
            continue;
        };

        if !bench(&task.job(accel, args.threads), input, args.concurrency) {
            failed += 1;
        }
    }
    Ok(failed)
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    ffmpeg_bench::init()?;
    ffmpeg_bench::set_ffmpeg_log_level(args.ffmpeg_log_level.into());

    log::info!(
        "========== {} concurrency {} frames {} begin ==========",
        args.task,
        args.concurrency,
        args.frames
    );
    let started = std::time::Instant::now();

    let failed = match (&args.job, &args.input) {
        (Some(job), Some(input)) => run_custom_job(&args, job, input)?,
        _ => run_tasks(&args)?,
    };

    log::info!(
        "========== {} end in {:.2}s ==========",
        args.task,
        started.elapsed().as_secs_f64()
    );
    if failed > 0 {
        anyhow::bail!("{} job(s) failed", failed);
    }
    Ok(())
}
