//! Benchmark strategies: decode only, decode + one scaled encode, and
//! decode + two scaled encodes fanned out on a worker pool.
//!
//! Every strategy walks the pre-read units once. "Needs more input" from
//! any stage skips to the next unit; end of stream or a runtime failure
//! ends the walk. Setup failures abort the run with a [`PipelineError`].

use std::fmt::{Display, Formatter};

use crate::codec::{Drained, PushDrain};
use crate::engine::{DecodeStage, Engine, EncodeStage, ScaleStage};
use crate::error::PipelineError;
use crate::frame::DecodedFrame;
use crate::job::{OutputSpec, PipelineJobSpec};
use crate::packet::CompressedUnit;
use crate::pool::FanOutPool;
use crate::stats::{LatencyTracker, Stopwatch};

/// Units between frame-level progress lines.
pub const FRAME_LOG_INTERVAL: usize = 250;
/// Units between GOP-level progress lines.
pub const GOP_LOG_INTERVAL: usize = 1000;

const REPORT_QUANTILE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Decoding,
    Draining,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Decode,
    Scale,
    Encode,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Decode => write!(f, "decode"),
            Stage::Scale => write!(f, "scale"),
            Stage::Encode => write!(f, "encode"),
        }
    }
}

/// Why the unit walk ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    InputExhausted,
    EndOfStream { stage: Stage },
    StageFailed {
        stage: Stage,
        /// Fan-out branch the failure came from.
        branch: Option<usize>,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub task_id: String,
    pub units: usize,
    pub decoded_frames: usize,
    /// Encoded packets per output.
    pub encoded_packets: Vec<usize>,
    /// Dual-output iterations where both branches encoded.
    pub fanout_completed: usize,
    pub pool_submissions: usize,
    pub progress_reports: usize,
    pub state: PipelineState,
    pub stop: StopReason,
    pub elapsed_ms: f64,
    pub speed: f64,
}

/// `units * nominal_frame_ms / elapsed_ms`, i.e. how many times faster than
/// real-time playback the run went.
pub fn speed_factor(units: usize, nominal_frame_ms: f64, elapsed_ms: f64) -> f64 {
    units as f64 * nominal_frame_ms / elapsed_ms.max(f64::EPSILON)
}

/// Strategy chosen once per job from its output count.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    DecodeOnly,
    SingleOutput(OutputSpec),
    DualOutput([OutputSpec; 2]),
}

impl Strategy {
    pub fn for_job(job: &PipelineJobSpec) -> Result<Self, PipelineError> {
        job.validate()?;
        match job.outputs.as_slice() {
            [] => Ok(Strategy::DecodeOnly),
            [output] => Ok(Strategy::SingleOutput(output.clone())),
            [first, second] => Ok(Strategy::DualOutput([first.clone(), second.clone()])),
            _ => Err(PipelineError::InvalidJob(format!(
                "unsupported output count {}",
                job.outputs.len()
            ))),
        }
    }

    pub fn output_count(&self) -> usize {
        match self {
            Strategy::DecodeOnly => 0,
            Strategy::SingleOutput(_) => 1,
            Strategy::DualOutput(_) => 2,
        }
    }

    pub fn run<E: Engine>(
        &self,
        engine: &E,
        job: &PipelineJobSpec,
        units: &[CompressedUnit],
    ) -> Result<RunReport, PipelineError> {
        if units.is_empty() {
            return Err(PipelineError::NoInput);
        }
        let mut decoder = engine
            .open_decoder(job)
            .map_err(PipelineError::DecoderSetup)?;
        let mut run = RunState::new(job, units.len(), self.output_count());

        let walked = match self {
            Strategy::DecodeOnly => decode_only(&mut decoder, units, &mut run),
            Strategy::SingleOutput(output) => {
                single_output(engine, job, output, &mut decoder, units, &mut run)
            }
            Strategy::DualOutput(outputs) => {
                dual_output(engine, job, outputs, &mut decoder, units, &mut run)
            }
        };
        decoder.teardown();

        match walked {
            Ok(stop) => Ok(run.finish(stop)),
            Err(e) => {
                log::error!("[{}] {} (status {})", job.task_id, e, e.status());
                Err(e)
            }
        }
    }
}

/// Counters and latency trackers of one run.
struct RunState {
    task_id: String,
    units: usize,
    nominal_frame_ms: f64,
    state: PipelineState,
    clock: Stopwatch,
    decoded_frames: usize,
    encoded_packets: Vec<usize>,
    fanout_completed: usize,
    pool_submissions: usize,
    progress_reports: usize,
    decode: LatencyTracker,
    scale: Vec<LatencyTracker>,
    encode: Vec<LatencyTracker>,
}

impl RunState {
    fn new(job: &PipelineJobSpec, units: usize, outputs: usize) -> Self {
        Self {
            task_id: job.task_id.clone(),
            units,
            nominal_frame_ms: job.nominal_frame_duration_ms(),
            state: PipelineState::Decoding,
            clock: Stopwatch::start(),
            decoded_frames: 0,
            encoded_packets: vec![0; outputs],
            fanout_completed: 0,
            pool_submissions: 0,
            progress_reports: 0,
            decode: LatencyTracker::default(),
            scale: vec![LatencyTracker::default(); outputs],
            encode: vec![LatencyTracker::default(); outputs],
        }
    }

    fn record_branch(&mut self, output: usize, timings: BranchTimings) {
        self.scale[output].record(timings.scale_ms);
        self.encode[output].record(timings.encode_ms);
        self.encoded_packets[output] += 1;
    }

    /// Progress line after unit `index` completed. Telemetry only.
    fn progress(&mut self, index: usize) {
        let n = index + 1;
        let gop_level = n % GOP_LOG_INTERVAL == 0;
        if !gop_level && n % FRAME_LOG_INTERVAL != 0 {
            return;
        }
        self.progress_reports += 1;

        let pick = |t: &LatencyTracker| if gop_level { t.gop_ms() } else { t.frame_ms() };
        let mut line = format!(
            "[{}] progress {:.2}%, decode {:.2} ms (p90 {:.2} ms)",
            self.task_id,
            100.0 * index as f64 / self.units as f64,
            pick(&self.decode),
            self.decode.percentile(REPORT_QUANTILE),
        );
        for (i, (scale, encode)) in self.scale.iter().zip(&self.encode).enumerate() {
            line.push_str(&format!(
                ", out{} scale {:.2} ms (p90 {:.2} ms) encode {:.2} ms (p90 {:.2} ms)",
                i,
                pick(scale),
                scale.percentile(REPORT_QUANTILE),
                pick(encode),
                encode.percentile(REPORT_QUANTILE),
            ));
        }
        log::info!("{}{}", line, if gop_level { " [gop]" } else { "" });
    }

    fn finish(mut self, stop: StopReason) -> RunReport {
        let elapsed_ms = self.clock.elapsed_ms();
        self.state = PipelineState::Draining;
        log::debug!("[{}] {:?} after {:?}", self.task_id, self.state, stop);

        let speed = speed_factor(self.units, self.nominal_frame_ms, elapsed_ms);
        log::info!(
            "[{}] finished: {} units, {} frames decoded (gop {:.2} ms, p90 {:.2} ms), packets {:?}, {:.0} ms, speed {:.2}",
            self.task_id,
            self.units,
            self.decoded_frames,
            self.decode.gop_ms(),
            self.decode.percentile(REPORT_QUANTILE),
            self.encoded_packets,
            elapsed_ms,
            speed
        );
        self.state = PipelineState::Done;
        RunReport {
            task_id: self.task_id,
            units: self.units,
            decoded_frames: self.decoded_frames,
            encoded_packets: self.encoded_packets,
            fanout_completed: self.fanout_completed,
            pool_submissions: self.pool_submissions,
            progress_reports: self.progress_reports,
            state: self.state,
            stop,
            elapsed_ms,
            speed,
        }
    }
}

enum Step<T> {
    Next(T),
    Skip,
    Stop(StopReason),
}

fn failed(stage: Stage, branch: Option<usize>, err: anyhow::Error) -> StopReason {
    StopReason::StageFailed {
        stage,
        branch,
        message: format!("{:#}", err),
    }
}

fn decode_step<D: DecodeStage>(
    decoder: &mut D,
    unit: &CompressedUnit,
    run: &mut RunState,
) -> Step<DecodedFrame> {
    let watch = Stopwatch::start();
    if let Err(e) = decoder.submit(unit) {
        log::warn!("[{}] decoder submit failed: {:#}", run.task_id, e);
        return Step::Stop(failed(Stage::Decode, None, e));
    }
    match decoder.drain() {
        Ok(Drained::Produced(frame)) => {
            run.decode.record(watch.elapsed_ms());
            run.decoded_frames += 1;
            Step::Next(frame)
        }
        Ok(Drained::NeedsMoreInput) => Step::Skip,
        Ok(Drained::Done) => Step::Stop(StopReason::EndOfStream {
            stage: Stage::Decode,
        }),
        Err(e) => {
            log::warn!("[{}] decoder drain failed: {:#}", run.task_id, e);
            Step::Stop(failed(Stage::Decode, None, e))
        }
    }
}

fn decode_only<D: DecodeStage>(
    decoder: &mut D,
    units: &[CompressedUnit],
    run: &mut RunState,
) -> Result<StopReason, PipelineError> {
    for (index, unit) in units.iter().enumerate() {
        match decode_step(decoder, unit, run) {
            Step::Next(_) => run.progress(index),
            Step::Skip => continue,
            Step::Stop(reason) => return Ok(reason),
        }
    }
    Ok(StopReason::InputExhausted)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BranchTimings {
    scale_ms: f64,
    encode_ms: f64,
}

enum BranchOutcome {
    Encoded(BranchTimings),
    NeedsMore,
    EndOfStream(Stage),
    Failed(Stage, anyhow::Error),
    /// The encoder could not be opened on this frame.
    SetupFailed(anyhow::Error),
}

impl BranchOutcome {
    fn severity(&self) -> u8 {
        match self {
            BranchOutcome::Encoded(_) => 0,
            BranchOutcome::NeedsMore => 1,
            BranchOutcome::EndOfStream(_) => 2,
            BranchOutcome::Failed(..) => 3,
            BranchOutcome::SetupFailed(_) => 4,
        }
    }
}

/// One scale + encode chain feeding one output.
struct Branch<E: Engine> {
    output: usize,
    scaler: E::Scaler,
    encoder: E::Encoder,
}

impl<E: Engine> Branch<E> {
    fn create(
        engine: &E,
        job: &PipelineJobSpec,
        output: usize,
        spec: &OutputSpec,
        picture: &crate::decoder::PictureParams,
    ) -> Result<Self, PipelineError> {
        let scaler = engine
            .scaler(job.scale_params(spec, picture))
            .map_err(|source| PipelineError::ScalerSetup { output, source })?;
        let encoder = engine
            .encoder(job.encode_settings(spec, picture.pixel_format))
            .map_err(|source| PipelineError::EncoderSetup { output, source })?;
        Ok(Self {
            output,
            scaler,
            encoder,
        })
    }

    fn setup_scaler(&mut self, frame: &DecodedFrame) -> Result<(), PipelineError> {
        self.scaler
            .setup(frame.hw_frames().as_ref())
            .map_err(|source| PipelineError::ScalerSetup {
                output: self.output,
                source,
            })
    }

    /// Scales and encodes `frame`; the frame is only read.
    fn process(&mut self, frame: &DecodedFrame) -> BranchOutcome {
        let watch = Stopwatch::start();
        let scaled = match self.scaler.scale(frame) {
            Ok(Drained::Produced(scaled)) => scaled,
            Ok(Drained::NeedsMoreInput) => return BranchOutcome::NeedsMore,
            Ok(Drained::Done) => return BranchOutcome::EndOfStream(Stage::Scale),
            Err(e) => return BranchOutcome::Failed(Stage::Scale, e),
        };
        let scale_ms = watch.elapsed_ms();

        if let Err(e) = self.encoder.setup(self.scaler.hw_frames().as_ref()) {
            return BranchOutcome::SetupFailed(e);
        }

        let watch = Stopwatch::start();
        if let Err(e) = self.encoder.submit(&scaled) {
            return BranchOutcome::Failed(Stage::Encode, e);
        }
        match self.encoder.drain() {
            Ok(Drained::Produced(_packet)) => BranchOutcome::Encoded(BranchTimings {
                scale_ms,
                encode_ms: watch.elapsed_ms(),
            }),
            Ok(Drained::NeedsMoreInput) => BranchOutcome::NeedsMore,
            Ok(Drained::Done) => BranchOutcome::EndOfStream(Stage::Encode),
            Err(e) => BranchOutcome::Failed(Stage::Encode, e),
        }
    }

    /// The encoder holds references into the scaler's frame pool, so it
    /// goes first.
    fn teardown(&mut self) {
        self.encoder.teardown();
        self.scaler.teardown();
    }
}

fn single_output<E: Engine>(
    engine: &E,
    job: &PipelineJobSpec,
    spec: &OutputSpec,
    decoder: &mut E::Decoder,
    units: &[CompressedUnit],
    run: &mut RunState,
) -> Result<StopReason, PipelineError> {
    let mut branch: Option<Branch<E>> = None;
    let walked = walk_single(engine, job, spec, decoder, units, run, &mut branch);
    if let Some(branch) = branch.as_mut() {
        branch.teardown();
    }
    walked
}

fn walk_single<E: Engine>(
    engine: &E,
    job: &PipelineJobSpec,
    spec: &OutputSpec,
    decoder: &mut E::Decoder,
    units: &[CompressedUnit],
    run: &mut RunState,
    slot: &mut Option<Branch<E>>,
) -> Result<StopReason, PipelineError> {
    for (index, unit) in units.iter().enumerate() {
        let frame = match decode_step(decoder, unit, run) {
            Step::Next(frame) => frame,
            Step::Skip => continue,
            Step::Stop(reason) => return Ok(reason),
        };

        let branch = match &mut *slot {
            Some(branch) => branch,
            empty => empty.insert(Branch::create(
                engine,
                job,
                0,
                spec,
                &decoder.picture_params(),
            )?),
        };
        branch.setup_scaler(&frame)?;

        match branch.process(&frame) {
            BranchOutcome::Encoded(timings) => {
                run.record_branch(0, timings);
                run.progress(index);
            }
            BranchOutcome::NeedsMore => continue,
            BranchOutcome::EndOfStream(stage) => return Ok(StopReason::EndOfStream { stage }),
            BranchOutcome::Failed(stage, e) => {
                log::warn!("[{}] {} failed: {:#}", run.task_id, stage, e);
                return Ok(failed(stage, None, e));
            }
            BranchOutcome::SetupFailed(source) => {
                return Err(PipelineError::EncoderSetup { output: 0, source });
            }
        }
    }
    Ok(StopReason::InputExhausted)
}

fn dual_output<E: Engine>(
    engine: &E,
    job: &PipelineJobSpec,
    specs: &[OutputSpec; 2],
    decoder: &mut E::Decoder,
    units: &[CompressedUnit],
    run: &mut RunState,
) -> Result<StopReason, PipelineError> {
    let mut pool = FanOutPool::new(&job.task_id).map_err(PipelineError::WorkerPool)?;
    let mut branches: Option<[Branch<E>; 2]> = None;
    let walked = walk_dual(engine, job, specs, decoder, units, run, &mut pool, &mut branches);
    if let Some(branches) = branches.as_mut() {
        for branch in branches.iter_mut() {
            branch.teardown();
        }
    }
    run.pool_submissions = pool.submissions();
    walked
}

#[allow(clippy::too_many_arguments)]
fn walk_dual<E: Engine>(
    engine: &E,
    job: &PipelineJobSpec,
    specs: &[OutputSpec; 2],
    decoder: &mut E::Decoder,
    units: &[CompressedUnit],
    run: &mut RunState,
    pool: &mut FanOutPool,
    slot: &mut Option<[Branch<E>; 2]>,
) -> Result<StopReason, PipelineError> {
    for (index, unit) in units.iter().enumerate() {
        let frame = match decode_step(decoder, unit, run) {
            Step::Next(frame) => frame,
            Step::Skip => continue,
            Step::Stop(reason) => return Ok(reason),
        };

        let branches = match &mut *slot {
            Some(branches) => branches,
            empty => {
                let picture = decoder.picture_params();
                let first = Branch::create(engine, job, 0, &specs[0], &picture)
                    .map_err(PipelineError::in_branch)?;
                let second = Branch::create(engine, job, 1, &specs[1], &picture)
                    .map_err(PipelineError::in_branch)?;
                empty.insert([first, second])
            }
        };
        let [first, second] = branches;
        first.setup_scaler(&frame).map_err(PipelineError::in_branch)?;
        second.setup_scaler(&frame).map_err(PipelineError::in_branch)?;

        let shared = &frame;
        let outcomes = pool.fork_join(|| first.process(shared), || second.process(shared));

        match settle(outcomes) {
            Settled::Both([a, b]) => {
                run.record_branch(0, a);
                run.record_branch(1, b);
                run.fanout_completed += 1;
                run.progress(index);
            }
            Settled::Abandoned(_, BranchOutcome::NeedsMore) => continue,
            Settled::Abandoned(_, BranchOutcome::EndOfStream(stage)) => {
                return Ok(StopReason::EndOfStream { stage });
            }
            Settled::Abandoned(branch, BranchOutcome::Failed(stage, e)) => {
                log::warn!(
                    "[{}] branch {} {} failed: {:#}",
                    run.task_id,
                    branch,
                    stage,
                    e
                );
                return Ok(failed(stage, Some(branch), e));
            }
            Settled::Abandoned(branch, BranchOutcome::SetupFailed(source)) => {
                return Err(PipelineError::Branch { branch, source });
            }
            Settled::Abandoned(_, BranchOutcome::Encoded(_)) => continue,
        }
    }
    Ok(StopReason::InputExhausted)
}

enum Settled {
    Both([BranchTimings; 2]),
    /// The most severe outcome and the branch it came from; the sibling's
    /// result is discarded.
    Abandoned(usize, BranchOutcome),
}

fn settle(outcomes: (BranchOutcome, BranchOutcome)) -> Settled {
    match outcomes {
        (BranchOutcome::Encoded(a), BranchOutcome::Encoded(b)) => Settled::Both([a, b]),
        (first, second) => {
            if second.severity() > first.severity() {
                Settled::Abandoned(1, second)
            } else {
                Settled::Abandoned(0, first)
            }
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
