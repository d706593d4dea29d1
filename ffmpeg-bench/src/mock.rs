//! Scripted engine for strategy and runner tests.
//!
//! The first payload byte of each unit tells the decoder what to do:
//! `F` produce a frame, `N` ask for more input, `E` report end of stream,
//! `X` fail on submit. Encoder behaviour is picked by the output codec
//! name, see [`MockEncoder`]. Scaler behaviour is scripted per output with
//! [`MockEngine::with_scalers`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ffmpeg_next::frame;

use crate::codec::{Drained, PushDrain};
use crate::decoder::PictureParams;
use crate::encoder::EncodeSettings;
use crate::engine::{DecodeStage, EncodeStage, Engine, ScaleStage};
use crate::frame::DecodedFrame;
use crate::hw::HwFrames;
use crate::job::{OutputSpec, PipelineJobSpec};
use crate::packet::CompressedUnit;
use crate::scaler::ScaleParams;

pub const PRODUCE: u8 = b'F';
pub const NEEDS_MORE: u8 = b'N';
pub const END: u8 = b'E';
pub const FAIL: u8 = b'X';

/// Always encodes.
pub const CODEC_OK: &str = "mock";
/// Asks for more input on every other frame.
pub const CODEC_EVERY_OTHER: &str = "mock-every-other";
/// Fails to open.
pub const CODEC_SETUP_FAILS: &str = "mock-setup-fails";
/// Fails on the third drain.
pub const CODEC_RUNTIME_FAILS: &str = "mock-runtime-fails";
/// Not known to the engine.
pub const CODEC_MISSING: &str = "mock-missing";

#[derive(Debug, Default)]
pub struct Counters {
    pub decoders: AtomicUsize,
    pub scalers: AtomicUsize,
    pub encoders: AtomicUsize,
    pub scale_calls: AtomicUsize,
    pub encode_submits: AtomicUsize,
    pub encoder_opens: AtomicUsize,
    pub teardowns: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn bump(counter: &AtomicUsize) -> usize {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

/// What the n-th scaler created by an engine does. Calls count from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleScript {
    #[default]
    Produce,
    /// Asks for more input on odd calls.
    EveryOther,
    /// Reports end of stream on this call.
    EndAt(usize),
    /// Fails on this call.
    FailAt(usize),
    SetupFails,
}

#[derive(Debug, Default, Clone)]
pub struct MockEngine {
    pub counters: Arc<Counters>,
    pub decoder_fails: bool,
    /// Indexed by scaler creation order; missing entries produce.
    pub scalers: Vec<ScaleScript>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scalers(scalers: &[ScaleScript]) -> Self {
        Self {
            scalers: scalers.to_vec(),
            ..Self::default()
        }
    }

    pub fn failing_decoder() -> Self {
        Self {
            decoder_fails: true,
            ..Self::default()
        }
    }
}

pub fn units(count: usize, script: impl Fn(usize) -> u8) -> Vec<CompressedUnit> {
    (0..count)
        .map(|i| CompressedUnit::from_bytes(&[script(i), 0, 0, 1]))
        .collect()
}

pub fn job(outputs: &[&str]) -> PipelineJobSpec {
    PipelineJobSpec {
        task_id: "mock".into(),
        input_codec: "mock".into(),
        width: 64,
        height: 48,
        fps: 25.0,
        outputs: outputs
            .iter()
            .map(|codec| OutputSpec {
                codec: codec.to_string(),
                width: 32,
                height: 24,
                bitrate: 128_000,
            })
            .collect(),
        threads: 1,
    }
}

fn picture() -> DecodedFrame {
    DecodedFrame::from(frame::Video::empty())
}

pub struct MockDecoder {
    counters: Arc<Counters>,
    pending: Option<u8>,
}

impl PushDrain for MockDecoder {
    type Input = CompressedUnit;
    type Output = DecodedFrame;

    fn submit(&mut self, unit: &CompressedUnit) -> anyhow::Result<()> {
        let data = unit.data();
        let Some(&op) = data.first() else {
            anyhow::bail!("cannot submit an empty unit");
        };
        if op == FAIL {
            anyhow::bail!("scripted decoder failure");
        }
        self.pending = Some(op);
        Ok(())
    }

    fn drain(&mut self) -> anyhow::Result<Drained<DecodedFrame>> {
        match self.pending.take() {
            Some(PRODUCE) => Ok(Drained::Produced(picture())),
            Some(END) => Ok(Drained::Done),
            _ => Ok(Drained::NeedsMoreInput),
        }
    }
}

impl DecodeStage for MockDecoder {
    fn picture_params(&self) -> PictureParams {
        PictureParams::default()
    }

    fn teardown(&mut self) {
        bump(&self.counters.teardowns);
    }
}

pub struct MockScaler {
    counters: Arc<Counters>,
    script: ScaleScript,
    ready: bool,
    calls: usize,
}

impl ScaleStage for MockScaler {
    fn setup(&mut self, _hw_frames: Option<&HwFrames>) -> anyhow::Result<()> {
        if self.script == ScaleScript::SetupFails {
            anyhow::bail!("scripted scaler setup failure");
        }
        self.ready = true;
        Ok(())
    }

    fn scale(&mut self, frame: &DecodedFrame) -> anyhow::Result<Drained<DecodedFrame>> {
        if !self.ready {
            anyhow::bail!("scaler used before setup");
        }
        if frame.is_empty() {
            anyhow::bail!("cannot scale an empty frame");
        }
        bump(&self.counters.scale_calls);
        self.calls += 1;
        match self.script {
            ScaleScript::EveryOther if self.calls % 2 == 1 => Ok(Drained::NeedsMoreInput),
            ScaleScript::EndAt(n) if self.calls == n => Ok(Drained::Done),
            ScaleScript::FailAt(n) if self.calls == n => anyhow::bail!("scripted scaler failure"),
            _ => Ok(Drained::Produced(picture())),
        }
    }

    fn hw_frames(&self) -> Option<HwFrames> {
        None
    }

    fn teardown(&mut self) {
        bump(&self.counters.teardowns);
    }
}

pub struct MockEncoder {
    counters: Arc<Counters>,
    codec: String,
    open: bool,
    submitted: usize,
}

impl PushDrain for MockEncoder {
    type Input = DecodedFrame;
    type Output = CompressedUnit;

    fn submit(&mut self, frame: &DecodedFrame) -> anyhow::Result<()> {
        if !self.open {
            anyhow::bail!("encoder {} is not open", self.codec);
        }
        if frame.is_empty() {
            anyhow::bail!("cannot encode an empty frame");
        }
        self.submitted += 1;
        bump(&self.counters.encode_submits);
        Ok(())
    }

    fn drain(&mut self) -> anyhow::Result<Drained<CompressedUnit>> {
        match self.codec.as_str() {
            CODEC_EVERY_OTHER if self.submitted % 2 == 1 => Ok(Drained::NeedsMoreInput),
            CODEC_RUNTIME_FAILS if self.submitted == 3 => anyhow::bail!("scripted encoder failure"),
            _ => Ok(Drained::Produced(CompressedUnit::from_bytes(&[0, 0, 1]))),
        }
    }
}

impl EncodeStage for MockEncoder {
    fn setup(&mut self, _hw_frames: Option<&HwFrames>) -> anyhow::Result<()> {
        if self.open {
            return Ok(());
        }
        if self.codec == CODEC_SETUP_FAILS {
            anyhow::bail!("scripted encoder setup failure");
        }
        bump(&self.counters.encoder_opens);
        self.open = true;
        Ok(())
    }

    fn teardown(&mut self) {
        self.open = false;
        bump(&self.counters.teardowns);
    }
}

impl Engine for MockEngine {
    type Decoder = MockDecoder;
    type Scaler = MockScaler;
    type Encoder = MockEncoder;

    fn open_decoder(&self, job: &PipelineJobSpec) -> anyhow::Result<MockDecoder> {
        if self.decoder_fails {
            anyhow::bail!("decoder not found: {}", job.input_codec);
        }
        bump(&self.counters.decoders);
        Ok(MockDecoder {
            counters: self.counters.clone(),
            pending: None,
        })
    }

    fn scaler(&self, _params: ScaleParams) -> anyhow::Result<MockScaler> {
        let index = bump(&self.counters.scalers) - 1;
        Ok(MockScaler {
            counters: self.counters.clone(),
            script: self.scalers.get(index).copied().unwrap_or_default(),
            ready: false,
            calls: 0,
        })
    }

    fn encoder(&self, settings: EncodeSettings) -> anyhow::Result<MockEncoder> {
        if settings.codec == CODEC_MISSING {
            anyhow::bail!("encoder not found: {}", settings.codec);
        }
        bump(&self.counters.encoders);
        Ok(MockEncoder {
            counters: self.counters.clone(),
            codec: settings.codec,
            open: false,
            submitted: 0,
        })
    }
}
