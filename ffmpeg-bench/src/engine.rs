//! Stage contracts the pipeline strategies are written against, and the
//! FFmpeg implementation of them.

use crate::codec::{Drained, PushDrain};
use crate::decoder::{DecodeSession, PictureParams};
use crate::encoder::{EncodeSession, EncodeSettings};
use crate::frame::DecodedFrame;
use crate::hw::HwFrames;
use crate::job::PipelineJobSpec;
use crate::packet::CompressedUnit;
use crate::scaler::{ScaleParams, Scaler};

pub trait DecodeStage: PushDrain<Input = CompressedUnit, Output = DecodedFrame> {
    fn picture_params(&self) -> PictureParams;
    fn teardown(&mut self);
}

pub trait ScaleStage: Send {
    /// Lazy and idempotent.
    fn setup(&mut self, hw_frames: Option<&HwFrames>) -> anyhow::Result<()>;
    fn scale(&mut self, frame: &DecodedFrame) -> anyhow::Result<Drained<DecodedFrame>>;
    fn hw_frames(&self) -> Option<HwFrames>;
    fn teardown(&mut self);
}

pub trait EncodeStage: PushDrain<Input = DecodedFrame, Output = CompressedUnit> + Send {
    /// Lazy and idempotent.
    fn setup(&mut self, hw_frames: Option<&HwFrames>) -> anyhow::Result<()>;
    fn teardown(&mut self);
}

/// Factory for the stages of one pipeline replica. Shared by all replicas.
pub trait Engine: Sync {
    type Decoder: DecodeStage;
    type Scaler: ScaleStage;
    type Encoder: EncodeStage;

    /// Returns an opened decoder for the job's input codec.
    fn open_decoder(&self, job: &PipelineJobSpec) -> anyhow::Result<Self::Decoder>;
    fn scaler(&self, params: ScaleParams) -> anyhow::Result<Self::Scaler>;
    /// Returns an unopened encoder; the pipeline calls `setup` on the first frame.
    fn encoder(&self, settings: EncodeSettings) -> anyhow::Result<Self::Encoder>;
}

/// Stages backed by libavcodec, libavfilter and libswscale.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegEngine;

impl Engine for FfmpegEngine {
    type Decoder = DecodeSession;
    type Scaler = Scaler;
    type Encoder = EncodeSession;

    fn open_decoder(&self, job: &PipelineJobSpec) -> anyhow::Result<DecodeSession> {
        DecodeSession::open(&job.input_codec, job.threads)
    }

    fn scaler(&self, params: ScaleParams) -> anyhow::Result<Scaler> {
        Ok(Scaler::new(params))
    }

    fn encoder(&self, settings: EncodeSettings) -> anyhow::Result<EncodeSession> {
        EncodeSession::new(settings)
    }
}

impl DecodeStage for DecodeSession {
    fn picture_params(&self) -> PictureParams {
        DecodeSession::picture_params(self)
    }

    fn teardown(&mut self) {
        DecodeSession::teardown(self)
    }
}

impl ScaleStage for Scaler {
    fn setup(&mut self, hw_frames: Option<&HwFrames>) -> anyhow::Result<()> {
        Scaler::setup(self, hw_frames)
    }

    fn scale(&mut self, frame: &DecodedFrame) -> anyhow::Result<Drained<DecodedFrame>> {
        Scaler::scale(self, frame)
    }

    fn hw_frames(&self) -> Option<HwFrames> {
        Scaler::hw_frames(self)
    }

    fn teardown(&mut self) {
        Scaler::teardown(self)
    }
}

impl EncodeStage for EncodeSession {
    fn setup(&mut self, hw_frames: Option<&HwFrames>) -> anyhow::Result<()> {
        EncodeSession::setup(self, hw_frames)
    }

    fn teardown(&mut self) {
        EncodeSession::teardown(self)
    }
}
