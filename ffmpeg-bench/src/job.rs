use ffmpeg_next::format::Pixel;
use serde::{Deserialize, Serialize};

use crate::decoder::PictureParams;
use crate::encoder::EncodeSettings;
use crate::error::PipelineError;
use crate::hw::scale_filter_for;
use crate::scaler::ScaleParams;
use crate::stream::{FALLBACK_FPS, VideoStream};

/// Most outputs a single pipeline fans out to.
pub const MAX_OUTPUTS: usize = 2;

fn default_fps() -> f64 {
    FALLBACK_FPS
}

fn default_threads() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u64,
}

/// What one pipeline replica decodes and produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineJobSpec {
    pub task_id: String,
    /// Decoder name, e.g. `h264` or `hevc_qsv`.
    pub input_codec: String,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    /// Thread count handed to software codecs.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl PipelineJobSpec {
    /// Takes geometry and frame rate from the stream actually being read.
    pub fn with_stream(mut self, stream: &VideoStream) -> Self {
        if stream.width() > 0 && stream.height() > 0 {
            self.width = stream.width();
            self.height = stream.height();
        }
        self.fps = stream.fps();
        self
    }

    pub fn nominal_frame_duration_ms(&self) -> f64 {
        if self.fps.is_finite() && self.fps > 0.0 {
            1000.0 / self.fps
        } else {
            1000.0 / FALLBACK_FPS
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.input_codec.is_empty() {
            return Err(PipelineError::InvalidJob("input codec is empty".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::InvalidJob(format!(
                "invalid input size {}x{}",
                self.width, self.height
            )));
        }
        if self.outputs.len() > MAX_OUTPUTS {
            return Err(PipelineError::InvalidJob(format!(
                "{} outputs requested, at most {} supported",
                self.outputs.len(),
                MAX_OUTPUTS
            )));
        }
        for (i, output) in self.outputs.iter().enumerate() {
            if output.codec.is_empty() || output.width == 0 || output.height == 0 {
                return Err(PipelineError::InvalidJob(format!(
                    "output {} is incomplete: {:?}",
                    i, output
                )));
            }
        }
        Ok(())
    }

    pub fn scale_params(&self, output: &OutputSpec, picture: &PictureParams) -> ScaleParams {
        ScaleParams {
            src_width: self.width,
            src_height: self.height,
            src_format: picture.pixel_format,
            dst_width: output.width,
            dst_height: output.height,
            dst_format: picture.pixel_format,
            time_base: picture.time_base,
            pixel_aspect: picture.pixel_aspect,
            filter: scale_filter_for(&self.input_codec, output.width, output.height),
        }
    }

    pub fn encode_settings(&self, output: &OutputSpec, pixel_format: Pixel) -> EncodeSettings {
        EncodeSettings {
            codec: output.codec.clone(),
            width: output.width,
            height: output.height,
            bitrate: output.bitrate,
            pixel_format,
            fps: self.fps,
            threads: self.threads,
            ..EncodeSettings::default()
        }
    }
}
