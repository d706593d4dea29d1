//! Built-in benchmark tasks.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::job::{OutputSpec, PipelineJobSpec};

/// Expands to every other task.
pub const ALL_TASKS: &str = "all_task";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    /// Matches FFmpeg's stream codec names.
    pub fn from_stream_codec(name: &str) -> Option<Self> {
        match name {
            "h264" => Some(Self::H264),
            "hevc" | "h265" => Some(Self::H265),
            _ => None,
        }
    }
}

/// Vendor acceleration picked on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HwAccel {
    #[default]
    None,
    Qsv,
    Nvidia,
    Amf,
}

impl HwAccel {
    pub fn decoder(&self, codec: VideoCodec) -> &'static str {
        match (self, codec) {
            (HwAccel::Qsv, VideoCodec::H264) => "h264_qsv",
            (HwAccel::Qsv, VideoCodec::H265) => "hevc_qsv",
            (HwAccel::Nvidia, VideoCodec::H264) => "h264_cuvid",
            (HwAccel::Nvidia, VideoCodec::H265) => "hevc_cuvid",
            (HwAccel::Amf, VideoCodec::H264) => "h264_amf",
            (HwAccel::Amf, VideoCodec::H265) => "hevc_amf",
            (HwAccel::None, VideoCodec::H264) => "h264",
            (HwAccel::None, VideoCodec::H265) => "hevc",
        }
    }

    pub fn encoder(&self, codec: VideoCodec) -> &'static str {
        match (self, codec) {
            (HwAccel::Qsv, VideoCodec::H264) => "h264_qsv",
            (HwAccel::Qsv, VideoCodec::H265) => "hevc_qsv",
            (HwAccel::Nvidia, VideoCodec::H264) => "h264_nvenc",
            (HwAccel::Nvidia, VideoCodec::H265) => "hevc_nvenc",
            (HwAccel::Amf, VideoCodec::H264) => "h264_amf",
            (HwAccel::Amf, VideoCodec::H265) => "hevc_amf",
            (HwAccel::None, VideoCodec::H264) => "libx264",
            (HwAccel::None, VideoCodec::H265) => "libx265",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 720x480 at 1 Mbps.
    D1,
    /// 352x288 at 128 kbps.
    Cif,
}

impl Resolution {
    pub fn size(&self) -> (u32, u32) {
        match self {
            Resolution::D1 => (720, 480),
            Resolution::Cif => (352, 288),
        }
    }

    pub fn bitrate(&self) -> u64 {
        match self {
            Resolution::D1 => 1_000_000,
            Resolution::Cif => 128_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeTask {
    name: &'static str,
    input: VideoCodec,
    outputs: &'static [(Resolution, VideoCodec)],
}

use Resolution::{Cif, D1};
use VideoCodec::{H264, H265};

static TASKS: [TranscodeTask; 11] = [
    TranscodeTask::new("h264_decode_only", H264, &[]),
    TranscodeTask::new("h265_decode_only", H265, &[]),
    TranscodeTask::new("h264_to_d1_h264", H264, &[(D1, H264)]),
    TranscodeTask::new("h264_to_cif_h264", H264, &[(Cif, H264)]),
    TranscodeTask::new("h265_to_d1_h265", H265, &[(D1, H265)]),
    TranscodeTask::new("h265_to_cif_h265", H265, &[(Cif, H265)]),
    TranscodeTask::new("h265_to_d1_h264", H265, &[(D1, H264)]),
    TranscodeTask::new("h265_to_cif_h264", H265, &[(Cif, H264)]),
    TranscodeTask::new("h264_to_d1_cif_h264", H264, &[(D1, H264), (Cif, H264)]),
    TranscodeTask::new("h265_to_d1_cif_h265", H265, &[(D1, H265), (Cif, H265)]),
    TranscodeTask::new("h265_to_d1_cif_h264", H265, &[(D1, H264), (Cif, H264)]),
];

static TASK_TABLE: LazyLock<HashMap<&'static str, &'static TranscodeTask>> =
    LazyLock::new(|| TASKS.iter().map(|task| (task.name, task)).collect());

impl TranscodeTask {
    const fn new(
        name: &'static str,
        input: VideoCodec,
        outputs: &'static [(Resolution, VideoCodec)],
    ) -> Self {
        Self {
            name,
            input,
            outputs,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn input(&self) -> VideoCodec {
        self.input
    }

    pub fn outputs(&self) -> &'static [(Resolution, VideoCodec)] {
        self.outputs
    }

    /// Job for this task. Geometry defaults to 1080p@25 until
    /// [`PipelineJobSpec::with_stream`] replaces it.
    pub fn job(&self, accel: HwAccel, threads: usize) -> PipelineJobSpec {
        PipelineJobSpec {
            task_id: self.name.to_string(),
            input_codec: accel.decoder(self.input).to_string(),
            width: 1920,
            height: 1080,
            fps: 25.0,
            outputs: self
                .outputs
                .iter()
                .map(|(resolution, codec)| {
                    let (width, height) = resolution.size();
                    OutputSpec {
                        codec: accel.encoder(*codec).to_string(),
                        width,
                        height,
                        bitrate: resolution.bitrate(),
                    }
                })
                .collect(),
            threads,
        }
    }
}

pub fn all() -> &'static [TranscodeTask] {
    &TASKS
}

pub fn lookup(name: &str) -> Option<&'static TranscodeTask> {
    TASK_TABLE.get(name).copied()
}

/// Tasks selected by `name`; [`ALL_TASKS`] selects every task in table order.
pub fn resolve(name: &str) -> Option<Vec<&'static TranscodeTask>> {
    if name == ALL_TASKS {
        return Some(TASKS.iter().collect());
    }
    lookup(name).map(|task| vec![task])
}

pub fn support_list() -> String {
    TASKS
        .iter()
        .map(|task| task.name)
        .chain(std::iter::once(ALL_TASKS))
        .collect::<Vec<_>>()
        .join(", ")
}
