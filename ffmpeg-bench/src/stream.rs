use ffmpeg_next::{Rational, format::stream};

/// Frame rate used when a stream advertises none.
pub const FALLBACK_FPS: f64 = 25.0;

/// The video stream a benchmark reads from.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStream {
    index: usize,
    codec_name: String,
    width: u32,
    height: u32,
    time_base: Rational,
    fps: f64,
}

impl VideoStream {
    pub fn index(&self) -> usize {
        self.index
    }

    /// FFmpeg codec name of the elementary stream (`h264`, `hevc`, ...).
    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Duration of one frame at the stream's nominal rate.
    pub fn frame_duration_ms(&self) -> f64 {
        1000.0 / self.fps
    }
}

fn rate_to_fps(rate: Rational) -> Option<f64> {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        Some(rate.numerator() as f64 / rate.denominator() as f64)
    } else {
        None
    }
}

/// Average frame rate, then real base frame rate, then the inverse of the
/// time base, then [`FALLBACK_FPS`].
pub fn resolve_fps(avg_frame_rate: Rational, real_frame_rate: Rational, time_base: Rational) -> f64 {
    rate_to_fps(avg_frame_rate)
        .or_else(|| rate_to_fps(real_frame_rate))
        .or_else(|| rate_to_fps(time_base.invert()))
        .unwrap_or_else(|| {
            log::warn!("stream has no usable frame rate, assuming {} fps", FALLBACK_FPS);
            FALLBACK_FPS
        })
}

impl From<&stream::Stream<'_>> for VideoStream {
    fn from(stream: &stream::Stream<'_>) -> Self {
        let parameters = stream.parameters();
        let (width, height) = unsafe {
            let ptr = parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            ((*ptr).width.max(0) as u32, (*ptr).height.max(0) as u32)
        };
        Self {
            index: stream.index(),
            codec_name: parameters.id().name().to_string(),
            width,
            height,
            time_base: stream.time_base(),
            fps: resolve_fps(stream.avg_frame_rate(), stream.rate(), stream.time_base()),
        }
    }
}
