use ffmpeg_next::Rational;
use ffmpeg_next::codec::encoder;
use ffmpeg_next::format::Pixel;

use crate::codec::{CodecRole, Drained, PushDrain, SessionCore, SessionState, drained_from_error};
use crate::frame::DecodedFrame;
use crate::hw::HwFrames;
use crate::packet::CompressedUnit;

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u64,
    /// Software pixel format; hardware encoders use their negotiated
    /// surface format instead.
    pub pixel_format: Pixel,
    pub fps: f64,
    pub gop: u32,
    pub threads: usize,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            width: 720,
            height: 480,
            bitrate: 1_000_000,
            pixel_format: Pixel::YUV420P,
            fps: 25.0,
            gop: 50,
            threads: 1,
        }
    }
}

impl EncodeSettings {
    fn frame_rate(&self) -> Rational {
        let fps = if self.fps.is_finite() && self.fps > 0.0 {
            self.fps
        } else {
            25.0
        };
        Rational::from(fps)
    }
}

/// Video encoder session. Created unconfigured; the pipeline opens it on the
/// first frame because hardware encoders need the frame pool of the stage
/// in front of them.
pub struct EncodeSession {
    core: SessionCore,
    settings: EncodeSettings,
    encoder: Option<encoder::video::Encoder>,
}

// SAFETY: a session is driven by one thread at a time.
unsafe impl Send for EncodeSession {}

impl EncodeSession {
    pub fn new(settings: EncodeSettings) -> anyhow::Result<Self> {
        let core = SessionCore::new(&settings.codec, CodecRole::Encoder, settings.pixel_format)?;
        Ok(Self {
            core,
            settings,
            encoder: None,
        })
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    pub fn settings(&self) -> &EncodeSettings {
        &self.settings
    }

    /// Opens the encoder. Calling it again once open is a no-op; a closed
    /// session cannot be reopened.
    pub fn setup(&mut self, hw_frames: Option<&HwFrames>) -> anyhow::Result<()> {
        if self.core.state() == SessionState::Open {
            return Ok(());
        }
        self.core.ensure_unconfigured()?;

        match self.open(hw_frames) {
            Ok(encoder) => {
                log::info!(
                    "encoder {} opened: {}x{} {:?} @ {} bps",
                    self.core.name(),
                    self.settings.width,
                    self.settings.height,
                    self.core.pixel_format(),
                    self.settings.bitrate
                );
                self.encoder = Some(encoder);
                self.core.mark_open();
                Ok(())
            }
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    fn open(&mut self, hw_frames: Option<&HwFrames>) -> anyhow::Result<encoder::video::Encoder> {
        let ctx = self.core.context();
        let mut video = ctx.encoder().video()?;

        let rate = self.settings.frame_rate();
        video.set_width(self.settings.width);
        video.set_height(self.settings.height);
        video.set_format(self.core.pixel_format());
        video.set_time_base(rate.invert());
        video.set_frame_rate(Some(rate));
        video.set_bit_rate(self.settings.bitrate as usize);
        video.set_tolerance((self.settings.bitrate / 4) as usize);
        video.set_gop(self.settings.gop);
        video.set_max_b_frames(0);

        if let Some(frames) = hw_frames {
            unsafe {
                (*video.as_mut_ptr()).hw_frames_ctx = frames.new_ref();
            }
        }

        let opts = self.core.options(self.settings.threads);
        video
            .open_as_with(self.core.codec(), opts)
            .map_err(|e| anyhow::anyhow!("open encoder {}: {}", self.core.name(), e))
    }

    pub fn teardown(&mut self) {
        self.core.close();
        self.encoder.take();
    }
}

impl PushDrain for EncodeSession {
    type Input = DecodedFrame;
    type Output = CompressedUnit;

    fn submit(&mut self, frame: &DecodedFrame) -> anyhow::Result<()> {
        self.core.ensure_open()?;
        let video = frame
            .as_video()
            .ok_or_else(|| anyhow::anyhow!("cannot encode an empty frame"))?;
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("encoder {} is not open", self.core.name()))?;
        encoder.send_frame(video)?;
        Ok(())
    }

    fn drain(&mut self) -> anyhow::Result<Drained<CompressedUnit>> {
        self.core.ensure_open()?;
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("encoder {} is not open", self.core.name()))?;
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        match encoder.receive_packet(&mut packet) {
            Ok(()) => Ok(Drained::Produced(CompressedUnit::from(packet))),
            Err(e) => drained_from_error(e),
        }
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
