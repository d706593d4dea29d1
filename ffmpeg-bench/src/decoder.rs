use ffmpeg_next::Rational;
use ffmpeg_next::codec::decoder;
use ffmpeg_next::format::Pixel;

use crate::codec::{CodecRole, Drained, PushDrain, SessionCore, SessionState, drained_from_error};
use crate::frame::DecodedFrame;
use crate::packet::CompressedUnit;

/// Picture parameters a decoder hands to the scaling stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PictureParams {
    pub pixel_format: Pixel,
    pub time_base: Rational,
    pub pixel_aspect: Rational,
}

impl Default for PictureParams {
    fn default() -> Self {
        Self {
            pixel_format: Pixel::YUV420P,
            time_base: Rational::new(1, 25),
            pixel_aspect: Rational::new(1, 1),
        }
    }
}

/// Video decoder session. Opened at construction, single use.
pub struct DecodeSession {
    core: SessionCore,
    decoder: Option<decoder::Video>,
}

// SAFETY: a session is driven by one thread at a time.
unsafe impl Send for DecodeSession {}

impl DecodeSession {
    pub fn open(name: &str, threads: usize) -> anyhow::Result<Self> {
        let mut session = Self {
            core: SessionCore::new(name, CodecRole::Decoder, Pixel::YUV420P)?,
            decoder: None,
        };
        session.setup(threads)?;
        Ok(session)
    }

    fn setup(&mut self, threads: usize) -> anyhow::Result<()> {
        self.core.ensure_unconfigured()?;
        let ctx = self.core.context();
        let opts = self.core.options(threads);
        let opened = ctx
            .decoder()
            .open_as_with(self.core.codec(), opts)
            .and_then(|opened| opened.video());
        match opened {
            Ok(video) => {
                log::info!(
                    "decoder {} opened, pixel format {:?}",
                    self.core.name(),
                    self.core.pixel_format()
                );
                self.decoder = Some(video);
                self.core.mark_open();
                Ok(())
            }
            Err(e) => {
                self.teardown();
                Err(anyhow::anyhow!("open decoder {}: {}", self.core.name(), e))
            }
        }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    /// Pixel format frames come out in: the negotiated surface format for
    /// hardware decoders, YUV420P otherwise.
    pub fn picture_params(&self) -> PictureParams {
        let mut params = PictureParams {
            pixel_format: self.core.pixel_format(),
            ..PictureParams::default()
        };
        if let Some(decoder) = &self.decoder {
            let (time_base, aspect) = unsafe {
                let raw = decoder.as_ptr();
                ((*raw).time_base, (*raw).sample_aspect_ratio)
            };
            if time_base.num > 0 && time_base.den > 0 {
                params.time_base = time_base.into();
            }
            if aspect.num > 0 && aspect.den > 0 {
                params.pixel_aspect = aspect.into();
            }
        }
        params
    }

    /// Drops the device reference, then the codec context.
    pub fn teardown(&mut self) {
        self.core.close();
        self.decoder.take();
    }
}

impl PushDrain for DecodeSession {
    type Input = CompressedUnit;
    type Output = DecodedFrame;

    fn submit(&mut self, unit: &CompressedUnit) -> anyhow::Result<()> {
        self.core.ensure_open()?;
        let packet = unit
            .packet()
            .ok_or_else(|| anyhow::anyhow!("cannot submit an empty unit"))?;
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("decoder {} is not open", self.core.name()))?;
        decoder.send_packet(packet)?;
        Ok(())
    }

    fn drain(&mut self) -> anyhow::Result<Drained<DecodedFrame>> {
        self.core.ensure_open()?;
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("decoder {} is not open", self.core.name()))?;
        let mut frame = ffmpeg_next::frame::Video::empty();
        match decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Drained::Produced(DecodedFrame::from(frame))),
            Err(e) => drained_from_error(e),
        }
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
