use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame;

use crate::hw::HwFrames;

/// One decoded (or scaled) picture, possibly backed by a hardware surface.
///
/// Move-only. During fan-out the same frame is read by both branches, which
/// never mutate it.
pub struct DecodedFrame {
    frame: Option<frame::Video>,
}

// SAFETY: branches only read the frame (filter sources take their own
// reference, software scaling reads the planes).
unsafe impl Send for DecodedFrame {}
unsafe impl Sync for DecodedFrame {}

impl DecodedFrame {
    pub fn is_empty(&self) -> bool {
        self.frame.is_none()
    }

    pub fn as_video(&self) -> Option<&frame::Video> {
        self.frame.as_ref()
    }

    pub fn as_video_mut(&mut self) -> Option<&mut frame::Video> {
        self.frame.as_mut()
    }

    pub fn width(&self) -> u32 {
        self.frame.as_ref().map(|f| f.width()).unwrap_or_default()
    }

    pub fn height(&self) -> u32 {
        self.frame.as_ref().map(|f| f.height()).unwrap_or_default()
    }

    pub fn format(&self) -> Pixel {
        self.frame.as_ref().map(|f| f.format()).unwrap_or(Pixel::None)
    }

    pub fn pts(&self) -> Option<i64> {
        self.frame.as_ref().and_then(|f| f.pts())
    }

    /// The frame pool backing a hardware surface, if any.
    pub fn hw_frames(&self) -> Option<HwFrames> {
        let frame = self.frame.as_ref()?;
        unsafe { HwFrames::from_borrowed((*frame.as_ptr()).hw_frames_ctx) }
    }

    pub fn release(&mut self) {
        self.frame = None;
    }
}

impl From<frame::Video> for DecodedFrame {
    fn from(frame: frame::Video) -> Self {
        Self { frame: Some(frame) }
    }
}

impl std::fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.format())
            .field("pts", &self.pts())
            .finish()
    }
}
