//! Pieces shared by decode and encode sessions: the push/drain contract,
//! session lifecycle, codec resolution, hardware wiring of the codec
//! context and per-family option presets.

use std::fmt::{Display, Formatter};

use ffmpeg_next::codec::{self, flag::Flags};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::{Codec, Dictionary, ffi};

use crate::hw::{self, HwBackend, HwDevice};

/// Result of pulling from a stage.
#[derive(Debug)]
pub enum Drained<T> {
    Produced(T),
    /// Not an error: submit more input and try again.
    NeedsMoreInput,
    /// The stage flushed everything it will ever produce.
    Done,
}

impl<T> Drained<T> {
    pub fn is_produced(&self) -> bool {
        matches!(self, Drained::Produced(_))
    }
}

/// Uniform push-one / pull-one contract for codec-driven stages.
///
/// `drain` errors are genuine engine failures; flow-control conditions are
/// reported through [`Drained`].
pub trait PushDrain {
    type Input;
    type Output;

    fn submit(&mut self, input: &Self::Input) -> anyhow::Result<()>;
    fn drain(&mut self) -> anyhow::Result<Drained<Self::Output>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecRole {
    Decoder,
    Encoder,
}

impl Display for CodecRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecRole::Decoder => write!(f, "decoder"),
            CodecRole::Encoder => write!(f, "encoder"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconfigured,
    Open,
    Closed,
}

/// Maps an FFmpeg `receive_*` failure onto the drain contract.
pub(crate) fn drained_from_error<T>(err: ffmpeg_next::Error) -> anyhow::Result<Drained<T>> {
    match err {
        ffmpeg_next::Error::Other { errno } if errno == ffmpeg_next::util::error::EAGAIN => {
            Ok(Drained::NeedsMoreInput)
        }
        ffmpeg_next::Error::Eof => Ok(Drained::Done),
        err => Err(err.into()),
    }
}

/// Codec lookup plus hardware negotiation state for one session.
pub(crate) struct SessionCore {
    name: String,
    role: CodecRole,
    codec: Codec,
    state: SessionState,
    pixel_format: Pixel,
    hw_device: Option<HwDevice>,
    // Read by the get_format callback through AVCodecContext::opaque; boxed
    // so the address stays put while the context lives.
    format_slot: Box<ffi::AVPixelFormat>,
}

impl SessionCore {
    /// Resolves `name` and negotiates hardware when the name selects a
    /// hardware backend. `requested` is kept for software codecs.
    pub fn new(name: &str, role: CodecRole, requested: Pixel) -> anyhow::Result<Self> {
        let codec = match role {
            CodecRole::Decoder => ffmpeg_next::decoder::find_by_name(name),
            CodecRole::Encoder => ffmpeg_next::encoder::find_by_name(name),
        }
        .ok_or_else(|| anyhow::anyhow!("{} not found: {}", role, name))?;

        let (hw_device, pixel_format) = match hw::negotiate(codec, name)? {
            Some(negotiated) => (Some(negotiated.device), negotiated.pixel_format),
            None => (None, requested),
        };

        Ok(Self {
            name: name.to_string(),
            role,
            codec,
            state: SessionState::Unconfigured,
            pixel_format,
            hw_device,
            format_slot: Box::new(pixel_format.into()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pixel_format(&self) -> Pixel {
        self.pixel_format
    }

    pub fn backend(&self) -> Option<HwBackend> {
        self.hw_device.as_ref().map(|d| d.backend())
    }

    /// Fails unless the session can still be opened.
    pub fn ensure_unconfigured(&self) -> anyhow::Result<()> {
        match self.state {
            SessionState::Unconfigured => Ok(()),
            SessionState::Open => anyhow::bail!("{} {} is already open", self.role, self.name),
            SessionState::Closed => anyhow::bail!("{} {} was closed", self.role, self.name),
        }
    }

    pub fn ensure_open(&self) -> anyhow::Result<()> {
        if self.state != SessionState::Open {
            anyhow::bail!("{} {} is not open ({:?})", self.role, self.name, self.state);
        }
        Ok(())
    }

    /// Allocates a low-delay codec context, wired to the hardware device
    /// when one was negotiated.
    pub fn context(&mut self) -> codec::Context {
        let mut ctx = codec::Context::new_with_codec(self.codec);
        ctx.set_flags(Flags::LOW_DELAY);
        if let Some(device) = &self.hw_device {
            unsafe {
                let raw = ctx.as_mut_ptr();
                (*raw).hw_device_ctx = device.new_ref();
                (*raw).opaque = &mut *self.format_slot as *mut ffi::AVPixelFormat as *mut _;
                (*raw).get_format = Some(hw::select_negotiated_format);
            }
        }
        ctx
    }

    /// Open options for this codec family.
    pub fn options(&self, threads: usize) -> Dictionary<'static> {
        codec_options(&self.name, self.role, threads)
    }

    pub fn mark_open(&mut self) {
        self.state = SessionState::Open;
    }

    /// Drops the device reference. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.hw_device.take();
        self.state = SessionState::Closed;
    }
}

/// Low-latency presets keyed on the codec name.
pub fn codec_options(name: &str, role: CodecRole, threads: usize) -> Dictionary<'static> {
    let mut opts = Dictionary::new();
    let threads = threads.max(1).to_string();
    match (role, HwBackend::from_codec_name(name)) {
        (_, Some(HwBackend::Qsv)) => opts.set("async_depth", "1"),
        (CodecRole::Encoder, Some(HwBackend::Cuda)) => opts.set("preset", "ll"),
        (CodecRole::Encoder, Some(HwBackend::Amf)) => opts.set("usage", "lowlatency"),
        (CodecRole::Decoder, None) => opts.set("threads", &threads),
        (CodecRole::Encoder, None) if name == "libx264" || name == "libx265" => {
            opts.set("preset", "ultrafast");
            opts.set("tune", "zerolatency");
            opts.set("threads", &threads);
        }
        _ => {}
    }
    opts
}
