//! Hardware acceleration plumbing.
//!
//! The backend is picked from the codec name suffix (`_qsv`, `_cuvid`,
//! `_nvenc`, `_amf`). A hardware session owns a device context, advertises
//! the surface pixel format it negotiated, and passes frame pools
//! (`hw_frames_ctx`) from the decoder to the scaler and from the scaler to
//! the encoder.

use std::fmt::{Display, Formatter};
use std::ptr::{self, NonNull};

use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwBackend {
    /// Intel Quick Sync.
    Qsv,
    /// NVIDIA CUVID decoders and NVENC encoders.
    Cuda,
    /// AMD AMF on Direct3D 11.
    Amf,
}

impl HwBackend {
    pub fn from_codec_name(name: &str) -> Option<Self> {
        if name.ends_with("_qsv") {
            Some(Self::Qsv)
        } else if name.ends_with("_cuvid") || name.ends_with("_nvenc") {
            Some(Self::Cuda)
        } else if name.ends_with("_amf") {
            Some(Self::Amf)
        } else {
            None
        }
    }

    pub fn device_type(&self) -> ffi::AVHWDeviceType {
        match self {
            Self::Qsv => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_QSV,
            Self::Cuda => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
            Self::Amf => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
        }
    }

    /// Surface format a session falls back to before negotiation.
    pub fn pixel_format(&self) -> Pixel {
        Pixel::from(match self {
            Self::Qsv => ffi::AVPixelFormat::AV_PIX_FMT_QSV,
            Self::Cuda => ffi::AVPixelFormat::AV_PIX_FMT_CUDA,
            Self::Amf => ffi::AVPixelFormat::AV_PIX_FMT_D3D11,
        })
    }

    pub fn scale_filter(&self, width: u32, height: u32) -> String {
        match self {
            Self::Qsv => format!("scale_qsv=w={}:h={}", width, height),
            Self::Cuda => format!("scale_npp=w={}:h={}", width, height),
            Self::Amf => format!("scale_amf=w={}:h={}", width, height),
        }
    }
}

impl Display for HwBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Qsv => "qsv",
            Self::Cuda => "cuda",
            Self::Amf => "d3d11va",
        };
        write!(f, "{}", name)
    }
}

/// Filter expression that resizes frames coming out of `decoder_name`.
pub fn scale_filter_for(decoder_name: &str, width: u32, height: u32) -> String {
    match HwBackend::from_codec_name(decoder_name) {
        Some(backend) => backend.scale_filter(width, height),
        None => format!("scale={}:{}", width, height),
    }
}

/// Owned reference to a refcounted FFmpeg buffer. Cloning takes a new
/// reference, dropping releases one.
pub struct BufferRef {
    ptr: NonNull<ffi::AVBufferRef>,
}

impl BufferRef {
    /// Takes ownership of `ptr`.
    unsafe fn from_owned(ptr: *mut ffi::AVBufferRef) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr })
    }

    /// Takes a new reference to `ptr`, leaving the caller's untouched.
    unsafe fn from_borrowed(ptr: *mut ffi::AVBufferRef) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        unsafe { Self::from_owned(ffi::av_buffer_ref(ptr)) }
    }

    pub fn as_ptr(&self) -> *mut ffi::AVBufferRef {
        self.ptr.as_ptr()
    }

    /// A fresh reference for FFmpeg structs that take ownership of it.
    pub fn new_ref(&self) -> *mut ffi::AVBufferRef {
        unsafe { ffi::av_buffer_ref(self.ptr.as_ptr()) }
    }
}

impl Clone for BufferRef {
    fn clone(&self) -> Self {
        let ptr = self.new_ref();
        match NonNull::new(ptr) {
            Some(ptr) => Self { ptr },
            // av_buffer_ref only fails on allocation failure.
            None => std::alloc::handle_alloc_error(std::alloc::Layout::new::<ffi::AVBufferRef>()),
        }
    }
}

impl Drop for BufferRef {
    fn drop(&mut self) {
        let mut ptr = self.ptr.as_ptr();
        unsafe { ffi::av_buffer_unref(&mut ptr) };
    }
}

// SAFETY: buffer reference counting in FFmpeg is atomic.
unsafe impl Send for BufferRef {}
unsafe impl Sync for BufferRef {}

/// Hardware device context.
#[derive(Clone)]
pub struct HwDevice {
    buffer: BufferRef,
    backend: HwBackend,
}

impl HwDevice {
    /// Opens the default device of `backend`.
    pub fn create(backend: HwBackend) -> anyhow::Result<Self> {
        let mut ctx: *mut ffi::AVBufferRef = ptr::null_mut();
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(
                &mut ctx,
                backend.device_type(),
                ptr::null(),
                ptr::null_mut(),
                0,
            )
        };
        if ret < 0 {
            anyhow::bail!(
                "failed to create {} device: {}",
                backend,
                ffmpeg_next::Error::from(ret)
            );
        }
        let buffer = unsafe { BufferRef::from_owned(ctx) }
            .ok_or_else(|| anyhow::anyhow!("{} device context is null", backend))?;
        log::debug!("created {} device", backend);
        Ok(Self { buffer, backend })
    }

    pub fn backend(&self) -> HwBackend {
        self.backend
    }

    pub fn new_ref(&self) -> *mut ffi::AVBufferRef {
        self.buffer.new_ref()
    }
}

/// Hardware frame pool shared along the pipeline.
#[derive(Clone)]
pub struct HwFrames {
    buffer: BufferRef,
}

impl HwFrames {
    /// Wraps a pool owned by an FFmpeg struct without stealing its reference.
    ///
    /// # Safety
    /// `ptr` must be null or a valid `AVBufferRef` for a frames context.
    pub unsafe fn from_borrowed(ptr: *mut ffi::AVBufferRef) -> Option<Self> {
        unsafe { BufferRef::from_borrowed(ptr) }.map(|buffer| Self { buffer })
    }

    pub fn as_ptr(&self) -> *mut ffi::AVBufferRef {
        self.buffer.as_ptr()
    }

    pub fn new_ref(&self) -> *mut ffi::AVBufferRef {
        self.buffer.new_ref()
    }
}

// AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX
const HW_CONFIG_METHOD_HW_DEVICE_CTX: std::os::raw::c_int = 0x01;

/// Surface format `codec` exposes for device contexts of `device_type`.
pub fn device_pixel_format(
    codec: ffmpeg_next::Codec,
    device_type: ffi::AVHWDeviceType,
) -> Option<Pixel> {
    let mut index = 0;
    loop {
        let config = unsafe { ffi::avcodec_get_hw_config(codec.as_ptr(), index) };
        if config.is_null() {
            return None;
        }
        let config = unsafe { &*config };
        let by_device = config.methods & HW_CONFIG_METHOD_HW_DEVICE_CTX != 0;
        if by_device && config.device_type == device_type {
            return Some(Pixel::from(config.pix_fmt));
        }
        index += 1;
    }
}

/// Outcome of hardware negotiation for one codec.
pub struct HwNegotiation {
    pub device: HwDevice,
    pub pixel_format: Pixel,
}

/// Returns `Ok(None)` for software codecs. A hardware codec whose backend
/// exposes no device configuration, or whose device cannot be opened,
/// fails.
pub fn negotiate(codec: ffmpeg_next::Codec, name: &str) -> anyhow::Result<Option<HwNegotiation>> {
    let Some(backend) = HwBackend::from_codec_name(name) else {
        return Ok(None);
    };
    let pixel_format = device_pixel_format(codec, backend.device_type()).ok_or_else(|| {
        anyhow::anyhow!("{} has no {} device configuration", name, backend)
    })?;
    let device = HwDevice::create(backend)?;
    log::info!(
        "{}: negotiated {:?} on {} device",
        name,
        pixel_format,
        backend
    );
    Ok(Some(HwNegotiation {
        device,
        pixel_format,
    }))
}

/// `get_format` callback. `opaque` points at the format picked during
/// negotiation; anything else the decoder offers is refused.
pub(crate) unsafe extern "C" fn select_negotiated_format(
    ctx: *mut ffi::AVCodecContext,
    formats: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    unsafe {
        let wanted = (*ctx).opaque as *const ffi::AVPixelFormat;
        if wanted.is_null() || formats.is_null() {
            return ffi::AVPixelFormat::AV_PIX_FMT_NONE;
        }
        let mut cursor = formats;
        while *cursor != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
            if *cursor == *wanted {
                return *cursor;
            }
            cursor = cursor.add(1);
        }
        log::error!("failed to get hw surface format {:?}", *wanted);
        ffi::AVPixelFormat::AV_PIX_FMT_NONE
    }
}
