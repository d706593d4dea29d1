//! Resolution conversion stage.
//!
//! Software frames go straight through swscale. Hardware frames go through
//! a one-chain filter graph (`buffer -> scale_* -> buffersink`) so they
//! never leave device memory; the graph's output pool is then handed on to
//! the encoder.

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{self, flag::Flags};
use ffmpeg_next::{Rational, ffi, filter, frame};

use crate::codec::{Drained, drained_from_error};
use crate::frame::DecodedFrame;
use crate::hw::HwFrames;

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleParams {
    pub src_width: u32,
    pub src_height: u32,
    pub src_format: Pixel,
    pub dst_width: u32,
    pub dst_height: u32,
    pub dst_format: Pixel,
    pub time_base: Rational,
    pub pixel_aspect: Rational,
    /// Filter expression used on the hardware path, e.g. `scale_qsv=w=720:h=480`.
    pub filter: String,
}

enum ScalePath {
    Direct(scaling::Context),
    Graph(filter::Graph),
}

pub struct Scaler {
    params: ScaleParams,
    path: Option<ScalePath>,
    output_frames: Option<HwFrames>,
    produced: i64,
}

// SAFETY: the swscale context and filter graph are only touched by the
// thread currently running this branch.
unsafe impl Send for Scaler {}

impl Scaler {
    pub fn new(params: ScaleParams) -> Self {
        Self {
            params,
            path: None,
            output_frames: None,
            produced: 0,
        }
    }

    pub fn params(&self) -> &ScaleParams {
        &self.params
    }

    pub fn is_ready(&self) -> bool {
        self.path.is_some()
    }

    /// Builds the conversion path on first use. A frame pool selects the
    /// filter-graph path; later calls return immediately.
    pub fn setup(&mut self, hw_frames: Option<&HwFrames>) -> anyhow::Result<()> {
        if self.path.is_some() {
            return Ok(());
        }
        let path = match hw_frames {
            Some(frames) => {
                let mut graph = self.build_graph(frames)?;
                self.output_frames = graph_output_frames(&mut graph);
                ScalePath::Graph(graph)
            }
            None => ScalePath::Direct(scaling::Context::get(
                self.params.src_format,
                self.params.src_width,
                self.params.src_height,
                self.params.dst_format,
                self.params.dst_width,
                self.params.dst_height,
                Flags::FAST_BILINEAR,
            )?),
        };
        log::debug!(
            "scaler ready: {}x{} -> {}x{} ({})",
            self.params.src_width,
            self.params.src_height,
            self.params.dst_width,
            self.params.dst_height,
            match path {
                ScalePath::Direct(_) => "swscale",
                ScalePath::Graph(_) => self.params.filter.as_str(),
            }
        );
        self.path = Some(path);
        Ok(())
    }

    fn build_graph(&self, frames: &HwFrames) -> anyhow::Result<filter::Graph> {
        let p = &self.params;
        let buffer = filter::find("buffer").ok_or_else(|| anyhow::anyhow!("filter not found: buffer"))?;
        let buffersink = filter::find("buffersink")
            .ok_or_else(|| anyhow::anyhow!("filter not found: buffersink"))?;

        let mut graph = filter::Graph::new();
        let args = format!(
            "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
            p.src_width,
            p.src_height,
            ffi::AVPixelFormat::from(p.src_format) as i32,
            p.time_base.numerator(),
            p.time_base.denominator(),
            p.pixel_aspect.numerator(),
            p.pixel_aspect.denominator(),
        );
        graph.add(&buffer, "in", &args)?;
        graph.add(&buffersink, "out", "")?;

        {
            let mut sink = graph
                .get("out")
                .ok_or_else(|| anyhow::anyhow!("buffersink missing from graph"))?;
            sink.set_pixel_format(p.dst_format);
        }

        {
            let mut source = graph
                .get("in")
                .ok_or_else(|| anyhow::anyhow!("buffer source missing from graph"))?;
            unsafe {
                let par = ffi::av_buffersrc_parameters_alloc();
                if par.is_null() {
                    anyhow::bail!("failed to allocate buffer source parameters");
                }
                // parameters_set takes its own reference to the pool
                (*par).hw_frames_ctx = frames.as_ptr();
                let ret = ffi::av_buffersrc_parameters_set(source.as_mut_ptr(), par);
                ffi::av_free(par as *mut _);
                if ret < 0 {
                    anyhow::bail!(
                        "failed to attach frame pool to buffer source: {}",
                        ffmpeg_next::Error::from(ret)
                    );
                }
            }
        }

        graph.output("in", 0)?.input("out", 0)?.parse(&p.filter)?;
        graph.validate()?;
        Ok(graph)
    }

    /// Converts one frame. The graph path may ask for more input or report
    /// end of stream; the direct path always produces.
    pub fn scale(&mut self, frame: &DecodedFrame) -> anyhow::Result<Drained<DecodedFrame>> {
        let src = frame
            .as_video()
            .ok_or_else(|| anyhow::anyhow!("cannot scale an empty frame"))?;
        let path = self
            .path
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("scaler used before setup"))?;

        let mut out = match path {
            ScalePath::Direct(ctx) => {
                let mut dst = frame::Video::new(
                    self.params.dst_format,
                    self.params.dst_width,
                    self.params.dst_height,
                );
                ctx.run(src, &mut dst)?;
                dst
            }
            ScalePath::Graph(graph) => {
                {
                    let mut source = graph
                        .get("in")
                        .ok_or_else(|| anyhow::anyhow!("buffer source missing from graph"))?;
                    // write_frame keeps the caller's reference intact
                    let ret =
                        unsafe { ffi::av_buffersrc_write_frame(source.as_mut_ptr(), src.as_ptr()) };
                    if ret < 0 {
                        return Err(ffmpeg_next::Error::from(ret).into());
                    }
                }
                let mut sink = graph
                    .get("out")
                    .ok_or_else(|| anyhow::anyhow!("buffersink missing from graph"))?;
                let mut dst = frame::Video::empty();
                if let Err(e) = sink.sink().frame(&mut dst) {
                    return drained_from_error(e);
                }
                dst
            }
        };

        if out.pts().is_none() {
            out.set_pts(src.pts().or(Some(self.produced)));
        }
        self.produced += 1;
        Ok(Drained::Produced(DecodedFrame::from(out)))
    }

    /// Frame pool of the scaled output, present on the hardware path.
    pub fn hw_frames(&self) -> Option<HwFrames> {
        self.output_frames.clone()
    }

    pub fn teardown(&mut self) {
        self.path.take();
        self.output_frames.take();
    }
}

impl Drop for Scaler {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn graph_output_frames(graph: &mut filter::Graph) -> Option<HwFrames> {
    let sink = graph.get("out")?;
    unsafe { HwFrames::from_borrowed(ffi::av_buffersink_get_hw_frames_ctx(sink.as_ptr())) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ScaleParams {
        ScaleParams {
            src_width: 64,
            src_height: 48,
            src_format: Pixel::YUV420P,
            dst_width: 32,
            dst_height: 24,
            dst_format: Pixel::YUV420P,
            time_base: Rational::new(1, 25),
            pixel_aspect: Rational::new(1, 1),
            filter: crate::hw::scale_filter_for("h264", 32, 24),
        }
    }

    #[test]
    fn test_scale_before_setup_fails() {
        let mut scaler = Scaler::new(params());
        let frame = DecodedFrame::from(frame::Video::new(Pixel::YUV420P, 64, 48));
        assert!(scaler.scale(&frame).is_err());
    }

    #[test]
    fn test_software_scale() -> anyhow::Result<()> {
        let mut scaler = Scaler::new(params());
        scaler.setup(None)?;
        scaler.setup(None)?;
        assert!(scaler.is_ready());
        assert!(scaler.hw_frames().is_none());

        let mut picture = frame::Video::new(Pixel::YUV420P, 64, 48);
        picture.set_pts(Some(7));
        let source = DecodedFrame::from(picture);
        let Drained::Produced(scaled) = scaler.scale(&source)? else {
            anyhow::bail!("direct path must produce a frame");
        };
        assert_eq!((scaled.width(), scaled.height()), (32, 24));
        assert_eq!(scaled.pts(), Some(7));
        // source untouched
        assert_eq!(source.width(), 64);
        Ok(())
    }

    #[test]
    fn test_scale_rejects_empty_frame() -> anyhow::Result<()> {
        let mut scaler = Scaler::new(params());
        scaler.setup(None)?;
        let mut frame = DecodedFrame::from(frame::Video::new(Pixel::YUV420P, 64, 48));
        frame.release();
        assert!(scaler.scale(&frame).is_err());
        Ok(())
    }

    #[test]
    fn test_teardown_twice() -> anyhow::Result<()> {
        let mut scaler = Scaler::new(params());
        scaler.setup(None)?;
        scaler.teardown();
        scaler.teardown();
        assert!(!scaler.is_ready());
        Ok(())
    }

    #[test]
    fn test_teardown_twice_releases_pool_once() -> anyhow::Result<()> {
        let mut raw = unsafe { ffi::av_buffer_alloc(16) };
        assert!(!raw.is_null());
        let count = || unsafe { ffi::av_buffer_get_ref_count(raw) };

        let mut scaler = Scaler::new(params());
        scaler.setup(None)?;
        scaler.output_frames = unsafe { HwFrames::from_borrowed(raw) };
        assert_eq!(count(), 2);
        drop(scaler.hw_frames());
        assert_eq!(count(), 2);

        scaler.teardown();
        assert_eq!(count(), 1);
        scaler.teardown();
        drop(scaler);
        assert_eq!(count(), 1);

        unsafe { ffi::av_buffer_unref(&mut raw) };
        Ok(())
    }
}
