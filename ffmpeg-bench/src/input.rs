use std::path::Path;

use ffmpeg_next::{Dictionary, format, media};

use crate::packet::CompressedUnit;
use crate::stream::VideoStream;

/// Opens a media source and yields compressed units of its best video
/// stream.
pub struct Demuxer {
    url: String,
    inner: format::context::Input,
    stream: VideoStream,
}

// SAFETY: the demuxer is owned and read by one thread.
unsafe impl Send for Demuxer {}

impl Demuxer {
    pub fn open(url: &str) -> anyhow::Result<Self> {
        let mut options = Dictionary::new();
        // network sources behave like files over TCP
        options.set("rtsp_transport", "tcp");

        let inner = format::input_with_dictionary(Path::new(url), options)
            .map_err(|e| anyhow::anyhow!("open input {}: {}", url, e))?;
        let stream = inner
            .streams()
            .best(media::Type::Video)
            .map(|s| VideoStream::from(&s))
            .ok_or_else(|| anyhow::anyhow!("no video stream in {}", url))?;

        log::info!(
            "opened {}: stream #{} {} {}x{} @ {:.2} fps",
            url,
            stream.index(),
            stream.codec_name(),
            stream.width(),
            stream.height(),
            stream.fps()
        );

        Ok(Self {
            url: url.to_string(),
            inner,
            stream,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn stream(&self) -> &VideoStream {
        &self.stream
    }

    /// Next unit of the selected stream; units of other streams are skipped.
    /// `None` at end of input or on a read error.
    pub fn read_next(&mut self) -> Option<CompressedUnit> {
        let index = self.stream.index();
        for (stream, packet) in self.inner.packets() {
            if stream.index() == index {
                return Some(CompressedUnit::from(packet));
            }
        }
        None
    }

    /// Reads up to `limit` units ahead of a run.
    pub fn read_units(&mut self, limit: usize) -> Vec<CompressedUnit> {
        let mut units = Vec::with_capacity(limit.min(4096));
        while units.len() < limit {
            match self.read_next() {
                Some(unit) => units.push(unit),
                None => break,
            }
        }
        log::info!("read {} units from {}", units.len(), self.url);
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_fails() {
        assert!(Demuxer::open("/nonexistent/input.264").is_err());
    }
}
