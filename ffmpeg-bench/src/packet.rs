use bytes::Bytes;
use ffmpeg_next::codec::packet::Packet;

/// One compressed access unit of the input stream or of an encoder output.
///
/// Units are move-only. A unit whose payload was released can no longer be
/// submitted to a decoder.
pub struct CompressedUnit {
    packet: Option<Packet>,
}

// SAFETY: the pre-read units are shared read-only between replica threads;
// decoders only take new references to the packet buffer.
unsafe impl Send for CompressedUnit {}
unsafe impl Sync for CompressedUnit {}

impl CompressedUnit {
    /// Copies `data` into a freshly allocated packet.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            packet: Some(Packet::copy(data)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.packet.is_none()
    }

    pub fn packet(&self) -> Option<&Packet> {
        self.packet.as_ref()
    }

    pub fn pts(&self) -> Option<i64> {
        self.packet.as_ref().and_then(|p| p.pts())
    }

    pub fn dts(&self) -> Option<i64> {
        self.packet.as_ref().and_then(|p| p.dts())
    }

    pub fn size(&self) -> usize {
        self.packet.as_ref().map(|p| p.size()).unwrap_or_default()
    }

    pub fn index(&self) -> usize {
        self.packet.as_ref().map(|p| p.stream()).unwrap_or_default()
    }

    pub fn is_key(&self) -> bool {
        self.packet.as_ref().is_some_and(|p| p.is_key())
    }

    pub fn data(&self) -> Bytes {
        self.packet
            .as_ref()
            .and_then(|p| p.data())
            .map(Bytes::copy_from_slice)
            .unwrap_or_default()
    }

    /// Drops the payload. Releasing twice is a no-op.
    pub fn release(&mut self) {
        self.packet = None;
    }
}

impl From<Packet> for CompressedUnit {
    fn from(packet: Packet) -> Self {
        Self {
            packet: Some(packet),
        }
    }
}

impl std::fmt::Debug for CompressedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedUnit")
            .field("size", &self.size())
            .field("pts", &self.pts())
            .field("key", &self.is_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_payload_and_release() {
        let mut unit = CompressedUnit::from_bytes(&[0, 0, 1, 0x65]);
        assert!(!unit.is_empty());
        assert_eq!(unit.size(), 4);
        assert_eq!(&unit.data()[..], &[0, 0, 1, 0x65]);

        unit.release();
        assert!(unit.is_empty());
        assert_eq!(unit.size(), 0);
        assert!(unit.data().is_empty());
        unit.release();
        assert!(unit.is_empty());
    }
}
