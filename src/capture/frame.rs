use bytes::Bytes;
use std::time::Instant;

/// Bytes per BGR24 pixel, the layout the virtual camera expects
pub const BYTES_PER_PIXEL: u32 = 3;

/// Decoded frame ready for publishing
///
/// Pixel data is owned and immutable; producers deep-copy out of any
/// decoder-owned buffer before building one.
#[derive(Clone)]
pub struct Frame {
    /// BGR24 rows, `stride` bytes apart
    pub data: Bytes,

    pub width: u32,
    pub height: u32,

    /// Row pitch in bytes, at least `width * 3`
    pub stride: u32,

    /// Decode order, assigned by the producer
    pub sequence: u64,

    /// Decode timestamp for latency tracking
    pub timestamp: Instant,
}

impl Frame {
    /// Build a frame from tightly packed BGR24 rows
    pub fn packed(data: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self::with_stride(data, width, height, width * BYTES_PER_PIXEL)
    }

    pub fn with_stride(data: impl Into<Bytes>, width: u32, height: u32, stride: u32) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            stride,
            sequence: 0,
            timestamp: Instant::now(),
        }
    }

    /// Bytes of pixel data in one row, excluding padding
    pub fn row_bytes(&self) -> usize {
        (self.width * BYTES_PER_PIXEL) as usize
    }

    /// True when the buffer holds `height` rows of `stride` bytes
    pub fn is_complete(&self) -> bool {
        self.stride as usize >= self.row_bytes()
            && self.data.len() >= self.stride as usize * self.height as usize
    }

    /// Iterate the pixel rows without padding
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let row = self.row_bytes();
        self.data
            .chunks(self.stride as usize)
            .take(self.height as usize)
            .map(move |chunk| &chunk[..row.min(chunk.len())])
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_skip_padding() {
        // 2x2 frame with 2 bytes of padding per row
        let data: Vec<u8> = vec![1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
        let frame = Frame::with_stride(data, 2, 2, 8);
        assert!(frame.is_complete());

        let rows: Vec<&[u8]> = frame.rows().collect();
        assert_eq!(rows, vec![&[1, 2, 3, 4, 5, 6][..], &[7, 8, 9, 10, 11, 12][..]]);
    }

    #[test]
    fn short_buffer_is_incomplete() {
        let frame = Frame::packed(vec![0u8; 10], 2, 2);
        assert!(!frame.is_complete());
    }
}
