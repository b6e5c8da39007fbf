use ndarray::ArrayView3;

/// A decoded stream frame: contiguous RGB bytes in row-major order.
///
/// `sequence` is the frame number assigned by the session when the encoded
/// image was demuxed, so results can be reported against it.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    sequence: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, sequence: u64) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            sequence,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// `(height, width, channels)` view over the pixel buffer.
    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(
            (
                self.height as usize,
                self.width as usize,
                self.channels as usize,
            ),
            &self.data,
        )
        .expect("Frame data length must match dimensions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let frame = Frame::new(vec![7u8; 12], 2, 2, 3, 41);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.sequence(), 41);
        assert!(frame.data().iter().all(|&b| b == 7));
    }

    #[test]
    #[should_panic(expected = "data length must equal width * height * channels")]
    fn test_mismatched_data_length_panics_in_debug() {
        Frame::new(vec![0u8; 10], 2, 2, 3, 0);
    }

    #[test]
    fn test_ndarray_is_row_major_hwc() {
        // 3x1 RGB, middle pixel green
        let data = vec![0, 0, 0, 0, 255, 0, 0, 0, 0];
        let frame = Frame::new(data, 3, 1, 3, 0);
        let arr = frame.as_ndarray();
        assert_eq!(arr.shape(), &[1, 3, 3]);
        assert_eq!(arr[[0, 1, 1]], 255);
        assert_eq!(arr[[0, 1, 0]], 0);
    }
}
