use image::ImageFormat;

use crate::shared::frame::Frame;
use crate::video::domain::image_decoder::{DecodeError, ImageDecoder};

/// Decodes the MJPEG frames ffmpeg writes to its image pipe.
#[derive(Clone, Copy, Debug, Default)]
pub struct JpegDecoder;

impl ImageDecoder for JpegDecoder {
    fn decode(&self, encoded: &[u8], sequence: u64) -> Result<Frame, DecodeError> {
        if encoded.is_empty() {
            return Err(DecodeError::Empty);
        }
        let rgb = image::load_from_memory_with_format(encoded, ImageFormat::Jpeg)?.into_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Frame::new(rgb.into_raw(), width, height, 3, sequence))
    }
}
