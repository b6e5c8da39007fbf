use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("frame is empty")]
    Empty,
    #[error("could not decode frame: {0}")]
    Image(#[from] image::ImageError),
}

/// Turns one encoded image from the decoder stream into an RGB raster.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, encoded: &[u8], sequence: u64) -> Result<Frame, DecodeError>;
}
