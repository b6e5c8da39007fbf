pub mod jpeg_decoder;
