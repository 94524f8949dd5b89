use common::span;
use image::{DynamicImage, ImageFormat, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("uploaded file is empty")]
    Empty,

    #[error("cannot identify image file")]
    UnknownFormat,

    #[error("failed to decode {format:?} image: {source}")]
    Image {
        format: ImageFormat,
        #[source]
        source: image::ImageError,
    },
}

/// Decode uploaded bytes into an 8-bit three-channel RGB image.
///
/// The container format is sniffed from the bytes, never taken from the
/// filename or content type.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    let _s = span!("decode_image");

    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let format = image::guess_format(bytes).map_err(|_| DecodeError::UnknownFormat)?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|source| DecodeError::Image { format, source })?;

    tracing::debug!(
        format = ?format,
        color = ?decoded.color(),
        width = decoded.width(),
        height = decoded.height(),
        "Decoded upload"
    );

    Ok(into_rgb(decoded))
}

/// Force a decoded image into RGB8, converting any other color type.
pub fn into_rgb(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => {
            tracing::trace!(color = ?other.color(), "Converting to RGB8");
            other.to_rgb8()
        }
    }
}
