use std::{io, path::Path};

use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use image::ImageReader;
use ndarray::Array4;
use rayon::prelude::*;

use crate::error::PoseError;
use crate::types::Frame;

/// Side of the square working frame both stages operate on.
pub const FRAME_SIZE: u32 = 256;
pub const DETECTOR_INPUT_SIZE: u32 = 224;
pub const LANDMARK_INPUT_SIZE: u32 = 256;

/// Maps working-frame pixels back to the source image.
#[derive(Clone, Debug, PartialEq)]
pub struct LetterboxInfo {
    /// Source pixels per working-frame pixel.
    pub scale: f32,
    /// Padding in source pixels.
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl LetterboxInfo {
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        let sx = x * self.scale - self.pad_x;
        let sy = y * self.scale - self.pad_y;
        (
            sx.clamp(0.0, self.orig_w.saturating_sub(1) as f32),
            sy.clamp(0.0, self.orig_h.saturating_sub(1) as f32),
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelRange {
    /// `v / 255`
    ZeroToOne,
    /// `(v / 255 - 0.5) * 2`
    MinusOneToOne,
}

pub fn load_frame(path: &Path) -> std::result::Result<Frame, PoseError> {
    let reader = ImageReader::open(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => PoseError::ImageNotFound(path.to_path_buf()),
        _ => PoseError::InvalidImageFormat {
            path: path.to_path_buf(),
            source: image::ImageError::IoError(err),
        },
    })?;
    let decoded = reader
        .with_guessed_format()
        .map_err(|err| PoseError::InvalidImageFormat {
            path: path.to_path_buf(),
            source: image::ImageError::IoError(err),
        })?
        .decode()
        .map_err(|source| PoseError::InvalidImageFormat {
            path: path.to_path_buf(),
            source,
        })?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(Frame {
        rgb: rgb.into_raw(),
        width,
        height,
    })
}

/// Pads the frame to a centered square on its longer side, then resizes it
/// to `target_size`.
pub fn letterbox_frame(frame: &Frame, target_size: u32) -> Result<(Frame, LetterboxInfo)> {
    if frame.width == 0 || frame.height == 0 {
        return Err(anyhow!("cannot letterbox an empty frame"));
    }
    let side = frame.width.max(frame.height);
    let pad_x = (side - frame.width) / 2;
    let pad_y = (side - frame.height) / 2;

    let mut square = vec![0u8; side as usize * side as usize * 3];
    let dst_stride = side as usize * 3;
    let src_stride = frame.width as usize * 3;
    for row in 0..frame.height as usize {
        let dst_offset = (pad_y as usize + row) * dst_stride + pad_x as usize * 3;
        let src_offset = row * src_stride;
        square[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&frame.rgb[src_offset..src_offset + src_stride]);
    }

    let square = Frame {
        rgb: square,
        width: side,
        height: side,
    };
    let resized = resize_frame(&square, target_size, target_size)?;

    let letterbox = LetterboxInfo {
        scale: side as f32 / target_size as f32,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: frame.width,
        orig_h: frame.height,
    };
    Ok((resized, letterbox))
}

pub fn resize_frame(frame: &Frame, width: u32, height: u32) -> Result<Frame> {
    if frame.width == width && frame.height == height {
        return Ok(frame.clone());
    }
    let src_image =
        fir::images::Image::from_vec_u8(frame.width, frame.height, frame.rgb.clone(), fir::PixelType::U8x3)?;
    let mut dst_image = fir::images::Image::new(width, height, fir::PixelType::U8x3);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    Ok(Frame {
        rgb: dst_image.into_vec(),
        width,
        height,
    })
}

/// NHWC `[1, H, W, 3]` float tensor.
pub fn frame_to_tensor(frame: &Frame, range: PixelRange) -> Result<Array4<f32>> {
    let normalized: Vec<f32> = frame
        .rgb
        .par_chunks_exact(3)
        .flat_map_iter(|px| px.iter().map(move |&v| normalize_channel(v, range)))
        .collect();
    Array4::<f32>::from_shape_vec(
        (1, frame.height as usize, frame.width as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}

fn normalize_channel(v: u8, range: PixelRange) -> f32 {
    let unit = v as f32 / 255.0;
    match range {
        PixelRange::ZeroToOne => unit,
        PixelRange::MinusOneToOne => (unit - 0.5) * 2.0,
    }
}

/// Logistic function with the logit clipped to [-80, 80].
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x.clamp(-80.0, 80.0)).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_pads_the_short_axis() {
        let frame = Frame::filled(512, 256, [200, 100, 50]);
        let (boxed, info) = letterbox_frame(&frame, FRAME_SIZE).unwrap();

        assert_eq!((boxed.width, boxed.height), (256, 256));
        assert_eq!(info.scale, 2.0);
        assert_eq!((info.pad_x, info.pad_y), (0.0, 128.0));
        // top band is padding, the middle holds the image
        assert_eq!(boxed.pixel(128, 10), [0, 0, 0]);
        assert_eq!(boxed.pixel(128, 128), [200, 100, 50]);
    }

    #[test]
    fn letterbox_inverse_maps_to_source_pixels() {
        let info = LetterboxInfo {
            scale: 2.0,
            pad_x: 0.0,
            pad_y: 128.0,
            orig_w: 512,
            orig_h: 256,
        };
        assert_eq!(info.to_source(128.0, 128.0), (256.0, 128.0));
        // clamped into the image
        assert_eq!(info.to_source(300.0, 10.0), (511.0, 0.0));
    }

    #[test]
    fn tensor_ranges() {
        let frame = Frame::new(vec![0, 255, 51], 1, 1).unwrap();
        let unit = frame_to_tensor(&frame, PixelRange::ZeroToOne).unwrap();
        assert_eq!(unit.shape(), &[1, 1, 1, 3]);
        assert!((unit[[0, 0, 0, 2]] - 0.2).abs() < 1e-6);

        let signed = frame_to_tensor(&frame, PixelRange::MinusOneToOne).unwrap();
        assert!((signed[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((signed[[0, 0, 0, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sigmoid_is_stable_for_large_logits() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(1e6).is_finite());
        assert!(sigmoid(-1e6) >= 0.0);
        assert!((sigmoid(1e6) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn missing_image_is_distinguished() {
        let err = load_frame(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, PoseError::ImageNotFound(_)));
    }

    #[test]
    fn garbage_image_is_invalid_format() {
        let path = std::env::temp_dir().join(format!("pose-match-garbage-{}.png", std::process::id()));
        std::fs::write(&path, b"not an image at all").unwrap();
        let err = load_frame(&path).unwrap_err();
        assert!(matches!(err, PoseError::InvalidImageFormat { .. }));
        std::fs::remove_file(&path).unwrap();
    }
}
