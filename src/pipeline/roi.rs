use std::f32::consts::PI;

use anyhow::{Result, anyhow};

use crate::types::{Frame, NormalizedRect};

/// Wraps an angle into (-π, π]; a half turn comes back as +π.
pub fn normalize_radians(angle: f32) -> f32 {
    let wrapped = angle - 2.0 * PI * ((angle + PI) / (2.0 * PI)).floor();
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}

/// Square rect centred on `mid_hip` whose half side is the distance to
/// `scale_point`, rotated so the hip→scale-point direction points up.
pub fn rect_from_alignment_points(mid_hip: (f32, f32), scale_point: (f32, f32)) -> NormalizedRect {
    let (x0, y0) = mid_hip;
    let (x1, y1) = scale_point;
    let side = 2.0 * (x1 - x0).hypot(y1 - y0);
    let target_angle = PI * 0.5;
    let rotation = normalize_radians(target_angle - (-(y1 - y0)).atan2(x1 - x0));
    NormalizedRect {
        x_center: x0,
        y_center: y0,
        width: side,
        height: side,
        rotation,
    }
}

#[derive(Clone, Debug)]
pub struct RectTransform {
    pub scale_x: f32,
    pub scale_y: f32,
    pub square_long: bool,
}

impl Default for RectTransform {
    fn default() -> Self {
        Self {
            scale_x: 1.25,
            scale_y: 1.25,
            square_long: true,
        }
    }
}

pub fn transform_rect(
    rect: &NormalizedRect,
    frame_w: u32,
    frame_h: u32,
    transform: &RectTransform,
) -> NormalizedRect {
    let (fw, fh) = (frame_w as f32, frame_h as f32);
    let mut width = rect.width;
    let mut height = rect.height;
    if transform.square_long {
        let long_side = (width * fw).max(height * fh);
        width = long_side / fw;
        height = long_side / fh;
    }
    NormalizedRect {
        width: width * transform.scale_x,
        height: height * transform.scale_y,
        ..*rect
    }
}

pub type Affine = [[f32; 3]; 2];

/// Sampling transform from the working frame onto an `S×S` crop.
#[derive(Clone, Debug, PartialEq)]
pub struct RoiAffine {
    /// Frame pixels → crop pixels.
    pub matrix: Affine,
    /// Top-left, top-right and bottom-left corners of the rect in frame pixels.
    pub source: [(f32, f32); 3],
    pub output_size: u32,
}

impl RoiAffine {
    pub fn from_rect(rect: &NormalizedRect, frame_w: u32, frame_h: u32, output_size: u32) -> Result<Self> {
        let cx = rect.x_center * frame_w as f32;
        let cy = rect.y_center * frame_h as f32;
        let w = rect.width * frame_w as f32;
        let h = rect.height * frame_h as f32;
        let (sin, cos) = rect.rotation.sin_cos();

        let corner = |dx: f32, dy: f32| (cx + cos * dx - sin * dy, cy + sin * dx + cos * dy);
        let source = [
            corner(-0.5 * w, -0.5 * h),
            corner(0.5 * w, -0.5 * h),
            corner(-0.5 * w, 0.5 * h),
        ];
        let last = output_size.saturating_sub(1) as f32;
        let destination = [(0.0, 0.0), (last, 0.0), (0.0, last)];
        let matrix = affine_from_triangles(&source, &destination)
            .ok_or_else(|| anyhow!("degenerate roi {rect:?}, cannot build affine crop"))?;

        Ok(Self {
            matrix,
            source,
            output_size,
        })
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        apply_affine(&self.matrix, x, y)
    }
}

pub fn apply_affine(m: &Affine, x: f32, y: f32) -> (f32, f32) {
    (
        m[0][0] * x + m[0][1] * y + m[0][2],
        m[1][0] * x + m[1][1] * y + m[1][2],
    )
}

/// Unique affine map taking each `src[i]` to `dst[i]`; `None` for collinear points.
pub fn affine_from_triangles(src: &[(f32, f32); 3], dst: &[(f32, f32); 3]) -> Option<Affine> {
    let [(x0, y0), (x1, y1), (x2, y2)] = src.map(|(x, y)| (x as f64, y as f64));
    let det = x0 * (y1 - y2) - y0 * (x1 - x2) + (x1 * y2 - x2 * y1);
    if det.abs() < 1e-12 {
        return None;
    }

    // Cramer's rule on [x y 1] · [a b c]ᵀ = u, once per output axis.
    let solve = |u0: f64, u1: f64, u2: f64| -> [f32; 3] {
        let a = u0 * (y1 - y2) - y0 * (u1 - u2) + (u1 * y2 - u2 * y1);
        let b = x0 * (u1 - u2) - u0 * (x1 - x2) + (x1 * u2 - x2 * u1);
        let c = x0 * (y1 * u2 - y2 * u1) - y0 * (x1 * u2 - x2 * u1) + u0 * (x1 * y2 - x2 * y1);
        [(a / det) as f32, (b / det) as f32, (c / det) as f32]
    };
    let [(u0, v0), (u1, v1), (u2, v2)] = dst.map(|(x, y)| (x as f64, y as f64));
    Some([solve(u0, u1, u2), solve(v0, v1, v2)])
}

pub fn invert_affine(m: &Affine) -> Option<Affine> {
    let [[a, b, c], [d, e, f]] = m.map(|row| row.map(|v| v as f64));
    let det = a * e - b * d;
    if det.abs() < 1e-12 {
        return None;
    }
    Some([
        [
            (e / det) as f32,
            (-b / det) as f32,
            ((b * f - c * e) / det) as f32,
        ],
        [
            (-d / det) as f32,
            (a / det) as f32,
            ((c * d - a * f) / det) as f32,
        ],
    ])
}

/// Resamples `frame` through `affine` into a square crop, bilinear with
/// edge-replicated borders.
pub fn warp_affine(frame: &Frame, affine: &RoiAffine) -> Result<Frame> {
    if frame.width == 0 || frame.height == 0 {
        return Err(anyhow!("cannot crop from an empty frame"));
    }
    let inverse = invert_affine(&affine.matrix)
        .ok_or_else(|| anyhow!("roi affine is not invertible"))?;
    let size = affine.output_size as usize;
    let mut rgb = Vec::with_capacity(size * size * 3);
    for y in 0..size {
        for x in 0..size {
            let (sx, sy) = apply_affine(&inverse, x as f32, y as f32);
            rgb.extend_from_slice(&sample_rgb(frame, sx, sy));
        }
    }
    Ok(Frame {
        rgb,
        width: affine.output_size,
        height: affine.output_size,
    })
}

fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [u8; 3] {
    if x.is_nan() || y.is_nan() {
        return [0, 0, 0];
    }
    let max_x = frame.width as i64 - 1;
    let max_y = frame.height as i64 - 1;
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let fetch = |cx: i64, cy: i64| -> [f32; 3] {
        let ix = cx.clamp(0, max_x) as u32;
        let iy = cy.clamp(0, max_y) as u32;
        frame.pixel(ix, iy).map(f32::from)
    };
    let (ix, iy) = (x0 as i64, y0 as i64);
    let c00 = fetch(ix, iy);
    let c10 = fetch(ix + 1, iy);
    let c01 = fetch(ix, iy + 1);
    let c11 = fetch(ix + 1, iy + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut out = [0u8; 3];
    for ch in 0..3 {
        let top = lerp(c00[ch], c10[ch], fx);
        let bottom = lerp(c01[ch], c11[ch], fx);
        out[ch] = lerp(top, bottom, fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32), tol: f32) -> bool {
        (a.0 - b.0).abs() < tol && (a.1 - b.1).abs() < tol
    }

    #[test]
    fn normalize_radians_wraps() {
        assert!((normalize_radians(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-5);
        assert!((normalize_radians(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-5);
        assert_eq!(normalize_radians(0.25), 0.25);
        for k in -6..6 {
            let a = normalize_radians(k as f32 * 1.7);
            assert!(a > -PI && a <= PI, "{a}");
        }
    }

    #[test]
    fn half_turn_normalizes_to_positive_pi() {
        assert_eq!(normalize_radians(PI), PI);
        assert_eq!(normalize_radians(-PI), PI);
        // body upside down: scale point below the hip
        let rect = rect_from_alignment_points((0.5, 0.3), (0.5, 0.6));
        assert!((rect.rotation - PI).abs() < 1e-5, "{}", rect.rotation);
    }

    #[test]
    fn upright_body_has_no_rotation() {
        let rect = rect_from_alignment_points((0.5, 0.6), (0.5, 0.3));
        assert!(rect.rotation.abs() < 1e-6);
        assert!((rect.width - 0.6).abs() < 1e-6);
        assert_eq!(rect.width, rect.height);
        assert_eq!((rect.x_center, rect.y_center), (0.5, 0.6));
    }

    #[test]
    fn body_lying_right_is_quarter_turn() {
        let rect = rect_from_alignment_points((0.3, 0.5), (0.6, 0.5));
        assert!((rect.rotation - PI / 2.0).abs() < 1e-6);
        let rect = rect_from_alignment_points((0.3, 0.5), (0.0, 0.5));
        assert!((rect.rotation + PI / 2.0).abs() < 1e-6);
    }

    #[test]
    fn rect_transform_scales_area() {
        let rect = rect_from_alignment_points((0.5, 0.5), (0.5, 0.3));
        let scaled = transform_rect(&rect, 256, 256, &RectTransform::default());
        let before = rect.width * rect.height;
        let after = scaled.width * scaled.height;
        assert!((after / before - 1.5625).abs() < 1e-5);
        assert_eq!(scaled.rotation, rect.rotation);
        assert_eq!(scaled.x_center, rect.x_center);
    }

    #[test]
    fn square_long_uses_pixel_long_side() {
        let rect = NormalizedRect {
            x_center: 0.5,
            y_center: 0.5,
            width: 0.5,
            height: 0.25,
            rotation: 0.0,
        };
        let transform = RectTransform {
            scale_x: 1.0,
            scale_y: 1.0,
            square_long: true,
        };
        // 0.5 * 100px vs 0.25 * 400px: the long side is 100px
        let squared = transform_rect(&rect, 100, 400, &transform);
        assert!((squared.width - 1.0).abs() < 1e-6);
        assert!((squared.height - 0.25).abs() < 1e-6);
    }

    #[test]
    fn affine_maps_corners_onto_crop() {
        let rect = NormalizedRect {
            x_center: 0.45,
            y_center: 0.55,
            width: 0.5,
            height: 0.5,
            rotation: 0.7,
        };
        let affine = RoiAffine::from_rect(&rect, 256, 256, 256).unwrap();
        let targets = [(0.0, 0.0), (255.0, 0.0), (0.0, 255.0)];
        for (src, dst) in affine.source.iter().zip(targets) {
            assert!(close(affine.apply(src.0, src.1), dst, 1e-2));
        }
        let centre = affine.apply(0.45 * 256.0, 0.55 * 256.0);
        assert!(close(centre, (127.5, 127.5), 1e-2));

        let inverse = invert_affine(&affine.matrix).unwrap();
        let back = apply_affine(&inverse, 255.0, 0.0);
        assert!(close(back, affine.source[1], 1e-2));
    }

    #[test]
    fn axis_aligned_corners() {
        let rect = NormalizedRect {
            x_center: 0.5,
            y_center: 0.5,
            width: 0.5,
            height: 0.5,
            rotation: 0.0,
        };
        let affine = RoiAffine::from_rect(&rect, 256, 256, 256).unwrap();
        assert!(close(affine.source[0], (64.0, 64.0), 1e-4));
        assert!(close(affine.source[1], (192.0, 64.0), 1e-4));
        assert!(close(affine.source[2], (64.0, 192.0), 1e-4));
    }

    #[test]
    fn degenerate_rect_is_rejected() {
        let rect = NormalizedRect {
            x_center: 0.5,
            y_center: 0.5,
            width: 0.0,
            height: 0.0,
            rotation: 0.0,
        };
        assert!(RoiAffine::from_rect(&rect, 256, 256, 256).is_err());
    }

    #[test]
    fn half_turn_crop_flips_sides_and_replicates_edges() {
        let mut frame = Frame::filled(256, 256, [255, 0, 0]);
        for y in 0..256usize {
            for x in 128..256usize {
                let idx = (y * 256 + x) * 3;
                frame.rgb[idx..idx + 3].copy_from_slice(&[0, 0, 255]);
            }
        }
        let rect = NormalizedRect {
            x_center: 0.5,
            y_center: 0.5,
            width: 1.0,
            height: 1.0,
            rotation: PI,
        };
        let affine = RoiAffine::from_rect(&rect, 256, 256, 256).unwrap();
        let crop = warp_affine(&frame, &affine).unwrap();
        assert_eq!((crop.width, crop.height), (256, 256));
        assert_eq!(crop.pixel(0, 0), [0, 0, 255]);
        assert_eq!(crop.pixel(20, 200), [0, 0, 255]);
        assert_eq!(crop.pixel(240, 30), [255, 0, 0]);

        // a rect twice the frame samples mostly outside; edges replicate
        let wide = NormalizedRect {
            width: 2.0,
            height: 2.0,
            rotation: 0.0,
            ..rect
        };
        let affine = RoiAffine::from_rect(&wide, 256, 256, 64).unwrap();
        let crop = warp_affine(&frame, &affine).unwrap();
        assert_eq!(crop.pixel(0, 0), [255, 0, 0]);
        assert_eq!(crop.pixel(63, 63), [0, 0, 255]);
    }
}
