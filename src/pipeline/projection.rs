//! Maps ROI-normalized landmarks back to source-image pixels.

use super::common::{FRAME_SIZE, LetterboxInfo};
use crate::types::{Landmark, NUM_LANDMARKS, NormalizedRect};

/// Row-major homogeneous transform.
pub type Mat4 = [[f32; 4]; 4];

/// Sends ROI-normalized coordinates to frame-normalized coordinates for an
/// oriented sub-rectangle of a `frame_w` x `frame_h` frame.
pub fn rotated_subrect_to_rect_matrix(rect: &NormalizedRect, frame_w: u32, frame_h: u32) -> Mat4 {
    let (fw, fh) = (frame_w as f32, frame_h as f32);
    let a = rect.width * fw;
    let b = rect.height * fh;
    let c = rect.rotation.cos();
    let d = rect.rotation.sin();
    let e = rect.x_center * fw;
    let f = rect.y_center * fh;
    let g = 1.0 / fw;
    let h = 1.0 / fh;

    [
        [a * c * g, -b * d * g, 0.0, (-0.5 * a * c + 0.5 * b * d + e) * g],
        [a * d * h, b * c * h, 0.0, (-0.5 * b * c - 0.5 * a * d + f) * h],
        [0.0, 0.0, a * g, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Length of the image of the unit segment (0,0)->(1,0).
pub fn z_scale(m: &Mat4) -> f32 {
    let (ax, ay) = (m[0][3], m[1][3]);
    let (bx, by) = (m[0][0] + m[0][3], m[1][0] + m[1][3]);
    (bx - ax).hypot(by - ay)
}

fn apply_xy(m: &Mat4, x: f32, y: f32) -> (f32, f32) {
    (
        x * m[0][0] + y * m[0][1] + m[0][3],
        x * m[1][0] + y * m[1][1] + m[1][3],
    )
}

/// Projects ROI-normalized landmarks through `rect` (on the square working
/// frame) and the letterbox into source pixels clamped to the image. `z`
/// is scaled by [`z_scale`]; confidences pass through.
pub fn project_landmarks(
    landmarks: &[Landmark; NUM_LANDMARKS],
    rect: &NormalizedRect,
    letterbox: &LetterboxInfo,
) -> [Landmark; NUM_LANDMARKS] {
    let m = rotated_subrect_to_rect_matrix(rect, FRAME_SIZE, FRAME_SIZE);
    let zs = z_scale(&m);
    let frame = FRAME_SIZE as f32;

    landmarks.map(|lm| {
        let (nx, ny) = apply_xy(&m, lm.x, lm.y);
        let (x, y) = letterbox.to_source(nx * frame, ny * frame);
        Landmark::new(x, y, lm.z * zs, lm.confidence)
    })
}
