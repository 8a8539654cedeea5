use crate::types::{Frame, LandmarkName, Pose};

use LandmarkName::*;

pub const CONNECTIONS: &[(LandmarkName, LandmarkName)] = &[
    (LeftShoulder, RightShoulder),
    (LeftShoulder, LeftElbow),
    (RightShoulder, RightElbow),
    (LeftElbow, LeftWrist),
    (RightElbow, RightWrist),
    (LeftShoulder, LeftHip),
    (RightShoulder, RightHip),
    (LeftHip, RightHip),
    (LeftHip, LeftKnee),
    (RightHip, RightKnee),
    (LeftKnee, LeftAnkle),
    (RightKnee, RightAnkle),
];

pub const SKELETON_LINE_THICKNESS: i32 = 3;
const POINT_RADIUS: i32 = 4;
/// Landmarks below this confidence are not drawn.
pub const DRAW_CONFIDENCE: f32 = 0.3;

const LINE_COLOR: [u8; 3] = [56, 189, 248];
const POINT_COLOR: [u8; 3] = [248, 113, 113];

/// Draws bones and landmark dots in source-pixel coordinates onto `frame`.
pub fn draw_pose(frame: &mut Frame, pose: &Pose) {
    if pose.is_empty() {
        return;
    }
    let visible = |name: LandmarkName| {
        pose.get(name)
            .filter(|lm| lm.confidence >= DRAW_CONFIDENCE)
            .map(|lm| (lm.x, lm.y))
    };

    for &(a, b) in CONNECTIONS {
        if let (Some(pa), Some(pb)) = (visible(a), visible(b)) {
            draw_line(frame, pa, pb, LINE_COLOR, SKELETON_LINE_THICKNESS);
        }
    }
    for (name, _) in pose.named() {
        if let Some((x, y)) = visible(name) {
            draw_circle(frame, (x as i32, y as i32), POINT_RADIUS, POINT_COLOR);
        }
    }
}

fn draw_line(frame: &mut Frame, p0: (f32, f32), p1: (f32, f32), color: [u8; 3], thickness: i32) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        for ox in -radius..=radius {
            for oy in -radius..=radius {
                if ox.abs() + oy.abs() <= radius {
                    put_pixel_safe(frame, x0 + ox, y0 + oy, color);
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(frame: &mut Frame, center: (i32, i32), radius: i32, color: [u8; 3]) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(frame, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(frame: &mut Frame, x: i32, y: i32, color: [u8; 3]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= frame.width || uy >= frame.height {
        return;
    }
    let idx = (uy as usize * frame.width as usize + ux as usize) * 3;
    if idx + 2 < frame.rgb.len() {
        frame.rgb[idx..idx + 3].copy_from_slice(&color);
    }
}
