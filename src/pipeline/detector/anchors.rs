//! SSD prior grid for the BlazePose person detector.

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Anchor {
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Debug)]
pub struct AnchorOptions {
    pub num_layers: usize,
    pub min_scale: f32,
    pub max_scale: f32,
    pub input_size_height: u32,
    pub input_size_width: u32,
    pub anchor_offset_x: f32,
    pub anchor_offset_y: f32,
    pub strides: Vec<u32>,
    pub aspect_ratios: Vec<f32>,
    pub interpolated_scale_aspect_ratio: f32,
    pub fixed_anchor_size: bool,
}

impl Default for AnchorOptions {
    fn default() -> Self {
        Self {
            num_layers: 5,
            min_scale: 0.148_437_5,
            max_scale: 0.75,
            input_size_height: 224,
            input_size_width: 224,
            anchor_offset_x: 0.5,
            anchor_offset_y: 0.5,
            strides: vec![8, 16, 32, 32, 32],
            aspect_ratios: vec![1.0],
            interpolated_scale_aspect_ratio: 1.0,
            fixed_anchor_size: true,
        }
    }
}

pub const NUM_POSE_ANCHORS: usize = 2254;

fn calc_scale(min_scale: f32, max_scale: f32, stride_index: usize, num_strides: usize) -> f32 {
    if num_strides == 1 {
        return (min_scale + max_scale) * 0.5;
    }
    min_scale + (max_scale - min_scale) * stride_index as f32 / (num_strides as f32 - 1.0)
}

pub fn generate_anchors(options: &AnchorOptions) -> Vec<Anchor> {
    let strides_size = options.strides.len();
    if options.num_layers != strides_size {
        log::warn!(
            "anchor options list {} layers but {} strides; using strides",
            options.num_layers,
            strides_size
        );
    }

    let mut anchors = Vec::with_capacity(NUM_POSE_ANCHORS);
    let mut layer_id = 0;
    while layer_id < strides_size {
        let mut anchor_sizes: Vec<(f32, f32)> = Vec::new();

        // Layers sharing a stride share one feature map.
        let mut last_same = layer_id;
        while last_same < strides_size && options.strides[last_same] == options.strides[layer_id] {
            let scale = calc_scale(options.min_scale, options.max_scale, last_same, strides_size);
            for &ratio in &options.aspect_ratios {
                let r = ratio.sqrt();
                anchor_sizes.push((scale * r, scale / r));
            }
            if options.interpolated_scale_aspect_ratio > 0.0 {
                let scale_next = if last_same == strides_size - 1 {
                    1.0
                } else {
                    calc_scale(options.min_scale, options.max_scale, last_same + 1, strides_size)
                };
                let interpolated = (scale * scale_next).sqrt();
                let r = options.interpolated_scale_aspect_ratio.sqrt();
                anchor_sizes.push((interpolated * r, interpolated / r));
            }
            last_same += 1;
        }

        let stride = options.strides[layer_id];
        let fm_h = options.input_size_height.div_ceil(stride);
        let fm_w = options.input_size_width.div_ceil(stride);
        for y in 0..fm_h {
            for x in 0..fm_w {
                let x_center = (x as f32 + options.anchor_offset_x) / fm_w as f32;
                let y_center = (y as f32 + options.anchor_offset_y) / fm_h as f32;
                for &(w, h) in &anchor_sizes {
                    let (width, height) = if options.fixed_anchor_size {
                        (1.0, 1.0)
                    } else {
                        (w, h)
                    };
                    anchors.push(Anchor {
                        x_center,
                        y_center,
                        width,
                        height,
                    });
                }
            }
        }
        layer_id = last_same;
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_yields_2254_unit_anchors() {
        let anchors = generate_anchors(&AnchorOptions::default());
        assert_eq!(anchors.len(), NUM_POSE_ANCHORS);
        assert!(anchors.iter().all(|a| a.width == 1.0 && a.height == 1.0));
        assert!(anchors.iter().all(|a| {
            (0.0..=1.0).contains(&a.x_center) && (0.0..=1.0).contains(&a.y_center)
        }));
    }

    #[test]
    fn per_layer_counts() {
        let anchors = generate_anchors(&AnchorOptions::default());
        // stride 8: 28x28 cells x 2, stride 16: 14x14 x 2, stride 32 (x3 layers): 7x7 x 6
        let (s8, rest) = anchors.split_at(28 * 28 * 2);
        let (s16, s32) = rest.split_at(14 * 14 * 2);
        assert_eq!(s8.len(), 1568);
        assert_eq!(s16.len(), 392);
        assert_eq!(s32.len(), 294);

        assert_eq!(s8[0].x_center, 0.5 / 28.0);
        assert_eq!(s8[0], s8[1]);
        assert_eq!(s8[2].x_center, 1.5 / 28.0);
        assert_eq!(s16[0].y_center, 0.5 / 14.0);
        assert_eq!(s32[5].x_center, 0.5 / 7.0);
        assert_eq!(s32[6].x_center, 1.5 / 7.0);
        let last = anchors.last().unwrap();
        assert_eq!((last.x_center, last.y_center), (6.5 / 7.0, 6.5 / 7.0));
    }

    #[test]
    fn variable_size_anchors_follow_scales() {
        let options = AnchorOptions {
            fixed_anchor_size: false,
            ..AnchorOptions::default()
        };
        let anchors = generate_anchors(&options);
        assert_eq!(anchors.len(), NUM_POSE_ANCHORS);
        assert!((anchors[0].width - 0.148_437_5).abs() < 1e-6);
        let next = calc_scale(0.148_437_5, 0.75, 1, 5);
        assert!((anchors[1].width - (0.148_437_5f32 * next).sqrt()).abs() < 1e-6);
    }
}
