//! Synthetic frames shared by the unit tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::image_impl::Frame;

/// Gray frame with filled disks of value `fg` on a `bg` background.
pub fn disk_frame(width: u32, height: u32, centers: &[(f32, f32)], radius: f32, fg: u8, bg: u8) -> Frame {
    let mut data = vec![bg; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let inside = centers.iter().any(|&(cx, cy)| {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                dx * dx + dy * dy <= radius * radius
            });
            if inside {
                data[(y * width + x) as usize] = fg;
            }
        }
    }
    Frame::from_gray8(width, height, data).unwrap()
}

/// Gray frame of `base ± amplitude` with reproducible uniform noise.
pub fn noise_frame(width: u32, height: u32, base: u8, amplitude: u8, seed: u64) -> Frame {
    let mut rng = StdRng::seed_from_u64(seed);
    let a = amplitude as i32;
    let data = (0..width * height)
        .map(|_| (base as i32 + rng.gen_range(-a..=a)).clamp(0, 255) as u8)
        .collect();
    Frame::from_gray8(width, height, data).unwrap()
}
