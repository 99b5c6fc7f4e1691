use crate::config::{Config, LuminanceWeights};
use crate::errors::Result;
use crate::frame::{FrameBuffer, GrayscaleBuffer};
use crate::kernels::{GaussianKernel, KernelCache};

/// Convert an RGBA frame to grayscale using the configured luminance weights
pub fn to_grayscale(frame: &FrameBuffer, weights: LuminanceWeights) -> GrayscaleBuffer {
    let (wr, wg, wb) = match weights {
        LuminanceWeights::Bt709 => (0.2126, 0.7152, 0.0722),
        LuminanceWeights::Bt601 => (0.299, 0.587, 0.114),
    };

    let width = frame.width();
    let height = frame.height();
    let mut gray = GrayscaleBuffer::new(width, height);

    let pixels = frame.pixels();
    for (i, chunk) in pixels.chunks_exact(4).enumerate() {
        let luma = wr * chunk[0] as f64 + wg * chunk[1] as f64 + wb * chunk[2] as f64;
        gray.data[i] = luma.round().clamp(0.0, 255.0) as u8;
    }

    gray
}

/// Contrast-limited adaptive histogram equalization.
///
/// The frame is split into a `tile_grid` x `tile_grid` grid. Each tile gets a
/// clipped histogram whose excess is redistributed uniformly, and the final
/// value of every pixel is bilinearly interpolated between the lookup tables
/// of the four nearest tiles so tile seams stay invisible.
pub fn equalize_adaptive(gray: &GrayscaleBuffer, tile_grid: u32, clip_limit: f64) -> GrayscaleBuffer {
    let width = gray.width as usize;
    let height = gray.height as usize;

    // A tile must be at least one pixel wide in each axis
    let grid_x = (tile_grid as usize).clamp(1, width);
    let grid_y = (tile_grid as usize).clamp(1, height);

    let mut luts: Vec<[u8; 256]> = Vec::with_capacity(grid_x * grid_y);

    for ty in 0..grid_y {
        let y0 = ty * height / grid_y;
        let y1 = (ty + 1) * height / grid_y;
        for tx in 0..grid_x {
            let x0 = tx * width / grid_x;
            let x1 = (tx + 1) * width / grid_x;

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.data[y * width + x] as usize] += 1;
                }
            }

            let total = ((x1 - x0) * (y1 - y0)) as u32;
            luts.push(build_tile_lut(&hist, total, clip_limit));
        }
    }

    let mut out = GrayscaleBuffer::new(gray.width, gray.height);
    for y in 0..height {
        // Fractional tile coordinate of the pixel center
        let fy = (y as f64 + 0.5) / height as f64 * grid_y as f64 - 0.5;
        let ty0 = fy.floor().clamp(0.0, (grid_y - 1) as f64) as usize;
        let ty1 = (ty0 + 1).min(grid_y - 1);
        let wy = (fy - ty0 as f64).clamp(0.0, 1.0);

        for x in 0..width {
            let fx = (x as f64 + 0.5) / width as f64 * grid_x as f64 - 0.5;
            let tx0 = fx.floor().clamp(0.0, (grid_x - 1) as f64) as usize;
            let tx1 = (tx0 + 1).min(grid_x - 1);
            let wx = (fx - tx0 as f64).clamp(0.0, 1.0);

            let v = gray.data[y * width + x] as usize;
            let v00 = luts[ty0 * grid_x + tx0][v] as f64;
            let v01 = luts[ty0 * grid_x + tx1][v] as f64;
            let v10 = luts[ty1 * grid_x + tx0][v] as f64;
            let v11 = luts[ty1 * grid_x + tx1][v] as f64;

            let top = v00 * (1.0 - wx) + v01 * wx;
            let bottom = v10 * (1.0 - wx) + v11 * wx;
            let value = top * (1.0 - wy) + bottom * wy;
            out.data[y * width + x] = value.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Build one tile's remap table from its clipped histogram
fn build_tile_lut(hist: &[u32; 256], total: u32, clip_limit: f64) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if total == 0 {
        // Degenerate tile, identity mapping
        for (v, entry) in lut.iter_mut().enumerate() {
            *entry = v as u8;
        }
        return lut;
    }

    let limit = (clip_limit * total as f64 / 256.0).max(1.0);

    let mut clipped = [0.0f64; 256];
    let mut excess = 0.0;
    for (bin, count) in hist.iter().enumerate() {
        let count = *count as f64;
        if count > limit {
            excess += count - limit;
            clipped[bin] = limit;
        } else {
            clipped[bin] = count;
        }
    }

    // Spread the clipped mass evenly so a flat tile stays flat after remapping
    let per_bin = excess / 256.0;
    for count in clipped.iter_mut() {
        *count += per_bin;
    }

    let mut cdf = 0.0;
    for (v, entry) in lut.iter_mut().enumerate() {
        cdf += clipped[v];
        *entry = (255.0 * cdf / total as f64).round().clamp(0.0, 255.0) as u8;
    }

    lut
}

/// Separable Gaussian blur with clamped borders
pub fn gaussian_blur(gray: &GrayscaleBuffer, kernel: &GaussianKernel) -> GrayscaleBuffer {
    if kernel.is_identity() {
        return gray.clone();
    }

    let width = gray.width as i32;
    let height = gray.height as i32;
    let radius = kernel.radius;

    // Horizontal pass
    let mut tmp = vec![0.0f64; gray.data.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, tap) in kernel.taps.iter().enumerate() {
                let sx = (x + k as i32 - radius).clamp(0, width - 1);
                acc += tap * gray.data[(y * width + sx) as usize] as f64;
            }
            tmp[(y * width + x) as usize] = acc;
        }
    }

    // Vertical pass
    let mut out = GrayscaleBuffer::new(gray.width, gray.height);
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, tap) in kernel.taps.iter().enumerate() {
                let sy = (y + k as i32 - radius).clamp(0, height - 1);
                acc += tap * tmp[(sy * width + x) as usize];
            }
            out.data[(y * width + x) as usize] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Edge-preserving bilateral filter.
///
/// Spatial closeness and intensity similarity both weight the window average,
/// so flat areas smooth while strong intensity steps survive.
pub fn bilateral_filter(gray: &GrayscaleBuffer, sigma_space: f64, sigma_range: f64) -> GrayscaleBuffer {
    let width = gray.width as i32;
    let height = gray.height as i32;
    let radius = (2.0 * sigma_space).ceil() as i32;

    let space_denom = 2.0 * sigma_space * sigma_space;
    let range_denom = 2.0 * sigma_range * sigma_range;

    // Spatial weights are fixed per offset within the window
    let mut spatial = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d2 = (dx * dx + dy * dy) as f64;
            spatial.push((-d2 / space_denom).exp());
        }
    }

    let mut out = GrayscaleBuffer::new(gray.width, gray.height);
    for y in 0..height {
        for x in 0..width {
            let center = gray.data[(y * width + x) as usize] as f64;
            let mut acc = 0.0;
            let mut norm = 0.0;
            let mut si = 0;
            for dy in -radius..=radius {
                let sy = (y + dy).clamp(0, height - 1);
                for dx in -radius..=radius {
                    let sx = (x + dx).clamp(0, width - 1);
                    let value = gray.data[(sy * width + sx) as usize] as f64;
                    let diff = value - center;
                    let w = spatial[si] * (-(diff * diff) / range_denom).exp();
                    acc += w * value;
                    norm += w;
                    si += 1;
                }
            }
            out.data[(y * width + x) as usize] = (acc / norm).round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Run the full preprocessing chain for a frame
pub fn preprocess(frame: &FrameBuffer, config: &Config, kernels: &KernelCache) -> Result<GrayscaleBuffer> {
    let mut gray = to_grayscale(frame, config.luminance_weights);

    if config.clahe_enabled {
        gray = equalize_adaptive(&gray, config.clahe_tile_grid, config.clahe_clip_limit);
    }

    if config.denoise_sigma > 0.0 {
        let kernel = kernels.gaussian(config.denoise_sigma);
        gray = gaussian_blur(&gray, &kernel);
    }

    if config.bilateral_enabled {
        gray = bilateral_filter(&gray, config.bilateral_sigma_space, config.bilateral_sigma_range);
    }

    Ok(gray)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBuffer;

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> FrameBuffer {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            pixels.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        FrameBuffer::new(width, height, pixels).unwrap()
    }

    #[test]
    fn grayscale_weights_match_standards() {
        let red = solid_frame(2, 2, [255, 0, 0]);
        let bt709 = to_grayscale(&red, LuminanceWeights::Bt709);
        assert_eq!(bt709.data[0], 54); // 0.2126 * 255

        let bt601 = to_grayscale(&red, LuminanceWeights::Bt601);
        assert_eq!(bt601.data[0], 76); // 0.299 * 255

        let green = solid_frame(2, 2, [0, 255, 0]);
        let bt709_green = to_grayscale(&green, LuminanceWeights::Bt709);
        assert_eq!(bt709_green.data[0], 182); // 0.7152 * 255
    }

    #[test]
    fn clahe_keeps_uniform_frame_nearly_unchanged() {
        let mut gray = GrayscaleBuffer::new(64, 64);
        gray.data.fill(128);
        let out = equalize_adaptive(&gray, 8, 2.0);
        for v in out.data {
            assert!((v as i32 - 128).abs() <= 3, "uniform pixel drifted to {}", v);
        }
    }

    #[test]
    fn clahe_expands_low_contrast_pattern() {
        // Checkerboard of two close intensities
        let mut gray = GrayscaleBuffer::new(32, 32);
        for y in 0..32u32 {
            for x in 0..32u32 {
                let v = if (x + y) % 2 == 0 { 90 } else { 110 };
                gray.set(x, y, v);
            }
        }
        let before_spread = 110 - 90;
        let out = equalize_adaptive(&gray, 1, 50.0);
        let min = *out.data.iter().min().unwrap() as i32;
        let max = *out.data.iter().max().unwrap() as i32;
        assert!(
            max - min > before_spread,
            "expected spread above {}, got {}",
            before_spread,
            max - min
        );
    }

    #[test]
    fn gaussian_blur_preserves_flat_regions() {
        let mut gray = GrayscaleBuffer::new(16, 16);
        gray.data.fill(77);
        let kernel = GaussianKernel::new(1.4);
        let out = gaussian_blur(&gray, &kernel);
        assert!(out.data.iter().all(|v| *v == 77));
    }

    #[test]
    fn gaussian_blur_spreads_impulse() {
        let mut gray = GrayscaleBuffer::new(15, 15);
        gray.set(7, 7, 255);
        let kernel = GaussianKernel::new(1.0);
        let out = gaussian_blur(&gray, &kernel);
        assert!(out.get(7, 7) < 255);
        assert!(out.get(8, 7) > 0);
        assert!(out.get(7, 8) > 0);
    }

    #[test]
    fn bilateral_preserves_strong_step() {
        let mut gray = GrayscaleBuffer::new(16, 16);
        for y in 0..16u32 {
            for x in 0..16u32 {
                gray.set(x, y, if x < 8 { 0 } else { 200 });
            }
        }
        let out = bilateral_filter(&gray, 2.0, 25.0);
        // Pixels adjacent to the step stay on their own side
        assert!(out.get(7, 8) < 30);
        assert!(out.get(8, 8) > 170);
    }

    #[test]
    fn preprocess_runs_full_chain() {
        let frame = solid_frame(32, 32, [120, 120, 120]);
        let config = Config::default();
        let kernels = KernelCache::new();
        let gray = preprocess(&frame, &config, &kernels).unwrap();
        assert_eq!(gray.width, 32);
        assert_eq!(gray.height, 32);
    }
}
