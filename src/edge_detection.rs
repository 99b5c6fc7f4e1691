use crate::config::{Config, FusionMode, GradientOperator};
use crate::errors::Result;
use crate::frame::{EdgeMap, GrayscaleBuffer};
use crate::kernels::KernelCache;
use crate::preprocess::gaussian_blur;

pub const SOBEL_KERNEL_X: [[i32; 3]; 3] = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];
pub const SOBEL_KERNEL_Y: [[i32; 3]; 3] = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]];

pub const SCHARR_KERNEL_X: [[i32; 3]; 3] = [[-3, 0, 3], [-10, 0, 10], [-3, 0, 3]];
pub const SCHARR_KERNEL_Y: [[i32; 3]; 3] = [[-3, -10, -3], [0, 0, 0], [3, 10, 3]];

/// tan(22.5 deg), sector boundary for gradient direction quantization
const TAN_22_5_DEG: f32 = 0.414_213_56;

/// Magnitudes below this are treated as sensor noise when deriving
/// adaptive thresholds, so a uniform frame stays edge-free.
const ADAPTIVE_MAG_FLOOR: f32 = 16.0;

/// Dense gradient response for one smoothing scale
#[derive(Debug, Clone)]
pub struct GradientField {
    pub width: u32,
    pub height: u32,
    pub gx: Vec<f32>,
    pub gy: Vec<f32>,
    pub magnitude: Vec<f32>,
}

/// Fused multi-pass edge result with per-pixel vote confidence
#[derive(Debug, Clone)]
pub struct EdgeDetection {
    pub map: EdgeMap,
    /// Fraction of passes that marked each pixel, in [0, 1]
    pub vote_fraction: Vec<f32>,
    pub passes: usize,
}

/// Convolve a 3x3 kernel pair over the buffer with clamped borders
pub fn gradient(gray: &GrayscaleBuffer, operator: GradientOperator) -> GradientField {
    let (kx, ky) = match operator {
        GradientOperator::Sobel => (&SOBEL_KERNEL_X, &SOBEL_KERNEL_Y),
        GradientOperator::Scharr => (&SCHARR_KERNEL_X, &SCHARR_KERNEL_Y),
    };

    let width = gray.width as i32;
    let height = gray.height as i32;
    let len = gray.data.len();
    let mut gx = vec![0.0f32; len];
    let mut gy = vec![0.0f32; len];
    let mut magnitude = vec![0.0f32; len];

    for y in 0..height {
        for x in 0..width {
            let mut ax = 0i32;
            let mut ay = 0i32;
            for ky_i in 0..3 {
                let sy = (y + ky_i - 1).clamp(0, height - 1);
                for kx_i in 0..3 {
                    let sx = (x + kx_i - 1).clamp(0, width - 1);
                    let v = gray.data[(sy * width + sx) as usize] as i32;
                    ax += kx[ky_i as usize][kx_i as usize] * v;
                    ay += ky[ky_i as usize][kx_i as usize] * v;
                }
            }
            let i = (y * width + x) as usize;
            gx[i] = ax as f32;
            gy[i] = ay as f32;
            magnitude[i] = ((ax * ax + ay * ay) as f32).sqrt();
        }
    }

    GradientField {
        width: gray.width,
        height: gray.height,
        gx,
        gy,
        magnitude,
    }
}

/// Suppress non-maximal gradient responses along the quantized
/// gradient direction (0, 45, 90 or 135 degrees).
///
/// On a flat-topped ridge the pixel later in scan order wins the tie,
/// so a perfect two-pixel step keeps exactly one of them.
pub fn non_max_suppression(grad: &GradientField) -> Vec<f32> {
    let width = grad.width as usize;
    let height = grad.height as usize;
    let mut thin = vec![0.0f32; grad.magnitude.len()];

    if width < 3 || height < 3 {
        return thin;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let i = y * width + x;
            let mag = grad.magnitude[i];
            if mag <= 0.0 {
                continue;
            }

            let gx = grad.gx[i];
            let gy = grad.gy[i];
            let abs_gx = gx.abs();
            let abs_gy = gy.abs();

            // Neighbor pair along the gradient; `a` concedes ties, `b` wins them
            let (a, b) = if abs_gy <= TAN_22_5_DEG * abs_gx {
                // Near-horizontal gradient
                (i - 1, i + 1)
            } else if abs_gx <= TAN_22_5_DEG * abs_gy {
                // Near-vertical gradient
                (i - width, i + width)
            } else if (gx >= 0.0) == (gy >= 0.0) {
                // Diagonal toward +x, +y
                (i - width - 1, i + width + 1)
            } else {
                // Diagonal toward +x, -y
                (i + width - 1, i - width + 1)
            };

            if mag >= grad.magnitude[a] && mag > grad.magnitude[b] {
                thin[i] = mag;
            }
        }
    }

    thin
}

/// Derive (low, high) hysteresis thresholds from the nonzero magnitude
/// histogram. Returns (0, 0) when the frame carries no usable gradient.
pub fn adaptive_thresholds(magnitude: &[f32], percentile: f64, low_ratio: f64) -> (f32, f32) {
    let mut max_mag = 0.0f32;
    for m in magnitude {
        if *m > max_mag {
            max_mag = *m;
        }
    }
    if max_mag < ADAPTIVE_MAG_FLOOR {
        return (0.0, 0.0);
    }

    const BINS: usize = 1024;
    let mut hist = [0u32; BINS];
    let mut count: u64 = 0;
    let scale = (BINS - 1) as f32 / max_mag;
    for m in magnitude {
        if *m >= ADAPTIVE_MAG_FLOOR {
            hist[(m * scale) as usize] += 1;
            count += 1;
        }
    }
    if count == 0 {
        return (0.0, 0.0);
    }

    let target = (count as f64 * percentile) as u64;
    let mut cumulative: u64 = 0;
    let mut high = max_mag;
    for (bin, n) in hist.iter().enumerate() {
        cumulative += *n as u64;
        if cumulative >= target {
            // Lower edge of the crossing bin, so a point mass at one
            // magnitude still seeds its own pixels
            high = bin as f32 / scale;
            break;
        }
    }

    let high = high.max(ADAPTIVE_MAG_FLOOR);
    let low = high * low_ratio as f32;
    (low, high)
}

/// Link edges by hysteresis: seeds at `thin >= high`, grown through
/// 8-connected neighbors down to `low` with an explicit stack.
pub fn hysteresis(thin: &[f32], width: u32, height: u32, low: f32, high: f32) -> EdgeMap {
    let mut map = EdgeMap::new(width, height);
    if high <= 0.0 {
        return map;
    }

    let w = width as i32;
    let h = height as i32;
    let mut stack: Vec<(i32, i32)> = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if thin[(y * w + x) as usize] >= high && !map.is_set(x as u32, y as u32) {
                map.set(x as u32, y as u32);
                stack.push((x, y));

                while let Some((cx, cy)) = stack.pop() {
                    for dy in -1..=1 {
                        for dx in -1..=1 {
                            if dx == 0 && dy == 0 {
                                continue;
                            }
                            let nx = cx + dx;
                            let ny = cy + dy;
                            if nx < 0 || ny < 0 || nx >= w || ny >= h {
                                continue;
                            }
                            let ni = (ny * w + nx) as usize;
                            if thin[ni] >= low && !map.is_set(nx as u32, ny as u32) {
                                map.set(nx as u32, ny as u32);
                                stack.push((nx, ny));
                            }
                        }
                    }
                }
            }
        }
    }

    map
}

/// Zero-crossing style second-derivative pass: thresholds the absolute
/// 4-neighbor Laplacian response.
pub fn laplacian_edges(gray: &GrayscaleBuffer, threshold: f64) -> EdgeMap {
    let width = gray.width as i32;
    let height = gray.height as i32;
    let mut map = EdgeMap::new(gray.width, gray.height);

    for y in 0..height {
        for x in 0..width {
            let center = gray.data[(y * width + x) as usize] as i32;
            let left = gray.data[(y * width + (x - 1).clamp(0, width - 1)) as usize] as i32;
            let right = gray.data[(y * width + (x + 1).clamp(0, width - 1)) as usize] as i32;
            let up = gray.data[((y - 1).clamp(0, height - 1) * width + x) as usize] as i32;
            let down = gray.data[((y + 1).clamp(0, height - 1) * width + x) as usize] as i32;

            let lap = left + right + up + down - 4 * center;
            if (lap.abs() as f64) > threshold {
                map.set(x as u32, y as u32);
            }
        }
    }

    map
}

/// One full Canny pass over an already-smoothed buffer
fn canny_pass(gray: &GrayscaleBuffer, config: &Config) -> EdgeMap {
    let grad = gradient(gray, config.gradient_operator);

    let (adaptive_low, adaptive_high) = adaptive_thresholds(
        &grad.magnitude,
        config.adaptive_high_percentile,
        config.adaptive_low_ratio,
    );

    let high = if config.canny_high_threshold > 0.0 {
        config.canny_high_threshold as f32
    } else {
        adaptive_high
    };
    let low = if config.canny_low_threshold > 0.0 {
        config.canny_low_threshold as f32
    } else if config.canny_high_threshold > 0.0 {
        (config.canny_high_threshold * config.adaptive_low_ratio) as f32
    } else {
        adaptive_low
    };

    if high <= 0.0 {
        return EdgeMap::new(gray.width, gray.height);
    }

    let thin = non_max_suppression(&grad);
    hysteresis(&thin, gray.width, gray.height, low, high)
}

/// Run the configured detection passes and fuse their votes.
///
/// Each entry in `fusion_sigmas` contributes one Canny pass at that extra
/// smoothing scale; an optional Laplacian pass joins the vote. The fused map
/// keeps pixels per [`FusionMode`] and `vote_fraction` records per-pixel
/// agreement across passes.
pub fn detect_edges(
    gray: &GrayscaleBuffer,
    config: &Config,
    kernels: &KernelCache,
) -> Result<EdgeDetection> {
    let len = gray.data.len();
    let mut votes = vec![0u8; len];
    let mut passes = 0usize;

    for &sigma in &config.fusion_sigmas {
        let map = if sigma > 0.0 {
            let kernel = kernels.gaussian(sigma);
            let blurred = gaussian_blur(gray, &kernel);
            canny_pass(&blurred, config)
        } else {
            canny_pass(gray, config)
        };
        for (vote, v) in votes.iter_mut().zip(map.data.iter()) {
            if *v != 0 {
                *vote += 1;
            }
        }
        passes += 1;
    }

    if config.laplacian_pass {
        let map = laplacian_edges(gray, config.laplacian_threshold);
        for (vote, v) in votes.iter_mut().zip(map.data.iter()) {
            if *v != 0 {
                *vote += 1;
            }
        }
        passes += 1;
    }

    let mut map = EdgeMap::new(gray.width, gray.height);
    let mut vote_fraction = vec![0.0f32; len];
    for i in 0..len {
        let v = votes[i] as usize;
        vote_fraction[i] = v as f32 / passes as f32;
        let keep = match config.fusion_mode {
            FusionMode::Or => v >= 1,
            FusionMode::Majority => v * 2 > passes,
        };
        if keep {
            map.data[i] = crate::frame::FOREGROUND;
        }
    }

    Ok(EdgeDetection {
        map,
        vote_fraction,
        passes,
    })
}
