use serde::Serialize;

use crate::config::Config;
use crate::contour::Contour;
use crate::frame::GrayscaleBuffer;
use crate::segmentation::{BoundingBox, Region};

/// A candidate is scored as full-size once it fills this fraction of the frame
const SIZE_SCORE_FULL_FRACTION: f64 = 0.25;

/// First-order intensity statistics over a candidate's bounding box
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TextureFeatures {
    pub mean: f64,
    pub stddev: f64,
    /// Shannon entropy of the intensity histogram, in bits
    pub entropy: f64,
    /// Michelson contrast (max - min) / (max + min)
    pub contrast: f64,
    /// Histogram energy, 1.0 for a perfectly flat patch
    pub uniformity: f64,
}

/// Scalar descriptors plus the final weighted score of one candidate
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CandidateFeatures {
    pub relative_area: f64,
    pub centrality: f64,
    pub shape_regularity: f64,
    pub base_confidence: f64,
    pub texture: TextureFeatures,
    pub score: f64,
}

/// A region, its contour and everything the scorer derived from them
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub region: Region,
    pub contour: Contour,
    pub features: CandidateFeatures,
}

/// Histogram-based texture statistics for the pixels inside `bbox`
pub fn compute_texture(gray: &GrayscaleBuffer, bbox: &BoundingBox) -> TextureFeatures {
    let x1 = (bbox.x + bbox.width).min(gray.width);
    let y1 = (bbox.y + bbox.height).min(gray.height);

    let mut hist = [0u32; 256];
    let mut sum = 0.0;
    let mut count = 0u64;
    let mut min_v = u8::MAX;
    let mut max_v = u8::MIN;

    for y in bbox.y..y1 {
        for x in bbox.x..x1 {
            let v = gray.get(x, y);
            hist[v as usize] += 1;
            sum += v as f64;
            count += 1;
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
    }

    if count == 0 {
        return TextureFeatures {
            mean: 0.0,
            stddev: 0.0,
            entropy: 0.0,
            contrast: 0.0,
            uniformity: 1.0,
        };
    }

    let mean = sum / count as f64;
    let mut variance = 0.0;
    let mut entropy = 0.0;
    let mut uniformity = 0.0;
    for (v, n) in hist.iter().enumerate() {
        if *n == 0 {
            continue;
        }
        let p = *n as f64 / count as f64;
        let d = v as f64 - mean;
        variance += p * d * d;
        entropy -= p * p.log2();
        uniformity += p * p;
    }

    let contrast = if max_v as u16 + min_v as u16 > 0 {
        (max_v as f64 - min_v as f64) / (max_v as f64 + min_v as f64)
    } else {
        0.0
    };

    TextureFeatures {
        mean,
        stddev: variance.sqrt(),
        entropy,
        contrast,
        uniformity,
    }
}

/// Normalized distance of the region centroid from the frame center,
/// 0 at the center and 1 at the corners
pub fn center_distance(region: &Region, frame_width: u32, frame_height: u32) -> f64 {
    let cx = frame_width as f64 / 2.0;
    let cy = frame_height as f64 / 2.0;
    let half_diagonal = (cx * cx + cy * cy).sqrt();
    if half_diagonal <= 0.0 {
        return 0.0;
    }
    let dx = region.centroid.0 - cx;
    let dy = region.centroid.1 - cy;
    ((dx * dx + dy * dy).sqrt() / half_diagonal).clamp(0.0, 1.0)
}

fn score_candidate(
    region: &Region,
    contour: &Contour,
    gray: &GrayscaleBuffer,
    config: &Config,
) -> CandidateFeatures {
    let frame_area = gray.width as f64 * gray.height as f64;
    let relative_area = region.pixel_count as f64 / frame_area;
    let size_score = (relative_area / SIZE_SCORE_FULL_FRACTION).min(1.0);

    let centrality = 1.0 - center_distance(region, gray.width, gray.height);
    let shape_regularity = (contour.circularity + contour.solidity) / 2.0;
    let base_confidence = contour.confidence;
    let texture = compute_texture(gray, &region.bounding_box);

    let weight_sum = config.score_weight_size
        + config.score_weight_centrality
        + config.score_weight_shape
        + config.score_weight_confidence;

    let score = (config.score_weight_size * size_score
        + config.score_weight_centrality * centrality
        + config.score_weight_shape * shape_regularity
        + config.score_weight_confidence * base_confidence)
        / weight_sum;

    CandidateFeatures {
        relative_area,
        centrality,
        shape_regularity,
        base_confidence,
        texture,
        score,
    }
}

/// Score every candidate and order them for selection.
///
/// Sorting is by score descending; an exact tie goes to the larger region,
/// then to the lower region id so the ordering stays deterministic.
pub fn rank_candidates(
    candidates: Vec<(Region, Contour)>,
    gray: &GrayscaleBuffer,
    config: &Config,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|(region, contour)| {
            let features = score_candidate(&region, &contour, gray, config);
            ScoredCandidate {
                region,
                contour,
                features,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.features
            .score
            .partial_cmp(&a.features.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.region.pixel_count.cmp(&a.region.pixel_count))
            .then(a.region.id.cmp(&b.region.id))
    });

    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Point2;

    fn flat_gray(width: u32, height: u32, value: u8) -> GrayscaleBuffer {
        let mut gray = GrayscaleBuffer::new(width, height);
        gray.data.fill(value);
        gray
    }

    fn region_at(id: u32, x: u32, y: u32, side: u32) -> Region {
        Region {
            id,
            pixel_count: side * side,
            bounding_box: BoundingBox {
                x,
                y,
                width: side,
                height: side,
            },
            centroid: (
                x as f64 + side as f64 / 2.0,
                y as f64 + side as f64 / 2.0,
            ),
        }
    }

    fn square_contour(side: f64, confidence: f64) -> Contour {
        Contour {
            points: vec![
                Point2::new(0.0, 0.0),
                Point2::new(side, 0.0),
                Point2::new(side, side),
                Point2::new(0.0, side),
            ],
            area: side * side,
            perimeter: 4.0 * side,
            circularity: std::f64::consts::FRAC_PI_4,
            solidity: 1.0,
            aspect_ratio: 1.0,
            hu_moments: [0.0; 7],
            confidence,
        }
    }

    #[test]
    fn texture_of_flat_patch() {
        let gray = flat_gray(16, 16, 100);
        let bbox = BoundingBox {
            x: 2,
            y: 2,
            width: 8,
            height: 8,
        };
        let t = compute_texture(&gray, &bbox);
        assert_approx_eq!(t.mean, 100.0, 1e-9);
        assert_approx_eq!(t.stddev, 0.0, 1e-9);
        assert_approx_eq!(t.entropy, 0.0, 1e-9);
        assert_approx_eq!(t.uniformity, 1.0, 1e-9);
        assert_approx_eq!(t.contrast, 0.0, 1e-9);
    }

    #[test]
    fn texture_of_binary_checkerboard() {
        let mut gray = GrayscaleBuffer::new(8, 8);
        for y in 0..8u32 {
            for x in 0..8u32 {
                gray.set(x, y, if (x + y) % 2 == 0 { 0 } else { 255 });
            }
        }
        let bbox = BoundingBox {
            x: 0,
            y: 0,
            width: 8,
            height: 8,
        };
        let t = compute_texture(&gray, &bbox);
        assert_approx_eq!(t.entropy, 1.0, 1e-9);
        assert_approx_eq!(t.uniformity, 0.5, 1e-9);
        assert_approx_eq!(t.contrast, 1.0, 1e-9);
        assert_approx_eq!(t.mean, 127.5, 1e-9);
    }

    #[test]
    fn center_distance_is_normalized() {
        let center = region_at(1, 45, 45, 10); // centroid at (50, 50)
        assert_approx_eq!(center_distance(&center, 100, 100), 0.0, 1e-9);

        let corner = region_at(2, 0, 0, 2); // centroid at (1, 1)
        let d = center_distance(&corner, 100, 100);
        assert!(d > 0.9 && d <= 1.0);
    }

    #[test]
    fn centered_large_candidate_beats_corner_speck() {
        let gray = flat_gray(100, 100, 128);
        let config = Config::default();

        // 60x60 near the center vs 20x20 in a corner
        let big = region_at(1, 20, 20, 60);
        let small = region_at(2, 0, 0, 20);

        let ranked = rank_candidates(
            vec![
                (small, square_contour(19.0, 0.9)),
                (big, square_contour(59.0, 0.9)),
            ],
            &gray,
            &config,
        );

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].region.id, 1);
        assert!(ranked[0].features.score > ranked[1].features.score);
        assert!(ranked[0].features.centrality > ranked[1].features.centrality);
    }

    #[test]
    fn exact_ties_prefer_larger_region() {
        let gray = flat_gray(100, 100, 128);
        let config = Config::default();

        // Both exceed the size cap and sit symmetrically around the center,
        // so their scores come out identical
        let left = Region {
            id: 1,
            pixel_count: 60 * 60,
            bounding_box: BoundingBox {
                x: 10,
                y: 20,
                width: 60,
                height: 60,
            },
            centroid: (40.0, 50.0),
        };
        let right = Region {
            id: 2,
            pixel_count: 70 * 70,
            bounding_box: BoundingBox {
                x: 30,
                y: 20,
                width: 60,
                height: 60,
            },
            centroid: (60.0, 50.0),
        };

        let ranked = rank_candidates(
            vec![
                (left, square_contour(59.0, 0.9)),
                (right, square_contour(59.0, 0.9)),
            ],
            &gray,
            &config,
        );

        assert_approx_eq!(ranked[0].features.score, ranked[1].features.score, 1e-12);
        assert_eq!(ranked[0].region.id, 2);
    }

    #[test]
    fn score_blends_weighted_terms() {
        let gray = flat_gray(100, 100, 128);
        let config = Config::default();
        let region = region_at(1, 45, 45, 10); // perfectly centered, small
        let ranked = rank_candidates(vec![(region, square_contour(9.0, 1.0))], &gray, &config);

        let f = &ranked[0].features;
        // size: (100/10000) / 0.25 = 0.04, centrality 1.0,
        // shape (pi/4 + 1)/2, confidence 1.0
        let expected = 0.35 * 0.04
            + 0.30 * 1.0
            + 0.20 * ((std::f64::consts::FRAC_PI_4 + 1.0) / 2.0)
            + 0.15 * 1.0;
        assert_approx_eq!(f.score, expected, 1e-9);
    }
}
