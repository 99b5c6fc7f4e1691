use serde::Serialize;

use crate::config::Config;
use crate::errors::{CamMeasureError, Result};
use crate::feature_extraction::{ScoredCandidate, TextureFeatures};
use crate::segmentation::BoundingBox;

/// Pixel-to-millimeter scale supplied by the calibration workflow.
/// The core never mutates it.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CalibrationData {
    pub pixels_per_mm: f64,
    pub is_calibrated: bool,
}

impl CalibrationData {
    /// A calibration with a known scale. `pixels_per_mm` must be finite
    /// and > 0 or the frame cannot be measured at all.
    pub fn calibrated(pixels_per_mm: f64) -> Result<Self> {
        if !pixels_per_mm.is_finite() || pixels_per_mm <= 0.0 {
            return Err(CamMeasureError::InvalidCalibration(pixels_per_mm));
        }
        Ok(CalibrationData {
            pixels_per_mm,
            is_calibrated: true,
        })
    }

    /// No scale known; measurements stay in pixel units.
    pub fn uncalibrated() -> Self {
        CalibrationData {
            pixels_per_mm: 1.0,
            is_calibrated: false,
        }
    }

    pub fn mm_per_pixel(&self) -> f64 {
        1.0 / self.pixels_per_mm
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementUnit {
    Mm,
    Px,
}

impl MeasurementUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementUnit::Mm => "mm",
            MeasurementUnit::Px => "px",
        }
    }
}

/// Physical extent of the silhouette in `unit`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ObjectDimensions {
    pub width: f64,
    pub height: f64,
    pub area: f64,
    pub perimeter: f64,
    pub unit: MeasurementUnit,
}

/// Unit-free shape descriptors carried alongside the dimensions
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GeometricProperties {
    pub circularity: f64,
    pub solidity: f64,
    pub aspect_ratio: f64,
    pub extent: f64,
    pub center_distance: f64,
    pub hu_moments: [f64; 7],
    pub texture: TextureFeatures,
}

/// One measured object. `depth`, `volume` and `surface_area` are single-view
/// estimates; detectors that cannot produce them leave them `None`.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedObject {
    pub bounding_box: BoundingBox,
    pub dimensions: ObjectDimensions,
    pub confidence: f64,
    pub geometric: GeometricProperties,
    pub depth: Option<f64>,
    pub volume: Option<f64>,
    pub surface_area: Option<f64>,
}

/// Thickness factor from silhouette shape, in [0.2, 0.4]. Balanced,
/// near-circular silhouettes are assumed deeper than elongated slivers.
fn depth_factor(aspect_ratio: f64, circularity: f64) -> f64 {
    let balance = if aspect_ratio > 0.0 {
        aspect_ratio.min(1.0 / aspect_ratio)
    } else {
        0.0
    };
    let regularity = (balance + circularity.clamp(0.0, 1.0)) / 2.0;
    0.2 + 0.2 * regularity
}

/// Volume fill factor for the width x height x depth box
fn volume_factor(circularity: f64, extent: f64) -> f64 {
    if circularity >= 0.85 {
        std::f64::consts::FRAC_PI_4
    } else if extent >= 0.9 {
        1.0
    } else {
        0.7
    }
}

/// Convert a scored candidate into calibrated physical measurements.
///
/// The depth, volume and surface-area values assume the visible silhouette
/// extrudes uniformly along the view axis. They are estimates for sizing,
/// not measured quantities.
pub fn measure_object(
    candidate: &ScoredCandidate,
    calibration: &CalibrationData,
    config: &Config,
) -> DetectedObject {
    let bbox = candidate.region.bounding_box;
    let contour = &candidate.contour;

    let (scale, unit) = if calibration.is_calibrated {
        (calibration.mm_per_pixel(), MeasurementUnit::Mm)
    } else {
        (1.0, MeasurementUnit::Px)
    };

    let width = bbox.width as f64 * scale;
    let height = bbox.height as f64 * scale;
    let area = contour.area * scale * scale;
    let perimeter = contour.perimeter * scale;

    let extent = candidate.region.extent();
    let depth = width.min(height) * depth_factor(contour.aspect_ratio, contour.circularity);
    let volume = width * height * depth * volume_factor(contour.circularity, extent);
    let surface_area = 2.0 * area + perimeter * depth;

    let calibration_confidence = if calibration.is_calibrated {
        config.calibrated_confidence
    } else {
        config.uncalibrated_confidence
    };
    let confidence = (contour.confidence
        * calibration_confidence
        * (1.0 - config.algorithm_uncertainty))
        .clamp(0.0, 1.0);

    DetectedObject {
        bounding_box: bbox,
        dimensions: ObjectDimensions {
            width,
            height,
            area,
            perimeter,
            unit,
        },
        confidence,
        geometric: GeometricProperties {
            circularity: contour.circularity,
            solidity: contour.solidity,
            aspect_ratio: contour.aspect_ratio,
            extent,
            center_distance: 1.0 - candidate.features.centrality,
            hu_moments: contour.hu_moments,
            texture: candidate.features.texture,
        },
        depth: Some(depth),
        volume: Some(volume),
        surface_area: Some(surface_area),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::Contour;
    use crate::feature_extraction::CandidateFeatures;
    use crate::segmentation::Region;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Point2;

    fn candidate(
        bbox: BoundingBox,
        pixel_count: u32,
        circularity: f64,
        contour_confidence: f64,
    ) -> ScoredCandidate {
        let w = bbox.width as f64;
        let h = bbox.height as f64;
        ScoredCandidate {
            region: Region {
                id: 1,
                pixel_count,
                bounding_box: bbox,
                centroid: bbox.center(),
            },
            contour: Contour {
                points: vec![
                    Point2::new(0.0, 0.0),
                    Point2::new(w, 0.0),
                    Point2::new(w, h),
                    Point2::new(0.0, h),
                ],
                area: w * h,
                perimeter: 2.0 * (w + h),
                circularity,
                solidity: 1.0,
                aspect_ratio: bbox.aspect_ratio(),
                hu_moments: [0.0; 7],
                confidence: contour_confidence,
            },
            features: CandidateFeatures {
                relative_area: 0.1,
                centrality: 0.8,
                shape_regularity: 0.9,
                base_confidence: contour_confidence,
                texture: TextureFeatures {
                    mean: 128.0,
                    stddev: 0.0,
                    entropy: 0.0,
                    contrast: 0.0,
                    uniformity: 1.0,
                },
                score: 0.7,
            },
        }
    }

    fn square_bbox(side: u32) -> BoundingBox {
        BoundingBox {
            x: 10,
            y: 10,
            width: side,
            height: side,
        }
    }

    #[test]
    fn calibration_rejects_non_positive_scale() {
        assert!(CalibrationData::calibrated(0.0).is_err());
        assert!(CalibrationData::calibrated(-2.0).is_err());
        assert!(CalibrationData::calibrated(f64::NAN).is_err());
        let cal = CalibrationData::calibrated(4.0).unwrap();
        assert!(cal.is_calibrated);
        assert_approx_eq!(cal.mm_per_pixel(), 0.25, 1e-12);
    }

    #[test]
    fn calibrated_scaling_is_linear_in_length_quadratic_in_area() {
        let cand = candidate(square_bbox(100), 100 * 100, 0.5, 0.9);
        let cal = CalibrationData::calibrated(10.0).unwrap();
        let config = Config::default();

        let object = measure_object(&cand, &cal, &config);
        assert_eq!(object.dimensions.unit, MeasurementUnit::Mm);
        assert_approx_eq!(object.dimensions.width, 10.0, 1e-9);
        assert_approx_eq!(object.dimensions.height, 10.0, 1e-9);
        assert_approx_eq!(object.dimensions.area, 100.0, 1e-9);
        assert_approx_eq!(object.dimensions.perimeter, 40.0, 1e-9);
    }

    #[test]
    fn doubling_pixels_per_mm_halves_lengths() {
        let cand = candidate(square_bbox(100), 100 * 100, 0.5, 0.9);
        let config = Config::default();

        let at_10 = measure_object(
            &cand,
            &CalibrationData::calibrated(10.0).unwrap(),
            &config,
        );
        let at_20 = measure_object(
            &cand,
            &CalibrationData::calibrated(20.0).unwrap(),
            &config,
        );

        assert_approx_eq!(at_20.dimensions.width, at_10.dimensions.width / 2.0, 1e-9);
        assert_approx_eq!(at_20.dimensions.area, at_10.dimensions.area / 4.0, 1e-9);
        let (v10, v20) = (at_10.volume.unwrap(), at_20.volume.unwrap());
        assert_approx_eq!(v20, v10 / 8.0, 1e-9);
    }

    #[test]
    fn uncalibrated_reports_pixel_units() {
        let cand = candidate(square_bbox(60), 60 * 60, 0.5, 0.9);
        let config = Config::default();
        let object = measure_object(&cand, &CalibrationData::uncalibrated(), &config);

        assert_eq!(object.dimensions.unit, MeasurementUnit::Px);
        assert_approx_eq!(object.dimensions.width, 60.0, 1e-9);
        assert_approx_eq!(object.dimensions.area, 3600.0, 1e-9);
    }

    #[test]
    fn depth_factor_stays_within_bounds() {
        // Square bbox with perfect circularity: most regular shape
        assert_approx_eq!(depth_factor(1.0, 1.0), 0.4, 1e-9);
        // Extreme sliver with no circularity: least regular shape
        assert!(depth_factor(50.0, 0.0) < 0.21);
        assert!(depth_factor(0.0, 0.0) >= 0.2);

        for &(ar, circ) in &[(1.0, 0.5), (0.25, 0.9), (8.0, 0.1)] {
            let f = depth_factor(ar, circ);
            assert!((0.2..=0.4).contains(&f), "factor {f} out of range");
        }
    }

    #[test]
    fn volume_factor_tracks_silhouette_shape() {
        assert_approx_eq!(volume_factor(0.95, 0.5), std::f64::consts::FRAC_PI_4, 1e-12);
        assert_approx_eq!(volume_factor(0.3, 0.95), 1.0, 1e-12);
        assert_approx_eq!(volume_factor(0.3, 0.5), 0.7, 1e-12);
    }

    #[test]
    fn volume_uses_extrusion_heuristic() {
        // 100x100 px square region filling its bbox, circularity below the
        // circular cutoff, extent 1.0 so the box factor applies
        let cand = candidate(square_bbox(100), 100 * 100, 0.7, 0.9);
        let cal = CalibrationData::calibrated(10.0).unwrap();
        let config = Config::default();
        let object = measure_object(&cand, &cal, &config);

        let f = depth_factor(1.0, 0.7);
        let expected_depth = 10.0 * f;
        assert_approx_eq!(object.depth.unwrap(), expected_depth, 1e-9);
        assert_approx_eq!(object.volume.unwrap(), 10.0 * 10.0 * expected_depth, 1e-9);
        assert_approx_eq!(
            object.surface_area.unwrap(),
            2.0 * 100.0 + 40.0 * expected_depth,
            1e-9
        );
    }

    #[test]
    fn confidence_combines_contour_and_calibration_terms() {
        let cand = candidate(square_bbox(50), 50 * 50, 0.5, 0.8);
        let config = Config::default();

        let calibrated = measure_object(
            &cand,
            &CalibrationData::calibrated(5.0).unwrap(),
            &config,
        );
        assert_approx_eq!(calibrated.confidence, 0.8 * 0.9 * 0.95, 1e-9);

        let heuristic = measure_object(&cand, &CalibrationData::uncalibrated(), &config);
        assert_approx_eq!(heuristic.confidence, 0.8 * 0.3 * 0.95, 1e-9);

        assert!((0.0..=1.0).contains(&calibrated.confidence));
        assert!((0.0..=1.0).contains(&heuristic.confidence));
    }
}
