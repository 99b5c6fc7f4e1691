use std::time::Instant;

use log::{debug, warn};
use serde::Serialize;

use crate::config::Config;
use crate::contour::{circularity, extract_contour};
use crate::edge_detection::detect_edges;
use crate::errors::{CamMeasureError, Result};
use crate::feature_extraction::{
    center_distance, compute_texture, rank_candidates, ScoredCandidate,
};
use crate::frame::{EdgeMap, FrameBuffer, GrayscaleBuffer};
use crate::kernels::KernelCache;
use crate::measurement::{
    measure_object, CalibrationData, DetectedObject, GeometricProperties, MeasurementUnit,
    ObjectDimensions,
};
use crate::morphology::{close, fill_holes, open};
use crate::preprocess::preprocess;
use crate::segmentation::{filter_regions, segment, BoundingBox, Region};

/// Confidence assigned to fallback placeholder results
const PLACEHOLDER_CONFIDENCE: f64 = 0.15;

/// Fraction of the shorter frame side covered by the frame-center placeholder
const PLACEHOLDER_BOX_FRACTION: f64 = 0.3;

/// Stages a detection run moves through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineStage {
    Idle,
    Preprocessing,
    EdgeDetecting,
    Segmenting,
    ContourExtracting,
    Scoring,
    Measuring,
    FallbackPath,
    Done,
}

impl PipelineStage {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Preprocessing => "preprocessing",
            PipelineStage::EdgeDetecting => "edge_detecting",
            PipelineStage::Segmenting => "segmenting",
            PipelineStage::ContourExtracting => "contour_extracting",
            PipelineStage::Scoring => "scoring",
            PipelineStage::Measuring => "measuring",
            PipelineStage::FallbackPath => "fallback_path",
            PipelineStage::Done => "done",
        }
    }
}

fn enter(stage: PipelineStage) {
    debug!("pipeline stage: {}", stage.name());
}

/// A detection strategy interchangeable with the geometric core.
///
/// An external engine receives the same frame and calibration and must
/// produce the same object shape, or report no result. Engines that fail
/// never abort a run; the core continues on its own path.
pub trait ObjectDetector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(
        &self,
        frame: &FrameBuffer,
        calibration: &CalibrationData,
    ) -> Result<Vec<DetectedObject>>;
}

/// Telemetry from one detection run, for debug and rendering consumers
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionReport {
    pub detector: String,
    pub preprocess_ms: f64,
    pub edge_ms: f64,
    pub segment_ms: f64,
    pub contour_ms: f64,
    pub score_ms: f64,
    pub measure_ms: f64,
    pub total_ms: f64,
    pub edge_pixels: usize,
    pub regions_found: usize,
    pub regions_after_filter: usize,
    pub contours_extracted: usize,
    pub candidates_scored: usize,
    pub objects_measured: usize,
    pub mean_confidence: f64,
    /// Position of the predominant (highest-scored) object in the output list
    pub predominant_index: Option<usize>,
    /// Reason the fallback path was taken, when it was
    pub fallback: Option<String>,
}

impl DetectionReport {
    fn new(detector: &str) -> Self {
        DetectionReport {
            detector: detector.to_string(),
            ..Default::default()
        }
    }
}

/// Intermediate buffers from the geometric path, kept for debug dumps
#[derive(Debug, Clone)]
pub struct DebugArtifacts {
    pub grayscale: GrayscaleBuffer,
    pub edges: EdgeMap,
    pub mask: EdgeMap,
}

/// Everything one detection run produced
#[derive(Debug)]
pub struct Detection {
    pub objects: Vec<DetectedObject>,
    pub report: DetectionReport,
    /// Present only when the geometric core ran
    pub artifacts: Option<DebugArtifacts>,
}

/// Orchestrates the detection chain over single frames.
///
/// Construction validates the configuration once. Per-frame work shares the
/// precomputed kernel cache; every other buffer is frame-local and released
/// when the call returns.
pub struct MeasurePipeline {
    config: Config,
    kernels: KernelCache,
    external: Vec<Box<dyn ObjectDetector>>,
}

impl MeasurePipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(MeasurePipeline {
            config,
            kernels: KernelCache::new(),
            external: Vec::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register an external strategy. Strategies run before the geometric
    /// core, in registration order.
    pub fn register_detector(&mut self, detector: Box<dyn ObjectDetector>) {
        self.external.push(detector);
    }

    /// Detect and measure objects in one frame, confidence-descending.
    /// An empty list is a valid outcome for a frame without a usable object.
    pub fn detect(
        &self,
        frame: &FrameBuffer,
        calibration: &CalibrationData,
    ) -> Result<Vec<DetectedObject>> {
        self.detect_full(frame, calibration)
            .map(|detection| detection.objects)
    }

    /// [`MeasurePipeline::detect`] plus the telemetry report and debug
    /// artifacts.
    pub fn detect_full(
        &self,
        frame: &FrameBuffer,
        calibration: &CalibrationData,
    ) -> Result<Detection> {
        if !calibration.pixels_per_mm.is_finite() || calibration.pixels_per_mm <= 0.0 {
            return Err(CamMeasureError::InvalidCalibration(calibration.pixels_per_mm));
        }

        let start = Instant::now();

        for detector in &self.external {
            match detector.detect(frame, calibration) {
                Ok(objects) if !objects.is_empty() => {
                    let mut objects = objects;
                    sort_by_confidence(&mut objects);
                    let mut report = DetectionReport::new(detector.name());
                    report.objects_measured = objects.len();
                    report.mean_confidence = mean_confidence(&objects);
                    report.total_ms = ms_since(start);
                    debug!(
                        "external detector {} supplied {} objects",
                        detector.name(),
                        objects.len()
                    );
                    return Ok(Detection {
                        objects,
                        report,
                        artifacts: None,
                    });
                }
                Ok(_) | Err(CamMeasureError::NoObjectFound) => {
                    debug!("external detector {} found no object", detector.name());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("external detector {} unavailable: {e}", detector.name());
                }
            }
        }

        match self.run_geometric(frame, calibration, start) {
            Ok(detection) => Ok(detection),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                enter(PipelineStage::FallbackPath);
                warn!("detection degraded to a placeholder result: {e}");
                let object = placeholder_from_frame(frame, calibration);
                let mut report = DetectionReport::new("geometric");
                report.fallback = Some(e.to_string());
                report.objects_measured = 1;
                report.mean_confidence = object.confidence;
                report.total_ms = ms_since(start);
                Ok(Detection {
                    objects: vec![object],
                    report,
                    artifacts: None,
                })
            }
        }
    }

    fn run_geometric(
        &self,
        frame: &FrameBuffer,
        calibration: &CalibrationData,
        start: Instant,
    ) -> Result<Detection> {
        let config = &self.config;
        let mut report = DetectionReport::new("geometric");

        enter(PipelineStage::Preprocessing);
        let t = Instant::now();
        let gray = preprocess(frame, config, &self.kernels)
            .map_err(|e| stage_error(PipelineStage::Preprocessing, e))?;
        report.preprocess_ms = ms_since(t);

        enter(PipelineStage::EdgeDetecting);
        let t = Instant::now();
        let edges = detect_edges(&gray, config, &self.kernels)
            .map_err(|e| stage_error(PipelineStage::EdgeDetecting, e))?;
        report.edge_pixels = edges.map.foreground_count();
        report.edge_ms = ms_since(t);
        debug!(
            "edge detection: {} edge pixels over {} passes",
            report.edge_pixels, edges.passes
        );

        if report.edge_pixels == 0 {
            enter(PipelineStage::Done);
            report.total_ms = ms_since(start);
            let mask = EdgeMap::new(gray.width, gray.height);
            return Ok(Detection {
                objects: Vec::new(),
                report,
                artifacts: Some(DebugArtifacts {
                    grayscale: gray,
                    edges: edges.map,
                    mask,
                }),
            });
        }

        enter(PipelineStage::Segmenting);
        let t = Instant::now();
        let close_element = self
            .kernels
            .element(config.morph_kernel_shape, config.morph_close_size);
        let open_element = self
            .kernels
            .element(config.morph_kernel_shape, config.morph_open_size);
        let mut mask = close(&edges.map, &close_element);
        if config.fill_holes {
            mask = fill_holes(&mask);
        }
        let mask = open(&mask, &open_element);

        let (labels, regions) = segment(&mask, &gray, config);
        report.regions_found = regions.len();
        let frame_area = frame.width() as u64 * frame.height() as u64;
        let kept = filter_regions(regions, frame_area, config);
        report.regions_after_filter = kept.len();
        report.segment_ms = ms_since(t);
        debug!(
            "segmentation: {} regions, {} after filters",
            report.regions_found, report.regions_after_filter
        );

        if kept.is_empty() {
            enter(PipelineStage::Done);
            report.total_ms = ms_since(start);
            return Ok(Detection {
                objects: Vec::new(),
                report,
                artifacts: Some(DebugArtifacts {
                    grayscale: gray,
                    edges: edges.map,
                    mask,
                }),
            });
        }

        enter(PipelineStage::ContourExtracting);
        let t = Instant::now();
        let fallback_region = kept.iter().max_by_key(|r| r.pixel_count).cloned();

        let mut candidates = Vec::new();
        for region in kept {
            match extract_contour(
                &labels,
                &region,
                config.simplify_epsilon,
                config.max_contour_points,
            ) {
                Some(contour) => candidates.push((region, contour)),
                None => debug!("region {} dropped: degenerate contour", region.id),
            }
        }
        report.contours_extracted = candidates.len();
        report.contour_ms = ms_since(t);

        if candidates.is_empty() {
            enter(PipelineStage::FallbackPath);
            warn!("no usable contour: falling back to the region bounding box");
            let object = match &fallback_region {
                Some(region) => placeholder_from_region(region, &gray, calibration),
                None => placeholder_from_frame(frame, calibration),
            };
            report.fallback = Some("no usable contour from surviving regions".to_string());
            report.objects_measured = 1;
            report.mean_confidence = object.confidence;
            enter(PipelineStage::Done);
            report.total_ms = ms_since(start);
            return Ok(Detection {
                objects: vec![object],
                report,
                artifacts: Some(DebugArtifacts {
                    grayscale: gray,
                    edges: edges.map,
                    mask,
                }),
            });
        }

        enter(PipelineStage::Scoring);
        let t = Instant::now();
        let ranked = rank_candidates(candidates, &gray, config);
        report.candidates_scored = ranked.len();
        report.score_ms = ms_since(t);

        enter(PipelineStage::Measuring);
        let t = Instant::now();
        let mut measured: Vec<(ScoredCandidate, DetectedObject)> = ranked
            .into_iter()
            .map(|candidate| {
                let object = measure_object(&candidate, calibration, config);
                (candidate, object)
            })
            .collect();

        let passing = measured
            .iter()
            .filter(|(_, o)| o.confidence >= config.min_object_confidence)
            .count();
        let fallback_reason = if passing == 0 {
            enter(PipelineStage::FallbackPath);
            warn!(
                "all {} candidates fall below the confidence threshold, keeping the top-scored one",
                report.candidates_scored
            );
            // A real low-confidence measurement beats a synthetic box
            measured.truncate(1);
            Some("all candidates below min_object_confidence".to_string())
        } else {
            measured.retain(|(_, o)| o.confidence >= config.min_object_confidence);
            None
        };

        measured.sort_by(|a, b| {
            b.1.confidence
                .partial_cmp(&a.1.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.0.features
                        .score
                        .partial_cmp(&a.0.features.score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(b.1.bounding_box.area().cmp(&a.1.bounding_box.area()))
        });

        let mut best_score = f64::NEG_INFINITY;
        for (i, (candidate, _)) in measured.iter().enumerate() {
            if candidate.features.score > best_score {
                best_score = candidate.features.score;
                report.predominant_index = Some(i);
            }
        }

        let objects: Vec<DetectedObject> = measured.into_iter().map(|(_, o)| o).collect();
        report.objects_measured = objects.len();
        report.mean_confidence = mean_confidence(&objects);
        report.fallback = fallback_reason;
        report.measure_ms = ms_since(t);

        enter(PipelineStage::Done);
        report.total_ms = ms_since(start);
        debug!(
            "measured {} objects, mean confidence {:.3}",
            report.objects_measured, report.mean_confidence
        );

        Ok(Detection {
            objects,
            report,
            artifacts: Some(DebugArtifacts {
                grayscale: gray,
                edges: edges.map,
                mask,
            }),
        })
    }
}

/// Bounding-box approximation used when a region clearly holds foreground
/// but the geometry chain could not characterize it
fn placeholder_from_region(
    region: &Region,
    gray: &GrayscaleBuffer,
    calibration: &CalibrationData,
) -> DetectedObject {
    let bbox = region.bounding_box;
    let (scale, unit) = if calibration.is_calibrated {
        (calibration.mm_per_pixel(), MeasurementUnit::Mm)
    } else {
        (1.0, MeasurementUnit::Px)
    };

    let width_px = bbox.width as f64;
    let height_px = bbox.height as f64;
    let area_px = region.pixel_count as f64;
    let perimeter_px = 2.0 * (width_px + height_px);

    DetectedObject {
        bounding_box: bbox,
        dimensions: ObjectDimensions {
            width: width_px * scale,
            height: height_px * scale,
            area: area_px * scale * scale,
            perimeter: perimeter_px * scale,
            unit,
        },
        confidence: PLACEHOLDER_CONFIDENCE,
        geometric: GeometricProperties {
            circularity: circularity(area_px, perimeter_px),
            solidity: region.extent(),
            aspect_ratio: bbox.aspect_ratio(),
            extent: region.extent(),
            center_distance: center_distance(region, gray.width, gray.height),
            hu_moments: [0.0; 7],
            texture: compute_texture(gray, &bbox),
        },
        depth: None,
        volume: None,
        surface_area: None,
    }
}

/// Centered-box guess used when not even region evidence survives
fn placeholder_from_frame(frame: &FrameBuffer, calibration: &CalibrationData) -> DetectedObject {
    let short = frame.width().min(frame.height());
    let side = ((short as f64 * PLACEHOLDER_BOX_FRACTION).round() as u32).max(1);
    let bbox = BoundingBox {
        x: (frame.width() - side) / 2,
        y: (frame.height() - side) / 2,
        width: side,
        height: side,
    };
    let region = Region {
        id: 0,
        pixel_count: side * side,
        bounding_box: bbox,
        centroid: bbox.center(),
    };
    let gray = GrayscaleBuffer::new(frame.width(), frame.height());
    placeholder_from_region(&region, &gray, calibration)
}

/// Tag a degradable error with the stage that raised it. Fatal errors pass
/// through unchanged.
fn stage_error(stage: PipelineStage, e: CamMeasureError) -> CamMeasureError {
    if e.is_fatal() {
        return e;
    }
    CamMeasureError::StageFailed {
        stage: stage.name(),
        reason: e.to_string(),
    }
}

fn ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn mean_confidence(objects: &[DetectedObject]) -> f64 {
    if objects.is_empty() {
        return 0.0;
    }
    objects.iter().map(|o| o.confidence).sum::<f64>() / objects.len() as f64
}

fn sort_by_confidence(objects: &mut [DetectedObject]) {
    objects.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.bounding_box.area().cmp(&a.bounding_box.area()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extraction::TextureFeatures;

    fn flat_frame(width: u32, height: u32, value: u8) -> FrameBuffer {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
        FrameBuffer::new(width, height, pixels).unwrap()
    }

    fn test_object(confidence: f64) -> DetectedObject {
        let bbox = BoundingBox {
            x: 10,
            y: 10,
            width: 20,
            height: 20,
        };
        DetectedObject {
            bounding_box: bbox,
            dimensions: ObjectDimensions {
                width: 20.0,
                height: 20.0,
                area: 400.0,
                perimeter: 80.0,
                unit: MeasurementUnit::Px,
            },
            confidence,
            geometric: GeometricProperties {
                circularity: 0.7,
                solidity: 1.0,
                aspect_ratio: 1.0,
                extent: 1.0,
                center_distance: 0.1,
                hu_moments: [0.0; 7],
                texture: TextureFeatures {
                    mean: 0.0,
                    stddev: 0.0,
                    entropy: 0.0,
                    contrast: 0.0,
                    uniformity: 1.0,
                },
            },
            depth: None,
            volume: None,
            surface_area: None,
        }
    }

    struct FixedDetector {
        objects: Vec<DetectedObject>,
    }

    impl ObjectDetector for FixedDetector {
        fn name(&self) -> &str {
            "fixed"
        }

        fn detect(
            &self,
            _frame: &FrameBuffer,
            _calibration: &CalibrationData,
        ) -> Result<Vec<DetectedObject>> {
            Ok(self.objects.clone())
        }
    }

    struct FailingDetector;

    impl ObjectDetector for FailingDetector {
        fn name(&self) -> &str {
            "failing"
        }

        fn detect(
            &self,
            _frame: &FrameBuffer,
            _calibration: &CalibrationData,
        ) -> Result<Vec<DetectedObject>> {
            Err(CamMeasureError::ExternalEngine(
                "failing".to_string(),
                "engine not loaded".to_string(),
            ))
        }
    }

    #[test]
    fn uniform_frame_yields_no_objects() {
        let pipeline = MeasurePipeline::new(Config::default()).unwrap();
        let frame = flat_frame(64, 64, 128);
        let detection = pipeline
            .detect_full(&frame, &CalibrationData::uncalibrated())
            .unwrap();

        assert!(detection.objects.is_empty());
        assert_eq!(detection.report.edge_pixels, 0);
        assert!(detection.report.fallback.is_none());
        assert!(detection.artifacts.is_some());
    }

    #[test]
    fn external_detector_preempts_core() {
        let mut pipeline = MeasurePipeline::new(Config::default()).unwrap();
        pipeline.register_detector(Box::new(FixedDetector {
            objects: vec![test_object(0.4), test_object(0.9)],
        }));

        let frame = flat_frame(32, 32, 200);
        let detection = pipeline
            .detect_full(&frame, &CalibrationData::uncalibrated())
            .unwrap();

        assert_eq!(detection.report.detector, "fixed");
        assert_eq!(detection.objects.len(), 2);
        // Output is confidence-descending regardless of engine order
        assert!(detection.objects[0].confidence > detection.objects[1].confidence);
        assert!(detection.artifacts.is_none());
    }

    #[test]
    fn failing_external_detector_falls_back_to_core() {
        let mut pipeline = MeasurePipeline::new(Config::default()).unwrap();
        pipeline.register_detector(Box::new(FailingDetector));

        let frame = flat_frame(32, 32, 90);
        let detection = pipeline
            .detect_full(&frame, &CalibrationData::uncalibrated())
            .unwrap();

        assert_eq!(detection.report.detector, "geometric");
        assert!(detection.objects.is_empty());
    }

    #[test]
    fn invalid_calibration_aborts() {
        let pipeline = MeasurePipeline::new(Config::default()).unwrap();
        let frame = flat_frame(16, 16, 10);
        let bad = CalibrationData {
            pixels_per_mm: -1.0,
            is_calibrated: true,
        };
        let result = pipeline.detect(&frame, &bad);
        assert!(matches!(result, Err(CamMeasureError::InvalidCalibration(_))));
    }

    #[test]
    fn stage_errors_carry_the_stage_name_unless_fatal() {
        let tagged = stage_error(
            PipelineStage::EdgeDetecting,
            CamMeasureError::Other("gradient buffer exhausted".to_string()),
        );
        assert!(matches!(
            tagged,
            CamMeasureError::StageFailed {
                stage: "edge_detecting",
                ..
            }
        ));

        let kept = stage_error(
            PipelineStage::Preprocessing,
            CamMeasureError::InvalidInput("truncated pixel buffer".to_string()),
        );
        assert!(matches!(kept, CamMeasureError::InvalidInput(_)));
    }

    #[test]
    fn placeholder_scales_with_calibration() {
        let region = Region {
            id: 7,
            pixel_count: 900,
            bounding_box: BoundingBox {
                x: 10,
                y: 10,
                width: 30,
                height: 30,
            },
            centroid: (25.0, 25.0),
        };
        let gray = GrayscaleBuffer::new(50, 50);
        let cal = CalibrationData::calibrated(10.0).unwrap();

        let object = placeholder_from_region(&region, &gray, &cal);
        assert_eq!(object.dimensions.unit, MeasurementUnit::Mm);
        assert!((object.dimensions.width - 3.0).abs() < 1e-9);
        assert!((object.confidence - PLACEHOLDER_CONFIDENCE).abs() < 1e-12);
        assert!(object.volume.is_none());
    }

    #[test]
    fn frame_placeholder_is_centered() {
        let frame = flat_frame(100, 80, 0);
        let object = placeholder_from_frame(&frame, &CalibrationData::uncalibrated());

        // 30% of the 80 px short side
        assert_eq!(object.bounding_box.width, 24);
        assert_eq!(object.bounding_box.x, 38);
        assert_eq!(object.bounding_box.y, 28);
        assert_eq!(object.dimensions.unit, MeasurementUnit::Px);
    }
}
