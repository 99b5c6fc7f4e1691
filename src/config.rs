use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::errors::{CamMeasureError, Result};

/// Configuration for CamMeasure
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_input_path")]
    pub input_path: String,

    #[serde(default = "default_output_base_dir")]
    pub output_base_dir: String,

    // Preprocessing parameters
    #[serde(default = "default_luminance_weights")]
    pub luminance_weights: LuminanceWeights,

    #[serde(default = "default_clahe_enabled")]
    pub clahe_enabled: bool,

    #[serde(default = "default_clahe_tile_grid")]
    pub clahe_tile_grid: u32,

    #[serde(default = "default_clahe_clip_limit")]
    pub clahe_clip_limit: f64,

    #[serde(default = "default_denoise_sigma")]
    pub denoise_sigma: f64,

    #[serde(default = "default_bilateral_enabled")]
    pub bilateral_enabled: bool,

    #[serde(default = "default_bilateral_sigma_space")]
    pub bilateral_sigma_space: f64,

    #[serde(default = "default_bilateral_sigma_range")]
    pub bilateral_sigma_range: f64,

    // Edge detection parameters
    #[serde(default = "default_gradient_operator")]
    pub gradient_operator: GradientOperator,

    // Hysteresis thresholds; 0.0 means derive from the gradient histogram
    #[serde(default = "default_canny_low_threshold")]
    pub canny_low_threshold: f64,

    #[serde(default = "default_canny_high_threshold")]
    pub canny_high_threshold: f64,

    #[serde(default = "default_adaptive_high_percentile")]
    pub adaptive_high_percentile: f64,

    #[serde(default = "default_adaptive_low_ratio")]
    pub adaptive_low_ratio: f64,

    // One detection pass per smoothing sigma; 0.0 skips the extra blur
    #[serde(default = "default_fusion_sigmas")]
    pub fusion_sigmas: Vec<f64>,

    #[serde(default = "default_fusion_mode")]
    pub fusion_mode: FusionMode,

    #[serde(default = "default_laplacian_pass")]
    pub laplacian_pass: bool,

    #[serde(default = "default_laplacian_threshold")]
    pub laplacian_threshold: f64,

    // Morphology parameters
    #[serde(default = "default_morph_kernel_shape")]
    pub morph_kernel_shape: KernelShape,

    #[serde(default = "default_morph_close_size")]
    pub morph_close_size: u32,

    #[serde(default = "default_morph_open_size")]
    pub morph_open_size: u32,

    #[serde(default = "default_fill_holes")]
    pub fill_holes: bool,

    // Segmentation parameters
    #[serde(default = "default_marker_min_depth")]
    pub marker_min_depth: f64,

    #[serde(default = "default_gradient_barrier")]
    pub gradient_barrier: f64,

    #[serde(default = "default_region_min_area_fraction")]
    pub region_min_area_fraction: f64,

    #[serde(default = "default_region_max_area_fraction")]
    pub region_max_area_fraction: f64,

    #[serde(default = "default_region_min_aspect")]
    pub region_min_aspect: f64,

    #[serde(default = "default_region_max_aspect")]
    pub region_max_aspect: f64,

    #[serde(default = "default_region_min_extent")]
    pub region_min_extent: f64,

    // Contour parameters
    #[serde(default = "default_simplify_epsilon")]
    pub simplify_epsilon: f64,

    #[serde(default = "default_max_contour_points")]
    pub max_contour_points: usize,

    // Scoring weights for central-object selection
    #[serde(default = "default_score_weight_size")]
    pub score_weight_size: f64,

    #[serde(default = "default_score_weight_centrality")]
    pub score_weight_centrality: f64,

    #[serde(default = "default_score_weight_shape")]
    pub score_weight_shape: f64,

    #[serde(default = "default_score_weight_confidence")]
    pub score_weight_confidence: f64,

    #[serde(default = "default_min_object_confidence")]
    pub min_object_confidence: f64,

    // Measurement confidence parameters
    #[serde(default = "default_calibrated_confidence")]
    pub calibrated_confidence: f64,

    #[serde(default = "default_uncalibrated_confidence")]
    pub uncalibrated_confidence: f64,

    #[serde(default = "default_algorithm_uncertainty")]
    pub algorithm_uncertainty: f64,

    // Scheduling parameters
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_parallel")]
    pub use_parallel: bool,
}

/// Luminance weighting used for RGBA to grayscale conversion
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LuminanceWeights {
    /// ITU-R BT.709 (default for camera frames)
    Bt709,
    /// ITU-R BT.601
    Bt601,
}

/// Gradient operator for edge detection
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum GradientOperator {
    Sobel,
    Scharr,
}

/// How per-pass edge maps are combined
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FusionMode {
    /// A pixel is an edge if any pass marked it
    Or,
    /// A pixel is an edge if more than half of the passes marked it
    Majority,
}

/// Structuring element shape for morphology
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum KernelShape {
    Disk,
    Cross,
}

fn default_input_path() -> String {
    "./input".to_string()
}

fn default_output_base_dir() -> String {
    "./output".to_string()
}

fn default_luminance_weights() -> LuminanceWeights {
    LuminanceWeights::Bt709
}

fn default_clahe_enabled() -> bool {
    true
}

fn default_clahe_tile_grid() -> u32 {
    8
}

fn default_clahe_clip_limit() -> f64 {
    2.0
}

fn default_denoise_sigma() -> f64 {
    1.0
}

fn default_bilateral_enabled() -> bool {
    false
}

fn default_bilateral_sigma_space() -> f64 {
    3.0
}

fn default_bilateral_sigma_range() -> f64 {
    25.0
}

fn default_gradient_operator() -> GradientOperator {
    GradientOperator::Sobel
}

fn default_canny_low_threshold() -> f64 {
    0.0
}

fn default_canny_high_threshold() -> f64 {
    0.0
}

fn default_adaptive_high_percentile() -> f64 {
    0.9
}

fn default_adaptive_low_ratio() -> f64 {
    0.4
}

fn default_fusion_sigmas() -> Vec<f64> {
    vec![0.0, 1.4, 2.4]
}

fn default_fusion_mode() -> FusionMode {
    FusionMode::Majority
}

fn default_laplacian_pass() -> bool {
    false
}

fn default_laplacian_threshold() -> f64 {
    12.0
}

fn default_morph_kernel_shape() -> KernelShape {
    KernelShape::Disk
}

fn default_morph_close_size() -> u32 {
    5
}

fn default_morph_open_size() -> u32 {
    3
}

fn default_fill_holes() -> bool {
    true
}

fn default_marker_min_depth() -> f64 {
    3.0
}

fn default_gradient_barrier() -> f64 {
    24.0
}

fn default_region_min_area_fraction() -> f64 {
    0.001
}

fn default_region_max_area_fraction() -> f64 {
    0.8
}

fn default_region_min_aspect() -> f64 {
    0.1
}

fn default_region_max_aspect() -> f64 {
    10.0
}

fn default_region_min_extent() -> f64 {
    0.3
}

fn default_simplify_epsilon() -> f64 {
    1.5
}

fn default_max_contour_points() -> usize {
    10_000
}

fn default_score_weight_size() -> f64 {
    0.35
}

fn default_score_weight_centrality() -> f64 {
    0.30
}

fn default_score_weight_shape() -> f64 {
    0.20
}

fn default_score_weight_confidence() -> f64 {
    0.15
}

fn default_min_object_confidence() -> f64 {
    0.2
}

fn default_calibrated_confidence() -> f64 {
    0.9
}

fn default_uncalibrated_confidence() -> f64 {
    0.3
}

fn default_algorithm_uncertainty() -> f64 {
    0.05
}

fn default_frame_timeout_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    2
}

fn default_queue_capacity() -> usize {
    10
}

fn default_parallel() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CamMeasureError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| CamMeasureError::ConfigLoad {
            source: e,
            path: path.to_path_buf(),
        })?;

        Ok(config)
    }

    /// Create default configuration
    pub fn default() -> Self {
        Self {
            input_path: default_input_path(),
            output_base_dir: default_output_base_dir(),
            luminance_weights: LuminanceWeights::Bt709,
            clahe_enabled: true,
            clahe_tile_grid: 8,
            clahe_clip_limit: 2.0,
            denoise_sigma: 1.0,
            bilateral_enabled: false,
            bilateral_sigma_space: 3.0,
            bilateral_sigma_range: 25.0,
            gradient_operator: GradientOperator::Sobel,
            canny_low_threshold: 0.0,
            canny_high_threshold: 0.0,
            adaptive_high_percentile: 0.9,
            adaptive_low_ratio: 0.4,
            fusion_sigmas: default_fusion_sigmas(),
            fusion_mode: FusionMode::Majority,
            laplacian_pass: false,
            laplacian_threshold: 12.0,
            morph_kernel_shape: KernelShape::Disk,
            morph_close_size: 5,
            morph_open_size: 3,
            fill_holes: true,
            marker_min_depth: 3.0,
            gradient_barrier: 24.0,
            region_min_area_fraction: 0.001,
            region_max_area_fraction: 0.8,
            region_min_aspect: 0.1,
            region_max_aspect: 10.0,
            region_min_extent: 0.3,
            simplify_epsilon: 1.5,
            max_contour_points: 10_000,
            score_weight_size: 0.35,
            score_weight_centrality: 0.30,
            score_weight_shape: 0.20,
            score_weight_confidence: 0.15,
            min_object_confidence: 0.2,
            calibrated_confidence: 0.9,
            uncalibrated_confidence: 0.3,
            algorithm_uncertainty: 0.05,
            frame_timeout_ms: 500,
            max_retries: 2,
            queue_capacity: 10,
            use_parallel: true,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.clahe_tile_grid == 0 || self.clahe_tile_grid > 64 {
            return Err(CamMeasureError::Config(
                "clahe_tile_grid must be between 1 and 64".to_string(),
            ));
        }

        if self.clahe_clip_limit < 1.0 {
            return Err(CamMeasureError::Config(
                "clahe_clip_limit must be >= 1.0".to_string(),
            ));
        }

        if self.denoise_sigma < 0.0 {
            return Err(CamMeasureError::Config(
                "denoise_sigma must be >= 0.0".to_string(),
            ));
        }

        if self.bilateral_sigma_space <= 0.0 || self.bilateral_sigma_range <= 0.0 {
            return Err(CamMeasureError::Config(
                "bilateral sigmas must be > 0.0".to_string(),
            ));
        }

        if self.canny_low_threshold < 0.0 || self.canny_high_threshold < 0.0 {
            return Err(CamMeasureError::Config(
                "canny thresholds must be >= 0.0".to_string(),
            ));
        }

        if self.canny_high_threshold > 0.0 && self.canny_low_threshold > self.canny_high_threshold {
            return Err(CamMeasureError::Config(
                "canny_low_threshold must be <= canny_high_threshold".to_string(),
            ));
        }

        if self.adaptive_high_percentile <= 0.0 || self.adaptive_high_percentile >= 1.0 {
            return Err(CamMeasureError::Config(
                "adaptive_high_percentile must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.adaptive_low_ratio <= 0.0 || self.adaptive_low_ratio >= 1.0 {
            return Err(CamMeasureError::Config(
                "adaptive_low_ratio must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.fusion_sigmas.is_empty() || self.fusion_sigmas.len() > 5 {
            return Err(CamMeasureError::Config(
                "fusion_sigmas must contain between 1 and 5 entries".to_string(),
            ));
        }

        if self.fusion_sigmas.iter().any(|s| *s < 0.0) {
            return Err(CamMeasureError::Config(
                "fusion_sigmas entries must be >= 0.0".to_string(),
            ));
        }

        if self.laplacian_threshold <= 0.0 {
            return Err(CamMeasureError::Config(
                "laplacian_threshold must be > 0.0".to_string(),
            ));
        }

        if self.morph_close_size == 0 || self.morph_open_size == 0 {
            return Err(CamMeasureError::Config(
                "morphology kernel sizes must be > 0".to_string(),
            ));
        }

        if self.marker_min_depth <= 0.0 {
            return Err(CamMeasureError::Config(
                "marker_min_depth must be > 0.0".to_string(),
            ));
        }

        if self.gradient_barrier <= 0.0 {
            return Err(CamMeasureError::Config(
                "gradient_barrier must be > 0.0".to_string(),
            ));
        }

        if self.region_min_area_fraction <= 0.0
            || self.region_min_area_fraction >= self.region_max_area_fraction
        {
            return Err(CamMeasureError::Config(
                "region_min_area_fraction must be > 0.0 and < region_max_area_fraction".to_string(),
            ));
        }

        if self.region_max_area_fraction > 1.0 {
            return Err(CamMeasureError::Config(
                "region_max_area_fraction must be <= 1.0".to_string(),
            ));
        }

        if self.region_min_aspect <= 0.0 || self.region_min_aspect >= self.region_max_aspect {
            return Err(CamMeasureError::Config(
                "region_min_aspect must be > 0.0 and < region_max_aspect".to_string(),
            ));
        }

        if self.region_min_extent <= 0.0 || self.region_min_extent >= 1.0 {
            return Err(CamMeasureError::Config(
                "region_min_extent must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.simplify_epsilon < 0.0 {
            return Err(CamMeasureError::Config(
                "simplify_epsilon must be >= 0.0".to_string(),
            ));
        }

        if self.max_contour_points < 100 {
            return Err(CamMeasureError::Config(
                "max_contour_points must be >= 100".to_string(),
            ));
        }

        let weight_sum = self.score_weight_size
            + self.score_weight_centrality
            + self.score_weight_shape
            + self.score_weight_confidence;

        if self.score_weight_size < 0.0
            || self.score_weight_centrality < 0.0
            || self.score_weight_shape < 0.0
            || self.score_weight_confidence < 0.0
            || weight_sum <= 0.0
        {
            return Err(CamMeasureError::Config(
                "score weights must be >= 0.0 with a positive sum".to_string(),
            ));
        }

        if self.min_object_confidence < 0.0 || self.min_object_confidence >= 1.0 {
            return Err(CamMeasureError::Config(
                "min_object_confidence must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.calibrated_confidence <= 0.0 || self.calibrated_confidence > 1.0 {
            return Err(CamMeasureError::Config(
                "calibrated_confidence must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.uncalibrated_confidence <= 0.0
            || self.uncalibrated_confidence > self.calibrated_confidence
        {
            return Err(CamMeasureError::Config(
                "uncalibrated_confidence must be > 0.0 and <= calibrated_confidence".to_string(),
            ));
        }

        if self.algorithm_uncertainty < 0.0 || self.algorithm_uncertainty >= 1.0 {
            return Err(CamMeasureError::Config(
                "algorithm_uncertainty must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.frame_timeout_ms == 0 {
            return Err(CamMeasureError::Config(
                "frame_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(CamMeasureError::Config(
                "queue_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CamMeasureError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content).map_err(CamMeasureError::Io)?;

        Ok(())
    }
}
