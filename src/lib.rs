// src/lib.rs - Library interface for CamMeasure

pub mod config;
pub mod contour;
pub mod edge_detection;
pub mod errors;
pub mod feature_extraction;
pub mod frame;
pub mod image_io;
pub mod kernels;
pub mod measurement;
pub mod morphology;
pub mod output;
pub mod pipeline;
pub mod preprocess;
pub mod scheduler;
pub mod segmentation;

// Re-export commonly used types and functions
pub use errors::{CamMeasureError, Result};
pub use config::Config;
pub use frame::{EdgeMap, FrameBuffer, GrayscaleBuffer};
pub use measurement::{
    CalibrationData,
    DetectedObject,
    GeometricProperties,
    MeasurementUnit,
    ObjectDimensions,
};
pub use pipeline::{
    DebugArtifacts,
    Detection,
    DetectionReport,
    MeasurePipeline,
    ObjectDetector,
    PipelineStage,
};
pub use image_io::{InputFrame, get_png_files_in_dir, load_frame, save_grayscale, save_mask};
pub use scheduler::{FrameJob, FrameScheduler, JobOutcome, JobPriority, SubmitOutcome};

// Re-export the geometry stages for direct use
pub use preprocess::{preprocess, to_grayscale};
pub use edge_detection::{detect_edges, EdgeDetection, GradientField};
pub use morphology::{close, dilate, erode, fill_holes, open};
pub use segmentation::{segment, BoundingBox, LabelMap, Region};
pub use contour::{convex_hull, extract_contour, shoelace_area, simplify_polyline, Contour};
pub use feature_extraction::{rank_candidates, CandidateFeatures, ScoredCandidate, TextureFeatures};
pub use kernels::{GaussianKernel, KernelCache, StructuringElement};
pub use output::{write_measurements_csv, write_report_json};
