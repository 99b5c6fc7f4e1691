use std::fs;
use std::path::Path;
use csv::Writer;

use crate::errors::{CamMeasureError, Result};
use crate::measurement::DetectedObject;
use crate::pipeline::DetectionReport;

/// Write measured objects to CSV, one row per object in output order
pub fn write_measurements_csv<P: AsRef<Path>>(
    objects: &[DetectedObject],
    output_dir: P,
    filename: &str,
) -> Result<()> {
    let output_path = output_dir.as_ref().join("measurements").join(format!("{}.csv", filename));

    // Create directory if it doesn't exist
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|e| CamMeasureError::Io(e))?;
    }

    let mut writer = Writer::from_path(&output_path)
        .map_err(|e| CamMeasureError::CsvOutput(e))?;

    writer.write_record(&[
        "File",
        "Rank",
        "Confidence",
        "Unit",
        "Width",
        "Height",
        "Area",
        "Perimeter",
        "Depth",
        "Volume",
        "Surface_Area",
        "Circularity",
        "Solidity",
        "Aspect_Ratio",
    ]).map_err(|e| CamMeasureError::CsvOutput(e))?;

    for (rank, object) in objects.iter().enumerate() {
        writer.write_record(&[
            filename.to_string(),
            (rank + 1).to_string(),
            format!("{:.6}", object.confidence),
            object.dimensions.unit.as_str().to_string(),
            format!("{:.6}", object.dimensions.width),
            format!("{:.6}", object.dimensions.height),
            format!("{:.6}", object.dimensions.area),
            format!("{:.6}", object.dimensions.perimeter),
            format!("{:.6}", object.depth.unwrap_or(0.0)),
            format!("{:.6}", object.volume.unwrap_or(0.0)),
            format!("{:.6}", object.surface_area.unwrap_or(0.0)),
            format!("{:.6}", object.geometric.circularity),
            format!("{:.6}", object.geometric.solidity),
            format!("{:.6}", object.geometric.aspect_ratio),
        ]).map_err(|e| CamMeasureError::CsvOutput(e))?;
    }

    // Flush writer
    writer.flush().map_err(|e| CamMeasureError::CsvOutput(csv::Error::from(e)))?;

    Ok(())
}

/// Write the per-frame telemetry report as pretty JSON
pub fn write_report_json<P: AsRef<Path>>(
    report: &DetectionReport,
    output_dir: P,
    filename: &str,
) -> Result<()> {
    let output_path = output_dir.as_ref().join("reports").join(format!("{}.json", filename));

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|e| CamMeasureError::Io(e))?;
    }

    let json = serde_json::to_string_pretty(report)?;
    fs::write(&output_path, json).map_err(|e| CamMeasureError::Io(e))?;

    Ok(())
}
