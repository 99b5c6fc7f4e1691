use std::path::{Path, PathBuf};
use std::fs;
use image::{GrayImage, ImageFormat};

use crate::errors::{CamMeasureError, Result};
use crate::frame::{EdgeMap, FrameBuffer, GrayscaleBuffer};

/// Represents an input frame with its metadata
pub struct InputFrame {
    pub frame: FrameBuffer,
    pub path: PathBuf,
    pub filename: String,
}

/// Get all PNG files from a directory (recursively)
pub fn get_png_files_in_dir<P: AsRef<Path>>(dir_path: P) -> Result<Vec<PathBuf>> {
    let dir_path = dir_path.as_ref();

    if !dir_path.exists() {
        return Err(CamMeasureError::InvalidPath(dir_path.to_path_buf()));
    }

    if !dir_path.is_dir() {
        return Err(CamMeasureError::Config(format!(
            "{} is not a directory", dir_path.display()
        )));
    }

    let mut png_files = Vec::new();
    find_png_files_recursive(dir_path, &mut png_files)?;

    Ok(png_files)
}

/// Helper function to recursively search for PNG files
fn find_png_files_recursive(dir_path: &Path, result: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir_path)
        .map_err(|e| CamMeasureError::Io(e))?;

    for entry in entries {
        let entry = entry.map_err(|e| CamMeasureError::Io(e))?;
        let path = entry.path();

        if path.is_dir() {
            // Recursively search subdirectories
            find_png_files_recursive(&path, result)?;
        } else if path.is_file() {
            // Check if it's a PNG file
            if let Some(ext) = path.extension() {
                if ext.to_ascii_lowercase() == "png" {
                    result.push(path);
                }
            }
        }
    }

    Ok(())
}

/// Load a PNG frame as interleaved RGBA
pub fn load_frame<P: AsRef<Path>>(path: P) -> Result<InputFrame> {
    let path = path.as_ref();

    // Get filename without extension
    let filename = path.file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CamMeasureError::InvalidPath(path.to_path_buf()))?
        .to_string();

    let img = image::open(path)
        .map_err(|e| CamMeasureError::Image(e))?;

    // Convert to RGBA
    let rgba = img.to_rgba8();
    let frame = FrameBuffer::from_rgba_image(&rgba)?;

    Ok(InputFrame {
        frame,
        path: path.to_path_buf(),
        filename,
    })
}

/// Save a grayscale working buffer as a PNG
pub fn save_grayscale<P: AsRef<Path>>(gray: &GrayscaleBuffer, path: P) -> Result<()> {
    let img = GrayImage::from_raw(gray.width, gray.height, gray.data.clone())
        .ok_or_else(|| CamMeasureError::Other("grayscale buffer length mismatch".to_string()))?;
    img.save_with_format(path, ImageFormat::Png)
        .map_err(|e| CamMeasureError::Image(e))?;

    Ok(())
}

/// Save a binary mask as a black-and-white PNG
pub fn save_mask<P: AsRef<Path>>(mask: &EdgeMap, path: P) -> Result<()> {
    let img = GrayImage::from_raw(mask.width, mask.height, mask.data.clone())
        .ok_or_else(|| CamMeasureError::Other("mask buffer length mismatch".to_string()))?;
    img.save_with_format(path, ImageFormat::Png)
        .map_err(|e| CamMeasureError::Image(e))?;

    Ok(())
}
