use std::collections::VecDeque;

use crate::frame::EdgeMap;
use crate::kernels::StructuringElement;

/// Applies morphological dilation to a binary mask
pub fn dilate(mask: &EdgeMap, element: &StructuringElement) -> EdgeMap {
    let width = mask.width as i32;
    let height = mask.height as i32;
    let mut result = EdgeMap::new(mask.width, mask.height);

    for y in 0..height {
        for x in 0..width {
            let mut hit = false;

            // Check if any element pixel overlaps foreground
            'kernel_check: for &(dx, dy) in element.offsets() {
                let img_x = x + dx;
                let img_y = y + dy;

                if img_x >= 0 && img_y >= 0 && img_x < width && img_y < height {
                    if mask.is_set(img_x as u32, img_y as u32) {
                        hit = true;
                        break 'kernel_check;
                    }
                }
            }

            if hit {
                result.set(x as u32, y as u32);
            }
        }
    }

    result
}

/// Applies morphological erosion to a binary mask.
///
/// Pixels whose element footprint leaves the frame erode away, so the mask
/// shrinks at the frame border.
pub fn erode(mask: &EdgeMap, element: &StructuringElement) -> EdgeMap {
    let width = mask.width as i32;
    let height = mask.height as i32;
    let mut result = EdgeMap::new(mask.width, mask.height);

    for y in 0..height {
        for x in 0..width {
            if !mask.is_set(x as u32, y as u32) {
                continue;
            }

            let mut keep = true;

            'kernel_check: for &(dx, dy) in element.offsets() {
                let img_x = x + dx;
                let img_y = y + dy;

                if img_x < 0 || img_y < 0 || img_x >= width || img_y >= height {
                    keep = false;
                    break 'kernel_check;
                }

                if !mask.is_set(img_x as u32, img_y as u32) {
                    keep = false;
                    break 'kernel_check;
                }
            }

            if keep {
                result.set(x as u32, y as u32);
            }
        }
    }

    result
}

/// Apply morphological opening (erosion followed by dilation)
pub fn open(mask: &EdgeMap, element: &StructuringElement) -> EdgeMap {
    dilate(&erode(mask, element), element)
}

/// Apply morphological closing (dilation followed by erosion)
pub fn close(mask: &EdgeMap, element: &StructuringElement) -> EdgeMap {
    erode(&dilate(mask, element), element)
}

/// Fill enclosed background holes.
///
/// Background connected to the frame border through a 4-neighbor flood stays
/// background; every other background pixel is inside some silhouette and
/// becomes foreground.
pub fn fill_holes(mask: &EdgeMap) -> EdgeMap {
    let width = mask.width as i32;
    let height = mask.height as i32;
    let mut outside = vec![false; mask.data.len()];
    let mut queue: VecDeque<(i32, i32)> = VecDeque::new();

    for x in 0..width {
        for &y in &[0, height - 1] {
            let i = (y * width + x) as usize;
            if mask.data[i] == 0 && !outside[i] {
                outside[i] = true;
                queue.push_back((x, y));
            }
        }
    }
    for y in 0..height {
        for &x in &[0, width - 1] {
            let i = (y * width + x) as usize;
            if mask.data[i] == 0 && !outside[i] {
                outside[i] = true;
                queue.push_back((x, y));
            }
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            let nx = x + dx;
            let ny = y + dy;
            if nx < 0 || ny < 0 || nx >= width || ny >= height {
                continue;
            }
            let ni = (ny * width + nx) as usize;
            if mask.data[ni] == 0 && !outside[ni] {
                outside[ni] = true;
                queue.push_back((nx, ny));
            }
        }
    }

    let mut result = EdgeMap::new(mask.width, mask.height);
    for (i, out) in outside.iter().enumerate() {
        if mask.data[i] != 0 || !out {
            result.data[i] = crate::frame::FOREGROUND;
        }
    }

    result
}
