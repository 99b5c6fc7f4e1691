use std::collections::VecDeque;

use serde::Serialize;

use crate::config::Config;
use crate::frame::{EdgeMap, GrayscaleBuffer};

const SQRT2: f32 = std::f32::consts::SQRT_2;

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

/// A labeled blob of silhouette pixels
#[derive(Debug, Clone)]
pub struct Region {
    pub id: u32,
    pub pixel_count: u32,
    pub bounding_box: BoundingBox,
    pub centroid: (f64, f64),
}

impl Region {
    /// Filled fraction of the bounding box
    pub fn extent(&self) -> f64 {
        let area = self.bounding_box.area();
        if area == 0 {
            return 0.0;
        }
        self.pixel_count as f64 / area as f64
    }
}

/// Per-pixel region labels; 0 is background
#[derive(Debug, Clone)]
pub struct LabelMap {
    pub width: u32,
    pub height: u32,
    pub labels: Vec<u32>,
}

impl LabelMap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            labels: vec![0; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn idx(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u32 {
        self.labels[self.idx(x, y)]
    }
}

/// A watershed seed at a local depth maximum
#[derive(Debug, Clone, Copy)]
pub struct Marker {
    pub x: u32,
    pub y: u32,
    pub depth: f32,
}

/// Two-pass chamfer distance transform.
///
/// Foreground pixels receive their approximate distance to the nearest
/// background pixel (weight 1 for axis steps, sqrt(2) for diagonals).
/// Everything outside the frame counts as background.
pub fn distance_transform(mask: &EdgeMap) -> Vec<f32> {
    let width = mask.width as i32;
    let height = mask.height as i32;
    let len = mask.data.len();

    let mut dist = vec![0.0f32; len];
    for i in 0..len {
        if mask.data[i] != 0 {
            dist[i] = f32::INFINITY;
        }
    }

    let at = |dist: &[f32], x: i32, y: i32| -> f32 {
        if x < 0 || y < 0 || x >= width || y >= height {
            0.0
        } else {
            dist[(y * width + x) as usize]
        }
    };

    // Forward pass: upper-left causal neighbors
    for y in 0..height {
        for x in 0..width {
            let i = (y * width + x) as usize;
            if dist[i] == 0.0 {
                continue;
            }
            let mut d = dist[i];
            d = d.min(at(&dist, x - 1, y) + 1.0);
            d = d.min(at(&dist, x, y - 1) + 1.0);
            d = d.min(at(&dist, x - 1, y - 1) + SQRT2);
            d = d.min(at(&dist, x + 1, y - 1) + SQRT2);
            dist[i] = d;
        }
    }

    // Backward pass: lower-right causal neighbors
    for y in (0..height).rev() {
        for x in (0..width).rev() {
            let i = (y * width + x) as usize;
            if dist[i] == 0.0 {
                continue;
            }
            let mut d = dist[i];
            d = d.min(at(&dist, x + 1, y) + 1.0);
            d = d.min(at(&dist, x, y + 1) + 1.0);
            d = d.min(at(&dist, x + 1, y + 1) + SQRT2);
            d = d.min(at(&dist, x - 1, y + 1) + SQRT2);
            dist[i] = d;
        }
    }

    dist
}

/// Collect watershed markers as local maxima of the distance field,
/// deepest first.
///
/// A shallower maximum within the claimed radius (the depth) of an already
/// accepted marker is skipped, which collapses medial-axis plateaus into a
/// single seed per basin.
pub fn find_markers(dist: &[f32], width: u32, height: u32, min_depth: f64) -> Vec<Marker> {
    let w = width as i32;
    let h = height as i32;
    let mut candidates: Vec<Marker> = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let d = dist[(y * w + x) as usize];
            if (d as f64) < min_depth {
                continue;
            }

            let mut is_max = true;
            'neighbors: for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = x + dx;
                    let ny = y + dy;
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    if dist[(ny * w + nx) as usize] > d {
                        is_max = false;
                        break 'neighbors;
                    }
                }
            }

            if is_max {
                candidates.push(Marker {
                    x: x as u32,
                    y: y as u32,
                    depth: d,
                });
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.depth
            .partial_cmp(&a.depth)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.y.cmp(&b.y))
            .then(a.x.cmp(&b.x))
    });

    let mut markers: Vec<Marker> = Vec::new();
    for cand in candidates {
        let mut suppressed = false;
        for kept in &markers {
            let dx = cand.x as f32 - kept.x as f32;
            let dy = cand.y as f32 - kept.y as f32;
            if dx * dx + dy * dy <= kept.depth * kept.depth {
                suppressed = true;
                break;
            }
        }
        if !suppressed {
            markers.push(cand);
        }
    }

    markers
}

/// Grow a region from each marker via 8-connected BFS over foreground.
///
/// A neighbor joins only when its intensity step from the current pixel stays
/// within `gradient_barrier`, so internal contrast boundaries stop the flood.
/// Foreground never reached by any marker is flooded afterwards with fresh
/// labels, which is also the plain connected-component path when no marker
/// clears the depth bar.
pub fn grow_regions(
    mask: &EdgeMap,
    gray: &GrayscaleBuffer,
    markers: &[Marker],
    gradient_barrier: f64,
) -> LabelMap {
    let width = mask.width as i32;
    let height = mask.height as i32;
    let mut labels = LabelMap::new(mask.width, mask.height);
    let mut next_label = 1u32;

    let mut queue: VecDeque<(i32, i32)> = VecDeque::new();

    for marker in markers {
        let start = (marker.y as i32 * width + marker.x as i32) as usize;
        if mask.data[start] == 0 || labels.labels[start] != 0 {
            continue;
        }

        labels.labels[start] = next_label;
        queue.push_back((marker.x as i32, marker.y as i32));

        while let Some((x, y)) = queue.pop_front() {
            let current = gray.data[(y * width + x) as usize] as f64;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = x + dx;
                    let ny = y + dy;
                    if nx < 0 || ny < 0 || nx >= width || ny >= height {
                        continue;
                    }
                    let ni = (ny * width + nx) as usize;
                    if mask.data[ni] == 0 || labels.labels[ni] != 0 {
                        continue;
                    }
                    let step = (gray.data[ni] as f64 - current).abs();
                    if step > gradient_barrier {
                        continue;
                    }
                    labels.labels[ni] = next_label;
                    queue.push_back((nx, ny));
                }
            }
        }

        next_label += 1;
    }

    // Flood whatever foreground the markers never reached
    for y in 0..height {
        for x in 0..width {
            let i = (y * width + x) as usize;
            if mask.data[i] == 0 || labels.labels[i] != 0 {
                continue;
            }

            labels.labels[i] = next_label;
            queue.push_back((x, y));
            while let Some((cx, cy)) = queue.pop_front() {
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = cx + dx;
                        let ny = cy + dy;
                        if nx < 0 || ny < 0 || nx >= width || ny >= height {
                            continue;
                        }
                        let ni = (ny * width + nx) as usize;
                        if mask.data[ni] != 0 && labels.labels[ni] == 0 {
                            labels.labels[ni] = next_label;
                            queue.push_back((nx, ny));
                        }
                    }
                }
            }
            next_label += 1;
        }
    }

    labels
}

/// Accumulate pixel count, bounding box and centroid per label
pub fn extract_regions(labels: &LabelMap) -> Vec<Region> {
    struct Acc {
        count: u32,
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
        sum_x: f64,
        sum_y: f64,
    }

    let mut accs: Vec<Option<Acc>> = Vec::new();

    for y in 0..labels.height {
        for x in 0..labels.width {
            let label = labels.get(x, y);
            if label == 0 {
                continue;
            }
            let idx = label as usize - 1;
            if accs.len() <= idx {
                accs.resize_with(idx + 1, || None);
            }
            let acc = accs[idx].get_or_insert(Acc {
                count: 0,
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                sum_x: 0.0,
                sum_y: 0.0,
            });
            acc.count += 1;
            acc.min_x = acc.min_x.min(x);
            acc.min_y = acc.min_y.min(y);
            acc.max_x = acc.max_x.max(x);
            acc.max_y = acc.max_y.max(y);
            acc.sum_x += x as f64;
            acc.sum_y += y as f64;
        }
    }

    accs.into_iter()
        .enumerate()
        .filter_map(|(idx, acc)| {
            acc.map(|a| Region {
                id: idx as u32 + 1,
                pixel_count: a.count,
                bounding_box: BoundingBox {
                    x: a.min_x,
                    y: a.min_y,
                    width: a.max_x - a.min_x + 1,
                    height: a.max_y - a.min_y + 1,
                },
                centroid: (a.sum_x / a.count as f64, a.sum_y / a.count as f64),
            })
        })
        .collect()
}

/// Drop regions that cannot be the measured object: too small, frame-filling,
/// extreme aspect ratio or mostly-empty bounding boxes.
pub fn filter_regions(regions: Vec<Region>, frame_area: u64, config: &Config) -> Vec<Region> {
    regions
        .into_iter()
        .filter(|region| {
            let fraction = region.pixel_count as f64 / frame_area as f64;
            if fraction < config.region_min_area_fraction
                || fraction > config.region_max_area_fraction
            {
                return false;
            }

            let aspect = region.bounding_box.aspect_ratio();
            if aspect < config.region_min_aspect || aspect > config.region_max_aspect {
                return false;
            }

            if region.extent() < config.region_min_extent {
                return false;
            }

            true
        })
        .collect()
}

/// Run the full segmentation chain over a silhouette mask
pub fn segment(mask: &EdgeMap, gray: &GrayscaleBuffer, config: &Config) -> (LabelMap, Vec<Region>) {
    let dist = distance_transform(mask);
    let markers = find_markers(&dist, mask.width, mask.height, config.marker_min_depth);
    let labels = grow_regions(mask, gray, &markers, config.gradient_barrier);
    let regions = extract_regions(&labels);
    (labels, regions)
}
