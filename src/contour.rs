use nalgebra::Point2;

use crate::segmentation::{LabelMap, Region};

/// Direction vectors for Moore-Neighbor contour tracing
static MOORE_NEIGHBORHOOD: [(i32, i32); 8] = [
    (1, 0),   // right
    (1, 1),   // down-right
    (0, 1),   // down
    (-1, 1),  // down-left
    (-1, 0),  // left
    (-1, -1), // up-left
    (0, -1),  // up
    (1, -1),  // up-right
];

/// Closed outline of a region with its derived shape scalars
#[derive(Debug, Clone)]
pub struct Contour {
    pub points: Vec<Point2<f64>>,
    pub area: f64,
    pub perimeter: f64,
    pub circularity: f64,
    pub solidity: f64,
    pub aspect_ratio: f64,
    pub hu_moments: [f64; 7],
    pub confidence: f64,
}

/// Centralized geometric moments of a region, up to third order
#[derive(Debug, Clone, Copy)]
pub struct RawMoments {
    pub m00: f64,
    pub mu20: f64,
    pub mu11: f64,
    pub mu02: f64,
    pub mu30: f64,
    pub mu21: f64,
    pub mu12: f64,
    pub mu03: f64,
}

/// Trace the external boundary of one labeled region.
///
/// Moore-Neighbor walk with a visited set: starting at the first border pixel
/// in scan order, each step searches the 8-neighborhood from the backtrack
/// direction so the walk hugs the outside of the region. A degenerate mask
/// cannot loop forever because every pixel is visited at most once and the
/// point count is capped.
pub fn trace_region_boundary(
    labels: &LabelMap,
    region: &Region,
    max_points: usize,
) -> Vec<(u32, u32)> {
    let width = labels.width;
    let height = labels.height;
    let id = region.id;
    let mut contour = Vec::new();

    let mut visited = vec![false; width as usize * height as usize];

    let in_region = |x: i32, y: i32| -> bool {
        if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
            return false;
        }
        labels.get(x as u32, y as u32) == id
    };

    // Only border pixels may join the walk, otherwise a closed loop would
    // continue into the region interior
    let is_border = |x: i32, y: i32| -> bool {
        if !in_region(x, y) {
            return false;
        }
        MOORE_NEIGHBORHOOD
            .iter()
            .any(|&(dx, dy)| !in_region(x + dx, y + dy))
    };

    // Find the first border pixel of this region in scan order
    let bbox = &region.bounding_box;
    let mut start_point = None;

    'outer: for y in bbox.y..bbox.y + bbox.height {
        for x in bbox.x..bbox.x + bbox.width {
            if is_border(x as i32, y as i32) {
                start_point = Some((x, y));
                break 'outer;
            }
        }
    }

    let (start_x, start_y) = match start_point {
        Some(point) => point,
        None => return contour,
    };

    contour.push((start_x, start_y));
    visited[(start_y * width + start_x) as usize] = true;

    let mut current = (start_x, start_y);
    let mut backtrack_idx = 0;

    loop {
        let mut found_next = false;

        // Search the Moore neighborhood starting from the backtrack direction
        for i in 0..8 {
            let idx = (backtrack_idx + i) % 8;
            let (dx, dy) = MOORE_NEIGHBORHOOD[idx];
            let nx = current.0 as i32 + dx;
            let ny = current.1 as i32 + dy;

            if is_border(nx, ny) {
                let next_x = nx as u32;
                let next_y = ny as u32;
                if visited[(next_y * width + next_x) as usize] {
                    continue;
                }

                contour.push((next_x, next_y));
                visited[(next_y * width + next_x) as usize] = true;

                current = (next_x, next_y);
                backtrack_idx = (idx + 4) % 8;

                found_next = true;
                break;
            }
        }

        if contour.len() >= max_points {
            log::warn!(
                "contour of region {} exceeded {} points, truncating",
                id,
                max_points
            );
            break;
        }

        if !found_next {
            break;
        }
    }

    contour
}

/// Perpendicular distance from a point to the segment (a, b)
fn segment_distance(p: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let abx = b.x - a.x;
    let aby = b.y - a.y;
    let len2 = abx * abx + aby * aby;
    if len2 <= f64::EPSILON {
        let dx = p.x - a.x;
        let dy = p.y - a.y;
        return (dx * dx + dy * dy).sqrt();
    }
    // Distance to the infinite line; the chord endpoints are always retained
    ((p.x - a.x) * aby - (p.y - a.y) * abx).abs() / len2.sqrt()
}

/// Douglas-Peucker simplification with an explicit stack.
///
/// Never yields more points than it was given; with epsilon 0 only exactly
/// collinear interior points drop, and re-running with the same epsilon is a
/// no-op.
pub fn simplify_polyline(points: &[Point2<f64>], epsilon: f64) -> Vec<Point2<f64>> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0usize, points.len() - 1)];
    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }

        let mut max_dist = 0.0;
        let mut max_idx = first;
        for i in first + 1..last {
            let d = segment_distance(&points[i], &points[first], &points[last]);
            if d > max_dist {
                max_dist = d;
                max_idx = i;
            }
        }

        if max_dist > epsilon {
            keep[max_idx] = true;
            stack.push((first, max_idx));
            stack.push((max_idx, last));
        }
    }

    points
        .iter()
        .zip(keep.iter())
        .filter_map(|(p, k)| if *k { Some(*p) } else { None })
        .collect()
}

/// Simplify a closed ring; the seam point is pinned so the ring stays closed
pub fn simplify_closed(points: &[Point2<f64>], epsilon: f64) -> Vec<Point2<f64>> {
    if points.len() <= 3 {
        return points.to_vec();
    }

    let mut ring: Vec<Point2<f64>> = points.to_vec();
    ring.push(points[0]);
    let mut simplified = simplify_polyline(&ring, epsilon);
    simplified.pop();
    simplified
}

/// Polygon area by the shoelace formula
pub fn shoelace_area(points: &[Point2<f64>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..points.len() {
        let a = &points[i];
        let b = &points[(i + 1) % points.len()];
        sum += a.x * b.y - b.x * a.y;
    }
    sum.abs() / 2.0
}

/// Closed polygon perimeter
pub fn polygon_perimeter(points: &[Point2<f64>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..points.len() {
        let a = &points[i];
        let b = &points[(i + 1) % points.len()];
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        total += (dx * dx + dy * dy).sqrt();
    }
    total
}

/// Isoperimetric ratio 4*pi*A / P^2, capped at 1 for a perfect circle
pub fn circularity(area: f64, perimeter: f64) -> f64 {
    if perimeter <= 0.0 {
        return 0.0;
    }
    (4.0 * std::f64::consts::PI * area / (perimeter * perimeter)).min(1.0)
}

fn cross(o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull by Graham scan, counter-clockwise
pub fn convex_hull(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    if points.len() <= 3 {
        return points.to_vec();
    }

    // Pivot: lowest y, then lowest x
    let mut pivot = points[0];
    for p in points {
        if p.y < pivot.y || (p.y == pivot.y && p.x < pivot.x) {
            pivot = *p;
        }
    }

    let mut sorted: Vec<Point2<f64>> = points
        .iter()
        .copied()
        .filter(|p| p.x != pivot.x || p.y != pivot.y)
        .collect();

    sorted.sort_by(|a, b| {
        let c = cross(&pivot, a, b);
        if c > 0.0 {
            std::cmp::Ordering::Less
        } else if c < 0.0 {
            std::cmp::Ordering::Greater
        } else {
            // Collinear with the pivot: nearer point first
            let da = (a.x - pivot.x).powi(2) + (a.y - pivot.y).powi(2);
            let db = (b.x - pivot.x).powi(2) + (b.y - pivot.y).powi(2);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        }
    });

    let mut hull: Vec<Point2<f64>> = vec![pivot];
    for p in sorted {
        while hull.len() >= 2 {
            let o = hull[hull.len() - 2];
            let a = hull[hull.len() - 1];
            if cross(&o, &a, &p) <= 0.0 {
                hull.pop();
            } else {
                break;
            }
        }
        hull.push(p);
    }

    hull
}

/// Centralized geometric moments of a region's pixels up to third order
pub fn region_moments(labels: &LabelMap, region: &Region) -> RawMoments {
    let (cx, cy) = region.centroid;
    let bbox = &region.bounding_box;

    let mut m = RawMoments {
        m00: 0.0,
        mu20: 0.0,
        mu11: 0.0,
        mu02: 0.0,
        mu30: 0.0,
        mu21: 0.0,
        mu12: 0.0,
        mu03: 0.0,
    };

    for y in bbox.y..bbox.y + bbox.height {
        for x in bbox.x..bbox.x + bbox.width {
            if labels.get(x, y) != region.id {
                continue;
            }
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            m.m00 += 1.0;
            m.mu20 += dx * dx;
            m.mu11 += dx * dy;
            m.mu02 += dy * dy;
            m.mu30 += dx * dx * dx;
            m.mu21 += dx * dx * dy;
            m.mu12 += dx * dy * dy;
            m.mu03 += dy * dy * dy;
        }
    }

    m
}

/// Hu's seven invariants from normalized central moments, log-scaled
pub fn hu_from_moments(m: &RawMoments) -> [f64; 7] {
    if m.m00 <= 0.0 {
        return [0.0; 7];
    }

    let n2 = m.m00 * m.m00;
    let n3 = m.m00.powf(2.5);

    let e20 = m.mu20 / n2;
    let e11 = m.mu11 / n2;
    let e02 = m.mu02 / n2;
    let e30 = m.mu30 / n3;
    let e21 = m.mu21 / n3;
    let e12 = m.mu12 / n3;
    let e03 = m.mu03 / n3;

    let h1 = e20 + e02;
    let h2 = (e20 - e02).powi(2) + 4.0 * e11 * e11;
    let h3 = (e30 - 3.0 * e12).powi(2) + (3.0 * e21 - e03).powi(2);
    let h4 = (e30 + e12).powi(2) + (e21 + e03).powi(2);
    let h5 = (e30 - 3.0 * e12)
        * (e30 + e12)
        * ((e30 + e12).powi(2) - 3.0 * (e21 + e03).powi(2))
        + (3.0 * e21 - e03) * (e21 + e03) * (3.0 * (e30 + e12).powi(2) - (e21 + e03).powi(2));
    let h6 = (e20 - e02) * ((e30 + e12).powi(2) - (e21 + e03).powi(2))
        + 4.0 * e11 * (e30 + e12) * (e21 + e03);
    let h7 = (3.0 * e21 - e03)
        * (e30 + e12)
        * ((e30 + e12).powi(2) - 3.0 * (e21 + e03).powi(2))
        - (e30 - 3.0 * e12) * (e21 + e03) * (3.0 * (e30 + e12).powi(2) - (e21 + e03).powi(2));

    let mut hu = [h1, h2, h3, h4, h5, h6, h7];
    for h in hu.iter_mut() {
        // Log scale keeps the wildly different magnitudes comparable
        *h = if h.abs() < 1e-30 {
            0.0
        } else {
            -h.signum() * h.abs().log10()
        };
    }
    hu
}

/// Trace, simplify and describe one region's outline.
///
/// Returns None when the region has no usable boundary. The confidence
/// reflects how well the traced polygon agrees with the labeled pixel count,
/// halved if the trace hit the point cap.
pub fn extract_contour(
    labels: &LabelMap,
    region: &Region,
    epsilon: f64,
    max_points: usize,
) -> Option<Contour> {
    let traced = trace_region_boundary(labels, region, max_points);
    if traced.len() < 3 {
        return None;
    }
    let truncated = traced.len() >= max_points;

    let raw: Vec<Point2<f64>> = traced
        .iter()
        .map(|&(x, y)| Point2::new(x as f64, y as f64))
        .collect();

    let points = simplify_closed(&raw, epsilon);
    if points.len() < 3 {
        return None;
    }

    let area = shoelace_area(&points);
    let perimeter = polygon_perimeter(&points);
    let hull = convex_hull(&points);
    let hull_area = shoelace_area(&hull);
    let solidity = if hull_area > 0.0 {
        (area / hull_area).min(1.0)
    } else {
        0.0
    };

    let pixel_area = region.pixel_count as f64;
    let agreement = if area > 0.0 && pixel_area > 0.0 {
        (area.min(pixel_area) / area.max(pixel_area)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let confidence = if truncated { agreement * 0.5 } else { agreement };

    let moments = region_moments(labels, region);

    Some(Contour {
        points,
        area,
        perimeter,
        circularity: circularity(area, perimeter),
        solidity,
        aspect_ratio: region.bounding_box.aspect_ratio(),
        hu_moments: hu_from_moments(&moments),
        confidence,
    })
}
