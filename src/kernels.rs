use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::KernelShape;

/// A morphology structuring element stored as offsets relative to its center
#[derive(Debug, Clone)]
pub struct StructuringElement {
    pub shape: KernelShape,
    pub size: u32,
    offsets: Vec<(i32, i32)>,
}

impl StructuringElement {
    /// Build an element of the given shape with `size` as its diameter in pixels
    pub fn new(shape: KernelShape, size: u32) -> Self {
        let size = size.max(1);
        let radius = (size as f32) / 2.0;
        let radius_squared = radius * radius;
        let center = (size as i32) / 2;

        let mut offsets = Vec::new();
        for y in 0..size as i32 {
            for x in 0..size as i32 {
                let dx = x - center;
                let dy = y - center;
                let keep = match shape {
                    KernelShape::Disk => (dx * dx + dy * dy) as f32 <= radius_squared,
                    KernelShape::Cross => dx == 0 || dy == 0,
                };
                if keep {
                    offsets.push((dx, dy));
                }
            }
        }

        Self {
            shape,
            size,
            offsets,
        }
    }

    /// Offsets covered by the element, relative to its center
    pub fn offsets(&self) -> &[(i32, i32)] {
        &self.offsets
    }
}

/// Normalized 1D Gaussian taps for separable blurring
#[derive(Debug, Clone)]
pub struct GaussianKernel {
    pub sigma: f64,
    pub radius: i32,
    pub taps: Vec<f64>,
}

impl GaussianKernel {
    /// Build taps for `sigma`; kernel length is 6*sigma rounded up to odd.
    /// A sigma of zero (or below) yields the identity kernel.
    pub fn new(sigma: f64) -> Self {
        if sigma <= 0.0 {
            return Self {
                sigma: 0.0,
                radius: 0,
                taps: vec![1.0],
            };
        }

        let mut len = (6.0 * sigma).round() as i32;
        if len % 2 == 0 {
            len += 1;
        }
        let len = len.max(3);
        let radius = len / 2;

        let denom = 2.0 * sigma * sigma;
        let mut taps = Vec::with_capacity(len as usize);
        let mut sum = 0.0;
        for i in -radius..=radius {
            let x = i as f64;
            let w = (-x * x / denom).exp();
            taps.push(w);
            sum += w;
        }
        for w in taps.iter_mut() {
            *w /= sum;
        }

        Self {
            sigma,
            radius,
            taps,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.radius == 0
    }
}

/// Cache of structuring elements and Gaussian taps keyed by their
/// generating parameters, shared across frames.
#[derive(Debug)]
pub struct KernelCache {
    elements: Mutex<HashMap<(KernelShape, u32), Arc<StructuringElement>>>,
    gaussians: Mutex<HashMap<u64, Arc<GaussianKernel>>>,
}

fn recover<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl KernelCache {
    pub fn new() -> Self {
        Self {
            elements: Mutex::new(HashMap::new()),
            gaussians: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch or build the structuring element for (shape, size)
    pub fn element(&self, shape: KernelShape, size: u32) -> Arc<StructuringElement> {
        let mut cache = recover(&self.elements);
        cache
            .entry((shape, size))
            .or_insert_with(|| Arc::new(StructuringElement::new(shape, size)))
            .clone()
    }

    /// Fetch or build the Gaussian taps for `sigma`
    pub fn gaussian(&self, sigma: f64) -> Arc<GaussianKernel> {
        let mut cache = recover(&self.gaussians);
        cache
            .entry(sigma.to_bits())
            .or_insert_with(|| Arc::new(GaussianKernel::new(sigma)))
            .clone()
    }
}

impl Default for KernelCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn disk_element_covers_expected_offsets() {
        let disk = StructuringElement::new(KernelShape::Disk, 5);
        // A 5 px disk is the 5x5 square minus the four corners
        assert_eq!(disk.offsets().len(), 21);
        assert!(disk.offsets().contains(&(0, 0)));
        assert!(disk.offsets().contains(&(2, 1)));
        assert!(!disk.offsets().contains(&(2, 2)));
    }

    #[test]
    fn cross_element_covers_axes_only() {
        let cross = StructuringElement::new(KernelShape::Cross, 3);
        assert_eq!(cross.offsets().len(), 5);
        assert!(cross.offsets().contains(&(0, -1)));
        assert!(!cross.offsets().contains(&(1, 1)));
    }

    #[test]
    fn gaussian_taps_are_normalized_and_odd() {
        let kernel = GaussianKernel::new(1.4);
        assert_eq!(kernel.taps.len() % 2, 1);
        assert_eq!(kernel.taps.len() as i32, kernel.radius * 2 + 1);
        let sum: f64 = kernel.taps.iter().sum();
        assert_approx_eq!(sum, 1.0, 1e-9);
    }

    #[test]
    fn zero_sigma_is_identity() {
        let kernel = GaussianKernel::new(0.0);
        assert!(kernel.is_identity());
        assert_eq!(kernel.taps, vec![1.0]);
    }

    #[test]
    fn cache_returns_shared_instances() {
        let cache = KernelCache::new();
        let a = cache.element(KernelShape::Disk, 5);
        let b = cache.element(KernelShape::Disk, 5);
        assert!(Arc::ptr_eq(&a, &b));

        let g1 = cache.gaussian(1.4);
        let g2 = cache.gaussian(1.4);
        assert!(Arc::ptr_eq(&g1, &g2));
        let g3 = cache.gaussian(2.0);
        assert!(!Arc::ptr_eq(&g1, &g3));
    }
}
