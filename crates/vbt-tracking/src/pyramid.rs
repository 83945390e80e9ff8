//! Image pyramid utilities for multi-scale tracking.

use rayon::prelude::*;
use vbt_core::RasterFrame;

/// Levels smaller than this on either side are not built.
const MIN_LEVEL_SIZE: u32 = 8;

/// A grayscale image stored as f32 values [0, 1].
#[derive(Debug, Clone)]
pub struct GrayImage {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl GrayImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0.0; (width * height) as usize],
            width,
            height,
        }
    }

    /// Luma of an RGBA frame (BT.601 weights).
    pub fn from_frame(frame: &RasterFrame) -> Self {
        rgba_to_gray(frame.pixels(), frame.width(), frame.height())
    }

    #[inline]
    pub fn get(&self, x: i32, y: i32) -> f32 {
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        self.data[(y * self.width + x) as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, val: f32) {
        if x < self.width && y < self.height {
            self.data[(y * self.width + x) as usize] = val;
        }
    }

    /// Bilinear sample with edge clamping.
    #[inline]
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x = x.clamp(0.0, (self.width - 1) as f32);
        let y = y.clamp(0.0, (self.height - 1) as f32);
        let x0 = x.floor() as i32;
        let y0 = y.floor() as i32;
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let top = self.get(x0, y0) * (1.0 - fx) + self.get(x0 + 1, y0) * fx;
        let bottom = self.get(x0, y0 + 1) * (1.0 - fx) + self.get(x0 + 1, y0 + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 2x2 box average, rounding odd sizes up.
    fn half(&self) -> Self {
        let nw = self.width.div_ceil(2);
        let nh = self.height.div_ceil(2);
        let mut level = GrayImage::new(nw, nh);
        level
            .data
            .par_chunks_mut(nw as usize)
            .enumerate()
            .for_each(|(y, row)| {
                let sy = (y * 2) as i32;
                for (x, out) in row.iter_mut().enumerate() {
                    let sx = (x * 2) as i32;
                    *out = (self.get(sx, sy)
                        + self.get(sx + 1, sy)
                        + self.get(sx, sy + 1)
                        + self.get(sx + 1, sy + 1))
                        * 0.25;
                }
            });
        level
    }
}

/// One pyramid level with its spatial gradients.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub image: GrayImage,
    pub grad_x: GrayImage,
    pub grad_y: GrayImage,
}

impl PyramidLevel {
    fn new(image: GrayImage) -> Self {
        let (grad_x, grad_y) = compute_gradients(&image);
        Self {
            image,
            grad_x,
            grad_y,
        }
    }
}

/// Multi-scale image pyramid. Level 0 is full resolution.
#[derive(Debug, Clone)]
pub struct ImagePyramid {
    pub levels: Vec<PyramidLevel>,
}

impl ImagePyramid {
    /// Build up to `num_levels` levels; stops early when a level gets too small.
    pub fn build(gray: GrayImage, num_levels: u32) -> Self {
        let mut images = vec![gray];
        while (images.len() as u32) < num_levels.max(1) {
            let Some(prev) = images.last() else { break };
            if prev.width / 2 < MIN_LEVEL_SIZE || prev.height / 2 < MIN_LEVEL_SIZE {
                break;
            }
            let next = prev.half();
            images.push(next);
        }
        Self {
            levels: images.into_iter().map(PyramidLevel::new).collect(),
        }
    }

    pub fn from_frame(frame: &RasterFrame, num_levels: u32) -> Self {
        Self::build(GrayImage::from_frame(frame), num_levels)
    }

    /// Full-resolution level.
    pub fn base(&self) -> &PyramidLevel {
        &self.levels[0]
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.levels[0].image.dimensions()
    }
}

/// Convert RGBA u8 frame data to a grayscale image.
pub fn rgba_to_gray(rgba: &[u8], w: u32, h: u32) -> GrayImage {
    let mut gray = GrayImage::new(w, h);
    gray.data
        .par_iter_mut()
        .zip(rgba.par_chunks_exact(4))
        .for_each(|(out, px)| {
            *out = (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32) / 255.0;
        });
    gray
}

/// Compute spatial gradients (Ix, Iy) using central differences.
pub fn compute_gradients(img: &GrayImage) -> (GrayImage, GrayImage) {
    let mut ix = GrayImage::new(img.width, img.height);
    let mut iy = GrayImage::new(img.width, img.height);
    let w = img.width as usize;
    ix.data
        .par_chunks_mut(w)
        .zip(iy.data.par_chunks_mut(w))
        .enumerate()
        .for_each(|(y, (row_x, row_y))| {
            let y = y as i32;
            for x in 0..w {
                let xi = x as i32;
                row_x[x] = (img.get(xi + 1, y) - img.get(xi - 1, y)) * 0.5;
                row_y[x] = (img.get(xi, y + 1) - img.get(xi, y - 1)) * 0.5;
            }
        });
    (ix, iy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray_image() {
        let mut img = GrayImage::new(4, 4);
        img.set(2, 3, 0.75);
        assert!((img.get(2, 3) - 0.75).abs() < 0.001);
        let _ = img.get(-1, -1);
        let _ = img.get(100, 100);
    }

    #[test]
    fn test_rgba_to_gray() {
        let rgba = [255, 255, 255, 255, 0, 0, 0, 255];
        let gray = rgba_to_gray(&rgba, 2, 1);
        assert!((gray.data[0] - 1.0).abs() < 0.01);
        assert!(gray.data[1].abs() < 0.01);
    }

    #[test]
    fn test_bilinear_sample() {
        let mut img = GrayImage::new(2, 2);
        img.set(1, 0, 1.0);
        img.set(1, 1, 1.0);
        assert!((img.sample(0.25, 0.5) - 0.25).abs() < 1e-6);
        assert!((img.sample(5.0, 5.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_pyramid_build() {
        let img = GrayImage::new(64, 64);
        let pyr = ImagePyramid::build(img, 3);
        assert_eq!(pyr.levels.len(), 3);
        assert_eq!(pyr.levels[1].image.width, 32);
        assert_eq!(pyr.levels[2].image.width, 16);
    }

    #[test]
    fn test_pyramid_stops_when_small() {
        let pyr = ImagePyramid::build(GrayImage::new(20, 20), 4);
        assert_eq!(pyr.levels.len(), 2);
    }

    #[test]
    fn test_gradients() {
        let mut img = GrayImage::new(8, 8);
        for y in 0..8u32 {
            for x in 0..8u32 {
                img.set(x, y, x as f32 / 7.0);
            }
        }
        let (ix, iy) = compute_gradients(&img);
        assert!(ix.get(4, 4) > 0.0);
        assert!(iy.get(4, 4).abs() < 1e-6);
    }
}
