//! On-the-fly augmentation for training images
//!
//! Each image receives one random affine transform built from rotation,
//! translation, shear and zoom, plus an optional horizontal flip. The
//! transform is inverse-mapped: every output pixel looks up its source
//! position and samples it bilinearly. Source positions outside the image
//! take the nearest edge pixel.
//!
//! Validation and test data are never augmented.

use image::{DynamicImage, Rgb, RgbImage};
use rand::Rng;

/// Ranges for the random affine transform
#[derive(Clone, Debug, PartialEq)]
pub struct AugmentationConfig {
    /// Maximum rotation in degrees (uniform in `[-r, r]`)
    pub rotation_range: f32,
    /// Maximum horizontal shift as a fraction of width
    pub width_shift_range: f32,
    /// Maximum vertical shift as a fraction of height
    pub height_shift_range: f32,
    /// Maximum shear angle in degrees
    pub shear_range: f32,
    /// Zoom factors are drawn independently per axis from `[1 - z, 1 + z]`
    pub zoom_range: f32,
    /// Flip horizontally with probability 0.5
    pub horizontal_flip: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_range: 20.0,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            shear_range: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
        }
    }
}

impl AugmentationConfig {
    /// Disable every transform
    pub fn none() -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
        }
    }

    /// True when no transform can change an image
    pub fn is_identity(&self) -> bool {
        *self == Self::none()
    }
}

/// 2x3 affine matrix mapping output `(x, y)` to source `(x, y)`
#[derive(Clone, Copy, Debug, PartialEq)]
struct Affine {
    m: [[f32; 3]; 2],
}

impl Affine {
    fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    fn linear(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self {
            m: [[a, b, 0.0], [c, d, 0.0]],
        }
    }

    fn translation(tx: f32, ty: f32) -> Self {
        Self {
            m: [[1.0, 0.0, tx], [0.0, 1.0, ty]],
        }
    }

    /// `self ∘ other`: apply `other` first
    fn then(self, other: Affine) -> Affine {
        let a = &self.m;
        let b = &other.m;
        let mut out = [[0.0f32; 3]; 2];
        for (r, row) in out.iter_mut().enumerate() {
            row[0] = a[r][0] * b[0][0] + a[r][1] * b[1][0];
            row[1] = a[r][0] * b[0][1] + a[r][1] * b[1][1];
            row[2] = a[r][0] * b[0][2] + a[r][1] * b[1][2] + a[r][2];
        }
        Affine { m: out }
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.m;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }
}

/// Random affine augmenter
#[derive(Clone, Debug, Default)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Apply one random transform; output size equals input size
    pub fn augment<R: Rng + ?Sized>(&self, img: &DynamicImage, rng: &mut R) -> DynamicImage {
        let mut rgb = img.to_rgb8();
        if self.config.is_identity() {
            return DynamicImage::ImageRgb8(rgb);
        }

        let (width, height) = rgb.dimensions();
        let transform = self.random_transform(width, height, rng);
        if transform != Affine::identity() {
            rgb = warp(&rgb, &transform);
        }

        if self.config.horizontal_flip && rng.gen::<f32>() < 0.5 {
            image::imageops::flip_horizontal_in_place(&mut rgb);
        }

        DynamicImage::ImageRgb8(rgb)
    }

    /// Draw the random transform, centred on the image
    fn random_transform<R: Rng + ?Sized>(&self, width: u32, height: u32, rng: &mut R) -> Affine {
        let c = &self.config;

        let theta = symmetric(rng, c.rotation_range).to_radians();
        let tx = symmetric(rng, c.width_shift_range) * width as f32;
        let ty = symmetric(rng, c.height_shift_range) * height as f32;
        let shear = symmetric(rng, c.shear_range).to_radians();
        let (zx, zy) = if c.zoom_range > 0.0 {
            (
                rng.gen_range(1.0 - c.zoom_range..=1.0 + c.zoom_range),
                rng.gen_range(1.0 - c.zoom_range..=1.0 + c.zoom_range),
            )
        } else {
            (1.0, 1.0)
        };

        let (sin, cos) = theta.sin_cos();
        let rotation = Affine::linear(cos, -sin, sin, cos);
        let shift = Affine::translation(tx, ty);
        let shear = Affine::linear(1.0, -shear.sin(), 0.0, shear.cos());
        let zoom = Affine::linear(zx, 0.0, 0.0, zy);

        let core = rotation.then(shift).then(shear).then(zoom);
        if core == Affine::identity() {
            return core;
        }

        let cx = width as f32 / 2.0 - 0.5;
        let cy = height as f32 / 2.0 - 0.5;
        Affine::translation(cx, cy)
            .then(core)
            .then(Affine::translation(-cx, -cy))
    }
}

fn symmetric<R: Rng + ?Sized>(rng: &mut R, range: f32) -> f32 {
    if range > 0.0 {
        rng.gen_range(-range..=range)
    } else {
        0.0
    }
}

/// Inverse-map every output pixel through `transform`
fn warp(img: &RgbImage, transform: &Affine) -> RgbImage {
    let (width, height) = img.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let (sx, sy) = transform.apply(x as f32, y as f32);
        bilinear_sample(img, sx, sy)
    })
}

/// Bilinear sample with coordinates clamped to the nearest edge
fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageBuffer};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn create_test_image() -> DynamicImage {
        let img = ImageBuffer::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 128]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_default_matches_training_ranges() {
        let config = AugmentationConfig::default();
        assert_eq!(config.rotation_range, 20.0);
        assert_eq!(config.width_shift_range, 0.2);
        assert_eq!(config.zoom_range, 0.2);
        assert!(config.horizontal_flip);
        assert!(!config.is_identity());
        assert!(AugmentationConfig::none().is_identity());
    }

    #[test]
    fn test_augment_keeps_size() {
        let aug = Augmenter::default();
        let img = create_test_image();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        for _ in 0..5 {
            let out = aug.augment(&img, &mut rng);
            assert_eq!(out.dimensions(), (64, 48));
        }
    }

    #[test]
    fn test_no_augmentation_is_identity() {
        let aug = Augmenter::new(AugmentationConfig::none());
        let img = create_test_image();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        assert_eq!(aug.augment(&img, &mut rng).to_rgb8(), img.to_rgb8());
    }

    #[test]
    fn test_same_seed_same_result() {
        let aug = Augmenter::default();
        let img = create_test_image();

        let a = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(7));
        let b = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a.to_rgb8(), b.to_rgb8());
    }

    #[test]
    fn test_flip_only_mirrors_columns() {
        let config = AugmentationConfig {
            horizontal_flip: true,
            ..AugmentationConfig::none()
        };
        let aug = Augmenter::new(config);
        let img = create_test_image();
        let original = img.to_rgb8();

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut saw_flip = false;
        for _ in 0..16 {
            let out = aug.augment(&img, &mut rng).to_rgb8();
            if out != original {
                assert_eq!(out.get_pixel(0, 10), original.get_pixel(63, 10));
                saw_flip = true;
            }
        }
        assert!(saw_flip);
    }

    #[test]
    fn test_shift_fills_with_nearest_edge() {
        let shifted = Affine::translation(-10.0, 0.0);
        let img = create_test_image().to_rgb8();

        let out = warp(&img, &shifted);
        // Output column 0 samples source column -10, clamped to column 0
        assert_eq!(out.get_pixel(0, 5), img.get_pixel(0, 5));
        assert_eq!(out.get_pixel(20, 5), img.get_pixel(10, 5));
    }

    #[test]
    fn test_affine_composition_order() {
        let shift = Affine::translation(1.0, 2.0);
        let scale = Affine::linear(2.0, 0.0, 0.0, 2.0);

        // scale first, then shift
        assert_eq!(shift.then(scale).apply(1.0, 1.0), (3.0, 4.0));
        // shift first, then scale
        assert_eq!(scale.then(shift).apply(1.0, 1.0), (4.0, 6.0));
    }

    #[test]
    fn test_bilinear_midpoint() {
        let img = ImageBuffer::from_fn(2, 1, |x, _| if x == 0 { Rgb([0, 0, 0]) } else { Rgb([200, 100, 50]) });
        assert_eq!(bilinear_sample(&img, 0.5, 0.0), Rgb([100, 50, 25]));
    }
}
