//! Image to model-input conversions.
//!
//! Every transform produces a flat `Vec<f32>` in channel-major (CHW) order,
//! which the model wrappers turn into `[1, 3, H, W]` tensors.

use image::{imageops::FilterType, DynamicImage, RgbImage};

/// ImageNet channel means (ResNet family)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
/// CLIP channel means
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
/// CLIP channel standard deviations
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Input side length of both embedding backbones
pub const BACKBONE_INPUT_SIZE: u32 = 224;
/// Input side length of the autoencoder
pub const AUTOENCODER_INPUT_SIZE: u32 = 128;

/// How an image is resized before conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resize {
    /// Stretch to `size x size`, ignoring aspect ratio
    Exact,
    /// Scale the shorter side to `size`, then crop the centre square
    ShorterSideThenCenterCrop,
}

/// A fixed resize + scale + normalise pipeline
#[derive(Debug, Clone, Copy)]
pub struct ImageTransform {
    /// Output side length
    pub size: u32,
    /// Resize strategy
    pub resize: Resize,
    /// Resampling filter
    pub filter: FilterType,
    /// Per-channel mean subtracted after scaling to [0, 1]
    pub mean: [f32; 3],
    /// Per-channel divisor applied after mean subtraction
    pub std: [f32; 3],
}

impl ImageTransform {
    /// CLIP ViT-B/32 preprocessing
    pub fn clip() -> Self {
        Self {
            size: BACKBONE_INPUT_SIZE,
            resize: Resize::ShorterSideThenCenterCrop,
            filter: FilterType::CatmullRom,
            mean: CLIP_MEAN,
            std: CLIP_STD,
        }
    }

    /// ResNet-50 preprocessing
    pub fn resnet() -> Self {
        Self {
            size: BACKBONE_INPUT_SIZE,
            resize: Resize::Exact,
            filter: FilterType::Triangle,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// Autoencoder preprocessing: plain [0, 1] scaling, no normalisation
    pub fn autoencoder() -> Self {
        Self {
            size: AUTOENCODER_INPUT_SIZE,
            resize: Resize::Exact,
            filter: FilterType::Triangle,
            mean: [0.0; 3],
            std: [1.0; 3],
        }
    }

    /// Resize only, returning the RGB image the model will see
    pub fn resized(&self, img: &DynamicImage) -> RgbImage {
        match self.resize {
            Resize::Exact => img.resize_exact(self.size, self.size, self.filter).to_rgb8(),
            Resize::ShorterSideThenCenterCrop => resize_shorter_center_crop(img, self.size, self.filter),
        }
    }

    /// Full pipeline: resize, scale to [0, 1], normalise; CHW layout
    pub fn apply(&self, img: &DynamicImage) -> Vec<f32> {
        let rgb = self.resized(img);
        let mut data = rgb_to_chw(&rgb);
        normalize_channels(&mut data, self.mean, self.std);
        data
    }

    /// Tensor shape of [`ImageTransform::apply`] output with a batch axis
    pub fn batch_shape(&self) -> [i64; 4] {
        [1, 3, self.size as i64, self.size as i64]
    }
}

fn resize_shorter_center_crop(img: &DynamicImage, size: u32, filter: FilterType) -> RgbImage {
    let (w, h) = (img.width().max(1), img.height().max(1));
    let (new_w, new_h) = if w <= h {
        (size, ((size as u64 * h as u64) / w as u64).max(size as u64) as u32)
    } else {
        (((size as u64 * w as u64) / h as u64).max(size as u64) as u32, size)
    };
    let resized = img.resize_exact(new_w, new_h, filter);
    let left = (new_w - size) / 2;
    let top = (new_h - size) / 2;
    resized.crop_imm(left, top, size, size).to_rgb8()
}

/// Convert an RGB image to a CHW vector of values in [0, 1]
pub fn rgb_to_chw(rgb: &RgbImage) -> Vec<f32> {
    let (width, height) = rgb.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; plane * 3];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        data[idx] = pixel[0] as f32 / 255.0;
        data[plane + idx] = pixel[1] as f32 / 255.0;
        data[2 * plane + idx] = pixel[2] as f32 / 255.0;
    }
    data
}

/// Apply `(x - mean[c]) / std[c]` to each channel plane of a CHW vector
pub fn normalize_channels(data: &mut [f32], mean: [f32; 3], std: [f32; 3]) {
    let plane = data.len() / 3;
    for (c, chunk) in data.chunks_mut(plane.max(1)).take(3).enumerate() {
        for v in chunk {
            *v = (*v - mean[c]) / std[c];
        }
    }
}

/// Convert a CHW vector of values in [0, 1] back to an RGB image.
///
/// Values are clamped; returns `None` if `data` is not `3 * width * height` long.
pub fn chw_to_rgb(data: &[f32], width: u32, height: u32) -> Option<RgbImage> {
    let plane = (width * height) as usize;
    if data.len() != plane * 3 {
        return None;
    }
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Some(RgbImage::from_fn(width, height, |x, y| {
        let idx = (y * width + x) as usize;
        image::Rgb([
            to_u8(data[idx]),
            to_u8(data[plane + idx]),
            to_u8(data[2 * plane + idx]),
        ])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_rgb_to_chw_layout() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        img.put_pixel(1, 0, image::Rgb([0, 255, 51]));

        let data = rgb_to_chw(&img);
        assert_eq!(data, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.2]);
    }

    #[test]
    fn test_normalize_channels() {
        let mut data = vec![0.5, 0.5, 1.0, 1.0, 0.0, 0.0];
        normalize_channels(&mut data, [0.5, 0.5, 0.5], [0.5, 0.5, 0.5]);
        assert_eq!(data, vec![0.0, 0.0, 1.0, 1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_resnet_transform_shape() {
        let transform = ImageTransform::resnet();
        let data = transform.apply(&gradient(31, 17));
        assert_eq!(data.len(), 3 * 224 * 224);
        assert_eq!(transform.batch_shape(), [1, 3, 224, 224]);
    }

    #[test]
    fn test_clip_transform_crops_to_square() {
        let transform = ImageTransform::clip();
        let resized = transform.resized(&gradient(640, 320));
        assert_eq!(resized.dimensions(), (224, 224));
        let resized = transform.resized(&gradient(100, 300));
        assert_eq!(resized.dimensions(), (224, 224));
    }

    #[test]
    fn test_autoencoder_transform_is_unit_range() {
        let data = ImageTransform::autoencoder().apply(&gradient(300, 200));
        assert_eq!(data.len(), 3 * 128 * 128);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_chw_to_rgb_inverts_scaling() {
        let img = gradient(8, 4).to_rgb8();
        let back = chw_to_rgb(&rgb_to_chw(&img), 8, 4).unwrap();
        assert_eq!(img, back);
        assert!(chw_to_rgb(&[0.0; 5], 8, 4).is_none());
    }
}
