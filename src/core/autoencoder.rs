//! Convolutional autoencoder used to score how far an image deviates from
//! the "normal" appearance of a product category.

use std::fmt;
use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use tch::{nn, nn::Module, Device, Kind, Reduction, Tensor};

use crate::core::preprocess::{chw_to_rgb, ImageTransform, AUTOENCODER_INPUT_SIZE};
use crate::error::{AppError, Result};
use crate::models::anomaly::Verdict;

fn down() -> nn::ConvConfig {
    nn::ConvConfig {
        stride: 2,
        padding: 1,
        ..Default::default()
    }
}

fn up() -> nn::ConvTransposeConfig {
    nn::ConvTransposeConfig {
        stride: 2,
        padding: 1,
        ..Default::default()
    }
}

/// Three stride-2 convolutions down to 256x16x16, three transposed
/// convolutions back up to 3x128x128
#[derive(Debug)]
pub struct AutoEncoder {
    enc1: nn::Conv2D,
    enc2: nn::Conv2D,
    enc3: nn::Conv2D,
    dec1: nn::ConvTranspose2D,
    dec2: nn::ConvTranspose2D,
    dec3: nn::ConvTranspose2D,
}

impl AutoEncoder {
    /// Register the layers under `vs`; parameter names are `enc1.weight`, ...
    pub fn new(vs: &nn::Path<'_>) -> Self {
        Self {
            enc1: nn::conv2d(vs / "enc1", 3, 64, 4, down()),
            enc2: nn::conv2d(vs / "enc2", 64, 128, 4, down()),
            enc3: nn::conv2d(vs / "enc3", 128, 256, 4, down()),
            dec1: nn::conv_transpose2d(vs / "dec1", 256, 128, 4, up()),
            dec2: nn::conv_transpose2d(vs / "dec2", 128, 64, 4, up()),
            dec3: nn::conv_transpose2d(vs / "dec3", 64, 3, 4, up()),
        }
    }
}

impl Module for AutoEncoder {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.apply(&self.enc1)
            .relu()
            .apply(&self.enc2)
            .relu()
            .apply(&self.enc3)
            .relu()
            .apply(&self.dec1)
            .relu()
            .apply(&self.dec2)
            .relu()
            .apply(&self.dec3)
            .sigmoid()
    }
}

/// Result of scoring one image
pub struct AnomalyReport {
    /// Mean squared reconstruction error
    pub score: f64,
    /// Reconstructed image, shape `[1, 3, 128, 128]`, values in [0, 1]
    pub reconstruction: Tensor,
}

impl fmt::Debug for AnomalyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnomalyReport")
            .field("score", &self.score)
            .field("reconstruction", &self.reconstruction.size())
            .finish()
    }
}

impl AnomalyReport {
    /// Compare the score with `threshold`
    pub fn verdict(&self, threshold: f64) -> Verdict {
        Verdict::from_score(self.score, threshold)
    }

    /// Reconstruction as an 8-bit RGB image
    pub fn reconstruction_image(&self) -> Result<RgbImage> {
        let flat = self
            .reconstruction
            .to_kind(Kind::Float)
            .to_device(Device::Cpu)
            .flatten(0, -1);
        let data = Vec::<f32>::try_from(flat)?;
        chw_to_rgb(&data, AUTOENCODER_INPUT_SIZE, AUTOENCODER_INPUT_SIZE)
            .ok_or_else(|| AppError::Internal("reconstruction has an unexpected size".into()))
    }
}

/// An autoencoder trained on one category plus its weights
pub struct AnomalyDetector {
    category: String,
    model: AutoEncoder,
    vs: nn::VarStore,
    transform: ImageTransform,
}

impl fmt::Debug for AnomalyDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnomalyDetector")
            .field("category", &self.category)
            .field("device", &self.vs.device())
            .finish()
    }
}

impl AnomalyDetector {
    /// Weights file for `category` inside `model_dir`
    pub fn weights_path(model_dir: &Path, category: &str) -> PathBuf {
        model_dir.join(format!("autoencoder_{}.ot", category))
    }

    /// Freshly initialised (untrained) detector
    pub fn new(category: &str, device: Device) -> Result<Self> {
        validate_category(category)?;
        let vs = nn::VarStore::new(device);
        let model = AutoEncoder::new(&vs.root());
        Ok(Self {
            category: category.to_string(),
            model,
            vs,
            transform: ImageTransform::autoencoder(),
        })
    }

    /// Load the trained detector for `category` from `model_dir`
    pub fn load(model_dir: &Path, category: &str, device: Device) -> Result<Self> {
        let mut detector = Self::new(category, device)?;
        let path = Self::weights_path(model_dir, category);
        if !path.is_file() {
            return Err(AppError::NotFound(format!("model {}", path.display())));
        }
        detector.vs.load(&path)?;
        detector.vs.freeze();
        log::debug!("Loaded autoencoder for '{}' from {}", category, path.display());
        Ok(detector)
    }

    /// Write the current weights to `model_dir`, returning the file path
    pub fn save(&self, model_dir: &Path) -> Result<PathBuf> {
        crate::utils::ensure_dir_exists(model_dir)?;
        let path = Self::weights_path(model_dir, &self.category);
        self.vs.save(&path)?;
        Ok(path)
    }

    /// Category this detector was trained on
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Resize to 128x128 and convert to a `[1, 3, 128, 128]` tensor in [0, 1]
    pub fn image_tensor(&self, img: &DynamicImage) -> Tensor {
        let data = self.transform.apply(img);
        Tensor::of_slice(&data)
            .view(self.transform.batch_shape())
            .to_device(self.vs.device())
    }

    /// Reconstruct `input` and measure the mean squared error
    pub fn score(&self, input: &Tensor) -> Result<AnomalyReport> {
        let expected = self.transform.batch_shape().to_vec();
        if input.size() != expected {
            return Err(AppError::InvalidInput(format!(
                "expected input shape {:?}, got {:?}",
                expected,
                input.size()
            )));
        }

        let (score, reconstruction) = tch::no_grad(|| {
            let output = self.model.forward(input);
            let loss = output.mse_loss(input, Reduction::Mean).double_value(&[]);
            (loss, output)
        });

        Ok(AnomalyReport {
            score,
            reconstruction,
        })
    }

    /// Score a decoded image
    pub fn score_image(&self, img: &DynamicImage) -> Result<AnomalyReport> {
        self.score(&self.image_tensor(img))
    }
}

fn validate_category(category: &str) -> Result<()> {
    let valid = !category.is_empty()
        && category
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("invalid category name '{}'", category)))
    }
}

const MARGIN: u32 = 8;
const FRAME: u32 = 3;

/// Side-by-side original | reconstruction, with the reconstruction framed
/// green for [`Verdict::Normal`] and red for [`Verdict::Anomaly`]
pub fn comparison_image(
    original: &DynamicImage,
    reconstruction: &RgbImage,
    verdict: Verdict,
    panel: (u32, u32),
) -> RgbImage {
    let (pw, ph) = (panel.0.max(1), panel.1.max(1));
    let mut canvas = RgbImage::from_pixel(pw * 2 + MARGIN * 3, ph + MARGIN * 2, Rgb([255, 255, 255]));

    let left = original.resize_exact(pw, ph, FilterType::Triangle).to_rgb8();
    let right = image::imageops::resize(reconstruction, pw, ph, FilterType::Triangle);
    let right_x = pw + MARGIN * 2;
    image::imageops::overlay(&mut canvas, &left, MARGIN as i64, MARGIN as i64);
    image::imageops::overlay(&mut canvas, &right, right_x as i64, MARGIN as i64);

    let color = match verdict {
        Verdict::Normal => Rgb([0, 160, 0]),
        Verdict::Anomaly => Rgb([200, 0, 0]),
    };
    for inset in 1..=FRAME {
        let rect = Rect::at((right_x - inset) as i32, (MARGIN - inset) as i32)
            .of_size(pw + 2 * inset, ph + 2 * inset);
        draw_hollow_rect_mut(&mut canvas, rect, color);
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard() -> DynamicImage {
        let img = RgbImage::from_fn(64, 64, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                Rgb([230, 230, 230])
            } else {
                Rgb([20, 20, 20])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_forward_preserves_shape() {
        let detector = AnomalyDetector::new("metal_nut", Device::Cpu).unwrap();
        let input = detector.image_tensor(&checkerboard());
        assert_eq!(input.size(), vec![1, 3, 128, 128]);

        let report = detector.score(&input).unwrap();
        assert_eq!(report.reconstruction.size(), vec![1, 3, 128, 128]);
        assert!(report.score >= 0.0 && report.score <= 1.0);
        assert_eq!(report.reconstruction_image().unwrap().dimensions(), (128, 128));
    }

    #[test]
    fn test_score_rejects_wrong_shape() {
        let detector = AnomalyDetector::new("cable", Device::Cpu).unwrap();
        let input = Tensor::zeros(&[1, 3, 64, 64], (Kind::Float, Device::Cpu));
        assert!(matches!(detector.score(&input), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_saved_weights_reload_to_same_score() {
        let dir = tempfile::tempdir().unwrap();
        let detector = AnomalyDetector::new("cable", Device::Cpu).unwrap();
        let path = detector.save(dir.path()).unwrap();
        assert!(path.ends_with("autoencoder_cable.ot"));

        let reloaded = AnomalyDetector::load(dir.path(), "cable", Device::Cpu).unwrap();
        let img = checkerboard();
        let a = detector.score_image(&img).unwrap().score;
        let b = reloaded.score_image(&img).unwrap().score;
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_load_missing_and_invalid_category() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AnomalyDetector::load(dir.path(), "screw", Device::Cpu),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            AnomalyDetector::load(dir.path(), "../etc", Device::Cpu),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_comparison_image_layout() {
        let recon = RgbImage::from_pixel(128, 128, Rgb([0, 0, 255]));
        let out = comparison_image(&checkerboard(), &recon, Verdict::Anomaly, (100, 80));
        assert_eq!(out.dimensions(), (100 * 2 + MARGIN * 3, 80 + MARGIN * 2));

        // Frame just outside the reconstruction panel
        let right_x = 100 + MARGIN * 2;
        assert_eq!(*out.get_pixel(right_x - 1, MARGIN + 10), Rgb([200, 0, 0]));
        // Panel interior keeps the reconstruction colour
        assert_eq!(*out.get_pixel(right_x + 50, MARGIN + 40), Rgb([0, 0, 255]));
    }
}
