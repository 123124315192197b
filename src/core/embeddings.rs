use std::path::Path;

use image::DynamicImage;

use crate::error::Result;

#[cfg(feature = "embeddings")]
use {
    crate::config::{Config, ModelKind},
    crate::core::preprocess::ImageTransform,
    crate::core::similarity::normalize_l2_or_else,
    crate::error::AppError,
    std::fmt,
    tch::{nn, nn::ModuleT, CModule, Device, Kind, Tensor},
};

/// Anything that turns an image into a fixed-length vector
pub trait ImageEmbedder {
    /// Identifier stored alongside the vectors this embedder produces
    fn model_name(&self) -> &str;

    /// Embed a decoded image
    fn embed_image(&self, img: &DynamicImage) -> Result<Vec<f32>>;

    /// Decode the image at `path` and embed it
    fn embed_path(&self, path: &Path) -> Result<Vec<f32>> {
        let img = image::open(path)?;
        self.embed_image(&img)
    }
}

#[cfg(feature = "embeddings")]
enum Backbone {
    Clip(CModule),
    Resnet {
        net: nn::FuncT<'static>,
        // Owns the weights `net` reads from
        _vs: nn::VarStore,
    },
}

/// A pretrained image backbone producing L2-normalised embeddings
#[cfg(feature = "embeddings")]
pub struct EmbeddingModel {
    kind: ModelKind,
    backbone: Backbone,
    transform: ImageTransform,
    device: Device,
}

#[cfg(feature = "embeddings")]
impl fmt::Debug for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingModel")
            .field("kind", &self.kind)
            .field("device", &self.device)
            .finish()
    }
}

#[cfg(feature = "embeddings")]
impl EmbeddingModel {
    /// Load the backbone selected by `kind` with the weights named in `config`
    ///
    /// CLIP expects a TorchScript export of the ViT-B/32 image encoder;
    /// ResNet-50 expects VarStore weights for the headless network.
    pub fn load(kind: ModelKind, config: &Config) -> Result<Self> {
        let device = config.device.device();
        log::info!("Loading {} model on {:?}", kind.as_str().to_uppercase(), device);

        let (backbone, transform) = match kind {
            ModelKind::Clip => {
                let path = &config.clip_model_path;
                require_file(path)?;
                let mut module = CModule::load_on_device(path, device)?;
                module.set_eval();
                (Backbone::Clip(module), ImageTransform::clip())
            }
            ModelKind::Resnet => {
                let path = &config.resnet_weights_path;
                require_file(path)?;
                let mut vs = nn::VarStore::new(device);
                let net = tch::vision::resnet::resnet50_no_final_layer(&vs.root());
                vs.load(path)?;
                (Backbone::Resnet { net, _vs: vs }, ImageTransform::resnet())
            }
        };

        Ok(Self {
            kind,
            backbone,
            transform,
            device,
        })
    }

    /// Load the backbone configured in `config.model`
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::load(config.model, config)
    }

    /// Backbone kind
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Compute an embedding for an image
    pub fn compute_embedding(&self, img: &DynamicImage) -> Result<Vec<f32>> {
        let input = self.preprocess_image(img).to_device(self.device);

        let output = tch::no_grad(|| self.forward(&input))?;
        let flat = output
            .to_kind(Kind::Float)
            .flatten(0, -1)
            .to_device(Device::Cpu);
        let mut embedding = Vec::<f32>::try_from(flat)?;

        if normalize_l2_or_else(&mut embedding, small_random_vector)? {
            log::warn!("Zero vector detected, substituted a small random vector");
        }

        Ok(embedding)
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        match &self.backbone {
            Backbone::Clip(module) => match module.method_ts("encode_image", &[input]) {
                Ok(out) => Ok(out),
                Err(_) => Ok(module.forward_ts(&[input])?),
            },
            Backbone::Resnet { net, .. } => Ok(net.forward_t(input, false)),
        }
    }

    /// Preprocess an image into a `[1, 3, 224, 224]` tensor
    fn preprocess_image(&self, img: &DynamicImage) -> Tensor {
        let data = self.transform.apply(img);
        Tensor::of_slice(&data).view(self.transform.batch_shape())
    }
}

#[cfg(feature = "embeddings")]
impl ImageEmbedder for EmbeddingModel {
    fn model_name(&self) -> &str {
        self.kind.as_str()
    }

    fn embed_image(&self, img: &DynamicImage) -> Result<Vec<f32>> {
        self.compute_embedding(img)
    }
}

#[cfg(feature = "embeddings")]
fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("model weights {}", path.display())))
    }
}

/// Normal noise scaled by 0.01, used in place of a zero embedding
#[cfg(feature = "embeddings")]
fn small_random_vector(len: usize) -> Result<Vec<f32>> {
    let noise = Tensor::randn(&[len as i64], (Kind::Float, Device::Cpu)) * 0.01;
    Ok(Vec::<f32>::try_from(noise)?)
}
