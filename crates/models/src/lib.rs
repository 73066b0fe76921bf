//! Burn model for acoustic scene classification.
//!
//! `SceneCapsNet` is a convolutional feature stack followed by a capsule classifier:
//! - `ConvFeatures`: conv/batch-norm/relu/max-pool blocks, then adaptive pooling to a fixed grid.
//! - `CapsuleClassifier`: primary capsules routed to one capsule per class by agreement.
//!
//! The two halves are public so callers can optimize them with separate learning rates.

use burn::module::{Module, Param};
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::tensor::activation::{relu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};

const SQUASH_EPS: f32 = 1e-8;

/// Convolution blocks used by `SceneCapsNetConfig::new`.
pub const DEFAULT_CONV_CHANNELS: [usize; 2] = [32, 64];

/// Smallest band or frame count that survives one 2x2 max-pool per block.
pub fn min_input_side(conv_blocks: usize) -> usize {
    1usize << conv_blocks.min(usize::BITS as usize - 1)
}

#[derive(Debug, Clone)]
pub struct SceneCapsNetConfig {
    pub num_classes: usize,
    /// Output channels of the convolution blocks before the primary capsule block.
    pub conv_channels: Vec<usize>,
    /// Spatial grid the feature map is pooled to.
    pub grid: [usize; 2],
    /// Primary capsule maps; the last conv block emits `primary_maps * primary_dim` channels.
    pub primary_maps: usize,
    pub primary_dim: usize,
    pub class_dim: usize,
    pub routing_iterations: usize,
}

impl SceneCapsNetConfig {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            conv_channels: DEFAULT_CONV_CHANNELS.to_vec(),
            grid: [4, 4],
            primary_maps: 8,
            primary_dim: 8,
            class_dim: 16,
            routing_iterations: 3,
        }
    }

    pub fn with_routing_iterations(mut self, iterations: usize) -> Self {
        self.routing_iterations = iterations;
        self
    }

    /// `[bands, frames]` below which `forward` cannot pool.
    pub fn min_input_shape(&self) -> [usize; 2] {
        let side = min_input_side(self.conv_channels.len());
        [side, side]
    }
}

#[derive(Debug, Module)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: nn::BatchNorm<B, 2>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(nn::PaddingConfig2d::Same)
                .init(device),
            norm: nn::BatchNormConfig::new(out_channels).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pool.forward(relu(self.norm.forward(self.conv.forward(x))))
    }
}

#[derive(Debug, Module)]
pub struct ConvFeatures<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    primary: Conv2d<B>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> ConvFeatures<B> {
    pub fn new(cfg: &SceneCapsNetConfig, device: &B::Device) -> Self {
        let mut blocks = Vec::new();
        let mut in_channels = 1;
        for &out in &cfg.conv_channels {
            blocks.push(ConvBlock::new(in_channels, out, device));
            in_channels = out;
        }
        let primary_channels = cfg.primary_maps.max(1) * cfg.primary_dim.max(1);
        let primary = Conv2dConfig::new([in_channels, primary_channels], [3, 3])
            .with_padding(nn::PaddingConfig2d::Same)
            .init(device);
        Self {
            blocks,
            primary,
            pool: AdaptiveAvgPool2dConfig::new(cfg.grid).init(),
        }
    }

    /// `[batch, 1, bands, frames]` -> `[batch, primary_maps * primary_dim, grid_h, grid_w]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input;
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.pool.forward(self.primary.forward(x))
    }
}

/// Scale capsule vectors along `dim` so their length lies in [0, 1).
fn squash<B: Backend, const D: usize>(s: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let norm_sq = s.clone().powf_scalar(2.0).sum_dim(dim);
    let scale = norm_sq.clone() / (norm_sq.clone() + 1.0) / (norm_sq + SQUASH_EPS).sqrt();
    s * scale
}

#[derive(Debug, Module)]
pub struct CapsuleClassifier<B: Backend> {
    /// Transformation matrices, `[1, in_caps, in_dim, num_classes * class_dim]`.
    weight: Param<Tensor<B, 4>>,
    in_caps: usize,
    in_dim: usize,
    num_classes: usize,
    class_dim: usize,
    routing_iterations: usize,
}

impl<B: Backend> CapsuleClassifier<B> {
    pub fn new(cfg: &SceneCapsNetConfig, device: &B::Device) -> Self {
        let in_dim = cfg.primary_dim.max(1);
        let in_caps = cfg.primary_maps.max(1) * cfg.grid[0] * cfg.grid[1];
        let num_classes = cfg.num_classes.max(1);
        let class_dim = cfg.class_dim.max(1);
        let weight = Tensor::random(
            [1, in_caps, in_dim, num_classes * class_dim],
            Distribution::Normal(0.0, 0.05),
            device,
        );
        Self {
            weight: Param::from_tensor(weight),
            in_caps,
            in_dim,
            num_classes,
            class_dim,
            routing_iterations: cfg.routing_iterations.max(1),
        }
    }

    pub fn routing_iterations(&self) -> usize {
        self.routing_iterations
    }

    pub fn set_routing_iterations(&mut self, iterations: usize) {
        self.routing_iterations = iterations.max(1);
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Primary feature map -> class capsule lengths `[batch, num_classes]`.
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let batch = features.dims()[0];
        let (n, k, d) = (self.in_caps, self.num_classes, self.class_dim);

        // [B, maps * dim, H, W] -> [B, maps, dim, H*W] -> [B, maps, H*W, dim] -> [B, N, dim]
        let [_, channels, h, w] = features.dims();
        let u = features
            .reshape([batch, channels / self.in_dim, self.in_dim, h * w])
            .swap_dims(2, 3)
            .reshape([batch, n, self.in_dim]);
        let u = squash(u, 2);

        // Prediction vectors u_hat[b, i, j] = W_ij u_i.
        let u_hat = (u.reshape([batch, n, self.in_dim, 1]) * self.weight.val())
            .sum_dim(2)
            .reshape([batch, n, k, d]);

        let mut logits = Tensor::<B, 3>::zeros([batch, n, k], &u_hat.device());
        let mut v = Tensor::<B, 4>::zeros([batch, 1, k, d], &u_hat.device());
        for iteration in 0..self.routing_iterations {
            let coupling = softmax(logits.clone(), 2).reshape([batch, n, k, 1]);
            v = squash((coupling * u_hat.clone()).sum_dim(1), 3);
            if iteration + 1 < self.routing_iterations {
                let agreement = (u_hat.clone() * v.clone()).sum_dim(3).reshape([batch, n, k]);
                logits = logits + agreement;
            }
        }

        (v.powf_scalar(2.0).sum_dim(3) + SQUASH_EPS)
            .sqrt()
            .reshape([batch, k])
    }
}

#[derive(Debug, Module)]
pub struct SceneCapsNet<B: Backend> {
    pub features: ConvFeatures<B>,
    pub classifier: CapsuleClassifier<B>,
}

impl<B: Backend> SceneCapsNet<B> {
    pub fn new(cfg: &SceneCapsNetConfig, device: &B::Device) -> Self {
        Self {
            features: ConvFeatures::new(cfg, device),
            classifier: CapsuleClassifier::new(cfg, device),
        }
    }

    /// Returns `(logits, probs)`: class capsule lengths and their softmax.
    pub fn forward(&self, input: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let out = self.classifier.forward(self.features.forward(input));
        let prob = softmax(out.clone(), 1);
        (out, prob)
    }

    pub fn routing_iterations(&self) -> usize {
        self.classifier.routing_iterations()
    }

    pub fn set_routing_iterations(&mut self, iterations: usize) {
        self.classifier.set_routing_iterations(iterations);
    }
}

pub mod prelude {
    pub use super::{CapsuleClassifier, ConvFeatures, SceneCapsNet, SceneCapsNetConfig};
}
