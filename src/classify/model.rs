//! Burn network definitions.
//!
//! `BinaryCnn` is the per-component classifier; `FallbackHead` is the untrained
//! stand-in used when no artifact can be loaded. Both take NCHW RGB input in `[0, 1]`
//! and produce a `[batch, 1]` open-probability.

use anyhow::{anyhow, Result};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Smallest input side that survives three conv(3x3, valid) + pool(2x2) blocks.
pub const MIN_IMAGE_SIZE: usize = 22;

// Input normalization: [0, 1] -> [-1, 1].
const INPUT_SCALE: f32 = 2.0;
const INPUT_SHIFT: f32 = -1.0;

const BLOCKS: usize = 3;
const POOL: usize = 2;

#[derive(Config, Debug)]
pub struct BinaryCnnConfig {
    /// Square input side in pixels. Fixed per classifier for training and serving.
    #[config(default = 256)]
    pub image_size: usize,
    /// Filter counts of the three conv blocks.
    #[config(default = "[32, 64, 128]")]
    pub channels: [usize; 3],
    #[config(default = 3)]
    pub kernel_size: usize,
    /// Width of the fully-connected hidden layer.
    #[config(default = 128)]
    pub hidden: usize,
    /// Dropout rate after the hidden layer (training only).
    #[config(default = 0.5)]
    pub dropout: f64,
}

impl BinaryCnnConfig {
    /// Spatial side left after the conv/pool blocks, or `None` if it collapses to zero.
    pub fn feature_side(&self) -> Option<usize> {
        let mut side = self.image_size;
        for _ in 0..BLOCKS {
            side = side.checked_sub(self.kernel_size.checked_sub(1)?)? / POOL;
        }
        (side > 0).then_some(side)
    }

    /// Number of features entering the hidden layer.
    pub fn flattened_features(&self) -> Option<usize> {
        self.feature_side()
            .map(|side| side * side * self.channels[BLOCKS - 1])
    }

    /// Only `image_size` may vary; every component uses the same layer stack.
    pub fn validate(&self) -> Result<()> {
        let reference = Self::new().with_image_size(self.image_size);
        if self.channels != reference.channels
            || self.kernel_size != reference.kernel_size
            || self.hidden != reference.hidden
            || self.dropout != reference.dropout
        {
            return Err(anyhow!(
                "architecture channels={:?} kernel={} hidden={} dropout={} differs from \
                 channels={:?} kernel={} hidden={} dropout={}",
                self.channels,
                self.kernel_size,
                self.hidden,
                self.dropout,
                reference.channels,
                reference.kernel_size,
                reference.hidden,
                reference.dropout
            ));
        }
        if self.feature_side().is_none() {
            return Err(anyhow!(
                "image_size {} is too small for {} conv/pool blocks (minimum {})",
                self.image_size,
                BLOCKS,
                MIN_IMAGE_SIZE
            ));
        }
        Ok(())
    }

    /// Build a freshly initialised network. Call `validate` first.
    pub fn init<B: Backend>(&self, device: &B::Device) -> BinaryCnn<B> {
        let [c1, c2, c3] = self.channels;
        let kernel = [self.kernel_size, self.kernel_size];
        let features = self.flattened_features().unwrap_or(c3);

        BinaryCnn {
            conv1: Conv2dConfig::new([3, c1], kernel).init(device),
            conv2: Conv2dConfig::new([c1, c2], kernel).init(device),
            conv3: Conv2dConfig::new([c2, c3], kernel).init(device),
            pool: MaxPool2dConfig::new([POOL, POOL])
                .with_strides([POOL, POOL])
                .init(),
            fc: LinearConfig::new(features, self.hidden).init(device),
            head: LinearConfig::new(self.hidden, 1).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
        }
    }
}

/// Three conv/pool blocks, a hidden dense layer with dropout, and a single logit.
#[derive(Module, Debug)]
pub struct BinaryCnn<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    pool: MaxPool2d,
    fc: Linear<B>,
    head: Linear<B>,
    dropout: Dropout,
    activation: Relu,
}

impl<B: Backend> BinaryCnn<B> {
    /// Raw logits, shape `[batch, 1]`.
    pub fn forward_logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = images.mul_scalar(INPUT_SCALE).add_scalar(INPUT_SHIFT);

        let x = self.pool.forward(self.activation.forward(self.conv1.forward(x)));
        let x = self.pool.forward(self.activation.forward(self.conv2.forward(x)));
        let x = self.pool.forward(self.activation.forward(self.conv3.forward(x)));

        let [batch, channels, height, width] = x.dims();
        let x = x.reshape([batch, channels * height * width]);

        let x = self.activation.forward(self.fc.forward(x));
        // No-op unless the backend tracks gradients.
        let x = self.dropout.forward(x);
        self.head.forward(x)
    }

    /// Open-probability, shape `[batch, 1]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward_logits(images))
    }
}

/// Global average pool straight into one sigmoid unit.
#[derive(Module, Debug)]
pub struct FallbackHead<B: Backend> {
    pool: AdaptiveAvgPool2d,
    head: Linear<B>,
}

impl<B: Backend> FallbackHead<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: LinearConfig::new(3, 1).init(device),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(images);
        let [batch, channels, _, _] = x.dims();
        sigmoid(self.head.forward(x.reshape([batch, channels])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InferenceBackend;

    #[test]
    fn feature_side_matches_keras_valid_padding() {
        let config = BinaryCnnConfig::new();
        // 256 -> 254 -> 127 -> 125 -> 62 -> 60 -> 30
        assert_eq!(config.feature_side(), Some(30));
        assert_eq!(config.flattened_features(), Some(30 * 30 * 128));
    }

    #[test]
    fn minimum_size_is_enforced() {
        assert!(BinaryCnnConfig::new()
            .with_image_size(MIN_IMAGE_SIZE)
            .validate()
            .is_ok());
        assert!(BinaryCnnConfig::new()
            .with_image_size(MIN_IMAGE_SIZE - 1)
            .validate()
            .is_err());
    }

    #[test]
    fn only_the_reference_layer_stack_validates() {
        assert!(BinaryCnnConfig::new().with_kernel_size(5).validate().is_err());
        assert!(BinaryCnnConfig::new()
            .with_channels([1, 1, 1])
            .with_hidden(1)
            .with_dropout(0.0)
            .validate()
            .is_err());
        assert!(BinaryCnnConfig::new()
            .with_hidden(1 << 40)
            .validate()
            .is_err());
        assert!(BinaryCnnConfig::new().with_image_size(24).validate().is_ok());
    }

    #[test]
    fn forward_yields_one_probability_per_image() {
        let device = Default::default();
        let config = BinaryCnnConfig::new().with_image_size(32);
        let model = config.init::<InferenceBackend>(&device);

        let input = Tensor::<InferenceBackend, 4>::ones([2, 3, 32, 32], &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [2, 1]);

        let values = output.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|p| *p > 0.0 && *p < 1.0));
    }

    #[test]
    fn fallback_accepts_any_resolution() {
        let device = Default::default();
        let head = FallbackHead::<InferenceBackend>::new(&device);
        for side in [8, 64, 256] {
            let input = Tensor::<InferenceBackend, 4>::zeros([1, 3, side, side], &device);
            assert_eq!(head.forward(input).dims(), [1, 1]);
        }
    }
}
