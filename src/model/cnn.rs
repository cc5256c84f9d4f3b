//! CNN Model Architecture for Leaf Disease Classification
//!
//! A sequential network of three double-convolution blocks followed by a
//! dense head:
//!
//! ```text
//! Block 1: Conv(32)+ReLU, BN, Conv(32)+ReLU, BN, MaxPool 2x2, Dropout 0.25
//! Block 2: same with 64 filters
//! Block 3: same with 128 filters
//! Head:    Flatten, Dense(512)+ReLU, BN, Dropout 0.5, Dense(num_classes)
//! ```
//!
//! All convolutions are 3x3 with `same` padding, so each block halves the
//! spatial size only through its pooling layer.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Filters of the three convolutional blocks
pub const BLOCK_FILTERS: [usize; 3] = [32, 64, 128];

/// Width of the hidden dense layer
pub const DENSE_UNITS: usize = 512;

/// Configuration for the [`LeafCnn`] model
#[derive(Config, Debug, PartialEq)]
pub struct LeafCnnConfig {
    /// Number of output classes
    #[config(default = "4")]
    pub num_classes: usize,

    /// Input size as `[height, width]`; both must be multiples of 8
    #[config(default = "[224, 224]")]
    pub input_size: [usize; 2],

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Dropout after each convolutional block
    #[config(default = "0.25")]
    pub conv_dropout: f64,

    /// Dropout before the output layer
    #[config(default = "0.5")]
    pub dense_dropout: f64,
}

impl LeafCnnConfig {
    /// Initialize a model with freshly initialized weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> LeafCnn<B> {
        LeafCnn::new(self, device)
    }

    /// Spatial size after the three pooling layers
    pub fn feature_map_size(&self) -> [usize; 2] {
        [self.input_size[0] / 8, self.input_size[1] / 8]
    }

    /// Length of the flattened feature vector fed to the dense head
    pub fn flattened_features(&self) -> usize {
        let [h, w] = self.feature_map_size();
        BLOCK_FILTERS[2] * h * w
    }
}

/// Two 3x3 convolutions, each followed by ReLU and batch norm, then pooling
/// and dropout
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B>,
    pub pool: MaxPool2d,
    pub dropout: Dropout,
    pub relu: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, filters: usize, dropout: f64, device: &B::Device) -> Self {
        let conv = |input: usize| -> Conv2d<B> {
            Conv2dConfig::new([input, filters], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };

        Self {
            conv1: conv(in_channels),
            bn1: BatchNormConfig::new(filters).init(device),
            conv2: conv(filters),
            bn2: BatchNormConfig::new(filters).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: DropoutConfig::new(dropout).init(),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.conv1.forward(x));
        let x = self.bn1.forward(x);
        let x = self.relu.forward(self.conv2.forward(x));
        let x = self.bn2.forward(x);
        let x = self.pool.forward(x);
        self.dropout.forward(x)
    }
}

/// Leaf disease classifier
#[derive(Module, Debug)]
pub struct LeafCnn<B: Backend> {
    pub block1: ConvBlock<B>,
    pub block2: ConvBlock<B>,
    pub block3: ConvBlock<B>,

    pub fc1: Linear<B>,
    pub bn_fc: BatchNorm<B>,
    pub dropout: Dropout,
    pub fc2: Linear<B>,
    pub relu: Relu,

    num_classes: usize,
}

impl<B: Backend> LeafCnn<B> {
    pub fn new(config: &LeafCnnConfig, device: &B::Device) -> Self {
        let [f1, f2, f3] = BLOCK_FILTERS;

        Self {
            block1: ConvBlock::new(config.in_channels, f1, config.conv_dropout, device),
            block2: ConvBlock::new(f1, f2, config.conv_dropout, device),
            block3: ConvBlock::new(f2, f3, config.conv_dropout, device),
            fc1: LinearConfig::new(config.flattened_features(), DENSE_UNITS).init(device),
            bn_fc: BatchNormConfig::new(DENSE_UNITS).init(device),
            dropout: DropoutConfig::new(config.dense_dropout).init(),
            fc2: LinearConfig::new(DENSE_UNITS, config.num_classes).init(device),
            relu: Relu::new(),
            num_classes: config.num_classes,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.block1.forward(x);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);

        // Flatten: [B, C, H, W] -> [B, C*H*W]
        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.relu.forward(self.fc1.forward(x));

        // Batch norm expects a channel axis: [B, 512] -> [B, 512, 1]
        let x = self.bn_fc.forward(x.reshape([batch_size, DENSE_UNITS, 1]));
        let x = x.reshape([batch_size, DENSE_UNITS]);

        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Class probabilities
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let logits = self.forward(x);
        burn::tensor::activation::softmax(logits, 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Build a model for `input_shape` given as `(height, width, channels)`
pub fn create_cnn_model<B: Backend>(
    input_shape: (usize, usize, usize),
    num_classes: usize,
    device: &B::Device,
) -> LeafCnn<B> {
    let (height, width, channels) = input_shape;
    LeafCnnConfig::new()
        .with_input_size([height, width])
        .with_in_channels(channels)
        .with_num_classes(num_classes)
        .init(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_config_defaults() {
        let config = LeafCnnConfig::new();
        assert_eq!(config.num_classes, 4);
        assert_eq!(config.input_size, [224, 224]);
        assert_eq!(config.in_channels, 3);
        assert_eq!(config.flattened_features(), 128 * 28 * 28);
    }

    #[test]
    fn test_forward_output_shape() {
        let device = Default::default();
        let model = create_cnn_model::<TestBackend>((32, 24, 3), 3, &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 24], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 3]);
        assert_eq!(model.num_classes(), 3);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = LeafCnnConfig::new()
            .with_input_size([16, 16])
            .with_num_classes(5)
            .init::<TestBackend>(&device);

        let values: Vec<f32> = (0..2 * 3 * 16 * 16).map(|i| (i % 17) as f32 / 17.0).collect();
        let input =
            Tensor::<TestBackend, 4>::from_floats(TensorData::new(values, [2, 3, 16, 16]), &device);

        let probs = model
            .forward_softmax(input)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(probs.len(), 10);
        for row in probs.chunks(5) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
            assert!(row.iter().all(|p| *p >= 0.0));
        }
    }
}
