//! Layer-by-layer model summary
//!
//! Shapes are reported channel-first, as the tensors flow through
//! [`LeafCnn`](super::LeafCnn), with `None` standing for the batch axis.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::cnn::{LeafCnnConfig, BLOCK_FILTERS, DENSE_UNITS};
use crate::utils::format_number;

/// One row of the summary table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub name: String,
    pub kind: String,
    /// Output shape without the batch axis
    pub output_shape: Vec<usize>,
    pub trainable_params: usize,
    pub non_trainable_params: usize,
}

impl LayerSummary {
    pub fn params(&self) -> usize {
        self.trainable_params + self.non_trainable_params
    }
}

/// Summary of a whole model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub layers: Vec<LayerSummary>,
}

impl ModelSummary {
    /// Build the summary for a model configuration
    pub fn from_config(config: &LeafCnnConfig) -> Self {
        let mut builder = SummaryBuilder::default();
        let [mut h, mut w] = config.input_size;
        let mut channels = config.in_channels;

        for (block, &filters) in BLOCK_FILTERS.iter().enumerate() {
            for conv in 0..2 {
                let in_ch = if conv == 0 { channels } else { filters };
                builder.push(
                    format!("block{}_conv{}", block + 1, conv + 1),
                    "Conv2d+ReLU",
                    vec![filters, h, w],
                    3 * 3 * in_ch * filters + filters,
                    0,
                );
                builder.batch_norm(format!("block{}_bn{}", block + 1, conv + 1), vec![filters, h, w]);
            }
            h /= 2;
            w /= 2;
            builder.push(format!("block{}_pool", block + 1), "MaxPool2d", vec![filters, h, w], 0, 0);
            builder.push(format!("block{}_dropout", block + 1), "Dropout", vec![filters, h, w], 0, 0);
            channels = filters;
        }

        let flat = channels * h * w;
        builder.push("flatten".into(), "Flatten", vec![flat], 0, 0);
        builder.push(
            "dense".into(),
            "Linear+ReLU",
            vec![DENSE_UNITS],
            flat * DENSE_UNITS + DENSE_UNITS,
            0,
        );
        builder.batch_norm("dense_bn".into(), vec![DENSE_UNITS]);
        builder.push("dense_dropout".into(), "Dropout", vec![DENSE_UNITS], 0, 0);
        builder.push(
            "output".into(),
            "Linear",
            vec![config.num_classes],
            DENSE_UNITS * config.num_classes + config.num_classes,
            0,
        );

        Self {
            layers: builder.layers,
        }
    }

    pub fn trainable_params(&self) -> usize {
        self.layers.iter().map(|l| l.trainable_params).sum()
    }

    /// Batch-norm running mean and variance
    pub fn non_trainable_params(&self) -> usize {
        self.layers.iter().map(|l| l.non_trainable_params).sum()
    }

    pub fn total_params(&self) -> usize {
        self.trainable_params() + self.non_trainable_params()
    }

    pub fn output_shape(&self) -> &[usize] {
        self.layers
            .last()
            .map(|l| l.output_shape.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Default)]
struct SummaryBuilder {
    layers: Vec<LayerSummary>,
}

impl SummaryBuilder {
    fn push(
        &mut self,
        name: String,
        kind: &str,
        output_shape: Vec<usize>,
        trainable: usize,
        non_trainable: usize,
    ) {
        self.layers.push(LayerSummary {
            name,
            kind: kind.to_string(),
            output_shape,
            trainable_params: trainable,
            non_trainable_params: non_trainable,
        });
    }

    /// Gamma and beta train; running mean and variance do not
    fn batch_norm(&mut self, name: String, output_shape: Vec<usize>) {
        let channels = output_shape[0];
        self.push(name, "BatchNorm", output_shape, 2 * channels, 2 * channels);
    }
}

fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("(None, {})", dims.join(", "))
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "─".repeat(78);
        writeln!(f, "{rule}")?;
        writeln!(f, "{:<22} {:<14} {:<24} {:>15}", "Layer", "Type", "Output Shape", "Param #")?;
        writeln!(f, "{}", "═".repeat(78))?;
        for layer in &self.layers {
            writeln!(
                f,
                "{:<22} {:<14} {:<24} {:>15}",
                layer.name,
                layer.kind,
                format_shape(&layer.output_shape),
                format_number(layer.params())
            )?;
        }
        writeln!(f, "{rule}")?;
        writeln!(f, "Total params: {}", format_number(self.total_params()))?;
        writeln!(f, "Trainable params: {}", format_number(self.trainable_params()))?;
        write!(
            f,
            "Non-trainable params: {}",
            format_number(self.non_trainable_params())
        )
    }
}
