//! ResNet-18 feature extractor with its ImageNet classification layer.

mod block;
mod weights;

pub use weights::PretrainedWeights;

use crate::error::DogVisionError;
use block::{kaiming, layer_block, LayerBlock};
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Device};
use burn::record::{FullPrecisionSettings, Recorder};
use burn::tensor::Tensor;
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use log::info;

const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];

#[derive(Debug, Module)]
pub struct ResNetBackbone<B: Backend> {
	pub(crate) conv1: Conv2d<B>,
	pub(crate) bn1: BatchNorm<B, 2>,
	pub(crate) relu: Relu,
	pub(crate) maxpool: MaxPool2d,
	pub(crate) layer1: LayerBlock<B>,
	pub(crate) layer2: LayerBlock<B>,
	pub(crate) layer3: LayerBlock<B>,
	pub(crate) layer4: LayerBlock<B>,
	pub(crate) avgpool: AdaptiveAvgPool2d,
	pub(crate) fc: Linear<B>,
}

impl<B: Backend> ResNetBackbone<B> {
	/// `[batch, 3, height, width]` normalized images to `[batch, num_classes]` logits.
	pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
		let x = self.conv1.forward(input);
		let x = self.bn1.forward(x);
		let x = self.relu.forward(x);
		let x = self.maxpool.forward(x);

		let x = self.layer1.forward(x);
		let x = self.layer2.forward(x);
		let x = self.layer3.forward(x);
		let x = self.layer4.forward(x);

		let x = self.avgpool.forward(x);
		let x = x.flatten(1, 3);

		self.fc.forward(x)
	}

	pub fn resnet18(num_classes: usize, device: &Device<B>) -> Self {
		let [b1, b2, b3, b4] = RESNET18_BLOCKS;

		Self {
			// 7x7 conv, 64, /2
			conv1: Conv2dConfig::new([3, 64], [7, 7])
				.with_stride([2, 2])
				.with_padding(PaddingConfig2d::Explicit(3, 3))
				.with_bias(false)
				.with_initializer(kaiming())
				.init(device),
			bn1: BatchNormConfig::new(64).init(device),
			relu: Relu::new(),
			// 3x3 maxpool, /2
			maxpool: MaxPool2dConfig::new([3, 3])
				.with_strides([2, 2])
				.with_padding(PaddingConfig2d::Explicit(1, 1))
				.init(),
			layer1: layer_block(b1, 64, 64, 1, device),
			layer2: layer_block(b2, 64, 128, 2, device),
			layer3: layer_block(b3, 128, 256, 2, device),
			layer4: layer_block(b4, 256, 512, 2, device),
			avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
			fc: LinearConfig::new(512, num_classes).init(device),
		}
	}

	pub fn resnet18_pretrained(weights: PretrainedWeights, device: &Device<B>) -> Result<Self, DogVisionError> {
		let checkpoint = weights.download()?;
		info!("Loading feature extractor weights from {}", checkpoint.display());

		let load_args = LoadArgs::new(checkpoint.clone())
			// *.downsample.0.* -> *.downsample.conv.*
			.with_key_remap("(.+)\\.downsample\\.0\\.(.+)", "$1.downsample.conv.$2")
			// *.downsample.1.* -> *.downsample.bn.*
			.with_key_remap("(.+)\\.downsample\\.1\\.(.+)", "$1.downsample.bn.$2")
			// layer[i].[j].* -> layer[i].blocks.[j].*
			.with_key_remap("(layer[1-4])\\.([0-9]+)\\.(.+)", "$1.blocks.$2.$3");

		let record = PyTorchFileRecorder::<FullPrecisionSettings>::new()
			.load(load_args, device)
			.map_err(|err| DogVisionError::ArtifactLoad {
				path: checkpoint,
				reason: format!("{err:?}"),
			})?;

		Ok(Self::resnet18(weights.num_classes(), device).load_record(record))
	}

	pub fn num_classes(&self) -> usize {
		self.fc.weight.dims()[1]
	}
}
