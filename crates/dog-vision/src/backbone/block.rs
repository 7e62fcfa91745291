use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Device, Module, Tensor};
use std::f64::consts::SQRT_2;

// Field names follow the torchvision state dict so pretrained weights map onto them.

#[derive(Debug, Module)]
pub struct BasicBlock<B: Backend> {
	pub(crate) conv1: Conv2d<B>,
	pub(crate) bn1: BatchNorm<B, 2>,
	pub(crate) conv2: Conv2d<B>,
	pub(crate) bn2: BatchNorm<B, 2>,
	pub(crate) relu: Relu,
	pub(crate) downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
	pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
		let identity = match &self.downsample {
			Some(downsample) => downsample.forward(input.clone()),
			None => input.clone(),
		};

		let x = self.conv1.forward(input);
		let x = self.bn1.forward(x);
		let x = self.relu.forward(x);

		let x = self.conv2.forward(x);
		let x = self.bn2.forward(x);

		self.relu.forward(x + identity)
	}
}

/// 1x1 projection on the skip path when a block changes width or stride.
#[derive(Debug, Module)]
pub struct Downsample<B: Backend> {
	pub(crate) conv: Conv2d<B>,
	pub(crate) bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
	pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
		self.bn.forward(self.conv.forward(input))
	}
}

#[derive(Debug, Module)]
pub struct LayerBlock<B: Backend> {
	pub(crate) blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> LayerBlock<B> {
	pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
		self.blocks.iter().fold(input, |x, block| block.forward(x))
	}
}

pub(crate) fn kaiming() -> Initializer {
	Initializer::KaimingNormal {
		gain: SQRT_2,
		fan_out_only: true,
	}
}

fn conv(channels: [usize; 2], kernel: usize, stride: usize, padding: usize) -> Conv2dConfig {
	Conv2dConfig::new(channels, [kernel, kernel])
		.with_stride([stride, stride])
		.with_padding(PaddingConfig2d::Explicit(padding, padding))
		.with_bias(false)
		.with_initializer(kaiming())
}

fn basic_block<B: Backend>(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> BasicBlock<B> {
	let downsample = (in_channels != out_channels || stride != 1).then(|| Downsample {
		conv: conv([in_channels, out_channels], 1, stride, 0).init(device),
		bn: BatchNormConfig::new(out_channels).init(device),
	});

	BasicBlock {
		conv1: conv([in_channels, out_channels], 3, stride, 1).init(device),
		bn1: BatchNormConfig::new(out_channels).init(device),
		conv2: conv([out_channels, out_channels], 3, 1, 1).init(device),
		bn2: BatchNormConfig::new(out_channels).init(device),
		relu: Relu::new(),
		downsample,
	}
}

/// A stage of `num_blocks` basic blocks; only the first one strides.
pub fn layer_block<B: Backend>(
	num_blocks: usize,
	in_channels: usize,
	out_channels: usize,
	stride: usize,
	device: &Device<B>,
) -> LayerBlock<B> {
	let blocks = (0..num_blocks)
		.map(|index| match index {
			0 => basic_block(in_channels, out_channels, stride, device),
			_ => basic_block(out_channels, out_channels, 1, device),
		})
		.collect();

	LayerBlock { blocks }
}
