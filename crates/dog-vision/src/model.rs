use crate::backbone::{PretrainedWeights, ResNetBackbone};
use crate::data::DogBatch;
use crate::error::DogVisionError;
use burn::config::Config;
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::activation::softmax;
use burn::tensor::backend::AutodiffBackend;
use burn::train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep};

const FEATURE_WEIGHTS: PretrainedWeights = PretrainedWeights::ResNet18ImageNet1kV1;

/// Pretrained feature extractor followed by a trainable dense classification head.
#[derive(Debug, Module)]
pub struct DogVisionModel<B: Backend> {
	backbone: ResNetBackbone<B>,
	head: Linear<B>,
	freeze_backbone: bool,
}

impl<B: Backend> DogVisionModel<B> {
	/// Class logits for `[batch, 3, 224, 224]` normalized images.
	pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
		let features = self.backbone.forward(images);
		self.head.forward(features)
	}

	pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
		softmax(self.forward(images), 1)
	}

	pub fn forward_classification(&self, images: Tensor<B, 4>, targets: Tensor<B, 1, Int>) -> ClassificationOutput<B> {
		classification_output(self.forward(images), targets)
	}

	pub fn num_classes(&self) -> usize {
		self.head.weight.dims()[1]
	}
}

impl<B: AutodiffBackend> DogVisionModel<B> {
	/// Logits on the training backend. A frozen backbone runs in inference mode here, so its
	/// batch norm statistics stay those of the pretrained weights.
	pub fn forward_train(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
		if !self.freeze_backbone {
			return self.forward(images);
		}

		let features = self.backbone.valid().forward(images.inner());
		self.head.forward(Tensor::from_inner(features))
	}
}

fn classification_output<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> ClassificationOutput<B> {
	let loss = CrossEntropyLossConfig::new()
		.init(&output.device())
		.forward(output.clone(), targets.clone());

	ClassificationOutput::new(loss, output, targets)
}

impl<B: AutodiffBackend> TrainStep<DogBatch<B>, ClassificationOutput<B>> for DogVisionModel<B> {
	fn step(&self, batch: DogBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
		let item = classification_output(self.forward_train(batch.images), batch.targets);

		TrainOutput::new(self, item.loss.backward(), item)
	}
}

impl<B: Backend> ValidStep<DogBatch<B>, ClassificationOutput<B>> for DogVisionModel<B> {
	fn step(&self, batch: DogBatch<B>) -> ClassificationOutput<B> {
		self.forward_classification(batch.images, batch.targets)
	}
}

#[derive(Debug, Config)]
pub struct DogVisionModelConfig {
	pub num_classes: usize,
	/// Keep the feature extractor's weights fixed and train only the head.
	#[config(default = true)]
	pub freeze_backbone: bool,
}

impl DogVisionModelConfig {
	/// Randomly initialized model, the shape a saved artifact is loaded into.
	pub fn init<B: Backend>(&self, device: &B::Device) -> DogVisionModel<B> {
		self.assemble(ResNetBackbone::resnet18(FEATURE_WEIGHTS.num_classes(), device), device)
	}

	/// Model on top of the downloaded ImageNet feature extractor.
	pub fn init_pretrained<B: Backend>(&self, device: &B::Device) -> Result<DogVisionModel<B>, DogVisionError> {
		let backbone = ResNetBackbone::resnet18_pretrained(FEATURE_WEIGHTS, device)?;
		Ok(self.assemble(backbone, device))
	}

	fn assemble<B: Backend>(&self, backbone: ResNetBackbone<B>, device: &B::Device) -> DogVisionModel<B> {
		let backbone = if self.freeze_backbone { backbone.no_grad() } else { backbone };
		let head = LinearConfig::new(backbone.num_classes(), self.num_classes).init(device);

		DogVisionModel {
			backbone,
			head,
			freeze_backbone: self.freeze_backbone,
		}
	}
}
