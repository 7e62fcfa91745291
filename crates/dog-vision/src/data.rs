use crate::dataset::{resolve_path, DogRecord, IMAGE_EXTENSION};
use crate::error::DogVisionError;
use crate::labels::{LabelVocabulary, OneHot};
use crate::preprocess::{process_image, ImageTensor, CHANNELS, IMAGE_SIZE};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::{Backend, Int};
use burn::tensor::{Tensor, TensorData};
use log::error;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

// ImageNet statistics the feature extractor was trained with
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Clone, Debug)]
pub struct Normalizer<B: Backend> {
	pub mean: Tensor<B, 4>,
	pub std: Tensor<B, 4>,
}

impl<B: Backend> Normalizer<B> {
	pub fn new(device: &B::Device) -> Self {
		let mean = Tensor::<B, 1>::from_floats(MEAN, device).reshape([1, 3, 1, 1]);
		let std = Tensor::<B, 1>::from_floats(STD, device).reshape([1, 3, 1, 1]);
		Self { mean, std }
	}

	pub fn normalize(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
		(input - self.mean.clone()) / self.std.clone()
	}
}

/// Stacks `[224, 224, 3]` images into a normalized `[batch, 3, 224, 224]` tensor.
pub fn images_to_tensor<B: Backend>(images: &[ImageTensor], normalizer: &Normalizer<B>, device: &B::Device) -> Tensor<B, 4> {
	let data: Vec<f32> = images.iter().flat_map(|image| image.as_slice().iter().copied()).collect();
	let data = TensorData::new(data, [images.len(), IMAGE_SIZE, IMAGE_SIZE, CHANNELS]);

	let images = Tensor::<B, 4>::from_data(data.convert::<B::FloatElem>(), device).permute([0, 3, 1, 2]);
	normalizer.normalize(images)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DogItem {
	pub path: PathBuf,
	pub label: OneHot,
}

#[derive(Debug, Clone, Default)]
pub struct DogDataset {
	pub items: Vec<DogItem>,
}

impl DogDataset {
	/// Resolves every record's image path under `train_dir` and encodes its breed.
	pub fn from_records<P: AsRef<Path>>(
		records: &[DogRecord],
		train_dir: P,
		vocabulary: &LabelVocabulary,
	) -> Result<Self, DogVisionError> {
		let items = records
			.iter()
			.map(|record| {
				Ok(DogItem {
					path: resolve_path(train_dir.as_ref(), &record.id, IMAGE_EXTENSION),
					label: vocabulary.encode(&record.breed)?,
				})
			})
			.collect::<Result<Vec<DogItem>, DogVisionError>>()?;

		Ok(Self { items })
	}

	pub fn paths(&self) -> Vec<PathBuf> {
		self.items.iter().map(|item| item.path.clone()).collect()
	}

	pub fn labels(&self) -> Vec<OneHot> {
		self.items.iter().map(|item| item.label.clone()).collect()
	}
}

impl From<Vec<DogItem>> for DogDataset {
	fn from(items: Vec<DogItem>) -> Self {
		Self { items }
	}
}

impl Dataset<DogItem> for DogDataset {
	fn get(&self, index: usize) -> Option<DogItem> {
		self.items.get(index).cloned()
	}

	fn len(&self) -> usize {
		self.items.len()
	}
}

#[derive(Clone, Debug)]
pub struct DogBatch<B: Backend> {
	pub images: Tensor<B, 4>,
	pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone)]
pub struct DogBatcher<B: Backend> {
	normalizer: Normalizer<B>,
	device: B::Device,
}

impl<B: Backend> DogBatcher<B> {
	pub fn new(device: B::Device) -> Self {
		Self {
			normalizer: Normalizer::new(&device),
			device,
		}
	}
}

impl<B: Backend> Batcher<DogItem, DogBatch<B>> for DogBatcher<B> {
	fn batch(&self, items: Vec<DogItem>) -> DogBatch<B> {
		// The data loader cannot surface errors, so a bad image ends the run here
		let images = items
			.par_iter()
			.map(|item| process_image(&item.path))
			.collect::<Result<Vec<ImageTensor>, DogVisionError>>()
			.unwrap_or_else(|err| {
				error!("Aborting batch: {err}");
				panic!("Could not preprocess training batch: {err}")
			});

		let targets: Vec<i64> = items.iter().map(|item| item.label.index() as i64).collect();
		let targets = TensorData::new(targets, [items.len()]);

		DogBatch {
			images: images_to_tensor(&images, &self.normalizer, &self.device),
			targets: Tensor::from_data(targets.convert::<B::IntElem>(), &self.device),
		}
	}
}
