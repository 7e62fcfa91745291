use crate::data::{images_to_tensor, DogDataset, Normalizer};
use crate::dataset::DogRecord;
use crate::error::DogVisionError;
use crate::labels::{LabelVocabulary, OneHot};
use crate::model::DogVisionModel;
use crate::pipeline::{create_batches, BatchConfig, Batches};
use crate::predict::accuracy;
use crate::preprocess::ImageTensor;
use burn::prelude::Backend;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Probabilities, one row per image, in batch order.
#[derive(Debug, Clone, Default)]
pub struct Predictions {
	pub paths: Vec<PathBuf>,
	pub probabilities: Vec<Vec<f32>>,
	pub labels: Option<Vec<OneHot>>,
	/// Kept only when requested, for rendering.
	pub images: Vec<ImageTensor>,
}

impl Predictions {
	pub fn len(&self) -> usize {
		self.probabilities.len()
	}

	pub fn is_empty(&self) -> bool {
		self.probabilities.is_empty()
	}

	pub fn accuracy(&self) -> Option<Result<f32, DogVisionError>> {
		self.labels.as_ref().map(|labels| accuracy(&self.probabilities, labels))
	}
}

/// Runs every batch through the model. Stops at the first batch that fails to preprocess.
pub fn predict<B: Backend>(
	model: &DogVisionModel<B>,
	batches: Batches,
	keep_images: bool,
	device: &B::Device,
) -> Result<Predictions, DogVisionError> {
	let normalizer = Normalizer::<B>::new(device);
	let num_classes = model.num_classes();
	let total = batches.len();

	let mut predictions = Predictions {
		labels: batches.is_labelled().then(Vec::new),
		..Predictions::default()
	};

	for (index, batch) in batches.enumerate() {
		let batch = batch?;
		debug!("Predicting batch {}/{total} ({} images)", index + 1, batch.len());

		let input = images_to_tensor(&batch.images, &normalizer, device);
		let output = model.forward_probabilities(input);
		let values = output
			.into_data()
			.to_vec::<f32>()
			.map_err(|err| DogVisionError::TensorData(format!("{err:?}")))?;

		predictions
			.probabilities
			.extend(values.chunks(num_classes).map(<[f32]>::to_vec));
		predictions.paths.extend(batch.paths);

		if let (Some(labels), Some(batch_labels)) = (predictions.labels.as_mut(), batch.labels) {
			labels.extend(batch_labels);
		}

		if keep_images {
			predictions.images.extend(batch.images);
		}
	}

	info!("Predicted {} images", predictions.len());
	Ok(predictions)
}

/// Predicts labelled batches and reports accuracy alongside.
pub fn evaluate<B: Backend>(
	model: &DogVisionModel<B>,
	batches: Batches,
	keep_images: bool,
	device: &B::Device,
) -> Result<(Predictions, f32), DogVisionError> {
	if !batches.is_labelled() {
		return Err(DogVisionError::Unlabelled);
	}

	let predictions = predict(model, batches, keep_images, device)?;
	let accuracy = predictions.accuracy().unwrap_or(Ok(0.0))?;
	info!("Accuracy: {:.2}%", accuracy * 100.0);

	Ok((predictions, accuracy))
}

/// Evaluates a model on `labels.csv` records whose images live in `image_dir`.
pub fn evaluate_records<B: Backend, P: AsRef<Path>>(
	model: &DogVisionModel<B>,
	vocabulary: &LabelVocabulary,
	records: &[DogRecord],
	image_dir: P,
	batch_size: usize,
	device: &B::Device,
) -> Result<(Predictions, f32), DogVisionError> {
	if vocabulary.len() != model.num_classes() {
		return Err(DogVisionError::ShapeMismatch {
			expected: model.num_classes(),
			actual: vocabulary.len(),
		});
	}

	let dataset = DogDataset::from_records(records, image_dir, vocabulary)?;
	let labels = dataset.labels();
	for label in &labels {
		vocabulary.check_label(label)?;
	}

	let batches = create_batches(dataset.paths(), Some(labels), &BatchConfig::default().with_batch_size(batch_size))?;
	evaluate(model, batches, false, device)
}
