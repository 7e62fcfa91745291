use crate::error::DogVisionError;
use crate::labels::OneHot;
use crate::preprocess::{process_image, ImageTensor};
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{thread_rng, SeedableRng};
use rayon::prelude::*;
use std::path::PathBuf;
use std::vec::IntoIter;

pub const DEFAULT_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
	pub batch_size: usize,
	pub shuffle: bool,
	pub seed: Option<u64>,
}

impl Default for BatchConfig {
	fn default() -> Self {
		Self {
			batch_size: DEFAULT_BATCH_SIZE,
			shuffle: false,
			seed: None,
		}
	}
}

impl BatchConfig {
	pub fn with_batch_size(mut self, batch_size: usize) -> Self {
		self.batch_size = batch_size;
		self
	}

	pub fn shuffled(mut self, seed: Option<u64>) -> Self {
		self.shuffle = true;
		self.seed = seed;
		self
	}
}

/// Preprocessed images with their source paths and, outside inference, their labels.
#[derive(Debug, Clone)]
pub struct Batch {
	pub paths: Vec<PathBuf>,
	pub images: Vec<ImageTensor>,
	pub labels: Option<Vec<OneHot>>,
}

impl Batch {
	pub fn len(&self) -> usize {
		self.images.len()
	}

	pub fn is_empty(&self) -> bool {
		self.images.is_empty()
	}
}

/// Pairs paths with optional labels and groups them into lazily preprocessed batches.
///
/// With `shuffle` the pairs are permuted once, up front. Without labels the batches are
/// image-only, for inference.
pub fn create_batches(
	paths: Vec<PathBuf>,
	labels: Option<Vec<OneHot>>,
	config: &BatchConfig,
) -> Result<Batches, DogVisionError> {
	if config.batch_size == 0 {
		return Err(DogVisionError::InvalidBatchSize);
	}

	if let Some(labels) = &labels {
		if labels.len() != paths.len() {
			return Err(DogVisionError::ShapeMismatch {
				expected: paths.len(),
				actual: labels.len(),
			});
		}
	}

	let labelled = labels.is_some();
	let mut items: Vec<(PathBuf, Option<OneHot>)> = match labels {
		Some(labels) => paths.into_iter().zip(labels.into_iter().map(Some)).collect(),
		None => paths.into_iter().map(|path| (path, None)).collect(),
	};

	if config.shuffle {
		match config.seed {
			Some(seed) => items.shuffle(&mut StdRng::seed_from_u64(seed)),
			None => items.shuffle(&mut thread_rng()),
		}
	}

	debug!(
		"Created pipeline over {} items (batch size {}, shuffled: {})",
		items.len(),
		config.batch_size,
		config.shuffle
	);

	Ok(Batches {
		remaining: items.len(),
		items: items.into_iter(),
		batch_size: config.batch_size,
		labelled,
		failed: false,
	})
}

/// Finite, single-pass sequence of batches. Images are decoded when a batch is pulled.
pub struct Batches {
	items: IntoIter<(PathBuf, Option<OneHot>)>,
	remaining: usize,
	batch_size: usize,
	labelled: bool,
	failed: bool,
}

impl Batches {
	pub fn is_labelled(&self) -> bool {
		self.labelled
	}

	pub fn batch_size(&self) -> usize {
		self.batch_size
	}

	/// Number of batches not yet pulled.
	pub fn len(&self) -> usize {
		if self.failed {
			return 0;
		}

		self.remaining.div_ceil(self.batch_size)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Iterator for Batches {
	type Item = Result<Batch, DogVisionError>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.failed || self.remaining == 0 {
			return None;
		}

		let chunk: Vec<(PathBuf, Option<OneHot>)> = self.items.by_ref().take(self.batch_size).collect();
		self.remaining -= chunk.len();

		let (paths, labels): (Vec<PathBuf>, Vec<Option<OneHot>>) = chunk.into_iter().unzip();

		let images = paths
			.par_iter()
			.map(process_image)
			.collect::<Result<Vec<ImageTensor>, DogVisionError>>();

		let images = match images {
			Ok(images) => images,
			Err(err) => {
				self.failed = true;
				return Some(Err(err));
			}
		};

		let labels = if self.labelled {
			labels.into_iter().collect::<Option<Vec<OneHot>>>()
		} else {
			None
		};

		Some(Ok(Batch { paths, images, labels }))
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		let len = self.len();
		(0, Some(len))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{write_numbered_images, TempDir};

	fn labels(count: usize, classes: usize) -> Vec<OneHot> {
		(0..count).map(|index| OneHot::new(index % classes, classes).unwrap()).collect()
	}

	fn red_level(image: &ImageTensor) -> usize {
		(image.get(0, 0, 0).unwrap() * 255.0).round() as usize / 10
	}

	#[test]
	fn ten_items_in_batches_of_four() {
		let dir = TempDir::new("pipeline-sizes");
		let paths = write_numbered_images(dir.path(), 10);

		let batches = create_batches(paths.clone(), None, &BatchConfig::default().with_batch_size(4)).unwrap();
		assert_eq!(batches.len(), 3);

		let batches: Vec<Batch> = batches.map(Result::unwrap).collect();
		let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
		assert_eq!(sizes, vec![4, 4, 2]);

		let seen: Vec<PathBuf> = batches.iter().flat_map(|batch| batch.paths.clone()).collect();
		assert_eq!(seen, paths);
		assert!(batches.iter().all(|batch| batch.labels.is_none()));
	}

	#[test]
	fn exact_multiple_keeps_full_last_batch() {
		let dir = TempDir::new("pipeline-multiple");
		let paths = write_numbered_images(dir.path(), 8);

		let sizes: Vec<usize> = create_batches(paths, None, &BatchConfig::default().with_batch_size(4))
			.unwrap()
			.map(|batch| batch.unwrap().len())
			.collect();
		assert_eq!(sizes, vec![4, 4]);
	}

	#[test]
	fn labels_stay_with_their_images() {
		let dir = TempDir::new("pipeline-correspondence");
		let paths = write_numbered_images(dir.path(), 7);
		let labels = labels(7, 7);

		for config in [
			BatchConfig::default().with_batch_size(3),
			BatchConfig::default().with_batch_size(3).shuffled(Some(7)),
		] {
			for batch in create_batches(paths.clone(), Some(labels.clone()), &config).unwrap() {
				let batch = batch.unwrap();
				let batch_labels = batch.labels.as_ref().unwrap();
				assert_eq!(batch_labels.len(), batch.len());

				for (image, label) in batch.images.iter().zip(batch_labels) {
					assert_eq!(red_level(image), label.index());
				}
			}
		}
	}

	#[test]
	fn unshuffled_batches_follow_input_order() {
		let dir = TempDir::new("pipeline-order");
		let paths = write_numbered_images(dir.path(), 5);

		let levels: Vec<usize> = create_batches(paths, None, &BatchConfig::default().with_batch_size(2))
			.unwrap()
			.flat_map(|batch| batch.unwrap().images)
			.map(|image| red_level(&image))
			.collect();
		assert_eq!(levels, vec![0, 1, 2, 3, 4]);
	}

	#[test]
	fn seeded_shuffle_is_a_reproducible_permutation() {
		let dir = TempDir::new("pipeline-shuffle");
		let paths = write_numbered_images(dir.path(), 12);
		let config = BatchConfig::default().with_batch_size(5).shuffled(Some(42));

		let order = |paths: Vec<PathBuf>| -> Vec<PathBuf> {
			create_batches(paths, None, &config)
				.unwrap()
				.flat_map(|batch| batch.unwrap().paths)
				.collect()
		};

		let first = order(paths.clone());
		assert_eq!(first, order(paths.clone()));

		let mut sorted = first.clone();
		sorted.sort();
		assert_eq!(sorted, paths);
	}

	#[test]
	fn rejects_mismatched_labels_and_zero_batch_size() {
		let paths = vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")];

		let err = create_batches(paths.clone(), Some(labels(3, 3)), &BatchConfig::default()).err().unwrap();
		assert!(matches!(err, DogVisionError::ShapeMismatch { expected: 2, actual: 3 }));

		let err = create_batches(paths, None, &BatchConfig::default().with_batch_size(0)).err().unwrap();
		assert!(matches!(err, DogVisionError::InvalidBatchSize));
	}

	#[test]
	fn bad_image_aborts_its_batch_and_ends_the_sequence() {
		let dir = TempDir::new("pipeline-bad-image");
		let mut paths = write_numbered_images(dir.path(), 4);
		paths.insert(2, dir.path().join("missing.jpg"));

		let mut batches = create_batches(paths, None, &BatchConfig::default().with_batch_size(2)).unwrap();
		assert!(batches.next().unwrap().is_ok());
		assert!(matches!(batches.next().unwrap(), Err(DogVisionError::FileRead { .. })));
		assert!(batches.next().is_none());
		assert!(batches.is_empty());
	}

	#[test]
	fn exhausted_pipeline_stays_empty() {
		let dir = TempDir::new("pipeline-exhausted");
		let paths = write_numbered_images(dir.path(), 3);

		let mut batches = create_batches(paths, None, &BatchConfig::default()).unwrap();
		assert_eq!(batches.by_ref().count(), 1);
		assert!(batches.next().is_none());
	}
}
