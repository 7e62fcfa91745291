use crate::data::{DogBatcher, DogDataset, DogItem};
use crate::dataset::{breed_counts, median_count, read_records, train_valid_split};
use crate::error::DogVisionError;
use crate::labels::LabelVocabulary;
use crate::model::{DogVisionModel, DogVisionModelConfig};
use burn::config::Config;
use burn::data::dataloader::DataLoaderBuilder;
use burn::optim::AdamConfig;
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::store::{Aggregate, Direction, Split};
use burn::train::metric::{AccuracyMetric, CpuUse, LossMetric};
use burn::train::{LearnerBuilder, MetricEarlyStoppingStrategy, StoppingCondition};
use chrono::Local;
use log::{info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Config)]
pub struct TrainingConfig {
	pub optimizer: AdamConfig,
	#[config(default = 100)]
	pub num_epochs: usize,
	#[config(default = 32)]
	pub batch_size: usize,
	#[config(default = 4)]
	pub num_workers: usize,
	#[config(default = 42)]
	pub seed: u64,
	#[config(default = 1e-3)]
	pub learning_rate: f64,
	/// Epochs without accuracy improvement before training stops.
	#[config(default = 3)]
	pub patience: usize,
	/// Share of the records held out for validation. Zero trains and monitors on everything.
	#[config(default = 0.2)]
	pub validation_fraction: f64,
	#[config(default = true)]
	pub freeze_backbone: bool,
	/// Only use the first `num_images` records, for quick experiments.
	pub num_images: Option<usize>,
}

/// Where the labelled data lives and where run output goes.
#[derive(Debug, Clone)]
pub struct TrainingData {
	pub labels_csv: PathBuf,
	pub train_dir: PathBuf,
	pub log_dir: PathBuf,
}

pub struct TrainedModel<B: AutodiffBackend> {
	pub model: DogVisionModel<B>,
	pub model_config: DogVisionModelConfig,
	pub vocabulary: LabelVocabulary,
	pub validation: DogDataset,
	pub run_dir: PathBuf,
}

/// `<log_dir>/<YYYYMMDD-HHMMSS>`, one directory per experiment.
pub fn create_run_dir<P: AsRef<Path>>(log_dir: P) -> Result<PathBuf, DogVisionError> {
	let run_dir = log_dir.as_ref().join(Local::now().format("%Y%m%d-%H%M%S").to_string());
	std::fs::create_dir_all(&run_dir)?;
	Ok(run_dir)
}

/// Splits the items, or reuses all of them for validation when no share is held out.
fn split_items(items: Vec<DogItem>, config: &TrainingConfig) -> Result<(DogDataset, DogDataset, Split), DogVisionError> {
	let records = items.len();
	let (train, valid, monitored) = if config.validation_fraction <= 0.0 {
		warn!("No validation split, monitoring accuracy on the training data");
		let dataset = DogDataset::from(items);
		(dataset.clone(), dataset, Split::Train)
	} else {
		let (train, valid) = train_valid_split(items, config.validation_fraction, config.seed);
		(DogDataset::from(train), DogDataset::from(valid), Split::Valid)
	};

	if train.items.is_empty() {
		return Err(DogVisionError::EmptyTrainingSet {
			records,
			validation_fraction: config.validation_fraction,
		});
	}

	Ok((train, valid, monitored))
}

pub fn load_training_items(
	data: &TrainingData,
	num_images: Option<usize>,
) -> Result<(LabelVocabulary, Vec<DogItem>), DogVisionError> {
	let records = read_records(&data.labels_csv)?;
	info!("Read {} labelled images from {}", records.len(), data.labels_csv.display());

	let counts = breed_counts(&records);
	if let (Some(most), Some(least)) = (counts.first(), counts.last()) {
		info!(
			"{} breeds, most common {} ({}), least common {} ({}), median {:?} images per breed",
			counts.len(),
			most.0,
			most.1,
			least.0,
			least.1,
			median_count(&counts)
		);
	}

	// The vocabulary covers every breed even when only a subset of images is used
	let vocabulary = LabelVocabulary::build(records.iter().map(|record| record.breed.as_str()));

	let records = match num_images {
		Some(limit) => &records[..limit.min(records.len())],
		None => &records[..],
	};

	let dataset = DogDataset::from_records(records, &data.train_dir, &vocabulary)?;

	// Inside the data loader a missing image can only panic
	if let Some(missing) = dataset.items.iter().find(|item| !item.path.is_file()) {
		return Err(DogVisionError::FileRead {
			path: missing.path.clone(),
			source: io::Error::new(io::ErrorKind::NotFound, "training image not found"),
		});
	}

	Ok((vocabulary, dataset.items))
}

pub fn train_run<B: AutodiffBackend>(
	config: &TrainingConfig,
	data: &TrainingData,
	device: B::Device,
) -> Result<TrainedModel<B>, DogVisionError> {
	let run_dir = create_run_dir(&data.log_dir)?;
	config.save(run_dir.join("config.json"))?;

	B::seed(config.seed);

	let (vocabulary, items) = load_training_items(data, config.num_images)?;
	let (train, validation, monitored) = split_items(items, config)?;
	info!("Train dataset size: {}", train.items.len());
	info!("Valid dataset size: {}", validation.items.len());

	let model_config = DogVisionModelConfig::new(vocabulary.len()).with_freeze_backbone(config.freeze_backbone);
	let model = model_config.init_pretrained::<B>(&device)?;

	let batcher_train = DogBatcher::<B>::new(device.clone());
	let batcher_valid = DogBatcher::<B::InnerBackend>::new(device.clone());

	let dataloader_train = DataLoaderBuilder::new(batcher_train)
		.batch_size(config.batch_size)
		.shuffle(config.seed)
		.num_workers(config.num_workers)
		.build(train);

	let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
		.batch_size(config.batch_size)
		.num_workers(config.num_workers)
		.build(validation.clone());

	let run_dir_str = run_dir.to_string_lossy().to_string();
	let learner = LearnerBuilder::new(&run_dir_str)
		.metric_train_numeric(AccuracyMetric::new())
		.metric_valid_numeric(AccuracyMetric::new())
		.metric_train_numeric(LossMetric::new())
		.metric_valid_numeric(LossMetric::new())
		.metric_train(CpuUse::new())
		.with_file_checkpointer(CompactRecorder::new())
		.early_stopping(MetricEarlyStoppingStrategy::new::<AccuracyMetric<B>>(
			Aggregate::Mean,
			Direction::Highest,
			monitored,
			StoppingCondition::NoImprovementSince {
				n_epochs: config.patience,
			},
		))
		.devices(vec![device.clone()])
		.num_epochs(config.num_epochs)
		.summary()
		.build(model, config.optimizer.init(), config.learning_rate);

	let now = Instant::now();
	let model = learner.fit(dataloader_train, dataloader_valid);
	let elapsed = now.elapsed().as_secs();
	info!("Training completed in {}m{}s", elapsed / 60, elapsed % 60);

	Ok(TrainedModel {
		model,
		model_config,
		vocabulary,
		validation,
		run_dir,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{write_jpeg, TempDir};

	const IDS: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

	fn write_labels(dir: &Path) -> TrainingData {
		let labels_csv = dir.join("labels.csv");
		std::fs::write(
			&labels_csv,
			"id,breed\na,pug\nb,beagle\nc,shiba\nd,pug\ne,beagle\nf,whippet\n",
		)
		.unwrap();

		let train_dir = dir.join("train");
		std::fs::create_dir_all(&train_dir).unwrap();
		for id in IDS {
			write_jpeg(&train_dir.join(format!("{id}.jpg")), 8, 8, [90, 60, 30]);
		}

		TrainingData {
			labels_csv,
			train_dir,
			log_dir: dir.join("logs"),
		}
	}

	#[test]
	fn vocabulary_covers_all_records_when_subsetting() {
		let dir = TempDir::new("train-items");
		let data = write_labels(dir.path());

		let (vocabulary, items) = load_training_items(&data, Some(3)).unwrap();
		assert_eq!(vocabulary.breeds(), ["beagle", "pug", "shiba", "whippet"]);
		assert_eq!(items.len(), 3);
		assert_eq!(items[0].path, dir.path().join("train").join("a.jpg"));
		assert_eq!(items[0].label.index(), 1);
		assert_eq!(items[0].label.len(), 4);
	}

	#[test]
	fn split_respects_validation_fraction() {
		let dir = TempDir::new("train-split");
		let data = write_labels(dir.path());
		let (_, items) = load_training_items(&data, None).unwrap();

		let config = TrainingConfig::new(AdamConfig::new()).with_validation_fraction(0.5);
		let (train, valid, split) = split_items(items.clone(), &config).unwrap();
		assert_eq!((train.items.len(), valid.items.len()), (3, 3));
		assert!(matches!(split, Split::Valid));

		let config = config.with_validation_fraction(0.0);
		let (train, valid, split) = split_items(items, &config).unwrap();
		assert_eq!((train.items.len(), valid.items.len()), (6, 6));
		assert!(matches!(split, Split::Train));
	}

	#[test]
	fn missing_training_image_is_reported_before_fitting() {
		let dir = TempDir::new("train-missing-image");
		let data = write_labels(dir.path());
		std::fs::remove_file(data.train_dir.join("c.jpg")).unwrap();

		let err = load_training_items(&data, None).unwrap_err();
		assert!(matches!(err, DogVisionError::FileRead { path, .. } if path == data.train_dir.join("c.jpg")));

		// the subset never reaches the missing image
		assert_eq!(load_training_items(&data, Some(2)).unwrap().1.len(), 2);
	}

	#[test]
	fn split_leaving_nothing_to_train_on_is_rejected() {
		let dir = TempDir::new("train-empty-split");
		let data = write_labels(dir.path());
		let (_, items) = load_training_items(&data, Some(1)).unwrap();

		let config = TrainingConfig::new(AdamConfig::new());
		let err = split_items(items, &config).err().unwrap();
		assert!(matches!(err, DogVisionError::EmptyTrainingSet { records: 1, .. }));
	}

	#[test]
	fn config_round_trips_through_json() {
		let dir = TempDir::new("train-config");
		let path = dir.path().join("config.json");

		let config = TrainingConfig::new(AdamConfig::new()).with_num_images(Some(1000)).with_patience(5);
		config.save(&path).unwrap();

		let loaded = TrainingConfig::load(&path).unwrap();
		assert_eq!(loaded.num_images, Some(1000));
		assert_eq!(loaded.patience, 5);
		assert_eq!(loaded.batch_size, 32);
	}

	#[test]
	fn run_dirs_are_timestamped() {
		let dir = TempDir::new("train-run-dir");
		let run_dir = create_run_dir(dir.path()).unwrap();

		let name = run_dir.file_name().unwrap().to_string_lossy().to_string();
		assert_eq!(name.len(), "20241229-213511".len());
		assert_eq!(name.as_bytes()[8], b'-');
		assert!(run_dir.is_dir());
	}
}
