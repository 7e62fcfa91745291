use std::num::ParseFloatError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DogVisionError {
	#[error("Could not read image file {path:?}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("Could not decode image {path:?}")]
	Decode {
		path: PathBuf,
		#[source]
		source: image::ImageError,
	},
	#[error("Could not write image {path:?}")]
	ImageSave {
		path: PathBuf,
		#[source]
		source: image::ImageError,
	},
	#[error("Breed {0:?} is not part of the label vocabulary")]
	UnknownLabel(String),
	#[error("Could not load model artifact {path:?}: {reason}")]
	ArtifactLoad { path: PathBuf, reason: String },
	#[error("Could not save model artifact {path:?}: {reason}")]
	ArtifactSave { path: PathBuf, reason: String },
	#[error("Shape mismatch: expected {expected} entries, found {actual}")]
	ShapeMismatch { expected: usize, actual: usize },
	#[error("Label index {index} is out of range for {len} classes")]
	LabelOutOfRange { index: usize, len: usize },
	#[error("One-hot label must have exactly one set entry, found {0}")]
	InvalidOneHot(usize),
	#[error("Invalid label vocabulary: {0}")]
	InvalidVocabulary(String),
	#[error("Evaluation needs labelled batches")]
	Unlabelled,
	#[error("No training images left from {records} records with validation fraction {validation_fraction}")]
	EmptyTrainingSet { records: usize, validation_fraction: f64 },
	#[error("Batch size must be greater than zero")]
	InvalidBatchSize,
	#[error("Malformed prediction at row {row}, column {column}")]
	MalformedPrediction {
		row: usize,
		column: usize,
		#[source]
		source: ParseFloatError,
	},
	#[error("Could not download pretrained weights")]
	WeightsDownload(#[source] std::io::Error),
	#[error("Tensor data error: {0}")]
	TensorData(String),
	#[error("CSV error")]
	Csv(#[from] csv::Error),
	#[error("Std IO error")]
	StdIoError(#[from] std::io::Error),
}
