use crate::error::DogVisionError;
use crate::labels::LabelVocabulary;
use crate::model::{DogVisionModel, DogVisionModelConfig};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use chrono::Local;
use log::info;
use std::path::{Path, PathBuf};

const WEIGHTS_EXTENSION: &str = "mpk";
const MANIFEST_EXTENSION: &str = "json";

/// Everything needed to rebuild the architecture before the weights are loaded into it.
#[derive(Config)]
pub struct ArtifactManifest {
	pub model: DogVisionModelConfig,
	pub breeds: Vec<String>,
}

pub struct LoadedModel<B: Backend> {
	pub model: DogVisionModel<B>,
	pub model_config: DogVisionModelConfig,
	pub vocabulary: LabelVocabulary,
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
	NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Strips a trailing `.mpk`/`.json` so either file or the bare stem can be passed.
fn artifact_stem(path: &Path) -> PathBuf {
	match path.extension().and_then(|ext| ext.to_str()) {
		Some(WEIGHTS_EXTENSION) | Some(MANIFEST_EXTENSION) => path.with_extension(""),
		_ => path.to_path_buf(),
	}
}

/// Saves to `<model_dir>/<YYYYMMDD-HHMMSS>-<suffix>` and returns that path.
pub fn save_model<B: Backend, P: AsRef<Path>>(
	model: &DogVisionModel<B>,
	model_config: &DogVisionModelConfig,
	vocabulary: &LabelVocabulary,
	model_dir: P,
	suffix: &str,
) -> Result<PathBuf, DogVisionError> {
	std::fs::create_dir_all(model_dir.as_ref())?;

	let timestamp = Local::now().format("%Y%m%d-%H%M%S");
	let stem = model_dir.as_ref().join(format!("{timestamp}-{suffix}"));
	info!("Saving model to: {}...", stem.display());

	let manifest = ArtifactManifest::new(model_config.clone(), vocabulary.breeds().to_vec());
	manifest
		.save(stem.with_extension(MANIFEST_EXTENSION))
		.map_err(|err| DogVisionError::ArtifactSave {
			path: stem.clone(),
			reason: err.to_string(),
		})?;

	model
		.clone()
		.save_file(stem.clone(), &recorder())
		.map_err(|err| DogVisionError::ArtifactSave {
			path: stem.clone(),
			reason: format!("{err:?}"),
		})?;

	Ok(stem)
}

/// Reads only the manifest, for when the breed names are needed without the weights.
pub fn load_manifest<P: AsRef<Path>>(path: P) -> Result<ArtifactManifest, DogVisionError> {
	let manifest_path = artifact_stem(path.as_ref()).with_extension(MANIFEST_EXTENSION);
	ArtifactManifest::load(&manifest_path).map_err(|err| DogVisionError::ArtifactLoad {
		path: manifest_path,
		reason: format!("{err:?}"),
	})
}

pub fn load_model<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<LoadedModel<B>, DogVisionError> {
	let stem = artifact_stem(path.as_ref());
	info!("Loading saved model from {}", stem.display());

	let manifest = load_manifest(&stem)?;
	let vocabulary = LabelVocabulary::from_breeds(manifest.breeds)?;
	if manifest.model.num_classes != vocabulary.len() {
		return Err(DogVisionError::ShapeMismatch {
			expected: vocabulary.len(),
			actual: manifest.model.num_classes,
		});
	}

	let weights_path = stem.with_extension(WEIGHTS_EXTENSION);
	if !weights_path.is_file() {
		return Err(DogVisionError::ArtifactLoad {
			path: weights_path,
			reason: "weights file not found".to_string(),
		});
	}

	let model = manifest
		.model
		.init::<B>(device)
		.load_file(stem, &recorder(), device)
		.map_err(|err| DogVisionError::ArtifactLoad {
			path: weights_path,
			reason: format!("{err:?}"),
		})?;

	Ok(LoadedModel {
		model,
		model_config: manifest.model,
		vocabulary,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::TempDir;
	use approx::assert_abs_diff_eq;
	use burn::backend::ndarray::{NdArray, NdArrayDevice};
	use burn::tensor::{Distribution, Tensor};

	#[test]
	fn save_then_load_reproduces_predictions() {
		let dir = TempDir::new("persist-round-trip");
		let device = NdArrayDevice::Cpu;
		let vocabulary = LabelVocabulary::build(["beagle", "pug", "shiba"]);
		let config = DogVisionModelConfig::new(vocabulary.len());
		let model = config.init::<NdArray>(&device);

		let stem = save_model(&model, &config, &vocabulary, dir.path(), "test-images-resnet18-Adam").unwrap();
		let name = stem.file_name().unwrap().to_string_lossy().to_string();
		assert!(name.ends_with("-test-images-resnet18-Adam"));
		assert!(stem.with_extension("mpk").is_file());
		assert!(stem.with_extension("json").is_file());

		let loaded = load_model::<NdArray, _>(stem.with_extension("mpk"), &device).unwrap();
		assert_eq!(loaded.vocabulary, vocabulary);
		assert_eq!(loaded.model.num_classes(), 3);

		let images = Tensor::<NdArray, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
		let expected = model.forward(images.clone()).into_data().to_vec::<f32>().unwrap();
		let actual = loaded.model.forward(images).into_data().to_vec::<f32>().unwrap();
		for (expected, actual) in expected.iter().zip(&actual) {
			assert_abs_diff_eq!(expected, actual, epsilon = 1e-5);
		}
	}

	#[test]
	fn missing_artifact_fails_to_load() {
		let dir = TempDir::new("persist-missing");
		let result = load_model::<NdArray, _>(dir.path().join("20241229-213511-nothing"), &NdArrayDevice::Cpu);
		assert!(matches!(result, Err(DogVisionError::ArtifactLoad { .. })));
	}

	#[test]
	fn manifest_without_weights_fails_to_load() {
		let dir = TempDir::new("persist-no-weights");
		let stem = dir.path().join("20241229-213511-manifest-only");
		ArtifactManifest::new(DogVisionModelConfig::new(2), vec!["beagle".into(), "pug".into()])
			.save(stem.with_extension("json"))
			.unwrap();

		let result = load_model::<NdArray, _>(&stem, &NdArrayDevice::Cpu);
		assert!(matches!(result, Err(DogVisionError::ArtifactLoad { .. })));
	}

	#[test]
	fn manifest_class_count_must_match_vocabulary() {
		let dir = TempDir::new("persist-mismatch");
		let stem = dir.path().join("20241229-213511-mismatch");
		ArtifactManifest::new(DogVisionModelConfig::new(5), vec!["beagle".into(), "pug".into()])
			.save(stem.with_extension("json"))
			.unwrap();

		let result = load_model::<NdArray, _>(&stem, &NdArrayDevice::Cpu);
		assert!(matches!(result, Err(DogVisionError::ShapeMismatch { expected: 2, actual: 5 })));
	}

	#[test]
	fn manifest_loads_without_weights() {
		let dir = TempDir::new("persist-manifest");
		let stem = dir.path().join("20241229-213511-manifest");
		ArtifactManifest::new(DogVisionModelConfig::new(2), vec!["beagle".into(), "pug".into()])
			.save(stem.with_extension("json"))
			.unwrap();

		let manifest = load_manifest(stem.with_extension("mpk")).unwrap();
		assert_eq!(manifest.breeds, ["beagle", "pug"]);
		assert_eq!(manifest.model.num_classes, 2);
		assert!(manifest.model.freeze_backbone);
	}

	#[test]
	fn stem_accepts_either_file() {
		assert_eq!(artifact_stem(Path::new("m/a-b.mpk")), PathBuf::from("m/a-b"));
		assert_eq!(artifact_stem(Path::new("m/a-b.json")), PathBuf::from("m/a-b"));
		assert_eq!(artifact_stem(Path::new("m/a-b")), PathBuf::from("m/a-b"));
	}
}
