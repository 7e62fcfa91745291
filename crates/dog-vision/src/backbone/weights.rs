use crate::error::DogVisionError;
use burn::data::network::downloader;
use log::info;
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::PathBuf;

/// Published torchvision checkpoints the feature extractor can start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PretrainedWeights {
	/// ImageNet-1k, top-1 accuracy 69.758%.
	ResNet18ImageNet1kV1,
}

impl PretrainedWeights {
	pub fn url(&self) -> &'static str {
		match self {
			PretrainedWeights::ResNet18ImageNet1kV1 => "https://download.pytorch.org/models/resnet18-f37072fd.pth",
		}
	}

	pub fn num_classes(&self) -> usize {
		match self {
			PretrainedWeights::ResNet18ImageNet1kV1 => 1000,
		}
	}

	/// Path of the cached checkpoint, downloading it on first use.
	pub fn download(&self) -> Result<PathBuf, DogVisionError> {
		let model_dir = dirs::cache_dir()
			.or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
			.ok_or_else(|| {
				DogVisionError::WeightsDownload(std::io::Error::new(
					std::io::ErrorKind::NotFound,
					"no cache or home directory",
				))
			})?
			.join("dog-vision");

		create_dir_all(&model_dir).map_err(DogVisionError::WeightsDownload)?;

		let url = self.url();
		let file_base_name = url.rsplit_once('/').map_or(url, |(_, name)| name);
		let file_name = model_dir.join(file_base_name);

		if !file_name.exists() {
			info!("Downloading pretrained weights from {url}");
			let bytes = downloader::download_file_as_bytes(url, file_base_name);

			let mut output_file = File::create(&file_name).map_err(DogVisionError::WeightsDownload)?;
			if let Err(err) = output_file.write_all(&bytes) {
				std::fs::remove_file(&file_name).ok();
				return Err(DogVisionError::WeightsDownload(err));
			}
		}

		Ok(file_name)
	}
}
