use crate::error::DogVisionError;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::fs;
use std::path::Path;

pub const IMAGE_SIZE: usize = 224;
pub const CHANNELS: usize = 3;

const TENSOR_LEN: usize = IMAGE_SIZE * IMAGE_SIZE * CHANNELS;

/// A preprocessed image laid out as `[height, width, channel]` with values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
	data: Vec<f32>,
}

impl ImageTensor {
	pub fn from_raw(data: Vec<f32>) -> Result<Self, DogVisionError> {
		if data.len() != TENSOR_LEN {
			return Err(DogVisionError::ShapeMismatch {
				expected: TENSOR_LEN,
				actual: data.len(),
			});
		}

		Ok(Self { data })
	}

	pub fn shape(&self) -> [usize; 3] {
		[IMAGE_SIZE, IMAGE_SIZE, CHANNELS]
	}

	pub fn get(&self, y: usize, x: usize, channel: usize) -> Option<f32> {
		if y >= IMAGE_SIZE || x >= IMAGE_SIZE || channel >= CHANNELS {
			return None;
		}

		self.data.get((y * IMAGE_SIZE + x) * CHANNELS + channel).copied()
	}

	pub fn as_slice(&self) -> &[f32] {
		&self.data
	}

	pub fn into_raw(self) -> Vec<f32> {
		self.data
	}

	pub fn to_rgb8(&self) -> RgbImage {
		let pixels = self
			.data
			.iter()
			.map(|value| (value.clamp(0.0, 1.0) * 255.0).round() as u8)
			.collect();

		// The length is fixed by the constructor
		RgbImage::from_raw(IMAGE_SIZE as u32, IMAGE_SIZE as u32, pixels)
			.unwrap_or_else(|| RgbImage::new(IMAGE_SIZE as u32, IMAGE_SIZE as u32))
	}
}

/// Reads, decodes, rescales to `[0, 1]` and resizes an image file to 224x224x3.
///
/// The resize ignores the aspect ratio, so non-square images are stretched.
pub fn process_image<P: AsRef<Path>>(path: P) -> Result<ImageTensor, DogVisionError> {
	let path = path.as_ref();

	let bytes = fs::read(path).map_err(|source| DogVisionError::FileRead {
		path: path.to_path_buf(),
		source,
	})?;

	let image = image::load_from_memory(&bytes).map_err(|source| DogVisionError::Decode {
		path: path.to_path_buf(),
		source,
	})?;

	// to_rgb32f divides every 8-bit channel by 255
	let image = image.to_rgb32f();
	let resized = imageops::resize(&image, IMAGE_SIZE as u32, IMAGE_SIZE as u32, FilterType::Triangle);

	ImageTensor::from_raw(resized.into_raw())
}
