use crate::error::DogVisionError;
use crate::labels::LabelVocabulary;
use crate::predict::top_k;
use crate::preprocess::{ImageTensor, IMAGE_SIZE};
use image::{imageops, Rgb, RgbImage};
use std::fmt;
use std::path::Path;

pub const DEFAULT_TOP_K: usize = 10;

const BORDER: u32 = 6;
const BAR_WIDTH: usize = 40;
const GREEN: Rgb<u8> = Rgb([40, 170, 60]);
const RED: Rgb<u8> = Rgb([210, 40, 40]);

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionSummary {
	pub predicted: String,
	pub confidence: f32,
	pub truth: Option<String>,
}

impl PredictionSummary {
	pub fn new(
		probabilities: &[f32],
		truth: Option<&str>,
		vocabulary: &LabelVocabulary,
	) -> Result<Self, DogVisionError> {
		let predicted = vocabulary.decode(probabilities)?;
		let confidence = vocabulary
			.index_of(predicted)
			.and_then(|index| probabilities.get(index))
			.copied()
			.unwrap_or_default();

		Ok(Self {
			predicted: predicted.to_string(),
			confidence,
			truth: truth.map(str::to_string),
		})
	}

	pub fn is_correct(&self) -> bool {
		self.truth.as_deref() == Some(self.predicted.as_str())
	}
}

impl fmt::Display for PredictionSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {:.0}%", self.predicted, self.confidence * 100.0)?;
		match &self.truth {
			Some(truth) => write!(f, " {truth}"),
			None => Ok(()),
		}
	}
}

/// Text bar chart of the `k` most likely breeds; the true breed is starred.
pub fn confidence_table(
	probabilities: &[f32],
	vocabulary: &LabelVocabulary,
	truth: Option<&str>,
	k: usize,
) -> Result<String, DogVisionError> {
	let ranked = top_k(probabilities, vocabulary, k)?;
	let width = ranked.iter().map(|(breed, _)| breed.len()).max().unwrap_or_default();

	let mut table = String::new();
	for (breed, probability) in ranked {
		let marker = if Some(breed) == truth { '*' } else { ' ' };
		let bar = "#".repeat((probability.clamp(0.0, 1.0) * BAR_WIDTH as f32).round() as usize);
		table.push_str(&format!("{marker} {breed:<width$} {:>6.2}% {bar}\n", probability * 100.0));
	}

	Ok(table)
}

/// Lays the images out in a grid, framing correct predictions green and the rest red.
pub fn prediction_sheet(images: &[ImageTensor], summaries: &[PredictionSummary], columns: usize) -> RgbImage {
	let columns = columns.max(1).min(images.len().max(1)) as u32;
	let rows = images.len().div_ceil(columns as usize).max(1) as u32;
	let cell = IMAGE_SIZE as u32 + 2 * BORDER;

	let mut sheet = RgbImage::from_pixel(columns * cell, rows * cell, Rgb([255, 255, 255]));
	for (index, (image, summary)) in images.iter().zip(summaries).enumerate() {
		let x = (index as u32 % columns) * cell;
		let y = (index as u32 / columns) * cell;
		let color = if summary.is_correct() { GREEN } else { RED };

		for dy in 0..cell {
			for dx in 0..cell {
				sheet.put_pixel(x + dx, y + dy, color);
			}
		}
		imageops::replace(&mut sheet, &image.to_rgb8(), (x + BORDER) as i64, (y + BORDER) as i64);
	}

	sheet
}

pub fn save_prediction_sheet<P: AsRef<Path>>(
	images: &[ImageTensor],
	summaries: &[PredictionSummary],
	columns: usize,
	path: P,
) -> Result<(), DogVisionError> {
	let path = path.as_ref();
	prediction_sheet(images, summaries, columns)
		.save(path)
		.map_err(|source| DogVisionError::ImageSave {
			path: path.to_path_buf(),
			source,
		})
}
