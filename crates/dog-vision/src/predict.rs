use crate::error::DogVisionError;
use crate::labels::{argmax, LabelVocabulary, OneHot};
use std::path::Path;

pub fn argmax_label<'a>(probabilities: &[f32], vocabulary: &'a LabelVocabulary) -> Result<&'a str, DogVisionError> {
	vocabulary.decode(probabilities)
}

/// The `k` most likely breeds, highest probability first. Equal probabilities keep vocabulary order.
pub fn top_k<'a>(
	probabilities: &[f32],
	vocabulary: &'a LabelVocabulary,
	k: usize,
) -> Result<Vec<(&'a str, f32)>, DogVisionError> {
	vocabulary.check_len(probabilities.len())?;

	let mut ranked: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
	// stable, so ties stay in ascending index order
	ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

	Ok(ranked
		.into_iter()
		.take(k)
		.filter_map(|(index, probability)| vocabulary.get(index).map(|breed| (breed, probability)))
		.collect())
}

/// Share of rows whose most likely class is the labelled one.
pub fn accuracy(predictions: &[Vec<f32>], truth: &[OneHot]) -> Result<f32, DogVisionError> {
	if predictions.len() != truth.len() {
		return Err(DogVisionError::ShapeMismatch {
			expected: truth.len(),
			actual: predictions.len(),
		});
	}

	if predictions.is_empty() {
		return Ok(0.0);
	}

	let mut correct = 0;
	for (row, label) in predictions.iter().zip(truth) {
		if row.len() != label.len() {
			return Err(DogVisionError::ShapeMismatch {
				expected: label.len(),
				actual: row.len(),
			});
		}

		if argmax(row) == Some(label.index()) {
			correct += 1;
		}
	}

	Ok(correct as f32 / predictions.len() as f32)
}

/// Writes a headerless probability matrix, one example per row.
pub fn write_predictions<P: AsRef<Path>>(path: P, rows: &[Vec<f32>]) -> Result<(), DogVisionError> {
	let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;

	for row in rows {
		// Display prints the shortest string that parses back to the same f32
		writer.write_record(row.iter().map(|probability| probability.to_string()))?;
	}

	writer.flush()?;
	Ok(())
}

pub fn read_predictions<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<f32>>, DogVisionError> {
	let mut reader = csv::ReaderBuilder::new().has_headers(false).from_path(path)?;

	let mut rows = Vec::new();
	for (row, record) in reader.records().enumerate() {
		let record = record?;
		let values = record
			.iter()
			.enumerate()
			.map(|(column, field)| {
				field
					.trim()
					.parse::<f32>()
					.map_err(|source| DogVisionError::MalformedPrediction { row, column, source })
			})
			.collect::<Result<Vec<f32>, DogVisionError>>()?;
		rows.push(values);
	}

	Ok(rows)
}
