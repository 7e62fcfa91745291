use crate::error::DogVisionError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const IMAGE_EXTENSION: &str = ".jpg";

/// One row of `labels.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DogRecord {
	pub id: String,
	pub breed: String,
}

pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<DogRecord>, DogVisionError> {
	let mut reader = csv::Reader::from_path(path)?;

	reader
		.deserialize()
		.map(|record| record.map_err(DogVisionError::from))
		.collect()
}

/// `base_dir/<record_id><extension>`, without touching the filesystem.
pub fn resolve_path<P: AsRef<Path>>(base_dir: P, record_id: &str, extension: &str) -> PathBuf {
	base_dir.as_ref().join(format!("{record_id}{extension}"))
}

/// Images per breed, most common first (ties by name).
pub fn breed_counts(records: &[DogRecord]) -> Vec<(String, usize)> {
	let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
	for record in records {
		*counts.entry(record.breed.as_str()).or_default() += 1;
	}

	let mut counts: Vec<(String, usize)> = counts
		.into_iter()
		.map(|(breed, count)| (breed.to_string(), count))
		.collect();
	counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
	counts
}

pub fn median_count(counts: &[(String, usize)]) -> Option<f64> {
	let mut values: Vec<usize> = counts.iter().map(|(_, count)| *count).collect();
	values.sort_unstable();

	let mid = values.len() / 2;
	match values.len() {
		0 => None,
		len if len % 2 == 1 => Some(values[mid] as f64),
		_ => Some((values[mid - 1] + values[mid]) as f64 / 2.0),
	}
}

/// Shuffles with a fixed seed, then moves the first `ceil(n * valid_fraction)` items into the
/// validation split.
pub fn train_valid_split<T>(mut items: Vec<T>, valid_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
	items.shuffle(&mut StdRng::seed_from_u64(seed));

	let fraction = valid_fraction.clamp(0.0, 1.0);
	let num_valid = ((items.len() as f64) * fraction).ceil() as usize;
	let train = items.split_off(num_valid.min(items.len()));

	(train, items)
}

/// Every `.jpg`/`.jpeg` file directly inside `dir`, sorted by path.
pub fn list_images<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, DogVisionError> {
	let mut paths = Vec::new();

	for entry in dir.as_ref().read_dir()? {
		let path = entry?.path();
		let is_jpeg = path
			.extension()
			.and_then(|ext| ext.to_str())
			.is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));

		if is_jpeg && path.is_file() {
			paths.push(path);
		}
	}

	paths.sort();
	Ok(paths)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{write_jpeg, TempDir};

	fn record(id: &str, breed: &str) -> DogRecord {
		DogRecord { id: id.into(), breed: breed.into() }
	}

	#[test]
	fn resolve_path_appends_extension() {
		let path = resolve_path("/content/train", "000bec180eb18c7604dcecc8fe0dba07", IMAGE_EXTENSION);
		assert_eq!(path, PathBuf::from("/content/train/000bec180eb18c7604dcecc8fe0dba07.jpg"));

		let with_slash = resolve_path("/content/train/", "abc", IMAGE_EXTENSION);
		assert_eq!(with_slash, PathBuf::from("/content/train/abc.jpg"));
	}

	#[test]
	fn reads_labels_csv_with_extra_columns() {
		let dir = TempDir::new("dataset-records");
		let path = dir.path().join("labels.csv");
		std::fs::write(&path, "id,breed,source\nabc,boston_bull,kaggle\ndef,dingo,kaggle\n").unwrap();

		let records = read_records(&path).unwrap();
		assert_eq!(records, vec![record("abc", "boston_bull"), record("def", "dingo")]);
	}

	#[test]
	fn missing_breed_column_is_an_error() {
		let dir = TempDir::new("dataset-bad-records");
		let path = dir.path().join("labels.csv");
		std::fs::write(&path, "id\nabc\n").unwrap();

		assert!(matches!(read_records(&path), Err(DogVisionError::Csv(_))));
	}

	#[test]
	fn counts_and_median() {
		let records = vec![
			record("1", "pug"),
			record("2", "beagle"),
			record("3", "pug"),
			record("4", "shiba"),
			record("5", "beagle"),
			record("6", "pug"),
		];

		let counts = breed_counts(&records);
		assert_eq!(
			counts,
			vec![("pug".to_string(), 3), ("beagle".to_string(), 2), ("shiba".to_string(), 1)]
		);
		assert_eq!(median_count(&counts), Some(2.0));
		assert_eq!(median_count(&counts[..2]), Some(2.5));
		assert_eq!(median_count(&[]), None);
	}

	#[test]
	fn split_is_seeded_and_complete() {
		let items: Vec<usize> = (0..10).collect();
		let (train, valid) = train_valid_split(items.clone(), 0.2, 42);
		assert_eq!(train.len(), 8);
		assert_eq!(valid.len(), 2);

		let mut all: Vec<usize> = train.iter().chain(valid.iter()).copied().collect();
		all.sort_unstable();
		assert_eq!(all, items);

		assert_eq!(train_valid_split(items.clone(), 0.2, 42), (train, valid));

		let (train, valid) = train_valid_split(items, 0.0, 42);
		assert_eq!((train.len(), valid.len()), (10, 0));
	}

	#[test]
	fn list_images_filters_and_sorts() {
		let dir = TempDir::new("dataset-list");
		write_jpeg(&dir.path().join("b.jpg"), 4, 4, [0, 0, 0]);
		write_jpeg(&dir.path().join("a.JPEG"), 4, 4, [0, 0, 0]);
		std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
		std::fs::create_dir(dir.path().join("nested.jpg")).unwrap();

		let images = list_images(dir.path()).unwrap();
		assert_eq!(images, vec![dir.path().join("a.JPEG"), dir.path().join("b.jpg")]);
	}
}
