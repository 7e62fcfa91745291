//! Fixtures shared by the unit tests.

use image::{Rgb, RgbImage};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};

/// Scratch directory removed again when dropped.
pub struct TempDir {
	path: PathBuf,
}

impl TempDir {
	pub fn new(prefix: &str) -> Self {
		let suffix: String = rand::thread_rng()
			.sample_iter(&Alphanumeric)
			.take(8)
			.map(char::from)
			.collect();
		let path = std::env::temp_dir().join(format!("dog-vision-{prefix}-{suffix}"));
		std::fs::create_dir_all(&path).unwrap();

		Self { path }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl Drop for TempDir {
	fn drop(&mut self) {
		std::fs::remove_dir_all(&self.path).ok();
	}
}

pub fn write_jpeg(path: &Path, width: u32, height: u32, color: [u8; 3]) {
	RgbImage::from_pixel(width, height, Rgb(color)).save(path).unwrap();
}

/// Writes one image per id into `dir` with a distinct red channel so tests can tell them apart.
pub fn write_numbered_images(dir: &Path, count: usize) -> Vec<PathBuf> {
	(0..count)
		.map(|index| {
			let path = dir.join(format!("dog-{index:02}.png"));
			RgbImage::from_pixel(16, 16, Rgb([(index * 10) as u8, 0, 0]))
				.save(&path)
				.unwrap();
			path
		})
		.collect()
}
