use crate::error::DogVisionError;
use std::collections::BTreeSet;

/// Sorted set of distinct breed names. A breed's position is its class index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocabulary {
	breeds: Vec<String>,
}

impl LabelVocabulary {
	pub fn build<I, S>(labels: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let breeds: BTreeSet<String> = labels
			.into_iter()
			.map(|label| label.as_ref().to_string())
			.collect();

		Self { breeds: breeds.into_iter().collect() }
	}

	/// Rebuilds a vocabulary from a stored breed list, which must already be strictly ascending.
	pub fn from_breeds(breeds: Vec<String>) -> Result<Self, DogVisionError> {
		if let Some(pair) = breeds.windows(2).find(|pair| pair[0] >= pair[1]) {
			return Err(DogVisionError::InvalidVocabulary(format!(
				"{:?} is not strictly before {:?}",
				pair[0], pair[1]
			)));
		}

		Ok(Self { breeds })
	}

	pub fn len(&self) -> usize {
		self.breeds.len()
	}

	pub fn is_empty(&self) -> bool {
		self.breeds.is_empty()
	}

	pub fn breeds(&self) -> &[String] {
		&self.breeds
	}

	pub fn get(&self, index: usize) -> Option<&str> {
		self.breeds.get(index).map(String::as_str)
	}

	pub fn index_of(&self, breed: &str) -> Option<usize> {
		self.breeds
			.binary_search_by(|candidate| candidate.as_str().cmp(breed))
			.ok()
	}

	pub fn encode(&self, breed: &str) -> Result<OneHot, DogVisionError> {
		let index = self
			.index_of(breed)
			.ok_or_else(|| DogVisionError::UnknownLabel(breed.to_string()))?;

		OneHot::new(index, self.len())
	}

	pub fn decode(&self, probabilities: &[f32]) -> Result<&str, DogVisionError> {
		self.check_len(probabilities.len())?;

		// check_len guarantees a non-empty vector, so argmax always has an answer
		let index = argmax(probabilities).unwrap_or_default();
		Ok(&self.breeds[index])
	}

	/// Rejects a precomputed label built against a vocabulary of a different size.
	pub fn check_label(&self, label: &OneHot) -> Result<(), DogVisionError> {
		self.check_len(label.len())
	}

	pub(crate) fn check_len(&self, actual: usize) -> Result<(), DogVisionError> {
		if actual != self.len() || self.is_empty() {
			return Err(DogVisionError::ShapeMismatch {
				expected: self.len(),
				actual,
			});
		}

		Ok(())
	}
}

/// Index of the largest value. Ties go to the lowest index and NaN never wins.
pub fn argmax(values: &[f32]) -> Option<usize> {
	if values.is_empty() {
		return None;
	}

	let mut best = 0;
	for (index, &value) in values.iter().enumerate().skip(1) {
		if value > values[best] || (values[best].is_nan() && !value.is_nan()) {
			best = index;
		}
	}

	Some(best)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneHot {
	bits: Vec<bool>,
}

impl OneHot {
	pub fn new(index: usize, len: usize) -> Result<Self, DogVisionError> {
		if index >= len {
			return Err(DogVisionError::LabelOutOfRange { index, len });
		}

		let mut bits = vec![false; len];
		bits[index] = true;
		Ok(Self { bits })
	}

	pub fn from_bools(bits: Vec<bool>) -> Result<Self, DogVisionError> {
		let hot = bits.iter().filter(|bit| **bit).count();
		if hot != 1 {
			return Err(DogVisionError::InvalidOneHot(hot));
		}

		Ok(Self { bits })
	}

	pub fn index(&self) -> usize {
		self.bits.iter().position(|bit| *bit).unwrap_or_default()
	}

	pub fn len(&self) -> usize {
		self.bits.len()
	}

	pub fn as_slice(&self) -> &[bool] {
		&self.bits
	}

	pub fn to_f32(&self) -> Vec<f32> {
		self.bits.iter().map(|bit| if *bit { 1.0 } else { 0.0 }).collect()
	}
}
