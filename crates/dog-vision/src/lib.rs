//! Dog breed classification by transfer learning on a pretrained ResNet-18.

pub mod backbone;
pub mod data;
pub mod dataset;
pub mod error;
pub mod infer;
pub mod labels;
pub mod model;
pub mod persist;
pub mod pipeline;
pub mod predict;
pub mod preprocess;
pub mod report;
pub mod train;

#[cfg(test)]
mod testing;
