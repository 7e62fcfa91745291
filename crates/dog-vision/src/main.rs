use anyhow::{bail, Context, Result};
use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::AdamConfig;
use clap::Parser;
use dog_vision::dataset::{list_images, read_records};
use dog_vision::infer::{evaluate, evaluate_records, predict};
use dog_vision::labels::LabelVocabulary;
use dog_vision::persist::{load_manifest, load_model, save_model};
use dog_vision::pipeline::{create_batches, BatchConfig, DEFAULT_BATCH_SIZE};
use dog_vision::predict::{read_predictions, top_k, write_predictions};
use dog_vision::report::{confidence_table, save_prediction_sheet, PredictionSummary, DEFAULT_TOP_K};
use dog_vision::train::{train_run, TrainingConfig, TrainingData};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use std::path::{Path, PathBuf};

#[cfg(not(feature = "tch"))]
mod backend {
    use burn::backend::ndarray::{NdArray, NdArrayDevice};
    use burn::backend::Autodiff;

    pub type Inference = NdArray;
    pub type Training = Autodiff<NdArray>;

    pub fn device() -> NdArrayDevice {
        NdArrayDevice::Cpu
    }
}

#[cfg(feature = "tch")]
mod backend {
    use burn::backend::Autodiff;
    use burn_tch::{LibTorch, LibTorchDevice};
    use log::{info, warn};

    pub type Inference = LibTorch;
    pub type Training = Autodiff<LibTorch>;

    pub fn device() -> LibTorchDevice {
        info!("Checking CUDA configuration...");
        if tch::utils::has_cuda() {
            LibTorchDevice::Cuda(0)
        } else {
            warn!("Could not detect valid CUDA configuration, running on CPU");
            LibTorchDevice::Cpu
        }
    }
}

/// Number of validation images whose full confidence table is logged after training.
const SHOWN_VALIDATION_IMAGES: usize = 3;
const SHEET_COLUMNS: usize = 5;

#[derive(Debug, Clone, Parser)]
enum Opts {
    /// Train a breed classifier on a labels CSV and a directory of images
    Train {
        /// CSV with `id,breed` rows
        labels_csv: PathBuf,
        /// directory holding `<id>.jpg` for every row
        train_dir: PathBuf,
        /// training configuration JSON, defaults are used when absent
        #[arg(long)]
        config: Option<PathBuf>,
        /// only use the first N labelled images
        #[arg(long)]
        num_images: Option<usize>,
        #[arg(long, default_value = "logs")]
        log_dir: PathBuf,
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,
        /// appended to the saved model's timestamped name
        #[arg(long, default_value = "all-images-resnet18-Adam")]
        suffix: String,
    },
    /// Predict the breed of every image in a directory
    Predict {
        /// saved model, either file or the bare stem
        model: PathBuf,
        /// directory of .jpg/.jpeg images
        images_dir: PathBuf,
        /// CSV receiving one probability row per image
        #[arg(long, default_value = "predictions.csv")]
        output: PathBuf,
        #[arg(long, default_value_t = 3)]
        top_k: usize,
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// PNG grid of the images with their predicted breeds
        #[arg(long)]
        sheet: Option<PathBuf>,
    },
    /// Reload a saved model and measure its accuracy on labelled images
    Evaluate {
        /// saved model, either file or the bare stem
        model: PathBuf,
        /// CSV with `id,breed` rows
        labels_csv: PathBuf,
        /// directory holding `<id>.jpg` for every row
        train_dir: PathBuf,
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// only use the first N labelled images
        #[arg(long)]
        num_images: Option<usize>,
    },
    /// Print the most likely breeds from a saved predictions CSV
    Show {
        /// CSV written by `predict`
        predictions: PathBuf,
        /// model whose breed names label the columns
        model: PathBuf,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
}

fn main() -> Result<()> {
    SimpleLogger::new().with_level(LevelFilter::Info).init()?;

    match Opts::parse() {
        Opts::Train {
            labels_csv,
            train_dir,
            config,
            num_images,
            log_dir,
            model_dir,
            suffix,
        } => {
            let data = TrainingData {
                labels_csv,
                train_dir,
                log_dir,
            };
            train(data, config, num_images, model_dir, &suffix)?;
        }
        Opts::Predict {
            model,
            images_dir,
            output,
            top_k,
            batch_size,
            sheet,
        } => {
            predict_dir(model, images_dir, output, top_k, batch_size, sheet)?;
        }
        Opts::Evaluate {
            model,
            labels_csv,
            train_dir,
            batch_size,
            num_images,
        } => {
            evaluate_saved(model, labels_csv, train_dir, batch_size, num_images)?;
        }
        Opts::Show {
            predictions,
            model,
            top_k,
        } => {
            show(predictions, model, top_k)?;
        }
    }

    Ok(())
}

fn train(
    data: TrainingData,
    config_file: Option<PathBuf>,
    num_images: Option<usize>,
    model_dir: PathBuf,
    suffix: &str,
) -> Result<()> {
    let mut config = match config_file {
        Some(path) => TrainingConfig::load(&path)
            .map_err(|err| anyhow::anyhow!("{err:?}"))
            .with_context(|| format!("failed to load training config {}", path.display()))?,
        None => TrainingConfig::new(AdamConfig::new()),
    };
    if num_images.is_some() {
        config.num_images = num_images;
    }

    let device = backend::device();
    let trained = train_run::<backend::Training>(&config, &data, device.clone()).context("training failed")?;
    let model = trained.model.valid();

    let batches = create_batches(
        trained.validation.paths(),
        Some(trained.validation.labels()),
        &BatchConfig::default().with_batch_size(config.batch_size),
    )?;
    let (predictions, accuracy) = evaluate(&model, batches, false, &device)?;
    info!("Validation accuracy: {:.2}%", accuracy * 100.0);

    let labels = predictions.labels.as_deref().unwrap_or_default();
    for (probabilities, label) in predictions.probabilities.iter().zip(labels).take(SHOWN_VALIDATION_IMAGES) {
        let truth = trained.vocabulary.get(label.index());
        let summary = PredictionSummary::new(probabilities, truth, &trained.vocabulary)?;
        info!(
            "{summary}\n{}",
            confidence_table(probabilities, &trained.vocabulary, truth, DEFAULT_TOP_K)?
        );
    }

    write_predictions(trained.run_dir.join("valid-predictions.csv"), &predictions.probabilities)?;

    let path = save_model(&model, &trained.model_config, &trained.vocabulary, &model_dir, suffix)
        .context("failed to save the trained model")?;
    info!("Saved model to {}", path.display());

    Ok(())
}

fn predict_dir(
    model_path: impl AsRef<Path>,
    images_dir: impl AsRef<Path>,
    output: impl AsRef<Path>,
    k: usize,
    batch_size: usize,
    sheet: Option<PathBuf>,
) -> Result<()> {
    let device = backend::device();
    let loaded = load_model::<backend::Inference, _>(&model_path, &device)
        .with_context(|| format!("failed to load model {}", model_path.as_ref().display()))?;

    let paths = list_images(&images_dir)?;
    if paths.is_empty() {
        bail!("no .jpg images found in {}", images_dir.as_ref().display());
    }
    info!("Found {} images", paths.len());

    let batches = create_batches(paths, None, &BatchConfig::default().with_batch_size(batch_size))?;
    let predictions = predict(&loaded.model, batches, sheet.is_some(), &device)?;
    write_predictions(&output, &predictions.probabilities)?;

    for (path, probabilities) in predictions.paths.iter().zip(&predictions.probabilities) {
        let ranked = top_k(probabilities, &loaded.vocabulary, k)?
            .into_iter()
            .map(|(breed, probability)| format!("{breed} {:.1}%", probability * 100.0))
            .collect::<Vec<_>>();
        println!("{}: {}", path.display(), ranked.join(", "));
    }

    if let Some(sheet) = sheet {
        let summaries = predictions
            .probabilities
            .iter()
            .map(|probabilities| PredictionSummary::new(probabilities, None, &loaded.vocabulary))
            .collect::<Result<Vec<_>, _>>()?;
        save_prediction_sheet(&predictions.images, &summaries, SHEET_COLUMNS, &sheet)?;
        info!("Saved prediction sheet to {}", sheet.display());
    }

    Ok(())
}

fn evaluate_saved(
    model_path: impl AsRef<Path>,
    labels_csv: impl AsRef<Path>,
    train_dir: impl AsRef<Path>,
    batch_size: usize,
    num_images: Option<usize>,
) -> Result<()> {
    let device = backend::device();
    let loaded = load_model::<backend::Inference, _>(&model_path, &device)
        .with_context(|| format!("failed to load model {}", model_path.as_ref().display()))?;

    let records = read_records(&labels_csv)
        .with_context(|| format!("failed to read labels {}", labels_csv.as_ref().display()))?;
    let records = match num_images {
        Some(limit) => &records[..limit.min(records.len())],
        None => &records[..],
    };

    let (_, accuracy) = evaluate_records(&loaded.model, &loaded.vocabulary, records, &train_dir, batch_size, &device)
        .context("evaluation failed")?;
    println!("Accuracy on {} images: {:.2}%", records.len(), accuracy * 100.0);

    Ok(())
}

fn show(predictions: impl AsRef<Path>, model_path: impl AsRef<Path>, k: usize) -> Result<()> {
    let manifest = load_manifest(&model_path)?;
    let vocabulary = LabelVocabulary::from_breeds(manifest.breeds)?;

    let rows = read_predictions(&predictions)
        .with_context(|| format!("failed to read predictions {}", predictions.as_ref().display()))?;

    for (index, probabilities) in rows.iter().enumerate() {
        let summary = PredictionSummary::new(probabilities, None, &vocabulary)?;
        println!("[{index}] {summary}");
        print!("{}", confidence_table(probabilities, &vocabulary, None, k)?);
    }

    Ok(())
}
