//! Compact Classifier CLI
//!
//! Trains a teacher and a compact student image classifier on a
//! `train/` + `val/` class-folder dataset with the Burn framework.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use compact_classifier::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use compact_classifier::dataset::session::log_data_summary;
use compact_classifier::dataset::{AugmentationConfig, DirectoryLayout, ImageBatcher};
use compact_classifier::model::{load_artifact, ModelSummary, StudentNetConfig, TeacherNetConfig};
use compact_classifier::training::evaluate_batches;
use compact_classifier::utils::format_number;
use compact_classifier::utils::logging::{init_logging, LogConfig};
use compact_classifier::{DataConfig, DataSource, Orchestrator, PipelineConfig, BATCH_SIZE};

/// Teacher + compact student image classification
#[derive(Parser, Debug)]
#[command(name = "compact_classifier")]
#[command(version)]
#[command(about = "Teacher and compact student image classifiers with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the teacher, then the student, and report
    Train {
        /// JSON pipeline configuration (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Dataset root containing train/ and val/
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Teacher epoch budget
        #[arg(long)]
        teacher_epochs: Option<usize>,

        /// Student epoch budget
        #[arg(long)]
        student_epochs: Option<usize>,

        /// Square input size in pixels
        #[arg(long)]
        image_size: Option<usize>,

        /// Batch size for training and validation
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Learning rate for both fits
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Pretrained backbone weights for the teacher
        #[arg(long)]
        pretrained: Option<PathBuf>,

        /// Disable training-time augmentation
        #[arg(long, default_value = "false")]
        no_augmentation: bool,

        /// Decode every image once up front
        #[arg(long, default_value = "false")]
        cache: bool,

        /// Random seed for shuffling and augmentation
        #[arg(long)]
        seed: Option<u64>,

        /// Directory for model artifacts
        #[arg(long)]
        models_dir: Option<PathBuf>,

        /// Directory for charts and histories
        #[arg(long)]
        reports_dir: Option<PathBuf>,

        /// Write the effective configuration to this file before training
        #[arg(long)]
        save_config: Option<PathBuf>,
    },

    /// Evaluate a saved student artifact on the validation split
    Evaluate {
        /// Artifact base path (without .json/.mpk)
        #[arg(short, long, default_value = "models/student_model")]
        model: PathBuf,

        /// Dataset root containing train/ and val/
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Batch size for evaluation
        #[arg(short, long, default_value_t = BATCH_SIZE)]
        batch_size: usize,
    },

    /// Print the student layer plan and parameter counts
    Summary {
        /// Square input size in pixels
        #[arg(long, default_value_t = compact_classifier::IMAGE_SIZE)]
        image_size: usize,

        /// Number of output classes
        #[arg(short, long, default_value = "2")]
        num_classes: usize,

        /// Also build the teacher and count its parameters
        #[arg(long, default_value = "false")]
        teacher: bool,
    },

    /// Show dataset statistics
    Stats {
        /// Dataset root containing train/ and val/
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            config,
            data_dir,
            teacher_epochs,
            student_epochs,
            image_size,
            batch_size,
            learning_rate,
            pretrained,
            no_augmentation,
            cache,
            seed,
            models_dir,
            reports_dir,
            save_config,
        } => {
            let mut pipeline = match config {
                Some(path) => PipelineConfig::load(&path)?,
                None => PipelineConfig::default(),
            };

            if let Some(root) = data_dir {
                pipeline.data.root = root;
            }
            if let Some(epochs) = teacher_epochs {
                pipeline.teacher_epochs = epochs;
            }
            if let Some(epochs) = student_epochs {
                pipeline.student_epochs = epochs;
            }
            if let Some(size) = image_size {
                pipeline.data.image_size = size;
            }
            if let Some(size) = batch_size {
                pipeline.data.batch_size = size;
            }
            if let Some(lr) = learning_rate {
                pipeline.compile.learning_rate = lr;
            }
            if pretrained.is_some() {
                pipeline.teacher.pretrained_weights = pretrained;
            }
            if no_augmentation {
                pipeline.data.augmentation = AugmentationConfig::none();
            }
            if cache {
                pipeline.data.cache = true;
            }
            if let Some(seed) = seed {
                pipeline.data.seed = seed;
            }
            if let Some(dir) = models_dir {
                pipeline.output.models_dir = dir;
            }
            if let Some(dir) = reports_dir {
                pipeline.output.reports_dir = dir;
            }
            if let Some(path) = save_config {
                pipeline.save(&path)?;
                info!("Saved configuration to {:?}", path);
            }

            cmd_train(pipeline)?;
        }

        Commands::Evaluate {
            model,
            data_dir,
            batch_size,
        } => {
            cmd_evaluate(model, data_dir, batch_size)?;
        }

        Commands::Summary {
            image_size,
            num_classes,
            teacher,
        } => {
            cmd_summary(image_size, num_classes, teacher)?;
        }

        Commands::Stats { data_dir } => {
            cmd_stats(data_dir)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ==============================================================
    Compact Classifier
    Teacher + depthwise-separable student with Burn + Rust
 ==============================================================
  "#
        .green()
    );
}

fn cmd_train(config: PipelineConfig) -> Result<()> {
    println!("{} {}", "Backend:".cyan(), backend_name());
    println!("{} {:?}", "Dataset:".cyan(), config.data.root);
    println!(
        "{} teacher {} / student {} epochs, batch size {}, image size {}",
        "Budget:".cyan(),
        config.teacher_epochs,
        config.student_epochs,
        config.data.batch_size,
        config.data.image_size
    );
    println!();

    let mut orchestrator = Orchestrator::<TrainingBackend>::new(config, default_device())?;
    let report = orchestrator.run()?;

    println!("{}", "Artifacts:".cyan());
    println!("  teacher: {:?}", report.teacher_artifact);
    println!("  student: {:?}", report.student_artifact);
    for chart in &report.charts {
        println!("  chart:   {:?}", chart);
    }

    Ok(())
}

fn cmd_evaluate(model_path: PathBuf, data_dir: PathBuf, batch_size: usize) -> Result<()> {
    let device = default_device();
    let (config, model) = load_artifact::<DefaultBackend, StudentNetConfig>(&model_path, &device)?;
    info!("Loaded student from {:?}", model_path);

    let mut source = DataSource::open(&DataConfig {
        root: data_dir,
        image_size: config.input_size,
        batch_size,
        cache: false,
        augmentation: AugmentationConfig::none(),
        ..DataConfig::default()
    })?;
    log_data_summary(&source);

    if source.num_classes() != config.num_classes {
        bail!(
            "model predicts {} classes but the dataset has {}",
            config.num_classes,
            source.num_classes()
        );
    }

    let session = source.acquire("evaluate");
    let batcher = ImageBatcher::new(session.image_size(), session.num_classes());
    let evaluation = evaluate_batches::<DefaultBackend, _, _>(
        &model,
        session.validation()?,
        &batcher,
        &device,
    )?;

    println!();
    println!("{}", "Evaluation".green().bold());
    println!("  Samples:  {}", evaluation.samples);
    println!("  Loss:     {:.4}", evaluation.loss);
    println!("  Accuracy: {:.2}%", evaluation.accuracy * 100.0);

    Ok(())
}

fn cmd_summary(image_size: usize, num_classes: usize, with_teacher: bool) -> Result<()> {
    let config = StudentNetConfig::new()
        .with_input_size(image_size)
        .with_num_classes(num_classes);
    config.validate()?;

    println!("{}", "Student stages".green().bold());
    let mut size = image_size;
    for (i, stage) in config.stage_plan().iter().enumerate() {
        let [channels, height, _] = stage.output_shape(size, size);
        println!(
            "  {}: {:>4} -> {:>4} channels, {:>4}x{:<4} {:>10} params{}",
            i + 1,
            stage.in_channels,
            channels,
            height,
            height,
            format_number(stage.param_count()),
            if stage.downsample { "  (pool)" } else { "" }
        );
        size = height;
    }

    let student = ModelSummary::of_student(&config);
    println!();
    println!("Total Params: {}", format_number(student.total_params));
    println!("Model Size: {:.2} MB", student.size_mb);

    if with_teacher {
        let teacher_config = TeacherNetConfig::new()
            .with_input_size(image_size)
            .with_num_classes(num_classes);
        // Building runs the feature-map check for this input size
        teacher_config.init::<DefaultBackend>(&default_device())?;
        let summary = ModelSummary::of_teacher(&teacher_config);
        println!();
        println!("{}", "Teacher".green().bold());
        println!("Total Params: {}", format_number(summary.total_params));
        println!("Model Size: {:.2} MB", summary.size_mb);
    }

    Ok(())
}

fn cmd_stats(data_dir: PathBuf) -> Result<()> {
    if !data_dir.exists() {
        println!("{} Dataset directory not found: {:?}", "Error:".red(), data_dir);
        println!();
        println!("Expected structure:");
        println!("  <root>/train/<class>/*.jpg");
        println!("  <root>/val/<class>/*.jpg");
        return Ok(());
    }

    let layout = DirectoryLayout::open(&data_dir)?;
    let train_counts = layout.train.class_counts();
    let val_counts = layout.val.class_counts();

    println!("{}", "Dataset statistics".green().bold());
    println!("{:<32} {:>8} {:>8}", "class", "train", "val");
    for (i, class) in layout.classes().iter().enumerate() {
        println!("{:<32} {:>8} {:>8}", class, train_counts[i], val_counts[i]);
    }
    println!(
        "{:<32} {:>8} {:>8}",
        "total",
        layout.train.len(),
        layout.val.len()
    );

    Ok(())
}
