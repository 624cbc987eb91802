//! Training orchestrator
//!
//! Drives the teacher and the student through the same data source:
//!
//! ```text
//! Unbuilt --train_teacher--> TeacherTrained --train_student--> StudentTrained
//!         --evaluate_student--> Evaluated --report--> Reported
//! ```
//!
//! Each step checks the current phase first, so steps cannot run out of order.
//! Every configuration problem is raised by [`Orchestrator::new`], before any
//! fit starts. Failures abort the run; nothing is retried.

use std::fmt;
use std::path::PathBuf;

use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use super::history::TrainingHistory;
use super::trainer::{compile, Evaluation};
use crate::config::PipelineConfig;
use crate::dataset::session::log_data_summary;
use crate::dataset::DataSource;
use crate::model::{
    load_artifact, save_artifact, ModelSummary, StudentNet, StudentNetConfig,
};
use crate::utils::charts::plot_history;
use crate::utils::error::{ClassifierError, Result};

/// Largest accepted accuracy difference between the trained and the reloaded student
pub const RELOAD_TOLERANCE: f64 = 1e-4;

/// Progress of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Unbuilt,
    TeacherTrained,
    StudentTrained,
    Evaluated,
    Reported,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Unbuilt => "unbuilt",
            Phase::TeacherTrained => "teacher-trained",
            Phase::StudentTrained => "student-trained",
            Phase::Evaluated => "evaluated",
            Phase::Reported => "reported",
        };
        write!(f, "{}", name)
    }
}

/// Everything a completed run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub teacher_history: TrainingHistory,
    pub student_history: TrainingHistory,
    /// Student accuracy right after training
    pub student_accuracy: f64,
    /// Student accuracy after reloading its artifact
    pub reloaded_accuracy: f64,
    pub student: ModelSummary,
    pub teacher: ModelSummary,
    pub teacher_artifact: PathBuf,
    pub student_artifact: PathBuf,
    pub charts: Vec<PathBuf>,
    /// Local time the report was written
    pub finished_at: String,
}

/// Runs the teacher + student pipeline
pub struct Orchestrator<B: AutodiffBackend> {
    config: PipelineConfig,
    source: DataSource,
    device: B::Device,
    phase: Phase,
    student: Option<StudentNet<B>>,
    teacher_history: Option<TrainingHistory>,
    student_history: Option<TrainingHistory>,
    teacher_summary: Option<ModelSummary>,
    student_summary: Option<ModelSummary>,
    post_training: Option<Evaluation>,
    reloaded: Option<Evaluation>,
}

impl<B: AutodiffBackend> Orchestrator<B> {
    /// Open the data source and check the whole configuration
    pub fn new(mut config: PipelineConfig, device: B::Device) -> Result<Self> {
        let source = DataSource::open(&config.data)?;
        log_data_summary(&source);

        config.harmonize(source.num_classes());
        config.validate()?;

        let steps = source.steps_per_epoch()?;
        let val_steps = source.validation_steps()?;
        info!(
            "{} steps and {} validation steps per epoch ({} train / {} val samples dropped)",
            steps,
            val_steps,
            source.train_len() - steps * source.batch_size(),
            source.val_len() - val_steps * source.batch_size()
        );

        Ok(Self {
            config,
            source,
            device,
            phase: Phase::Unbuilt,
            student: None,
            teacher_history: None,
            student_history: None,
            teacher_summary: None,
            student_summary: None,
            post_training: None,
            reloaded: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn expect_phase(&self, expected: Phase, attempted: &str) -> Result<()> {
        if self.phase != expected {
            return Err(ClassifierError::OutOfOrder {
                attempted: attempted.to_string(),
                phase: self.phase.to_string(),
            });
        }
        Ok(())
    }

    /// Build both networks, then fit and persist the teacher
    pub fn train_teacher(&mut self) -> Result<&TrainingHistory> {
        self.expect_phase(Phase::Unbuilt, "train the teacher")?;

        // The student is built first so its shape errors surface before any fit
        let student = self.config.student.init::<B>(&self.device)?;
        let student_summary = ModelSummary::of_student(&self.config.student);
        info!(
            "Student built: {} parameters ({:.2} MB)",
            student_summary.total_params, student_summary.size_mb
        );

        let teacher = self.config.teacher.init::<B>(&self.device)?;
        let teacher_summary = ModelSummary::of_teacher(&self.config.teacher);
        info!(
            "Teacher built: {} parameters ({:.2} MB)",
            teacher_summary.total_params, teacher_summary.size_mb
        );

        let mut trainer = compile("teacher", teacher, &self.config.compile, &self.device);
        let history = {
            let mut session = self.source.acquire("teacher fit");
            trainer.fit(&mut session, self.config.teacher_epochs)?
        };

        save_artifact::<B, _>(
            trainer.model(),
            &self.config.teacher,
            &self.config.output.teacher_path(),
        )?;

        self.student = Some(student);
        self.student_summary = Some(student_summary);
        self.teacher_summary = Some(teacher_summary);
        self.phase = Phase::TeacherTrained;

        Ok(&*self.teacher_history.insert(history))
    }

    /// Fit, persist and evaluate the student
    pub fn train_student(&mut self) -> Result<&TrainingHistory> {
        self.expect_phase(Phase::TeacherTrained, "train the student")?;

        let student = self.student.take().ok_or_else(|| {
            ClassifierError::Training("student network was not built".to_string())
        })?;

        let mut trainer = compile("student", student, &self.config.compile, &self.device);
        let history = {
            let mut session = self.source.acquire("student fit");
            trainer.fit(&mut session, self.config.student_epochs)?
        };

        save_artifact::<B, _>(
            trainer.model(),
            &self.config.student,
            &self.config.output.student_path(),
        )?;

        let evaluation = {
            let session = self.source.acquire("student evaluation");
            trainer.evaluate(&session)?
        };
        info!(
            "Student after training: loss {:.4}, accuracy {:.2}%",
            evaluation.loss,
            evaluation.accuracy * 100.0
        );

        self.post_training = Some(evaluation);
        self.phase = Phase::StudentTrained;

        Ok(&*self.student_history.insert(history))
    }

    /// Reload the student artifact and check it reproduces the trained accuracy
    pub fn evaluate_student(&mut self) -> Result<Evaluation> {
        self.expect_phase(Phase::StudentTrained, "evaluate the reloaded student")?;

        let path = self.config.output.student_path();
        let (_, model) = load_artifact::<B, StudentNetConfig>(&path, &self.device)?;
        let trainer = compile("reloaded student", model, &self.config.compile, &self.device);

        let evaluation = {
            let session = self.source.acquire("reloaded student evaluation");
            trainer.evaluate(&session)?
        };

        let expected = self
            .post_training
            .map(|e| e.accuracy)
            .ok_or_else(|| ClassifierError::Training("student was not evaluated".to_string()))?;

        if (evaluation.accuracy - expected).abs() > RELOAD_TOLERANCE {
            return Err(ClassifierError::SerializationMismatch {
                path,
                reason: format!(
                    "reloaded accuracy {:.6} differs from trained accuracy {:.6}",
                    evaluation.accuracy, expected
                ),
            });
        }

        info!(
            "Reloaded student accuracy {:.2}% matches training",
            evaluation.accuracy * 100.0
        );
        self.reloaded = Some(evaluation);
        self.phase = Phase::Evaluated;

        Ok(evaluation)
    }

    /// Print the summary lines and write charts and histories
    pub fn report(&mut self) -> Result<RunReport> {
        self.expect_phase(Phase::Evaluated, "report")?;

        let missing = |what: &str| ClassifierError::Training(format!("{} is missing", what));
        let teacher_history = self.teacher_history.clone().ok_or_else(|| missing("teacher history"))?;
        let student_history = self.student_history.clone().ok_or_else(|| missing("student history"))?;
        let student = self.student_summary.ok_or_else(|| missing("student summary"))?;
        let teacher = self.teacher_summary.ok_or_else(|| missing("teacher summary"))?;
        let reloaded = self.reloaded.ok_or_else(|| missing("reloaded evaluation"))?;
        let post_training = self.post_training.ok_or_else(|| missing("student evaluation"))?;

        println!();
        println!("{}", "Results".green().bold());
        println!("Student Model Accuracy: {:.2}", reloaded.accuracy);
        println!("Model Size: {:.2} MB", student.size_mb);
        println!("Total Params: {}", student.total_params);
        println!();

        let reports_dir = &self.config.output.reports_dir;
        let mut charts = Vec::new();
        for (name, title, history) in [
            ("teacher", "Teacher Training History", &teacher_history),
            ("student", "Student Training History", &student_history),
        ] {
            let chart = reports_dir.join(format!("{}_history.svg", name));
            plot_history(title, history, &chart)?;
            history.save(reports_dir.join(format!("{}_history.json", name)))?;
            info!("Wrote {:?}", chart);
            charts.push(chart);
        }

        let report = RunReport {
            teacher_history,
            student_history,
            student_accuracy: post_training.accuracy,
            reloaded_accuracy: reloaded.accuracy,
            student,
            teacher,
            teacher_artifact: self.config.output.teacher_path(),
            student_artifact: self.config.output.student_path(),
            charts,
            finished_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        std::fs::write(
            reports_dir.join("run_report.json"),
            serde_json::to_string_pretty(&report)?,
        )?;

        self.phase = Phase::Reported;
        Ok(report)
    }

    /// Run every step in order
    pub fn run(&mut self) -> Result<RunReport> {
        self.train_teacher()?;
        self.train_student()?;
        self.evaluate_student()?;
        self.report()
    }
}
