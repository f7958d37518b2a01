use crate::artifacts::ArtifactStore;
use crate::classifier::{Classifier, Model, ModelKind, Probabilities};
use crate::config::DashboardConfig;
use crate::dataset::{check_sample, default_sample, feature_index, Sample, Species, FEATURES};
use crate::metrics::{coefficient_importance, ConfusionMatrix, FeatureImportance};
use crate::session::{PredictionRecord, Session};
use crate::trainer::{load_models, LoadedModels, Trainer, TrainingReport};
use anyhow::{Context, Result};
use colored::Colorize;
use std::{io::Write, path::Path};
use tracing::debug;

/// Current state of the input controls. Every value is kept inside its
/// feature's bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Controls {
    sample: Sample,
    pub model: ModelKind,
}

impl Controls {
    pub fn new(sample: Sample, model: ModelKind) -> Result<Self> {
        check_sample(&sample)?;
        Ok(Self { sample, model })
    }

    pub fn sample(&self) -> &Sample {
        &self.sample
    }

    pub fn set(&mut self, feature: &str, value: f64) -> Result<()> {
        let index = feature_index(feature).with_context(|| {
            format!(
                "unknown feature '{}', expected one of {}",
                feature,
                FEATURES.map(|f| f.key).join(", ")
            )
        })?;
        self.sample[index] = FEATURES[index].check(value)?;
        Ok(())
    }
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            sample: default_sample(),
            model: ModelKind::Knn,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub model: ModelKind,
    pub species: Species,
    pub probabilities: Probabilities,
    /// Highest class probability, as a percentage
    pub confidence: f64,
}

pub fn predict(model: &Model, sample: &Sample) -> Result<Prediction> {
    let species = model.predict(sample)?;
    let probabilities = model.predict_proba(sample)?;
    let confidence = probabilities.iter().copied().fold(0.0, f64::max) * 100.0;

    Ok(Prediction {
        model: model.kind(),
        species,
        probabilities,
        confidence,
    })
}

/// Result of one analyze action.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub prediction: Prediction,
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
    /// Only logistic regression has coefficients to rank
    pub importance: Option<Vec<FeatureImportance>>,
}

pub struct Dashboard {
    config: DashboardConfig,
    store: ArtifactStore,
}

impl Dashboard {
    pub fn new(config: DashboardConfig) -> Self {
        let store = ArtifactStore::new(config.storage.model_dir.clone());
        Self { config, store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Retrains every model, overwrites the artifacts, and reads them back.
    pub fn refresh(&self) -> Result<(TrainingReport, LoadedModels)> {
        let report = Trainer::new(&self.config.training, &self.store).train_and_save_models()?;
        let loaded = load_models(&self.store)?;
        Ok((report, loaded))
    }

    /// Runs one analyze action and appends its outcome to the session history.
    pub fn analyze(&self, controls: &Controls, session: &mut Session) -> Result<Analysis> {
        check_sample(controls.sample())?;
        let (report, loaded) = self.refresh()?;

        let model = loaded
            .get(controls.model)
            .with_context(|| format!("no {} model was loaded", controls.model))?;
        let prediction = predict(model, controls.sample())?;
        debug!(
            model = %prediction.model,
            species = %prediction.species,
            confidence = prediction.confidence,
            "Prediction made"
        );

        let confusion = ConfusionMatrix::evaluate(model, &loaded.test)?;
        let importance = model.coefficients().map(coefficient_importance);
        let accuracy = report
            .accuracy(controls.model)
            .with_context(|| format!("no accuracy recorded for {}", controls.model))?;

        session.record(PredictionRecord::new(
            prediction.model,
            prediction.species,
            prediction.confidence,
        ));

        Ok(Analysis {
            prediction,
            accuracy,
            confusion,
            importance,
        })
    }
}

// Rendering:

const BAR_WIDTH: usize = 30;

fn section(out: &mut dyn Write, title: &str) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", format!("=== {} ===", title).cyan().bold())?;
    Ok(())
}

fn bar(fraction: f64) -> String {
    let filled = (fraction.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
    format!("{}{}", "█".repeat(filled), "·".repeat(BAR_WIDTH - filled))
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn render_controls(out: &mut dyn Write, controls: &Controls, report: &TrainingReport) -> Result<()> {
    section(out, "Control Dock")?;
    writeln!(out, "  {:<20} {}", "Model".white().bold(), controls.model)?;
    if let Some(accuracy) = report.accuracy(controls.model) {
        writeln!(out, "  {:<20} {:.2}%", "Accuracy".white().bold(), accuracy * 100.0)?;
    }
    for (feature, value) in FEATURES.iter().zip(controls.sample().iter()) {
        writeln!(
            out,
            "  {:<20} {:.1}  [{} – {}]",
            feature.name,
            value,
            feature.min,
            feature.max
        )?;
    }
    Ok(())
}

pub fn render_accuracies(out: &mut dyn Write, report: &TrainingReport) -> Result<()> {
    section(out, "Held-out Accuracy")?;
    for (kind, accuracy) in &report.accuracies {
        writeln!(out, "  {:<20} {:>6.2}%", kind.display_name(), accuracy * 100.0)?;
    }
    writeln!(out, "  {:<20} {}", "Classes", report.class_names.join(", "))?;
    writeln!(out, "  {:<20} {}", "Features", report.feature_names.join(", "))?;
    Ok(())
}

pub fn render_result(out: &mut dyn Write, analysis: &Analysis) -> Result<()> {
    let prediction = &analysis.prediction;
    section(out, "Overview")?;
    writeln!(out, "  {:<20} {}", "Model Used", prediction.model)?;
    writeln!(out, "  {:<20} {}", "Predicted Species", prediction.species.to_string().green().bold())?;
    writeln!(out, "  {:<20} {:.2}%", "Confidence", prediction.confidence)?;
    writeln!(
        out,
        "  {:<20} {} (Iris {})",
        "Image",
        prediction.species.image_path(),
        capitalize(prediction.species.name())
    )?;
    Ok(())
}

pub fn render_analytics(out: &mut dyn Write, analysis: &Analysis) -> Result<()> {
    section(out, "Prediction Probabilities")?;
    for species in Species::ALL {
        let probability = analysis.prediction.probabilities[species.index()];
        writeln!(out, "  {:<12} {} {:.4}", species.name(), bar(probability), probability)?;
    }

    section(out, "Confusion Matrix")?;
    write!(out, "  {:<12}", "")?;
    for species in Species::ALL {
        write!(out, " {:>10}", species.name())?;
    }
    writeln!(out, " {:>10}", "total")?;

    let confusion = &analysis.confusion;
    let row_sums = confusion.row_sums();
    for truth in Species::ALL {
        write!(out, "  {:<12}", truth.name())?;
        for predicted in Species::ALL {
            write!(out, " {:>10}", confusion.get(truth, predicted))?;
        }
        writeln!(out, " {:>10}", row_sums[truth.index()])?;
    }
    write!(out, "  {:<12}", "total")?;
    for sum in confusion.column_sums() {
        write!(out, " {:>10}", sum)?;
    }
    writeln!(out, " {:>10}", confusion.total())?;
    if let Some(accuracy) = confusion.accuracy() {
        writeln!(
            out,
            "  {} of {} test samples correct ({:.2}%)",
            confusion.correct(),
            confusion.total(),
            accuracy * 100.0
        )?;
    }
    Ok(())
}

pub fn render_explainability(out: &mut dyn Write, analysis: &Analysis) -> Result<()> {
    section(out, "Feature Importance (Model Coefficients)")?;
    match &analysis.importance {
        Some(ranking) => {
            writeln!(out, "  {}", "Higher value → stronger influence on prediction".dimmed())?;
            let top = ranking.first().map_or(1.0, |f| f.importance.max(f64::EPSILON));
            for feature in ranking {
                writeln!(
                    out,
                    "  {:<20} {} {:.4}",
                    feature.feature,
                    bar(feature.importance / top),
                    feature.importance
                )?;
            }
        }
        None => writeln!(
            out,
            "  Feature importance available for {} only.",
            ModelKind::LogisticRegression
        )?,
    }
    Ok(())
}

pub fn render_history(out: &mut dyn Write, session: &Session) -> Result<()> {
    section(out, "Prediction History")?;
    if session.is_empty() {
        writeln!(out, "  No predictions yet.")?;
        return Ok(());
    }
    writeln!(out, "  {:<4} {:<20} {:<12} {:>14}", "#", "Model", "Prediction", "Confidence (%)")?;
    for (i, record) in session.history().iter().enumerate() {
        writeln!(
            out,
            "  {:<4} {:<20} {:<12} {:>14}",
            i + 1,
            record.model.display_name(),
            record.prediction.name(),
            record.confidence_text()
        )?;
    }
    Ok(())
}

pub fn render_gallery(out: &mut dyn Write) -> Result<()> {
    section(out, "Iris Species Gallery")?;
    for species in Species::ALL {
        let path = species.image_path();
        let status = if Path::new(path).exists() {
            "".normal()
        } else {
            "(missing)".yellow()
        };
        writeln!(out, "  Iris {:<12} {} {}", capitalize(species.name()), path, status)?;
    }
    Ok(())
}

/// Every view of an analysis, in dashboard order.
pub fn render_analysis(out: &mut dyn Write, analysis: &Analysis) -> Result<()> {
    render_result(out, analysis)?;
    render_analytics(out, analysis)?;
    render_explainability(out, analysis)
}
