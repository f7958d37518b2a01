use crate::classifier::ModelKind;
use crate::dataset::Species;
use anyhow::{Context, Result};
use std::{io, path::Path};

pub const DEFAULT_EXPORT_FILE: &str = "prediction_history.csv";
pub const HISTORY_COLUMNS: [&str; 3] = ["Model", "Prediction", "Confidence (%)"];

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub model: ModelKind,
    pub prediction: Species,
    /// Percentage, rounded to two decimals
    pub confidence: f64,
}

impl PredictionRecord {
    pub fn new(model: ModelKind, prediction: Species, confidence: f64) -> Self {
        Self {
            model,
            prediction,
            confidence: (confidence * 100.0).round() / 100.0,
        }
    }

    /// Confidence with at least one decimal place, e.g. `60.0` or `98.37`.
    pub fn confidence_text(&self) -> String {
        if self.confidence.fract() == 0.0 {
            format!("{:.1}", self.confidence)
        } else {
            self.confidence.to_string()
        }
    }
}

/// State owned by one interactive session. Dropped with the session.
#[derive(Debug, Default)]
pub struct Session {
    history: Vec<PredictionRecord>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: PredictionRecord) {
        self.history.push(record);
    }

    pub fn history(&self) -> &[PredictionRecord] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn write_csv<W: io::Write>(&self, wtr: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(wtr);

        writer.write_record(HISTORY_COLUMNS)?;
        for record in &self.history {
            writer.write_record(&[
                record.model.display_name().to_string(),
                record.prediction.to_string(),
                record.confidence_text(),
            ])?;
        }
        writer.flush()?;

        Ok(())
    }

    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        self.write_csv(file)
            .with_context(|| format!("Failed to export history to {}", path.display()))
    }
}
