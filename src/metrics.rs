use crate::classifier::Classifier;
use crate::dataset::{feature_names, Dataset, Species, NUM_CLASSES, NUM_FEATURES};
use anyhow::{ensure, Result};

/// Predicts every sample of a dataset, in order.
pub fn predict_all<C: Classifier + ?Sized>(model: &C, data: &Dataset) -> Result<Vec<Species>> {
    data.samples.iter().map(|sample| model.predict(sample)).collect()
}

/// Fraction of predictions matching the true labels.
pub fn accuracy(y_true: &[Species], y_pred: &[Species]) -> Result<f64> {
    ensure!(
        y_true.len() == y_pred.len(),
        "{} labels but {} predictions",
        y_true.len(),
        y_pred.len()
    );
    ensure!(!y_true.is_empty(), "cannot score an empty set");

    let correct = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(truth, pred)| truth == pred)
        .count();
    Ok(correct as f64 / y_true.len() as f64)
}

/// Counts indexed `[true class][predicted class]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfusionMatrix {
    counts: [[usize; NUM_CLASSES]; NUM_CLASSES],
}

impl ConfusionMatrix {
    pub fn from_predictions(y_true: &[Species], y_pred: &[Species]) -> Result<Self> {
        ensure!(
            y_true.len() == y_pred.len(),
            "{} labels but {} predictions",
            y_true.len(),
            y_pred.len()
        );

        let mut matrix = ConfusionMatrix::default();
        for (truth, pred) in y_true.iter().zip(y_pred.iter()) {
            matrix.counts[truth.index()][pred.index()] += 1;
        }
        Ok(matrix)
    }

    /// Runs the model over a held-out set and tallies the outcome.
    pub fn evaluate<C: Classifier + ?Sized>(model: &C, data: &Dataset) -> Result<Self> {
        let predictions = predict_all(model, data)?;
        Self::from_predictions(&data.labels, &predictions)
    }

    pub fn get(&self, truth: Species, predicted: Species) -> usize {
        self.counts[truth.index()][predicted.index()]
    }

    /// Samples per true class.
    pub fn row_sums(&self) -> [usize; NUM_CLASSES] {
        self.counts.map(|row| row.iter().sum())
    }

    /// Samples per predicted class.
    pub fn column_sums(&self) -> [usize; NUM_CLASSES] {
        let mut sums = [0; NUM_CLASSES];
        for row in &self.counts {
            for (sum, count) in sums.iter_mut().zip(row.iter()) {
                *sum += count;
            }
        }
        sums
    }

    pub fn total(&self) -> usize {
        self.row_sums().iter().sum()
    }

    pub fn correct(&self) -> usize {
        (0..NUM_CLASSES).map(|class| self.counts[class][class]).sum()
    }

    pub fn accuracy(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.correct() as f64 / total as f64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureImportance {
    pub feature: &'static str,
    pub importance: f64,
}

/// Mean absolute coefficient of each feature across classes, most important
/// first. Equal scores keep feature order.
pub fn coefficient_importance(
    coefficients: &[[f64; NUM_FEATURES]; NUM_CLASSES],
) -> Vec<FeatureImportance> {
    let mut ranking: Vec<FeatureImportance> = feature_names()
        .iter()
        .enumerate()
        .map(|(j, &feature)| FeatureImportance {
            feature,
            importance: coefficients.iter().map(|row| row[j].abs()).sum::<f64>()
                / NUM_CLASSES as f64,
        })
        .collect();

    ranking.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranking
}
