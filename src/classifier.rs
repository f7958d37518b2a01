use crate::config::{LogisticConfig, TrainingConfig};
use crate::dataset::{Dataset, Sample, Species, NUM_CLASSES, NUM_FEATURES};
use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tracing::{debug, warn};

pub type Probabilities = [f64; NUM_CLASSES];

/// Capability set shared by every model the dashboard can serve.
pub trait Classifier {
    /// Fits the model on a training set, replacing anything learned before.
    fn fit(&mut self, data: &Dataset) -> Result<()>;

    /// Probability of each species, indexed by `Species::index`. Sums to 1.
    fn predict_proba(&self, sample: &Sample) -> Result<Probabilities>;

    /// Most probable species; ties go to the lower class index.
    fn predict(&self, sample: &Sample) -> Result<Species> {
        let probs = self.predict_proba(sample)?;
        let (best, _) = probs.iter().enumerate().fold(
            (0, f64::NEG_INFINITY),
            |(best, best_prob), (class, &prob)| {
                if prob > best_prob {
                    (class, prob)
                } else {
                    (best, best_prob)
                }
            },
        );
        Species::from_index(best).context("classifier produced no probabilities")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModelKind {
    Knn,
    LogisticRegression,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Knn, ModelKind::LogisticRegression];

    /// Name shown in the model selector and written to the history.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Knn => "KNN",
            ModelKind::LogisticRegression => "Logistic Regression",
        }
    }

    /// Artifact file stem, also the schema tag.
    pub fn tag(self) -> &'static str {
        match self {
            ModelKind::Knn => "knn",
            ModelKind::LogisticRegression => "logistic_regression",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ModelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "knn" | "k_nearest_neighbors" => Ok(ModelKind::Knn),
            "logistic" | "logistic_regression" | "logreg" | "lr" => {
                Ok(ModelKind::LogisticRegression)
            }
            _ => bail!("unknown model '{}', expected 'knn' or 'logistic'", s),
        }
    }
}

fn softmax(logits: &[f64; NUM_CLASSES]) -> Probabilities {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut probs = logits.map(|logit| (logit - max).exp());
    let total: f64 = probs.iter().sum();
    probs.iter_mut().for_each(|p| *p /= total);
    probs
}

/// Uniform-vote k-nearest-neighbours over Euclidean distance. Fitting just
/// memorises the training set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnClassifier {
    k: usize,
    samples: Vec<Sample>,
    labels: Vec<Species>,
}

impl KnnClassifier {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            samples: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.samples.is_empty()
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.k > 0, "knn needs at least one neighbour");
        ensure!(
            self.samples.len() == self.labels.len(),
            "knn has {} samples but {} labels",
            self.samples.len(),
            self.labels.len()
        );
        ensure!(
            self.samples.len() >= self.k,
            "knn with k = {} needs at least {} training samples, has {}",
            self.k,
            self.k,
            self.samples.len()
        );
        Ok(())
    }

    fn distance(a: &Sample, b: &Sample) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    }
}

impl Classifier for KnnClassifier {
    fn fit(&mut self, data: &Dataset) -> Result<()> {
        data.validate()?;
        ensure!(
            self.k <= data.len(),
            "k = {} is larger than the {} training samples",
            self.k,
            data.len()
        );

        self.samples = data.samples.clone();
        self.labels = data.labels.clone();
        Ok(())
    }

    fn predict_proba(&self, sample: &Sample) -> Result<Probabilities> {
        ensure!(self.is_fitted(), "knn model is not fitted");

        let mut distances: Vec<(f64, Species)> = self
            .samples
            .iter()
            .zip(self.labels.iter())
            .map(|(train, &label)| (Self::distance(sample, train), label))
            .collect();
        // Stable sort, so equally distant neighbours keep training order:
        distances.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut probs = [0.0; NUM_CLASSES];
        for (_, label) in distances.iter().take(self.k) {
            probs[label.index()] += 1.0;
        }
        probs.iter_mut().for_each(|p| *p /= self.k as f64);

        Ok(probs)
    }
}

/// Multinomial (softmax) logistic regression with an L2 penalty on the
/// weights, fitted by full-batch gradient descent.
///
/// Training runs on standardised features; the learned weights are mapped
/// back so the stored coefficients and intercepts apply to raw centimetre
/// measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    c: f64,
    learning_rate: f64,
    max_iter: usize,
    tolerance: f64,
    coefficients: [[f64; NUM_FEATURES]; NUM_CLASSES],
    intercepts: [f64; NUM_CLASSES],
    n_iter: usize,
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self::from_config(&TrainingConfig::default().logistic)
    }

    pub fn from_config(config: &LogisticConfig) -> Self {
        Self {
            c: config.c,
            learning_rate: config.learning_rate,
            max_iter: config.max_iter,
            tolerance: config.tolerance,
            coefficients: [[0.0; NUM_FEATURES]; NUM_CLASSES],
            intercepts: [0.0; NUM_CLASSES],
            n_iter: 0,
        }
    }

    /// Per-class weights over raw feature values, `[class][feature]`.
    pub fn coefficients(&self) -> &[[f64; NUM_FEATURES]; NUM_CLASSES] {
        &self.coefficients
    }

    pub fn is_fitted(&self) -> bool {
        self.n_iter > 0
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.c > 0.0, "logistic regression needs a positive C");
        ensure!(
            self.coefficients.iter().flatten().all(|w| w.is_finite())
                && self.intercepts.iter().all(|b| b.is_finite()),
            "logistic regression has non-finite parameters"
        );
        Ok(())
    }

    fn logits(&self, sample: &Sample) -> [f64; NUM_CLASSES] {
        let mut logits = self.intercepts;
        for (logit, weights) in logits.iter_mut().zip(self.coefficients.iter()) {
            *logit += weights
                .iter()
                .zip(sample.iter())
                .map(|(w, x)| w * x)
                .sum::<f64>();
        }
        logits
    }

    fn standardize(data: &Dataset) -> ([f64; NUM_FEATURES], [f64; NUM_FEATURES], Vec<Sample>) {
        let n = data.len() as f64;
        let mut mean = [0.0; NUM_FEATURES];
        for sample in &data.samples {
            for (m, x) in mean.iter_mut().zip(sample.iter()) {
                *m += x / n;
            }
        }

        let mut scale = [0.0; NUM_FEATURES];
        for sample in &data.samples {
            for ((s, x), m) in scale.iter_mut().zip(sample.iter()).zip(mean.iter()) {
                *s += (x - m) * (x - m) / n;
            }
        }
        // Constant columns are left unscaled:
        scale = scale.map(|var| if var > 1e-24 { var.sqrt() } else { 1.0 });

        let scaled = data
            .samples
            .iter()
            .map(|sample| {
                let mut z = [0.0; NUM_FEATURES];
                for j in 0..NUM_FEATURES {
                    z[j] = (sample[j] - mean[j]) / scale[j];
                }
                z
            })
            .collect();

        (mean, scale, scaled)
    }
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, data: &Dataset) -> Result<()> {
        data.validate()?;
        self.validate()?;
        ensure!(self.learning_rate > 0.0, "learning rate must be positive");

        let n = data.len() as f64;
        let (mean, scale, scaled) = Self::standardize(data);
        // Mean cross-entropy plus |W|^2 / (2 C n), with W the raw-space coefficients
        // (w / scale). Intercepts are not penalised:
        let penalty = 1.0 / (self.c * n);

        let mut weights = [[0.0; NUM_FEATURES]; NUM_CLASSES];
        let mut biases = [0.0; NUM_CLASSES];
        let mut iterations = 0;
        let mut converged = false;

        for _ in 0..self.max_iter {
            iterations += 1;

            let mut weight_grad = [[0.0; NUM_FEATURES]; NUM_CLASSES];
            let mut bias_grad = [0.0; NUM_CLASSES];
            for (z, label) in scaled.iter().zip(data.labels.iter()) {
                let mut logits = biases;
                for (logit, w) in logits.iter_mut().zip(weights.iter()) {
                    *logit += w.iter().zip(z.iter()).map(|(w, x)| w * x).sum::<f64>();
                }
                let probs = softmax(&logits);

                for class in 0..NUM_CLASSES {
                    let target = if label.index() == class { 1.0 } else { 0.0 };
                    let error = probs[class] - target;
                    bias_grad[class] += error;
                    for j in 0..NUM_FEATURES {
                        weight_grad[class][j] += error * z[j];
                    }
                }
            }

            let mut largest = 0.0_f64;
            for class in 0..NUM_CLASSES {
                bias_grad[class] /= n;
                largest = largest.max(bias_grad[class].abs());
                for j in 0..NUM_FEATURES {
                    weight_grad[class][j] = weight_grad[class][j] / n
                        + penalty * weights[class][j] / (scale[j] * scale[j]);
                    largest = largest.max(weight_grad[class][j].abs());
                }
            }

            for class in 0..NUM_CLASSES {
                biases[class] -= self.learning_rate * bias_grad[class];
                for j in 0..NUM_FEATURES {
                    weights[class][j] -= self.learning_rate * weight_grad[class][j];
                }
            }

            if largest < self.tolerance {
                converged = true;
                break;
            }
        }

        // Back to raw feature space:
        for class in 0..NUM_CLASSES {
            let mut intercept = biases[class];
            for j in 0..NUM_FEATURES {
                self.coefficients[class][j] = weights[class][j] / scale[j];
                intercept -= weights[class][j] * mean[j] / scale[j];
            }
            self.intercepts[class] = intercept;
        }
        self.n_iter = iterations;
        if converged {
            debug!(iterations, "Logistic regression fitted");
        } else {
            warn!(iterations, "Logistic regression stopped before reaching the tolerance");
        }

        self.validate()
    }

    fn predict_proba(&self, sample: &Sample) -> Result<Probabilities> {
        ensure!(self.is_fitted(), "logistic regression model is not fitted");
        Ok(softmax(&self.logits(sample)))
    }
}

/// A fitted model of either kind. Serialises with a `type` tag so the
/// artifact loader can tell the variants apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Model {
    Knn(KnnClassifier),
    LogisticRegression(LogisticRegression),
}

impl Model {
    pub fn from_config(kind: ModelKind, config: &TrainingConfig) -> Self {
        match kind {
            ModelKind::Knn => Model::Knn(KnnClassifier::new(config.knn_neighbors)),
            ModelKind::LogisticRegression => {
                Model::LogisticRegression(LogisticRegression::from_config(&config.logistic))
            }
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Model::Knn(_) => ModelKind::Knn,
            Model::LogisticRegression(_) => ModelKind::LogisticRegression,
        }
    }

    /// Linear coefficients, only available for logistic regression.
    pub fn coefficients(&self) -> Option<&[[f64; NUM_FEATURES]; NUM_CLASSES]> {
        match self {
            Model::Knn(_) => None,
            Model::LogisticRegression(model) => Some(model.coefficients()),
        }
    }

    /// Checks a model read back from disk is usable.
    pub fn validate(&self) -> Result<()> {
        match self {
            Model::Knn(model) => model.validate(),
            Model::LogisticRegression(model) => {
                model.validate()?;
                ensure!(model.is_fitted(), "logistic regression artifact was never fitted");
                Ok(())
            }
        }
    }
}

impl Classifier for Model {
    fn fit(&mut self, data: &Dataset) -> Result<()> {
        match self {
            Model::Knn(model) => model.fit(data),
            Model::LogisticRegression(model) => model.fit(data),
        }
    }

    fn predict_proba(&self, sample: &Sample) -> Result<Probabilities> {
        match self {
            Model::Knn(model) => model.predict_proba(sample),
            Model::LogisticRegression(model) => model.predict_proba(sample),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::FEATURES;

    fn iris_split() -> (Dataset, Dataset) {
        let split = Dataset::iris().unwrap().stratified_split(0.2, 42).unwrap();
        (split.train, split.test)
    }

    fn fitted(kind: ModelKind) -> Model {
        let (train, _) = iris_split();
        let mut model = Model::from_config(kind, &TrainingConfig::default());
        model.fit(&train).unwrap();
        model
    }

    // A coarse grid over the whole control range.
    fn grid() -> Vec<Sample> {
        let mut samples = Vec::new();
        for step in 0..=4 {
            let t = step as f64 / 4.0;
            let sample = FEATURES.map(|f| f.min + t * (f.max - f.min));
            samples.push(sample);
            samples.push([sample[0], FEATURES[1].max - t * 2.5, sample[2], FEATURES[3].min]);
        }
        samples
    }

    #[test]
    fn probabilities_sum_to_one() {
        for kind in ModelKind::ALL {
            let model = fitted(kind);
            for sample in grid() {
                let probs = model.predict_proba(&sample).unwrap();
                let total: f64 = probs.iter().sum();
                assert!((total - 1.0).abs() < 1e-9, "{} summed to {}", kind, total);
                assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
            }
        }
    }

    #[test]
    fn canonical_setosa_is_confident() {
        let model = fitted(ModelKind::LogisticRegression);
        let sample = [5.1, 3.5, 1.4, 0.2];

        assert_eq!(model.predict(&sample).unwrap(), Species::Setosa);
        let probs = model.predict_proba(&sample).unwrap();
        assert!(probs[Species::Setosa.index()] > 0.9, "got {:?}", probs);
    }

    #[test]
    fn both_models_separate_the_obvious_cases() {
        for kind in ModelKind::ALL {
            let model = fitted(kind);
            assert_eq!(model.predict(&[5.0, 3.4, 1.5, 0.2]).unwrap(), Species::Setosa);
            assert_eq!(model.predict(&[6.0, 2.8, 4.3, 1.3]).unwrap(), Species::Versicolor);
            assert_eq!(model.predict(&[7.0, 3.1, 6.2, 2.3]).unwrap(), Species::Virginica);
        }
    }

    #[test]
    fn knn_probabilities_are_neighbour_fractions() {
        let data = Dataset {
            samples: vec![
                [1.0, 0.0, 0.0, 0.0],
                [1.1, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [5.0, 5.0, 5.0, 5.0],
            ],
            labels: vec![Species::Setosa, Species::Setosa, Species::Versicolor, Species::Virginica],
        };
        let mut knn = KnnClassifier::new(3);
        knn.fit(&data).unwrap();

        let probs = knn.predict_proba(&[1.0, 0.1, 0.0, 0.0]).unwrap();
        assert!((probs[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((probs[1] - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(probs[2], 0.0);
    }

    #[test]
    fn knn_vote_ties_go_to_the_lower_class() {
        let data = Dataset {
            samples: vec![[0.0, 0.0, 0.0, 1.0], [0.0, 0.0, 0.0, -1.0]],
            labels: vec![Species::Virginica, Species::Versicolor],
        };
        let mut knn = KnnClassifier::new(2);
        knn.fit(&data).unwrap();
        assert_eq!(knn.predict(&[0.0; 4]).unwrap(), Species::Versicolor);
    }

    #[test]
    fn knn_rejects_k_larger_than_training_set() {
        let data = Dataset {
            samples: vec![[1.0; 4]],
            labels: vec![Species::Setosa],
        };
        assert!(KnnClassifier::new(5).fit(&data).is_err());
    }

    #[test]
    fn unfitted_models_refuse_to_predict() {
        assert!(KnnClassifier::new(5).predict_proba(&[5.0; 4]).is_err());
        assert!(LogisticRegression::new().predict(&[5.0; 4]).is_err());
    }

    #[test]
    fn refitting_gives_identical_parameters() {
        assert_eq!(fitted(ModelKind::LogisticRegression), fitted(ModelKind::LogisticRegression));
        assert_eq!(fitted(ModelKind::Knn), fitted(ModelKind::Knn));
    }

    #[test]
    fn logistic_fit_is_a_stationary_point_in_raw_units() {
        let (train, _) = iris_split();
        let mut model = LogisticRegression::new();
        model.fit(&train).unwrap();
        assert!(model.n_iter < model.max_iter, "stopped after {} steps", model.n_iter);

        // Gradient of mean cross-entropy + |W|^2 / (2 C n) over raw cm values:
        let n = train.len() as f64;
        let mut weight_grad = model.coefficients.map(|row| row.map(|w| w / (model.c * n)));
        let mut bias_grad = [0.0; NUM_CLASSES];
        for (sample, label) in train.samples.iter().zip(train.labels.iter()) {
            let probs = softmax(&model.logits(sample));
            for class in 0..NUM_CLASSES {
                let error = probs[class] - if label.index() == class { 1.0 } else { 0.0 };
                bias_grad[class] += error / n;
                for j in 0..NUM_FEATURES {
                    weight_grad[class][j] += error * sample[j] / n;
                }
            }
        }

        let largest = weight_grad
            .iter()
            .flatten()
            .chain(bias_grad.iter())
            .fold(0.0_f64, |acc, g| acc.max(g.abs()));
        assert!(largest < 1e-4, "largest gradient component {}", largest);
    }

    #[test]
    fn logistic_coefficients_follow_petal_measurements() {
        let model = fitted(ModelKind::LogisticRegression);
        let coefficients = model.coefficients().unwrap();
        let setosa = coefficients[Species::Setosa.index()];
        let virginica = coefficients[Species::Virginica.index()];

        // Longer petals push away from setosa and towards virginica:
        assert!(setosa[2] < -1.0 && virginica[2] > 1.0, "{:?}", coefficients);
        assert!(setosa[1] > 0.0 && virginica[1] < 0.0, "{:?}", coefficients);
    }

    #[test]
    fn stronger_regularisation_shrinks_coefficients() {
        let (train, _) = iris_split();
        let mut config = TrainingConfig::default().logistic;
        config.c = 10.0;
        let mut loose = LogisticRegression::from_config(&config);
        config.c = 0.01;
        let mut tight = LogisticRegression::from_config(&config);
        loose.fit(&train).unwrap();
        tight.fit(&train).unwrap();

        let norm = |m: &LogisticRegression| -> f64 {
            m.coefficients().iter().flatten().map(|w| w * w).sum()
        };
        assert!(norm(&tight) < norm(&loose));
    }

    #[test]
    fn model_kind_parses_selector_names() {
        assert_eq!("KNN".parse::<ModelKind>().unwrap(), ModelKind::Knn);
        assert_eq!(
            "Logistic Regression".parse::<ModelKind>().unwrap(),
            ModelKind::LogisticRegression
        );
        assert_eq!("logistic".parse::<ModelKind>().unwrap(), ModelKind::LogisticRegression);
        assert!("svm".parse::<ModelKind>().is_err());
    }

    #[test]
    fn only_logistic_regression_exposes_coefficients() {
        assert!(fitted(ModelKind::Knn).coefficients().is_none());
        assert!(fitted(ModelKind::LogisticRegression).coefficients().is_some());
    }
}
