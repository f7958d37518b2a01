use crate::artifacts::ArtifactStore;
use crate::classifier::{Classifier, Model, ModelKind};
use crate::config::TrainingConfig;
use crate::dataset::{class_names, feature_names, Dataset, NUM_CLASSES, NUM_FEATURES};
use crate::metrics::{accuracy, predict_all};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// Held-out accuracy per model, 0.0 to 1.0
    pub accuracies: BTreeMap<ModelKind, f64>,
    pub class_names: [&'static str; NUM_CLASSES],
    pub feature_names: [&'static str; NUM_FEATURES],
}

impl TrainingReport {
    pub fn accuracy(&self, kind: ModelKind) -> Option<f64> {
        self.accuracies.get(&kind).copied()
    }
}

/// Fits every model on a fresh split of the bundled dataset and persists the
/// results. Runs from scratch each time; nothing is reused between runs.
pub struct Trainer<'a> {
    config: &'a TrainingConfig,
    store: &'a ArtifactStore,
}

impl<'a> Trainer<'a> {
    pub fn new(config: &'a TrainingConfig, store: &'a ArtifactStore) -> Self {
        Self { config, store }
    }

    pub fn train_and_save_models(&self) -> Result<TrainingReport> {
        let iris = Dataset::iris()?;
        let split = iris
            .stratified_split(self.config.test_fraction, self.config.seed)
            .context("Failed to split the dataset")?;
        info!(
            train = split.train.len(),
            test = split.test.len(),
            seed = self.config.seed,
            "Dataset split"
        );

        let mut accuracies = BTreeMap::new();
        for kind in ModelKind::ALL {
            let mut model = Model::from_config(kind, self.config);
            model
                .fit(&split.train)
                .with_context(|| format!("Failed to fit {}", kind))?;

            let predictions = predict_all(&model, &split.test)?;
            let score = accuracy(&split.test.labels, &predictions)?;
            info!(model = %kind, accuracy = score, "Model trained");

            self.store.save_model(&model)?;
            accuracies.insert(kind, score);
        }

        // Written last, so the analytics always see the split the saved models were scored on:
        self.store.save_test_data(&split.test)?;

        Ok(TrainingReport {
            accuracies,
            class_names: class_names(),
            feature_names: feature_names(),
        })
    }
}

/// Everything the presenter needs, read back from the artifact store.
#[derive(Debug, Clone)]
pub struct LoadedModels {
    models: BTreeMap<ModelKind, Model>,
    pub test: Dataset,
}

impl LoadedModels {
    pub fn get(&self, kind: ModelKind) -> Option<&Model> {
        self.models.get(&kind)
    }
}

pub fn load_models(store: &ArtifactStore) -> Result<LoadedModels> {
    let mut models = BTreeMap::new();
    for kind in ModelKind::ALL {
        let model = store
            .load_model(kind)
            .with_context(|| format!("Failed to load the {} model", kind))?;
        models.insert(kind, model);
    }
    let test = store
        .load_test_data()
        .context("Failed to load the held-out test set")?;

    Ok(LoadedModels { models, test })
}
