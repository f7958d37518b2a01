//! On-disk artifacts: one JSON document per fitted model plus one for the
//! held-out test set. Every document carries `format_version`; model
//! documents also carry the model's `type` tag, which is checked on load.

use crate::classifier::{Model, ModelKind};
use crate::dataset::Dataset;
use anyhow::{bail, ensure, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info};

pub const FORMAT_VERSION: u32 = 1;

const TEST_DATA_FILE: &str = "test_data.json";
const TEST_DATA_KIND: &str = "test_data";

#[derive(Debug, Serialize, Deserialize)]
struct ModelArtifact {
    format_version: u32,
    model: Model,
}

#[derive(Debug, Serialize, Deserialize)]
struct TestDataArtifact {
    format_version: u32,
    kind: String,
    data: Dataset,
}

/// Directory of persisted artifacts. Writes overwrite whatever is there.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.tag()))
    }

    pub fn test_data_path(&self) -> PathBuf {
        self.dir.join(TEST_DATA_FILE)
    }

    pub fn save_model(&self, model: &Model) -> Result<PathBuf> {
        let path = self.model_path(model.kind());
        let artifact = ModelArtifact {
            format_version: FORMAT_VERSION,
            model: model.clone(),
        };
        self.write_json(&path, &artifact)?;

        info!(model = %model.kind(), path = %path.display(), "Model artifact written");
        Ok(path)
    }

    pub fn load_model(&self, kind: ModelKind) -> Result<Model> {
        let path = self.model_path(kind);
        let artifact: ModelArtifact = Self::read_json(&path)?;

        Self::check_version(artifact.format_version, &path)?;
        if artifact.model.kind() != kind {
            bail!(
                "{} holds a '{}' model, expected '{}'",
                path.display(),
                artifact.model.kind().tag(),
                kind.tag()
            );
        }
        artifact
            .model
            .validate()
            .with_context(|| format!("invalid model artifact {}", path.display()))?;

        debug!(model = %kind, path = %path.display(), "Model artifact loaded");
        Ok(artifact.model)
    }

    pub fn save_test_data(&self, data: &Dataset) -> Result<PathBuf> {
        let path = self.test_data_path();
        let artifact = TestDataArtifact {
            format_version: FORMAT_VERSION,
            kind: TEST_DATA_KIND.to_string(),
            data: data.clone(),
        };
        self.write_json(&path, &artifact)?;

        info!(rows = data.len(), path = %path.display(), "Held-out test set written");
        Ok(path)
    }

    pub fn load_test_data(&self) -> Result<Dataset> {
        let path = self.test_data_path();
        let artifact: TestDataArtifact = Self::read_json(&path)?;

        Self::check_version(artifact.format_version, &path)?;
        ensure!(
            artifact.kind == TEST_DATA_KIND,
            "{} holds a '{}' artifact, expected '{}'",
            path.display(),
            artifact.kind,
            TEST_DATA_KIND
        );
        artifact
            .data
            .validate()
            .with_context(|| format!("invalid test data artifact {}", path.display()))?;

        debug!(rows = artifact.data.len(), path = %path.display(), "Held-out test set loaded");
        Ok(artifact.data)
    }

    fn check_version(version: u32, path: &Path) -> Result<()> {
        ensure!(
            version == FORMAT_VERSION,
            "{} has artifact format version {}, this build reads version {}",
            path.display(),
            version,
            FORMAT_VERSION
        );
        Ok(())
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create artifact directory {}", self.dir.display()))?;

        let file = File::create(path)
            .with_context(|| format!("Failed to create artifact {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)
            .with_context(|| format!("Failed to serialize artifact {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("Failed to write artifact {}", path.display()))?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open artifact {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to deserialize artifact {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classifier, KnnClassifier};
    use crate::config::TrainingConfig;

    fn fitted_models() -> (Vec<Model>, Dataset) {
        let split = Dataset::iris().unwrap().stratified_split(0.2, 42).unwrap();
        let models = ModelKind::ALL
            .iter()
            .map(|&kind| {
                let mut model = Model::from_config(kind, &TrainingConfig::default());
                model.fit(&split.train).unwrap();
                model
            })
            .collect();
        (models, split.test)
    }

    #[test]
    fn models_and_test_data_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("saved_models"));
        let (models, test) = fitted_models();

        for model in &models {
            store.save_model(model).unwrap();
        }
        store.save_test_data(&test).unwrap();

        for model in &models {
            let loaded = store.load_model(model.kind()).unwrap();
            assert_eq!(&loaded, model);
        }
        assert_eq!(store.load_test_data().unwrap(), test);
    }

    #[test]
    fn artifacts_carry_version_and_type_tag() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let (models, _) = fitted_models();
        store.save_model(&models[1]).unwrap();

        let raw = fs::read_to_string(store.model_path(ModelKind::LogisticRegression)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["format_version"], 1);
        assert_eq!(json["model"]["type"], "logistic_regression");
    }

    #[test]
    fn missing_artifacts_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.load_model(ModelKind::Knn).is_err());
        assert!(store.load_test_data().is_err());
    }

    #[test]
    fn mismatched_type_tag_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let (models, _) = fitted_models();

        // A knn document sitting where the logistic model should be:
        store.save_model(&models[0]).unwrap();
        fs::copy(
            store.model_path(ModelKind::Knn),
            store.model_path(ModelKind::LogisticRegression),
        )
        .unwrap();

        let err = store.load_model(ModelKind::LogisticRegression).unwrap_err();
        assert!(err.to_string().contains("expected 'logistic_regression'"));
    }

    #[test]
    fn stale_format_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let (models, _) = fitted_models();
        let path = store.save_model(&models[0]).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        fs::write(&path, raw.replacen("\"format_version\": 1", "\"format_version\": 0", 1)).unwrap();
        assert!(store.load_model(ModelKind::Knn).is_err());

        fs::write(&path, "\u{80}\u{5}pickle").unwrap();
        assert!(store.load_model(ModelKind::Knn).is_err());
    }

    #[test]
    fn unfitted_model_artifacts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save_model(&Model::Knn(KnnClassifier::new(5))).unwrap();
        assert!(store.load_model(ModelKind::Knn).is_err());
    }

    #[test]
    fn unwritable_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "").unwrap();

        let store = ArtifactStore::new(blocker.join("saved_models"));
        let (models, test) = fitted_models();
        assert!(store.save_model(&models[0]).is_err());
        assert!(store.save_test_data(&test).is_err());
    }
}
