/*!
 * # Model Store
 *
 * Durable storage for trained models. Each key owns a directory with three
 * JSON artifacts (model, scaler, feature list). All three carry the same
 * generation id, so a load can tell a consistent triple from a mix of two
 * saves or a partially written one.
 */

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::gbm::GradientBoostingRegressor;
use super::scaler::StandardScaler;
use super::trainer::TrainedModel;
use crate::errors::ForecastError;

const MODEL_FILE: &str = "model.json";
const SCALER_FILE: &str = "scaler.json";
const FEATURES_FILE: &str = "features.json";

#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Persists `model` under `key`, superseding any previous artifacts.
    async fn save(&self, key: &str, model: &TrainedModel) -> Result<(), ForecastError>;

    /// `Ok(None)` when nothing is stored for `key`. A partial or unreadable
    /// triple is `ArtifactCorrupt`, never an empty model.
    async fn load(&self, key: &str) -> Result<Option<TrainedModel>, ForecastError>;

    async fn delete(&self, key: &str) -> Result<(), ForecastError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Artifact<T> {
    generation: Uuid,
    payload: T,
}

/// File-system backed store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsModelStore {
    root: PathBuf,
}

impl FsModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &str) -> Result<PathBuf, ForecastError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ForecastError::InvalidInput(format!(
                "invalid model key '{}'",
                key
            )));
        }
        Ok(self.root.join(key))
    }

    async fn write_artifact<T: Serialize>(
        dir: &Path,
        name: &str,
        generation: Uuid,
        payload: &T,
    ) -> Result<(), ForecastError> {
        let bytes = serde_json::to_vec(&Artifact {
            generation,
            payload,
        })?;
        let tmp = dir.join(format!("{}.tmp", name));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, dir.join(name)).await?;
        Ok(())
    }

    /// A file that exists but cannot be read fails the load as corrupt, so the
    /// caller retrains instead of aborting.
    async fn read_artifact(
        key: &str,
        dir: &Path,
        name: &str,
    ) -> Result<Option<Vec<u8>>, ForecastError> {
        match tokio::fs::read(dir.join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ForecastError::artifact_corrupt(
                key,
                format!("{} unreadable: {}", name, e),
            )),
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, name: &str, bytes: &[u8]) -> Result<Artifact<T>, ForecastError> {
    serde_json::from_slice(bytes)
        .map_err(|e| ForecastError::artifact_corrupt(key, format!("{} unreadable: {}", name, e)))
}

#[async_trait]
impl ModelStore for FsModelStore {
    #[instrument(skip(self, model))]
    async fn save(&self, key: &str, model: &TrainedModel) -> Result<(), ForecastError> {
        let dir = self.key_dir(key)?;
        tokio::fs::create_dir_all(&dir).await?;

        let generation = Uuid::new_v4();
        Self::write_artifact(&dir, FEATURES_FILE, generation, &model.feature_names).await?;
        Self::write_artifact(&dir, SCALER_FILE, generation, &model.scaler).await?;
        Self::write_artifact(&dir, MODEL_FILE, generation, &model.model).await?;

        info!(key, %generation, "Saved model artifacts");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(&self, key: &str) -> Result<Option<TrainedModel>, ForecastError> {
        let dir = self.key_dir(key)?;
        let model_bytes = Self::read_artifact(key, &dir, MODEL_FILE).await?;
        let scaler_bytes = Self::read_artifact(key, &dir, SCALER_FILE).await?;
        let features_bytes = Self::read_artifact(key, &dir, FEATURES_FILE).await?;

        let (model_bytes, scaler_bytes, features_bytes) =
            match (model_bytes, scaler_bytes, features_bytes) {
                (None, None, None) => {
                    debug!(key, "No stored model");
                    return Ok(None);
                }
                (Some(m), Some(s), Some(f)) => (m, s, f),
                (m, s, f) => {
                    let missing: Vec<&str> = [
                        (m.is_none(), MODEL_FILE),
                        (s.is_none(), SCALER_FILE),
                        (f.is_none(), FEATURES_FILE),
                    ]
                    .into_iter()
                    .filter_map(|(absent, name)| absent.then_some(name))
                    .collect();
                    return Err(ForecastError::artifact_corrupt(
                        key,
                        format!("missing {}", missing.join(", ")),
                    ));
                }
            };

        let model: Artifact<GradientBoostingRegressor> = decode(key, MODEL_FILE, &model_bytes)?;
        let scaler: Artifact<StandardScaler> = decode(key, SCALER_FILE, &scaler_bytes)?;
        let features: Artifact<Vec<String>> = decode(key, FEATURES_FILE, &features_bytes)?;

        if model.generation != scaler.generation || model.generation != features.generation {
            return Err(ForecastError::artifact_corrupt(
                key,
                "artifacts come from different saves",
            ));
        }

        let trained = TrainedModel {
            model: model.payload,
            scaler: scaler.payload,
            feature_names: features.payload,
        };
        validate_triple(key, &trained)?;

        debug!(key, generation = %model.generation, "Loaded model artifacts");
        Ok(Some(trained))
    }

    async fn delete(&self, key: &str) -> Result<(), ForecastError> {
        let dir = self.key_dir(key)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ForecastError::StorageError(e)),
        }
    }
}

fn validate_triple(key: &str, trained: &TrainedModel) -> Result<(), ForecastError> {
    if trained.feature_names.is_empty() {
        return Err(ForecastError::artifact_corrupt(key, "empty feature list"));
    }
    if trained.model.n_features != trained.feature_names.len() {
        return Err(ForecastError::artifact_corrupt(
            key,
            format!(
                "model expects {} features, feature list has {}",
                trained.model.n_features,
                trained.feature_names.len()
            ),
        ));
    }
    if !trained.model.is_consistent() {
        return Err(ForecastError::artifact_corrupt(key, "model structure invalid"));
    }
    if !trained.scaler.is_consistent()
        || !trained
            .scaler
            .columns
            .iter()
            .all(|c| trained.feature_names.contains(c))
    {
        return Err(ForecastError::artifact_corrupt(key, "scaler does not match feature list"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::ml::features::{feature_names, FeatureTable};
    use crate::ml::trainer::Trainer;
    use assert_matches::assert_matches;
    use chrono::{Duration, NaiveDate};
    use tempfile::TempDir;

    fn trained() -> TrainedModel {
        let names = feature_names();
        let n = 40;
        let table = FeatureTable {
            rows: (0..n)
                .map(|i| {
                    let mut r = vec![1.0; names.len()];
                    r[1] = (i % 5) as f64;
                    r
                })
                .collect(),
            targets: (0..n).map(|i| (i % 5) as f64).collect(),
            dates: (0..n)
                .map(|i| NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(i))
                .collect(),
            feature_names: names,
        };
        let trainer = Trainer::new(
            ModelConfig {
                n_estimators: 10,
                ..ModelConfig::default()
            },
            3,
        );
        trainer.train(&table).unwrap().0
    }

    #[tokio::test]
    async fn save_then_load_restores_the_triple() {
        let dir = TempDir::new().unwrap();
        let store = FsModelStore::new(dir.path());
        let model = trained();

        store.save("p1", &model).await.unwrap();
        let loaded = store.load("p1").await.unwrap().expect("stored");
        assert_eq!(loaded, model);
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsModelStore::new(dir.path());
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_artifact_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FsModelStore::new(dir.path());
        store.save("p1", &trained()).await.unwrap();
        std::fs::remove_file(dir.path().join("p1").join(SCALER_FILE)).unwrap();

        assert_matches!(
            store.load("p1").await,
            Err(ForecastError::ArtifactCorrupt { reason, .. }) if reason.contains(SCALER_FILE)
        );
    }

    #[tokio::test]
    async fn truncated_artifact_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FsModelStore::new(dir.path());
        store.save("p1", &trained()).await.unwrap();
        std::fs::write(dir.path().join("p1").join(MODEL_FILE), b"{\"generation\":").unwrap();

        assert_matches!(store.load("p1").await, Err(ForecastError::ArtifactCorrupt { .. }));
    }

    #[tokio::test]
    async fn unreadable_artifact_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FsModelStore::new(dir.path());
        store.save("p1", &trained()).await.unwrap();
        let model_path = dir.path().join("p1").join(MODEL_FILE);
        std::fs::remove_file(&model_path).unwrap();
        std::fs::create_dir(&model_path).unwrap();

        assert_matches!(
            store.load("p1").await,
            Err(ForecastError::ArtifactCorrupt { reason, .. }) if reason.contains(MODEL_FILE)
        );

        store.delete("p1").await.unwrap();
        store.save("p1", &trained()).await.unwrap();
        assert!(store.load("p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn mixed_generations_are_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FsModelStore::new(dir.path());
        store.save("a", &trained()).await.unwrap();
        store.save("b", &trained()).await.unwrap();
        std::fs::copy(
            dir.path().join("b").join(FEATURES_FILE),
            dir.path().join("a").join(FEATURES_FILE),
        )
        .unwrap();

        assert_matches!(store.load("a").await, Err(ForecastError::ArtifactCorrupt { .. }));
    }

    #[tokio::test]
    async fn delete_removes_everything() {
        let dir = TempDir::new().unwrap();
        let store = FsModelStore::new(dir.path());
        store.save("p1", &trained()).await.unwrap();
        store.delete("p1").await.unwrap();
        assert!(store.load("p1").await.unwrap().is_none());
        store.delete("p1").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_path_like_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsModelStore::new(dir.path());
        assert_matches!(
            store.load("../escape").await,
            Err(ForecastError::InvalidInput(_))
        );
    }
}
