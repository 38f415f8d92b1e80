use ndarray::Array4;
use shared::TaskSummary;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::labels::parse_manifest;
use super::model::{Classifier, InferenceError, ModelLoadError, ModelLoader, infer};
use super::preprocess::INPUT_SHAPE;
use crate::config::TaskConfig;
use crate::storage::{ArtifactFetcher, FetchError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown task '{0}'")]
    UnknownTask(String),
    #[error("Models are not loaded yet")]
    NotReady,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to fetch artifacts for task '{task}': {source}")]
    Fetch { task: String, source: FetchError },
    #[error("Failed to load model for task '{task}': {source}")]
    Load { task: String, source: ModelLoadError },
}

/// A task's classifier bound to its ordered labels.
pub struct LoadedModel {
    task: TaskConfig,
    labels: Vec<String>,
    classifier: Box<dyn Classifier>,
}

impl LoadedModel {
    pub fn id(&self) -> &str {
        &self.task.id
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    pub fn top_k(&self) -> usize {
        self.task.top_k
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }
}

/// Holds every configured task's model once startup has completed.
///
/// Populated exactly once by [`ModelRegistry::initialize`]; reads afterwards
/// need no locking.
pub struct ModelRegistry {
    tasks: Vec<TaskConfig>,
    scratch_dir: PathBuf,
    models: OnceCell<HashMap<String, Arc<LoadedModel>>>,
}

impl ModelRegistry {
    pub fn new(tasks: Vec<TaskConfig>, scratch_dir: PathBuf) -> Self {
        Self {
            tasks,
            scratch_dir,
            models: OnceCell::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.models.initialized()
    }

    /// Fetches and loads every task. Concurrent or repeated calls share a
    /// single load.
    pub async fn initialize(
        &self,
        fetcher: &ArtifactFetcher,
        loader: &dyn ModelLoader,
    ) -> Result<(), StartupError> {
        self.models
            .get_or_try_init(|| async {
                let mut models = HashMap::new();
                for task in &self.tasks {
                    let loaded = self.load_task(task, fetcher, loader).await?;
                    log::info!(
                        "Loaded model for task '{}' with {} classes (top {})",
                        task.id,
                        loaded.num_classes(),
                        task.top_k
                    );
                    models.insert(task.id.clone(), Arc::new(loaded));
                }
                Ok::<_, StartupError>(models)
            })
            .await?;
        Ok(())
    }

    async fn load_task(
        &self,
        task: &TaskConfig,
        fetcher: &ArtifactFetcher,
        loader: &dyn ModelLoader,
    ) -> Result<LoadedModel, StartupError> {
        let weights_path = self.scratch_dir.join(format!("{}.pt", task.id));
        let labels_path = self.scratch_dir.join(format!("{}_labels.json", task.id));

        let fetch_err = |source| StartupError::Fetch {
            task: task.id.clone(),
            source,
        };
        let load_err = |source| StartupError::Load {
            task: task.id.clone(),
            source,
        };

        log::info!("Loading {} model...", task.id);
        fetcher
            .fetch_to(&task.weights_object, &weights_path, task.weights_sha256.as_deref())
            .await
            .map_err(fetch_err)?;
        fetcher
            .fetch_to(&task.labels_object, &labels_path, None)
            .await
            .map_err(fetch_err)?;

        let manifest = tokio::fs::read(&labels_path).await.map_err(|source| {
            fetch_err(FetchError::Io {
                path: labels_path.clone(),
                source,
            })
        })?;
        let labels = parse_manifest(&manifest)
            .map_err(ModelLoadError::from)
            .map_err(load_err)?;

        let classifier = loader.load(&weights_path).map_err(load_err)?;
        probe(classifier.as_ref(), labels.len()).map_err(load_err)?;

        Ok(LoadedModel {
            task: task.clone(),
            labels,
            classifier,
        })
    }

    pub fn get_model(&self, task_id: &str) -> Result<Arc<LoadedModel>, RegistryError> {
        let models = self.models.get().ok_or(RegistryError::NotReady)?;
        models
            .get(task_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTask(task_id.to_string()))
    }

    pub fn summaries(&self) -> Vec<TaskSummary> {
        self.tasks
            .iter()
            .map(|task| TaskSummary {
                id: task.id.clone(),
                num_classes: self
                    .get_model(&task.id)
                    .map(|m| m.num_classes())
                    .unwrap_or_default(),
                top_k: task.top_k,
            })
            .collect()
    }
}

/// Checks the model's output width against the label count with one
/// forward pass over a blank input.
fn probe(classifier: &dyn Classifier, num_labels: usize) -> Result<(), ModelLoadError> {
    let blank = Array4::<f32>::zeros(INPUT_SHAPE);
    match infer(classifier, &blank, num_labels) {
        Ok(_) => Ok(()),
        Err(InferenceError::OutputMismatch { expected, actual }) => {
            Err(ModelLoadError::ClassCountMismatch {
                outputs: actual,
                labels: expected,
            })
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::inference::model::testing::FakeLoader;
    use crate::storage::testing::MemoryStore;

    pub const BUCKET: &str = "test-bucket";

    pub fn body_type_labels() -> Vec<&'static str> {
        vec!["Convertible", "Coupe", "Hatchback", "Pick-Up", "SUV", "Sedan", "VAN"]
    }

    pub fn brand_labels() -> Vec<&'static str> {
        vec!["Audi", "BMW", "Ford", "Toyota", "Volkswagen"]
    }

    /// Store holding both built-in tasks with checkpoints that match their
    /// manifests.
    pub fn store() -> MemoryStore {
        let body = TaskConfig::body_type();
        let brand = TaskConfig::brand();
        MemoryStore::default()
            .with(BUCKET, &body.weights_object, body_type_labels().len().to_string())
            .with(
                BUCKET,
                &body.labels_object,
                serde_json::json!({ "class_names": body_type_labels() }).to_string(),
            )
            .with(BUCKET, &brand.weights_object, brand_labels().len().to_string())
            .with(
                BUCKET,
                &brand.labels_object,
                serde_json::json!({ "classes": brand_labels() }).to_string(),
            )
    }

    pub async fn ready_registry(scratch: &std::path::Path) -> ModelRegistry {
        let registry = ModelRegistry::new(TaskConfig::defaults(), scratch.to_path_buf());
        let fetcher = ArtifactFetcher::new(Box::new(store()), BUCKET.into());
        registry
            .initialize(&fetcher, &FakeLoader::default())
            .await
            .unwrap();
        registry
    }
}
