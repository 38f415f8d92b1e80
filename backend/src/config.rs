use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

const DEFAULT_BUCKET: &str = "car-classification-ml-coastal-hue";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
    #[error("Missing required variable {0}")]
    MissingVar(&'static str),
    #[error("Failed to read task config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse task config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid task config: {0}")]
    InvalidTask(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactBackend {
    S3 { endpoint_url: Option<String> },
    Local { root: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    pub id: String,
    pub weights_object: String,
    pub labels_object: String,
    pub top_k: usize,
    #[serde(default)]
    pub weights_sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TasksFile {
    tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub max_payload_bytes: usize,
    pub bucket: String,
    pub backend: ArtifactBackend,
    pub scratch_dir: PathBuf,
    pub tasks: Vec<TaskConfig>,
}

impl TaskConfig {
    pub fn body_type() -> Self {
        Self {
            id: "body-type".into(),
            weights_object: "models/body-type/best_model_body_type.pt".into(),
            labels_object: "models/body-type/class_labels_body_type.json".into(),
            top_k: 3,
            weights_sha256: None,
        }
    }

    pub fn brand() -> Self {
        Self {
            id: "brand".into(),
            weights_object: "models/brand/best_model_brand.pt".into(),
            labels_object: "models/brand/class_labels_brand.json".into(),
            top_k: 5,
            weights_sha256: None,
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![Self::body_type(), Self::brand()]
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = parse_var(&lookup, "PORT")?.unwrap_or(DEFAULT_PORT);
        let workers = parse_var(&lookup, "WORKERS")?;
        let max_payload_bytes =
            parse_var(&lookup, "MAX_PAYLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES);

        let bucket = lookup("MODEL_BUCKET")
            .or_else(|| lookup("GCS_BUCKET"))
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string());
        if bucket.trim().is_empty() {
            return Err(ConfigError::InvalidVar {
                name: "MODEL_BUCKET",
                value: bucket,
            });
        }

        let backend = match lookup("ARTIFACT_BACKEND").as_deref() {
            None | Some("s3") => ArtifactBackend::S3 {
                endpoint_url: lookup("ARTIFACT_ENDPOINT_URL").filter(|u| !u.is_empty()),
            },
            Some("local") => ArtifactBackend::Local {
                root: lookup("ARTIFACT_ROOT")
                    .map(PathBuf::from)
                    .ok_or(ConfigError::MissingVar("ARTIFACT_ROOT"))?,
            },
            Some(other) => {
                return Err(ConfigError::InvalidVar {
                    name: "ARTIFACT_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let scratch_dir = lookup("SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);

        let tasks = match lookup("TASKS_CONFIG") {
            Some(path) => {
                let path = PathBuf::from(path);
                let contents = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                parse_tasks(&contents)?
            }
            None => TaskConfig::defaults(),
        };
        validate_tasks(&tasks)?;

        Ok(Self {
            host: lookup("BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            workers,
            max_payload_bytes,
            bucket,
            backend,
            scratch_dir,
            tasks,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn parse_tasks(contents: &str) -> Result<Vec<TaskConfig>, ConfigError> {
    let file: TasksFile = serde_yaml::from_str(contents)?;
    Ok(file.tasks)
}

fn validate_tasks(tasks: &[TaskConfig]) -> Result<(), ConfigError> {
    if tasks.is_empty() {
        return Err(ConfigError::InvalidTask("no tasks configured".into()));
    }
    let mut seen = HashSet::new();
    for task in tasks {
        if task.id.trim().is_empty() {
            return Err(ConfigError::InvalidTask("task id must not be empty".into()));
        }
        if !seen.insert(task.id.as_str()) {
            return Err(ConfigError::InvalidTask(format!(
                "duplicate task id '{}'",
                task.id
            )));
        }
        if task.weights_object.is_empty() || task.labels_object.is_empty() {
            return Err(ConfigError::InvalidTask(format!(
                "task '{}' is missing an artifact path",
                task.id
            )));
        }
        if task.top_k == 0 {
            return Err(ConfigError::InvalidTask(format!(
                "task '{}' must request at least one prediction",
                task.id
            )));
        }
    }
    Ok(())
}

fn parse_var<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { name, value }),
        None => Ok(None),
    }
}
