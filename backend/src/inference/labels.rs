use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unrecognized manifest shape: {0}")]
    UnknownShape(String),
    #[error("Label at index {0} is not a string")]
    NonStringLabel(usize),
    #[error("idx_to_class keys are not the contiguous range 0..{0}")]
    NonContiguous(usize),
    #[error("Manifest contains no labels")]
    Empty,
}

/// Parses a label manifest into labels ordered by class index.
///
/// Accepted shapes are a bare array, `{"class_names": [...]}`,
/// `{"classes": [...]}` and `{"idx_to_class": {"0": ..., "1": ...}}`.
pub fn parse_manifest(bytes: &[u8]) -> Result<Vec<String>, ManifestError> {
    let value: Value = serde_json::from_slice(bytes)?;

    let labels = match &value {
        Value::Array(items) => string_list(items)?,
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("class_names") {
                string_list(items)?
            } else if let Some(Value::Array(items)) = map.get("classes") {
                string_list(items)?
            } else if let Some(Value::Object(index)) = map.get("idx_to_class") {
                indexed_list(index)?
            } else {
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                return Err(ManifestError::UnknownShape(format!(
                    "object with keys [{}]",
                    keys.join(", ")
                )));
            }
        }
        other => {
            return Err(ManifestError::UnknownShape(format!(
                "top-level {}",
                json_kind(other)
            )));
        }
    };

    if labels.is_empty() {
        return Err(ManifestError::Empty);
    }
    Ok(labels)
}

fn string_list(items: &[Value]) -> Result<Vec<String>, ManifestError> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_str()
                .map(str::to_string)
                .ok_or(ManifestError::NonStringLabel(i))
        })
        .collect()
}

fn indexed_list(index: &serde_json::Map<String, Value>) -> Result<Vec<String>, ManifestError> {
    let n = index.len();
    let mut labels: Vec<Option<String>> = vec![None; n];
    for (key, item) in index {
        let i: usize = key.parse().map_err(|_| ManifestError::NonContiguous(n))?;
        let slot = labels.get_mut(i).ok_or(ManifestError::NonContiguous(n))?;
        let label = item.as_str().ok_or(ManifestError::NonStringLabel(i))?;
        *slot = Some(label.to_string());
    }
    labels
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or(ManifestError::NonContiguous(n))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
