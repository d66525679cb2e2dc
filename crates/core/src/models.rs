use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Metadata stored next to a file's embedding.
///
/// Older records carry `filePath`/`fileName` instead of `path`/`name`; the
/// `resolved_*` accessors walk that fallback chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default, deserialize_with = "lenient_tags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl FileMetadata {
    pub fn resolved_path(&self) -> Option<&str> {
        non_empty(self.path.as_deref()).or_else(|| non_empty(self.file_path.as_deref()))
    }

    pub fn resolved_name(&self) -> Option<String> {
        non_empty(self.name.as_deref())
            .or_else(|| non_empty(self.file_name.as_deref()))
            .map(str::to_string)
            .or_else(|| {
                self.resolved_path()
                    .and_then(|p| Path::new(p).file_name())
                    .map(|n| n.to_string_lossy().into_owned())
            })
    }

    pub fn extension(&self) -> Option<String> {
        self.resolved_name()
            .as_deref()
            .and_then(|n| Path::new(n).extension())
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    /// Parent directory of the resolved path.
    pub fn parent_folder(&self) -> Option<String> {
        let path = self.resolved_path()?.replace('\\', "/");
        let parent = Path::new(&path).parent()?.to_string_lossy().into_owned();
        if parent.is_empty() {
            None
        } else {
            Some(parent)
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.trim().is_empty())
}

/// Tags arrive as an array, a JSON-encoded array string, or a comma list.
fn lenient_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(serde_json::Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.starts_with('[') {
                serde_json::from_str::<Vec<String>>(trimmed).unwrap_or_default()
            } else {
                trimmed
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            }
        }
        _ => Vec::new(),
    })
}

/// A file's embedding with its metadata, as retrieved from the vector store.
#[derive(Debug, Clone)]
pub struct FileEmbedding {
    pub id: String,
    pub vector: Arc<[f32]>,
    pub metadata: FileMetadata,
}
