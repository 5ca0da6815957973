use serde::{Deserialize, Serialize};

/// Model settings. Keys are camelCase so host JSON settings deserialize as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelOptions {
    /// Reject `set_cell` when parent/source/target names a missing cell.
    pub reject_dangling_references: bool,
    /// Keep the raw XML text buffer in step with `from_string`.
    pub mirror_raw_source: bool,
    pub read_only: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            reject_dangling_references: true,
            mirror_raw_source: true,
            read_only: false,
        }
    }
}

impl ModelOptions {
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
