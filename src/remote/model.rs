use serde::Deserialize;
use serde_json::Value;

/// Row echoed back by PostgREST with `Prefer: return=representation`.
#[derive(Deserialize, Debug)]
pub struct UpsertedRow {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub local_id: Option<String>,
}

impl UpsertedRow {
    /// Server primary key rendered as text, whether the column is numeric or UUID.
    pub fn server_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Error envelope shared by Supabase Storage (`error`, `message`, `statusCode`)
/// and PostgREST (`code`, `message`, `details`, `hint`).
#[derive(Deserialize, Debug, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default, rename = "statusCode")]
    pub status_code: Option<Value>,
}
