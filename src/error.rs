use parse_display::Display;

/// Errors caused by how the cache is wired up, rather than by the data it holds.
#[derive(Debug, Display)]
pub enum CacheError {
    #[display("stores were accessed before the hosting session supplied them")]
    StoresNotConfigured,
    #[display("stores were supplied as a different type than `{0}`")]
    StoresTypeMismatch(&'static str),
    #[display("cached result for `{key}` does not match the action's types: {source}")]
    ResultType {
        key: String,
        source: serde_json::Error,
    },
    #[display("snapshot JSON error: {0}")]
    Json(serde_json::Error),
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::ResultType { source, .. } => Some(source),
            CacheError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Json(e)
    }
}
