use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Sentinel position used when the LLM names a position the catalog does not know.
pub const UNKNOWN_POSITION: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BrandRow {
    pub id: Uuid,
    pub name: String,
    pub normalized_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PositionRow {
    pub id: Uuid,
    pub name: String,
    pub normalized_name: String,
}

/// Lookup key for catalog entries: lowercase, alphanumerics only.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}
