use serde::{Deserialize, Serialize};

use crate::id::unique_hex;

const REPOSITORY_ID_BYTES: usize = 8;

/// A git repository hosted on the platform's system volume. The API git
/// component uses the ID to decide where the bare repo lives on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace_id: String,
}

/// The repositories collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repositories(pub Vec<Repository>);

impl Repositories {
    pub fn generate_id(&self) -> String {
        unique_hex(REPOSITORY_ID_BYTES, |id| self.0.iter().any(|r| r.id == id))
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Repository> {
        self.0.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Repository> {
        self.0.iter()
    }
}
