use serde::{Deserialize, Serialize};

use crate::id::unique_hex;

const NAMESPACE_ID_BYTES: usize = 8;

/// Reserved namespace for platform-internal objects (the system volume,
/// the edge and console services).
pub const ORBIT_SYSTEM_NAMESPACE: &str = "orbit-system";

/// A grouping of platform objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// The namespaces collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespaces(pub Vec<Namespace>);

impl Namespaces {
    pub fn generate_id(&self) -> String {
        unique_hex(NAMESPACE_ID_BYTES, |id| self.0.iter().any(|n| n.id == id))
    }

    /// Search a namespace by name or ID.
    pub fn find(&self, id: &str) -> Option<&Namespace> {
        self.0.iter().find(|n| n.id == id || n.name == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Namespace> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_matches_name_or_id() {
        let namespaces = Namespaces(vec![Namespace {
            id: "0011223344556677".into(),
            name: ORBIT_SYSTEM_NAMESPACE.into(),
        }]);

        assert!(namespaces.find("orbit-system").is_some());
        assert!(namespaces.find("0011223344556677").is_some());
        assert!(namespaces.find("production").is_none());
    }
}
