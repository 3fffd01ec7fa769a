use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::unique_hex;

const DEPLOYMENT_ID_BYTES: usize = 8;

/// A deployment (an "app") created from a repository checkout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub repository_id: String,
    /// Branch to build; empty means the repository default.
    #[serde(default)]
    pub branch: String,
    /// Subdirectory of the repository to build, or the root.
    #[serde(default)]
    pub path: String,

    /// Build output, keyed `<commit-hash>/<path>` so logs survive across
    /// rebuilds of the same tree. Replicated so any node can serve them.
    #[serde(default)]
    pub build_logs: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub namespace_id: String,
}

impl Deployment {
    /// Merge a batch of build-log lines into this deployment, appending to
    /// keys that already exist.
    pub fn append_build_logs(&mut self, logs: &BTreeMap<String, Vec<String>>) {
        for (key, lines) in logs {
            self.build_logs
                .entry(key.clone())
                .or_default()
                .extend(lines.iter().cloned());
        }
    }
}

/// The deployments collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployments(pub Vec<Deployment>);

impl Deployments {
    pub fn generate_id(&self) -> String {
        unique_hex(DEPLOYMENT_ID_BYTES, |id| self.0.iter().any(|d| d.id == id))
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Deployment> {
        self.0.iter().find(|d| d.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Deployment> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_build_logs_appends_to_existing_keys() {
        let mut deployment = Deployment::default();
        let key = "abc123/web".to_string();

        let mut first = BTreeMap::new();
        first.insert(key.clone(), vec!["cloning".to_string()]);
        deployment.append_build_logs(&first);

        let mut second = BTreeMap::new();
        second.insert(key.clone(), vec!["building".to_string()]);
        second.insert("abc123/api".to_string(), vec!["cloning".to_string()]);
        deployment.append_build_logs(&second);

        assert_eq!(deployment.build_logs[&key], vec!["cloning", "building"]);
        assert_eq!(deployment.build_logs.len(), 2);
    }
}
