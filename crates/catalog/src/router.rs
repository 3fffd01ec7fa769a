use serde::{Deserialize, Serialize};

use crate::id::unique_hex;

const ROUTER_ID_BYTES: usize = 32;

/// A domain routed by the edge reverse proxy, optionally terminated with a
/// TLS certificate from the catalogue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Router {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub certificate_id: String,
    #[serde(default)]
    pub namespace_id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub www_redirect: bool,
}

impl Router {
    /// Non-zero-overwrite merge: empty strings and `false` leave the stored
    /// values in place.
    pub fn apply_update(&mut self, update: &Router) {
        if !update.certificate_id.is_empty() {
            self.certificate_id = update.certificate_id.clone();
        }
        if !update.domain.is_empty() {
            self.domain = update.domain.clone();
        }
        if !update.namespace_id.is_empty() {
            self.namespace_id = update.namespace_id.clone();
        }
        if !update.app_id.is_empty() {
            self.app_id = update.app_id.clone();
        }
        if update.www_redirect {
            self.www_redirect = true;
        }
    }
}

/// The routers collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Routers(pub Vec<Router>);

impl Routers {
    pub fn generate_id(&self) -> String {
        unique_hex(ROUTER_ID_BYTES, |id| self.0.iter().any(|r| r.id == id))
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Router> {
        self.0.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Router> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_overwrites_only_non_empty_fields() {
        let mut current = Router {
            id: "r1".into(),
            domain: "example.com".into(),
            certificate_id: String::new(),
            namespace_id: "ns1".into(),
            app_id: "app1".into(),
            www_redirect: false,
        };

        current.apply_update(&Router {
            certificate_id: "cert1".into(),
            app_id: "app2".into(),
            ..Router::default()
        });

        assert_eq!(current.domain, "example.com");
        assert_eq!(current.certificate_id, "cert1");
        assert_eq!(current.namespace_id, "ns1");
        assert_eq!(current.app_id, "app2");
        assert!(!current.www_redirect);
    }
}
