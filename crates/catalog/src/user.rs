use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::id::{random_hex, unique_hex};

/// Number of random bytes in a user ID.
const USER_ID_BYTES: usize = 8;

/// Number of random bytes in a session token.
const SESSION_TOKEN_BYTES: usize = 32;

/// A user with access to the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Auto generated, unique within the users collection.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    /// The 60-byte bcrypt hash of the password. Plaintext never appears on
    /// the wire or at rest.
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub email: String,
    /// Profile image bytes.
    #[serde(default)]
    pub profile: Vec<u8>,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

/// A login session, identified by a globally unique token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub token: String,
}

/// Inputs for creating a new user.
#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    pub name: String,
    pub username: String,
    pub password: String,
    pub email: String,
    pub profile: Vec<u8>,
}

impl User {
    /// Check a plaintext password against the stored bcrypt hash. bcrypt's
    /// comparison is constant time over the hash material.
    pub fn validate_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password).unwrap_or(false)
    }

    /// Create a session for this user with a fresh random token.
    pub fn generate_session(&self) -> Session {
        Session {
            token: random_hex(SESSION_TOKEN_BYTES),
        }
    }

    pub fn has_session(&self, token: &str) -> bool {
        self.sessions.iter().any(|s| s.token == token)
    }
}

/// The users collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Users(pub Vec<User>);

impl Users {
    /// Validate a user config and produce the user that should be applied
    /// to the store. The ID is generated here, before the command enters
    /// the log, so apply never has to re-check uniqueness.
    pub fn generate(&self, config: UserConfig) -> Result<User, CatalogError> {
        if config.name.is_empty()
            || config.username.is_empty()
            || config.password.is_empty()
            || config.email.is_empty()
        {
            return Err(CatalogError::MissingFields);
        }

        for user in &self.0 {
            if user.username == config.username {
                return Err(CatalogError::UsernameTaken);
            }
            if user.email == config.email {
                return Err(CatalogError::EmailTaken);
            }
        }

        let hashed = bcrypt::hash(&config.password, bcrypt::DEFAULT_COST)
            .map_err(|_| CatalogError::PasswordHash)?;

        Ok(User {
            id: self.generate_id(),
            name: config.name,
            username: config.username,
            password: hashed,
            email: config.email,
            profile: config.profile,
            sessions: Vec::new(),
        })
    }

    pub fn generate_id(&self) -> String {
        unique_hex(USER_ID_BYTES, |id| self.0.iter().any(|u| u.id == id))
    }

    pub fn find_by_id(&self, id: &str) -> Option<&User> {
        self.0.iter().find(|u| u.id == id)
    }

    /// Search a user by ID, email address, or username.
    pub fn find(&self, id: &str) -> Option<&User> {
        self.0
            .iter()
            .find(|u| u.id == id || u.email == id || u.username == id)
    }

    /// Search for the user that owns a session token.
    pub fn find_by_token(&self, token: &str) -> Option<&User> {
        self.0.iter().find(|u| u.has_session(token))
    }

    pub fn remove(&mut self, id: &str) -> Result<(), CatalogError> {
        let i = self
            .0
            .iter()
            .position(|u| u.id == id)
            .ok_or(CatalogError::NotFound)?;
        self.0.remove(i);
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, User> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> UserConfig {
        UserConfig {
            name: "Ada Lovelace".into(),
            username: "ada".into(),
            password: "analytical-engine".into(),
            email: "ada@example.com".into(),
            profile: Vec::new(),
        }
    }

    #[test]
    fn generate_hashes_password_to_sixty_bytes() {
        let users = Users::default();
        let user = users.generate(config()).unwrap();

        assert_eq!(user.password.len(), 60);
        assert_ne!(user.password, "analytical-engine");
        assert_eq!(user.id.len(), USER_ID_BYTES * 2);
    }

    #[test]
    fn validate_password_round_trip() {
        let users = Users::default();
        let user = users.generate(config()).unwrap();

        assert!(user.validate_password("analytical-engine"));
        assert!(!user.validate_password("difference-engine"));
        assert!(!user.validate_password(""));
    }

    #[test]
    fn generate_rejects_missing_fields() {
        let users = Users::default();
        let mut cfg = config();
        cfg.email = String::new();

        assert_eq!(users.generate(cfg), Err(CatalogError::MissingFields));
    }

    #[test]
    fn generate_rejects_duplicate_username_and_email() {
        let mut users = Users::default();
        let first = users.generate(config()).unwrap();
        users.0.push(first);

        let mut same_username = config();
        same_username.email = "other@example.com".into();
        assert_eq!(
            users.generate(same_username),
            Err(CatalogError::UsernameTaken)
        );

        let mut same_email = config();
        same_email.username = "lovelace".into();
        assert_eq!(users.generate(same_email), Err(CatalogError::EmailTaken));
    }

    #[test]
    fn session_tokens_are_sixty_four_hex_chars() {
        let users = Users::default();
        let user = users.generate(config()).unwrap();
        let session = user.generate_session();

        assert_eq!(session.token.len(), SESSION_TOKEN_BYTES * 2);
        assert!(session.token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn remove_missing_user_errors() {
        let mut users = Users::default();
        assert_eq!(users.remove("ffffffffffffffff"), Err(CatalogError::NotFound));
    }

    #[test]
    fn json_round_trip_preserves_hash_and_sessions() {
        let users = Users::default();
        let mut user = users.generate(config()).unwrap();
        user.sessions.push(user.generate_session());

        let encoded = serde_json::to_string(&user).unwrap();
        let decoded: User = serde_json::from_str(&encoded).unwrap();
        assert_eq!(user, decoded);
    }
}
