use thiserror::Error;

/// Catalogue validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CatalogError {
    #[error("required fields are missing")]
    MissingFields,

    #[error("username is already in use")]
    UsernameTaken,

    #[error("email is already in use")]
    EmailTaken,

    #[error("could not be found")]
    NotFound,

    #[error("could not hash password")]
    PasswordHash,
}
