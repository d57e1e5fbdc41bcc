use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeygateError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token revoked")]
    TokenRevoked,
    #[error("Token expired")]
    TokenExpired,
    #[error("HWID mismatch")]
    HwidMismatch,
    #[error("Token not found")]
    TokenNotFound,
    #[error("Invalid plan. Valid plans: {valid_plans}")]
    InvalidPlan { valid_plans: String },
    #[error("Unauthorized")]
    Unauthorized,
    #[error("the data interface {data_interface:?} is not supported for url {url:?}")]
    UnsupportedUrl { data_interface: String, url: String },
}
