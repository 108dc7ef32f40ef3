pub mod events;
pub mod health;
pub mod metrics;
pub mod stock;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses an identifier from a query string or path, naming the field on
/// failure.
fn parse_id<T: FromStr>(field: &str, value: &str) -> Result<T, ApiError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))
}
