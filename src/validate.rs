//! Field validators shared by the resource handlers. Each returns a
//! field-naming `ApiError::Validation` on rejection.

use chrono::{Datelike, Utc};

use crate::error::ApiError;

const MAX_USERNAME_LEN: usize = 150;
const MAX_SLUG_LEN: usize = 50;
const RESERVED_USERNAME: &str = "me";

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(ApiError::field("username", "username must be 1-150 characters"));
    }
    if username == RESERVED_USERNAME {
        return Err(ApiError::field(
            "username",
            format!("'{RESERVED_USERNAME}' is reserved and cannot be used as a username"),
        ));
    }
    Ok(())
}

/// Minimal local@domain shape check; real deliverability is the mail sink's
/// problem.
pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && domain.contains('.') && !email.contains(' ')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ApiError::field("email", "invalid email address"))
    }
}

pub fn validate_slug(slug: &str) -> Result<(), ApiError> {
    let well_formed = !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if well_formed {
        Ok(())
    } else {
        Err(ApiError::field(
            "slug",
            "slug must be 1-50 characters of [a-z0-9_-]",
        ))
    }
}

pub fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::field("name", "name must not be empty"));
    }
    Ok(())
}

pub fn validate_score(score: i32) -> Result<(), ApiError> {
    if !(1..=10).contains(&score) {
        return Err(ApiError::field("score", "score must be an integer from 1 to 10"));
    }
    Ok(())
}

/// Titles cannot be published in the future.
pub fn validate_year(year: i32) -> Result<(), ApiError> {
    let current = Utc::now().year();
    if year > current {
        return Err(ApiError::field(
            "year",
            format!("year must not be later than {current}"),
        ));
    }
    Ok(())
}
