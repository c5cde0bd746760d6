use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Role;

pub type Id = i64;

/// Stored user record. The confirmation code and superuser flag are internal
/// and never serialized to API clients; responses go through [`UserProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub role: Role,
    pub superuser: bool,
    pub confirmation_code: Option<String>,
}

/// Public shape of a user record.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserProfile {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub role: Role,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            username: u.username,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            bio: u.bio,
            role: u.role,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub role: Option<Role>,
}

/// Partial profile update. The username is the key other rows reference and
/// is not editable. Role changes are subject to the writable-field projection
/// in `access`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub role: Option<Role>,
}

/// Slug-keyed catalog tag. The slug is the identity; the same shape is used
/// for creation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Category {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Genre {
    pub name: String,
    pub slug: String,
}

/// Stored title row; `category` holds the category slug (nulled when the
/// category is deleted, never cascaded).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Title {
    pub id: Id,
    pub name: String,
    pub year: i32,
    pub description: String,
    pub category: Option<String>,
}

/// Read shape of a title: nested catalog objects plus the live rating.
/// The rating is the mean of review scores, null when no reviews exist.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TitleDetail {
    pub id: Id,
    pub name: String,
    pub year: i32,
    pub description: String,
    pub rating: Option<f64>,
    pub category: Option<Category>,
    pub genre: Vec<Genre>,
}

/// Write shape of a title: category and genres referenced by slug.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewTitle {
    pub name: String,
    pub year: i32,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
    #[serde(default)]
    pub genre: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateTitle {
    pub name: Option<String>,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub genre: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Review {
    pub id: Id,
    /// Username of the author; server-assigned, never taken from the body.
    pub author: String,
    pub title_id: Id,
    pub text: String,
    pub score: i32,
    pub pub_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewReview {
    pub text: String,
    pub score: i32,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateReview {
    pub text: Option<String>,
    pub score: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub author: String,
    pub review_id: Id,
    pub text: String,
    pub pub_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewComment {
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateComment {
    pub text: Option<String>,
}

/// Title collection filter (category slug, genre slug, name substring, year).
#[derive(Debug, Clone, Default)]
pub struct TitleFilter {
    pub category: Option<String>,
    pub genre: Option<String>,
    pub name: Option<String>,
    pub year: Option<i32>,
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Resolved pagination window (1-based page numbers on the wire).
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub fn from_params(page: Option<u32>, page_size: Option<u32>) -> Self {
        let size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let page = page.unwrap_or(1).max(1);
        Self {
            offset: i64::from(page - 1) * i64::from(size),
            limit: i64::from(size),
        }
    }

    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::from_params(None, None)
    }
}

/// Collection envelope: total match count before paging plus the page slice.
#[derive(Debug, Serialize)]
pub struct Paged<T> {
    pub count: usize,
    pub results: Vec<T>,
}

impl<T> Paged<T> {
    pub fn new(count: usize, results: Vec<T>) -> Self {
        Self { count, results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_and_caps() {
        let p = Page::from_params(None, None);
        assert_eq!((p.offset, p.limit), (0, 20));
        let p = Page::from_params(Some(3), Some(10));
        assert_eq!((p.offset, p.limit), (20, 10));
        // oversized page_size is capped, page 0 treated as 1
        let p = Page::from_params(Some(0), Some(1000));
        assert_eq!((p.offset, p.limit), (0, 100));
    }

    #[test]
    fn page_slice_is_a_window() {
        let items: Vec<i32> = (0..7).collect();
        let p = Page { offset: 5, limit: 5 };
        assert_eq!(p.slice(&items), vec![5, 6]);
    }
}
