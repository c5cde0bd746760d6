use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    /// Uniqueness violation; carries the colliding field name.
    #[error("{0} already exists")]
    Conflict(&'static str),
    /// A write referenced a catalog row (by slug) that does not exist.
    #[error("unknown {0}")]
    UnknownReference(&'static str),
    #[error("storage error: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait CategoryRepo: Send + Sync {
    async fn list_categories(
        &self,
        search: Option<&str>,
        page: Page,
    ) -> RepoResult<(Vec<Category>, usize)>;
    async fn create_category(&self, new: Category) -> RepoResult<Category>;
    async fn delete_category(&self, slug: &str) -> RepoResult<()>;
}

#[async_trait]
pub trait GenreRepo: Send + Sync {
    async fn list_genres(
        &self,
        search: Option<&str>,
        page: Page,
    ) -> RepoResult<(Vec<Genre>, usize)>;
    async fn create_genre(&self, new: Genre) -> RepoResult<Genre>;
    async fn delete_genre(&self, slug: &str) -> RepoResult<()>;
}

#[async_trait]
pub trait TitleRepo: Send + Sync {
    /// Listing computes each title's rating in one bulk aggregate pass,
    /// never one query per row.
    async fn list_titles(
        &self,
        filter: &TitleFilter,
        page: Page,
    ) -> RepoResult<(Vec<TitleDetail>, usize)>;
    async fn get_title(&self, id: Id) -> RepoResult<TitleDetail>;
    async fn create_title(&self, new: NewTitle) -> RepoResult<TitleDetail>;
    async fn update_title(&self, id: Id, upd: UpdateTitle) -> RepoResult<TitleDetail>;
    async fn delete_title(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait ReviewRepo: Send + Sync {
    async fn list_reviews(&self, title_id: Id, page: Page) -> RepoResult<(Vec<Review>, usize)>;
    async fn find_review(&self, title_id: Id, author: &str) -> RepoResult<Option<Review>>;
    async fn get_review(&self, title_id: Id, review_id: Id) -> RepoResult<Review>;
    /// Fails with `Conflict("review")` when the author already reviewed the
    /// title; the unique constraint is the authoritative backstop for races
    /// past the handler's pre-check.
    async fn create_review(&self, title_id: Id, author: &str, new: NewReview)
        -> RepoResult<Review>;
    async fn update_review(
        &self,
        title_id: Id,
        review_id: Id,
        upd: UpdateReview,
    ) -> RepoResult<Review>;
    async fn delete_review(&self, title_id: Id, review_id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// All comment lookups resolve the parent review by the compound
    /// (review_id, title_id) match; a review under a different title is
    /// NotFound, never a fall-through.
    async fn list_comments(
        &self,
        title_id: Id,
        review_id: Id,
        page: Page,
    ) -> RepoResult<(Vec<Comment>, usize)>;
    async fn get_comment(&self, title_id: Id, review_id: Id, comment_id: Id)
        -> RepoResult<Comment>;
    async fn create_comment(
        &self,
        title_id: Id,
        review_id: Id,
        author: &str,
        new: NewComment,
    ) -> RepoResult<Comment>;
    async fn update_comment(
        &self,
        title_id: Id,
        review_id: Id,
        comment_id: Id,
        upd: UpdateComment,
    ) -> RepoResult<Comment>;
    async fn delete_comment(&self, title_id: Id, review_id: Id, comment_id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn list_users(
        &self,
        search: Option<&str>,
        page: Page,
    ) -> RepoResult<(Vec<User>, usize)>;
    async fn get_user(&self, username: &str) -> RepoResult<User>;
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn update_user(&self, username: &str, upd: UpdateUser) -> RepoResult<User>;
    async fn delete_user(&self, username: &str) -> RepoResult<()>;
    /// Signup upsert: create the record or, when the same username+email
    /// pair is already registered, rotate its confirmation code. A collision
    /// with a *different* identity is a `Conflict` naming the field.
    async fn signup_user(&self, username: &str, email: &str, code: &str) -> RepoResult<User>;
}

pub trait Repo:
    CategoryRepo + GenreRepo + TitleRepo + ReviewRepo + CommentRepo + UserRepo
{
}

impl<T> Repo for T where
    T: CategoryRepo + GenreRepo + TitleRepo + ReviewRepo + CommentRepo + UserRepo
{
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use log::{info, warn};
    use serde::{Deserialize, Serialize};
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<String, User>,
        categories: HashMap<String, Category>,
        genres: HashMap<String, Genre>,
        titles: HashMap<Id, Title>,
        /// (genre slug, title id) join pairs.
        genre_title: Vec<(String, Id)>,
        reviews: HashMap<Id, Review>,
        comments: HashMap<Id, Comment>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn title_detail(&self, title: &Title, rating: Option<f64>) -> TitleDetail {
            let category = title
                .category
                .as_deref()
                .and_then(|slug| self.categories.get(slug))
                .cloned();
            let genre = self
                .genre_title
                .iter()
                .filter(|(_, tid)| *tid == title.id)
                .filter_map(|(slug, _)| self.genres.get(slug))
                .cloned()
                .collect();
            TitleDetail {
                id: title.id,
                name: title.name.clone(),
                year: title.year,
                description: title.description.clone(),
                rating,
                category,
                genre,
            }
        }

        /// One pass over the review relation for a whole batch of titles.
        fn ratings(&self, ids: &HashSet<Id>) -> HashMap<Id, (i64, i64)> {
            let mut agg: HashMap<Id, (i64, i64)> = HashMap::new();
            for r in self.reviews.values() {
                if ids.contains(&r.title_id) {
                    let e = agg.entry(r.title_id).or_default();
                    e.0 += i64::from(r.score);
                    e.1 += 1;
                }
            }
            agg
        }

        fn rating_of(&self, title_id: Id) -> Option<f64> {
            let agg = self.ratings(&HashSet::from([title_id]));
            agg.get(&title_id).map(|(sum, n)| *sum as f64 / *n as f64)
        }

        /// Review must exist under exactly this title.
        fn resolve_review(&self, title_id: Id, review_id: Id) -> RepoResult<&Review> {
            self.reviews
                .get(&review_id)
                .filter(|r| r.title_id == title_id)
                .ok_or(RepoError::NotFound)
        }

        fn remove_review_cascade(&mut self, review_id: Id) {
            self.reviews.remove(&review_id);
            self.comments.retain(|_, c| c.review_id != review_id);
        }
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("REVU_DATA_DIR") {
                Ok(dir) => Path::new(&dir).join("state.json"),
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = &*self.snapshot_path;
            if let Ok(bytes) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(path, bytes) {
                    warn!("failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    fn contains_ci(haystack: &str, needle: &str) -> bool {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }

    #[async_trait]
    impl CategoryRepo for InMemRepo {
        async fn list_categories(
            &self,
            search: Option<&str>,
            page: Page,
        ) -> RepoResult<(Vec<Category>, usize)> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .categories
                .values()
                .filter(|c| search.map_or(true, |q| contains_ci(&c.name, q)))
                .cloned()
                .collect();
            v.sort_by(|a, b| a.slug.cmp(&b.slug));
            let count = v.len();
            Ok((page.slice(&v), count))
        }

        async fn create_category(&self, new: Category) -> RepoResult<Category> {
            let mut s = self.state.write().unwrap();
            if s.categories.contains_key(&new.slug) {
                return Err(RepoError::Conflict("slug"));
            }
            if s.categories.values().any(|c| c.name == new.name) {
                return Err(RepoError::Conflict("name"));
            }
            s.categories.insert(new.slug.clone(), new.clone());
            drop(s);
            self.persist();
            Ok(new)
        }

        async fn delete_category(&self, slug: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.categories.remove(slug).ok_or(RepoError::NotFound)?;
            // Referencing titles lose the category, they are never deleted.
            for t in s.titles.values_mut() {
                if t.category.as_deref() == Some(slug) {
                    t.category = None;
                }
            }
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl GenreRepo for InMemRepo {
        async fn list_genres(
            &self,
            search: Option<&str>,
            page: Page,
        ) -> RepoResult<(Vec<Genre>, usize)> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .genres
                .values()
                .filter(|g| search.map_or(true, |q| contains_ci(&g.name, q)))
                .cloned()
                .collect();
            v.sort_by(|a, b| a.slug.cmp(&b.slug));
            let count = v.len();
            Ok((page.slice(&v), count))
        }

        async fn create_genre(&self, new: Genre) -> RepoResult<Genre> {
            let mut s = self.state.write().unwrap();
            if s.genres.contains_key(&new.slug) {
                return Err(RepoError::Conflict("slug"));
            }
            if s.genres.values().any(|g| g.name == new.name) {
                return Err(RepoError::Conflict("name"));
            }
            s.genres.insert(new.slug.clone(), new.clone());
            drop(s);
            self.persist();
            Ok(new)
        }

        async fn delete_genre(&self, slug: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.genres.remove(slug).ok_or(RepoError::NotFound)?;
            // Only the join rows go; titles survive.
            s.genre_title.retain(|(g, _)| g != slug);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    fn check_genre_slugs(s: &State, slugs: &[String]) -> RepoResult<()> {
        for slug in slugs {
            if !s.genres.contains_key(slug) {
                return Err(RepoError::UnknownReference("genre"));
            }
        }
        Ok(())
    }

    fn uniq(slugs: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for s in slugs {
            if !out.contains(s) {
                out.push(s.clone());
            }
        }
        out
    }

    #[async_trait]
    impl TitleRepo for InMemRepo {
        async fn list_titles(
            &self,
            filter: &TitleFilter,
            page: Page,
        ) -> RepoResult<(Vec<TitleDetail>, usize)> {
            let s = self.state.read().unwrap();
            let mut v: Vec<&Title> = s
                .titles
                .values()
                .filter(|t| {
                    filter
                        .category
                        .as_deref()
                        .map_or(true, |c| t.category.as_deref() == Some(c))
                })
                .filter(|t| {
                    filter.genre.as_deref().map_or(true, |g| {
                        s.genre_title.iter().any(|(gs, tid)| gs == g && *tid == t.id)
                    })
                })
                .filter(|t| filter.name.as_deref().map_or(true, |n| contains_ci(&t.name, n)))
                .filter(|t| filter.year.map_or(true, |y| t.year == y))
                .collect();
            v.sort_by_key(|t| t.id);
            let count = v.len();
            let window: Vec<Title> = v
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .cloned()
                .collect();
            let ids: HashSet<Id> = window.iter().map(|t| t.id).collect();
            let agg = s.ratings(&ids);
            let details = window
                .iter()
                .map(|t| {
                    let rating = agg.get(&t.id).map(|(sum, n)| *sum as f64 / *n as f64);
                    s.title_detail(t, rating)
                })
                .collect();
            Ok((details, count))
        }

        async fn get_title(&self, id: Id) -> RepoResult<TitleDetail> {
            let s = self.state.read().unwrap();
            let t = s.titles.get(&id).ok_or(RepoError::NotFound)?;
            Ok(s.title_detail(t, s.rating_of(id)))
        }

        async fn create_title(&self, new: NewTitle) -> RepoResult<TitleDetail> {
            let mut s = self.state.write().unwrap();
            if let Some(cat) = new.category.as_deref() {
                if !s.categories.contains_key(cat) {
                    return Err(RepoError::UnknownReference("category"));
                }
            }
            let genres = uniq(&new.genre);
            check_genre_slugs(&s, &genres)?;
            let id = s.next_id();
            let title = Title {
                id,
                name: new.name,
                year: new.year,
                description: new.description,
                category: new.category,
            };
            s.titles.insert(id, title.clone());
            for g in genres {
                s.genre_title.push((g, id));
            }
            let detail = s.title_detail(&title, None);
            drop(s);
            self.persist();
            Ok(detail)
        }

        async fn update_title(&self, id: Id, upd: UpdateTitle) -> RepoResult<TitleDetail> {
            let mut s = self.state.write().unwrap();
            if !s.titles.contains_key(&id) {
                return Err(RepoError::NotFound);
            }
            if let Some(cat) = upd.category.as_deref() {
                if !s.categories.contains_key(cat) {
                    return Err(RepoError::UnknownReference("category"));
                }
            }
            let genres = upd.genre.as_deref().map(uniq);
            if let Some(ref g) = genres {
                check_genre_slugs(&s, g)?;
            }

            let t = s.titles.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(name) = upd.name {
                t.name = name;
            }
            if let Some(year) = upd.year {
                t.year = year;
            }
            if let Some(description) = upd.description {
                t.description = description;
            }
            if let Some(category) = upd.category {
                t.category = Some(category);
            }
            let title = t.clone();
            if let Some(genres) = genres {
                s.genre_title.retain(|(_, tid)| *tid != id);
                for g in genres {
                    s.genre_title.push((g, id));
                }
            }
            let detail = s.title_detail(&title, s.rating_of(id));
            drop(s);
            self.persist();
            Ok(detail)
        }

        async fn delete_title(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.titles.remove(&id).ok_or(RepoError::NotFound)?;
            s.genre_title.retain(|(_, tid)| *tid != id);
            let doomed: Vec<Id> = s
                .reviews
                .values()
                .filter(|r| r.title_id == id)
                .map(|r| r.id)
                .collect();
            for review_id in doomed {
                s.remove_review_cascade(review_id);
            }
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl ReviewRepo for InMemRepo {
        async fn list_reviews(
            &self,
            title_id: Id,
            page: Page,
        ) -> RepoResult<(Vec<Review>, usize)> {
            let s = self.state.read().unwrap();
            if !s.titles.contains_key(&title_id) {
                return Err(RepoError::NotFound);
            }
            let mut v: Vec<_> = s
                .reviews
                .values()
                .filter(|r| r.title_id == title_id)
                .cloned()
                .collect();
            v.sort_by_key(|r| r.id);
            let count = v.len();
            Ok((page.slice(&v), count))
        }

        async fn find_review(&self, title_id: Id, author: &str) -> RepoResult<Option<Review>> {
            let s = self.state.read().unwrap();
            if !s.titles.contains_key(&title_id) {
                return Err(RepoError::NotFound);
            }
            Ok(s.reviews
                .values()
                .find(|r| r.title_id == title_id && r.author == author)
                .cloned())
        }

        async fn get_review(&self, title_id: Id, review_id: Id) -> RepoResult<Review> {
            let s = self.state.read().unwrap();
            s.resolve_review(title_id, review_id).cloned()
        }

        async fn create_review(
            &self,
            title_id: Id,
            author: &str,
            new: NewReview,
        ) -> RepoResult<Review> {
            let mut s = self.state.write().unwrap();
            if !s.titles.contains_key(&title_id) {
                return Err(RepoError::NotFound);
            }
            // The state lock makes this the authoritative uniqueness check,
            // equivalent to the unique constraint in the Postgres backend.
            if s.reviews
                .values()
                .any(|r| r.title_id == title_id && r.author == author)
            {
                return Err(RepoError::Conflict("review"));
            }
            let id = s.next_id();
            let review = Review {
                id,
                author: author.to_string(),
                title_id,
                text: new.text,
                score: new.score,
                pub_date: Utc::now(),
            };
            s.reviews.insert(id, review.clone());
            drop(s);
            self.persist();
            Ok(review)
        }

        async fn update_review(
            &self,
            title_id: Id,
            review_id: Id,
            upd: UpdateReview,
        ) -> RepoResult<Review> {
            let mut s = self.state.write().unwrap();
            s.resolve_review(title_id, review_id)?;
            let r = s.reviews.get_mut(&review_id).ok_or(RepoError::NotFound)?;
            // author, title and pub_date are immutable.
            if let Some(text) = upd.text {
                r.text = text;
            }
            if let Some(score) = upd.score {
                r.score = score;
            }
            let updated = r.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_review(&self, title_id: Id, review_id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.resolve_review(title_id, review_id)?;
            s.remove_review_cascade(review_id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(
            &self,
            title_id: Id,
            review_id: Id,
            page: Page,
        ) -> RepoResult<(Vec<Comment>, usize)> {
            let s = self.state.read().unwrap();
            s.resolve_review(title_id, review_id)?;
            let mut v: Vec<_> = s
                .comments
                .values()
                .filter(|c| c.review_id == review_id)
                .cloned()
                .collect();
            v.sort_by_key(|c| c.id);
            let count = v.len();
            Ok((page.slice(&v), count))
        }

        async fn get_comment(
            &self,
            title_id: Id,
            review_id: Id,
            comment_id: Id,
        ) -> RepoResult<Comment> {
            let s = self.state.read().unwrap();
            s.resolve_review(title_id, review_id)?;
            s.comments
                .get(&comment_id)
                .filter(|c| c.review_id == review_id)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn create_comment(
            &self,
            title_id: Id,
            review_id: Id,
            author: &str,
            new: NewComment,
        ) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            s.resolve_review(title_id, review_id)?;
            let id = s.next_id();
            let comment = Comment {
                id,
                author: author.to_string(),
                review_id,
                text: new.text,
                pub_date: Utc::now(),
            };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }

        async fn update_comment(
            &self,
            title_id: Id,
            review_id: Id,
            comment_id: Id,
            upd: UpdateComment,
        ) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            s.resolve_review(title_id, review_id)?;
            let c = s
                .comments
                .get_mut(&comment_id)
                .filter(|c| c.review_id == review_id)
                .ok_or(RepoError::NotFound)?;
            if let Some(text) = upd.text {
                c.text = text;
            }
            let updated = c.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_comment(
            &self,
            title_id: Id,
            review_id: Id,
            comment_id: Id,
        ) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.resolve_review(title_id, review_id)?;
            if !s
                .comments
                .get(&comment_id)
                .is_some_and(|c| c.review_id == review_id)
            {
                return Err(RepoError::NotFound);
            }
            s.comments.remove(&comment_id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn list_users(
            &self,
            search: Option<&str>,
            page: Page,
        ) -> RepoResult<(Vec<User>, usize)> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .users
                .values()
                .filter(|u| search.map_or(true, |q| contains_ci(&u.username, q)))
                .cloned()
                .collect();
            v.sort_by(|a, b| a.username.cmp(&b.username));
            let count = v.len();
            Ok((page.slice(&v), count))
        }

        async fn get_user(&self, username: &str) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users.get(username).cloned().ok_or(RepoError::NotFound)
        }

        async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
            let s = self.state.read().unwrap();
            Ok(s.users.values().find(|u| u.email == email).cloned())
        }

        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if s.users.contains_key(&new.username) {
                return Err(RepoError::Conflict("username"));
            }
            if s.users.values().any(|u| u.email == new.email) {
                return Err(RepoError::Conflict("email"));
            }
            let user = User {
                username: new.username.clone(),
                email: new.email,
                first_name: new.first_name,
                last_name: new.last_name,
                bio: new.bio,
                role: new.role.unwrap_or_default(),
                superuser: false,
                confirmation_code: None,
            };
            s.users.insert(new.username, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn update_user(&self, username: &str, upd: UpdateUser) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if let Some(ref email) = upd.email {
                if s.users
                    .values()
                    .any(|u| u.email == *email && u.username != username)
                {
                    return Err(RepoError::Conflict("email"));
                }
            }
            let u = s.users.get_mut(username).ok_or(RepoError::NotFound)?;
            if let Some(email) = upd.email {
                u.email = email;
            }
            if let Some(first_name) = upd.first_name {
                u.first_name = Some(first_name);
            }
            if let Some(last_name) = upd.last_name {
                u.last_name = Some(last_name);
            }
            if let Some(bio) = upd.bio {
                u.bio = Some(bio);
            }
            if let Some(role) = upd.role {
                u.role = role;
            }
            let updated = u.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_user(&self, username: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.users.remove(username).ok_or(RepoError::NotFound)?;
            let doomed: Vec<Id> = s
                .reviews
                .values()
                .filter(|r| r.author == username)
                .map(|r| r.id)
                .collect();
            for review_id in doomed {
                s.remove_review_cascade(review_id);
            }
            s.comments.retain(|_, c| c.author != username);
            drop(s);
            self.persist();
            Ok(())
        }

        async fn signup_user(&self, username: &str, email: &str, code: &str) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if let Some(u) = s.users.get_mut(username) {
                if u.email != email {
                    return Err(RepoError::Conflict("username"));
                }
                // Idempotent re-signup: rotate the code for the same pair.
                u.confirmation_code = Some(code.to_string());
                let user = u.clone();
                drop(s);
                self.persist();
                return Ok(user);
            }
            if s.users.values().any(|u| u.email == email) {
                return Err(RepoError::Conflict("email"));
            }
            let user = User {
                username: username.to_string(),
                email: email.to_string(),
                first_name: None,
                last_name: None,
                bio: None,
                role: crate::auth::Role::User,
                superuser: false,
                confirmation_code: Some(code.to_string()),
            };
            s.users.insert(username.to_string(), user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use crate::auth::Role;
    use sqlx::{Pool, Postgres};
    use std::collections::HashMap;

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    fn conflict_field(constraint: Option<&str>) -> &'static str {
        match constraint {
            Some("users_pkey") => "username",
            Some("users_email_key") => "email",
            Some("reviews_author_title_key") => "review",
            Some("categories_pkey") | Some("genres_pkey") => "slug",
            Some("categories_name_key") | Some("genres_name_key") => "name",
            _ => "resource",
        }
    }

    fn map_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                RepoError::Conflict(conflict_field(db.constraint()))
            }
            other => RepoError::Internal(other.to_string()),
        }
    }

    #[derive(sqlx::FromRow)]
    struct UserRow {
        username: String,
        email: String,
        first_name: Option<String>,
        last_name: Option<String>,
        bio: Option<String>,
        role: String,
        superuser: bool,
        confirmation_code: Option<String>,
    }

    impl UserRow {
        fn into_user(self) -> RepoResult<User> {
            let role: Role = self
                .role
                .parse()
                .map_err(|_| RepoError::Internal(format!("bad role value '{}'", self.role)))?;
            Ok(User {
                username: self.username,
                email: self.email,
                first_name: self.first_name,
                last_name: self.last_name,
                bio: self.bio,
                role,
                superuser: self.superuser,
                confirmation_code: self.confirmation_code,
            })
        }
    }

    const USER_COLS: &str =
        "username, email, first_name, last_name, bio, role, superuser, confirmation_code";

    #[derive(sqlx::FromRow)]
    struct TitleRow {
        id: Id,
        name: String,
        year: i32,
        description: String,
        category: Option<String>,
        category_name: Option<String>,
        rating: Option<f64>,
    }

    impl PgRepo {
        /// Attach nested genres to a batch of title rows with one query.
        async fn genres_for(&self, ids: &[Id]) -> RepoResult<HashMap<Id, Vec<Genre>>> {
            #[derive(sqlx::FromRow)]
            struct GenreRow {
                title_id: Id,
                name: String,
                slug: String,
            }
            let rows = sqlx::query_as::<_, GenreRow>(
                r#"
                SELECT gt.title_id, g.name, g.slug
                FROM genre_title gt
                JOIN genres g ON g.slug = gt.genre
                WHERE gt.title_id = ANY($1)
                ORDER BY gt.title_id, g.slug
                "#,
            )
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            let mut out: HashMap<Id, Vec<Genre>> = HashMap::new();
            for r in rows {
                out.entry(r.title_id)
                    .or_default()
                    .push(Genre { name: r.name, slug: r.slug });
            }
            Ok(out)
        }

        fn detail(row: TitleRow, genre: Vec<Genre>) -> TitleDetail {
            let category = match (row.category, row.category_name) {
                (Some(slug), Some(name)) => Some(Category { name, slug }),
                _ => None,
            };
            TitleDetail {
                id: row.id,
                name: row.name,
                year: row.year,
                description: row.description,
                rating: row.rating,
                category,
                genre,
            }
        }

        async fn title_detail(&self, id: Id) -> RepoResult<TitleDetail> {
            let row = sqlx::query_as::<_, TitleRow>(
                r#"
                SELECT t.id, t.name, t.year, t.description, t.category,
                       c.name AS category_name, agg.rating
                FROM titles t
                LEFT JOIN categories c ON c.slug = t.category
                LEFT JOIN (
                    SELECT title_id, AVG(score)::float8 AS rating
                    FROM reviews GROUP BY title_id
                ) agg ON agg.title_id = t.id
                WHERE t.id = $1
                "#,
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            let mut genres = self.genres_for(&[id]).await?;
            Ok(Self::detail(row, genres.remove(&id).unwrap_or_default()))
        }

        async fn resolve_review(&self, title_id: Id, review_id: Id) -> RepoResult<Review> {
            sqlx::query_as::<_, Review>(
                "SELECT id, author, title_id, text, score, pub_date FROM reviews \
                 WHERE id = $1 AND title_id = $2",
            )
            .bind(review_id)
            .bind(title_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn title_exists(&self, id: Id) -> RepoResult<()> {
            let found: Option<(Id,)> = sqlx::query_as("SELECT id FROM titles WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?;
            found.map(|_| ()).ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl CategoryRepo for PgRepo {
        async fn list_categories(
            &self,
            search: Option<&str>,
            page: Page,
        ) -> RepoResult<(Vec<Category>, usize)> {
            let rows = sqlx::query_as::<_, Category>(
                "SELECT name, slug FROM categories \
                 WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%') \
                 ORDER BY slug LIMIT $2 OFFSET $3",
            )
            .bind(search)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM categories \
                 WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%')",
            )
            .bind(search)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            Ok((rows, count as usize))
        }

        async fn create_category(&self, new: Category) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>(
                "INSERT INTO categories (name, slug) VALUES ($1, $2) RETURNING name, slug",
            )
            .bind(&new.name)
            .bind(&new.slug)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn delete_category(&self, slug: &str) -> RepoResult<()> {
            // titles.category is ON DELETE SET NULL; titles survive.
            let res = sqlx::query("DELETE FROM categories WHERE slug = $1")
                .bind(slug)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl GenreRepo for PgRepo {
        async fn list_genres(
            &self,
            search: Option<&str>,
            page: Page,
        ) -> RepoResult<(Vec<Genre>, usize)> {
            let rows = sqlx::query_as::<_, Genre>(
                "SELECT name, slug FROM genres \
                 WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%') \
                 ORDER BY slug LIMIT $2 OFFSET $3",
            )
            .bind(search)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM genres \
                 WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%')",
            )
            .bind(search)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            Ok((rows, count as usize))
        }

        async fn create_genre(&self, new: Genre) -> RepoResult<Genre> {
            sqlx::query_as::<_, Genre>(
                "INSERT INTO genres (name, slug) VALUES ($1, $2) RETURNING name, slug",
            )
            .bind(&new.name)
            .bind(&new.slug)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn delete_genre(&self, slug: &str) -> RepoResult<()> {
            // genre_title rows cascade; titles survive.
            let res = sqlx::query("DELETE FROM genres WHERE slug = $1")
                .bind(slug)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TitleRepo for PgRepo {
        async fn list_titles(
            &self,
            filter: &TitleFilter,
            page: Page,
        ) -> RepoResult<(Vec<TitleDetail>, usize)> {
            const FILTER: &str = r#"
                ($1::text IS NULL OR t.category = $1)
                AND ($2::text IS NULL OR EXISTS (
                    SELECT 1 FROM genre_title gt WHERE gt.title_id = t.id AND gt.genre = $2))
                AND ($3::text IS NULL OR t.name ILIKE '%' || $3 || '%')
                AND ($4::int IS NULL OR t.year = $4)
            "#;
            // One aggregate join covers the whole page; never a rating query
            // per row.
            let sql = format!(
                r#"
                SELECT t.id, t.name, t.year, t.description, t.category,
                       c.name AS category_name, agg.rating
                FROM titles t
                LEFT JOIN categories c ON c.slug = t.category
                LEFT JOIN (
                    SELECT title_id, AVG(score)::float8 AS rating
                    FROM reviews GROUP BY title_id
                ) agg ON agg.title_id = t.id
                WHERE {FILTER}
                ORDER BY t.id LIMIT $5 OFFSET $6
                "#
            );
            let rows = sqlx::query_as::<_, TitleRow>(&sql)
                .bind(&filter.category)
                .bind(&filter.genre)
                .bind(&filter.name)
                .bind(filter.year)
                .bind(page.limit)
                .bind(page.offset)
                .fetch_all(&self.pool)
                .await
                .map_err(map_err)?;
            let count_sql = format!("SELECT COUNT(*) FROM titles t WHERE {FILTER}");
            let (count,): (i64,) = sqlx::query_as(&count_sql)
                .bind(&filter.category)
                .bind(&filter.genre)
                .bind(&filter.name)
                .bind(filter.year)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            let ids: Vec<Id> = rows.iter().map(|r| r.id).collect();
            let mut genres = self.genres_for(&ids).await?;
            let details = rows
                .into_iter()
                .map(|r| {
                    let g = genres.remove(&r.id).unwrap_or_default();
                    Self::detail(r, g)
                })
                .collect();
            Ok((details, count as usize))
        }

        async fn get_title(&self, id: Id) -> RepoResult<TitleDetail> {
            self.title_detail(id).await
        }

        async fn create_title(&self, new: NewTitle) -> RepoResult<TitleDetail> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            if let Some(ref cat) = new.category {
                let found: Option<(String,)> =
                    sqlx::query_as("SELECT slug FROM categories WHERE slug = $1")
                        .bind(cat)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(map_err)?;
                if found.is_none() {
                    return Err(RepoError::UnknownReference("category"));
                }
            }
            let (id,): (Id,) = sqlx::query_as(
                "INSERT INTO titles (name, year, description, category) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(&new.name)
            .bind(new.year)
            .bind(&new.description)
            .bind(&new.category)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_err)?;
            for slug in new.genre {
                let inserted = sqlx::query(
                    "INSERT INTO genre_title (genre, title_id) \
                     SELECT slug, $2 FROM genres WHERE slug = $1 \
                     ON CONFLICT DO NOTHING",
                )
                .bind(&slug)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
                if inserted.rows_affected() == 0 {
                    // Either the slug is unknown or a duplicate entry; only
                    // the former is an error.
                    let found: Option<(String,)> =
                        sqlx::query_as("SELECT slug FROM genres WHERE slug = $1")
                            .bind(&slug)
                            .fetch_optional(&mut *tx)
                            .await
                            .map_err(map_err)?;
                    if found.is_none() {
                        return Err(RepoError::UnknownReference("genre"));
                    }
                }
            }
            tx.commit().await.map_err(map_err)?;
            self.title_detail(id).await
        }

        async fn update_title(&self, id: Id, upd: UpdateTitle) -> RepoResult<TitleDetail> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            if let Some(ref cat) = upd.category {
                let found: Option<(String,)> =
                    sqlx::query_as("SELECT slug FROM categories WHERE slug = $1")
                        .bind(cat)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(map_err)?;
                if found.is_none() {
                    return Err(RepoError::UnknownReference("category"));
                }
            }
            let res = sqlx::query(
                "UPDATE titles SET name = COALESCE($2, name), year = COALESCE($3, year), \
                 description = COALESCE($4, description), category = COALESCE($5, category) \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(&upd.name)
            .bind(upd.year)
            .bind(&upd.description)
            .bind(&upd.category)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            if let Some(genres) = upd.genre {
                sqlx::query("DELETE FROM genre_title WHERE title_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_err)?;
                for slug in genres {
                    let inserted = sqlx::query(
                        "INSERT INTO genre_title (genre, title_id) \
                         SELECT slug, $2 FROM genres WHERE slug = $1 \
                         ON CONFLICT DO NOTHING",
                    )
                    .bind(&slug)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_err)?;
                    if inserted.rows_affected() == 0 {
                        let found: Option<(String,)> =
                            sqlx::query_as("SELECT slug FROM genres WHERE slug = $1")
                                .bind(&slug)
                                .fetch_optional(&mut *tx)
                                .await
                                .map_err(map_err)?;
                        if found.is_none() {
                            return Err(RepoError::UnknownReference("genre"));
                        }
                    }
                }
            }
            tx.commit().await.map_err(map_err)?;
            self.title_detail(id).await
        }

        async fn delete_title(&self, id: Id) -> RepoResult<()> {
            // reviews and their comments cascade.
            let res = sqlx::query("DELETE FROM titles WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ReviewRepo for PgRepo {
        async fn list_reviews(
            &self,
            title_id: Id,
            page: Page,
        ) -> RepoResult<(Vec<Review>, usize)> {
            self.title_exists(title_id).await?;
            let rows = sqlx::query_as::<_, Review>(
                "SELECT id, author, title_id, text, score, pub_date FROM reviews \
                 WHERE title_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
            )
            .bind(title_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM reviews WHERE title_id = $1")
                    .bind(title_id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_err)?;
            Ok((rows, count as usize))
        }

        async fn find_review(&self, title_id: Id, author: &str) -> RepoResult<Option<Review>> {
            self.title_exists(title_id).await?;
            sqlx::query_as::<_, Review>(
                "SELECT id, author, title_id, text, score, pub_date FROM reviews \
                 WHERE title_id = $1 AND author = $2",
            )
            .bind(title_id)
            .bind(author)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn get_review(&self, title_id: Id, review_id: Id) -> RepoResult<Review> {
            self.resolve_review(title_id, review_id).await
        }

        async fn create_review(
            &self,
            title_id: Id,
            author: &str,
            new: NewReview,
        ) -> RepoResult<Review> {
            self.title_exists(title_id).await?;
            // The reviews_author_title_key constraint is the backstop for
            // two racing creates; its violation maps to Conflict("review").
            sqlx::query_as::<_, Review>(
                "INSERT INTO reviews (author, title_id, text, score) \
                 VALUES ($1, $2, $3, $4) \
                 RETURNING id, author, title_id, text, score, pub_date",
            )
            .bind(author)
            .bind(title_id)
            .bind(&new.text)
            .bind(new.score)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn update_review(
            &self,
            title_id: Id,
            review_id: Id,
            upd: UpdateReview,
        ) -> RepoResult<Review> {
            // author, title and pub_date are immutable.
            sqlx::query_as::<_, Review>(
                "UPDATE reviews SET text = COALESCE($3, text), score = COALESCE($4, score) \
                 WHERE id = $1 AND title_id = $2 \
                 RETURNING id, author, title_id, text, score, pub_date",
            )
            .bind(review_id)
            .bind(title_id)
            .bind(&upd.text)
            .bind(upd.score)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn delete_review(&self, title_id: Id, review_id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM reviews WHERE id = $1 AND title_id = $2")
                .bind(review_id)
                .bind(title_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(
            &self,
            title_id: Id,
            review_id: Id,
            page: Page,
        ) -> RepoResult<(Vec<Comment>, usize)> {
            self.resolve_review(title_id, review_id).await?;
            let rows = sqlx::query_as::<_, Comment>(
                "SELECT id, author, review_id, text, pub_date FROM comments \
                 WHERE review_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
            )
            .bind(review_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM comments WHERE review_id = $1")
                    .bind(review_id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_err)?;
            Ok((rows, count as usize))
        }

        async fn get_comment(
            &self,
            title_id: Id,
            review_id: Id,
            comment_id: Id,
        ) -> RepoResult<Comment> {
            self.resolve_review(title_id, review_id).await?;
            sqlx::query_as::<_, Comment>(
                "SELECT id, author, review_id, text, pub_date FROM comments \
                 WHERE id = $1 AND review_id = $2",
            )
            .bind(comment_id)
            .bind(review_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn create_comment(
            &self,
            title_id: Id,
            review_id: Id,
            author: &str,
            new: NewComment,
        ) -> RepoResult<Comment> {
            self.resolve_review(title_id, review_id).await?;
            sqlx::query_as::<_, Comment>(
                "INSERT INTO comments (author, review_id, text) VALUES ($1, $2, $3) \
                 RETURNING id, author, review_id, text, pub_date",
            )
            .bind(author)
            .bind(review_id)
            .bind(&new.text)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn update_comment(
            &self,
            title_id: Id,
            review_id: Id,
            comment_id: Id,
            upd: UpdateComment,
        ) -> RepoResult<Comment> {
            self.resolve_review(title_id, review_id).await?;
            sqlx::query_as::<_, Comment>(
                "UPDATE comments SET text = COALESCE($3, text) \
                 WHERE id = $1 AND review_id = $2 \
                 RETURNING id, author, review_id, text, pub_date",
            )
            .bind(comment_id)
            .bind(review_id)
            .bind(&upd.text)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn delete_comment(
            &self,
            title_id: Id,
            review_id: Id,
            comment_id: Id,
        ) -> RepoResult<()> {
            self.resolve_review(title_id, review_id).await?;
            let res = sqlx::query("DELETE FROM comments WHERE id = $1 AND review_id = $2")
                .bind(comment_id)
                .bind(review_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn list_users(
            &self,
            search: Option<&str>,
            page: Page,
        ) -> RepoResult<(Vec<User>, usize)> {
            let sql = format!(
                "SELECT {USER_COLS} FROM users \
                 WHERE ($1::text IS NULL OR username ILIKE '%' || $1 || '%') \
                 ORDER BY username LIMIT $2 OFFSET $3"
            );
            let rows = sqlx::query_as::<_, UserRow>(&sql)
                .bind(search)
                .bind(page.limit)
                .bind(page.offset)
                .fetch_all(&self.pool)
                .await
                .map_err(map_err)?;
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM users \
                 WHERE ($1::text IS NULL OR username ILIKE '%' || $1 || '%')",
            )
            .bind(search)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            let users = rows
                .into_iter()
                .map(UserRow::into_user)
                .collect::<RepoResult<Vec<_>>>()?;
            Ok((users, count as usize))
        }

        async fn get_user(&self, username: &str) -> RepoResult<User> {
            let sql = format!("SELECT {USER_COLS} FROM users WHERE username = $1");
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(username)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?
                .into_user()
        }

        async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
            let sql = format!("SELECT {USER_COLS} FROM users WHERE email = $1");
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err)?
                .map(UserRow::into_user)
                .transpose()
        }

        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let sql = format!(
                "INSERT INTO users (username, email, first_name, last_name, bio, role) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLS}"
            );
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(&new.username)
                .bind(&new.email)
                .bind(&new.first_name)
                .bind(&new.last_name)
                .bind(&new.bio)
                .bind(new.role.unwrap_or_default().to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?
                .into_user()
        }

        async fn update_user(&self, username: &str, upd: UpdateUser) -> RepoResult<User> {
            let sql = format!(
                "UPDATE users SET email = COALESCE($2, email), \
                 first_name = COALESCE($3, first_name), \
                 last_name = COALESCE($4, last_name), \
                 bio = COALESCE($5, bio), \
                 role = COALESCE($6, role) \
                 WHERE username = $1 RETURNING {USER_COLS}"
            );
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(username)
                .bind(&upd.email)
                .bind(&upd.first_name)
                .bind(&upd.last_name)
                .bind(&upd.bio)
                .bind(upd.role.map(|r| r.to_string()))
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?
                .into_user()
        }

        async fn delete_user(&self, username: &str) -> RepoResult<()> {
            // reviews and comments cascade.
            let res = sqlx::query("DELETE FROM users WHERE username = $1")
                .bind(username)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn signup_user(&self, username: &str, email: &str, code: &str) -> RepoResult<User> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            let sql = format!("SELECT {USER_COLS} FROM users WHERE username = $1");
            let existing = sqlx::query_as::<_, UserRow>(&sql)
                .bind(username)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_err)?;
            let user = match existing {
                Some(row) => {
                    if row.email != email {
                        return Err(RepoError::Conflict("username"));
                    }
                    // Idempotent re-signup: rotate the code for the same pair.
                    let sql = format!(
                        "UPDATE users SET confirmation_code = $2 \
                         WHERE username = $1 RETURNING {USER_COLS}"
                    );
                    sqlx::query_as::<_, UserRow>(&sql)
                        .bind(username)
                        .bind(code)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(map_err)?
                }
                None => {
                    let taken: Option<(String,)> =
                        sqlx::query_as("SELECT username FROM users WHERE email = $1")
                            .bind(email)
                            .fetch_optional(&mut *tx)
                            .await
                            .map_err(map_err)?;
                    if taken.is_some() {
                        return Err(RepoError::Conflict("email"));
                    }
                    let sql = format!(
                        "INSERT INTO users (username, email, role, confirmation_code) \
                         VALUES ($1, $2, 'user', $3) RETURNING {USER_COLS}"
                    );
                    sqlx::query_as::<_, UserRow>(&sql)
                        .bind(username)
                        .bind(email)
                        .bind(code)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(map_err)?
                }
            };
            tx.commit().await.map_err(map_err)?;
            user.into_user()
        }
    }
}
