use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::access::{self, Actor, ResourceKind, Verb};
use crate::auth::{create_jwt, is_bootstrap_admin, new_confirmation_code, Auth};
use crate::error::ApiError;
use crate::mail::Mailer;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::{Repo, RepoError};
use crate::validate;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/auth/signup").route(web::post().to(signup)))
            .service(web::resource("/auth/token").route(web::post().to(create_token)))
            .service(
                web::resource("/categories")
                    .route(web::get().to(list_categories))
                    .route(web::post().to(create_category)),
            )
            .service(
                web::resource("/categories/{slug}").route(web::delete().to(delete_category)),
            )
            .service(
                web::resource("/genres")
                    .route(web::get().to(list_genres))
                    .route(web::post().to(create_genre)),
            )
            .service(web::resource("/genres/{slug}").route(web::delete().to(delete_genre)))
            .service(
                web::resource("/titles")
                    .route(web::get().to(list_titles))
                    .route(web::post().to(create_title)),
            )
            .service(
                web::resource("/titles/{id}")
                    .route(web::get().to(get_title))
                    .route(web::patch().to(update_title))
                    .route(web::delete().to(delete_title)),
            )
            .service(
                web::resource("/titles/{title_id}/reviews")
                    .route(web::get().to(list_reviews))
                    .route(web::post().to(create_review)),
            )
            .service(
                web::resource("/titles/{title_id}/reviews/{review_id}")
                    .route(web::get().to(get_review))
                    .route(web::patch().to(update_review))
                    .route(web::delete().to(delete_review)),
            )
            .service(
                web::resource("/titles/{title_id}/reviews/{review_id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(
                web::resource("/titles/{title_id}/reviews/{review_id}/comments/{comment_id}")
                    .route(web::get().to(get_comment))
                    .route(web::patch().to(update_comment))
                    .route(web::delete().to(delete_comment)),
            )
            // registered before /users/{username} so the literal segment wins
            .service(
                web::resource("/users/me")
                    .route(web::get().to(me))
                    .route(web::patch().to(update_me)),
            )
            .service(
                web::resource("/users")
                    .route(web::get().to(list_users))
                    .route(web::post().to(create_user)),
            )
            .service(
                web::resource("/users/{username}")
                    .route(web::get().to(get_user))
                    .route(web::patch().to(update_user))
                    .route(web::delete().to(delete_user)),
            ),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub mailer: Arc<dyn Mailer>,
    pub rate_limiter: Option<RateLimiterFacade>,
}

fn check(actor: &Actor, verb: Verb, kind: ResourceKind, owner: Option<&str>) -> Result<(), ApiError> {
    access::decide(actor, verb, kind, owner)
        .require()
        .map_err(ApiError::from)
}

fn client_ip(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}

/// Common collection query: page-number pagination plus name/username
/// substring search.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
}

impl ListParams {
    fn page(&self) -> Page {
        Page::from_params(self.page, self.page_size)
    }
}

#[derive(Debug, Deserialize)]
pub struct TitleListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub category: Option<String>,
    pub genre: Option<String>,
    pub name: Option<String>,
    pub year: Option<i32>,
}

// ---------------- auth flow ----------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SignupResponse {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct TokenRequest {
    pub username: Option<String>,
    pub confirmation_code: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TokenResponse {
    pub token: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Identity accepted, confirmation code sent", body = SignupResponse),
        (status = 400, description = "Reserved or already-registered username/email"),
        (status = 429, description = "Too many signup attempts")
    )
)]
pub async fn signup(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<SignupRequest>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_signup(&client_ip(&req)) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let SignupRequest { username, email } = payload.into_inner();
    validate::validate_username(&username)?;
    validate::validate_email(&email)?;

    // Pre-check collisions so the error names the field; the storage
    // constraints stay authoritative under races.
    match data.repo.get_user(&username).await {
        Ok(existing) => {
            if existing.email != email {
                return Err(ApiError::field("username", "username already registered"));
            }
        }
        Err(RepoError::NotFound) => {
            if data.repo.find_user_by_email(&email).await?.is_some() {
                return Err(ApiError::field("email", "email already registered"));
            }
        }
        Err(e) => return Err(e.into()),
    }

    let code = new_confirmation_code();
    let user = data.repo.signup_user(&username, &email, &code).await?;
    if let Err(e) = data
        .mailer
        .send_confirmation(&user.email, &user.username, &code)
        .await
    {
        log::warn!("confirmation mail to {} failed: {e}", user.email);
    }
    metrics::increment_counter!("revu_signups_total");
    Ok(HttpResponse::Ok().json(SignupResponse {
        username: user.username,
        email: user.email,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Access token", body = TokenResponse),
        (status = 400, description = "Missing field or invalid confirmation code"),
        (status = 404, description = "Unknown username")
    )
)]
pub async fn create_token(
    data: web::Data<AppState>,
    payload: web::Json<TokenRequest>,
) -> Result<HttpResponse, ApiError> {
    let TokenRequest {
        username,
        confirmation_code,
    } = payload.into_inner();
    let username = username
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::field("username", "this field is required"))?;
    let code = confirmation_code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::field("confirmation_code", "this field is required"))?;

    let user = data.repo.get_user(&username).await?;
    // Exact match against the single stored code; a failed attempt does not
    // rotate or clear it, so the user may retry.
    if user.confirmation_code.as_deref() != Some(code.as_str()) {
        return Err(ApiError::validation("invalid confirmation code"));
    }
    let superuser = user.superuser || is_bootstrap_admin(&user.username);
    let token = create_jwt(&user.username, user.role, superuser).map_err(|_| ApiError::Internal)?;
    metrics::increment_counter!("revu_tokens_issued_total");
    Ok(HttpResponse::Ok().json(TokenResponse { token }))
}

// ---------------- catalog: categories and genres -------------------------

#[utoipa::path(
    get,
    path = "/api/v1/categories",
    params(
        ("page" = Option<u32>, Query, description = "1-based page number"),
        ("page_size" = Option<u32>, Query, description = "Page size, capped at 100"),
        ("search" = Option<String>, Query, description = "Name substring filter")
    ),
    responses((status = 200, description = "Paged categories"))
)]
pub async fn list_categories(
    data: web::Data<AppState>,
    query: web::Query<ListParams>,
) -> Result<HttpResponse, ApiError> {
    let (items, count) = data
        .repo
        .list_categories(query.search.as_deref(), query.page())
        .await?;
    Ok(HttpResponse::Ok().json(Paged::new(count, items)))
}

#[utoipa::path(
    post,
    path = "/api/v1/categories",
    request_body = Category,
    responses(
        (status = 201, description = "Category created", body = Category),
        (status = 400, description = "Bad slug/name or duplicate"),
        (status = 403, description = "Admins only")
    )
)]
pub async fn create_category(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<Category>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Create, ResourceKind::Category, None)?;
    validate::validate_name(&payload.name)?;
    validate::validate_slug(&payload.slug)?;
    let category = data.repo.create_category(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(category))
}

pub async fn delete_category(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Delete, ResourceKind::Category, None)?;
    data.repo.delete_category(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/genres",
    params(
        ("page" = Option<u32>, Query, description = "1-based page number"),
        ("page_size" = Option<u32>, Query, description = "Page size, capped at 100"),
        ("search" = Option<String>, Query, description = "Name substring filter")
    ),
    responses((status = 200, description = "Paged genres"))
)]
pub async fn list_genres(
    data: web::Data<AppState>,
    query: web::Query<ListParams>,
) -> Result<HttpResponse, ApiError> {
    let (items, count) = data
        .repo
        .list_genres(query.search.as_deref(), query.page())
        .await?;
    Ok(HttpResponse::Ok().json(Paged::new(count, items)))
}

#[utoipa::path(
    post,
    path = "/api/v1/genres",
    request_body = Genre,
    responses(
        (status = 201, description = "Genre created", body = Genre),
        (status = 400, description = "Bad slug/name or duplicate"),
        (status = 403, description = "Admins only")
    )
)]
pub async fn create_genre(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<Genre>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Create, ResourceKind::Genre, None)?;
    validate::validate_name(&payload.name)?;
    validate::validate_slug(&payload.slug)?;
    let genre = data.repo.create_genre(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(genre))
}

pub async fn delete_genre(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Delete, ResourceKind::Genre, None)?;
    data.repo.delete_genre(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- catalog: titles -----------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/titles",
    params(
        ("page" = Option<u32>, Query, description = "1-based page number"),
        ("page_size" = Option<u32>, Query, description = "Page size, capped at 100"),
        ("category" = Option<String>, Query, description = "Category slug"),
        ("genre" = Option<String>, Query, description = "Genre slug"),
        ("name" = Option<String>, Query, description = "Name substring"),
        ("year" = Option<i32>, Query, description = "Exact year")
    ),
    responses((status = 200, description = "Paged titles with computed rating"))
)]
pub async fn list_titles(
    data: web::Data<AppState>,
    query: web::Query<TitleListParams>,
) -> Result<HttpResponse, ApiError> {
    let q = query.into_inner();
    let page = Page::from_params(q.page, q.page_size);
    let filter = TitleFilter {
        category: q.category,
        genre: q.genre,
        name: q.name,
        year: q.year,
    };
    let (items, count) = data.repo.list_titles(&filter, page).await?;
    Ok(HttpResponse::Ok().json(Paged::new(count, items)))
}

#[utoipa::path(
    post,
    path = "/api/v1/titles",
    request_body = NewTitle,
    responses(
        (status = 201, description = "Title created", body = TitleDetail),
        (status = 400, description = "Bad year or unknown category/genre slug"),
        (status = 403, description = "Admins only")
    )
)]
pub async fn create_title(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewTitle>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Create, ResourceKind::Title, None)?;
    validate::validate_name(&payload.name)?;
    validate::validate_year(payload.year)?;
    let title = data.repo.create_title(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(title))
}

#[utoipa::path(
    get,
    path = "/api/v1/titles/{id}",
    params(("id" = Id, Path, description = "Title id")),
    responses(
        (status = 200, description = "Title with computed rating", body = TitleDetail),
        (status = 404, description = "Title not found")
    )
)]
pub async fn get_title(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let title = data.repo.get_title(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(title))
}

pub async fn update_title(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateTitle>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Update, ResourceKind::Title, None)?;
    if let Some(year) = payload.year {
        validate::validate_year(year)?;
    }
    if let Some(ref name) = payload.name {
        validate::validate_name(name)?;
    }
    let title = data
        .repo
        .update_title(path.into_inner(), payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(title))
}

pub async fn delete_title(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Delete, ResourceKind::Title, None)?;
    data.repo.delete_title(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- feedback: reviews ---------------------------------------

fn duplicate_review() -> ApiError {
    ApiError::validation("you have already reviewed this title")
}

#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews",
    params(("title_id" = Id, Path, description = "Title id")),
    responses(
        (status = 200, description = "Paged reviews"),
        (status = 404, description = "Title not found")
    )
)]
pub async fn list_reviews(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<ListParams>,
) -> Result<HttpResponse, ApiError> {
    let (items, count) = data
        .repo
        .list_reviews(path.into_inner(), query.page())
        .await?;
    Ok(HttpResponse::Ok().json(Paged::new(count, items)))
}

#[utoipa::path(
    post,
    path = "/api/v1/titles/{title_id}/reviews",
    request_body = NewReview,
    params(("title_id" = Id, Path, description = "Title id")),
    responses(
        (status = 201, description = "Review created", body = Review),
        (status = 400, description = "Bad score or duplicate review"),
        (status = 401, description = "Authentication required"),
        (status = 404, description = "Title not found")
    )
)]
pub async fn create_review(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewReview>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_review(&client_ip(&req)) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Create, ResourceKind::Review, None)?;
    validate::validate_score(payload.score)?;

    // Author and title come from the token and the path, never the body.
    let title_id = path.into_inner();
    let author = auth.0.sub.as_str();
    if data.repo.find_review(title_id, author).await?.is_some() {
        return Err(duplicate_review());
    }
    let review = data
        .repo
        .create_review(title_id, author, payload.into_inner())
        .await
        .map_err(|e| match e {
            // Race past the pre-check; the unique constraint reports the
            // same outcome.
            RepoError::Conflict(_) => duplicate_review(),
            other => other.into(),
        })?;
    metrics::increment_counter!("revu_reviews_created_total");
    Ok(HttpResponse::Created().json(review))
}

#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = Id, Path, description = "Title id"),
        ("review_id" = Id, Path, description = "Review id")
    ),
    responses(
        (status = 200, description = "Review", body = Review),
        (status = 404, description = "No such review under this title")
    )
)]
pub async fn get_review(
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (title_id, review_id) = path.into_inner();
    let review = data.repo.get_review(title_id, review_id).await?;
    Ok(HttpResponse::Ok().json(review))
}

pub async fn update_review(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
    payload: web::Json<UpdateReview>,
) -> Result<HttpResponse, ApiError> {
    let (title_id, review_id) = path.into_inner();
    let actor = Actor::from_claims(&auth.0);
    let review = data.repo.get_review(title_id, review_id).await?;
    check(&actor, Verb::Update, ResourceKind::Review, Some(review.author.as_str()))?;
    if let Some(score) = payload.score {
        validate::validate_score(score)?;
    }
    let review = data
        .repo
        .update_review(title_id, review_id, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(review))
}

pub async fn delete_review(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (title_id, review_id) = path.into_inner();
    let actor = Actor::from_claims(&auth.0);
    let review = data.repo.get_review(title_id, review_id).await?;
    check(&actor, Verb::Delete, ResourceKind::Review, Some(review.author.as_str()))?;
    data.repo.delete_review(title_id, review_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- feedback: comments --------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments",
    params(
        ("title_id" = Id, Path, description = "Title id"),
        ("review_id" = Id, Path, description = "Review id")
    ),
    responses(
        (status = 200, description = "Paged comments"),
        (status = 404, description = "No such review under this title")
    )
)]
pub async fn list_comments(
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
    query: web::Query<ListParams>,
) -> Result<HttpResponse, ApiError> {
    let (title_id, review_id) = path.into_inner();
    let (items, count) = data
        .repo
        .list_comments(title_id, review_id, query.page())
        .await?;
    Ok(HttpResponse::Ok().json(Paged::new(count, items)))
}

#[utoipa::path(
    post,
    path = "/api/v1/titles/{title_id}/reviews/{review_id}/comments",
    request_body = NewComment,
    params(
        ("title_id" = Id, Path, description = "Title id"),
        ("review_id" = Id, Path, description = "Review id")
    ),
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 401, description = "Authentication required"),
        (status = 404, description = "No such review under this title")
    )
)]
pub async fn create_comment(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_comment(&client_ip(&req)) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let (title_id, review_id) = path.into_inner();
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Create, ResourceKind::Comment, None)?;
    let comment = data
        .repo
        .create_comment(title_id, review_id, &auth.0.sub, payload.into_inner())
        .await?;
    metrics::increment_counter!("revu_comments_created_total");
    Ok(HttpResponse::Created().json(comment))
}

pub async fn get_comment(
    data: web::Data<AppState>,
    path: web::Path<(Id, Id, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (title_id, review_id, comment_id) = path.into_inner();
    let comment = data.repo.get_comment(title_id, review_id, comment_id).await?;
    Ok(HttpResponse::Ok().json(comment))
}

pub async fn update_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id, Id)>,
    payload: web::Json<UpdateComment>,
) -> Result<HttpResponse, ApiError> {
    let (title_id, review_id, comment_id) = path.into_inner();
    let actor = Actor::from_claims(&auth.0);
    let comment = data.repo.get_comment(title_id, review_id, comment_id).await?;
    check(&actor, Verb::Update, ResourceKind::Comment, Some(comment.author.as_str()))?;
    let comment = data
        .repo
        .update_comment(title_id, review_id, comment_id, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(comment))
}

pub async fn delete_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (title_id, review_id, comment_id) = path.into_inner();
    let actor = Actor::from_claims(&auth.0);
    let comment = data.repo.get_comment(title_id, review_id, comment_id).await?;
    check(&actor, Verb::Delete, ResourceKind::Comment, Some(comment.author.as_str()))?;
    data.repo.delete_comment(title_id, review_id, comment_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- users ----------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(
        ("page" = Option<u32>, Query, description = "1-based page number"),
        ("page_size" = Option<u32>, Query, description = "Page size, capped at 100"),
        ("search" = Option<String>, Query, description = "Username substring filter")
    ),
    responses(
        (status = 200, description = "Paged users"),
        (status = 403, description = "Admins only")
    )
)]
pub async fn list_users(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<ListParams>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::List, ResourceKind::User, None)?;
    let (users, count) = data
        .repo
        .list_users(query.search.as_deref(), query.page())
        .await?;
    let profiles: Vec<UserProfile> = users.into_iter().map(UserProfile::from).collect();
    Ok(HttpResponse::Ok().json(Paged::new(count, profiles)))
}

#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = NewUser,
    responses(
        (status = 201, description = "User created", body = UserProfile),
        (status = 400, description = "Bad or duplicate username/email"),
        (status = 403, description = "Admins only")
    )
)]
pub async fn create_user(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewUser>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Create, ResourceKind::User, None)?;
    validate::validate_username(&payload.username)?;
    validate::validate_email(&payload.email)?;
    let user = data.repo.create_user(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(UserProfile::from(user)))
}

pub async fn get_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Read, ResourceKind::User, None)?;
    let user = data.repo.get_user(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}

pub async fn update_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateUser>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Update, ResourceKind::User, None)?;
    if let Some(ref email) = payload.email {
        validate::validate_email(email)?;
    }
    let user = data
        .repo
        .update_user(&path.into_inner(), payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}

pub async fn delete_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    check(&actor, Verb::Delete, ResourceKind::User, None)?;
    data.repo.delete_user(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- self profile --------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses(
        (status = 200, description = "Caller's own profile", body = UserProfile),
        (status = 401, description = "Authentication required")
    )
)]
pub async fn me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(&auth.0.sub).await.map_err(|e| match e {
        // A valid token whose user row is gone is a stale credential.
        RepoError::NotFound => ApiError::Unauthorized,
        other => other.into(),
    })?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/users/me",
    request_body = UpdateUser,
    responses(
        (status = 200, description = "Updated profile; a role change by a non-admin is silently dropped", body = UserProfile),
        (status = 401, description = "Authentication required")
    )
)]
pub async fn update_me(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<UpdateUser>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor::from_claims(&auth.0);
    if let Some(ref email) = payload.email {
        validate::validate_email(email)?;
    }
    let upd = access::project_profile_update(&actor, payload.into_inner());
    let user = data
        .repo
        .update_user(&auth.0.sub, upd)
        .await
        .map_err(|e| match e {
            RepoError::NotFound => ApiError::Unauthorized,
            other => other.into(),
        })?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}
