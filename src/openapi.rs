use crate::models::{
    Category, Comment, Genre, NewComment, NewReview, NewTitle, NewUser, Review, TitleDetail,
    UpdateTitle, UpdateUser, UserProfile,
};
use crate::routes::{SignupRequest, SignupResponse, TokenRequest, TokenResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::signup,
        crate::routes::create_token,
        crate::routes::list_categories,
        crate::routes::create_category,
        crate::routes::list_genres,
        crate::routes::create_genre,
        crate::routes::list_titles,
        crate::routes::create_title,
        crate::routes::get_title,
        crate::routes::list_reviews,
        crate::routes::create_review,
        crate::routes::get_review,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::list_users,
        crate::routes::create_user,
        crate::routes::me,
        crate::routes::update_me,
    ),
    components(schemas(
        Category, Genre, TitleDetail, NewTitle, UpdateTitle,
        Review, NewReview, Comment, NewComment,
        UserProfile, NewUser, UpdateUser,
        SignupRequest, SignupResponse, TokenRequest, TokenResponse,
    )),
    tags(
        (name = "auth", description = "Signup and token issuance"),
        (name = "catalog", description = "Categories, genres and titles"),
        (name = "feedback", description = "Reviews and comments"),
        (name = "users", description = "User administration and self profile"),
    )
)]
pub struct ApiDoc;
