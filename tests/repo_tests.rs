#![cfg(feature = "inmem-store")]

use revu::auth::Role;
use revu::models::{
    Category, Genre, NewComment, NewReview, NewTitle, NewUser, Page, TitleFilter, UpdateTitle,
    UpdateUser,
};
use revu::repo::{inmem::InMemRepo, RepoError};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use revu::repo::{CategoryRepo, CommentRepo, GenreRepo, ReviewRepo, TitleRepo, UserRepo};
use serial_test::serial;

/// Helper that returns a fresh, empty repository for every test run.
fn repo() -> InMemRepo {
    // isolate state: do **not** persist to the default file path
    std::env::set_var("REVU_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

fn cat(name: &str, slug: &str) -> Category {
    Category {
        name: name.into(),
        slug: slug.into(),
    }
}

fn genre(name: &str, slug: &str) -> Genre {
    Genre {
        name: name.into(),
        slug: slug.into(),
    }
}

fn review(text: &str, score: i32) -> NewReview {
    NewReview {
        text: text.into(),
        score,
    }
}

#[tokio::test]
#[serial]
async fn category_crud_and_conflicts() {
    let r = repo();

    assert!(r
        .list_categories(None, Page::default())
        .await
        .unwrap()
        .0
        .is_empty());

    r.create_category(cat("Films", "films")).await.unwrap();

    // duplicate slug and duplicate name both collide
    let err = r.create_category(cat("Movies", "films")).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict("slug")));
    let err = r.create_category(cat("Films", "cinema")).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict("name")));

    // substring search is case-insensitive
    r.create_category(cat("Books", "books")).await.unwrap();
    let (found, count) = r.list_categories(Some("film"), Page::default()).await.unwrap();
    assert_eq!(count, 1);
    assert_eq!(found[0].slug, "films");
}

#[tokio::test]
#[serial]
async fn deleting_category_detaches_titles() {
    let r = repo();
    r.create_category(cat("Films", "films")).await.unwrap();
    let title = r
        .create_title(NewTitle {
            name: "Alien".into(),
            year: 1979,
            description: String::new(),
            category: Some("films".into()),
            genre: vec![],
        })
        .await
        .unwrap();
    assert_eq!(title.category.as_ref().unwrap().slug, "films");

    r.delete_category("films").await.unwrap();

    // the title survives with a null category
    let after = r.get_title(title.id).await.unwrap();
    assert!(after.category.is_none());
}

#[tokio::test]
#[serial]
async fn deleting_genre_removes_join_rows_only() {
    let r = repo();
    r.create_genre(genre("Horror", "horror")).await.unwrap();
    r.create_genre(genre("Sci-Fi", "sci-fi")).await.unwrap();
    let title = r
        .create_title(NewTitle {
            name: "Alien".into(),
            year: 1979,
            description: String::new(),
            category: None,
            genre: vec!["horror".into(), "sci-fi".into()],
        })
        .await
        .unwrap();
    assert_eq!(title.genre.len(), 2);

    r.delete_genre("horror").await.unwrap();

    let after = r.get_title(title.id).await.unwrap();
    let slugs: Vec<_> = after.genre.iter().map(|g| g.slug.as_str()).collect();
    assert_eq!(slugs, vec!["sci-fi"]);
}

#[tokio::test]
#[serial]
async fn title_write_shape_rejects_unknown_slugs() {
    let r = repo();
    let err = r
        .create_title(NewTitle {
            name: "Alien".into(),
            year: 1979,
            description: String::new(),
            category: Some("nope".into()),
            genre: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::UnknownReference("category")));

    let err = r
        .create_title(NewTitle {
            name: "Alien".into(),
            year: 1979,
            description: String::new(),
            category: None,
            genre: vec!["nope".into()],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::UnknownReference("genre")));
}

#[tokio::test]
#[serial]
async fn review_uniqueness_and_live_rating() {
    let r = repo();
    let title = r
        .create_title(NewTitle {
            name: "Dune".into(),
            year: 2021,
            description: String::new(),
            category: None,
            genre: vec![],
        })
        .await
        .unwrap();
    assert_eq!(title.rating, None);

    r.create_review(title.id, "alice", review("good", 6)).await.unwrap();
    r.create_review(title.id, "bob", review("great", 9)).await.unwrap();

    // one review per (author, title)
    let err = r
        .create_review(title.id, "alice", review("again", 5))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict("review")));

    // exact mean, not an integer
    let detail = r.get_title(title.id).await.unwrap();
    assert_eq!(detail.rating, Some(7.5));

    // listing computes ratings for the page as well
    let (listed, _) = r.list_titles(&TitleFilter::default(), Page::default()).await.unwrap();
    assert_eq!(listed[0].rating, Some(7.5));
}

#[tokio::test]
#[serial]
async fn compound_review_resolution_for_comments() {
    let r = repo();
    let t1 = r
        .create_title(NewTitle {
            name: "A".into(),
            year: 2000,
            description: String::new(),
            category: None,
            genre: vec![],
        })
        .await
        .unwrap();
    let t2 = r
        .create_title(NewTitle {
            name: "B".into(),
            year: 2001,
            description: String::new(),
            category: None,
            genre: vec![],
        })
        .await
        .unwrap();
    let rev = r.create_review(t1.id, "alice", review("ok", 5)).await.unwrap();
    let comment = r
        .create_comment(t1.id, rev.id, "bob", NewComment { text: "agreed".into() })
        .await
        .unwrap();

    // the review exists, but not under t2
    let err = r.get_comment(t2.id, rev.id, comment.id).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
    let err = r
        .create_comment(t2.id, rev.id, "bob", NewComment { text: "nope".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
#[serial]
async fn deletions_cascade_to_feedback() {
    let r = repo();
    let title = r
        .create_title(NewTitle {
            name: "C".into(),
            year: 2002,
            description: String::new(),
            category: None,
            genre: vec![],
        })
        .await
        .unwrap();
    let rev = r.create_review(title.id, "alice", review("ok", 5)).await.unwrap();
    let com = r
        .create_comment(title.id, rev.id, "bob", NewComment { text: "hm".into() })
        .await
        .unwrap();

    // review deletion removes its comments
    r.delete_review(title.id, rev.id).await.unwrap();
    assert!(matches!(
        r.get_comment(title.id, rev.id, com.id).await.unwrap_err(),
        RepoError::NotFound
    ));

    // title deletion removes its reviews
    let rev = r.create_review(title.id, "alice", review("ok", 5)).await.unwrap();
    r.delete_title(title.id).await.unwrap();
    assert!(matches!(
        r.get_review(title.id, rev.id).await.unwrap_err(),
        RepoError::NotFound
    ));
}

#[tokio::test]
#[serial]
async fn deleting_a_user_removes_their_feedback() {
    let r = repo();
    r.create_user(NewUser {
        username: "alice".into(),
        email: "alice@example.com".into(),
        first_name: None,
        last_name: None,
        bio: None,
        role: None,
    })
    .await
    .unwrap();
    let title = r
        .create_title(NewTitle {
            name: "D".into(),
            year: 2003,
            description: String::new(),
            category: None,
            genre: vec![],
        })
        .await
        .unwrap();
    let rev = r.create_review(title.id, "alice", review("ok", 5)).await.unwrap();
    let rev2 = r.create_review(title.id, "bob", review("meh", 3)).await.unwrap();
    r.create_comment(title.id, rev2.id, "alice", NewComment { text: "!".into() })
        .await
        .unwrap();

    r.delete_user("alice").await.unwrap();

    assert!(matches!(
        r.get_review(title.id, rev.id).await.unwrap_err(),
        RepoError::NotFound
    ));
    // bob's review survives, alice's comment on it does not
    let (comments, count) = r
        .list_comments(title.id, rev2.id, Page::default())
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert!(comments.is_empty());
    // the rating now reflects bob's review alone
    assert_eq!(r.get_title(title.id).await.unwrap().rating, Some(3.0));
}

#[tokio::test]
#[serial]
async fn signup_is_idempotent_per_identity_and_rotates_the_code() {
    let r = repo();
    let u = r.signup_user("alice", "alice@example.com", "code-1").await.unwrap();
    assert_eq!(u.role, Role::User);
    assert_eq!(u.confirmation_code.as_deref(), Some("code-1"));

    // same pair: rotate
    let u = r.signup_user("alice", "alice@example.com", "code-2").await.unwrap();
    assert_eq!(u.confirmation_code.as_deref(), Some("code-2"));

    // username taken by a different identity
    let err = r
        .signup_user("alice", "other@example.com", "x")
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict("username")));

    // email taken by a different identity
    let err = r
        .signup_user("bob", "alice@example.com", "x")
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict("email")));
}

#[tokio::test]
#[serial]
async fn profile_updates_respect_email_uniqueness() {
    let r = repo();
    r.signup_user("alice", "alice@example.com", "c").await.unwrap();
    r.signup_user("bob", "bob@example.com", "c").await.unwrap();

    let err = r
        .update_user(
            "bob",
            UpdateUser {
                email: Some("alice@example.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict("email")));

    let updated = r
        .update_user(
            "bob",
            UpdateUser {
                bio: Some("hello".into()),
                role: Some(Role::Moderator),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.bio.as_deref(), Some("hello"));
    assert_eq!(updated.role, Role::Moderator);
}

#[tokio::test]
#[serial]
async fn title_update_replaces_genres() {
    let r = repo();
    r.create_genre(genre("Horror", "horror")).await.unwrap();
    r.create_genre(genre("Drama", "drama")).await.unwrap();
    let title = r
        .create_title(NewTitle {
            name: "E".into(),
            year: 2004,
            description: String::new(),
            category: None,
            genre: vec!["horror".into()],
        })
        .await
        .unwrap();

    let updated = r
        .update_title(
            title.id,
            UpdateTitle {
                genre: Some(vec!["drama".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let slugs: Vec<_> = updated.genre.iter().map(|g| g.slug.as_str()).collect();
    assert_eq!(slugs, vec!["drama"]);
}
