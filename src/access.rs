//! Access control engine: pure decision functions mapping (actor, verb,
//! resource kind, ownership) to allow/deny, decoupled from HTTP method names.

use crate::auth::{Claims, Role};
use crate::models::UpdateUser;

/// Closed verb set; transport-specific method names map onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Read,
    List,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Category,
    Genre,
    Title,
    Review,
    Comment,
    User,
}

/// Policy classes: catalog data is admin-writable and world-readable,
/// feedback is author-writable (or moderator/admin), accounts are admin-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Catalog,
    Feedback,
    Account,
}

impl ResourceKind {
    fn class(self) -> Class {
        match self {
            ResourceKind::Category | ResourceKind::Genre | ResourceKind::Title => Class::Catalog,
            ResourceKind::Review | ResourceKind::Comment => Class::Feedback,
            ResourceKind::User => Class::Account,
        }
    }
}

/// The acting identity as reconstructed from the request, if any.
#[derive(Debug, Clone)]
pub enum Actor {
    Anonymous,
    Known {
        username: String,
        role: Role,
        superuser: bool,
    },
}

impl Actor {
    pub fn from_claims(claims: &Claims) -> Self {
        Actor::Known {
            username: claims.sub.clone(),
            role: claims.role,
            superuser: claims.superuser,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Actor::Anonymous => None,
            Actor::Known { username, .. } => Some(username),
        }
    }

    /// Admin role or the orthogonal superuser flag; either grants full access.
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Actor::Known { role: Role::Admin, .. } | Actor::Known { superuser: true, .. }
        )
    }

    pub fn is_moderator(&self) -> bool {
        matches!(self, Actor::Known { role: Role::Moderator, .. })
    }

    fn is(&self, other: &str) -> bool {
        self.username() == Some(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

/// Which rule failed; drives the 401/403 split and the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    AdminOnly,
    OwnerOnly,
}

impl Decision {
    pub fn require(self) -> Result<(), DenyReason> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason),
        }
    }
}

/// Decide whether `actor` may apply `verb` to a resource of `kind`.
/// `owner` is the owning username for feedback resources, if the target
/// already exists; it is ignored for other classes.
pub fn decide(actor: &Actor, verb: Verb, kind: ResourceKind, owner: Option<&str>) -> Decision {
    use Verb::*;

    match kind.class() {
        Class::Catalog => match verb {
            Read | List => Decision::Allow,
            Create | Update | Delete => require_admin(actor),
        },
        Class::Feedback => match verb {
            Read | List => Decision::Allow,
            // An unauthenticated create is rejected, never treated as
            // anonymous-authored.
            Create => match actor {
                Actor::Anonymous => Decision::Deny(DenyReason::Unauthenticated),
                Actor::Known { .. } => Decision::Allow,
            },
            Update | Delete => match actor {
                Actor::Anonymous => Decision::Deny(DenyReason::Unauthenticated),
                Actor::Known { .. } => {
                    if actor.is_admin()
                        || actor.is_moderator()
                        || owner.is_some_and(|o| actor.is(o))
                    {
                        Decision::Allow
                    } else {
                        Decision::Deny(DenyReason::OwnerOnly)
                    }
                }
            },
        },
        // The self-profile route is handled outside the engine; everything
        // else on the user collection is admin-gated.
        Class::Account => require_admin(actor),
    }
}

fn require_admin(actor: &Actor) -> Decision {
    match actor {
        Actor::Anonymous => Decision::Deny(DenyReason::Unauthenticated),
        Actor::Known { .. } if actor.is_admin() => Decision::Allow,
        Actor::Known { .. } => Decision::Deny(DenyReason::AdminOnly),
    }
}

/// Fields of the user record writable on the self-profile route, per actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    Email,
    FirstName,
    LastName,
    Bio,
    Role,
}

const PROFILE_FIELDS: &[UserField] = &[
    UserField::Email,
    UserField::FirstName,
    UserField::LastName,
    UserField::Bio,
    UserField::Role,
];

const PROFILE_FIELDS_NO_ROLE: &[UserField] = &[
    UserField::Email,
    UserField::FirstName,
    UserField::LastName,
    UserField::Bio,
];

pub fn profile_writable_fields(actor: &Actor) -> &'static [UserField] {
    if actor.is_admin() {
        PROFILE_FIELDS
    } else {
        PROFILE_FIELDS_NO_ROLE
    }
}

/// Project a self-profile update onto the actor's writable field set.
/// A role change by a non-admin is silently dropped, not rejected.
pub fn project_profile_update(actor: &Actor, mut upd: UpdateUser) -> UpdateUser {
    let writable = profile_writable_fields(actor);
    if !writable.contains(&UserField::Role) {
        upd.role = None;
    }
    upd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anon() -> Actor {
        Actor::Anonymous
    }

    fn known(username: &str, role: Role) -> Actor {
        Actor::Known {
            username: username.into(),
            role,
            superuser: false,
        }
    }

    fn superuser(username: &str) -> Actor {
        Actor::Known {
            username: username.into(),
            role: Role::User,
            superuser: true,
        }
    }

    #[test]
    fn catalog_reads_are_public() {
        for kind in [ResourceKind::Category, ResourceKind::Genre, ResourceKind::Title] {
            assert_eq!(decide(&anon(), Verb::List, kind, None), Decision::Allow);
            assert_eq!(decide(&anon(), Verb::Read, kind, None), Decision::Allow);
        }
    }

    #[test]
    fn catalog_writes_require_admin() {
        let user = known("u", Role::User);
        let moderator = known("m", Role::Moderator);
        let admin = known("a", Role::Admin);
        for verb in [Verb::Create, Verb::Update, Verb::Delete] {
            assert_eq!(
                decide(&anon(), verb, ResourceKind::Title, None),
                Decision::Deny(DenyReason::Unauthenticated)
            );
            assert_eq!(
                decide(&user, verb, ResourceKind::Title, None),
                Decision::Deny(DenyReason::AdminOnly)
            );
            assert_eq!(
                decide(&moderator, verb, ResourceKind::Title, None),
                Decision::Deny(DenyReason::AdminOnly)
            );
            assert_eq!(decide(&admin, verb, ResourceKind::Title, None), Decision::Allow);
        }
    }

    #[test]
    fn superuser_flag_elevates_any_role() {
        let su = superuser("root");
        assert_eq!(decide(&su, Verb::Create, ResourceKind::Category, None), Decision::Allow);
        assert_eq!(decide(&su, Verb::List, ResourceKind::User, None), Decision::Allow);
    }

    #[test]
    fn feedback_create_needs_authentication() {
        assert_eq!(
            decide(&anon(), Verb::Create, ResourceKind::Review, None),
            Decision::Deny(DenyReason::Unauthenticated)
        );
        assert_eq!(
            decide(&known("u", Role::User), Verb::Create, ResourceKind::Review, None),
            Decision::Allow
        );
    }

    #[test]
    fn feedback_edit_by_owner_moderator_admin_only() {
        let owner = known("alice", Role::User);
        let other = known("bob", Role::User);
        let moderator = known("mod", Role::Moderator);
        let admin = known("adm", Role::Admin);
        for verb in [Verb::Update, Verb::Delete] {
            for kind in [ResourceKind::Review, ResourceKind::Comment] {
                assert_eq!(decide(&owner, verb, kind, Some("alice")), Decision::Allow);
                assert_eq!(
                    decide(&other, verb, kind, Some("alice")),
                    Decision::Deny(DenyReason::OwnerOnly)
                );
                assert_eq!(decide(&moderator, verb, kind, Some("alice")), Decision::Allow);
                assert_eq!(decide(&admin, verb, kind, Some("alice")), Decision::Allow);
                assert_eq!(
                    decide(&anon(), verb, kind, Some("alice")),
                    Decision::Deny(DenyReason::Unauthenticated)
                );
            }
        }
    }

    #[test]
    fn user_collection_is_admin_only() {
        let user = known("u", Role::User);
        for verb in [Verb::List, Verb::Read, Verb::Create, Verb::Update, Verb::Delete] {
            assert_eq!(
                decide(&user, verb, ResourceKind::User, None),
                Decision::Deny(DenyReason::AdminOnly)
            );
        }
        assert_eq!(
            decide(&known("a", Role::Admin), Verb::List, ResourceKind::User, None),
            Decision::Allow
        );
    }

    #[test]
    fn profile_projection_drops_role_for_non_admin() {
        let upd = UpdateUser {
            bio: Some("hi".into()),
            role: Some(Role::Admin),
            ..Default::default()
        };
        let projected = project_profile_update(&known("u", Role::User), upd.clone());
        assert_eq!(projected.role, None);
        assert_eq!(projected.bio.as_deref(), Some("hi"));

        let kept = project_profile_update(&known("a", Role::Admin), upd.clone());
        assert_eq!(kept.role, Some(Role::Admin));

        let kept = project_profile_update(&superuser("root"), upd);
        assert_eq!(kept.role, Some(Role::Admin));
    }
}
