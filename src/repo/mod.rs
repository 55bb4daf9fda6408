use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AuthError;
use crate::user::{ProfileChanges, SessionToken, TeamMembership, User};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryUserRepository;
pub use postgres::PgUserRepository;

/// Persistence contract for user records. Each method is one storage
/// operation; the `push_*`/`pull_*`/`update_fields` methods are atomic at the
/// storage layer (no read-then-write window), while `save` is the full-record
/// write used by read-modify-write callers. Mutating methods take the new
/// `updated_at` from the caller: stamping is a decision of the component
/// issuing the mutation, not a hook inside the store.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    /// Persists a new record. A duplicate email is `Conflict`.
    async fn insert(&self, user: &User) -> Result<(), AuthError>;

    /// Atomically appends a session-token entry. `NotFound` if the user does
    /// not exist; nothing is created implicitly.
    async fn push_token(
        &self,
        user_id: Uuid,
        entry: &SessionToken,
        now: OffsetDateTime,
    ) -> Result<(), AuthError>;

    /// Atomically removes the matching token entry. Idempotent: an absent
    /// token, or an absent user, is a no-op.
    async fn pull_token(
        &self,
        user_id: Uuid,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<(), AuthError>;

    /// Atomically appends a membership entry. `NotFound` if the user does
    /// not exist.
    async fn push_team(
        &self,
        user_id: Uuid,
        membership: &TeamMembership,
        now: OffsetDateTime,
    ) -> Result<(), AuthError>;

    /// Atomically removes every membership entry for `team_id`. Idempotent.
    async fn pull_team(
        &self,
        user_id: Uuid,
        team_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<(), AuthError>;

    /// Single conditional update of the whitelisted scalar fields. Returns
    /// the updated record; `NotFound` if the user does not exist, `Conflict`
    /// if the new email is taken.
    async fn update_fields(
        &self,
        user_id: Uuid,
        changes: &ProfileChanges,
    ) -> Result<User, AuthError>;

    /// Full-record write. Unlike the atomic operations above this replaces
    /// the whole record, so concurrent list mutations can be lost; callers
    /// that need safety use `push_*`/`pull_*` instead.
    async fn save(&self, user: &User) -> Result<(), AuthError>;
}
