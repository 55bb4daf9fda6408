use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AuthError;
use crate::repo::UserRepository;
use crate::user::{ProfileChanges, SessionToken, TeamMembership, User};

/// In-memory store keyed by user id. Every operation completes under a single
/// lock acquisition, which gives it the same atomicity the Postgres
/// implementation gets from single statements. Backs the test suites and any
/// embedded usage that has no database.
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: Mutex<HashMap<Uuid, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<Uuid, User>> {
        self.users.lock().expect("user store lock poisoned")
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self.guard().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        Ok(self.guard().values().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, user: &User) -> Result<(), AuthError> {
        let mut users = self.guard();
        if users.values().any(|u| u.email == user.email) {
            return Err(AuthError::Conflict("email already registered".into()));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn push_token(
        &self,
        user_id: Uuid,
        entry: &SessionToken,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        let mut users = self.guard();
        let user = users.get_mut(&user_id).ok_or(AuthError::NotFound)?;
        user.tokens.push(entry.clone());
        user.updated_at = now;
        Ok(())
    }

    async fn pull_token(
        &self,
        user_id: Uuid,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        if let Some(user) = self.guard().get_mut(&user_id) {
            user.tokens.retain(|t| t.token != token);
            user.updated_at = now;
        }
        Ok(())
    }

    async fn push_team(
        &self,
        user_id: Uuid,
        membership: &TeamMembership,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        let mut users = self.guard();
        let user = users.get_mut(&user_id).ok_or(AuthError::NotFound)?;
        user.teams.push(membership.clone());
        user.updated_at = now;
        Ok(())
    }

    async fn pull_team(
        &self,
        user_id: Uuid,
        team_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        if let Some(user) = self.guard().get_mut(&user_id) {
            user.teams.retain(|m| m.team_id != team_id);
            user.updated_at = now;
        }
        Ok(())
    }

    async fn update_fields(
        &self,
        user_id: Uuid,
        changes: &ProfileChanges,
    ) -> Result<User, AuthError> {
        let mut users = self.guard();
        if let Some(email) = &changes.email {
            if users.values().any(|u| u.id != user_id && &u.email == email) {
                return Err(AuthError::Conflict("email already registered".into()));
            }
        }
        let user = users.get_mut(&user_id).ok_or(AuthError::NotFound)?;
        if let Some(email) = &changes.email {
            user.email = email.clone();
        }
        if let Some(first_name) = &changes.first_name {
            user.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &changes.last_name {
            user.last_name = Some(last_name.clone());
        }
        if let Some(password_hash) = &changes.password_hash {
            user.password_hash = password_hash.clone();
        }
        user.updated_at = changes.updated_at;
        Ok(user.clone())
    }

    async fn save(&self, user: &User) -> Result<(), AuthError> {
        let mut users = self.guard();
        if users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(AuthError::Conflict("email already registered".into()));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }
}
