use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::credentials::hash_password_blocking;
use crate::error::AuthError;
use crate::repo::UserRepository;
use crate::user::{NewUser, ProfileChanges, ProfileUpdate, ProfileView, User};

const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// User creation and whitelisted profile mutation. The password is hashed
/// here, at the point where it is actually being set or changed; no other
/// update path ever touches the hash.
#[derive(Clone)]
pub struct ProfileService {
    repo: Arc<dyn UserRepository>,
}

impl ProfileService {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    /// Registers a new user. The password is hashed off-thread before the
    /// record ever reaches the repository; both timestamps are set once here.
    pub async fn register(&self, new_user: NewUser) -> Result<User, AuthError> {
        let email = new_user.email.trim().to_lowercase();

        if !is_valid_email(&email) {
            warn!(email = %email, "invalid email");
            return Err(AuthError::Validation("invalid email".into()));
        }
        if new_user.password.len() < MIN_PASSWORD_LEN {
            warn!("password too short");
            return Err(AuthError::Validation("password too short".into()));
        }

        // Ensure email is not taken
        if self.repo.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AuthError::Conflict("email already registered".into()));
        }

        let hash = hash_password_blocking(new_user.password).await?;
        let user = User::new(email, hash, new_user.first_name, new_user.last_name);
        self.repo.insert(&user).await?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(user)
    }

    /// Applies a whitelisted partial update in a single repository call and
    /// returns the sanitized projection. If `password` is present it is
    /// rehashed; any other combination of fields leaves the stored hash
    /// untouched.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<ProfileView, AuthError> {
        let email = match update.email {
            Some(raw) => {
                let email = raw.trim().to_lowercase();
                if !is_valid_email(&email) {
                    warn!(email = %email, "invalid email");
                    return Err(AuthError::Validation("invalid email".into()));
                }
                Some(email)
            }
            None => None,
        };

        let password_hash = match update.password {
            Some(plain) => {
                if plain.len() < MIN_PASSWORD_LEN {
                    warn!("password too short");
                    return Err(AuthError::Validation("password too short".into()));
                }
                Some(hash_password_blocking(plain).await?)
            }
            None => None,
        };

        let changes = ProfileChanges {
            email,
            first_name: update.first_name,
            last_name: update.last_name,
            password_hash,
            updated_at: OffsetDateTime::now_utc(),
        };
        let user = self.repo.update_fields(user_id, &changes).await?;

        info!(user_id = %user_id, "profile updated");
        Ok(ProfileView::from(&user))
    }
}
