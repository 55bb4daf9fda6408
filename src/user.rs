use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Console platform a user plays on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Psn,
    XboxLive,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Psn => "psn",
            Platform::XboxLive => "xboxlive",
        }
    }

    pub fn parse(s: &str) -> Option<Platform> {
        match s {
            "psn" => Some(Platform::Psn),
            "xboxlive" => Some(Platform::XboxLive),
            _ => None,
        }
    }
}

/// Where a session token was issued from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenOrigin {
    Web,
}

impl TokenOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenOrigin::Web => "web",
        }
    }

    pub fn parse(s: &str) -> Option<TokenOrigin> {
        match s {
            "web" => Some(TokenOrigin::Web),
            _ => None,
        }
    }
}

/// One entry in a user's active session-token list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionToken {
    pub origin: TokenOrigin,
    pub token: String,
}

/// Association between a user and a team. `role` is `None` for members
/// added through the plain membership path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamMembership {
    pub team_id: Uuid,
    pub role: Option<String>,
}

/// User record as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,                     // unique user ID
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,                // unique across users
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 hash, not exposed in JSON
    pub bio: Option<String>,
    pub age: Option<i32>,
    pub region: Option<String>,
    pub platform: Option<Platform>,
    pub tokens: Vec<SessionToken>,
    pub teams: Vec<TeamMembership>,
    pub created_at: OffsetDateTime,   // set once at creation
    pub updated_at: OffsetDateTime,   // refreshed on every mutation
}

impl User {
    /// Fresh record for registration. `password_hash` must already be the
    /// hash output, never a plaintext password.
    pub fn new(
        email: String,
        password_hash: String,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            first_name,
            last_name,
            email,
            password_hash,
            bio: None,
            age: None,
            region: None,
            platform: None,
            tokens: Vec::new(),
            teams: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_token(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t.token == token)
    }
}

/// Input for registration.
#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// The whitelist of profile fields a caller may change. Anything outside
/// this struct is immutable through the profile path.
#[derive(Debug, Default, Deserialize)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
}

/// Whitelisted changes as handed to the repository. The password, if it was
/// part of the update, has already been hashed by the service.
#[derive(Debug)]
pub struct ProfileChanges {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_hash: Option<String>,
    pub updated_at: OffsetDateTime,
}

/// Sanitized projection returned after a profile update. The hash and the
/// token list have no field here and can never leak through it.
#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl From<&User> for ProfileView {
    fn from(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_serialization_skips_password_hash() {
        let user = User::new("a@test.com".into(), "argon2-hash".into(), None, None);
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("a@test.com"));
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("argon2-hash"));
    }

    #[test]
    fn profile_view_exposes_only_whitelisted_fields() {
        let mut user = User::new(
            "a@test.com".into(),
            "argon2-hash".into(),
            Some("Ada".into()),
            None,
        );
        user.tokens.push(SessionToken {
            origin: TokenOrigin::Web,
            token: "opaque".into(),
        });

        let view = ProfileView::from(&user);
        let json = serde_json::to_value(&view).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["email", "first_name", "last_name"]);
    }
}
