use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AuthError;
use crate::repo::UserRepository;
use crate::user::{Platform, ProfileChanges, SessionToken, TeamMembership, TokenOrigin, User};

/// Postgres-backed repository. The user row holds the scalar fields; the
/// token and membership lists live in child tables, so push/pull operations
/// are single statements (a data-modifying CTE that also refreshes
/// `users.updated_at`) with no read-then-write window.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")?;
        Ok(())
    }

    async fn load_lists(
        &self,
        user_id: Uuid,
    ) -> Result<(Vec<SessionToken>, Vec<TeamMembership>), AuthError> {
        let tokens = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT origin, token
            FROM session_tokens
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TokenRow::into_entry)
        .collect::<Result<_, _>>()?;

        let teams = sqlx::query_as::<_, TeamRow>(
            r#"
            SELECT team_id, role
            FROM team_memberships
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TeamRow::into_entry)
        .collect();

        Ok((tokens, teams))
    }

    async fn hydrate(&self, row: UserRow) -> Result<User, AuthError> {
        let (tokens, teams) = self.load_lists(row.id).await?;
        row.into_user(tokens, teams)
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    first_name: Option<String>,
    last_name: Option<String>,
    email: String,
    password_hash: String,
    bio: Option<String>,
    age: Option<i32>,
    region: Option<String>,
    platform: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

const USER_COLUMNS: &str = "id, first_name, last_name, email, password_hash, \
     bio, age, region, platform, created_at, updated_at";

impl UserRow {
    fn into_user(
        self,
        tokens: Vec<SessionToken>,
        teams: Vec<TeamMembership>,
    ) -> Result<User, AuthError> {
        let platform = self
            .platform
            .as_deref()
            .map(|s| {
                Platform::parse(s)
                    .ok_or_else(|| AuthError::Internal(format!("unknown platform value: {s}")))
            })
            .transpose()?;
        Ok(User {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            password_hash: self.password_hash,
            bio: self.bio,
            age: self.age,
            region: self.region,
            platform,
            tokens,
            teams,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TokenRow {
    origin: String,
    token: String,
}

impl TokenRow {
    fn into_entry(self) -> Result<SessionToken, AuthError> {
        let origin = TokenOrigin::parse(&self.origin)
            .ok_or_else(|| AuthError::Internal(format!("unknown token origin: {}", self.origin)))?;
        Ok(SessionToken {
            origin,
            token: self.token,
        })
    }
}

#[derive(FromRow)]
struct TeamRow {
    team_id: Uuid,
    role: Option<String>,
}

impl TeamRow {
    fn into_entry(self) -> TeamMembership {
        TeamMembership {
            team_id: self.team_id,
            role: self.role,
        }
    }
}

fn email_conflict(e: sqlx::Error) -> AuthError {
    match AuthError::from(e) {
        AuthError::Conflict(_) => AuthError::Conflict("email already registered".into()),
        other => other,
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, user: &User) -> Result<(), AuthError> {
        let mut txn = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO users (id, first_name, last_name, email, password_hash,
                               bio, age, region, platform, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.bio)
        .bind(user.age)
        .bind(&user.region)
        .bind(user.platform.map(|p| p.as_str()))
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *txn)
        .await
        .map_err(email_conflict)?;

        for entry in &user.tokens {
            sqlx::query("INSERT INTO session_tokens (user_id, origin, token) VALUES ($1, $2, $3)")
                .bind(user.id)
                .bind(entry.origin.as_str())
                .bind(&entry.token)
                .execute(&mut *txn)
                .await?;
        }
        for membership in &user.teams {
            sqlx::query(
                "INSERT INTO team_memberships (user_id, team_id, role) VALUES ($1, $2, $3)",
            )
            .bind(user.id)
            .bind(membership.team_id)
            .bind(&membership.role)
            .execute(&mut *txn)
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn push_token(
        &self,
        user_id: Uuid,
        entry: &SessionToken,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        let result = sqlx::query(
            r#"
            WITH target AS (
                UPDATE users SET updated_at = $4 WHERE id = $1 RETURNING id
            )
            INSERT INTO session_tokens (user_id, origin, token)
            SELECT id, $2, $3 FROM target
            "#,
        )
        .bind(user_id)
        .bind(entry.origin.as_str())
        .bind(&entry.token)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound);
        }
        Ok(())
    }

    async fn pull_token(
        &self,
        user_id: Uuid,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            WITH removed AS (
                DELETE FROM session_tokens
                WHERE user_id = $1 AND token = $2
                RETURNING user_id
            )
            UPDATE users SET updated_at = $3 WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn push_team(
        &self,
        user_id: Uuid,
        membership: &TeamMembership,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        let result = sqlx::query(
            r#"
            WITH target AS (
                UPDATE users SET updated_at = $4 WHERE id = $1 RETURNING id
            )
            INSERT INTO team_memberships (user_id, team_id, role)
            SELECT id, $2, $3 FROM target
            "#,
        )
        .bind(user_id)
        .bind(membership.team_id)
        .bind(&membership.role)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound);
        }
        Ok(())
    }

    async fn pull_team(
        &self,
        user_id: Uuid,
        team_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            WITH removed AS (
                DELETE FROM team_memberships
                WHERE user_id = $1 AND team_id = $2
                RETURNING user_id
            )
            UPDATE users SET updated_at = $3 WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(team_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_fields(
        &self,
        user_id: Uuid,
        changes: &ProfileChanges,
    ) -> Result<User, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                password_hash = COALESCE($5, password_hash),
                updated_at = $6
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&changes.email)
        .bind(&changes.first_name)
        .bind(&changes.last_name)
        .bind(&changes.password_hash)
        .bind(changes.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(email_conflict)?
        .ok_or(AuthError::NotFound)?;

        self.hydrate(row).await
    }

    async fn save(&self, user: &User) -> Result<(), AuthError> {
        let mut txn = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO users (id, first_name, last_name, email, password_hash,
                               bio, age, region, platform, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                email = EXCLUDED.email,
                password_hash = EXCLUDED.password_hash,
                bio = EXCLUDED.bio,
                age = EXCLUDED.age,
                region = EXCLUDED.region,
                platform = EXCLUDED.platform,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.bio)
        .bind(user.age)
        .bind(&user.region)
        .bind(user.platform.map(|p| p.as_str()))
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *txn)
        .await
        .map_err(email_conflict)?;

        sqlx::query("DELETE FROM session_tokens WHERE user_id = $1")
            .bind(user.id)
            .execute(&mut *txn)
            .await?;
        for entry in &user.tokens {
            sqlx::query("INSERT INTO session_tokens (user_id, origin, token) VALUES ($1, $2, $3)")
                .bind(user.id)
                .bind(entry.origin.as_str())
                .bind(&entry.token)
                .execute(&mut *txn)
                .await?;
        }

        sqlx::query("DELETE FROM team_memberships WHERE user_id = $1")
            .bind(user.id)
            .execute(&mut *txn)
            .await?;
        for membership in &user.teams {
            sqlx::query(
                "INSERT INTO team_memberships (user_id, team_id, role) VALUES ($1, $2, $3)",
            )
            .bind(user.id)
            .bind(membership.team_id)
            .bind(&membership.role)
            .execute(&mut *txn)
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }
}
