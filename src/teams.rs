use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::error::AuthError;
use crate::repo::UserRepository;
use crate::user::TeamMembership;

/// Team-membership mutation on user records. `add_member`/`remove_member`
/// are single atomic storage operations; `assign_team` is the read-modify-
/// write path and is documented as such.
#[derive(Clone)]
pub struct TeamService {
    repo: Arc<dyn UserRepository>,
}

impl TeamService {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    /// Records the creator's membership in a team they just created, with a
    /// role. Loads the record, appends, saves: not atomic against concurrent
    /// membership changes and not idempotent; repeated calls for the same
    /// team produce duplicate entries.
    pub async fn assign_team(
        &self,
        creator_id: Uuid,
        team_id: Uuid,
        role: &str,
    ) -> Result<(), AuthError> {
        let mut user = self
            .repo
            .find_by_id(creator_id)
            .await?
            .ok_or(AuthError::NotFound)?;
        user.teams.push(TeamMembership {
            team_id,
            role: Some(role.to_owned()),
        });
        user.updated_at = OffsetDateTime::now_utc();
        self.repo.save(&user).await?;
        info!(user_id = %creator_id, team_id = %team_id, role = %role, "team assigned to creator");
        Ok(())
    }

    /// Appends a membership entry in one atomic update, so concurrent
    /// membership changes on the same user cannot overwrite each other.
    /// The user must already exist; nothing is created implicitly.
    pub async fn add_member(&self, team_id: Uuid, user_id: Uuid) -> Result<(), AuthError> {
        let membership = TeamMembership {
            team_id,
            role: None,
        };
        self.repo
            .push_team(user_id, &membership, OffsetDateTime::now_utc())
            .await?;
        info!(user_id = %user_id, team_id = %team_id, "team member added");
        Ok(())
    }

    /// Removes every membership entry matching the team in one atomic
    /// update. A user with no such membership is a no-op, not an error.
    pub async fn remove_member(&self, team_id: Uuid, user_id: Uuid) -> Result<(), AuthError> {
        self.repo
            .pull_team(user_id, team_id, OffsetDateTime::now_utc())
            .await?;
        info!(user_id = %user_id, team_id = %team_id, "team member removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::InMemoryUserRepository;
    use crate::user::User;

    async fn service_with_user() -> (TeamService, Arc<InMemoryUserRepository>, Uuid) {
        let repo = Arc::new(InMemoryUserRepository::new());
        let user = User::new("a@test.com".into(), "hash".into(), None, None);
        let user_id = user.id;
        repo.insert(&user).await.unwrap();
        (TeamService::new(repo.clone()), repo, user_id)
    }

    #[tokio::test]
    async fn add_member_appends_membership() {
        let (service, repo, user_id) = service_with_user().await;
        let team_id = Uuid::new_v4();
        service.add_member(team_id, user_id).await.unwrap();

        let user = repo.find_by_id(user_id).await.unwrap().unwrap();
        assert!(user.teams.iter().any(|m| m.team_id == team_id));
    }

    #[tokio::test]
    async fn add_member_twice_yields_two_entries() {
        let (service, repo, user_id) = service_with_user().await;
        let team_id = Uuid::new_v4();
        service.add_member(team_id, user_id).await.unwrap();
        service.add_member(team_id, user_id).await.unwrap();

        let user = repo.find_by_id(user_id).await.unwrap().unwrap();
        let count = user.teams.iter().filter(|m| m.team_id == team_id).count();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn add_member_for_unknown_user_is_not_found() {
        let (service, _, _) = service_with_user().await;
        let err = service
            .add_member(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }

    #[tokio::test]
    async fn remove_member_pulls_every_matching_entry() {
        let (service, repo, user_id) = service_with_user().await;
        let team_id = Uuid::new_v4();
        let other_team = Uuid::new_v4();
        service.add_member(team_id, user_id).await.unwrap();
        service.add_member(team_id, user_id).await.unwrap();
        service.add_member(other_team, user_id).await.unwrap();

        service.remove_member(team_id, user_id).await.unwrap();

        let user = repo.find_by_id(user_id).await.unwrap().unwrap();
        assert!(user.teams.iter().all(|m| m.team_id != team_id));
        assert!(user.teams.iter().any(|m| m.team_id == other_team));
    }

    #[tokio::test]
    async fn remove_member_without_membership_is_a_noop() {
        let (service, repo, user_id) = service_with_user().await;
        service
            .remove_member(Uuid::new_v4(), user_id)
            .await
            .unwrap();
        let user = repo.find_by_id(user_id).await.unwrap().unwrap();
        assert!(user.teams.is_empty());
    }

    #[tokio::test]
    async fn assign_team_records_role() {
        let (service, repo, user_id) = service_with_user().await;
        let team_id = Uuid::new_v4();
        service.assign_team(user_id, team_id, "owner").await.unwrap();

        let user = repo.find_by_id(user_id).await.unwrap().unwrap();
        let membership = user.teams.iter().find(|m| m.team_id == team_id).unwrap();
        assert_eq!(membership.role.as_deref(), Some("owner"));
    }

    #[tokio::test]
    async fn assign_team_for_unknown_creator_is_not_found() {
        let (service, _, _) = service_with_user().await;
        let err = service
            .assign_team(Uuid::new_v4(), Uuid::new_v4(), "owner")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }

    #[tokio::test]
    async fn assign_team_is_not_idempotent() {
        let (service, repo, user_id) = service_with_user().await;
        let team_id = Uuid::new_v4();
        service.assign_team(user_id, team_id, "owner").await.unwrap();
        service.assign_team(user_id, team_id, "owner").await.unwrap();

        let user = repo.find_by_id(user_id).await.unwrap().unwrap();
        let count = user.teams.iter().filter(|m| m.team_id == team_id).count();
        assert_eq!(count, 2);
    }
}
