//! Trigger reasons for permission sync jobs.
//!
//! Reasons form a closed, two-level tag set: every [`SyncReason`] belongs to
//! exactly one [`ReasonGroup`], resolved by an exhaustive match.

use std::fmt;
use std::str::FromStr;

use sea_orm::Iterable;
use sea_orm::entity::prelude::*;

/// Why a permission sync job was scheduled. Stored as its `REASON_*` string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum SyncReason {
    // Scheduled by the permission syncer itself
    #[sea_orm(string_value = "REASON_USER_OUTDATED_PERMS")]
    UserOutdatedPerms,
    #[sea_orm(string_value = "REASON_USER_NO_PERMS")]
    UserNoPerms,
    #[sea_orm(string_value = "REASON_REPO_OUTDATED_PERMS")]
    RepoOutdatedPerms,
    #[sea_orm(string_value = "REASON_REPO_NO_PERMS")]
    RepoNoPerms,
    #[sea_orm(string_value = "REASON_REPO_UPDATED_FROM_CODE_HOST")]
    RepoUpdatedFromCodeHost,

    // Internal account and organization events
    #[sea_orm(string_value = "REASON_USER_EMAIL_REMOVED")]
    UserEmailRemoved,
    #[sea_orm(string_value = "REASON_USER_EMAIL_VERIFIED")]
    UserEmailVerified,
    #[sea_orm(string_value = "REASON_USER_ADDED")]
    UserAdded,
    #[sea_orm(string_value = "REASON_USER_ADDED_TO_ORG")]
    UserAddedToOrg,
    #[sea_orm(string_value = "REASON_USER_REMOVED_FROM_ORG")]
    UserRemovedFromOrg,
    #[sea_orm(string_value = "REASON_USER_ACCEPTED_ORG_INVITE")]
    UserAcceptedOrgInvite,
    #[sea_orm(string_value = "REASON_EXTERNAL_ACCOUNT_ADDED")]
    ExternalAccountAdded,
    #[sea_orm(string_value = "REASON_EXTERNAL_ACCOUNT_DELETED")]
    ExternalAccountDeleted,

    // Code host webhooks
    #[sea_orm(string_value = "REASON_GITHUB_USER_EVENT")]
    GitHubUserEvent,
    #[sea_orm(string_value = "REASON_GITHUB_USER_ADDED_EVENT")]
    GitHubUserAddedEvent,
    #[sea_orm(string_value = "REASON_GITHUB_USER_REMOVED_EVENT")]
    GitHubUserRemovedEvent,
    #[sea_orm(string_value = "REASON_GITHUB_USER_MEMBERSHIP_ADDED_EVENT")]
    GitHubUserMembershipAddedEvent,
    #[sea_orm(string_value = "REASON_GITHUB_USER_MEMBERSHIP_REMOVED_EVENT")]
    GitHubUserMembershipRemovedEvent,
    #[sea_orm(string_value = "REASON_GITHUB_TEAM_ADDED_TO_REPO_EVENT")]
    GitHubTeamAddedToRepoEvent,
    #[sea_orm(string_value = "REASON_GITHUB_TEAM_REMOVED_FROM_REPO_EVENT")]
    GitHubTeamRemovedFromRepoEvent,
    #[sea_orm(string_value = "REASON_GITHUB_ORG_MEMBER_ADDED_EVENT")]
    GitHubOrgMemberAddedEvent,
    #[sea_orm(string_value = "REASON_GITHUB_ORG_MEMBER_REMOVED_EVENT")]
    GitHubOrgMemberRemovedEvent,
    #[sea_orm(string_value = "REASON_GITHUB_REPO_EVENT")]
    GitHubRepoEvent,
    #[sea_orm(string_value = "REASON_GITHUB_REPO_MADE_PRIVATE_EVENT")]
    GitHubRepoMadePrivateEvent,

    // Operator requests
    #[sea_orm(string_value = "REASON_MANUAL_REPO_SYNC")]
    ManualRepoSync,
    #[sea_orm(string_value = "REASON_MANUAL_USER_SYNC")]
    ManualUserSync,
}

/// Coarse classification of [`SyncReason`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReasonGroup {
    Manual,
    Webhook,
    Schedule,
    Internal,
}

impl SyncReason {
    pub fn group(self) -> ReasonGroup {
        match self {
            Self::ManualRepoSync | Self::ManualUserSync => ReasonGroup::Manual,

            Self::GitHubUserEvent
            | Self::GitHubUserAddedEvent
            | Self::GitHubUserRemovedEvent
            | Self::GitHubUserMembershipAddedEvent
            | Self::GitHubUserMembershipRemovedEvent
            | Self::GitHubTeamAddedToRepoEvent
            | Self::GitHubTeamRemovedFromRepoEvent
            | Self::GitHubOrgMemberAddedEvent
            | Self::GitHubOrgMemberRemovedEvent
            | Self::GitHubRepoEvent
            | Self::GitHubRepoMadePrivateEvent => ReasonGroup::Webhook,

            Self::UserOutdatedPerms
            | Self::UserNoPerms
            | Self::RepoOutdatedPerms
            | Self::RepoNoPerms
            | Self::RepoUpdatedFromCodeHost => ReasonGroup::Schedule,

            Self::UserEmailRemoved
            | Self::UserEmailVerified
            | Self::UserAdded
            | Self::UserAddedToOrg
            | Self::UserRemovedFromOrg
            | Self::UserAcceptedOrgInvite
            | Self::ExternalAccountAdded
            | Self::ExternalAccountDeleted => ReasonGroup::Internal,
        }
    }
}

impl fmt::Display for SyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_value())
    }
}

impl FromStr for SyncReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::iter()
            .find(|reason| reason.to_value() == normalized)
            .ok_or_else(|| format!("unknown sync reason '{s}'"))
    }
}

impl ReasonGroup {
    /// All reasons that belong to this group.
    pub fn reasons(self) -> Vec<SyncReason> {
        SyncReason::iter()
            .filter(|reason| reason.group() == self)
            .collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "MANUAL",
            Self::Webhook => "WEBHOOK",
            Self::Schedule => "SCHEDULE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ReasonGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MANUAL" => Ok(Self::Manual),
            "WEBHOOK" => Ok(Self::Webhook),
            "SCHEDULE" => Ok(Self::Schedule),
            "INTERNAL" => Ok(Self::Internal),
            other => Err(format!("unknown reason group '{other}'")),
        }
    }
}
