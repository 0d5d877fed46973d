use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Archive flag shared by most aggregates. Archived rows stay in the
/// database and are excluded from default listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveState {
    Active,
    Archived,
}

impl ArchiveState {
    /// Returns the canonical database representation for the state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Archived => "ARCHIVED",
        }
    }

    /// Parses the database representation, falling back to `Active` for
    /// unknown values.
    pub fn from_db(value: &str) -> Self {
        match value {
            "ARCHIVED" => Self::Archived,
            _ => Self::Active,
        }
    }

    pub fn is_archived(self) -> bool {
        matches!(self, Self::Archived)
    }
}

impl Default for ArchiveState {
    fn default() -> Self {
        Self::Active
    }
}

/// Lifecycle of a deployment project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectLifecycleStatus {
    Draft,
    Planned,
    Rollout,
    Live,
    Closed,
}

impl ProjectLifecycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Planned => "PLANNED",
            Self::Rollout => "ROLLOUT",
            Self::Live => "LIVE",
            Self::Closed => "CLOSED",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "PLANNED" => Self::Planned,
            "ROLLOUT" => Self::Rollout,
            "LIVE" => Self::Live,
            "CLOSED" => Self::Closed,
            _ => Self::Draft,
        }
    }
}

impl Default for ProjectLifecycleStatus {
    fn default() -> Self {
        Self::Draft
    }
}

/// Lifecycle of a software package at a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstalledSoftwareStatus {
    Planned,
    Installing,
    Installed,
    Failed,
    Retired,
}

impl InstalledSoftwareStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "PLANNED",
            Self::Installing => "INSTALLING",
            Self::Installed => "INSTALLED",
            Self::Failed => "FAILED",
            Self::Retired => "RETIRED",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "INSTALLING" => Self::Installing,
            "INSTALLED" => Self::Installed,
            "FAILED" => Self::Failed,
            "RETIRED" => Self::Retired,
            _ => Self::Planned,
        }
    }
}

impl Default for InstalledSoftwareStatus {
    fn default() -> Self {
        Self::Planned
    }
}

/// Customer organisation. `sap_id` is the unique business key assigned by
/// the back-office systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub sap_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crm_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_id: Option<Uuid>,
    pub archive_state: ArchiveState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Deployment project under an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_variant_id: Option<Uuid>,
    pub lifecycle_status: ProjectLifecycleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_start: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_end: Option<NaiveDate>,
    pub archive_state: ArchiveState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Physical deployment location. Sites are shared between projects through
/// soft-archived join rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    pub site_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_id: Option<Uuid>,
    pub timezone: String,
    pub archive_state: ArchiveState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Link between a project and a site. Removing a site from a project
/// archives the link instead of deleting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSiteLink {
    pub project_id: Uuid,
    pub site_id: Uuid,
    pub is_archived: bool,
    pub linked_at: DateTime<Utc>,
}

/// Software catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Software {
    pub id: Uuid,
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Association record tracking a software package's lifecycle at a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledSoftware {
    pub id: Uuid,
    pub software_id: Uuid,
    pub site_id: Uuid,
    pub status: InstalledSoftwareStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Planned software upgrade for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradePlan {
    pub id: Uuid,
    pub project_id: Uuid,
    pub software_id: Uuid,
    pub target_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Commercial agreement scoping maintenance or rollout work for an
/// account/project/site combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceContract {
    pub id: Uuid,
    pub account_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<Uuid>,
    pub contract_number: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub support_level: String,
    pub archive_state: ArchiveState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reusable blueprint code governing a project's technical scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentVariant {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_state_round_trips_through_db_form() {
        assert_eq!(
            ArchiveState::from_db(ArchiveState::Active.as_str()),
            ArchiveState::Active
        );
        assert_eq!(
            ArchiveState::from_db(ArchiveState::Archived.as_str()),
            ArchiveState::Archived
        );
    }

    #[test]
    fn unknown_db_values_fall_back_to_defaults() {
        assert_eq!(ArchiveState::from_db("???"), ArchiveState::Active);
        assert_eq!(
            ProjectLifecycleStatus::from_db("???"),
            ProjectLifecycleStatus::Draft
        );
        assert_eq!(
            InstalledSoftwareStatus::from_db("???"),
            InstalledSoftwareStatus::Planned
        );
    }

    #[test]
    fn lifecycle_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&ProjectLifecycleStatus::Rollout).expect("serialize");
        assert_eq!(json, "\"ROLLOUT\"");
    }

    #[test]
    fn installed_software_status_covers_all_db_forms() {
        for status in [
            InstalledSoftwareStatus::Planned,
            InstalledSoftwareStatus::Installing,
            InstalledSoftwareStatus::Installed,
            InstalledSoftwareStatus::Failed,
            InstalledSoftwareStatus::Retired,
        ] {
            assert_eq!(InstalledSoftwareStatus::from_db(status.as_str()), status);
        }
    }
}
