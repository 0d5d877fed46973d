use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity families covered by the full-text index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchDomain {
    Account,
    Project,
    Site,
    Software,
}

impl SearchDomain {
    pub const ALL: [Self; 4] = [Self::Account, Self::Project, Self::Site, Self::Software];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Project => "project",
            Self::Site => "site",
            Self::Software => "software",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|domain| domain.as_str() == value)
    }
}

/// A document as stored in the search index. `title` holds the display
/// name, `body` the remaining searchable text (codes, ids, vendor names).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub entity_id: Uuid,
    pub domain: SearchDomain,
    pub title: String,
    pub body: String,
}

impl SearchDocument {
    /// Builds the index document for an account.
    pub fn account(account: &crate::types::Account) -> Self {
        let mut body = account.sap_id.clone();
        if let Some(crm_id) = &account.crm_id {
            body.push(' ');
            body.push_str(crm_id);
        }
        if let Some(email) = &account.contact_email {
            body.push(' ');
            body.push_str(email);
        }
        Self {
            entity_id: account.id,
            domain: SearchDomain::Account,
            title: account.name.clone(),
            body,
        }
    }

    /// Builds the index document for a project.
    pub fn project(project: &crate::types::Project) -> Self {
        Self {
            entity_id: project.id,
            domain: SearchDomain::Project,
            title: project.name.clone(),
            body: project.code.clone(),
        }
    }

    /// Builds the index document for a site.
    pub fn site(site: &crate::types::Site) -> Self {
        Self {
            entity_id: site.id,
            domain: SearchDomain::Site,
            title: site.name.clone(),
            body: site.site_code.clone(),
        }
    }

    /// Builds the index document for a software catalog entry.
    pub fn software(software: &crate::types::Software) -> Self {
        Self {
            entity_id: software.id,
            domain: SearchDomain::Software,
            title: software.name.clone(),
            body: format!("{} {}", software.vendor, software.version),
        }
    }
}

/// A ranked hit returned by the search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub entity_id: Uuid,
    pub domain: SearchDomain,
    pub title: String,
    pub snippet: String,
}
