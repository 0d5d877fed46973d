use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ArchiveState;

/// Hardware categories tracked per site. The string form doubles as the
/// database table discriminator and the REST collection segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareKind {
    Server,
    ClientDevice,
    Radio,
    AudioDevice,
    PhoneIntegration,
}

impl HardwareKind {
    pub const ALL: [Self; 5] = [
        Self::Server,
        Self::ClientDevice,
        Self::Radio,
        Self::AudioDevice,
        Self::PhoneIntegration,
    ];

    /// Returns the table name the kind is stored in.
    pub fn table(self) -> &'static str {
        match self {
            Self::Server => "servers",
            Self::ClientDevice => "client_devices",
            Self::Radio => "radios",
            Self::AudioDevice => "audio_devices",
            Self::PhoneIntegration => "phone_integrations",
        }
    }

    /// Returns the REST collection segment for the kind.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Server => "servers",
            Self::ClientDevice => "clientdevices",
            Self::Radio => "radios",
            Self::AudioDevice => "audiodevices",
            Self::PhoneIntegration => "phoneintegrations",
        }
    }

    pub fn from_collection(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.collection() == segment)
    }
}

/// An installed hardware unit at a site. All hardware kinds share the same
/// shape; kind-specific details live in `detail` (firmware revision for
/// radios, PBX vendor for phone integrations, and so on).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareUnit {
    pub id: Uuid,
    pub kind: HardwareKind,
    pub site_id: Uuid,
    pub model: String,
    pub serial_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commissioned_at: Option<DateTime<Utc>>,
    pub archive_state: ArchiveState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_segments_resolve_back_to_kinds() {
        for kind in HardwareKind::ALL {
            assert_eq!(HardwareKind::from_collection(kind.collection()), Some(kind));
        }
        assert_eq!(HardwareKind::from_collection("printers"), None);
    }

    #[test]
    fn tables_are_distinct() {
        let mut tables: Vec<_> = HardwareKind::ALL.iter().map(|k| k.table()).collect();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), HardwareKind::ALL.len());
    }
}
