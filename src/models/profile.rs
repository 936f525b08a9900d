use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::enums::UserRole;
use super::medication::MedicationPlan;

/// One observation-diary entry. The profile keeps these newest-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub recorded_at: NaiveDateTime,
    pub note: String,
}

/// The per-user persisted state.
///
/// The local copy (see `store::local`) is a denormalized cache; the remote
/// document is the source of truth. On sign-in the cache is overwritten in
/// full, and every local mutation pushes the full profile back
/// (last-writer-wins, no merge).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub medications: Vec<MedicationPlan>,
    #[serde(default)]
    pub diary_entries: Vec<DiaryEntry>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub allergies: Option<String>,
}

/// Authoritative remote record for one user, keyed by uid.
///
/// `patients` is populated only for doctors; patients carry their assigned
/// doctor in `assigned_doctor_id` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub role: UserRole,
    #[serde(default)]
    pub assigned_doctor_id: Option<String>,
    #[serde(default)]
    pub patients: Vec<String>,
    #[serde(default)]
    pub profile: UserProfile,
}

impl Default for UserRecord {
    fn default() -> Self {
        Self {
            role: UserRole::Patient,
            assigned_doctor_id: None,
            patients: Vec::new(),
            profile: UserProfile::default(),
        }
    }
}
