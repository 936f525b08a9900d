//! User session manager — the app's single repository object.
//!
//! Mirrors the remote user record into the local preference store on
//! sign-in, pushes local mutations back to the remote document, and fans
//! reminder (de)registration out to the scheduler. Every mutation follows
//! the same shape: read-modify-write the local cache, then push the full
//! profile (last writer wins, no merge).
//!
//! Push is best-effort with an explicit outbox: a failed push keeps the
//! latest profile snapshot queued, and the next mutation — or an explicit
//! `flush` — retries it. Intermediate snapshots are coalesced away since
//! the push overwrites the whole document anyway.

use std::sync::{Mutex, MutexGuard};

use crate::models::{DiaryEntry, MedicationPlan, UserProfile, UserRole};
use crate::scheduler::ReminderScheduler;
use crate::store::{AlarmService, AuthService, DocumentStore, PreferenceStore, StoreError};

/// Immutable snapshot of the signed-in user, returned by `sign_in`.
/// Consumers hold this value instead of reading mutable session fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub uid: String,
    pub role: UserRole,
    pub assigned_doctor_id: Option<String>,
    /// Assigned patient uids; populated for doctors only.
    pub patients: Vec<String>,
}

/// Local-vs-remote sync state of the cached profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    Syncing,
    Unsynced,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No user is signed in")]
    NotSignedIn,

    #[error("Index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
}

struct Outbox {
    state: SyncState,
    /// Latest full-profile snapshot awaiting a successful push.
    pending: Option<UserProfile>,
    attempts: u32,
}

pub struct UserSession<D, A, U>
where
    D: DocumentStore,
    A: AlarmService,
    U: AuthService,
{
    prefs: PreferenceStore,
    remote: D,
    scheduler: ReminderScheduler<A>,
    auth: U,
    outbox: Mutex<Outbox>,
}

impl<D, A, U> UserSession<D, A, U>
where
    D: DocumentStore,
    A: AlarmService,
    U: AuthService,
{
    pub fn new(prefs: PreferenceStore, remote: D, scheduler: ReminderScheduler<A>, auth: U) -> Self {
        Self {
            prefs,
            remote,
            scheduler,
            auth,
            outbox: Mutex::new(Outbox {
                state: SyncState::Synced,
                pending: None,
                attempts: 0,
            }),
        }
    }

    pub fn remote(&self) -> &D {
        &self.remote
    }

    pub fn scheduler(&self) -> &ReminderScheduler<A> {
        &self.scheduler
    }

    pub fn auth(&self) -> &U {
        &self.auth
    }

    // ── Sign-in / sign-out ───────────────────────────────────

    /// Fetch the remote record, overwrite the local cache with it in
    /// full, and register every medication reminder it carries.
    ///
    /// An absent record means a new user and yields the default profile;
    /// a transport failure is surfaced as an error — the two cases are
    /// deliberately distinguishable.
    pub async fn sign_in(&self, uid: &str) -> Result<SessionInfo, SessionError> {
        self.remote.ensure_registered(uid).await?;
        let record = self.remote.fetch(uid).await?.unwrap_or_default();

        let profile = record.profile;
        self.prefs.update(|_| profile.clone())?;
        for plan in &profile.medications {
            self.scheduler.create_schedule(plan);
        }

        {
            let mut outbox = self.lock_outbox();
            outbox.state = SyncState::Synced;
            outbox.pending = None;
            outbox.attempts = 0;
        }

        tracing::info!(uid, role = record.role.as_str(), "signed in");
        Ok(SessionInfo {
            uid: uid.to_string(),
            role: record.role,
            assigned_doctor_id: record.assigned_doctor_id,
            patients: record.patients,
        })
    }

    /// Cancel every cached plan's reminders, reset the local cache to
    /// the default profile, and invalidate the authentication session.
    pub fn sign_out(&self) -> Result<(), SessionError> {
        let profile = self.prefs.read();
        for plan in &profile.medications {
            self.scheduler.cancel_schedule(plan);
        }
        self.prefs.reset()?;
        self.auth.sign_out();

        let mut outbox = self.lock_outbox();
        outbox.state = SyncState::Synced;
        outbox.pending = None;
        outbox.attempts = 0;

        tracing::info!("signed out");
        Ok(())
    }

    // ── Profile reads ────────────────────────────────────────

    /// The locally cached profile.
    pub fn local_profile(&self) -> UserProfile {
        self.prefs.read()
    }

    /// Read another user's profile from the remote store (doctor viewing
    /// a patient). Absent records and fetch failures both degrade to the
    /// default profile here — this is a display path, not sign-in.
    pub async fn fetch_profile(&self, uid: &str) -> UserProfile {
        match self.remote.fetch(uid).await {
            Ok(Some(record)) => record.profile,
            Ok(None) => UserProfile::default(),
            Err(e) => {
                tracing::warn!(uid, "remote profile fetch failed: {e}");
                UserProfile::default()
            }
        }
    }

    // ── Profile mutations ────────────────────────────────────

    /// Append a medication plan and register its reminders.
    pub async fn add_medication(&self, plan: MedicationPlan) -> Result<(), SessionError> {
        let pushed = plan.clone();
        self.apply_and_push(move |mut p| {
            p.medications.push(pushed);
            p
        })
        .await?;
        self.scheduler.create_schedule(&plan);
        Ok(())
    }

    /// Remove the medication at `index`, preserving the order of the
    /// rest, and cancel its reminders.
    pub async fn delete_medication(&self, index: usize) -> Result<(), SessionError> {
        let current = self.prefs.read();
        let len = current.medications.len();
        if index >= len {
            return Err(SessionError::IndexOutOfBounds { index, len });
        }
        let removed = current.medications[index].clone();

        self.apply_and_push(move |mut p| {
            if index < p.medications.len() {
                p.medications.remove(index);
            }
            p
        })
        .await?;
        self.scheduler.cancel_schedule(&removed);
        Ok(())
    }

    /// Prepend a diary entry (the diary is kept newest-first).
    pub async fn add_diary_entry(&self, entry: DiaryEntry) -> Result<(), SessionError> {
        self.apply_and_push(move |mut p| {
            p.diary_entries.insert(0, entry);
            p
        })
        .await?;
        Ok(())
    }

    pub async fn delete_diary_entry(&self, index: usize) -> Result<(), SessionError> {
        let len = self.prefs.read().diary_entries.len();
        if index >= len {
            return Err(SessionError::IndexOutOfBounds { index, len });
        }
        self.apply_and_push(move |mut p| {
            if index < p.diary_entries.len() {
                p.diary_entries.remove(index);
            }
            p
        })
        .await?;
        Ok(())
    }

    pub async fn set_height(&self, height: u32) -> Result<(), SessionError> {
        self.apply_and_push(move |mut p| {
            p.height = Some(height);
            p
        })
        .await?;
        Ok(())
    }

    pub async fn set_allergies(&self, allergies: impl Into<String>) -> Result<(), SessionError> {
        let allergies = allergies.into();
        self.apply_and_push(move |mut p| {
            p.allergies = Some(allergies);
            p
        })
        .await?;
        Ok(())
    }

    // ── Sync outbox ──────────────────────────────────────────

    pub fn sync_state(&self) -> SyncState {
        self.lock_outbox().state
    }

    pub fn has_pending_push(&self) -> bool {
        self.lock_outbox().pending.is_some()
    }

    /// Explicitly retry a pending push. No-op when everything is synced.
    pub async fn flush(&self) -> Result<(), SessionError> {
        self.push_pending().await
    }

    /// Apply a local mutation, queue the resulting snapshot, and attempt
    /// a push. Push failures are logged and swallowed — the snapshot
    /// stays queued and the local cache remains the record.
    async fn apply_and_push<F>(&self, transform: F) -> Result<UserProfile, SessionError>
    where
        F: FnOnce(UserProfile) -> UserProfile,
    {
        let updated = self.prefs.update(transform)?;
        {
            let mut outbox = self.lock_outbox();
            outbox.pending = Some(updated.clone());
            outbox.state = SyncState::Unsynced;
        }
        if let Err(e) = self.push_pending().await {
            tracing::warn!("profile push failed, snapshot retained for retry: {e}");
        }
        Ok(updated)
    }

    async fn push_pending(&self) -> Result<(), SessionError> {
        let snapshot = {
            let mut outbox = self.lock_outbox();
            match outbox.pending.clone() {
                Some(profile) => {
                    outbox.state = SyncState::Syncing;
                    profile
                }
                None => {
                    outbox.state = SyncState::Synced;
                    return Ok(());
                }
            }
        };

        let Some(uid) = self.auth.current_user_id() else {
            self.lock_outbox().state = SyncState::Unsynced;
            return Err(SessionError::NotSignedIn);
        };

        match self.remote.store_profile(&uid, &snapshot).await {
            Ok(()) => {
                let mut outbox = self.lock_outbox();
                // A newer snapshot may have been queued mid-push; only a
                // matching one counts as delivered.
                if outbox.pending.as_ref() == Some(&snapshot) {
                    outbox.pending = None;
                    outbox.state = SyncState::Synced;
                }
                outbox.attempts = 0;
                Ok(())
            }
            Err(e) => {
                let mut outbox = self.lock_outbox();
                outbox.state = SyncState::Unsynced;
                outbox.attempts += 1;
                tracing::debug!(attempts = outbox.attempts, "push attempt failed");
                Err(SessionError::Store(e))
            }
        }
    }

    fn lock_outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRecord;
    use crate::store::memory::{MemoryAlarmService, MemoryAuth, MemoryDocumentStore};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    type TestSession = UserSession<MemoryDocumentStore, MemoryAlarmService, MemoryAuth>;

    fn session(dir: &TempDir) -> TestSession {
        UserSession::new(
            PreferenceStore::open(dir.path().join("data.json")),
            MemoryDocumentStore::new(),
            ReminderScheduler::new(MemoryAlarmService::new()),
            MemoryAuth::signed_in("u1"),
        )
    }

    fn plan(name: &str, days: u32, times: &[&str]) -> MedicationPlan {
        MedicationPlan::new(
            name,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            days,
            times,
        )
        .unwrap()
    }

    fn entry(note: &str, hour: u32) -> DiaryEntry {
        DiaryEntry {
            recorded_at: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            note: note.into(),
        }
    }

    fn alarm_count(session: &TestSession) -> usize {
        session.scheduler().backend().len()
    }

    // ── Sign-in ──

    #[tokio::test]
    async fn sign_in_mirrors_remote_and_schedules_reminders() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        let mut record = UserRecord {
            assigned_doctor_id: Some("doc1".into()),
            ..Default::default()
        };
        record.profile.medications.push(plan("Kaletra", 3, &["08:00"]));
        record.profile.height = Some(175);
        s.remote().insert("u1", record.clone());

        let info = s.sign_in("u1").await.unwrap();

        assert_eq!(info.uid, "u1");
        assert_eq!(info.role, UserRole::Patient);
        assert_eq!(info.assigned_doctor_id, Some("doc1".into()));
        assert_eq!(s.local_profile(), record.profile);
        assert_eq!(alarm_count(&s), 3);
        assert_eq!(s.sync_state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn sign_in_overwrites_stale_local_cache() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        // Stale local state from a previous user.
        s.add_medication(plan("Stale", 1, &["09:00"])).await.unwrap();

        s.remote().insert("u1", UserRecord::default());
        s.sign_in("u1").await.unwrap();

        assert_eq!(s.local_profile(), UserProfile::default());
    }

    #[tokio::test]
    async fn sign_in_unknown_user_gets_default_profile() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        let info = s.sign_in("fresh").await.unwrap();

        assert_eq!(info.role, UserRole::Patient);
        assert!(info.patients.is_empty());
        assert_eq!(s.local_profile(), UserProfile::default());
        // First sign-in registers the user remotely.
        assert!(s.remote().record("fresh").is_some());
    }

    #[tokio::test]
    async fn sign_in_fetch_failure_is_an_error_not_a_default() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        s.remote().insert("u1", UserRecord::default());
        s.remote().set_fail_reads(true);

        let err = s.sign_in("u1").await.unwrap_err();
        assert!(matches!(err, SessionError::Store(StoreError::Unavailable(_))));
    }

    // ── Sign-out ──

    #[tokio::test]
    async fn sign_out_restores_defaults_and_cancels_all_alarms() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        let mut record = UserRecord::default();
        record.profile.medications.push(plan("A", 2, &["08:00"]));
        record.profile.medications.push(plan("B", 3, &["21:00"]));
        s.remote().insert("u1", record);

        s.sign_in("u1").await.unwrap();
        assert_eq!(alarm_count(&s), 5);

        s.sign_out().unwrap();

        assert_eq!(s.local_profile(), UserProfile::default());
        assert_eq!(alarm_count(&s), 0);
        assert!(s.auth().current_user_id().is_none());
    }

    // ── Medications ──

    #[tokio::test]
    async fn add_medication_round_trips_once() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        let p = plan("Kaletra", 3, &["08:00", "20:00"]);
        s.add_medication(p.clone()).await.unwrap();

        let local = s.local_profile();
        assert_eq!(local.medications.iter().filter(|m| **m == p).count(), 1);
        assert_eq!(alarm_count(&s), 6);

        // Push landed: remote carries the same profile.
        assert_eq!(s.remote().record("u1").unwrap().profile, local);
        assert_eq!(s.sync_state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn delete_medication_removes_ith_and_preserves_order() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        let a = plan("A", 1, &["08:00"]);
        let b = plan("B", 1, &["09:00"]);
        let c = plan("C", 1, &["10:00"]);
        s.add_medication(a.clone()).await.unwrap();
        s.add_medication(b.clone()).await.unwrap();
        s.add_medication(c.clone()).await.unwrap();

        s.delete_medication(1).await.unwrap();

        let meds = s.local_profile().medications;
        assert_eq!(meds, vec![a, c]);
        // B's alarm is gone, A's and C's remain.
        let payloads: Vec<_> = s
            .scheduler()
            .backend()
            .scheduled()
            .into_iter()
            .map(|al| al.payload)
            .collect();
        assert!(!payloads.iter().any(|p| p.contains('B')));
        assert_eq!(payloads.len(), 2);
    }

    #[tokio::test]
    async fn delete_medication_out_of_bounds_errors() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        let err = s.delete_medication(0).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::IndexOutOfBounds { index: 0, len: 0 }
        ));
    }

    // ── Diary and attributes ──

    #[tokio::test]
    async fn diary_entries_are_newest_first() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        s.add_diary_entry(entry("first", 8)).await.unwrap();
        s.add_diary_entry(entry("second", 9)).await.unwrap();

        let diary = s.local_profile().diary_entries;
        assert_eq!(diary[0].note, "second");
        assert_eq!(diary[1].note, "first");
    }

    #[tokio::test]
    async fn delete_diary_entry_by_index() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        s.add_diary_entry(entry("keep", 8)).await.unwrap();
        s.add_diary_entry(entry("drop", 9)).await.unwrap();

        // Newest-first: "drop" sits at index 0.
        s.delete_diary_entry(0).await.unwrap();
        let diary = s.local_profile().diary_entries;
        assert_eq!(diary.len(), 1);
        assert_eq!(diary[0].note, "keep");

        let err = s.delete_diary_entry(5).await.unwrap_err();
        assert!(matches!(err, SessionError::IndexOutOfBounds { .. }));
    }

    #[tokio::test]
    async fn attribute_mutations_push_the_full_profile() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        s.set_height(181).await.unwrap();
        s.set_allergies("penicillin").await.unwrap();

        let remote = s.remote().record("u1").unwrap().profile;
        assert_eq!(remote.height, Some(181));
        assert_eq!(remote.allergies, Some("penicillin".into()));
    }

    // ── Outbox ──

    #[tokio::test]
    async fn failed_push_keeps_snapshot_and_flush_retries() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        s.remote().set_fail_writes(true);
        s.add_medication(plan("Kaletra", 1, &["08:00"])).await.unwrap();

        // Local applied, remote not: the mutation itself succeeds.
        assert_eq!(s.local_profile().medications.len(), 1);
        assert_eq!(s.sync_state(), SyncState::Unsynced);
        assert!(s.has_pending_push());
        assert!(s.remote().record("u1").is_none());

        s.remote().set_fail_writes(false);
        s.flush().await.unwrap();

        assert_eq!(s.sync_state(), SyncState::Synced);
        assert!(!s.has_pending_push());
        assert_eq!(s.remote().record("u1").unwrap().profile.medications.len(), 1);
    }

    #[tokio::test]
    async fn next_mutation_retries_a_failed_push() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        s.remote().set_fail_writes(true);
        s.add_medication(plan("Kaletra", 1, &["08:00"])).await.unwrap();
        assert_eq!(s.sync_state(), SyncState::Unsynced);

        s.remote().set_fail_writes(false);
        s.set_height(170).await.unwrap();

        // The retried push carries both the medication and the height.
        let remote = s.remote().record("u1").unwrap().profile;
        assert_eq!(remote.medications.len(), 1);
        assert_eq!(remote.height, Some(170));
        assert_eq!(s.sync_state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn flush_with_nothing_pending_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);
        s.flush().await.unwrap();
        assert_eq!(s.sync_state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn push_without_signed_in_user_is_not_signed_in() {
        let dir = TempDir::new().unwrap();
        let s = UserSession::new(
            PreferenceStore::open(dir.path().join("data.json")),
            MemoryDocumentStore::new(),
            ReminderScheduler::new(MemoryAlarmService::new()),
            MemoryAuth::new(),
        );

        // Mutation succeeds locally; the push is parked.
        s.set_height(170).await.unwrap();
        assert_eq!(s.sync_state(), SyncState::Unsynced);

        let err = s.flush().await.unwrap_err();
        assert!(matches!(err, SessionError::NotSignedIn));
    }

    // ── Doctor-side profile read ──

    #[tokio::test]
    async fn fetch_profile_degrades_to_default_on_failure() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir);

        let mut record = UserRecord::default();
        record.profile.height = Some(160);
        s.remote().insert("patient9", record);

        assert_eq!(s.fetch_profile("patient9").await.height, Some(160));
        assert_eq!(s.fetch_profile("nobody").await, UserProfile::default());

        s.remote().set_fail_reads(true);
        assert_eq!(s.fetch_profile("patient9").await, UserProfile::default());
    }
}
