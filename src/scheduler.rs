//! Medication reminder scheduling.
//!
//! A plan with duration `d` and `k` daily times expands to exactly
//! `d * k` alarms, one per (day offset, time) pair, anchored at the
//! plan's start date. Because the expansion is a pure function of the
//! plan, cancellation recomputes the identical set and deregisters each
//! alarm by identity — no persisted alarm-id bookkeeping.

use chrono::Days;

use crate::models::{AlarmItem, MedicationPlan};
use crate::store::AlarmService;

/// Expand a plan into its full alarm set, in (time, day-offset) order.
///
/// Instants already in the past are included unchanged; the platform
/// fires those immediately, which is the accepted behavior for a
/// one-day plan added after its intake time.
pub fn build_schedule(plan: &MedicationPlan) -> Vec<AlarmItem> {
    let mut alarms =
        Vec::with_capacity(plan.daily_times.len() * plan.duration_days as usize);
    for time in &plan.daily_times {
        for offset in 0..plan.duration_days {
            let day = plan.start_date + Days::new(u64::from(offset));
            alarms.push(AlarmItem {
                fires_at: day.and_time(*time),
                payload: format!("Time to take: {}", plan.name),
            });
        }
    }
    alarms
}

/// Registers and cancels a plan's alarms against the platform service.
pub struct ReminderScheduler<A: AlarmService> {
    backend: A,
}

impl<A: AlarmService> ReminderScheduler<A> {
    pub fn new(backend: A) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &A {
        &self.backend
    }

    /// Register every alarm of the plan. Registration failures are
    /// logged and skipped, never retried (fire-and-forget).
    pub fn create_schedule(&self, plan: &MedicationPlan) {
        for alarm in build_schedule(plan) {
            if let Err(e) = self.backend.schedule(&alarm) {
                tracing::warn!(
                    medication = %plan.name,
                    fires_at = %alarm.fires_at,
                    "alarm registration failed: {e}"
                );
            }
        }
    }

    /// Cancel the plan's alarms by recomputing the identical set.
    /// Exact and idempotent: cancelling twice is a no-op the second time.
    pub fn cancel_schedule(&self, plan: &MedicationPlan) {
        for alarm in build_schedule(plan) {
            self.backend.cancel(&alarm);
        }
    }
}
