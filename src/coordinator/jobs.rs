//! In-flight job markers.
//!
//! A registry maps job keys to the generation currently building them.
//! Claiming is check-and-insert under one lock, so two callers can never
//! both start the same job. A marker older than the staleness ceiling is
//! treated as a failed job and may be taken over.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct InFlight {
    generation: Uuid,
    started_at: Instant,
}

#[derive(Debug)]
pub struct JobRegistry {
    name: &'static str,
    stale_after: Duration,
    jobs: Mutex<HashMap<String, InFlight>>,
}

/// Result of trying to start a job.
#[derive(Debug)]
pub enum Claim {
    /// The caller owns the job until the ticket is dropped.
    Claimed(JobTicket),
    /// Someone else is building it; poll later.
    InFlight,
}

impl JobRegistry {
    pub fn new(name: &'static str, stale_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            stale_after,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    pub fn try_claim(self: &Arc<Self>, key: &str) -> Claim {
        let mut jobs = self.jobs.lock();
        if let Some(existing) = jobs.get(key) {
            let age = existing.started_at.elapsed();
            if age < self.stale_after {
                return Claim::InFlight;
            }
            warn!(
                registry = self.name,
                key,
                age_secs = age.as_secs(),
                "taking over stale job"
            );
        }

        let generation = Uuid::new_v4();
        jobs.insert(
            key.to_string(),
            InFlight {
                generation,
                started_at: Instant::now(),
            },
        );
        debug!(registry = self.name, key, %generation, "job claimed");
        Claim::Claimed(JobTicket {
            registry: Arc::clone(self),
            key: key.to_string(),
            generation,
        })
    }

    /// A live (non-stale) marker exists for `key`.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.jobs
            .lock()
            .get(key)
            .map(|job| job.started_at.elapsed() < self.stale_after)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &str, generation: Uuid) {
        let mut jobs = self.jobs.lock();
        // A newer generation may have taken the key over; leave it alone.
        if jobs.get(key).map(|job| job.generation) == Some(generation) {
            jobs.remove(key);
            debug!(registry = self.name, key, %generation, "job released");
        }
    }
}

/// Ownership of one in-flight job. Dropping it (on success, error or
/// panic) clears the marker so the job can be retried.
#[derive(Debug)]
pub struct JobTicket {
    registry: Arc<JobRegistry>,
    key: String,
    generation: Uuid,
}

impl JobTicket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for JobTicket {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_sees_in_flight_until_ticket_drops() {
        let registry = JobRegistry::new("summary", Duration::from_secs(600));
        let ticket = match registry.try_claim("src:DHL") {
            Claim::Claimed(ticket) => ticket,
            Claim::InFlight => panic!("first claim must succeed"),
        };
        assert!(matches!(registry.try_claim("src:DHL"), Claim::InFlight));
        assert!(matches!(registry.try_claim("src:FedEx"), Claim::Claimed(_)));
        assert!(registry.is_in_flight("src:DHL"));

        drop(ticket);
        assert!(!registry.is_in_flight("src:DHL"));
        assert!(registry.is_empty());
    }

    #[test]
    fn stale_marker_is_taken_over_and_old_ticket_cannot_clear_it() {
        let registry = JobRegistry::new("breakdown", Duration::ZERO);
        let old = match registry.try_claim("data") {
            Claim::Claimed(ticket) => ticket,
            Claim::InFlight => panic!("first claim must succeed"),
        };
        let new = match registry.try_claim("data") {
            Claim::Claimed(ticket) => ticket,
            Claim::InFlight => panic!("stale job should be taken over"),
        };

        drop(old);
        assert_eq!(registry.len(), 1);
        drop(new);
        assert!(registry.is_empty());
    }

    #[test]
    fn panicking_worker_releases_its_marker() {
        let registry = JobRegistry::new("detail", Duration::from_secs(600));
        let claim = registry.try_claim("src:DHL");
        let result = std::thread::spawn(move || {
            let _claim = claim;
            panic!("worker failed");
        })
        .join();

        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}
