use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use bulkreg_core::{AccountRecord, FailureRecord};

/// Append-only record of a run's outcomes.
///
/// Both sequences and the success counter sit behind one lock, so every snapshot sees
/// them in agreement. Records are handed out as `Arc` and never mutated afterwards.
#[derive(Debug, Default)]
pub struct Ledger {
    state: RwLock<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    successes: Vec<Arc<AccountRecord>>,
    failures: Vec<Arc<FailureRecord>>,
    success_count: usize,
}

/// Point-in-time copy of the ledger
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerSnapshot {
    pub successes: Vec<Arc<AccountRecord>>,
    pub failures: Vec<Arc<FailureRecord>>,
    pub success_count: usize,
}

impl LedgerSnapshot {
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_success(&self, record: AccountRecord) -> Arc<AccountRecord> {
        let record = Arc::new(record);
        let mut state = self.state.write();
        state.successes.push(Arc::clone(&record));
        state.success_count += 1;
        debug!(email = %record.email, success_count = state.success_count, "ledger_success");
        record
    }

    pub fn append_failure(&self, record: FailureRecord) -> Arc<FailureRecord> {
        let record = Arc::new(record);
        let mut state = self.state.write();
        state.failures.push(Arc::clone(&record));
        debug!(slot = record.slot, failures = state.failures.len(), "ledger_failure");
        record
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.read();
        LedgerSnapshot {
            successes: state.successes.clone(),
            failures: state.failures.clone(),
            success_count: state.success_count,
        }
    }

    pub fn success_count(&self) -> usize {
        self.state.read().success_count
    }

    pub fn len(&self) -> usize {
        let state = self.state.read();
        state.successes.len() + state.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all records. Snapshots taken earlier keep their records.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.successes.clear();
        state.failures.clear();
        state.success_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkreg_core::{FailureKind, SourceType};
    use chrono::{NaiveDate, Utc};

    fn account(email: &str) -> AccountRecord {
        AccountRecord {
            email: email.to_string(),
            password: "Pw!12345abcd".to_string(),
            name: "Park Jisoo".to_string(),
            birthdate: NaiveDate::from_ymd_opt(2001, 3, 9).unwrap(),
            country: "Korea".to_string(),
            gender: "f".to_string(),
            source: SourceType::Generated,
            target: "demo".to_string(),
            registered_at: Utc::now(),
        }
    }

    fn failure(slot: usize) -> FailureRecord {
        FailureRecord {
            slot,
            name: None,
            birthdate: NaiveDate::from_ymd_opt(2001, 3, 9).unwrap(),
            country: "Korea".to_string(),
            gender: "f".to_string(),
            source: SourceType::Generated,
            kind: FailureKind::CandidatesExhausted,
            reason: "all candidates failed".to_string(),
            failed_at: Utc::now(),
        }
    }

    #[test]
    fn test_counter_tracks_successes() {
        let ledger = Ledger::new();
        ledger.append_success(account("a@x.test"));
        ledger.append_failure(failure(2));
        ledger.append_success(account("b@x.test"));

        let snap = ledger.snapshot();
        assert_eq!(snap.success_count, 2);
        assert_eq!(snap.successes.len(), snap.success_count);
        assert_eq!(snap.failures.len(), 1);
        assert_eq!(snap.total(), 3);
        assert_eq!(ledger.success_count(), 2);
    }

    #[test]
    fn test_snapshot_records_keep_identity() {
        let ledger = Ledger::new();
        let first = ledger.append_success(account("a@x.test"));
        let before = ledger.snapshot();

        ledger.append_success(account("b@x.test"));
        ledger.append_failure(failure(3));
        let after = ledger.snapshot();

        assert!(Arc::ptr_eq(&before.successes[0], &first));
        assert!(Arc::ptr_eq(&after.successes[0], &first));
        assert_eq!(*after.successes[0], account_with_time("a@x.test", &first));
        assert_eq!(before.total(), 1);
    }

    fn account_with_time(email: &str, like: &AccountRecord) -> AccountRecord {
        AccountRecord { registered_at: like.registered_at, ..account(email) }
    }

    #[test]
    fn test_clear_keeps_old_snapshots() {
        let ledger = Ledger::new();
        ledger.append_success(account("a@x.test"));
        let snap = ledger.snapshot();

        ledger.clear();
        assert!(ledger.is_empty());
        assert_eq!(ledger.success_count(), 0);
        assert_eq!(snap.successes.len(), 1);
    }

    #[test]
    fn test_concurrent_appends() {
        let ledger = Ledger::new();
        std::thread::scope(|s| {
            for t in 0..8 {
                let ledger = &ledger;
                s.spawn(move || {
                    for i in 0..50 {
                        if i % 5 == 0 {
                            ledger.append_failure(failure(t * 100 + i));
                        } else {
                            ledger.append_success(account(&format!("{}-{}@x.test", t, i)));
                        }
                        let snap = ledger.snapshot();
                        assert_eq!(snap.successes.len(), snap.success_count);
                    }
                });
            }
        });

        let snap = ledger.snapshot();
        assert_eq!(snap.total(), 400);
        assert_eq!(snap.success_count, 320);
        assert_eq!(snap.failures.len(), 80);
    }

    #[test]
    fn test_snapshot_serializes() {
        let ledger = Ledger::new();
        ledger.append_success(account("a@x.test"));
        let json = ledger.snapshot().to_json().unwrap();
        assert!(json.contains("\"email\": \"a@x.test\""));
        assert!(json.contains("\"source\": \"generated\""));
    }
}
