use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use bulkreg_core::config::MailboxConfig;
use bulkreg_core::{
    AccountRequest, AttemptError, Candidate, ConfigError, FailureKind, FailureRecord,
    MailboxTransport, RegistrationTransport, SlotInput,
};
use bulkreg_storage::{Ledger, LedgerSnapshot};

use crate::core::AttemptContext;
use crate::generator::CandidateGenerator;
use crate::orchestrator::RegistrationEngine;

/// Settings for building each attempt's candidate list
#[derive(Debug, Clone)]
pub struct AutoRegisterConfig {
    /// Length of each attempt's fallback list
    pub candidates_per_attempt: usize,
    /// Collector mailbox for generated addresses; also the TLS policy for own mailboxes
    pub mailbox: MailboxConfig,
}

/// Progress after one slot reached a terminal record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunProgress {
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }
}

pub type ProgressFn = Arc<dyn Fn(RunProgress) + Send + Sync>;

#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("run aborted: {0}")]
    Aborted(String),
}

#[derive(Default)]
struct Counters {
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

/// Bounded pool that runs one attempt per requested account and feeds the ledger
pub struct AutoRegister<T: RegistrationTransport, M: MailboxTransport> {
    engine: Arc<RegistrationEngine<T, M>>,
    generator: Arc<dyn CandidateGenerator>,
    ledger: Arc<Ledger>,
    config: AutoRegisterConfig,
}

/// A run started with [`AutoRegister::start_run`]
pub struct RunHandle {
    handle: JoinHandle<Result<LedgerSnapshot, RunError>>,
}

impl RunHandle {
    /// Wait for every slot to finish and return the final snapshot
    pub async fn wait(self) -> Result<LedgerSnapshot, RunError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(RunError::Aborted(e.to_string())),
        }
    }
}

impl<T: RegistrationTransport, M: MailboxTransport> AutoRegister<T, M> {
    pub fn new(
        engine: Arc<RegistrationEngine<T, M>>,
        generator: Arc<dyn CandidateGenerator>,
        ledger: Arc<Ledger>,
        config: AutoRegisterConfig,
    ) -> Self {
        Self {
            engine,
            generator,
            ledger,
            config,
        }
    }

    /// Current ledger contents; safe to call mid-run
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    /// Spawn a run in the background
    pub fn start_run(self: &Arc<Self>, request: AccountRequest, progress: Option<ProgressFn>) -> RunHandle {
        let this = Arc::clone(self);
        RunHandle {
            handle: tokio::spawn(async move { this.run(request, progress).await }),
        }
    }

    /// Run every slot of `request` to a terminal record.
    ///
    /// Per-slot failures never surface here; they are failure records in the snapshot.
    pub async fn run(
        &self,
        request: AccountRequest,
        progress: Option<ProgressFn>,
    ) -> Result<LedgerSnapshot, RunError> {
        let slots = request.slots();
        validate(&request, &slots)?;

        let total = slots.len();
        info!(
            total,
            concurrency = request.concurrency,
            target = self.engine.target().name(),
            "starting registration run"
        );

        self.ledger.clear();
        let used: Arc<DashSet<String>> = Arc::new(DashSet::new());
        let counters = Arc::new(Counters::default());
        let semaphore = Arc::new(Semaphore::new(request.concurrency));
        let mut handles: Vec<(SlotInput, JoinHandle<()>)> = Vec::with_capacity(total);

        for slot in slots {
            // A context only exists once its permit is held
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| RunError::Aborted(e.to_string()))?;

            let engine = Arc::clone(&self.engine);
            let generator = Arc::clone(&self.generator);
            let config = self.config.clone();
            let used = Arc::clone(&used);
            let domain = request.email_domain.clone();
            let ledger = Arc::clone(&self.ledger);
            let counters = Arc::clone(&counters);
            let progress = progress.clone();
            let task_slot = slot.clone();

            let handle = tokio::spawn(async move {
                // candidate generation panics are contained with the attempt
                let outcome = AssertUnwindSafe(async {
                    let context = prepare_context(
                        generator.as_ref(),
                        &config,
                        &task_slot,
                        domain.as_deref(),
                        &used,
                    );
                    engine.run(context).await
                })
                .catch_unwind()
                .await;
                drop(permit);

                let succeeded = match outcome {
                    Ok(Ok(_report)) => true,
                    Ok(Err(e)) => {
                        warn!(slot = task_slot.index, error = %e, "attempt failed");
                        ledger.append_failure(failure_for(&task_slot, &e));
                        false
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!(slot = task_slot.index, panic = %message, "attempt panicked");
                        ledger.append_failure(FailureRecord::for_slot(
                            &task_slot,
                            FailureKind::UnexpectedException,
                            message,
                        ));
                        false
                    }
                };

                report(&counters, succeeded, total, progress.as_ref());
            });
            handles.push((slot, handle));
        }

        for (slot, handle) in handles {
            if let Err(e) = handle.await {
                // the task died before recording its slot
                error!(slot = slot.index, error = %e, "attempt task lost");
                self.ledger.append_failure(FailureRecord::for_slot(
                    &slot,
                    FailureKind::UnexpectedException,
                    e.to_string(),
                ));
                report(&counters, false, total, progress.as_ref());
            }
        }

        let snapshot = self.ledger.snapshot();
        info!(
            succeeded = snapshot.successes.len(),
            failed = snapshot.failures.len(),
            total,
            "registration run finished"
        );
        Ok(snapshot)
    }
}

/// Identity, password and ranked candidates for one slot
fn prepare_context<S>(
    generator: &dyn CandidateGenerator,
    config: &AutoRegisterConfig,
    slot: &SlotInput,
    domain: Option<&str>,
    used: &DashSet<String>,
) -> AttemptContext<S> {
    let candidates = candidates(generator, config, slot, domain, used);
    let name = slot.name.clone().unwrap_or_else(|| generator.display_name());
    AttemptContext::new(slot.clone(), name, generator.password(), candidates)
}

/// Ranked fallback list: the slot's own mailbox first, then fresh catch-all addresses
fn candidates(
    generator: &dyn CandidateGenerator,
    config: &AutoRegisterConfig,
    slot: &SlotInput,
    domain: Option<&str>,
    used: &DashSet<String>,
) -> Vec<Candidate> {
    let limit = config.candidates_per_attempt.max(1);
    let mut candidates = Vec::with_capacity(limit);

    if let Some(own) = &slot.own_mailbox {
        used.insert(own.email.to_lowercase());
        candidates.push(Candidate {
            email: own.email.clone(),
            mailbox: config.mailbox.credentials_for(&own.email, &own.password),
        });
    }

    if let Some(domain) = domain {
        let collector = config.mailbox.credentials();
        while candidates.len() < limit {
            candidates.push(Candidate {
                email: generator.email(domain, used),
                mailbox: collector.clone(),
            });
        }
    }
    candidates
}

fn validate(request: &AccountRequest, slots: &[SlotInput]) -> Result<(), ConfigError> {
    if slots.is_empty() {
        return Err(ConfigError::Invalid("account count must be at least 1".into()));
    }
    if request.concurrency == 0 {
        return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
    }
    let has_domain = request.email_domain.as_deref().is_some_and(|d| !d.trim().is_empty());
    if !has_domain && slots.iter().any(|s| s.own_mailbox.is_none()) {
        return Err(ConfigError::Invalid(
            "an email domain is required for slots without their own mailbox".into(),
        ));
    }
    Ok(())
}

fn failure_for(slot: &SlotInput, error: &AttemptError) -> FailureRecord {
    let kind = match error {
        AttemptError::CandidatesExhausted { .. } => FailureKind::CandidatesExhausted,
        AttemptError::Unexpected(_) => FailureKind::UnexpectedException,
    };
    FailureRecord::for_slot(slot, kind, error.to_string())
}

fn report(counters: &Counters, succeeded: bool, total: usize, progress: Option<&ProgressFn>) {
    if succeeded {
        counters.succeeded.fetch_add(1, Ordering::SeqCst);
    } else {
        counters.failed.fetch_add(1, Ordering::SeqCst);
    }
    let completed = counters.completed.fetch_add(1, Ordering::SeqCst) + 1;

    if let Some(callback) = progress {
        let snapshot = RunProgress {
            completed,
            total,
            succeeded: counters.succeeded.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
        };
        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
            warn!(completed, "progress callback panicked");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::build_target;
    use crate::generator::RandomCandidateGenerator;
    use crate::testing::*;
    use bulkreg_core::{IdentitySource, IdentityTemplate, ImportedIdentity};
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    fn mailbox_config() -> MailboxConfig {
        toml::from_str(
            r#"
            host = "imap.catch.test"
            username = "collector@catch.test"
            password = "collector-secret"
            "#,
        )
        .unwrap()
    }

    fn orchestrator(
        transport: &MockTransport,
        mailbox: &MockMailbox,
        candidates_per_attempt: usize,
    ) -> Arc<AutoRegister<MockTransport, MockMailbox>> {
        let ledger = Arc::new(Ledger::new());
        let engine = RegistrationEngine::new(
            build_target(&target_config()).unwrap(),
            Arc::new(transport.clone()),
            Arc::new(mailbox.clone()),
            poll_settings(1000, 20),
            Arc::clone(&ledger),
        );
        Arc::new(AutoRegister::new(
            Arc::new(engine),
            Arc::new(RandomCandidateGenerator::default()),
            ledger,
            AutoRegisterConfig {
                candidates_per_attempt,
                mailbox: mailbox_config(),
            },
        ))
    }

    fn generated(count: usize, concurrency: usize) -> AccountRequest {
        AccountRequest {
            identities: IdentitySource::Generated {
                template: IdentityTemplate {
                    name: None,
                    birthdate: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
                    country: "Korea".to_string(),
                    gender: "m".to_string(),
                },
                count,
            },
            email_domain: Some("catch.test".to_string()),
            concurrency,
        }
    }

    #[tokio::test]
    async fn test_all_accepted_run() {
        let mailbox = MockMailbox::new();
        let transport = MockTransport::new(&mailbox);
        let auto = orchestrator(&transport, &mailbox, 2);

        let snapshot = auto.run(generated(3, 2), None).await.unwrap();

        assert_eq!(snapshot.successes.len(), 3);
        assert!(snapshot.failures.is_empty());
        assert_eq!(snapshot.success_count, 3);
        let emails: HashSet<_> = snapshot.successes.iter().map(|r| r.email.clone()).collect();
        assert_eq!(emails.len(), 3);
        assert!(snapshot.successes.iter().all(|r| r.name.split_whitespace().count() >= 2));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mailbox = MockMailbox::new();
        let transport = MockTransport::new(&mailbox).with_delay(Duration::from_millis(20));
        let auto = orchestrator(&transport, &mailbox, 1);

        let snapshot = auto.run(generated(6, 2), None).await.unwrap();

        assert_eq!(snapshot.successes.len(), 6);
        assert!(transport.peak_live_sessions() <= 2, "peak {}", transport.peak_live_sessions());
        assert!(transport.peak_live_sessions() >= 1);
    }

    #[tokio::test]
    async fn test_panicking_attempt_is_isolated() {
        let mailbox = MockMailbox::new();
        let transport = MockTransport::new(&mailbox).panic_for("boom");
        let ledger = Arc::new(Ledger::new());
        let engine = RegistrationEngine::new(
            build_target(&target_config()).unwrap(),
            Arc::new(transport.clone()),
            Arc::new(mailbox.clone()),
            poll_settings(1000, 20),
            Arc::clone(&ledger),
        );
        let auto = AutoRegister::new(
            Arc::new(engine),
            Arc::new(RandomCandidateGenerator::default()),
            ledger,
            AutoRegisterConfig { candidates_per_attempt: 1, mailbox: mailbox_config() },
        );

        let row = |name: &str, email: &str| ImportedIdentity {
            name: name.to_string(),
            birthdate: NaiveDate::from_ymd_opt(1990, 3, 3).unwrap(),
            country: "Korea".to_string(),
            gender: "f".to_string(),
            email: Some(email.to_string()),
            mailbox_password: Some("app-secret".to_string()),
        };
        let request = AccountRequest {
            identities: IdentitySource::Imported(vec![
                row("Kim Minji", "minji@catch.test"),
                row("Park Boom", "boom@catch.test"),
                row("Lee Jun", "jun@catch.test"),
            ]),
            email_domain: None,
            concurrency: 3,
        };

        let snapshot = auto.run(request, None).await.unwrap();

        assert_eq!(snapshot.total(), 3);
        assert_eq!(snapshot.successes.len(), 2);
        assert_eq!(snapshot.failures.len(), 1);
        let failure = &snapshot.failures[0];
        assert_eq!(failure.slot, 2);
        assert_eq!(failure.kind, FailureKind::UnexpectedException);
        assert!(failure.reason.contains("boom@catch.test"));
        assert_eq!(failure.name.as_deref(), Some("Park Boom"));
    }

    /// Fails on the second address it is asked for
    struct FlakyGenerator {
        calls: AtomicUsize,
        inner: RandomCandidateGenerator,
    }

    impl CandidateGenerator for FlakyGenerator {
        fn email(&self, domain: &str, used: &DashSet<String>) -> String {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                panic!("address pool corrupted");
            }
            self.inner.email(domain, used)
        }

        fn password(&self) -> String {
            self.inner.password()
        }

        fn display_name(&self) -> String {
            self.inner.display_name()
        }
    }

    #[tokio::test]
    async fn test_generator_panic_is_isolated() {
        let mailbox = MockMailbox::new();
        let transport = MockTransport::new(&mailbox);
        let ledger = Arc::new(Ledger::new());
        let engine = RegistrationEngine::new(
            build_target(&target_config()).unwrap(),
            Arc::new(transport.clone()),
            Arc::new(mailbox.clone()),
            poll_settings(1000, 20),
            Arc::clone(&ledger),
        );
        let generator = FlakyGenerator {
            calls: AtomicUsize::new(0),
            inner: RandomCandidateGenerator::default(),
        };
        let auto = Arc::new(AutoRegister::new(
            Arc::new(engine),
            Arc::new(generator),
            ledger,
            AutoRegisterConfig { candidates_per_attempt: 1, mailbox: mailbox_config() },
        ));

        let snapshot = auto.start_run(generated(3, 2), None).wait().await.unwrap();

        assert_eq!(snapshot.total(), 3);
        assert_eq!(snapshot.successes.len(), 2);
        assert_eq!(snapshot.failures.len(), 1);
        let failure = &snapshot.failures[0];
        assert_eq!(failure.kind, FailureKind::UnexpectedException);
        assert!(failure.reason.contains("address pool corrupted"), "{}", failure.reason);
        assert!((1..=3).contains(&failure.slot));
    }

    #[tokio::test]
    async fn test_exhausted_slots_become_failures() {
        let mailbox = MockMailbox::new();
        let transport = MockTransport::new(&mailbox).reject_every("verify_email", "01");
        let auto = orchestrator(&transport, &mailbox, 3);

        let snapshot = auto.run(generated(4, 2), None).await.unwrap();

        assert_eq!(snapshot.total(), 4);
        assert!(snapshot.successes.is_empty());
        assert!(snapshot.failures.iter().all(|f| f.kind == FailureKind::CandidatesExhausted));
        assert_eq!(transport.calls_for("verify_email"), 12);
        let mut slots: Vec<_> = snapshot.failures.iter().map(|f| f.slot).collect();
        slots.sort();
        assert_eq!(slots, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_own_mailbox_is_tried_first() {
        let mailbox = MockMailbox::new();
        let transport = MockTransport::new(&mailbox).reject("verify_email", "mine@catch.test", "01");
        let auto = orchestrator(&transport, &mailbox, 2);

        let request = AccountRequest {
            identities: IdentitySource::Imported(vec![ImportedIdentity {
                name: "Kim Minji".to_string(),
                birthdate: NaiveDate::from_ymd_opt(1999, 5, 4).unwrap(),
                country: "Korea".to_string(),
                gender: "f".to_string(),
                email: Some("mine@catch.test".to_string()),
                mailbox_password: Some("app-secret".to_string()),
            }]),
            email_domain: Some("catch.test".to_string()),
            concurrency: 1,
        };

        let snapshot = auto.run(request, None).await.unwrap();
        let calls = transport.calls();
        assert_eq!(calls[0].email.as_deref(), Some("mine@catch.test"));
        assert_eq!(snapshot.successes.len(), 1);
        assert_ne!(snapshot.successes[0].email, "mine@catch.test");
        assert_eq!(snapshot.successes[0].name, "Kim Minji");
    }

    #[tokio::test]
    async fn test_progress_reaches_total() {
        let mailbox = MockMailbox::new();
        let transport = MockTransport::new(&mailbox);
        let auto = orchestrator(&transport, &mailbox, 1);

        let seen: Arc<Mutex<Vec<RunProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: ProgressFn = Arc::new(move |p| sink.lock().unwrap().push(p));

        let handle = auto.start_run(generated(5, 2), Some(progress));
        let snapshot = handle.wait().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        let last = seen.iter().max_by_key(|p| p.completed).unwrap();
        assert_eq!(last.completed, 5);
        assert_eq!(last.total, 5);
        assert_eq!(last.succeeded + last.failed, 5);
        assert_eq!(snapshot.total(), 5);
        assert_eq!(auto.snapshot().total(), 5);
    }

    #[tokio::test]
    async fn test_rejects_invalid_requests() {
        let mailbox = MockMailbox::new();
        let transport = MockTransport::new(&mailbox);
        let auto = orchestrator(&transport, &mailbox, 1);

        assert!(matches!(auto.run(generated(0, 2), None).await, Err(RunError::Config(_))));
        assert!(matches!(auto.run(generated(2, 0), None).await, Err(RunError::Config(_))));

        let mut no_domain = generated(1, 1);
        no_domain.email_domain = None;
        assert!(matches!(auto.run(no_domain, None).await, Err(RunError::Config(_))));
        assert_eq!(transport.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_ledger_cleared_between_runs() {
        let mailbox = MockMailbox::new();
        let transport = MockTransport::new(&mailbox);
        let auto = orchestrator(&transport, &mailbox, 1);

        let first = auto.run(generated(2, 2), None).await.unwrap();
        let second = auto.run(generated(1, 1), None).await.unwrap();

        assert_eq!(first.total(), 2);
        assert_eq!(second.total(), 1);
        assert_eq!(auto.snapshot().success_count, 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("bad state");
        assert_eq!(panic_message(payload.as_ref()), "panic: bad state");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "panic: owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "panic with non-string payload");
    }
}
