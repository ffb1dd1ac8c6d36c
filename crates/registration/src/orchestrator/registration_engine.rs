use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use bulkreg_core::{
    AccountRecord, AttemptError, MailboxTransport, RegistrationTransport, Step, StepError, Token,
};
use bulkreg_storage::Ledger;

use crate::core::*;
use crate::poller::{await_token, PollOutcome, PollSettings};

/// Drives one attempt through its candidates, one signup per candidate, until one
/// registers or none are left
pub struct RegistrationEngine<T: RegistrationTransport, M: MailboxTransport> {
    target: Arc<dyn SignupTarget>,
    transport: Arc<T>,
    mailbox: Arc<M>,
    poll: PollSettings,
    ledger: Arc<Ledger>,
}

impl<T: RegistrationTransport, M: MailboxTransport> RegistrationEngine<T, M> {
    pub fn new(
        target: Arc<dyn SignupTarget>,
        transport: Arc<T>,
        mailbox: Arc<M>,
        poll: PollSettings,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            target,
            transport,
            mailbox,
            poll,
            ledger,
        }
    }

    pub fn target(&self) -> &dyn SignupTarget {
        self.target.as_ref()
    }

    /// Run the attempt to a terminal state. On success the account is already in the ledger.
    pub async fn run(&self, mut ctx: AttemptContext<T::Session>) -> Result<AttemptReport, AttemptError> {
        loop {
            let index = ctx.index;
            let Some(email) = ctx.current().map(|c| c.email.clone()) else {
                // only reachable with an empty list; `index` never passes the last candidate
                ctx.transition(AttemptState::Failed, Some("no candidate addresses".to_string()));
                return Err(AttemptError::CandidatesExhausted {
                    tried: 0,
                    reason: "no candidate addresses".to_string(),
                });
            };
            ctx.transition(AttemptState::CandidateSelected { index }, Some(email.clone()));
            info!(slot = ctx.slot.index, candidate = index + 1, email = %email, "trying candidate");

            match self.try_candidate(&mut ctx).await {
                Ok(()) => {
                    let record = AccountRecord {
                        email,
                        password: ctx.password.clone(),
                        name: ctx.name.clone(),
                        birthdate: ctx.slot.birthdate,
                        country: ctx.slot.country.clone(),
                        gender: ctx.slot.gender.clone(),
                        source: ctx.slot.source,
                        target: self.target.name().to_string(),
                        registered_at: Utc::now(),
                    };
                    let account = self.ledger.append_success(record);
                    let report = AttemptReport::new(account, ctx);
                    info!(slot_email = %report.account.email, "{}", report.summary());
                    return Ok(report);
                }
                Err(e) => {
                    warn!(slot = ctx.slot.index, email = %email, error = %e, "candidate abandoned");
                    ctx.abandon_candidate(e.to_string());
                    if ctx.has_next() {
                        ctx.index += 1;
                        continue;
                    }

                    let reason = ctx.abandonment_summary();
                    ctx.transition(AttemptState::Failed, Some(reason.clone()));
                    return Err(AttemptError::CandidatesExhausted {
                        tried: ctx.candidates.len(),
                        reason,
                    });
                }
            }
        }
    }

    /// Full signup for the current candidate over one session
    async fn try_candidate(&self, ctx: &mut AttemptContext<T::Session>) -> Result<(), StepError> {
        let candidate = ctx.candidates[ctx.index].clone();

        let session = self
            .transport
            .open_session()
            .await
            .map_err(|source| StepError::Transport { step: Step::VerifyEmail, source })?;
        ctx.session = Some(session);
        ctx.carried.clear();

        let form = SignupForm::new(
            candidate.email.clone(),
            ctx.password.clone(),
            ctx.name.clone(),
            ctx.slot.birthdate,
            ctx.slot.country.clone(),
            ctx.slot.gender.clone(),
        );

        let n = self.run_step(ctx, Step::VerifyEmail, &form, None).await?;
        ctx.transition(AttemptState::EmailVerified, Some(format!("{} exchange(s)", n)));

        let n = self.run_step(ctx, Step::SubmitForm, &form, None).await?;
        ctx.transition(AttemptState::FormSubmitted, Some(format!("{} exchange(s)", n)));

        let request = self.poll.request(
            self.target.mail_sender(),
            &candidate.email,
            self.target.token_kind().clone(),
        );
        let token = match await_token(self.mailbox.as_ref(), &candidate.mailbox, &request).await {
            PollOutcome::Token(token) => token,
            PollOutcome::TimedOut => {
                return Err(StepError::TokenNotFound { waited_secs: self.poll.timeout.as_secs() })
            }
            PollOutcome::ConnectionFailed(reason) => {
                warn!(mailbox = %candidate.mailbox.username, reason = %reason, "mailbox unreachable");
                return Err(StepError::MailboxUnavailable(reason));
            }
        };
        ctx.transition(AttemptState::TokenAwaited, Some("token received".to_string()));

        let n = self.run_step(ctx, Step::Activate, &form, Some(&token)).await?;
        ctx.transition(AttemptState::EmailActivated, Some(format!("{} exchange(s)", n)));

        let n = self.run_step(ctx, Step::Complete, &form, Some(&token)).await?;
        ctx.transition(AttemptState::RegistrationComplete, Some(format!("{} exchange(s)", n)));

        ctx.session = None;
        Ok(())
    }

    /// Send every exchange of `step` over the candidate's session
    async fn run_step(
        &self,
        ctx: &mut AttemptContext<T::Session>,
        step: Step,
        form: &SignupForm,
        token: Option<&Token>,
    ) -> Result<usize, StepError> {
        let requests = self.target.requests(step, form, token, &ctx.carried)?;
        for request in &requests {
            let session = ctx.session.as_mut().ok_or_else(|| StepError::Request {
                step,
                reason: "session closed".to_string(),
            })?;
            let response = self
                .transport
                .exchange(session, request)
                .await
                .map_err(|source| StepError::Transport { step, source })?;
            debug!(step = %step, purpose = request.purpose, status = response.status, "exchange");

            let captured = self.target.check(step, request, &response)?;
            ctx.carried.extend(captured);
        }
        Ok(requests.len())
    }
}
