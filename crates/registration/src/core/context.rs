use std::fmt;
use std::time::SystemTime;

use bulkreg_core::{Candidate, SlotInput};

use super::types::Carried;

/// States of one signup attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Initial,
    CandidateSelected { index: usize },
    EmailVerified,
    FormSubmitted,
    TokenAwaited,
    EmailActivated,
    RegistrationComplete,
    CandidateExhausted { index: usize },
    Failed,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Initial => write!(f, "Initial"),
            AttemptState::CandidateSelected { index } => write!(f, "CandidateSelected({})", index + 1),
            AttemptState::EmailVerified => write!(f, "EmailVerified"),
            AttemptState::FormSubmitted => write!(f, "FormSubmitted"),
            AttemptState::TokenAwaited => write!(f, "TokenAwaited"),
            AttemptState::EmailActivated => write!(f, "EmailActivated"),
            AttemptState::RegistrationComplete => write!(f, "RegistrationComplete"),
            AttemptState::CandidateExhausted { index } => write!(f, "CandidateExhausted({})", index + 1),
            AttemptState::Failed => write!(f, "Failed"),
        }
    }
}

/// Transition between states with timestamp and details
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: AttemptState,
    pub to: AttemptState,
    pub timestamp: SystemTime,
    pub details: Option<String>,
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)?;
        if let Some(details) = &self.details {
            write!(f, ": {}", details)?;
        }
        Ok(())
    }
}

/// Mutable state of one attempt. Owned by its task and dropped with it.
///
/// `session` holds the transport session of the current candidate only; it is
/// replaced when the next candidate is selected.
pub struct AttemptContext<S> {
    pub slot: SlotInput,
    pub name: String,
    pub password: String,
    pub candidates: Vec<Candidate>,
    pub index: usize,
    pub state: AttemptState,
    pub retry_count: u32,
    pub trail: Vec<StateTransition>,
    pub carried: Carried,
    pub session: Option<S>,
    pub started_at: SystemTime,
}

impl<S> AttemptContext<S> {
    pub fn new(slot: SlotInput, name: String, password: String, candidates: Vec<Candidate>) -> Self {
        Self {
            slot,
            name,
            password,
            candidates,
            index: 0,
            state: AttemptState::Initial,
            retry_count: 0,
            trail: Vec::new(),
            carried: Carried::new(),
            session: None,
            started_at: SystemTime::now(),
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: AttemptState, details: Option<String>) {
        let old_state = std::mem::replace(&mut self.state, new_state);
        self.trail.push(StateTransition {
            from: old_state,
            to: self.state.clone(),
            timestamp: SystemTime::now(),
            details,
        });
    }

    pub fn current(&self) -> Option<&Candidate> {
        self.candidates.get(self.index)
    }

    pub fn has_next(&self) -> bool {
        self.index + 1 < self.candidates.len()
    }

    /// Drop the current candidate's session and carried values, then move on
    pub fn abandon_candidate(&mut self, reason: String) {
        self.session = None;
        self.carried.clear();
        self.retry_count += 1;
        let index = self.index;
        self.transition(AttemptState::CandidateExhausted { index }, Some(reason));
    }

    /// Details of every abandoned candidate, joined for a failure reason
    pub fn abandonment_summary(&self) -> String {
        self.trail
            .iter()
            .filter_map(|t| match (&t.to, &t.details) {
                (AttemptState::CandidateExhausted { index }, Some(details)) => {
                    let email = self.candidates.get(*index).map(|c| c.email.as_str()).unwrap_or("?");
                    Some(format!("{}: {}", email, details))
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn duration(&self) -> std::time::Duration {
        self.started_at.elapsed().unwrap_or_default()
    }
}
