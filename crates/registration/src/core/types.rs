use std::collections::HashMap;

use chrono::NaiveDate;

use bulkreg_core::{Step, StepError, StepRequest, StepResponse, Token, TokenKind};

/// Values a target hands back that later requests must echo (hidden tokens and the like)
pub type Carried = HashMap<String, String>;

/// Personal fields of one candidate as they are sent to a target
#[derive(Debug, Clone)]
pub struct SignupForm {
    pub email: String,
    pub password: String,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub birthdate: NaiveDate,
    pub country: String,
    pub gender: String,
}

impl SignupForm {
    pub fn new(
        email: String,
        password: String,
        name: String,
        birthdate: NaiveDate,
        country: String,
        gender: String,
    ) -> Self {
        let mut words = name.split_whitespace();
        let first_name = words.next().unwrap_or("Test").to_string();
        let last_name = words.last().unwrap_or("User").to_string();
        Self {
            email,
            password,
            name,
            first_name,
            last_name,
            birthdate,
            country,
            gender,
        }
    }

    /// Birthdate as `YYYYMMDD`
    pub fn birth_compact(&self) -> String {
        self.birthdate.format("%Y%m%d").to_string()
    }
}

/// Protocol of one registration site.
///
/// The engine asks for the exchanges of each step, sends them over the candidate's
/// session in order, and lets the target judge every response.
pub trait SignupTarget: Send + Sync {
    fn name(&self) -> &str;

    fn token_kind(&self) -> &TokenKind;

    /// Sender address of the verification mail, used to narrow the mailbox search
    fn mail_sender(&self) -> Option<&str>;

    /// Exchanges for `step`. An empty list means the target has no such step.
    fn requests(
        &self,
        step: Step,
        form: &SignupForm,
        token: Option<&Token>,
        carried: &Carried,
    ) -> Result<Vec<StepRequest>, StepError>;

    /// Judge a response. Returned values are merged into the candidate's carried state.
    fn check(&self, step: Step, request: &StepRequest, response: &StepResponse) -> Result<Carried, StepError>;
}
