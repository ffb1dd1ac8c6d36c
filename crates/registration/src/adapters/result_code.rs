use bulkreg_core::config::TargetConfig;
use bulkreg_core::{
    ConfigError, HttpMethod, Step, StepError, StepRequest, StepResponse, Token, TokenKind,
};

use super::{carry, country_code, gender_code, judge, Endpoints};
use crate::core::{Carried, SignupForm, SignupTarget};

/// Target that answers every exchange with a JSON result code and activates the
/// address through a link parameter.
pub struct ResultCodeTarget {
    config: TargetConfig,
    endpoints: Endpoints,
}

impl ResultCodeTarget {
    pub fn new(config: &TargetConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoints: Endpoints::from_config(config)?,
            config: config.clone(),
        })
    }

    fn token_param(&self) -> &str {
        match &self.config.token {
            TokenKind::LinkParameter { name, .. } => name,
            TokenKind::NumericCode { .. } => "authKey",
        }
    }

    fn profile_fields(&self, form: &SignupForm) -> Vec<(String, String)> {
        vec![
            ("email".to_string(), form.email.clone()),
            ("password".to_string(), form.password.clone()),
            ("firstName".to_string(), form.first_name.clone()),
            ("lastName".to_string(), form.last_name.clone()),
            ("nation".to_string(), country_code(&form.country).to_string()),
            ("birth".to_string(), form.birth_compact()),
            ("gender".to_string(), gender_code(&form.gender).to_string()),
        ]
    }
}

impl SignupTarget for ResultCodeTarget {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn token_kind(&self) -> &TokenKind {
        &self.config.token
    }

    fn mail_sender(&self) -> Option<&str> {
        self.config.mail_sender.as_deref()
    }

    fn requests(
        &self,
        step: Step,
        form: &SignupForm,
        token: Option<&Token>,
        carried: &Carried,
    ) -> Result<Vec<StepRequest>, StepError> {
        let mut out = Vec::new();
        match step {
            Step::VerifyEmail => {
                if let Some(landing) = &self.endpoints.landing {
                    out.push(StepRequest {
                        purpose: "landing",
                        method: HttpMethod::Get,
                        url: landing.clone(),
                        form: Vec::new(),
                    });
                }
                out.push(StepRequest {
                    purpose: "verify_email",
                    method: HttpMethod::Post,
                    url: self.endpoints.verify_email.clone(),
                    form: vec![("email".to_string(), form.email.clone())],
                });
            }
            Step::SubmitForm => {
                out.push(StepRequest {
                    purpose: "submit_form",
                    method: HttpMethod::Post,
                    url: self.endpoints.submit_form.clone(),
                    form: self.profile_fields(form),
                });
                if let Some(send_mail) = &self.endpoints.send_mail {
                    out.push(StepRequest {
                        purpose: "send_mail",
                        method: HttpMethod::Post,
                        url: send_mail.clone(),
                        form: vec![("email".to_string(), form.email.clone())],
                    });
                }
            }
            Step::Activate => {
                let token = token.ok_or_else(|| StepError::Request {
                    step,
                    reason: "activation needs a token".to_string(),
                })?;
                out.push(StepRequest {
                    purpose: "activate",
                    method: HttpMethod::Get,
                    url: self.endpoints.activate.clone(),
                    form: vec![
                        ("email".to_string(), form.email.clone()),
                        (self.token_param().to_string(), token.as_str().to_string()),
                    ],
                });
            }
            Step::Complete => {
                if let Some(complete) = &self.endpoints.complete {
                    let mut fields = self.profile_fields(form);
                    fields.extend(carried.iter().map(|(k, v)| (k.clone(), v.clone())));
                    out.push(StepRequest {
                        purpose: "complete",
                        method: HttpMethod::Post,
                        url: complete.clone(),
                        form: fields,
                    });
                }
            }
        }
        Ok(out)
    }

    fn check(&self, step: Step, request: &StepRequest, response: &StepResponse) -> Result<Carried, StepError> {
        match request.purpose {
            "landing" => judge(&self.config, step, response, &[])?,
            "verify_email" => judge(&self.config, step, response, &self.config.verify_codes)?,
            _ => judge(&self.config, step, response, &self.config.accept_codes)?,
        }
        Ok(carry(&self.config, &response.body))
    }
}
