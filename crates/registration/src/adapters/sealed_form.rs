use bulkreg_core::config::TargetConfig;
use bulkreg_core::{
    ConfigError, HttpMethod, Step, StepError, StepRequest, StepResponse, Token, TokenKind,
};

use super::{carry, judge, Endpoints};
use crate::cipher::FieldCipher;
use crate::core::{Carried, SignupForm, SignupTarget};

/// Target that wants names, address and password sealed with the field cipher,
/// mails a numeric code, and rotates a hidden carry field between exchanges.
pub struct SealedFormTarget {
    config: TargetConfig,
    endpoints: Endpoints,
    cipher: FieldCipher,
}

impl SealedFormTarget {
    pub fn new(config: &TargetConfig, cipher: FieldCipher) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoints: Endpoints::from_config(config)?,
            config: config.clone(),
            cipher,
        })
    }

    /// Encrypted identity fields. Every call uses fresh salts.
    fn sealed_fields(&self, form: &SignupForm) -> Vec<(String, String)> {
        let password = self.cipher.encode(&form.password);
        vec![
            ("firstName".to_string(), self.cipher.encode(&form.first_name)),
            ("lastName".to_string(), self.cipher.encode(&form.last_name)),
            ("email".to_string(), self.cipher.encode(&form.email)),
            ("password".to_string(), password.clone()),
            ("rePassword".to_string(), password),
        ]
    }

    fn with_carried(&self, mut fields: Vec<(String, String)>, carried: &Carried) -> Vec<(String, String)> {
        if let Some(field) = &self.config.carry_field {
            if let Some(value) = carried.get(field) {
                fields.push((field.clone(), value.clone()));
            }
        }
        fields
    }

    fn require_token<'a>(&self, step: Step, token: Option<&'a Token>) -> Result<&'a Token, StepError> {
        token.ok_or_else(|| StepError::Request {
            step,
            reason: "no verification code".to_string(),
        })
    }
}

impl SignupTarget for SealedFormTarget {
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
                if self.config.carry_field.as_ref().is_some_and(|f| !carried.contains_key(f)) {
                    return Err(StepError::Request {
                        step,
                        reason: "landing page gave no carry field".to_string(),
                    });
                }
                let mut fields = self.sealed_fields(form);
                fields.push(("termsAgreement".to_string(), "Y".to_string()));
                out.push(StepRequest {
                    purpose: "submit_form",
                    method: HttpMethod::Post,
                    url: self.endpoints.submit_form.clone(),
                    form: self.with_carried(fields, carried),
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
                let token = self.require_token(step, token)?;
                out.push(StepRequest {
                    purpose: "activate",
                    method: HttpMethod::Post,
                    url: self.endpoints.activate.clone(),
                    form: vec![
                        ("email".to_string(), form.email.clone()),
                        ("authKey".to_string(), token.as_str().to_string()),
                    ],
                });
            }
            Step::Complete => {
                if let Some(complete) = &self.endpoints.complete {
                    let token = self.require_token(step, token)?;
                    let mut fields = self.sealed_fields(form);
                    fields.push(("authKey".to_string(), token.as_str().to_string()));
                    out.push(StepRequest {
                        purpose: "complete",
                        method: HttpMethod::Post,
                        url: complete.clone(),
                        form: self.with_carried(fields, carried),
                    });
                }
            }
        }
        Ok(out)
    }

    fn check(&self, step: Step, request: &StepRequest, response: &StepResponse) -> Result<Carried, StepError> {
        let accepted: &[String] = match request.purpose {
            "landing" => &[],
            "verify_email" => &self.config.verify_codes,
            _ => &self.config.accept_codes,
        };
        judge(&self.config, step, response, accepted)?;
        Ok(carry(&self.config, &response.body))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::config;
    use super::*;
    use chrono::NaiveDate;

    const EXTRA: &str = r#"
        cipher_key = "test-shared-secret"
        carry_field = "serverToken"
        send_mail_path = "send-mail"
        complete_path = "complete"
    "#;

    fn target() -> SealedFormTarget {
        SealedFormTarget::new(&config("sealed_form", EXTRA), FieldCipher::new("test-shared-secret")).unwrap()
    }

    fn form() -> SignupForm {
        SignupForm::new(
            "someone@mail.test".into(),
            "Pw!1abcdEFGH".into(),
            "Fan Zijian".into(),
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            "China".into(),
            "m".into(),
        )
    }

    fn field<'a>(req: &'a StepRequest, name: &str) -> &'a str {
        req.form.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str()).unwrap()
    }

    #[test]
    fn test_submit_seals_identity_and_echoes_carry_field() {
        let target = target();
        let mut carried = Carried::new();
        carried.insert("serverToken".into(), "srv-1".into());

        let reqs = target.requests(Step::SubmitForm, &form(), None, &carried).unwrap();
        let submit = &reqs[0];
        let cipher = FieldCipher::new("test-shared-secret");

        assert_ne!(field(submit, "email"), "someone@mail.test");
        assert_eq!(cipher.decode(field(submit, "email")).unwrap(), "someone@mail.test");
        assert_eq!(cipher.decode(field(submit, "lastName")).unwrap(), "Zijian");
        assert_eq!(field(submit, "password"), field(submit, "rePassword"));
        assert_eq!(field(submit, "serverToken"), "srv-1");
        assert_eq!(reqs[1].purpose, "send_mail");
    }

    #[test]
    fn test_submit_without_carry_field_is_a_step_error() {
        let result = target().requests(Step::SubmitForm, &form(), None, &Carried::new());
        assert!(matches!(result, Err(StepError::Request { step: Step::SubmitForm, .. })));
    }

    #[test]
    fn test_activation_response_rotates_carry_field() {
        let target = target();
        let token = Token("482913".into());
        let reqs = target.requests(Step::Activate, &form(), Some(&token), &Carried::new()).unwrap();
        assert_eq!(field(&reqs[0], "authKey"), "482913");

        let resp = StepResponse {
            status: 200,
            body: r#"{"ResultCode":"00","serverToken":"srv-2"}"#.to_string(),
        };
        let carried = target.check(Step::Activate, &reqs[0], &resp).unwrap();
        assert_eq!(carried.get("serverToken").map(String::as_str), Some("srv-2"));
    }

    #[test]
    fn test_complete_sends_plain_code() {
        let target = target();
        let token = Token("482913".into());
        let mut carried = Carried::new();
        carried.insert("serverToken".into(), "srv-2".into());
        let reqs = target.requests(Step::Complete, &form(), Some(&token), &carried).unwrap();
        assert_eq!(field(&reqs[0], "authKey"), "482913");
        assert_eq!(field(&reqs[0], "serverToken"), "srv-2");
    }
}
