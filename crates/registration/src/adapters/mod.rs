mod result_code;
mod sealed_form;

pub use result_code::ResultCodeTarget;
pub use sealed_form::SealedFormTarget;

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use bulkreg_core::config::{TargetConfig, TargetKind};
use bulkreg_core::{ConfigError, Step, StepError, StepResponse};

use crate::cipher::FieldCipher;
use crate::core::{Carried, SignupTarget};

static ALERT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"alert\(\s*['"]([^'"]*)['"]"#).unwrap());

pub fn build_target(config: &TargetConfig) -> Result<Arc<dyn SignupTarget>, ConfigError> {
    match config.kind {
        TargetKind::ResultCode => Ok(Arc::new(ResultCodeTarget::new(config)?)),
        TargetKind::SealedForm => {
            if config.cipher_key.is_empty() {
                return Err(ConfigError::Invalid("sealed_form target needs cipher_key".into()));
            }
            let cipher = FieldCipher::new(&config.cipher_key);
            Ok(Arc::new(SealedFormTarget::new(config, cipher)?))
        }
    }
}

/// Resolved URLs of a target's exchanges
#[derive(Debug, Clone)]
pub(crate) struct Endpoints {
    pub landing: Option<Url>,
    pub verify_email: Url,
    pub submit_form: Url,
    pub send_mail: Option<Url>,
    pub activate: Url,
    pub complete: Option<Url>,
}

impl Endpoints {
    pub fn from_config(config: &TargetConfig) -> Result<Self, ConfigError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| ConfigError::Invalid(format!("target.base_url: {}", e)))?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| ConfigError::Invalid(format!("target path {}: {}", path, e)))
        };
        let join_opt = |path: &Option<String>| path.as_deref().map(|p| join(p)).transpose();

        Ok(Self {
            landing: join_opt(&config.landing_path)?,
            verify_email: join(&config.verify_email_path)?,
            submit_form: join(&config.submit_form_path)?,
            send_mail: join_opt(&config.send_mail_path)?,
            activate: join(&config.activate_path)?,
            complete: join_opt(&config.complete_path)?,
        })
    }
}

/// Shared response rules: non-2xx is a rejection, a JSON body must carry an accepted
/// result code, an HTML body must not contain any rejection marker.
pub(crate) fn judge(
    config: &TargetConfig,
    step: Step,
    response: &StepResponse,
    accepted: &[String],
) -> Result<(), StepError> {
    if !response.is_success() {
        return Err(StepError::RejectedByTarget {
            step,
            code: format!("HTTP {}", response.status),
            message: snippet(&response.body),
        });
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&response.body) {
        if let Some(code) = json.get(&config.result_code_field) {
            let code = match code {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !accepted.iter().any(|a| *a == code) {
                let message = json
                    .get(&config.result_message_field)
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string();
                return Err(StepError::RejectedByTarget { step, code, message });
            }
            return Ok(());
        }
    }

    if let Some(marker) = config
        .rejection_markers
        .iter()
        .find(|m| !m.is_empty() && response.body.contains(m.as_str()))
    {
        let message = ALERT_RE
            .captures(&response.body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| marker.clone());
        return Err(StepError::RejectedByTarget { step, code: "marker".to_string(), message });
    }
    Ok(())
}

/// Value of a hidden field in an HTML or JSON response
pub(crate) fn find_carried(body: &str, field: &str) -> Option<String> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(value) = json.get(field).and_then(|v| v.as_str()) {
            return Some(value.to_string());
        }
    }

    let name = regex::escape(field);
    let patterns = [
        // <input type="hidden" name="field" value="...">
        format!(r#"(?s)name\s*[=:]\s*['"]{}['"][^>]{{0,120}}?value\s*[=:]\s*['"]([^'"]+)['"]"#, name),
        // value before name
        format!(r#"(?s)value\s*[=:]\s*['"]([^'"]+)['"][^>]{{0,120}}?name\s*[=:]\s*['"]{}['"]"#, name),
        // "field": "..." inside a script
        format!(r#"['"]{}['"]\s*:\s*['"]([^'"]+)['"]"#, name),
    ];
    patterns.iter().find_map(|p| {
        Regex::new(p)
            .ok()
            .and_then(|re| re.captures(body))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

pub(crate) fn carry(config: &TargetConfig, body: &str) -> Carried {
    let mut carried = Carried::new();
    if let Some(field) = &config.carry_field {
        if let Some(value) = find_carried(body, field) {
            carried.insert(field.clone(), value);
        }
    }
    carried
}

/// Two-letter gender code most signup forms expect
pub fn gender_code(gender: &str) -> &'static str {
    match gender.trim().to_lowercase().as_str() {
        "f" | "female" | "woman" | "女" | "女性" | "여" | "여성" => "f",
        _ => "m",
    }
}

/// International dialling code used as a nation id
pub fn country_code(country: &str) -> u32 {
    match country.trim() {
        "USA" | "United States" | "Canada" | "美国" | "加拿大" => 1,
        "France" | "法国" => 33,
        "UK" | "United Kingdom" | "英国" => 44,
        "Germany" | "德国" => 49,
        "Australia" | "澳大利亚" => 61,
        "Japan" | "日本" => 81,
        "Korea" | "South Korea" | "韩国" | "한국" => 82,
        _ => 43,
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(120).collect()
}
