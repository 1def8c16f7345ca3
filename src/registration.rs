//! Multi-step registration wizard.
//!
//! The wizard walks `Account -> Profile -> Review`. `advance` validates only
//! the current step and reports every invalid field at once, so a form can
//! highlight all problems in one pass. `finish` is only allowed from the
//! review step and produces the normalized request handed to
//! `home_setup::create_profile`.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::errors::RegistrationError;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

const MIN_PASSWORD_LEN: usize = 8;
const NAME_LEN: std::ops::RangeInclusive<usize> = 2..=60;
const PHONE_DIGITS: std::ops::RangeInclusive<usize> = 7..=15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationStep {
    Account,
    Profile,
    Review,
}

impl RegistrationStep {
    fn next(self) -> Self {
        match self {
            Self::Account => Self::Profile,
            Self::Profile | Self::Review => Self::Review,
        }
    }

    fn previous(self) -> Self {
        match self {
            Self::Account | Self::Profile => Self::Account,
            Self::Review => Self::Profile,
        }
    }
}

impl fmt::Display for RegistrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Account => "account",
            Self::Profile => "profile",
            Self::Review => "review",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Email,
    Password,
    ConfirmPassword,
    FullName,
    Phone,
}

/// Raw form input as typed by the user.
#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub full_name: String,
    pub phone: Option<String>,
}

/// Validated, normalized registration data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// Trimmed and lowercased
    pub email: String,
    pub password: String,
    /// Trimmed
    pub full_name: String,
    /// Digits only, with a leading `+` kept if one was given
    pub phone: Option<String>,
}

/// Strip spaces, dashes and parentheses. Returns `None` if anything other
/// than digits (after an optional leading `+`) remains or the digit count
/// is out of range.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let (plus, digits) = match cleaned.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", cleaned.as_str()),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !PHONE_DIGITS.contains(&digits.len()) {
        return None;
    }
    Some(format!("{}{}", plus, digits))
}

/// Field errors for one step. Empty means the step is valid.
pub fn validate_step(step: RegistrationStep, form: &RegistrationForm) -> Vec<(Field, String)> {
    let mut errors = Vec::new();
    match step {
        RegistrationStep::Account => {
            if !EMAIL_REGEX.is_match(form.email.trim()) {
                errors.push((Field::Email, "Enter a valid email address".to_string()));
            }
            let password = &form.password;
            if password.chars().count() < MIN_PASSWORD_LEN {
                errors.push((
                    Field::Password,
                    format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
                ));
            } else if !password.chars().any(|c| c.is_alphabetic())
                || !password.chars().any(|c| c.is_ascii_digit())
            {
                errors.push((
                    Field::Password,
                    "Password must contain a letter and a digit".to_string(),
                ));
            }
            if form.confirm_password != form.password {
                errors.push((Field::ConfirmPassword, "Passwords do not match".to_string()));
            }
        }
        RegistrationStep::Profile => {
            let name_len = form.full_name.trim().chars().count();
            if !NAME_LEN.contains(&name_len) {
                errors.push((
                    Field::FullName,
                    format!(
                        "Full name must be {}-{} characters",
                        NAME_LEN.start(),
                        NAME_LEN.end()
                    ),
                ));
            }
            if let Some(phone) = form.phone.as_deref().filter(|p| !p.trim().is_empty())
                && normalize_phone(phone).is_none()
            {
                errors.push((
                    Field::Phone,
                    format!(
                        "Phone number must have {}-{} digits",
                        PHONE_DIGITS.start(),
                        PHONE_DIGITS.end()
                    ),
                ));
            }
        }
        RegistrationStep::Review => {}
    }
    errors
}

#[derive(Debug, Clone)]
pub struct RegistrationWizard {
    step: RegistrationStep,
    form: RegistrationForm,
}

impl Default for RegistrationWizard {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationWizard {
    pub fn new() -> Self {
        Self {
            step: RegistrationStep::Account,
            form: RegistrationForm::default(),
        }
    }

    pub fn step(&self) -> RegistrationStep {
        self.step
    }

    pub fn form(&self) -> &RegistrationForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut RegistrationForm {
        &mut self.form
    }

    /// Validate the current step and move forward.
    pub fn advance(&mut self) -> Result<RegistrationStep, RegistrationError> {
        let errors = validate_step(self.step, &self.form);
        if !errors.is_empty() {
            tracing::debug!(step = %self.step, invalid = errors.len(), "registration step rejected");
            return Err(RegistrationError::Invalid {
                step: self.step,
                errors,
            });
        }
        self.step = self.step.next();
        Ok(self.step)
    }

    /// Move back one step. Input is kept.
    pub fn back(&mut self) -> RegistrationStep {
        self.step = self.step.previous();
        self.step
    }

    /// Produce the request. Every step is revalidated in case the form was
    /// edited after advancing.
    pub fn finish(&self) -> Result<RegistrationRequest, RegistrationError> {
        if self.step != RegistrationStep::Review {
            return Err(RegistrationError::NotReady(self.step));
        }
        for step in [RegistrationStep::Account, RegistrationStep::Profile] {
            let errors = validate_step(step, &self.form);
            if !errors.is_empty() {
                return Err(RegistrationError::Invalid { step, errors });
            }
        }
        let phone = self
            .form
            .phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .and_then(normalize_phone);
        Ok(RegistrationRequest {
            email: self.form.email.trim().to_lowercase(),
            password: self.form.password.clone(),
            full_name: self.form.full_name.trim().to_string(),
            phone,
        })
    }
}
