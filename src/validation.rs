//! Request body schemas and field validation.
//!
//! Each form deserializes leniently (missing fields become empty strings)
//! and `validate` reports every failing field at once, trimmed values
//! replacing the raw ones on success.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::auth::check_password_policy;
use crate::error::{AppError, FieldError};

static NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-ZáéíóúÁÉÍÓÚñÑ\s]+$").expect("static regex"));
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex"));

/// Collects field errors in declaration order.
#[derive(Debug, Default)]
struct Checks {
    errors: Vec<FieldError>,
}

impl Checks {
    fn fail(&mut self, field: &str, message: &str) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Length in characters within `min..=max`; `label` names the field in
    /// messages.
    fn length(&mut self, field: &str, label: &str, value: &str, min: usize, max: usize) -> bool {
        let len = value.chars().count();
        if len == 0 && min > 0 {
            self.fail(field, &format!("{} is required", label));
            false
        } else if len < min {
            self.fail(field, &format!("{} must be at least {} characters", label, min));
            false
        } else if len > max {
            self.fail(field, &format!("{} must not exceed {} characters", label, max));
            false
        } else {
            true
        }
    }

    fn email(&mut self, field: &str, value: &str) {
        if self.length(field, "Email", value, 1, 255) && !EMAIL.is_match(value) {
            self.fail(field, "Email is not valid");
        }
    }

    fn finish(self) -> Result<(), AppError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.errors))
        }
    }
}

/// Contact form submission.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContactForm {
    pub nombre: String,
    pub email: String,
    pub empresa: String,
    pub mensaje: String,
}

impl ContactForm {
    pub fn validate(self) -> Result<Self, AppError> {
        let form = Self {
            nombre: self.nombre.trim().to_string(),
            email: self.email.trim().to_string(),
            empresa: self.empresa.trim().to_string(),
            mensaje: self.mensaje.trim().to_string(),
        };

        let mut checks = Checks::default();
        if checks.length("nombre", "Name", &form.nombre, 2, 100) && !NAME.is_match(&form.nombre) {
            checks.fail("nombre", "Name may only contain letters");
        }
        checks.email("email", &form.email);
        if form.empresa.chars().count() > 200 {
            checks.fail("empresa", "Company name is too long");
        }
        checks.length("mensaje", "Message", &form.mensaje, 10, 2000);
        checks.finish()?;
        Ok(form)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(self) -> Result<Self, AppError> {
        let form = Self {
            email: self.email.trim().to_string(),
            password: self.password,
        };
        let mut checks = Checks::default();
        checks.email("email", &form.email);
        checks.length("password", "Password", &form.password, 8, 1024);
        checks.finish()?;
        Ok(form)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub nombre: String,
}

impl RegisterForm {
    pub fn validate(self) -> Result<Self, AppError> {
        let form = Self {
            email: self.email.trim().to_string(),
            nombre: self.nombre.trim().to_string(),
            ..self
        };

        let mut checks = Checks::default();
        checks.email("email", &form.email);
        for problem in check_password_policy(&form.password) {
            checks.fail("password", problem);
        }
        if form.password_confirm != form.password {
            checks.fail("passwordConfirm", "Passwords do not match");
        }
        checks.length("nombre", "Name", &form.nombre, 2, 100);
        checks.finish()?;
        Ok(form)
    }
}
