use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::FieldErrors;

/// Minimum password length accepted before a registration is sent
const MIN_PASSWORD_LENGTH: usize = 8;

/// Server-issued identity record. Replaced wholesale on every login,
/// refresh and profile update; never merged client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(alias = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub is_email_verified: bool,
    #[serde(default)]
    pub is_age_verified: bool,
    #[serde(default)]
    pub is_private: bool,
    /// Fields this client does not model, kept verbatim
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            _ => self.username.clone(),
        }
    }
}

/// Body of `POST /auth/register`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    /// Any further fields the server accepts
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RegistrationForm {
    pub fn new(username: &str, email: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            first_name: None,
            last_name: None,
            date_of_birth: None,
            extra: Map::new(),
        }
    }

    pub fn with_name(mut self, first_name: &str, last_name: &str) -> Self {
        self.first_name = Some(first_name.to_string());
        self.last_name = Some(last_name.to_string());
        self
    }

    pub fn with_date_of_birth(mut self, date_of_birth: NaiveDate) -> Self {
        self.date_of_birth = Some(date_of_birth);
        self
    }

    /// Checks that can be made without a round trip. Empty when the form is sendable.
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        let mut reject = |field: &str, message: &str| {
            errors
                .entry(field.to_string())
                .or_default()
                .push(message.to_string());
        };

        if self.username.trim().is_empty() {
            reject("username", "Username is required");
        }
        let email = self.email.trim();
        if email.is_empty() {
            reject("email", "Email is required");
        } else if !looks_like_email(email) {
            reject("email", "Email address is not valid");
        }
        if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            reject("password", "Password must be at least 8 characters");
        }
        if let Some(dob) = self.date_of_birth {
            if dob > chrono::Utc::now().date_naive() {
                reject("dateOfBirth", "Date of birth cannot be in the future");
            }
        }
        errors
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

/// Body of `PUT /auth/profile`. Only the fields that are set are sent.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.date_of_birth.is_none()
            && self.is_private.is_none()
            && self.extra.is_empty()
    }

    /// Set a field by its wire name. Unknown names go into `extra` as strings.
    pub fn set(&mut self, field: &str, value: &str) -> Result<(), String> {
        match field {
            "username" => self.username = Some(value.to_string()),
            "firstName" => self.first_name = Some(value.to_string()),
            "lastName" => self.last_name = Some(value.to_string()),
            "dateOfBirth" => {
                let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .map_err(|_| format!("dateOfBirth must be YYYY-MM-DD, got {}", value))?;
                self.date_of_birth = Some(date);
            }
            "isPrivate" => {
                let flag = value
                    .parse::<bool>()
                    .map_err(|_| format!("isPrivate must be true or false, got {}", value))?;
                self.is_private = Some(flag);
            }
            other => {
                self.extra.insert(other.to_string(), Value::String(value.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parses_flags_and_keeps_unknown_fields() {
        let json = r#"{"_id":"64f0","username":"ada","email":"a@b.com","isAgeVerified":true,"isPrivate":true,"avatarUrl":"https://x/y.png"}"#;
        let profile: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.id, "64f0");
        assert!(profile.is_age_verified);
        assert!(profile.is_private);
        assert!(!profile.is_email_verified);
        assert_eq!(profile.extra["avatarUrl"], "https://x/y.png");
        assert_eq!(profile.display_name(), "ada");
    }

    #[test]
    fn test_display_name() {
        let mut profile: UserProfile =
            serde_json::from_str(r#"{"id":"1","username":"ada"}"#).unwrap();
        profile.first_name = Some("Ada".to_string());
        assert_eq!(profile.display_name(), "Ada");
        profile.last_name = Some("Lovelace".to_string());
        assert_eq!(profile.display_name(), "Ada Lovelace");
    }

    #[test]
    fn test_registration_validation() {
        let ok = RegistrationForm::new("ada", "a@b.com", "Secret123!");
        assert!(ok.validate().is_empty());

        let bad = RegistrationForm::new(" ", "not-an-email", "short");
        let errors = bad.validate();
        assert!(errors.contains_key("username"));
        assert!(errors.contains_key("email"));
        assert!(errors.contains_key("password"));

        let future = RegistrationForm::new("ada", "a@b.com", "Secret123!")
            .with_date_of_birth(NaiveDate::from_ymd_opt(2999, 1, 1).unwrap());
        assert!(future.validate().contains_key("dateOfBirth"));
    }

    #[test]
    fn test_registration_wire_format() {
        let form = RegistrationForm::new("ada", "a@b.com", "Secret123!")
            .with_name("Ada", "Lovelace")
            .with_date_of_birth(NaiveDate::from_ymd_opt(1990, 12, 10).unwrap());
        let json = serde_json::to_value(&form).unwrap();
        assert_eq!(json["firstName"], "Ada");
        assert_eq!(json["dateOfBirth"], "1990-12-10");
    }

    #[test]
    fn test_profile_update_only_sends_set_fields() {
        let mut update = ProfileUpdate::default();
        assert!(update.is_empty());
        update.set("firstName", "Ada").unwrap();
        update.set("isPrivate", "true").unwrap();
        update.set("bio", "Analyst").unwrap();

        let json = serde_json::to_value(&update).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(json["firstName"], "Ada");
        assert_eq!(json["isPrivate"], true);
        assert_eq!(json["bio"], "Analyst");
    }

    #[test]
    fn test_profile_update_rejects_bad_values() {
        let mut update = ProfileUpdate::default();
        assert!(update.set("dateOfBirth", "10/12/1990").is_err());
        assert!(update.set("isPrivate", "maybe").is_err());
        assert!(update.is_empty());
    }
}
