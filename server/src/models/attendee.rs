use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::utils::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeInfo {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl AttendeeInfo {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::ValidationError("Attendee name is required".to_string()));
        }
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::ValidationError(format!(
                "'{}' is not a valid email address",
                self.email
            )));
        }
        Ok(())
    }
}

/// A nested body field that clients send either as a JSON object or as a
/// string holding that object's JSON encoding.
///
/// Parsed once at the API boundary with [`Embedded::into_inner`]; nothing past
/// the handlers sees the raw shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Embedded<T> {
    Object(T),
    Encoded(String),
}

impl<T: DeserializeOwned> Embedded<T> {
    pub fn into_inner(self, field: &str) -> Result<T, AppError> {
        match self {
            Embedded::Object(value) => Ok(value),
            Embedded::Encoded(raw) => serde_json::from_str(&raw).map_err(|e| {
                AppError::ValidationError(format!("Field '{}' is not valid JSON: {}", field, e))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Body {
        attendee_info: Embedded<AttendeeInfo>,
    }

    #[test]
    fn accepts_object_and_encoded_forms() {
        let object: Body = serde_json::from_str(
            r#"{"attendeeInfo": {"name": "Ada", "email": "ada@example.com"}}"#,
        )
        .unwrap();
        let encoded: Body = serde_json::from_str(
            r#"{"attendeeInfo": "{\"name\":\"Ada\",\"email\":\"ada@example.com\"}"}"#,
        )
        .unwrap();

        let a = object.attendee_info.into_inner("attendeeInfo").unwrap();
        let b = encoded.attendee_info.into_inner("attendeeInfo").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.phone, None);
    }

    #[test]
    fn malformed_encoded_form_is_a_validation_error() {
        let body: Body = serde_json::from_str(r#"{"attendeeInfo": "{not json"}"#).unwrap();
        let err = body.attendee_info.into_inner("attendeeInfo").unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn rejects_blank_name_and_bad_email() {
        let mut info = AttendeeInfo {
            name: " ".to_string(),
            email: "ada@example.com".to_string(),
            phone: None,
        };
        assert!(info.validate().is_err());

        info.name = "Ada".to_string();
        info.email = "not-an-email".to_string();
        assert!(info.validate().is_err());

        info.email = "ada@example.com".to_string();
        assert!(info.validate().is_ok());
    }
}
