//! Bearer-token authentication.
//!
//! The role claim is parsed once into [`Role`] and resolved into a
//! [`Capabilities`] set carried by [`AuthUser`]. Downstream code asks
//! capability questions and never compares role strings.

use std::fmt;
use std::str::FromStr;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AttendeeInfo, Event};
use crate::state::AppState;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Attendee,
    Organizer,
    EventStaff,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Attendee => "attendee",
            Role::Organizer => "organizer",
            Role::EventStaff => "event_staff",
            Role::Admin => "admin",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Role::Attendee => Capabilities::of(&[Capability::BookTickets]),
            Role::Organizer => Capabilities::of(&[
                Capability::BookTickets,
                Capability::ScanTickets,
                Capability::ManageEvents,
                Capability::ViewAttendees,
            ]),
            Role::EventStaff => {
                Capabilities::of(&[Capability::ScanTickets, Capability::ViewAttendees])
            }
            Role::Admin => Capabilities::all(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attendee" | "user" => Ok(Role::Attendee),
            "organizer" | "host" => Ok(Role::Organizer),
            "event_staff" | "staff" => Ok(Role::EventStaff),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    BookTickets,
    ScanTickets,
    ManageEvents,
    ViewAttendees,
}

impl Capability {
    fn bit(self) -> u8 {
        match self {
            Capability::BookTickets => 1,
            Capability::ScanTickets => 1 << 1,
            Capability::ManageEvents => 1 << 2,
            Capability::ViewAttendees => 1 << 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub fn of(capabilities: &[Capability]) -> Self {
        Self(capabilities.iter().fold(0, |bits, c| bits | c.bit()))
    }

    pub fn all() -> Self {
        Self::of(&[
            Capability::BookTickets,
            Capability::ScanTickets,
            Capability::ManageEvents,
            Capability::ViewAttendees,
        ])
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: String,
    pub exp: usize,
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub role: Role,
    pub capabilities: Capabilities,
}

impl AuthUser {
    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn require(&self, capability: Capability) -> Result<(), AppError> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "Role '{}' is not allowed to perform this action",
                self.role
            )))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_host_of(&self, event: &Event) -> bool {
        event.host_id == self.user_id
    }

    /// Edits and attendee lists: the event's host or an admin.
    pub fn may_manage(&self, event: &Event) -> bool {
        self.is_admin() || (self.can(Capability::ManageEvents) && self.is_host_of(event))
    }

    /// Entry scans: admins, event staff, or the organizer hosting the event.
    pub fn may_scan_for(&self, event: &Event) -> bool {
        if !self.can(Capability::ScanTickets) {
            return false;
        }
        match self.role {
            Role::Admin | Role::EventStaff => true,
            Role::Organizer => self.is_host_of(event),
            Role::Attendee => false,
        }
    }

    pub fn may_view_attendees(&self, event: &Event) -> bool {
        self.may_manage(event) || (self.can(Capability::ViewAttendees) && self.may_scan_for(event))
    }

    /// Attendee details taken from the token, for bookings that omit them.
    pub fn profile(&self) -> Option<AttendeeInfo> {
        self.email.as_ref().map(|email| AttendeeInfo {
            name: self.name.clone(),
            email: email.clone(),
            phone: None,
        })
    }
}

pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn authenticate(&self, token: &str) -> Result<AuthUser, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|e| AppError::AuthError(format!("Invalid token: {}", e)))?;
        let claims = data.claims;
        let role: Role = claims
            .role
            .parse()
            .map_err(|e: String| AppError::AuthError(e))?;

        Ok(AuthUser {
            user_id: claims.sub,
            name: claims.name,
            email: claims.email,
            role,
            capabilities: role.capabilities(),
        })
    }

    /// Mints a token. Session issuance proper lives outside this service; this
    /// is for tooling and tests.
    pub fn issue_token(
        &self,
        user_id: Uuid,
        name: &str,
        email: Option<&str>,
        role: Role,
        ttl: Duration,
    ) -> Result<String, AppError> {
        let claims = Claims {
            sub: user_id,
            name: name.to_string(),
            email: email.map(str::to_string),
            role: role.as_str().to_string(),
            exp: (Utc::now() + ttl).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::AuthError("Missing bearer token".to_string()))?;
        state.auth.authenticate(token)
    }
}
