//! Persisted document model: users, reported events, and comments.

use serde::{Deserialize, Serialize};

/// Account category controlling what a user may do.
///
/// Citizens file events and comment on them, admins approve or deny
/// pending events, authorities resolve approved ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Citizen,
    Admin,
    Authority,
}

impl Role {
    /// Wire name of the role as it appears in request and response bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Citizen => "citizen",
            Role::Admin => "admin",
            Role::Authority => "authority",
        }
    }

    /// Parse a wire name back into a role.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "citizen" => Some(Role::Citizen),
            "admin" => Some(Role::Admin),
            "authority" => Some(Role::Authority),
            _ => None,
        }
    }
}

/// Workflow state of a reported event.
///
/// New events always start `pending`; admins move them to `approved` or
/// `denied`, authorities move approved events to `resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Approved,
    Denied,
    Resolved,
}

/// Registered account persisted in the document.
///
/// The password is stored in plaintext for fidelity with the data files
/// this service inherits. It never leaves the process: every response
/// serializes [`UserPublic`] instead. Comparison goes through
/// [`verify_password`] so a hashed scheme can replace it without touching
/// handler logic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "type")]
    pub role: Role,
}

/// User record as served to clients, with the password withheld.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPublic {
    pub id: u64,
    pub name: String,
    pub email: String,
    #[serde(rename = "type")]
    pub role: Role,
}

impl From<&User> for UserPublic {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// Check a login attempt against a stored credential.
///
/// Plaintext comparison, matching the persisted format. Known weakness,
/// kept behind this seam so it can be swapped for a hash check.
pub fn verify_password(user: &User, password: &str) -> bool {
    user.password == password
}

/// A reported civic issue with a workflow status.
///
/// `creator_id` is a weak reference: it is not validated at creation time
/// and must be resolved defensively when annotating responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: u64,
    pub creator_id: u64,
    pub title: String,
    pub description: String,
    pub address: String,
    /// Image payloads, typically base64 data strings.
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Citizen-raised flags against this event, tracked only as a counter.
    pub complaints: u64,
    pub status: Status,
}

/// Citizen comment attached to an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: u64,
    pub event_id: u64,
    pub author_id: u64,
    pub text: String,
    /// ISO-8601 creation time. Absent in records written before the field
    /// was introduced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// The entire durable state of the service: three arrays in insertion
/// order, read and written wholesale on every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub users: Vec<User>,
    pub events: Vec<Event>,
    pub comments: Vec<Comment>,
}

impl Document {
    /// Look up a user by id.
    pub fn user(&self, id: u64) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    /// Look up an event by id, mutably.
    pub fn event_mut(&mut self, id: u64) -> Option<&mut Event> {
        self.events.iter_mut().find(|e| e.id == id)
    }
}

/// Next id for a collection: max existing id + 1, or 1 when empty.
///
/// Ids are never reused; nothing is ever deleted from the document.
pub fn next_id(ids: impl Iterator<Item = u64>) -> u64 {
    ids.max().map_or(1, |max| max + 1)
}
