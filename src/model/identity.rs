use serde::{Deserialize, Serialize};

/// A person on either side of the migration, normalized once by the adapter
/// that fetched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    /// Lower-cased and trimmed; `None` when the system exposes no address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.and_then(normalize_email),
        }
    }

    /// Name with the address appended, for prompts and warnings.
    pub fn label(&self) -> String {
        match &self.email {
            Some(email) => format!("{} <{email}>", self.name),
            None => self.name.clone(),
        }
    }
}

pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        None
    } else {
        Some(email)
    }
}
