use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::datastore::DataStore;
use crate::error::{StoreError, StoreResult};

pub const XP_PER_COMPLETION: u32 = 10;
const XP_PER_LEVEL: u32 = 100;

/// Lowercase account key. Doubles as a file stem in the data directory, so
/// only a conservative character set is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(StoreError::validation("username must not be empty"));
        }
        if normalized.starts_with('.') {
            return Err(StoreError::validation(format!(
                "username may not start with '.': {normalized}"
            )));
        }
        if let Some(bad) = normalized
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@' | '+')))
        {
            return Err(StoreError::validation(format!(
                "username contains unsupported character {bad:?}"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Username {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

pub fn level_for_xp(xp: u32) -> u32 {
    xp / XP_PER_LEVEL + 1
}

/// Durable credential record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub username: Username,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub xp: u32,
    #[serde(default = "first_level")]
    pub level: u32,
}

fn first_level() -> u32 {
    1
}

impl UserRecord {
    pub fn new(username: Username, password: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            username,
            password: password.into(),
            email: None,
            phone: None,
            avatar: None,
            created_at: now,
            xp: 0,
            level: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub username: Option<Username>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub xp: Option<u32>,
    pub level: Option<u32>,
}

impl UserUpdate {
    pub(crate) fn apply(self, user: &mut UserRecord) {
        if let Some(username) = self.username {
            user.username = username;
        }
        if let Some(password) = self.password {
            user.password = password;
        }
        if let Some(email) = self.email {
            user.email = Some(email);
        }
        if let Some(phone) = self.phone {
            user.phone = Some(phone);
        }
        if let Some(avatar) = self.avatar {
            user.avatar = Some(avatar);
        }
        if let Some(xp) = self.xp {
            user.xp = xp;
        }
        if let Some(level) = self.level {
            user.level = level;
        }
    }
}

/// Lightweight record of the active actor; a projection of [`UserRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub username: Username,
    pub last_login: DateTime<Utc>,
    #[serde(default)]
    pub xp: u32,
    #[serde(default = "first_level")]
    pub level: u32,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Session {
    pub fn for_user(user: &UserRecord, now: DateTime<Utc>) -> Self {
        Self {
            username: user.username.clone(),
            last_login: now,
            xp: user.xp,
            level: user.level,
            email: user.email.clone(),
            phone: user.phone.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

/// Capability naming the active user. Repositories are built from one, so
/// nothing below the session boundary reads ambient identity state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    username: Username,
}

impl Identity {
    pub fn new(username: Username) -> Self {
        Self { username }
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    /// Records a session for an already-authenticated user.
    #[instrument(skip(store, now))]
    pub fn login(store: &DataStore, username: &Username, now: DateTime<Utc>) -> StoreResult<Self> {
        let user = store
            .get_users()
            .into_iter()
            .find(|u| &u.username == username)
            .ok_or_else(|| StoreError::not_found("user", username.as_str()))?;

        store.set_session(&Session::for_user(&user, now))?;
        info!(username = %username, "logged in");
        Ok(Self::new(user.username))
    }

    pub fn resume(store: &DataStore) -> Option<Self> {
        store.get_session().map(|session| Self::new(session.username))
    }

    #[instrument(skip(self, store), fields(username = %self.username))]
    pub fn logout(self, store: &DataStore) -> StoreResult<()> {
        store.clear_session()?;
        info!("logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_lowercased_and_checked() {
        assert_eq!(Username::parse("  Alice ").unwrap().as_str(), "alice");
        assert_eq!(
            Username::parse("bob.smith@example.com").unwrap().as_str(),
            "bob.smith@example.com"
        );
        assert!(Username::parse("").is_err());
        assert!(Username::parse("../etc").is_err());
        assert!(Username::parse("a/b").is_err());
        assert!(Username::parse(".hidden").is_err());
    }

    #[test]
    fn username_deserialization_normalizes() {
        let parsed: Username = serde_json::from_str("\"CAROL\"").unwrap();
        assert_eq!(parsed.as_str(), "carol");
        assert!(serde_json::from_str::<Username>("\"a b\"").is_err());
    }

    #[test]
    fn levels_step_every_hundred_xp() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(250), 3);
    }
}
