use std::path::{Path, PathBuf};

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::helpers::{read_data, remove_data, write_data};

#[derive(Serialize, Deserialize, Default)]
struct StoredSession {
    quiz_session_token: Option<String>,
    user_name: Option<String>,
}

/// Set on login, cleared on logout and whenever the backend rejects the token.
pub struct TokenStore {
    path: PathBuf,
    token: Option<SecretString>,
    user_name: Option<String>,
}

impl TokenStore {
    pub fn load(path: PathBuf) -> Result<Self> {
        let stored = match read_data(&path)? {
            Some(data) => serde_json::from_slice(&data).unwrap_or_else(|error| {
                tracing::warn!(path = %path.display(), %error, "ignoring unreadable session file");
                StoredSession::default()
            }),
            None => StoredSession::default(),
        };

        Ok(Self {
            path,
            token: stored.quiz_session_token.map(SecretString::new),
            user_name: stored.user_name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> Option<SecretString> {
        self.token.clone()
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn set(&mut self, token: SecretString, user_name: String) -> Result<()> {
        let stored = StoredSession {
            quiz_session_token: Some(token.expose_secret().clone()),
            user_name: Some(user_name.clone()),
        };

        write_data(&self.path, serde_json::to_string_pretty(&stored)?)?;
        restrict_permissions(&self.path)?;

        self.token = Some(token);
        self.user_name = Some(user_name);

        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.token = None;
        self.user_name = None;

        remove_data(&self.path)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;

    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
