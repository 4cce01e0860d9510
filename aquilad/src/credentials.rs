//! Password-file credential storage and validation.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use thiserror::Error;

use aquila_server::auth::{AuthError, Authenticator};

#[derive(Debug, Error)]
pub enum PasswordFileError {
    #[error("could not access `{}`: {}", path.display(), source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} line {}: entries are `username:hash`", path.display(), line)]
    BadEntry { path: PathBuf, line: usize },

    #[error("no such user `{0}`")]
    UnknownUser(String),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// An on-disk credential set, one `username:hash` entry per line.
///
/// Hashes are argon2id PHC strings; `#` comments and blank lines are
/// skipped. The set is edited through [`set_password`]/[`remove`] and
/// written back with [`store`].
///
/// [`set_password`]: PasswordFile::set_password
/// [`remove`]: PasswordFile::remove
/// [`store`]: PasswordFile::store
pub struct PasswordFile {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl PasswordFile {
    /// Read and parse the file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<PasswordFile, PasswordFileError> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path).map_err(|source| PasswordFileError::Io {
            path: path.clone(),
            source,
        })?;

        Self::parse(path, &contents)
    }

    /// Like [`PasswordFile::open`], but a file that does not exist yet
    /// yields an empty set. Used when editing, so the first `passwd` run
    /// can create the file.
    pub fn open_or_empty(path: impl Into<PathBuf>) -> Result<PasswordFile, PasswordFileError> {
        let path = path.into();
        match Self::open(&path) {
            Err(PasswordFileError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Ok(PasswordFile {
                    path,
                    entries: HashMap::new(),
                })
            }
            result => result,
        }
    }

    fn parse(path: PathBuf, contents: &str) -> Result<PasswordFile, PasswordFileError> {
        let mut entries = HashMap::new();

        for (index, raw) in contents.lines().enumerate() {
            let entry = raw.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }

            let (username, hash) = entry.split_once(':').ok_or_else(|| {
                PasswordFileError::BadEntry {
                    path: path.clone(),
                    line: index + 1,
                }
            })?;
            entries.insert(username.to_string(), hash.to_string());
        }

        Ok(PasswordFile { path, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hash `password` with a fresh salt and insert or replace the entry
    /// for `username`.
    pub fn set_password(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(), PasswordFileError> {
        let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PasswordFileError::Hash(e.to_string()))?;

        self.entries.insert(username.to_string(), hash.to_string());
        Ok(())
    }

    /// Drop the entry for `username`.
    pub fn remove(&mut self, username: &str) -> Result<(), PasswordFileError> {
        self.entries
            .remove(username)
            .map(|_| ())
            .ok_or_else(|| PasswordFileError::UnknownUser(username.to_string()))
    }

    /// Write the set back to its file.
    pub fn store(&self) -> Result<(), PasswordFileError> {
        let mut contents = String::from("# aquilad credentials, managed with `aquilad passwd`\n");
        for (username, hash) in &self.entries {
            contents.push_str(username);
            contents.push(':');
            contents.push_str(hash);
            contents.push('\n');
        }

        std::fs::write(&self.path, contents).map_err(|source| PasswordFileError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Consume the set into an authenticator for the broker.
    pub fn into_authenticator(self) -> FileAuthenticator {
        FileAuthenticator::new(self.entries)
    }
}

/// Authenticator backed by a password-file credential set.
///
/// Entries without a `$` prefix are treated as plaintext for backwards
/// compatibility.
pub struct FileAuthenticator {
    credentials: HashMap<String, String>,
}

impl FileAuthenticator {
    pub fn new(credentials: HashMap<String, String>) -> Self {
        Self { credentials }
    }
}

impl Authenticator for FileAuthenticator {
    fn validate(&self, username: &str, password: &[u8]) -> Result<(), AuthError> {
        let Some(stored) = self.credentials.get(username) else {
            return Err(AuthError::BadCredentials);
        };

        let valid = if stored.starts_with('$') {
            let parsed_hash =
                PasswordHash::new(stored).map_err(|e| AuthError::Backend(e.to_string()))?;
            Argon2::default()
                .verify_password(password, &parsed_hash)
                .is_ok()
        } else {
            std::str::from_utf8(password).is_ok_and(|password| stored == password)
        };

        if valid {
            Ok(())
        } else {
            Err(AuthError::BadCredentials)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> Result<PasswordFile, PasswordFileError> {
        PasswordFile::parse(PathBuf::from("test-passwd"), contents)
    }

    fn hash_password(password: &str) -> String {
        let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string()
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let file = parse("# header\n\nadmin:hash-a\n  \nguest:hash-b\n").unwrap();
        assert_eq!(file.len(), 2);
    }

    #[test]
    fn entries_without_a_separator_are_rejected() {
        match parse("admin:hash-a\nbroken\n") {
            Err(PasswordFileError::BadEntry { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected a bad-entry error, got {:?}", other.err()),
        }
    }

    #[test]
    fn set_password_round_trips_through_the_authenticator() {
        let mut file = parse("").unwrap();
        file.set_password("admin", "secret").unwrap();

        let authenticator = file.into_authenticator();
        assert!(authenticator.validate("admin", b"secret").is_ok());
        assert!(authenticator.validate("admin", b"wrong").is_err());
    }

    #[test]
    fn removing_an_unknown_user_fails() {
        let mut file = parse("admin:hash-a\n").unwrap();

        assert!(matches!(
            file.remove("nobody"),
            Err(PasswordFileError::UnknownUser(_))
        ));
        assert!(file.remove("admin").is_ok());
        assert!(file.is_empty());
    }

    #[test]
    fn hashed_credentials_validate() {
        let mut creds = HashMap::new();
        creds.insert("admin".to_string(), hash_password("secret"));
        let authenticator = FileAuthenticator::new(creds);

        assert!(authenticator.validate("admin", b"secret").is_ok());
        assert!(authenticator.validate("admin", b"wrong").is_err());
    }

    #[test]
    fn plaintext_fallback_validates() {
        let mut creds = HashMap::new();
        creds.insert("legacy".to_string(), "plainpass".to_string());
        let authenticator = FileAuthenticator::new(creds);

        assert!(authenticator.validate("legacy", b"plainpass").is_ok());
        assert!(authenticator.validate("legacy", b"wrong").is_err());
    }

    #[test]
    fn unknown_user_is_rejected() {
        let authenticator = FileAuthenticator::new(HashMap::new());
        assert!(authenticator.validate("nobody", b"pass").is_err());
    }
}
