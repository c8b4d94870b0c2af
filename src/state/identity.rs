use std::{fs, io, path::Path};

use rand::Rng;
use time::OffsetDateTime;

const VISITOR_PREFIX: &str = "visitor_";
const VISITOR_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Privilege level attached to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Anonymous visitor: tracked in presence, cannot ready up.
    Guest,
    /// Authenticated player.
    Member,
    /// Authenticated player allowed to configure and commit the round.
    Host,
}

/// Who this session is, as far as lobby coordination is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    session_id: String,
    privilege: Privilege,
}

impl Identity {
    /// Anonymous session keyed by its persisted visitor id.
    pub fn guest(visitor_id: impl Into<String>) -> Self {
        Self {
            session_id: visitor_id.into(),
            privilege: Privilege::Guest,
        }
    }

    /// Authenticated session keyed by username.
    pub fn member(username: impl Into<String>) -> Self {
        Self {
            session_id: username.into(),
            privilege: Privilege::Member,
        }
    }

    /// Authenticated session with host privilege.
    pub fn host(username: impl Into<String>) -> Self {
        Self {
            session_id: username.into(),
            privilege: Privilege::Host,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn privilege(&self) -> Privilege {
        self.privilege
    }

    pub fn is_authenticated(&self) -> bool {
        self.privilege != Privilege::Guest
    }

    pub fn is_host(&self) -> bool {
        self.privilege == Privilege::Host
    }
}

/// Generate an opaque visitor id of the form `visitor_<unix-millis>_<9 base36 chars>`.
pub fn generate_visitor_id() -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let mut rng = rand::rng();
    let suffix: String = (0..VISITOR_SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("{VISITOR_PREFIX}{millis}_{suffix}")
}

/// Read the visitor id persisted at `path`, creating and persisting a new one when absent.
pub fn load_or_create_visitor_id(path: &Path) -> io::Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) if contents.trim().starts_with(VISITOR_PREFIX) => Ok(contents.trim().to_string()),
        Ok(_) => persist_new_visitor_id(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => persist_new_visitor_id(path),
        Err(err) => Err(err),
    }
}

fn persist_new_visitor_id(path: &Path) -> io::Result<String> {
    let id = generate_visitor_id();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &id)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visitor_ids_have_the_expected_shape() {
        let id = generate_visitor_id();
        let rest = id.strip_prefix(VISITOR_PREFIX).unwrap();
        let (millis, suffix) = rest.split_once('_').unwrap();
        assert!(millis.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), VISITOR_SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn visitor_id_survives_reload() {
        let path = std::env::temp_dir().join(format!("bunker-lobby-{}", generate_visitor_id()));
        let first = load_or_create_visitor_id(&path).unwrap();
        let second = load_or_create_visitor_id(&path).unwrap();
        assert_eq!(first, second);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn privileges() {
        assert!(!Identity::guest("visitor_1_abc").is_authenticated());
        assert!(Identity::member("alice").is_authenticated());
        assert!(!Identity::member("alice").is_host());
        assert!(Identity::host("root").is_host());
    }
}
