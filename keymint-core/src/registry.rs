//! Durable, append-only storage for the two trust registries.
//!
//! Both registries are flat, newline-delimited text files inside the target
//! directory, in the plain OpenSSH formats:
//!
//! - `known_hosts`: one `"<hostlist> <type> <base64>"` line per trusted
//!   host key, hostlist comma-separated.
//! - `authorized_keys`: one `"<type> <base64> <comment>"` line per key
//!   granted access.
//!
//! A registry is seeded with a single management header line when first
//! created and only ever appended to afterwards; no rewriting or
//! compaction. All I/O is synchronous; callers serialise concurrent
//! invocations with [`DirLock`](crate::lock::DirLock).

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::Error;

pub const KNOWN_HOSTS_FILE: &str = "known_hosts";
pub const AUTHORIZED_KEYS_FILE: &str = "authorized_keys";

/// Header written when a registry file is first created.
const HEADER: &str = "# managed by keymint\n";

/// One parsed `authorized_keys` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizedKeyEntry {
    #[serde(rename = "type")]
    pub key_type: String,
    pub key: String,
    /// The entry's comment, repeated here because it also keys the mapping
    /// returned by [`read_authorized_keys_map`].
    pub name: String,
}

/// Read the raw `known_hosts` registry of `dir`.
///
/// Unlike `authorized_keys`, a missing file is an error: the registry only
/// comes into existence through a host-key generation, and asking for it
/// before that point is a sequencing mistake in the caller's manifests.
pub fn read_known_hosts(dir: &Path) -> Result<String, Error> {
    let path = dir.join(KNOWN_HOSTS_FILE);
    fs::read_to_string(&path)
        .map_err(|e| Error::io(format!("unable to read {}", path.display()), e))
}

/// Read the raw `authorized_keys` registry of `dir`.
///
/// Returns an empty string when the file does not exist yet. This is the
/// only absence-tolerant read: manifests commonly interpolate the registry
/// before the first key has been created.
pub fn read_authorized_keys(dir: &Path) -> Result<String, Error> {
    let path = dir.join(AUTHORIZED_KEYS_FILE);
    if !path.exists() {
        return Ok(String::new());
    }
    fs::read_to_string(&path)
        .map_err(|e| Error::io(format!("unable to read {}", path.display()), e))
}

/// Read `authorized_keys` as a mapping keyed by each entry's comment.
///
/// Returns an empty mapping when the file does not exist. Blank lines,
/// `#` comment lines, and lines with fewer than three whitespace-separated
/// fields are skipped. A later line with a duplicate comment overwrites the
/// earlier one (last-write-wins; kept bug-for-bug with the behaviour
/// callers already rely on).
pub fn read_authorized_keys_map(dir: &Path) -> Result<HashMap<String, AuthorizedKeyEntry>, Error> {
    let contents = read_authorized_keys(dir)?;

    let mut result = HashMap::new();
    for line in contents.lines() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (key_type, key, name) = match (fields.next(), fields.next(), fields.next()) {
            (Some(t), Some(k), Some(c)) => (t, k, c),
            _ => {
                debug!(line, "skipping malformed authorized_keys line");
                continue;
            }
        };
        result.insert(
            name.to_string(),
            AuthorizedKeyEntry {
                key_type: key_type.to_string(),
                key: key.to_string(),
                name: name.to_string(),
            },
        );
    }
    Ok(result)
}

/// Create `path` with the management header if it does not exist yet.
pub fn ensure_file(path: &Path) -> Result<(), Error> {
    if path.exists() {
        return Ok(());
    }
    fs::write(path, HEADER).map_err(|e| Error::io(format!("unable to create {}", path.display()), e))?;
    debug!(path = %path.display(), "created registry file");
    Ok(())
}

/// Append one entry to a registry file.
///
/// The entry is normalised to end with exactly one newline so the registry
/// stays well-formed regardless of what the caller supplies.
pub fn append_line(path: &Path, line: &str) -> Result<(), Error> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| Error::io(format!("unable to open {} for append", path.display()), e))?;
    writeln!(file, "{}", line.trim_end_matches('\n'))
        .map_err(|e| Error::io(format!("unable to append to {}", path.display()), e))
}

/// Whether any line of `path` carries exactly `key_literal` as its key field.
///
/// `key_literal` is the `"<type> <base64>"` form of a public key. Registry
/// lines are compared on that field alone (literal equality, never a prefix
/// match), so differing host lists or comments do not defeat the scan.
pub fn contains_key(path: &Path, key_literal: &str) -> Result<bool, Error> {
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("unable to read {}", path.display()), e))?;
    Ok(contents
        .lines()
        .filter_map(line_key_field)
        .any(|field| field == key_literal))
}

/// The `"<type> <base64>"` key field of a `known_hosts` line, or `None` for
/// header/comment lines and lines too short to carry one.
fn line_key_field(line: &str) -> Option<String> {
    if line.starts_with('#') {
        return None;
    }
    let mut fields = line.split_whitespace();
    let _hostlist = fields.next()?;
    let key_type = fields.next()?;
    let body = fields.next()?;
    Some(format!("{key_type} {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn ensure_file_seeds_header_once() {
        let dir = tmp();
        let path = dir.path().join(KNOWN_HOSTS_FILE);

        ensure_file(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "# managed by keymint\n");

        // A second call must not rewrite the file.
        append_line(&path, "host ssh-rsa AAAA").unwrap();
        ensure_file(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("host ssh-rsa AAAA"));
    }

    #[test]
    fn append_line_normalises_trailing_newline() {
        let dir = tmp();
        let path = dir.path().join(AUTHORIZED_KEYS_FILE);
        ensure_file(&path).unwrap();

        append_line(&path, "ssh-rsa AAAA root@a\n").unwrap();
        append_line(&path, "ssh-rsa BBBB root@b").unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("root@b\n"));
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn known_hosts_read_fails_when_absent() {
        let dir = tmp();
        let err = read_known_hosts(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn authorized_keys_read_tolerates_absence() {
        let dir = tmp();
        assert_eq!(read_authorized_keys(dir.path()).unwrap(), "");
        assert!(read_authorized_keys_map(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn structured_read_keys_by_comment() {
        let dir = tmp();
        let path = dir.path().join(AUTHORIZED_KEYS_FILE);
        ensure_file(&path).unwrap();
        append_line(&path, "ssh-rsa AAAA root@a").unwrap();
        append_line(&path, "ssh-ed25519 BBBB root@b").unwrap();

        let map = read_authorized_keys_map(dir.path()).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map["root@a"],
            AuthorizedKeyEntry {
                key_type: "ssh-rsa".to_string(),
                key: "AAAA".to_string(),
                name: "root@a".to_string(),
            }
        );
        assert_eq!(map["root@b"].key_type, "ssh-ed25519");
    }

    #[test]
    fn structured_read_skips_junk_lines() {
        let dir = tmp();
        let path = dir.path().join(AUTHORIZED_KEYS_FILE);
        fs::write(
            &path,
            "# managed by keymint\n\nssh-rsa AAAA root@a\nnot-enough-fields\n   \n",
        )
        .unwrap();

        let map = read_authorized_keys_map(dir.path()).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("root@a"));
    }

    #[test]
    fn structured_read_duplicate_comment_last_wins() {
        let dir = tmp();
        let path = dir.path().join(AUTHORIZED_KEYS_FILE);
        ensure_file(&path).unwrap();
        append_line(&path, "ssh-rsa AAAA root@a").unwrap();
        append_line(&path, "ssh-rsa CCCC root@a").unwrap();

        let map = read_authorized_keys_map(dir.path()).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["root@a"].key, "CCCC");
    }

    #[test]
    fn contains_key_matches_the_key_field_exactly() {
        let dir = tmp();
        let path = dir.path().join(KNOWN_HOSTS_FILE);
        ensure_file(&path).unwrap();
        append_line(&path, "node1,node1.example.net ssh-rsa AAAABBBB").unwrap();

        assert!(contains_key(&path, "ssh-rsa AAAABBBB").unwrap());
        // Neither a prefix of the stored key nor a superstring may match.
        assert!(!contains_key(&path, "ssh-rsa AAAA").unwrap());
        assert!(!contains_key(&path, "ssh-rsa AAAABBBBCCCC").unwrap());
        assert!(!contains_key(&path, "ssh-ed25519 AAAABBBB").unwrap());
    }

    #[test]
    fn contains_key_ignores_header_and_hostlists() {
        let dir = tmp();
        let path = dir.path().join(KNOWN_HOSTS_FILE);
        ensure_file(&path).unwrap();
        append_line(&path, "ssh-rsa,odd-host ssh-rsa AAAA").unwrap();

        // The hostlist field happens to contain "ssh-rsa"; only the key
        // field may be considered.
        assert!(contains_key(&path, "ssh-rsa AAAA").unwrap());
        assert!(!contains_key(&path, "odd-host ssh-rsa").unwrap());
    }
}
