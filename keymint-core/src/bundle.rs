use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Facts;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    /// The requested artifact: `public`, `private`, `known_hosts`, or
    /// `authorized_keys`. Mandatory, but kept a plain optional string so
    /// absence and unsupported values surface as
    /// [`Error::Config`](crate::Error::Config) from the dispatcher, not as
    /// a deserializer error.
    #[serde(default)]
    pub request: Option<String>,

    /// Logical key name, unique per target directory. Mandatory unless the
    /// request is a registry read.
    #[serde(default)]
    pub name: Option<String>,

    /// Key algorithm handed to the generator (`-t`).
    #[serde(default = "default_key_type", rename = "type")]
    pub key_type: String,

    /// Root under which key directories live.
    #[serde(default = "default_basedir")]
    pub basedir: PathBuf,

    /// Subdirectory of `basedir` holding the keys and registries.
    #[serde(default = "default_dir")]
    pub dir: String,

    /// Register the generated public key in `known_hosts`.
    #[serde(default)]
    pub hostkey: bool,

    /// Extra host identifiers appended to the `known_hosts` host list.
    #[serde(default)]
    pub hostaliases: Option<Vec<String>>,

    /// Append the generated public key to `authorized_keys`.
    #[serde(default)]
    pub authkey: bool,

    /// Key comment (`-C`). When unset, a role-based default is derived from
    /// the caller's facts; an explicit empty string is respected.
    #[serde(default)]
    pub comment: Option<String>,

    /// Return `authorized_keys` as a mapping keyed by comment instead of
    /// raw text.
    #[serde(default)]
    pub as_hash: bool,
}

impl Default for Bundle {
    fn default() -> Self {
        Self {
            request: None,
            name: None,
            key_type: default_key_type(),
            basedir: default_basedir(),
            dir: default_dir(),
            hostkey: false,
            hostaliases: None,
            authkey: false,
            comment: None,
            as_hash: false,
        }
    }
}

impl Bundle {
    /// The directory all paths for this bundle resolve under.
    pub fn target_dir(&self) -> PathBuf {
        self.basedir.join(&self.dir)
    }

    /// The key comment, with role-based defaulting.
    ///
    /// An explicitly set comment wins, even when empty. Otherwise a host key
    /// is commented with the hostname and an authorized key with
    /// `root@<hostname>`; a plain keypair gets no comment.
    pub fn resolved_comment(&self, facts: &Facts) -> Option<String> {
        if self.comment.is_some() {
            return self.comment.clone();
        }
        if self.hostkey {
            Some(facts.hostname.clone())
        } else if self.authkey {
            Some(format!("root@{}", facts.hostname))
        } else {
            None
        }
    }
}

/// A validated request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Public,
    Private,
    KnownHosts,
    AuthorizedKeys,
}

impl Request {
    /// Parse the bundle's `request` string. Returns `None` for anything
    /// outside the four supported kinds.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            "known_hosts" => Some(Self::KnownHosts),
            "authorized_keys" => Some(Self::AuthorizedKeys),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::KnownHosts => "known_hosts",
            Self::AuthorizedKeys => "authorized_keys",
        }
    }

    /// Registry reads never touch a keypair and do not require `name`.
    pub fn is_registry_read(self) -> bool {
        matches!(self, Self::KnownHosts | Self::AuthorizedKeys)
    }
}

fn default_key_type() -> String {
    "rsa".to_string()
}

fn default_basedir() -> PathBuf {
    PathBuf::from("/etc/keymint")
}

fn default_dir() -> String {
    "ssh".to_string()
}
