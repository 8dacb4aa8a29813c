//! SSH key material and trust registry management.
//!
//! `keymint-core` is the library behind the `keymint` CLI: given a logical
//! key name and a request kind, it lazily generates an SSH keypair on first
//! use (by invoking the external `ssh-keygen` program), optionally registers
//! the public key in the `known_hosts` or `authorized_keys` registry of the
//! target directory, and returns the requested artifact.
//!
//! The crate is built for repeated one-shot invocations from a
//! configuration-convergence run: every operation is idempotent, all state
//! lives on disk, and nothing outlives a single call.
//!
//! # Entry point
//!
//! [`dispatch`] (or [`Dispatcher`] when the key generator needs to be
//! customised) takes a [`Bundle`] of options and the caller's [`Facts`] and
//! returns an [`Artifact`]:
//!
//! ```no_run
//! use keymint_core::{dispatch, Bundle, Facts};
//!
//! let bundle = Bundle {
//!     request: Some("public".to_string()),
//!     name: Some("web1".to_string()),
//!     ..Bundle::default()
//! };
//! let facts = Facts {
//!     hostname: "web1".to_string(),
//!     fqdn: Some("web1.example.net".to_string()),
//!     ipaddress: None,
//! };
//! let artifact = dispatch(&bundle, &facts)?;
//! # Ok::<(), keymint_core::Error>(())
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod bundle;
pub mod dispatch;
pub mod keygen;
pub mod keypair;
pub mod lock;
pub mod registry;

pub use bundle::{Bundle, Request};
pub use dispatch::{dispatch, Dispatcher};
pub use keygen::KeygenCommand;
pub use keypair::{KeySpec, KeypairManager, Registration};
pub use registry::AuthorizedKeyEntry;

/// Errors surfaced by a single invocation.
///
/// Nothing is retried automatically; every variant is local to one
/// convergence run and is reported to the caller, which decides whether the
/// failing step halts the run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing bundle fields, an unsupported request kind, a missing
    /// FQDN fact, or a filesystem entry colliding with the target directory.
    #[error("{0}")]
    Config(String),

    /// The external key generator exited with a non-zero status.
    /// `output` carries its combined stdout/stderr.
    #[error("calling `{cmdline}` resulted in error: {output}")]
    KeyGeneration { cmdline: String, output: String },

    /// The external key generator exceeded its deadline and was killed.
    #[error("`{cmdline}` did not complete within {limit:?}")]
    Timeout { cmdline: String, limit: Duration },

    /// A filesystem operation failed. `context` names the operation.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Wrapper added at the dispatcher boundary, naming the request that was
    /// being fulfilled when `source` occurred.
    #[error("unable to fulfill request '{request}': {source}")]
    Request {
        request: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// The innermost error, unwrapping any [`Error::Request`] layers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Request { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Per-node facts supplied by the caller.
///
/// The orchestration runtime resolves these; nothing in this crate queries
/// ambient host state. `fqdn` is mandatory only for host-key registration
/// and is checked there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Facts {
    pub hostname: String,
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub ipaddress: Option<String>,
}

/// What a fulfilled request returns.
///
/// Key text and raw registry contents come back as [`Artifact::Text`]; an
/// `authorized_keys` request with `as_hash` set returns [`Artifact::Map`],
/// keyed by each entry's comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Artifact {
    Text(String),
    Map(HashMap<String, AuthorizedKeyEntry>),
}

impl Artifact {
    /// The text form, or `None` for a structured mapping.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Map(_) => None,
        }
    }

    /// The structured mapping, or `None` for text.
    pub fn as_map(&self) -> Option<&HashMap<String, AuthorizedKeyEntry>> {
        match self {
            Self::Text(_) => None,
            Self::Map(m) => Some(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_request_layers() {
        let inner = Error::config("name argument is required");
        let wrapped = Error::Request {
            request: "private".to_string(),
            source: Box::new(inner),
        };
        assert!(matches!(wrapped.root_cause(), Error::Config(_)));
    }

    #[test]
    fn request_error_names_the_request() {
        let err = Error::Request {
            request: "public".to_string(),
            source: Box::new(Error::config("boom")),
        };
        let msg = err.to_string();
        assert!(msg.contains("unable to fulfill request 'public'"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn facts_deserialize_with_optional_fields() {
        let facts: Facts = serde_json::from_str(r#"{"hostname": "node1"}"#).unwrap();
        assert_eq!(facts.hostname, "node1");
        assert!(facts.fqdn.is_none());
        assert!(facts.ipaddress.is_none());
    }

    #[test]
    fn artifact_text_serializes_untagged() {
        let artifact = Artifact::Text("ssh-rsa AAAA root@node1\n".to_string());
        let json = serde_json::to_string(&artifact).unwrap();
        assert_eq!(json, "\"ssh-rsa AAAA root@node1\\n\"");
    }
}
