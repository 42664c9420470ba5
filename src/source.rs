//! Source identity. A source is either a file on disk or a numbered
//! reference whose content only the adapter can produce. Both forms share
//! one identifier type so breakpoints, frames, and the per-session source
//! registry can agree on what "the same source" means.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use md5::Md5;
use parking_lot::Mutex;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::errors::{ClientError, Result};
use crate::requests::{BreakpointLocationsArguments, Command, SourceArguments};
use crate::responses::{BreakpointLocationsResponse, Response, SourceResponse};
use crate::session::Session;
use crate::types::{self, BreakpointLocation, Checksum, ChecksumAlgorithm};

/// Canonical equality key for a source.
///
/// File sources compare by path. Reference sources compare by
/// `(session, reference)`; the optional stability hash (derived from the
/// adapter-provided name/origin) is carried for cross-restart correlation
/// but does not participate in equality.
#[derive(Debug, Clone)]
pub enum SourceId {
    File(PathBuf),
    Reference {
        session: i64,
        reference: i64,
        stability: Option<String>,
    },
}

impl PartialEq for SourceId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::File(a), Self::File(b)) => a == b,
            (
                Self::Reference {
                    session: sa,
                    reference: ra,
                    ..
                },
                Self::Reference {
                    session: sb,
                    reference: rb,
                    ..
                },
            ) => sa == sb && ra == rb,
            _ => false,
        }
    }
}

impl Eq for SourceId {}

impl Hash for SourceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::File(path) => {
                0u8.hash(state);
                path.hash(state);
            }
            Self::Reference {
                session, reference, ..
            } => {
                1u8.hash(state);
                session.hash(state);
                reference.hash(state);
            }
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Reference {
                session,
                reference,
                stability,
            } => match stability {
                Some(hash) => write!(f, "ref:{hash}"),
                None => write!(f, "ref:{session}:{reference}"),
            },
        }
    }
}

impl SourceId {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Derives the identifier for a raw DAP source descriptor received in
    /// `session`. Returns `None` when the descriptor carries neither a
    /// usable reference nor a path.
    pub fn from_descriptor(session: i64, descriptor: &types::Source) -> Option<Self> {
        match descriptor.source_reference {
            Some(reference) if reference > 0 => Some(Self::Reference {
                session,
                reference,
                stability: stability_hash(descriptor),
            }),
            _ => descriptor
                .path
                .as_deref()
                .filter(|path| !path.is_empty())
                .map(|path| Self::File(PathBuf::from(path))),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Reference { .. } => None,
        }
    }
}

/// A stable fingerprint for a reference source, when the adapter gives us
/// anything stable to fingerprint.
fn stability_hash(descriptor: &types::Source) -> Option<String> {
    let name = descriptor.name.as_deref().unwrap_or("");
    let origin = descriptor.origin.as_deref().unwrap_or("");
    if name.is_empty() && origin.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(origin.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{byte:02x}"));
    }
    Some(hex)
}

/// A position inside a source. Locations exist independently of any loaded
/// source; a breakpoint in a file that no session has opened is still a
/// location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub source: SourceId,
    pub line: i64,
    pub column: i64,
}

impl Location {
    pub fn new(source: SourceId, line: i64, column: i64) -> Self {
        Self {
            source,
            line,
            column,
        }
    }

    pub fn in_file(path: impl Into<PathBuf>, line: i64, column: i64) -> Self {
        Self::new(SourceId::file(path), line, column)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.line, self.column)
    }
}

/// A source loaded in one session: the identifier, the raw descriptor as
/// last received, and lazily cached content.
pub struct Source {
    id: SourceId,
    session: Weak<Session>,
    descriptor: Mutex<types::Source>,
    content: Mutex<Option<Arc<String>>>,
}

impl Source {
    pub(crate) fn new(id: SourceId, session: &Arc<Session>, descriptor: types::Source) -> Arc<Self> {
        Arc::new(Self {
            id,
            session: Arc::downgrade(session),
            descriptor: Mutex::new(descriptor),
            content: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    /// Replaces the raw descriptor; the adapter may refresh checksums or
    /// names in a `loadedSource(changed)` event. Cached content is dropped.
    pub(crate) fn update_descriptor(&self, descriptor: types::Source) {
        *self.descriptor.lock() = descriptor;
        self.content.lock().take();
    }

    /// The raw descriptor to embed in requests such as `setBreakpoints`.
    pub fn descriptor(&self) -> types::Source {
        self.descriptor.lock().clone()
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.id, SourceId::Reference { .. })
    }

    pub fn is_file(&self) -> bool {
        self.id.is_file()
    }

    /// Display name: the adapter-provided name, or the basename of the
    /// path, or the reference key.
    pub fn filename(&self) -> String {
        if let Some(name) = self.descriptor.lock().name.clone() {
            return name;
        }
        match &self.id {
            SourceId::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            id @ SourceId::Reference { .. } => id.to_string(),
        }
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session.upgrade().ok_or(ClientError::Terminated)
    }

    /// The source text: read from disk for file sources, fetched through a
    /// `source` request for reference sources. Cached after the first call.
    pub async fn content(&self) -> Result<Arc<String>> {
        if let Some(content) = self.content.lock().clone() {
            return Ok(content);
        }
        let content = match &self.id {
            SourceId::File(path) => Arc::new(
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|err| ClientError::Protocol(err.into()))?,
            ),
            SourceId::Reference { reference, .. } => {
                let session = self.session()?;
                let body = session
                    .request(Command::Source(SourceArguments {
                        source: Some(self.descriptor()),
                        source_reference: *reference,
                    }))
                    .await?;
                let response: SourceResponse = Response::parse(body)?;
                Arc::new(response.content)
            }
        };
        *self.content.lock() = Some(Arc::clone(&content));
        Ok(content)
    }

    /// True when any one of the supplied checksums matches the content.
    /// Checks short-circuit on the first match; `timestamp` checksums are
    /// skipped.
    pub async fn matches_checksums(&self, checksums: &[Checksum]) -> Result<bool> {
        if checksums.is_empty() {
            return Ok(false);
        }
        let content = self.content().await?;
        for checksum in checksums {
            let actual = match checksum.algorithm {
                ChecksumAlgorithm::MD5 => hex_digest::<Md5>(content.as_bytes()),
                ChecksumAlgorithm::SHA1 => hex_digest::<Sha1>(content.as_bytes()),
                ChecksumAlgorithm::SHA256 => hex_digest::<Sha256>(content.as_bytes()),
                ChecksumAlgorithm::Timestamp => continue,
            };
            if actual.eq_ignore_ascii_case(checksum.checksum.trim()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Valid breakpoint positions on `line`, as reported by the adapter.
    /// Requires the `breakpointLocations` capability.
    pub async fn breakpoint_locations(&self, line: i64) -> Result<Vec<BreakpointLocation>> {
        let session = self.session()?;
        if !session.supports_breakpoint_locations() {
            return Err(ClientError::Capability("breakpointLocations"));
        }
        let body = session
            .request(Command::BreakpointLocations(BreakpointLocationsArguments {
                source: self.descriptor(),
                line,
                column: None,
                end_line: None,
                end_column: None,
            }))
            .await?;
        let response: BreakpointLocationsResponse = Response::parse(body)?;
        Ok(response.breakpoints)
    }
}

fn hex_digest<D: Digest>(bytes: &[u8]) -> String {
    let digest = D::new_with_prefix(bytes).finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_and_reference_identifiers_are_distinct() {
        let file = SourceId::file("/tmp/app.js");
        let reference = SourceId::Reference {
            session: 1,
            reference: 4,
            stability: None,
        };
        assert_ne!(file, reference);
        assert_eq!(file, SourceId::file("/tmp/app.js"));
    }

    #[test]
    fn reference_equality_ignores_stability() {
        let a = SourceId::Reference {
            session: 1,
            reference: 4,
            stability: Some("abcd".to_string()),
        };
        let b = SourceId::Reference {
            session: 1,
            reference: 4,
            stability: None,
        };
        assert_eq!(a, b);
    }

    #[test]
    fn location_renders_a_stable_key() {
        let location = Location::in_file("/tmp/loop.js", 3, 0);
        assert_eq!(location.to_string(), "/tmp/loop.js:3:0");
    }

    #[test]
    fn descriptor_with_reference_wins_over_path() {
        let descriptor = types::Source {
            path: Some("/tmp/app.js".to_string()),
            source_reference: Some(7),
            ..Default::default()
        };
        match SourceId::from_descriptor(2, &descriptor) {
            Some(SourceId::Reference {
                session, reference, ..
            }) => {
                assert_eq!(session, 2);
                assert_eq!(reference, 7);
            }
            other => panic!("expected reference id, got {other:?}"),
        }
    }

    #[test]
    fn hex_digest_matches_known_sha256() {
        // sha256("abc")
        assert_eq!(
            hex_digest::<Sha256>(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    fn file_source(path: &Path) -> Source {
        Source {
            id: SourceId::file(path),
            session: Weak::new(),
            descriptor: Mutex::new(types::Source {
                path: Some(path.display().to_string()),
                ..Default::default()
            }),
            content: Mutex::new(None),
        }
    }

    #[tokio::test]
    async fn file_content_is_read_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.js");
        tokio::fs::write(&path, "let i = 0;\n").await.unwrap();

        let source = file_source(&path);
        let content = source.content().await.unwrap();
        assert_eq!(content.as_str(), "let i = 0;\n");

        // A second read serves the cache even if the file changes.
        tokio::fs::write(&path, "changed").await.unwrap();
        let cached = source.content().await.unwrap();
        assert_eq!(cached.as_str(), "let i = 0;\n");
    }

    #[tokio::test]
    async fn one_matching_checksum_is_enough() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.js");
        tokio::fs::write(&path, "abc").await.unwrap();

        let source = file_source(&path);
        let checksums = vec![
            Checksum {
                algorithm: ChecksumAlgorithm::MD5,
                checksum: "definitely wrong".to_string(),
            },
            Checksum {
                algorithm: ChecksumAlgorithm::SHA256,
                checksum: "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
                    .to_string(),
            },
        ];
        assert!(source.matches_checksums(&checksums).await.unwrap());
        assert!(!source
            .matches_checksums(&[Checksum {
                algorithm: ChecksumAlgorithm::SHA1,
                checksum: "0000".to_string(),
            }])
            .await
            .unwrap());
    }
}
