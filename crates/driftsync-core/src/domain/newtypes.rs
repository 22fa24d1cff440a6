//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain identifiers and values.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// UUID-based ID types
// ============================================================================

/// Identifier for SyncFolder entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(Uuid);

impl FolderId {
    /// Create a new random FolderId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a FolderId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Create a nil (all zeros) FolderId
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for FolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for FolderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FolderId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid FolderId: {e}")))
    }
}

impl From<Uuid> for FolderId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier for Conflict entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Create a new random ConflictId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a ConflictId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConflictId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid ConflictId: {e}")))
    }
}

impl From<Uuid> for ConflictId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Path types
// ============================================================================

/// A validated absolute path on the local filesystem
///
/// LocalPath ensures the path is:
/// - Absolute (starts with /)
/// - Normalized (no . or .. components)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct LocalPath(PathBuf);

impl LocalPath {
    /// Create a new LocalPath, validating it is absolute
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is not absolute
    pub fn new(path: PathBuf) -> Result<Self, DomainError> {
        if !path.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "Path must be absolute: {}",
                path.display()
            )));
        }

        // Normalize without touching the filesystem; the path may not exist yet.
        let normalized = Self::normalize_path(&path)?;
        Ok(Self(normalized))
    }

    /// Get the inner PathBuf reference
    #[must_use]
    pub fn as_path(&self) -> &PathBuf {
        &self.0
    }

    /// Convert to owned PathBuf
    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Get the path relative to a root
    ///
    /// # Errors
    /// Returns error if this path is not within the root
    pub fn relative_to(&self, root: &LocalPath) -> Result<RelativePath, DomainError> {
        let stripped = self.0.strip_prefix(&root.0).map_err(|_| {
            DomainError::PathNotInRoot(format!(
                "{} is not within {}",
                self.0.display(),
                root.0.display()
            ))
        })?;

        RelativePath::new(stripped.to_string_lossy().replace('\\', "/"))
    }

    /// Join a folder-relative path onto this root
    #[must_use]
    pub fn join_relative(&self, relative: &RelativePath) -> LocalPath {
        Self(self.0.join(relative.as_str()))
    }

    /// Returns true if `other` lies within this path
    #[must_use]
    pub fn contains(&self, other: &LocalPath) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Normalize a path by resolving . and .. components
    fn normalize_path(path: &PathBuf) -> Result<PathBuf, DomainError> {
        use std::path::Component;

        let mut normalized = PathBuf::new();

        for component in path.components() {
            match component {
                Component::Prefix(p) => normalized.push(p.as_os_str()),
                Component::RootDir => normalized.push("/"),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(DomainError::InvalidPath(
                            "Path escapes root via ..".to_string(),
                        ));
                    }
                }
                Component::Normal(c) => normalized.push(c),
            }
        }

        Ok(normalized)
    }
}

impl Display for LocalPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<PathBuf> for LocalPath {
    type Error = DomainError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl From<LocalPath> for PathBuf {
    fn from(path: LocalPath) -> Self {
        path.0
    }
}

impl AsRef<std::path::Path> for LocalPath {
    fn as_ref(&self) -> &std::path::Path {
        &self.0
    }
}

/// A remote file-store path (must start with /)
///
/// Represents paths on the remote replica, e.g., "/Documents/report.pdf"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    /// Create a new RemotePath
    ///
    /// # Errors
    /// Returns error if the path doesn't start with '/', contains double
    /// slashes, or contains traversal components
    pub fn new(path: String) -> Result<Self, DomainError> {
        if !path.starts_with('/') {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path must start with '/': {path}"
            )));
        }

        if path.len() > 1 && path.contains("//") {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path contains invalid double slashes: {path}"
            )));
        }

        if path.split('/').any(|c| c == "..") {
            return Err(DomainError::InvalidRemotePath(format!(
                "Remote path contains invalid traversal: {path}"
            )));
        }

        Ok(Self(path))
    }

    /// Create the root path "/"
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join a folder-relative path onto this remote root
    #[must_use]
    pub fn join_relative(&self, relative: &RelativePath) -> RemotePath {
        if self.0 == "/" {
            Self(format!("/{}", relative.as_str()))
        } else {
            Self(format!("{}/{}", self.0, relative.as_str()))
        }
    }

    /// Strip this root from a full remote path, yielding the relative part
    ///
    /// Returns `None` if `full` does not lie within this root.
    #[must_use]
    pub fn relative_of(&self, full: &RemotePath) -> Option<RelativePath> {
        let rest = if self.0 == "/" {
            full.0.strip_prefix('/')?
        } else {
            full.0
                .strip_prefix(&self.0)
                .and_then(|r| r.strip_prefix('/'))?
        };

        RelativePath::new(rest.to_string()).ok()
    }

    /// Get the parent path
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0 == "/" {
            return None;
        }

        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Get the file name component
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.0 == "/" {
            return None;
        }

        self.0.rsplit('/').next()
    }
}

impl Display for RemotePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemotePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemotePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemotePath> for String {
    fn from(path: RemotePath) -> Self {
        path.0
    }
}

/// A folder-relative path, valid on both replicas
///
/// This is the key under which a file is tracked within a sync folder:
/// forward-slash separated, no leading slash, no traversal components.
/// Example: "docs/report.pdf".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    /// Create a new RelativePath
    ///
    /// # Errors
    /// Returns error if the path is empty, starts with '/', or contains
    /// traversal components
    pub fn new(path: String) -> Result<Self, DomainError> {
        if path.is_empty() {
            return Err(DomainError::InvalidRelativePath(
                "Relative path cannot be empty".to_string(),
            ));
        }

        if path.starts_with('/') {
            return Err(DomainError::InvalidRelativePath(format!(
                "Relative path must not start with '/': {path}"
            )));
        }

        if path.split('/').any(|c| c == ".." || c == "." || c.is_empty()) {
            return Err(DomainError::InvalidRelativePath(format!(
                "Relative path contains invalid components: {path}"
            )));
        }

        Ok(Self(path))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the final path component (file or directory name)
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Get the parent component, if any
    #[must_use]
    pub fn parent(&self) -> Option<RelativePath> {
        self.0.rfind('/').map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Replace the final component with a new name
    #[must_use]
    pub fn with_file_name(&self, name: &str) -> RelativePath {
        match self.0.rfind('/') {
            Some(idx) => Self(format!("{}/{}", &self.0[..idx], name)),
            None => Self(name.to_string()),
        }
    }
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RelativePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RelativePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RelativePath> for String {
    fn from(path: RelativePath) -> Self {
        path.0
    }
}

// ============================================================================
// Checksum type
// ============================================================================

/// Hex-encoded SHA-256 content checksum
///
/// Used to detect whether a file's data actually changed versus only its
/// timestamp, and as the reconciliation baseline for conflict detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    /// Expected length of a hex-encoded SHA-256 digest
    const EXPECTED_LEN: usize = 64;

    /// Create a new Checksum
    ///
    /// # Errors
    /// Returns error if the string is not 64 lowercase hex characters
    pub fn new(hex: String) -> Result<Self, DomainError> {
        if hex.len() != Self::EXPECTED_LEN {
            return Err(DomainError::InvalidChecksum(format!(
                "Checksum has wrong length: expected {} hex chars, got {}",
                Self::EXPECTED_LEN,
                hex.len()
            )));
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidChecksum(format!(
                "Checksum is not valid hex: {hex}"
            )));
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Create a Checksum from a raw 32-byte digest
    #[must_use]
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        use std::fmt::Write;

        let mut hex = String::with_capacity(Self::EXPECTED_LEN);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Checksum {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for Checksum {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Checksum> for String {
    fn from(checksum: Checksum) -> Self {
        checksum.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod folder_id_tests {
        use super::*;

        #[test]
        fn test_new_creates_unique_ids() {
            let id1 = FolderId::new();
            let id2 = FolderId::new();
            assert_ne!(id1, id2);
        }

        #[test]
        fn test_from_str_roundtrip() {
            let id = FolderId::new();
            let parsed: FolderId = id.to_string().parse().unwrap();
            assert_eq!(id, parsed);
        }

        #[test]
        fn test_from_str_invalid() {
            let result: Result<FolderId, _> = "not-a-uuid".parse();
            assert!(result.is_err());
        }

        #[test]
        fn test_serde_roundtrip() {
            let id = FolderId::new();
            let json = serde_json::to_string(&id).unwrap();
            let parsed: FolderId = serde_json::from_str(&json).unwrap();
            assert_eq!(id, parsed);
        }
    }

    mod local_path_tests {
        use super::*;

        #[test]
        fn test_new_absolute_path() {
            let path = LocalPath::new(PathBuf::from("/home/user/sync")).unwrap();
            assert_eq!(path.to_string(), "/home/user/sync");
        }

        #[test]
        fn test_new_relative_path_fails() {
            let result = LocalPath::new(PathBuf::from("relative/path"));
            assert!(result.is_err());
        }

        #[test]
        fn test_normalization() {
            let path = LocalPath::new(PathBuf::from("/home/user/./sync")).unwrap();
            assert_eq!(path.to_string(), "/home/user/sync");
        }

        #[test]
        fn test_relative_to() {
            let root = LocalPath::new(PathBuf::from("/home/user/sync")).unwrap();
            let child = LocalPath::new(PathBuf::from("/home/user/sync/docs/file.txt")).unwrap();
            let relative = child.relative_to(&root).unwrap();
            assert_eq!(relative.as_str(), "docs/file.txt");
        }

        #[test]
        fn test_relative_to_outside_root_fails() {
            let root = LocalPath::new(PathBuf::from("/home/user/sync")).unwrap();
            let other = LocalPath::new(PathBuf::from("/home/other/file.txt")).unwrap();
            assert!(other.relative_to(&root).is_err());
        }

        #[test]
        fn test_join_relative() {
            let root = LocalPath::new(PathBuf::from("/home/user/sync")).unwrap();
            let rel = RelativePath::new("docs/file.txt".to_string()).unwrap();
            let joined = root.join_relative(&rel);
            assert_eq!(joined.to_string(), "/home/user/sync/docs/file.txt");
        }

        #[test]
        fn test_contains() {
            let root = LocalPath::new(PathBuf::from("/home/user/sync")).unwrap();
            let inside = LocalPath::new(PathBuf::from("/home/user/sync/a.txt")).unwrap();
            let outside = LocalPath::new(PathBuf::from("/tmp/a.txt")).unwrap();
            assert!(root.contains(&inside));
            assert!(!root.contains(&outside));
        }
    }

    mod remote_path_tests {
        use super::*;

        #[test]
        fn test_new_valid() {
            let path = RemotePath::new("/Documents/file.txt".to_string()).unwrap();
            assert_eq!(path.as_str(), "/Documents/file.txt");
        }

        #[test]
        fn test_no_leading_slash_fails() {
            assert!(RemotePath::new("Documents/file.txt".to_string()).is_err());
        }

        #[test]
        fn test_double_slash_fails() {
            assert!(RemotePath::new("/Documents//file.txt".to_string()).is_err());
        }

        #[test]
        fn test_traversal_fails() {
            assert!(RemotePath::new("/Documents/../file.txt".to_string()).is_err());
        }

        #[test]
        fn test_join_relative() {
            let root = RemotePath::new("/backup".to_string()).unwrap();
            let rel = RelativePath::new("docs/a.txt".to_string()).unwrap();
            assert_eq!(root.join_relative(&rel).as_str(), "/backup/docs/a.txt");

            let slash_root = RemotePath::root();
            assert_eq!(slash_root.join_relative(&rel).as_str(), "/docs/a.txt");
        }

        #[test]
        fn test_relative_of() {
            let root = RemotePath::new("/backup".to_string()).unwrap();
            let full = RemotePath::new("/backup/docs/a.txt".to_string()).unwrap();
            let rel = root.relative_of(&full).unwrap();
            assert_eq!(rel.as_str(), "docs/a.txt");
        }

        #[test]
        fn test_relative_of_outside_root() {
            let root = RemotePath::new("/backup".to_string()).unwrap();
            let full = RemotePath::new("/other/docs/a.txt".to_string()).unwrap();
            assert!(root.relative_of(&full).is_none());
        }

        #[test]
        fn test_parent_and_file_name() {
            let path = RemotePath::new("/Documents/Sub/file.txt".to_string()).unwrap();
            assert_eq!(path.file_name(), Some("file.txt"));
            assert_eq!(path.parent().unwrap().as_str(), "/Documents/Sub");
            assert!(RemotePath::root().parent().is_none());
        }
    }

    mod relative_path_tests {
        use super::*;

        #[test]
        fn test_new_valid() {
            let path = RelativePath::new("docs/report.pdf".to_string()).unwrap();
            assert_eq!(path.as_str(), "docs/report.pdf");
        }

        #[test]
        fn test_empty_fails() {
            assert!(RelativePath::new(String::new()).is_err());
        }

        #[test]
        fn test_leading_slash_fails() {
            assert!(RelativePath::new("/docs/a.txt".to_string()).is_err());
        }

        #[test]
        fn test_traversal_fails() {
            assert!(RelativePath::new("docs/../a.txt".to_string()).is_err());
        }

        #[test]
        fn test_file_name() {
            let path = RelativePath::new("docs/report.pdf".to_string()).unwrap();
            assert_eq!(path.file_name(), "report.pdf");

            let flat = RelativePath::new("report.pdf".to_string()).unwrap();
            assert_eq!(flat.file_name(), "report.pdf");
        }

        #[test]
        fn test_parent() {
            let path = RelativePath::new("docs/sub/report.pdf".to_string()).unwrap();
            assert_eq!(path.parent().unwrap().as_str(), "docs/sub");

            let flat = RelativePath::new("report.pdf".to_string()).unwrap();
            assert!(flat.parent().is_none());
        }

        #[test]
        fn test_with_file_name() {
            let path = RelativePath::new("docs/report.pdf".to_string()).unwrap();
            assert_eq!(
                path.with_file_name("report (copy).pdf").as_str(),
                "docs/report (copy).pdf"
            );

            let flat = RelativePath::new("report.pdf".to_string()).unwrap();
            assert_eq!(flat.with_file_name("other.pdf").as_str(), "other.pdf");
        }
    }

    mod checksum_tests {
        use super::*;

        const VALID: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

        #[test]
        fn test_valid_checksum() {
            let checksum = Checksum::new(VALID.to_string()).unwrap();
            assert_eq!(checksum.as_str(), VALID);
        }

        #[test]
        fn test_wrong_length_fails() {
            assert!(Checksum::new("abc123".to_string()).is_err());
        }

        #[test]
        fn test_non_hex_fails() {
            let bad = "z".repeat(64);
            assert!(Checksum::new(bad).is_err());
        }

        #[test]
        fn test_uppercase_normalized() {
            let upper = VALID.to_uppercase();
            let checksum = Checksum::new(upper).unwrap();
            assert_eq!(checksum.as_str(), VALID);
        }

        #[test]
        fn test_from_digest() {
            let digest = [0u8; 32];
            let checksum = Checksum::from_digest(&digest);
            assert_eq!(checksum.as_str(), "0".repeat(64));
        }

        #[test]
        fn test_serde_roundtrip() {
            let checksum = Checksum::new(VALID.to_string()).unwrap();
            let json = serde_json::to_string(&checksum).unwrap();
            let parsed: Checksum = serde_json::from_str(&json).unwrap();
            assert_eq!(checksum, parsed);
        }
    }
}
