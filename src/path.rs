use crate::error::{FsError, FsResult};
use std::fmt;

/// Maximum length of a single path component, in bytes.
pub const NAME_MAX: usize = 255;

/// A single validated segment of a relative path.
///
/// Guaranteed non-empty, free of separators and NUL, and not one of the
/// `.`/`..` traversal names. Length is validated separately with
/// [`PathComponent::check_length`] so callers can report the length error
/// on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathComponent(String);

impl PathComponent {
    pub fn new(name: impl Into<String>) -> FsResult<Self> {
        let name = name.into();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\0')
        {
            return Err(FsError::InvalidArgument(format!(
                "invalid path component: {:?}",
                name
            )));
        }
        Ok(PathComponent(name))
    }

    /// Constructor for segments that were already validated as part of a
    /// [`RelativePath`].
    pub(crate) fn from_validated(name: &str) -> Self {
        PathComponent(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject names longer than [`NAME_MAX`]. Applied by handlers before any
    /// operation that introduces a new name.
    pub fn check_length(&self) -> FsResult<()> {
        if self.0.len() > NAME_MAX {
            Err(FsError::NameTooLong(self.0.len()))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PathComponent {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A `/`-separated path relative to the mount root.
///
/// The empty path names the mount root itself. No leading or trailing
/// separators; every segment satisfies the [`PathComponent`] rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RelativePath(String);

impl RelativePath {
    /// The mount root.
    pub fn root() -> Self {
        RelativePath(String::new())
    }

    pub fn new(path: impl Into<String>) -> FsResult<Self> {
        let path = path.into();
        if path.is_empty() {
            return Ok(RelativePath(path));
        }
        if path.starts_with('/') || path.ends_with('/') {
            return Err(FsError::InvalidArgument(format!(
                "relative path has a leading or trailing separator: {:?}",
                path
            )));
        }
        for segment in path.split('/') {
            PathComponent::new(segment)?;
        }
        Ok(RelativePath(path))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments from the root down. Empty for the mount root.
    pub fn components(&self) -> impl Iterator<Item = PathComponent> + '_ {
        self.0
            .split('/')
            .filter(|s| !s.is_empty())
            .map(PathComponent::from_validated)
    }

    /// Everything up to the final component. The root is its own dirname.
    pub fn dirname(&self) -> RelativePath {
        match self.0.rfind('/') {
            Some(idx) => RelativePath(self.0[..idx].to_string()),
            None => RelativePath::root(),
        }
    }

    /// The final component, or `None` for the mount root.
    pub fn basename(&self) -> Option<PathComponent> {
        if self.0.is_empty() {
            return None;
        }
        let name = match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        };
        Some(PathComponent::from_validated(name))
    }

    /// `(dirname, basename)`, or `None` for the mount root.
    pub fn split(&self) -> Option<(RelativePath, PathComponent)> {
        self.basename().map(|name| (self.dirname(), name))
    }

    pub fn join(&self, name: &PathComponent) -> RelativePath {
        if self.0.is_empty() {
            RelativePath(name.as_str().to_string())
        } else {
            RelativePath(format!("{}/{}", self.0, name))
        }
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
