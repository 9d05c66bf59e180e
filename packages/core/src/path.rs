//! Addresses into a JSON tree.
//!
//! A [`JsonPath`] is an ordered list of segments plus an absolute/relative
//! flag. The textual form uses `.` both as the root marker and as the segment
//! separator, so `.` is the document root, `.a.b` is absolute and `a.b` is
//! relative. The empty string is the empty relative path, which is the
//! identity for [`JsonPath::join`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The textual form of the root path.
pub const ROOT: &str = ".";

/// The segment separator.
pub const SEPARATOR: char = '.';

/// Errors raised while building or composing paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The textual form ends with the separator but is not the root.
    TrailingSeparator { path: String },
    /// A segment is empty (e.g. `a..b`) or contains the separator.
    InvalidSegment {
        path: String,
        position: usize,
        message: String,
    },
    /// `join` was handed an absolute path.
    AbsoluteJoin { base: String, other: String },
    /// `relative_to` was called with one absolute and one relative path.
    MixedAbsoluteness { path: String, base: String },
    /// `relative_to` was called with a base the path does not descend from.
    NotDescendant { path: String, base: String },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::TrailingSeparator { path } => {
                write!(f, "path '{}' cannot end with '{}'", path, SEPARATOR)
            }
            PathError::InvalidSegment {
                path,
                position,
                message,
            } => write!(
                f,
                "invalid segment at position {} in path '{}': {}",
                position, path, message
            ),
            PathError::AbsoluteJoin { base, other } => write!(
                f,
                "cannot join absolute path '{}' onto '{}'; only relative paths can be joined",
                other, base
            ),
            PathError::MixedAbsoluteness { path, base } => write!(
                f,
                "both paths should be relative or absolute: '{}' vs '{}'",
                path, base
            ),
            PathError::NotDescendant { path, base } => {
                write!(f, "unable to compute '{}' relative to '{}'", path, base)
            }
        }
    }
}

impl std::error::Error for PathError {}

/// An immutable address into a JSON tree.
///
/// Equality and ordering follow the textual form: `.a` and `a` differ, and
/// `.` (root) differs from `""` (empty).
///
/// # Examples
///
/// ```rust
/// use jsonipc_core::JsonPath;
///
/// let base = JsonPath::parse("._ipc_obj").unwrap();
/// let sub = JsonPath::parse("a.b").unwrap();
/// let full = base.join(&sub).unwrap();
/// assert_eq!(full.to_string(), "._ipc_obj.a.b");
/// assert_eq!(full.relative_to(&base).unwrap(), sub);
/// ```
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPath {
    segments: Vec<String>,
    absolute: bool,
}

impl JsonPath {
    /// The document root, `.`.
    pub fn root() -> Self {
        JsonPath {
            segments: Vec::new(),
            absolute: true,
        }
    }

    /// The empty relative path, `""`.
    pub fn empty() -> Self {
        JsonPath {
            segments: Vec::new(),
            absolute: false,
        }
    }

    /// Parse a textual path.
    ///
    /// Fails if the path ends with the separator while not being the root,
    /// or if any segment is empty.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s.is_empty() {
            return Ok(Self::empty());
        }
        if s == ROOT {
            return Ok(Self::root());
        }
        if s.ends_with(SEPARATOR) {
            return Err(PathError::TrailingSeparator {
                path: s.to_string(),
            });
        }

        let (absolute, body) = match s.strip_prefix(SEPARATOR) {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let mut segments = Vec::new();
        for (position, segment) in body.split(SEPARATOR).enumerate() {
            if segment.is_empty() {
                return Err(PathError::InvalidSegment {
                    path: s.to_string(),
                    position,
                    message: "empty segment".to_string(),
                });
            }
            segments.push(segment.to_string());
        }

        Ok(JsonPath { segments, absolute })
    }

    /// Build a path from segments, validating each.
    pub fn from_segments<I, S>(absolute: bool, segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for (position, segment) in segments.iter().enumerate() {
            Self::validate_segment(segment, position, &segments)?;
        }
        Ok(JsonPath { segments, absolute })
    }

    fn validate_segment(
        segment: &str,
        position: usize,
        all: &[String],
    ) -> Result<(), PathError> {
        let message = if segment.is_empty() {
            "empty segment"
        } else if segment.contains(SEPARATOR) {
            "segment contains the separator"
        } else {
            return Ok(());
        };
        Err(PathError::InvalidSegment {
            path: all.join("."),
            position,
            message: message.to_string(),
        })
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.absolute && self.segments.is_empty()
    }

    /// Number of segments. Both root and empty have zero.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.segments.iter()
    }

    /// Append the relative path `other` onto this one.
    ///
    /// Joining onto the root yields `other` made absolute; joining the empty
    /// path returns `self` unchanged.
    pub fn join(&self, other: &JsonPath) -> Result<JsonPath, PathError> {
        if other.absolute {
            return Err(PathError::AbsoluteJoin {
                base: self.to_string(),
                other: other.to_string(),
            });
        }
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Ok(JsonPath {
            segments,
            absolute: self.absolute,
        })
    }

    /// Parse `other` and join it onto this path.
    pub fn join_str(&self, other: &str) -> Result<JsonPath, PathError> {
        self.join(&JsonPath::parse(other)?)
    }

    /// The path with its last segment removed, or `None` for root and empty.
    ///
    /// The parent of a single-segment absolute path is the root; of a
    /// single-segment relative path, the empty path.
    #[must_use]
    pub fn parent(&self) -> Option<JsonPath> {
        let (_, init) = self.segments.split_last()?;
        Some(JsonPath {
            segments: init.to_vec(),
            absolute: self.absolute,
        })
    }

    /// The last segment. Root and empty return their own textual form.
    pub fn name(&self) -> &str {
        match self.segments.last() {
            Some(last) => last.as_str(),
            None if self.absolute => ROOT,
            None => "",
        }
    }

    /// The suffix of this path beyond `base`.
    pub fn relative_to(&self, base: &JsonPath) -> Result<JsonPath, PathError> {
        if self.absolute != base.absolute {
            return Err(PathError::MixedAbsoluteness {
                path: self.to_string(),
                base: base.to_string(),
            });
        }
        match self.segments.strip_prefix(base.segments.as_slice()) {
            Some(rest) => Ok(JsonPath {
                segments: rest.to_vec(),
                absolute: false,
            }),
            None => Err(PathError::NotDescendant {
                path: self.to_string(),
                base: base.to_string(),
            }),
        }
    }

    /// Whether `base` is this path or one of its ancestors.
    pub fn starts_with(&self, base: &JsonPath) -> bool {
        self.absolute == base.absolute && self.segments.starts_with(&base.segments)
    }

    /// Reinterpret this path relative to the root, whatever its flag.
    #[must_use]
    pub fn to_relative(&self) -> JsonPath {
        JsonPath {
            segments: self.segments.clone(),
            absolute: false,
        }
    }
}

impl Default for JsonPath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str(ROOT)?;
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl PartialOrd for JsonPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JsonPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JsonPath::parse(s)
    }
}

impl TryFrom<String> for JsonPath {
    type Error = PathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        JsonPath::parse(&s)
    }
}

impl TryFrom<&str> for JsonPath {
    type Error = PathError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        JsonPath::parse(s)
    }
}

impl From<JsonPath> for String {
    fn from(path: JsonPath) -> Self {
        path.to_string()
    }
}

// A string that does not parse is never equal to a path.
impl PartialEq<str> for JsonPath {
    fn eq(&self, other: &str) -> bool {
        JsonPath::parse(other).is_ok_and(|other| *self == other)
    }
}

impl PartialEq<&str> for JsonPath {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl PartialEq<JsonPath> for &str {
    fn eq(&self, other: &JsonPath) -> bool {
        other == *self
    }
}

impl PartialEq<JsonPath> for str {
    fn eq(&self, other: &JsonPath) -> bool {
        other == self
    }
}

/// Anything that can name a location in a document.
///
/// Lets document operations accept `&str`, `String` or an already-built
/// [`JsonPath`], resolving textual forms before any engine call.
pub trait IntoJsonPath {
    fn into_json_path(self) -> Result<JsonPath, PathError>;
}

impl IntoJsonPath for JsonPath {
    fn into_json_path(self) -> Result<JsonPath, PathError> {
        Ok(self)
    }
}

impl IntoJsonPath for &JsonPath {
    fn into_json_path(self) -> Result<JsonPath, PathError> {
        Ok(self.clone())
    }
}

impl IntoJsonPath for &str {
    fn into_json_path(self) -> Result<JsonPath, PathError> {
        JsonPath::parse(self)
    }
}

impl IntoJsonPath for String {
    fn into_json_path(self) -> Result<JsonPath, PathError> {
        JsonPath::parse(&self)
    }
}

impl IntoJsonPath for &String {
    fn into_json_path(self) -> Result<JsonPath, PathError> {
        JsonPath::parse(self)
    }
}

/// Build a [`JsonPath`] from a literal, panicking on malformed input.
///
/// ```rust
/// use jsonipc_core::json_path;
///
/// assert!(json_path!(".a.b").is_absolute());
/// ```
#[macro_export]
macro_rules! json_path {
    ($s:expr) => {
        $crate::JsonPath::parse($s).expect("invalid json path literal")
    };
}
