use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (no internal source, bad worker count, etc.).
    ConfigValidation(String),
    /// A configured calendar day is not `YYYY-MM-DD`.
    InvalidDate { field: String, value: String },
    /// A second internal source was registered for the same run.
    InternalSourceAlreadySet { current: String, requested: String },
    /// `reconcile` was called before any internal source was registered.
    InternalSourceMissing,
    /// The same source name was registered twice.
    DuplicateSource(String),
    /// Attempted to delete a trie node that still has children.
    NotALeaf(Vec<String>),
    /// IO error (file open, create, etc.).
    Io(String),
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::InvalidDate { field, value } => {
                write!(f, "{field}: cannot parse date '{value}' (expected YYYY-MM-DD)")
            }
            Self::InternalSourceAlreadySet { current, requested } => write!(
                f,
                "internal source already set to '{current}', cannot register '{requested}'"
            ),
            Self::InternalSourceMissing => write!(f, "internal source not set"),
            Self::DuplicateSource(source) => write!(f, "source '{source}' registered twice"),
            Self::NotALeaf(path) => {
                write!(f, "cannot delete non-leaf node at '{}'", path.join("/"))
            }
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}

impl From<std::io::Error> for ReconError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
