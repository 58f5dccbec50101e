use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum HostError {
    /// Control metadata names a value type the codec cannot carry.
    UnsupportedValueType { control: String, type_uri: Option<String> },
    /// Encoded value does not fit the fixed staging buffer.
    EnvelopeOverflow { needed: usize, capacity: usize },
    /// Ring buffer has no room for the whole envelope.
    TransportFull { needed: usize, available: usize },
    MalformedBundle { path: PathBuf, reason: String },
    Io(std::io::Error),
    Config(String),
    UnknownControl(String),
    UnknownPreset(String),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HostError::UnsupportedValueType { control, type_uri } => match type_uri {
                Some(uri) => write!(f, "Unsupported value type <{uri}> for control '{control}'"),
                None => write!(f, "Unknown value type for control '{control}'"),
            },
            HostError::EnvelopeOverflow { needed, capacity } => {
                write!(f, "Envelope overflow: {needed} bytes needed, {capacity} available")
            }
            HostError::TransportFull { needed, available } => {
                write!(f, "Transport full: {needed} bytes needed, {available} free")
            }
            HostError::MalformedBundle { path, reason } => {
                write!(f, "Malformed preset bundle {}: {reason}", path.display())
            }
            HostError::Io(err) => write!(f, "I/O error: {err}"),
            HostError::Config(msg) => write!(f, "Configuration error: {msg}"),
            HostError::UnknownControl(name) => write!(f, "Unknown control '{name}'"),
            HostError::UnknownPreset(uri) => write!(f, "Unknown preset <{uri}>"),
        }
    }
}

impl std::error::Error for HostError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HostError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        HostError::Io(err)
    }
}

impl From<toml::de::Error> for HostError {
    fn from(err: toml::de::Error) -> Self {
        HostError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for HostError {
    fn from(err: toml::ser::Error) -> Self {
        HostError::Config(err.to_string())
    }
}

impl HostError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        HostError::MalformedBundle {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for failures that only cost one message or one control.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HostError::EnvelopeOverflow { .. } | HostError::TransportFull { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
