//! # Error Handling
//!
//! Error types for the edgeplane control plane. The three variants at the top
//! are the taxonomy the snapshot pipeline surfaces to callers (structural
//! validation, referential integrity, publish); the remaining variants cover
//! configuration loading and server lifecycle.

/// Custom result type for edgeplane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the edgeplane control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A single resource violates its own schema (missing field, bad range,
    /// empty collection)
    #[error("structural validation failed{}: {message}", fmt_resource(.resource))]
    Structural {
        message: String,
        resource: Option<String>,
    },

    /// A cross-resource reference inside a snapshot does not resolve
    #[error("unresolved {kind} reference '{name}'{}", fmt_context(.context))]
    Reference {
        kind: String,
        name: String,
        context: Option<String>,
    },

    /// The snapshot cache rejected a publish, or one was already in flight
    #[error("publish failed: {message}")]
    Publish { message: String },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network transport errors (gRPC)
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_resource(resource: &Option<String>) -> String {
    match resource {
        Some(name) => format!(" for '{}'", name),
        None => String::new(),
    }
}

fn fmt_context(context: &Option<String>) -> String {
    match context {
        Some(ctx) => format!(" (referenced by {})", ctx),
        None => String::new(),
    }
}

impl Error {
    /// Create a structural validation error
    pub fn structural<S: Into<String>>(message: S) -> Self {
        Self::Structural { message: message.into(), resource: None }
    }

    /// Create a structural validation error naming the offending resource
    pub fn structural_for<R: Into<String>, S: Into<String>>(resource: R, message: S) -> Self {
        Self::Structural { message: message.into(), resource: Some(resource.into()) }
    }

    /// Create a referential integrity error for a dangling reference
    pub fn reference<K: Into<String>, N: Into<String>>(kind: K, name: N) -> Self {
        Self::Reference { kind: kind.into(), name: name.into(), context: None }
    }

    /// Create a referential integrity error noting where the reference occurs
    pub fn reference_in<K: Into<String>, N: Into<String>, C: Into<String>>(
        kind: K,
        name: N,
        context: C,
    ) -> Self {
        Self::Reference { kind: kind.into(), name: name.into(), context: Some(context.into()) }
    }

    /// Create a publish error
    pub fn publish<S: Into<String>>(message: S) -> Self {
        Self::Publish { message: message.into() }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Stable kind label used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Structural { .. } => "structural_validation",
            Error::Reference { .. } => "referential_integrity",
            Error::Publish { .. } => "publish",
            Error::Config(_) => "config",
            Error::Transport(_) => "transport",
            Error::Io(_) => "io",
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::structural(message)
    }
}
