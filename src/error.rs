use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// LoadError – what `DatasetLoader::load` hands back on failure
// ---------------------------------------------------------------------------

/// Failure of a single `load` call. Every fault raised while resolving
/// resources or parsing ends up here; nothing escapes `load` any other way.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The named resource is not present under any resource root.
    #[error("resource `{name}` not found (searched: {searched:?})")]
    ResourceNotFound { name: String, searched: Vec<PathBuf> },

    /// The name could not be turned into a filesystem path.
    #[error("cannot resolve resource `{name}` to a file path: {reason}")]
    PathResolutionFailure { name: String, reason: String },

    /// The parser rejected the XML/DTD pair.
    #[error("failed to parse {}: {source}", xml.display())]
    ParseFailure {
        xml: PathBuf,
        #[source]
        source: ParseError,
    },
}

// ---------------------------------------------------------------------------
// ParseError – diagnostics from the XML/DTD parser
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid DTD {}: {source}", path.display())]
    Dtd {
        path: PathBuf,
        #[source]
        source: DtdError,
    },

    /// Not well-formed XML (syntax, mismatched tags, undefined entities).
    #[error("malformed XML in {} at byte {position}: {message}", path.display())]
    Xml {
        path: PathBuf,
        position: usize,
        message: String,
    },

    /// Well-formed, but the document does not conform to the DTD.
    #[error("{} at byte {position} does not conform to the DTD: {reason}", path.display())]
    Invalid {
        path: PathBuf,
        position: usize,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// DtdError – syntax problems inside the DTD itself
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DtdError {
    #[error("unterminated markup starting at byte {0}")]
    Unterminated(usize),

    #[error("malformed {kind} declaration: {decl}")]
    Malformed { kind: &'static str, decl: String },

    #[error("unsupported construct at byte {position}: {what}")]
    Unsupported { position: usize, what: String },

    #[error("undefined parameter entity %{0};")]
    UndefinedParameterEntity(String),

    #[error("parameter entity expansion does not terminate near `{0}`")]
    RecursiveParameterEntity(String),

    #[error("invalid character reference &{0};")]
    InvalidCharRef(String),

    #[error("undefined entity &{0}; in an entity value")]
    UndefinedEntity(String),

    #[error("entity &{0}; refers to itself")]
    RecursiveEntity(String),

    #[error("replacement text of `{0}` exceeds the size limit")]
    ExpansionLimit(String),
}
