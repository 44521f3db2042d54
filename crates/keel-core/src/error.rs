use thiserror::Error;

use crate::kind::ResourceKind;

/// Syntax errors in a single property expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("output reference `{0}` must have the form <resource>.<attribute>")]
    MalformedOutputRef(String),

    #[error("unterminated placeholder in template `{0}`")]
    UnterminatedPlaceholder(String),

    #[error("empty placeholder in template `{0}`")]
    EmptyPlaceholder(String),

    #[error("`{key}` must be a string, got {found}")]
    NotAString { key: &'static str, found: String },
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest version {found} is not supported (expected {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("resource `{0}` is declared more than once")]
    DuplicateResource(String),

    #[error("`{0}` is a reserved name and cannot be used for a resource")]
    ReservedName(String),

    #[error("invalid resource name `{0}`: use letters, digits, `-` or `_`")]
    InvalidName(String),

    #[error("`{from}` references unknown resource `{target}`")]
    UnknownResource { from: String, target: String },

    #[error("`{from}` references undeclared parameter `{name}`")]
    UnknownParameter { from: String, name: String },

    #[error("`{from}` references `{target}.{attribute}`, but {kind} has no output `{attribute}`")]
    UnknownAttribute {
        from: String,
        target: String,
        kind: ResourceKind,
        attribute: String,
    },

    #[error("resource `{resource}` ({kind}) is missing required property `{property}`")]
    MissingProperty {
        resource: String,
        kind: ResourceKind,
        property: String,
    },

    #[error("existing resource `{0}` is read-only and cannot depend on other resources")]
    ExistingWithDependencies(String),

    #[error("value supplied for undeclared parameter `{0}`")]
    UndeclaredParameter(String),

    #[error("invalid expression: {0}")]
    InvalidValue(#[from] ValueError),
}
