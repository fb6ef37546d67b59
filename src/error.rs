//! Error types with fix suggestions
//!
//! Code ranges:
//! - TKC-001-009: input/output and document shape
//! - TKC-010-019: template rendering
//! - TKC-020-029: loop domains
//! - TKC-030-039: pipeline structure

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TektoncError>;

/// Exit status for I/O and values-file failures
pub const EXIT_IO: i32 = 2;
/// Exit status for YAML failures
pub const EXIT_YAML: i32 = 3;
/// Exit status for malformed or ill-typed templates
pub const EXIT_TEMPLATE_SYNTAX: i32 = 10;
/// Exit status for undefined variables in strict rendering
pub const EXIT_UNDEFINED_VARIABLE: i32 = 11;
/// Exit status for invalid `foreach.domain` entries
pub const EXIT_DOMAIN_TYPE: i32 = 12;
/// Exit status for structural problems in the pipeline document
pub const EXIT_STRUCTURAL: i32 = 13;

const EXCERPT_LEN: usize = 120;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Shorten long template sources (the outer pass renders whole files)
fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_LEN {
        return format!("{:?}", text);
    }
    let head: String = text.chars().take(EXCERPT_LEN).collect();
    format!("{:?}...", head)
}

#[derive(Error, Debug)]
pub enum TektoncError {
    #[error("TKC-001: Cannot access '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TKC-002: Invalid values: {details}")]
    InvalidValues { details: String },

    #[error("TKC-003: YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TKC-004: Rendered template is not a YAML mapping (found {found}); expected a Pipeline")]
    NotAMapping { found: String },

    // ─────────────────────────────────────────────────────────────
    // Rendering
    // ─────────────────────────────────────────────────────────────

    #[error(
        "TKC-010: Template syntax error at position {position}: {details} in {} (scope keys: [{}])",
        excerpt(.template),
        .scope_keys.join(", ")
    )]
    TemplateSyntax {
        template: String,
        position: usize,
        details: String,
        scope_keys: Vec<String>,
    },

    #[error(
        "TKC-011: Undefined variable '{name}' in {} (scope keys: [{}])",
        excerpt(.template),
        .scope_keys.join(", ")
    )]
    UndefinedVariable {
        name: String,
        template: String,
        scope_keys: Vec<String>,
    },

    #[error(
        "TKC-012: {details} in {} (scope keys: [{}])",
        excerpt(.template),
        .scope_keys.join(", ")
    )]
    TemplateType {
        template: String,
        details: String,
        scope_keys: Vec<String>,
    },

    // ─────────────────────────────────────────────────────────────
    // Loops and structure
    // ─────────────────────────────────────────────────────────────

    #[error("TKC-020: {at}: foreach.domain['{variable}'] must be a list of values, found {found}")]
    DomainType {
        at: String,
        variable: String,
        found: String,
    },

    #[error("TKC-030: {at}: {details}")]
    Structural { at: String, details: String },
}

impl TektoncError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        TektoncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn structural(at: impl Into<String>, details: impl Into<String>) -> Self {
        TektoncError::Structural {
            at: at.into(),
            details: details.into(),
        }
    }

    /// Stable process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            TektoncError::Io { .. } | TektoncError::InvalidValues { .. } => EXIT_IO,
            TektoncError::Yaml(_) | TektoncError::NotAMapping { .. } => EXIT_YAML,
            TektoncError::TemplateSyntax { .. } | TektoncError::TemplateType { .. } => {
                EXIT_TEMPLATE_SYNTAX
            }
            TektoncError::UndefinedVariable { .. } => EXIT_UNDEFINED_VARIABLE,
            TektoncError::DomainType { .. } => EXIT_DOMAIN_TYPE,
            TektoncError::Structural { .. } => EXIT_STRUCTURAL,
        }
    }
}

impl FixSuggestion for TektoncError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TektoncError::Io { .. } => Some("Check file path and permissions"),
            TektoncError::InvalidValues { .. } => {
                Some("The values file must be a YAML/JSON mapping with string keys")
            }
            TektoncError::Yaml(_) => {
                Some("Check YAML syntax: indentation and quoting (quote values that start with '{{')")
            }
            TektoncError::NotAMapping { .. } => {
                Some("The template must render to a Pipeline mapping with apiVersion/kind/spec")
            }
            TektoncError::TemplateSyntax { .. } => {
                Some("Use {{ var|filter }} expressions and close every {% for %} / {% if %} with {% endfor %} / {% endif %}")
            }
            TektoncError::TemplateType { .. } => {
                Some("Loop over lists or mappings; enumerate_list() takes a list")
            }
            TektoncError::UndefinedVariable { .. } => {
                Some("Define the variable in the values file or in an enclosing loop's foreach.domain")
            }
            TektoncError::DomainType { .. } => {
                Some("Write domain values as lists, e.g. region: [\"eu\"] instead of region: eu")
            }
            TektoncError::Structural { .. } => {
                Some("A loop needs loopName, foreach.domain and a tasks list; spec.tasks is required")
            }
        }
    }
}
