//! Consolidated error taxonomy for the permaskill library.
//!
//! Every failure maps to exactly one [`ErrorKind`]; user-visible rendering
//! is always `[Kind] problem. -> Solution: remediation.`. The binary maps
//! kinds onto process exit codes.

use std::fmt;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The closed set of error kinds. Exit codes follow the CLI contract:
/// validation/configuration/dependency problems exit 1, network/filesystem
/// problems exit 2, authorization problems exit 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Configuration,
    Authorization,
    Network,
    FileSystem,
    Dependency,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "Validation",
            Self::Configuration => "Configuration",
            Self::Authorization => "Authorization",
            Self::Network => "Network",
            Self::FileSystem => "FileSystem",
            Self::Dependency => "Dependency",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation | Self::Configuration | Self::Dependency => 1,
            Self::Network | Self::FileSystem => 2,
            Self::Authorization => 3,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for permaskill library operations.
///
/// `Cancelled` is synthetic: it is produced only when a cancellation token
/// fires and is rendered to the user under the `Network` kind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{message}")]
    Validation {
        message: String,
        solution: Option<String>,
        #[source]
        source: Option<Cause>,
    },
    #[error("{message}")]
    Configuration {
        message: String,
        solution: Option<String>,
        #[source]
        source: Option<Cause>,
    },
    #[error("{message}")]
    Authorization {
        message: String,
        solution: Option<String>,
        #[source]
        source: Option<Cause>,
    },
    #[error("{message}")]
    Network {
        message: String,
        solution: Option<String>,
        #[source]
        source: Option<Cause>,
    },
    #[error("{message}")]
    FileSystem {
        message: String,
        solution: Option<String>,
        #[source]
        source: Option<Cause>,
    },
    #[error("{message}")]
    Dependency {
        message: String,
        solution: Option<String>,
        #[source]
        source: Option<Cause>,
    },
    #[error("operation cancelled")]
    Cancelled,
}

macro_rules! constructor {
    ($fn_name:ident, $variant:ident) => {
        pub fn $fn_name(message: impl Into<String>) -> Self {
            Self::$variant {
                message: message.into(),
                solution: None,
                source: None,
            }
        }
    };
}

impl Error {
    constructor!(validation, Validation);
    constructor!(configuration, Configuration);
    constructor!(authorization, Authorization);
    constructor!(network, Network);
    constructor!(filesystem, FileSystem);
    constructor!(dependency, Dependency);

    /// Attach a suggested remediation, shown after `-> Solution:`.
    pub fn with_solution(mut self, solution: impl Into<String>) -> Self {
        if let Self::Validation { solution: s, .. }
        | Self::Configuration { solution: s, .. }
        | Self::Authorization { solution: s, .. }
        | Self::Network { solution: s, .. }
        | Self::FileSystem { solution: s, .. }
        | Self::Dependency { solution: s, .. } = &mut self
        {
            *s = Some(solution.into());
        }
        self
    }

    /// Attach an underlying cause, preserved on the `source()` chain.
    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        if let Self::Validation { source, .. }
        | Self::Configuration { source, .. }
        | Self::Authorization { source, .. }
        | Self::Network { source, .. }
        | Self::FileSystem { source, .. }
        | Self::Dependency { source, .. } = &mut self
        {
            *source = Some(cause.into());
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Authorization { .. } => ErrorKind::Authorization,
            // Cancellation is reported to the user as a network condition.
            Self::Network { .. } | Self::Cancelled => ErrorKind::Network,
            Self::FileSystem { .. } => ErrorKind::FileSystem,
            Self::Dependency { .. } => ErrorKind::Dependency,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    fn solution(&self) -> Option<&str> {
        match self {
            Self::Validation { solution, .. }
            | Self::Configuration { solution, .. }
            | Self::Authorization { solution, .. }
            | Self::Network { solution, .. }
            | Self::FileSystem { solution, .. }
            | Self::Dependency { solution, .. } => solution.as_deref(),
            Self::Cancelled => None,
        }
    }

    /// Render for stderr: `[Kind] problem. -> Solution: remediation.`
    pub fn render(&self) -> String {
        let mut out = format!("[{}] {}", self.kind(), punctuate(&self.to_string()));
        if let Some(solution) = self.solution() {
            out.push_str(&format!(" -> Solution: {}", punctuate(solution)));
        }
        out
    }

    /// Render as a JSON object for `--json` output.
    pub fn render_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.kind().as_str(),
            "message": self.to_string(),
            "solution": self.solution(),
        })
    }
}

fn punctuate(s: &str) -> String {
    let s = s.trim_end();
    if s.ends_with(['.', '!', '?']) {
        s.to_string()
    } else {
        format!("{s}.")
    }
}
