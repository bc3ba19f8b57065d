use std::path::PathBuf;

use thiserror::Error;

/// Failure turning a module file into code blocks.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("invalid JSON listing: {0}")]
    Json(#[from] serde_json::Error),

    #[error("listing has no `<module>` code object")]
    MissingModuleCode,
}

impl CompileError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }
}

/// Errors reported to the host driving a playground.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A configuration violation the object model refuses to allow.
    #[error("fatal engine error in sandbox {sandbox}: {message}")]
    Fatal { sandbox: u32, message: String },

    #[error("unknown sandbox {0}")]
    UnknownSandbox(u32),
}
