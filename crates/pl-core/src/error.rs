use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    EnvironmentInit,
    Config,
    Compile,
    Lookup,
    NotCallable,
    RuntimeFailure,
    InternalFault,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnvironmentInit => "environment-init",
            Self::Config => "config",
            Self::Compile => "compile",
            Self::Lookup => "lookup",
            Self::NotCallable => "not-callable",
            Self::RuntimeFailure => "runtime-failure",
            Self::InternalFault => "internal-fault",
        }
    }

    /// Errors that only affect the chunk being processed; the caller may
    /// move on to the next one.
    pub fn is_chunk_local(self) -> bool {
        matches!(self, Self::Config | Self::RuntimeFailure)
    }

    /// Errors that make the owning script invocation unusable for every
    /// later chunk.
    pub fn is_fatal_to_invocation(self) -> bool {
        matches!(self, Self::Compile | Self::Lookup | Self::NotCallable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct PlangError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl PlangError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn environment_init(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EnvironmentInit, code, message)
    }

    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, code, message)
    }

    pub fn compile(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Compile, code, message)
    }

    pub fn lookup(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lookup, code, message)
    }

    pub fn not_callable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotCallable, code, message)
    }

    pub fn runtime_failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeFailure, code, message)
    }

    pub fn internal_fault(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalFault, code, message)
    }
}
