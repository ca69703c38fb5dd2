// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const CONNECTION_FAILURE: &str = "connection_failure";
    pub const TRANSPORT_FAILURE: &str = "transport_failure";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const CANCELED: &str = "canceled";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const LOCAL_ERROR: &str = "local_error";
    pub const SUBMIT_FAILED: &str = "submit_failed";
    pub const RELEASE_FAILED: &str = "release_failed";
    pub const STATUS_FAILED: &str = "status_failed";
    pub const FATAL_POLLING: &str = "fatal_polling";
    pub const TEMPLATE_ERROR: &str = "template_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    InvalidArgument,
    Internal,
    Aborted,
    Cancelled,
    Remote,
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Error raised when a remote command exits non-zero after all retries.
    /// Carries the fully-qualified command and whatever the command printed.
    pub fn remote_command(
        code: &'static str,
        what: &str,
        qualified_command: &str,
        output: &str,
    ) -> Self {
        let output = output.trim();
        let output = if output.is_empty() {
            "no output"
        } else {
            output
        };
        Self::with_message(AppErrorKind::Remote, code, format!("{what} failed: {output}"))
            .with_context(qualified_command.to_string())
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

pub(crate) fn internal(message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::Internal, codes::INTERNAL_ERROR, message)
}
