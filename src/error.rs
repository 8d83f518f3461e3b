//! Unified application error model.
//! Every fallible operation in the gateway, the staged model and the codecs returns
//! `AppResult<T>`; the binaries map the error kind onto a process exit code.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Why a call to the server failed, as far as the transport lets us tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerCause {
    Auth,
    Host,
    Port,
    UriFormat,
    Command,
    Transport,
}

impl ServerCause {
    pub fn code(&self) -> &'static str {
        match self {
            ServerCause::Auth => "server_auth",
            ServerCause::Host => "server_host",
            ServerCause::Port => "server_port",
            ServerCause::UriFormat => "server_uri_format",
            ServerCause::Command => "server_command",
            ServerCause::Transport => "server_transport",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    Validation { code: String, message: String },
    NotFound { code: String, message: String },
    Server { cause: ServerCause, message: String },
    Codec { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Server { cause, .. } => cause.code(),
            AppError::Validation { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Codec { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Validation { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Server { message, .. }
            | AppError::Codec { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn validation<S: Into<String>>(code: S, msg: S) -> Self { AppError::Validation { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn server<S: Into<String>>(cause: ServerCause, msg: S) -> Self { AppError::Server { cause, message: msg.into() } }
    pub fn codec<S: Into<String>>(code: S, msg: S) -> Self { AppError::Codec { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    pub fn is_server(&self) -> bool { matches!(self, AppError::Server { .. }) }

    pub fn server_cause(&self) -> Option<ServerCause> {
        match self {
            AppError::Server { cause, .. } => Some(*cause),
            _ => None,
        }
    }

    /// Process exit status used by the command-line front ends.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Internal { .. } => 1,
            AppError::Validation { .. } => 2,
            AppError::NotFound { .. } => 3,
            AppError::Server { .. } => 4,
            AppError::Codec { .. } => 5,
            AppError::Io { .. } => 6,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io { code: "io_error".into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Codec { code: "json_error".into(), message: err.to_string() }
    }
}

impl From<bson::extjson::de::Error> for AppError {
    fn from(err: bson::extjson::de::Error) -> Self {
        AppError::Codec { code: "extjson_error".into(), message: err.to_string() }
    }
}

impl From<bson::ser::Error> for AppError {
    fn from(err: bson::ser::Error) -> Self {
        AppError::Codec { code: "bson_encode_error".into(), message: err.to_string() }
    }
}

impl From<bson::de::Error> for AppError {
    fn from(err: bson::de::Error) -> Self {
        AppError::Codec { code: "bson_decode_error".into(), message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_mapping() {
        assert_eq!(AppError::validation("empty_name", "name must not be empty").exit_code(), 2);
        assert_eq!(AppError::not_found("no_user", "missing").exit_code(), 3);
        assert_eq!(AppError::server(ServerCause::Auth, "denied").exit_code(), 4);
        assert_eq!(AppError::codec("json_error", "bad").exit_code(), 5);
        assert_eq!(AppError::io("io_error", "disk").exit_code(), 6);
        assert_eq!(AppError::internal("internal", "panic").exit_code(), 1);
    }

    #[test]
    fn server_errors_carry_their_cause() {
        let e = AppError::server(ServerCause::Port, "connection refused");
        assert!(e.is_server());
        assert_eq!(e.server_cause(), Some(ServerCause::Port));
        assert_eq!(e.code_str(), "server_port");
        assert_eq!(e.to_string(), "server_port: connection refused");
        assert!(!AppError::validation("x", "y").is_server());
    }

    #[test]
    fn io_errors_convert() {
        let e: AppError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked").into();
        assert_eq!(e.code_str(), "io_error");
        assert!(e.message().contains("locked"));
    }

    #[test]
    fn serializes_with_type_tag() {
        let v = serde_json::to_value(AppError::server(ServerCause::UriFormat, "bad uri")).unwrap();
        assert_eq!(v["type"], "server");
        assert_eq!(v["cause"], "uri_format");
    }
}
