use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::{Credentials, DEFAULT_HOST, DEFAULT_PORT};
use crate::error::{AppError, AppResult, ServerCause};
use crate::gateway::memory::MemoryBackend;
use crate::gateway::mongo::{self, MongoBackend};
use crate::gateway::ConnectionGateway;
use crate::ident::ADMIN_DB;
use crate::logger::AdminLogger;

/// Read the credentials file, turning a bad path into the operator-facing message.
pub fn load_credentials(path: &Path) -> AppResult<Credentials> {
    Credentials::load(path).map_err(|e| match e {
        AppError::NotFound { .. } => AppError::not_found(
            "credentials_path".to_string(),
            format!("provided credentials path is not a valid path: {}", path.display()),
        ),
        other => other,
    })
}

/// Open a live session against the server the credentials name.
pub fn connect(credentials: &Credentials, logger: Arc<AdminLogger>) -> AppResult<ConnectionGateway<MongoBackend>> {
    info!(target: "mongoadmin::cli", "connecting to {}", credentials.redacted_connection_string());
    let backend = match MongoBackend::connect(credentials) {
        Ok(b) => b,
        Err(e) => {
            logger.error(format!("cannot connect: {}", e.message()));
            return Err(e);
        }
    };
    ConnectionGateway::open(backend, &credentials.user, &credentials.database, logger)
}

/// Session over an in-process server holding only the admin user. Nothing leaves the process.
pub fn connect_dry_run(credentials: Option<&Credentials>, logger: Arc<AdminLogger>) -> AppResult<ConnectionGateway<MemoryBackend>> {
    let fallback = Credentials::new(ADMIN_DB, "", ADMIN_DB, DEFAULT_PORT, DEFAULT_HOST);
    let creds = credentials.unwrap_or(&fallback);
    info!(target: "mongoadmin::cli", "dry run as '{}' on {}:{}", creds.user, creds.host, creds.port);
    let backend = MemoryBackend::new().with_user(&creds.user, &[]);
    ConnectionGateway::open(backend, &creds.user, &creds.database, logger)
}

/// What the operator should check after a failed connection.
pub fn advice(err: &AppError) -> Option<String> {
    let cause = err.server_cause()?;
    let hint = match cause {
        ServerCause::Auth => "check the user name and password in the credentials file",
        ServerCause::Host => "check the host name in the credentials file",
        ServerCause::Port => "check that mongod is listening on the configured port",
        ServerCause::UriFormat => "check the credentials file fields for stray characters",
        ServerCause::Command | ServerCause::Transport => return None,
    };
    Some(format!("{}; {}", mongo::describe(cause), hint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_credentials_file_names_the_path() {
        let dir = tempdir().unwrap();
        let err = load_credentials(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(err.code_str(), "credentials_path");
        assert!(err.message().contains("nope.json"));
    }

    #[test]
    fn dry_run_session_sees_no_users_but_admin() {
        let logger = Arc::new(AdminLogger::new());
        let gw = connect_dry_run(None, logger.clone()).unwrap();
        assert_eq!(gw.current_database(), "admin");
        assert_eq!(logger.error_count(), 0);
    }

    #[test]
    fn advice_only_for_connection_causes() {
        let port = AppError::server(ServerCause::Port, "refused");
        assert!(advice(&port).unwrap().contains("mongod"));
        assert!(advice(&AppError::server(ServerCause::Command, "x")).is_none());
        assert!(advice(&AppError::validation("a", "b")).is_none());
    }
}
