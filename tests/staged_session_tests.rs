use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mongoadmin::actions::{PendingAction, Role};
use mongoadmin::error::ServerCause;
use mongoadmin::gateway::memory::MemoryBackend;
use mongoadmin::gateway::ConnectionGateway;
use mongoadmin::logger::{AdminLogger, LogEvent, MessageKind};
use mongoadmin::model::{SessionState, StagedAdminModel};
use mongoadmin::report;

fn backend() -> MemoryBackend {
    MemoryBackend::new()
        .with_database("sales")
        .with_database("hr")
        .with_user("root", &[("admin", "root")])
        .with_user("alice", &[("sales", "read")])
        .with_user("bob", &[("hr", "readWrite")])
}

fn session(backend: &MemoryBackend) -> (StagedAdminModel<ConnectionGateway<MemoryBackend>>, Arc<AdminLogger>) {
    let logger = Arc::new(AdminLogger::new());
    let gateway = ConnectionGateway::open(backend.clone(), "root", "admin", logger.clone()).expect("open");
    let mut model = StagedAdminModel::new(gateway, logger.clone());
    model.sync().expect("sync");
    backend.clear_journal();
    (model, logger)
}

#[test]
fn sync_builds_the_matrix_without_the_admin_account() {
    let backend = backend();
    let (model, _) = session(&backend);
    assert_eq!(model.users(), ["alice", "bob"]);
    assert_eq!(model.databases(), ["hr", "sales"]);
    assert_eq!(model.role("alice", "sales"), Some(Role::Read));
    assert_eq!(model.role("alice", "hr"), None);
    assert_eq!(model.state(), SessionState::Clean);
}

#[test]
fn commit_replays_staged_edits_in_order() {
    let backend = backend();
    let (mut model, _) = session(&backend);
    model.add_database("ops").unwrap();
    model.add_user("carol", "s3cret").unwrap();
    model.grant_role_to_user("carol", "ops", Role::ReadWrite).unwrap();
    model.grant_role_to_user("alice", "sales", Role::ReadWrite).unwrap();
    assert_eq!(model.state(), SessionState::Dirty);
    // nothing reaches the server before commit
    assert!(backend.journal().is_empty());

    let outcome = model.commit().unwrap();
    assert_eq!(outcome.applied, 5);
    assert!(outcome.rejected.is_empty());
    let journal = backend.journal();
    let expected = [
        "insert ops.ops_collection",
        "createUser carol",
        "grantRolesToUser carol readWrite@ops",
        "revokeRolesFromUser alice read@sales",
        "grantRolesToUser alice readWrite@sales",
    ];
    let mutations: Vec<&str> = journal.iter().map(String::as_str).filter(|j| !j.starts_with("find")).collect();
    assert_eq!(mutations, expected);

    assert_eq!(model.state(), SessionState::Clean);
    assert_eq!(model.role("carol", "ops"), Some(Role::ReadWrite));
    assert_eq!(model.role("alice", "sales"), Some(Role::ReadWrite));
    assert_eq!(backend.grants_of("alice"), vec![("sales".to_string(), "readWrite".to_string())]);
}

#[test]
fn deleting_a_database_revokes_its_grants_before_dropping_it() {
    let backend = backend().with_user("dave", &[("hr", "read"), ("sales", "read")]);
    let (mut model, _) = session(&backend);
    model.delete_database("hr").unwrap();
    assert_eq!(
        model.pending().as_slice(),
        [
            PendingAction::RevokeRole { user: "bob".into(), database: "hr".into(), role: Role::ReadWrite },
            PendingAction::RevokeRole { user: "dave".into(), database: "hr".into(), role: Role::Read },
            PendingAction::DeleteDatabase("hr".into()),
        ]
    );
    model.commit().unwrap();
    assert_eq!(backend.journal().last().unwrap(), "dropDatabase hr");
    assert!(backend.grants_of("bob").is_empty());
    assert_eq!(backend.grants_of("dave"), vec![("sales".to_string(), "read".to_string())]);
    assert_eq!(model.databases(), ["sales"]);
}

#[test]
fn discard_restores_server_state_without_touching_it() {
    let backend = backend();
    let (mut model, _) = session(&backend);
    model.grant_role_to_user("bob", "sales", Role::Read).unwrap();
    model.delete_user("alice").unwrap();
    assert_eq!(model.role("bob", "sales"), Some(Role::Read));

    model.discard().unwrap();
    assert_eq!(model.state(), SessionState::Clean);
    assert!(model.pending().is_empty());
    assert_eq!(model.role("bob", "sales"), None);
    assert_eq!(model.users(), ["alice", "bob"]);
    assert!(backend.journal().iter().all(|j| !j.contains("Roles") && !j.contains("User")));
}

#[test]
fn server_failure_mid_commit_stops_and_resyncs() {
    let backend = backend();
    let (mut model, logger) = session(&backend);
    model.add_user("carol", "pw").unwrap();
    model.grant_role_to_user("carol", "sales", Role::Read).unwrap();
    backend.fail_command("grantRolesToUser", ServerCause::Command);

    let err = model.commit().unwrap_err();
    assert_eq!(err.server_cause(), Some(ServerCause::Command));
    assert!(logger.error_count() >= 1);
    // the user made it, the grant did not
    backend.clear_failures();
    assert_eq!(model.state(), SessionState::Clean);
    assert!(model.users().iter().any(|u| u == "carol"));
    assert_eq!(model.role("carol", "sales"), None);
    assert!(model.pending().is_empty());
}

#[test]
fn rejected_edits_leave_the_log_untouched() {
    let backend = backend();
    let (mut model, logger) = session(&backend);
    assert_eq!(model.add_database("sales").unwrap_err().code_str(), "database_exists");
    assert_eq!(model.revoke_role_from_user("alice", "hr", Role::Read).unwrap_err().code_str(), "no_role");
    assert_eq!(model.add_database("admin").unwrap_err().code_str(), "reserved_database");
    assert!(model.pending().is_empty());
    assert_eq!(model.state(), SessionState::Clean);
    assert_eq!(logger.error_count(), 3);
}

#[test]
fn observers_hear_staging_and_errors() {
    let backend = backend();
    let (mut model, logger) = session(&backend);
    let changed = Arc::new(AtomicUsize::new(0));
    let cleared = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));
    {
        let (changed, cleared, errors) = (changed.clone(), cleared.clone(), errors.clone());
        logger.subscribe(move |e| match e {
            LogEvent::ActionsChanged => { changed.fetch_add(1, Ordering::SeqCst); }
            LogEvent::ActionsCleared => { cleared.fetch_add(1, Ordering::SeqCst); }
            LogEvent::MessageLogged(MessageKind::Error) => { errors.fetch_add(1, Ordering::SeqCst); }
            LogEvent::MessageLogged(MessageKind::Info) => {}
        });
    }
    model.add_database("ops").unwrap();
    let _ = model.add_database("ops");
    model.commit().unwrap();
    assert_eq!(changed.load(Ordering::SeqCst), 1);
    assert!(cleared.load(Ordering::SeqCst) >= 1);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[test]
fn report_reflects_committed_state() {
    let backend = backend();
    let (mut model, _) = session(&backend);
    model.grant_role_to_user("bob", "sales", Role::Read).unwrap();
    model.commit().unwrap();
    assert_eq!(report::to_csv(model.matrix()), ",hr,sales\nalice,-,read\nbob,readWrite,read\n\n");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("UsersAndRoles.csv");
    report::write_csv(&model, &path).unwrap();
    assert_eq!(std::fs::read_to_string(path).unwrap(), report::to_csv(model.matrix()));
}
