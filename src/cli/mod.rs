pub mod connectivity;
pub mod outputformatter;

use std::path::PathBuf;

use crate::actions::{PendingAction, Role};
use crate::config::{AdminSettings, OutputFormat};
use crate::error::{AppError, AppResult};
use crate::logger::MessageKind;

/// Action names accepted by `--action`.
pub const ACTION_NAMES: [&str; 6] = ["addUser", "deleteUser", "addDatabase", "deleteDatabase", "grantRole", "revokeRole"];

/// Command-line flags shared by both binaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub credentials: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub output: Option<OutputFormat>,
    pub user: Option<String>,
    pub database: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub action: Option<String>,
    pub dry_run: bool,
    pub help: bool,
}

impl CliOptions {
    /// Parse `args` (program name excluded). Unknown flags and missing values are usage errors.
    pub fn parse(args: &[String]) -> AppResult<Self> {
        let mut opts = CliOptions::default();
        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || -> AppResult<String> {
                i += 1;
                args.get(i).cloned().ok_or_else(|| AppError::validation("usage".to_string(), format!("{} requires a value", flag)))
            };
            match flag {
                "-c" | "--credentials" => opts.credentials = Some(PathBuf::from(value()?)),
                "--report" => opts.report = Some(PathBuf::from(value()?)),
                "-o" | "--output" => {
                    let v = value()?;
                    opts.output = Some(OutputFormat::parse(&v).ok_or_else(|| AppError::validation("usage".to_string(), format!("unknown output format '{}'", v)))?);
                }
                "-u" | "--user" => opts.user = Some(value()?),
                "-d" | "--database" => opts.database = Some(value()?),
                "-p" | "--password" => opts.password = Some(value()?),
                "-r" | "--role" => opts.role = Some(value()?),
                "-a" | "--action" => opts.action = Some(value()?),
                "--dry-run" => opts.dry_run = true,
                "-h" | "--help" => opts.help = true,
                other => return Err(AppError::validation("usage".to_string(), format!("unknown argument '{}'", other))),
            }
            i += 1;
        }
        Ok(opts)
    }

    /// Flags win over the environment.
    pub fn settings(&self, mut base: AdminSettings) -> AdminSettings {
        if let Some(p) = &self.credentials { base.credentials_path = p.clone(); }
        if let Some(p) = &self.report { base.report_path = p.clone(); }
        if let Some(o) = self.output { base.output = o; }
        base
    }

    pub fn action(&self) -> AppResult<Option<PendingAction>> {
        action_from_flags(self.action.as_deref(), self.user.as_deref(), self.database.as_deref(), self.password.as_deref(), self.role.as_deref())
    }
}

/// Build the edit a one-shot `--action` run asks for. `None` when no action was given.
pub fn action_from_flags(
    action: Option<&str>,
    user: Option<&str>,
    database: Option<&str>,
    password: Option<&str>,
    role: Option<&str>,
) -> AppResult<Option<PendingAction>> {
    let Some(action) = action.filter(|a| !a.is_empty()) else { return Ok(None) };
    let need = |value: Option<&str>, flag: &str| -> AppResult<String> {
        value
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::validation("missing_argument".to_string(), format!("action '{}' requires --{}", action, flag)))
    };
    let parsed = match action {
        "addUser" => PendingAction::AddUser { name: need(user, "user")?, password: need(password, "password")? },
        "deleteUser" => PendingAction::DeleteUser(need(user, "user")?),
        "addDatabase" => PendingAction::AddDatabase(need(database, "database")?),
        "deleteDatabase" => PendingAction::DeleteDatabase(need(database, "database")?),
        "grantRole" => PendingAction::GrantRole { user: need(user, "user")?, database: need(database, "database")?, role: need(role, "role")?.parse()? },
        "revokeRole" => PendingAction::RevokeRole { user: need(user, "user")?, database: need(database, "database")?, role: need(role, "role")?.parse()? },
        other => {
            return Err(AppError::validation(
                "invalid_action".to_string(),
                format!("invalid action '{}'; valid actions: {}", other, ACTION_NAMES.join(", ")),
            ))
        }
    };
    Ok(Some(parsed))
}

/// One line of the interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Stage(PendingAction),
    Show,
    Pending,
    Commit,
    Discard,
    Sync,
    Log(Option<MessageKind>),
    Export(Option<PathBuf>),
    Databases,
    Users,
    Collections(String),
    AddCollection(String),
    DropCollection(String),
    Use { database: String, collection: Option<String> },
    Documents,
    Get(String),
    GetFile(String),
    Import(PathBuf),
    Save { id: String, path: PathBuf },
    Download(PathBuf),
    DeleteDocument(String),
    Help,
    Quit,
}

fn usage(text: &str) -> AppError {
    AppError::validation("usage".to_string(), format!("usage: {}", text))
}

pub fn parse_command(line: &str) -> AppResult<ShellCommand> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((head, args)) = parts.split_first() else { return Err(usage("help")) };
    let cmd = head.to_ascii_lowercase();
    let role = |s: &str| -> AppResult<Role> { s.parse() };
    let parsed = match (cmd.as_str(), args) {
        ("add-db", [db]) => ShellCommand::Stage(PendingAction::AddDatabase(db.to_string())),
        ("add-db", _) => return Err(usage("add-db <database>")),
        ("drop-db", [db]) => ShellCommand::Stage(PendingAction::DeleteDatabase(db.to_string())),
        ("drop-db", _) => return Err(usage("drop-db <database>")),
        ("add-user", [name, password]) => ShellCommand::Stage(PendingAction::AddUser { name: name.to_string(), password: password.to_string() }),
        ("add-user", _) => return Err(usage("add-user <user> <password>")),
        ("drop-user", [name]) => ShellCommand::Stage(PendingAction::DeleteUser(name.to_string())),
        ("drop-user", _) => return Err(usage("drop-user <user>")),
        ("grant", [user, db, r]) => ShellCommand::Stage(PendingAction::GrantRole { user: user.to_string(), database: db.to_string(), role: role(r)? }),
        ("grant", _) => return Err(usage("grant <user> <database> <read|readWrite>")),
        ("revoke", [user, db, r]) => ShellCommand::Stage(PendingAction::RevokeRole { user: user.to_string(), database: db.to_string(), role: role(r)? }),
        ("revoke", _) => return Err(usage("revoke <user> <database> <read|readWrite>")),
        ("show", []) | ("table", []) => ShellCommand::Show,
        ("pending", []) => ShellCommand::Pending,
        ("commit", []) => ShellCommand::Commit,
        ("discard", []) => ShellCommand::Discard,
        ("sync", []) => ShellCommand::Sync,
        ("log", []) => ShellCommand::Log(None),
        ("log", [kind]) if kind.eq_ignore_ascii_case("errors") => ShellCommand::Log(Some(MessageKind::Error)),
        ("log", [kind]) if kind.eq_ignore_ascii_case("info") => ShellCommand::Log(Some(MessageKind::Info)),
        ("log", _) => return Err(usage("log [errors|info]")),
        ("export", []) => ShellCommand::Export(None),
        ("export", [path]) => ShellCommand::Export(Some(PathBuf::from(path))),
        ("databases", []) => ShellCommand::Databases,
        ("users", []) => ShellCommand::Users,
        ("collections", [db]) => ShellCommand::Collections(db.to_string()),
        ("collections", _) => return Err(usage("collections <database>")),
        ("add-coll", [name]) => ShellCommand::AddCollection(name.to_string()),
        ("add-coll", _) => return Err(usage("add-coll <collection>")),
        ("drop-coll", [name]) => ShellCommand::DropCollection(name.to_string()),
        ("drop-coll", _) => return Err(usage("drop-coll <collection>")),
        ("use", [db]) => ShellCommand::Use { database: db.to_string(), collection: None },
        ("use", [db, coll]) => ShellCommand::Use { database: db.to_string(), collection: Some(coll.to_string()) },
        ("use", _) => return Err(usage("use <database> [collection]")),
        ("docs", []) => ShellCommand::Documents,
        ("get", [id]) => ShellCommand::Get(id.to_string()),
        ("get", _) => return Err(usage("get <id>")),
        ("get-file", [id]) => ShellCommand::GetFile(id.to_string()),
        ("get-file", _) => return Err(usage("get-file <id>")),
        ("import", [path]) => ShellCommand::Import(PathBuf::from(path)),
        ("import", _) => return Err(usage("import <file.json>")),
        ("save", [id, path]) => ShellCommand::Save { id: id.to_string(), path: PathBuf::from(path) },
        ("save", _) => return Err(usage("save <id> <file>")),
        ("download", [path]) => ShellCommand::Download(PathBuf::from(path)),
        ("download", _) => return Err(usage("download <file>")),
        ("rm", [id]) => ShellCommand::DeleteDocument(id.to_string()),
        ("rm", _) => return Err(usage("rm <id>")),
        ("help", _) => ShellCommand::Help,
        ("quit", _) | ("exit", _) => ShellCommand::Quit,
        (other, _) => return Err(AppError::validation("unknown_command".to_string(), format!("unknown command '{}'; type 'help'", other))),
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_build_the_matching_action() {
        assert_eq!(action_from_flags(None, Some("alice"), None, None, None).unwrap(), None);
        assert_eq!(
            action_from_flags(Some("grantRole"), Some("alice"), Some("sales"), None, Some("readWrite")).unwrap(),
            Some(PendingAction::GrantRole { user: "alice".into(), database: "sales".into(), role: Role::ReadWrite })
        );
        assert_eq!(action_from_flags(Some("deleteDatabase"), None, Some("hr"), None, None).unwrap(), Some(PendingAction::DeleteDatabase("hr".into())));
    }

    #[test]
    fn flags_report_missing_arguments_and_bad_actions() {
        let err = action_from_flags(Some("addUser"), Some("alice"), None, None, None).unwrap_err();
        assert_eq!(err.code_str(), "missing_argument");
        assert!(err.message().contains("--password"));
        assert_eq!(action_from_flags(Some("dropEverything"), None, None, None, None).unwrap_err().code_str(), "invalid_action");
        assert_eq!(action_from_flags(Some("grantRole"), Some("a"), Some("b"), None, Some("root")).unwrap_err().code_str(), "invalid_role");
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn options_parse_short_and_long_flags() {
        let opts = CliOptions::parse(&args(&["-c", "creds.json", "--action", "grantRole", "-u", "alice", "-d", "sales", "-r", "read", "--dry-run"])).unwrap();
        assert_eq!(opts.credentials, Some(PathBuf::from("creds.json")));
        assert!(opts.dry_run);
        assert_eq!(
            opts.action().unwrap(),
            Some(PendingAction::GrantRole { user: "alice".into(), database: "sales".into(), role: Role::Read })
        );
        let settings = opts.settings(AdminSettings::default());
        assert_eq!(settings.credentials_path, PathBuf::from("creds.json"));
        assert_eq!(settings.output, OutputFormat::Table);
    }

    #[test]
    fn options_reject_unknown_flags_and_missing_values() {
        assert_eq!(CliOptions::parse(&args(&["--bogus"])).unwrap_err().code_str(), "usage");
        assert!(CliOptions::parse(&args(&["-c"])).unwrap_err().message().contains("-c"));
        assert!(CliOptions::parse(&args(&["--output", "xml"])).is_err());
        assert!(CliOptions::parse(&args(&["-h"])).unwrap().help);
    }

    #[test]
    fn shell_lines_parse() {
        assert_eq!(parse_command("grant alice sales read").unwrap(), ShellCommand::Stage(PendingAction::GrantRole { user: "alice".into(), database: "sales".into(), role: Role::Read }));
        assert_eq!(parse_command("  COMMIT ").unwrap(), ShellCommand::Commit);
        assert_eq!(parse_command("log errors").unwrap(), ShellCommand::Log(Some(MessageKind::Error)));
        assert_eq!(parse_command("use sales orders").unwrap(), ShellCommand::Use { database: "sales".into(), collection: Some("orders".into()) });
        assert_eq!(parse_command("export").unwrap(), ShellCommand::Export(None));
        assert_eq!(parse_command("exit").unwrap(), ShellCommand::Quit);
    }

    #[test]
    fn collection_and_gridfs_commands_parse() {
        assert_eq!(parse_command("add-coll payroll").unwrap(), ShellCommand::AddCollection("payroll".into()));
        assert_eq!(parse_command("DROP-COLL payroll").unwrap(), ShellCommand::DropCollection("payroll".into()));
        assert_eq!(parse_command("get-file 65a1f0c2b3d4e5f60718293a").unwrap(), ShellCommand::GetFile("65a1f0c2b3d4e5f60718293a".into()));
        assert_eq!(parse_command("add-coll").unwrap_err().code_str(), "usage");
        assert_eq!(parse_command("drop-coll a b").unwrap_err().code_str(), "usage");
        assert!(parse_command("get-file").unwrap_err().message().contains("get-file <id>"));
    }

    #[test]
    fn shell_reports_usage_and_unknown_commands() {
        assert_eq!(parse_command("grant alice").unwrap_err().code_str(), "usage");
        assert_eq!(parse_command("frobnicate").unwrap_err().code_str(), "unknown_command");
        assert_eq!(parse_command("revoke a b owner").unwrap_err().code_str(), "invalid_role");
        assert!(parse_command("   ").is_err());
    }
}
