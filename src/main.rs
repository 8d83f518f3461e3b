//!
//! mongoadmin one-shot binary
//! --------------------------
//! Connects with the credentials file, applies at most one administrative action, writes the
//! users/roles report and prints the resulting role table.

use std::env;
use std::process::exit;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use mongoadmin::cli::outputformatter::print_role_table;
use mongoadmin::cli::{connectivity, CliOptions, ACTION_NAMES};
use mongoadmin::config::{AdminSettings, OutputFormat};
use mongoadmin::error::{AppError, AppResult};
use mongoadmin::gateway::{AdminGateway, Backend, ConnectionGateway};
use mongoadmin::logger::AdminLogger;
use mongoadmin::model::StagedAdminModel;
use mongoadmin::report;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [-c <credentials.json>] [-a <action> ...] [--report <file.csv>] [--output table|csv] [--dry-run]\n\nFlags:\n  -c, --credentials <path>   Credentials file with user, password, database, port and host (default: credentials.json)\n  -a, --action <name>        One of: {actions}\n  -u, --user <name>          User the action applies to\n  -p, --password <pw>        Password for addUser\n  -d, --database <name>      Database the action applies to\n  -r, --role <role>          read | readWrite\n  --report <path>            Where the users and roles table is written (default: UsersAndRoles.csv)\n  -o, --output <fmt>         table (default) or csv\n  --dry-run                  Run against an empty in-process server\n  -h, --help                 Show this help\n\nActions:\n  addUser         -u <user> -p <password>\n  deleteUser      -u <user>\n  addDatabase     -d <database>\n  deleteDatabase  -d <database>\n  grantRole       -u <user> -d <database> -r <role>\n  revokeRole      -u <user> -d <database> -r <role>\n  (no action)     only print the management table\n\nEnvironment:\n  MONGOADMIN_CREDENTIALS, MONGOADMIN_REPORT, MONGOADMIN_OUTPUT, RUST_LOG",
        actions = ACTION_NAMES.join(", ")
    );
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| "mongoadmin".to_string());
    let opts = match CliOptions::parse(&args[1.min(args.len())..]) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("ERROR: {}", e.message());
            print_usage(&program);
            exit(e.exit_code());
        }
    };
    if opts.help {
        print_usage(&program);
        return;
    }

    let settings = opts.settings(AdminSettings::from_env());
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "mongoadmin::cli",
        "mongoadmin starting: RUST_LOG='{}', credentials='{}', report='{}', dry_run={}",
        rust_log, settings.credentials_path.display(), settings.report_path.display(), opts.dry_run
    );

    if let Err(e) = run(&opts, &settings) {
        eprintln!("ERROR: {}", e.message());
        if let Some(hint) = connectivity::advice(&e) {
            eprintln!("HINT: {}", hint);
        }
        exit(e.exit_code());
    }
}

fn run(opts: &CliOptions, settings: &AdminSettings) -> AppResult<()> {
    let action = opts.action()?;
    let logger = Arc::new(AdminLogger::new());
    if opts.dry_run {
        let credentials = connectivity::load_credentials(&settings.credentials_path).ok();
        let gateway = connectivity::connect_dry_run(credentials.as_ref(), logger.clone())?;
        execute(gateway, logger, action, settings)
    } else {
        let credentials = connectivity::load_credentials(&settings.credentials_path)?;
        let gateway = connectivity::connect(&credentials, logger.clone())?;
        execute(gateway, logger, action, settings)
    }
}

fn execute<B: Backend>(
    gateway: ConnectionGateway<B>,
    logger: Arc<AdminLogger>,
    action: Option<mongoadmin::actions::PendingAction>,
    settings: &AdminSettings,
) -> AppResult<()> {
    let mut model = StagedAdminModel::new(gateway, logger.clone());
    model.sync()?;

    if let Some(action) = action {
        info!(target: "mongoadmin::cli", "applying {}", action);
        model.edit(&action)?;
        let outcome = model.commit()?;
        if let Some(rejected) = outcome.rejected.first() {
            let reason = logger.entries_of(mongoadmin::logger::MessageKind::Error).last().map(|e| e.text.clone()).unwrap_or_default();
            return Err(AppError::validation("action_rejected".to_string(), format!("{} was not applied: {}", rejected, reason)));
        }
        println!("INFO: {} applied as {}", action, model.gateway().admin_user());
    }

    report::write_csv(model.matrix(), &settings.report_path)?;
    println!("INFO: MongoDB management table:");
    match settings.output {
        OutputFormat::Table => print_role_table(model.matrix(), 0),
        OutputFormat::Csv => print!("{}", report::to_csv(model.matrix())),
    }
    Ok(())
}
