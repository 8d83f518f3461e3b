//!
//! mongoadmin interactive shell
//! ----------------------------
//! Stages user, database and role edits against a live (or dry-run) server and applies them
//! on `commit`. Also browses and moves documents of the bound database/collection.

use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use mongoadmin::cli::outputformatter::{print_list, print_role_table, render_pending};
use mongoadmin::cli::{connectivity, parse_command, CliOptions, ShellCommand};
use mongoadmin::config::AdminSettings;
use mongoadmin::error::AppResult;
use mongoadmin::gateway::{Backend, ConnectionGateway, GRIDFS_FILES};
use mongoadmin::logger::{AdminLogger, LogEvent, MessageKind};
use mongoadmin::model::{SessionState, StagedAdminModel};
use mongoadmin::report;

const SHELL_HELP: &str = "Staged edits (applied on commit):\n  add-db <database>                     create a database\n  drop-db <database>                    drop a database, revoking its grants first\n  add-user <user> <password>            create a user on the admin database\n  drop-user <user>                      drop a user\n  grant <user> <database> <role>        grant read | readWrite\n  revoke <user> <database> <role>       revoke a role\n\nSession:\n  show                                  print the role table\n  pending                               list staged edits\n  commit                                apply staged edits in order, then reload\n  discard                               drop staged edits, then reload\n  sync                                  reload from the server (refused with staged edits)\n  export [file.csv]                     write the role table\n  log [errors|info]                     print the message log\n\nDocuments:\n  databases | users | collections <db>  listings\n  use <database> [collection]           bind a database and collection\n  add-coll <collection>                 create a collection in the bound database\n  drop-coll <collection>                drop a collection from the bound database\n  docs                                  list documents of the bound collection\n  get <id>                              print one document (read through GridFS on fs.files)\n  get-file <id>                         print a document stored in GridFS\n  import <file.json>                    add a document (GridFS when too large)\n  save <id> <file>                      write one document to a .json file\n  download <file>                       write the whole collection as one .json file\n  rm <id>                               delete a document\n\n  help                                  show this help\n  quit | exit                           leave (twice when edits are staged)";

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .context("building log filter")?;
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let opts = match CliOptions::parse(&args) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("ERROR: {}", e.message());
            std::process::exit(e.exit_code());
        }
    };
    if opts.help {
        println!("Usage: mongoadmin_shell [-c <credentials.json>] [--report <file.csv>] [--dry-run]\n\n{}", SHELL_HELP);
        return Ok(());
    }
    let settings = opts.settings(AdminSettings::from_env());
    info!(target: "mongoadmin::cli", "mongoadmin_shell starting: credentials='{}', dry_run={}", settings.credentials_path.display(), opts.dry_run);

    let logger = Arc::new(AdminLogger::new());
    let connected = if opts.dry_run {
        let credentials = connectivity::load_credentials(&settings.credentials_path).ok();
        connectivity::connect_dry_run(credentials.as_ref(), logger.clone()).map(|g| repl(g, logger.clone(), &settings))
    } else {
        connectivity::load_credentials(&settings.credentials_path)
            .and_then(|c| connectivity::connect(&c, logger.clone()))
            .map(|g| repl(g, logger.clone(), &settings))
    };
    match connected {
        Ok(session) => session,
        Err(e) => {
            eprintln!("ERROR: {}", e.message());
            if let Some(hint) = connectivity::advice(&e) {
                eprintln!("HINT: {}", hint);
            }
            std::process::exit(e.exit_code());
        }
    }
}

fn repl<B: Backend>(gateway: ConnectionGateway<B>, logger: Arc<AdminLogger>, settings: &AdminSettings) -> Result<()> {
    // Errors are echoed after each command; the observer only counts them.
    let unseen_errors = Arc::new(AtomicUsize::new(0));
    let staged = Arc::new(AtomicBool::new(false));
    {
        let unseen_errors = unseen_errors.clone();
        let staged = staged.clone();
        logger.subscribe(move |event| match event {
            LogEvent::MessageLogged(MessageKind::Error) => { unseen_errors.fetch_add(1, Ordering::SeqCst); }
            LogEvent::ActionsChanged => staged.store(true, Ordering::SeqCst),
            LogEvent::ActionsCleared => staged.store(false, Ordering::SeqCst),
            LogEvent::MessageLogged(MessageKind::Info) => {}
        });
    }

    let mut model = StagedAdminModel::new(gateway, logger.clone());
    if let Err(e) = model.sync() {
        eprintln!("error: {}", e.message());
    }
    unseen_errors.store(0, Ordering::SeqCst);

    let mut rl = DefaultEditor::new().context("initializing line editor")?;
    let mut quit_armed = false;
    println!("mongoadmin shell. Type 'help' for commands.");
    loop {
        let prompt = if staged.load(Ordering::SeqCst) { "mongoadmin*> " } else { "mongoadmin> " };
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("reading input"),
        };
        let line = line.trim();
        if line.is_empty() { continue; }
        let _ = rl.add_history_entry(line);

        let command = match parse_command(line) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {}", e.message());
                continue;
            }
        };
        if command == ShellCommand::Quit {
            if model.state() == SessionState::Dirty && !quit_armed {
                println!("{} staged change(s) not committed; quit again to drop them", model.pending().len());
                quit_armed = true;
                continue;
            }
            break;
        }
        quit_armed = false;

        if let Err(e) = execute(&mut model, command, settings) {
            // Already on the message log; the observer counted it.
            if unseen_errors.load(Ordering::SeqCst) == 0 {
                eprintln!("error: {}", e.message());
            }
        }
        let fresh = unseen_errors.swap(0, Ordering::SeqCst);
        if fresh > 0 {
            let errors = logger.entries_of(MessageKind::Error);
            for entry in errors.iter().skip(errors.len().saturating_sub(fresh)) {
                eprintln!("error: {}", entry.text);
            }
        }
    }
    Ok(())
}

fn execute<B: Backend>(model: &mut StagedAdminModel<ConnectionGateway<B>>, command: ShellCommand, settings: &AdminSettings) -> AppResult<()> {
    match command {
        ShellCommand::Stage(action) => {
            model.edit(&action)?;
            println!("staged: {}", action);
        }
        ShellCommand::Show => print_role_table(model.matrix(), model.pending().len()),
        ShellCommand::Pending => {
            for line in render_pending(model.pending().as_slice()) {
                println!("{}", line);
            }
        }
        ShellCommand::Commit => {
            let outcome = model.commit()?;
            println!("applied {}, rejected {}", outcome.applied, outcome.rejected.len());
            print_role_table(model.matrix(), 0);
        }
        ShellCommand::Discard => {
            model.discard()?;
            println!("staged changes dropped");
        }
        ShellCommand::Sync => {
            model.sync()?;
            print_role_table(model.matrix(), 0);
        }
        ShellCommand::Log(only) => {
            model.logger().print(&mut io::stdout(), only)?;
        }
        ShellCommand::Export(path) => {
            let path = path.unwrap_or_else(|| settings.report_path.clone());
            report::write_csv(model.matrix(), &path)?;
            println!("role table written to {}", path.display());
        }
        ShellCommand::Databases => print_list("database", &model.gateway().list_databases()?),
        ShellCommand::Users => print_list("user", &model.gateway().list_users()?),
        ShellCommand::Collections(db) => print_list("collection", &model.gateway().list_collections(&db)?),
        ShellCommand::Use { database, collection } => {
            let gateway = model.gateway_mut();
            match collection {
                Some(coll) => gateway.connect_to_collection(&database, &coll)?,
                None => gateway.connect_to_database(&database)?,
            }
            println!("using {}{}", gateway.current_database(), gateway.current_collection().map(|c| format!(".{}", c)).unwrap_or_default());
        }
        ShellCommand::Documents => {
            let ids: Vec<String> = model.gateway().get_document_list()?.iter().map(|d| d.display_id()).collect();
            print_list("_id", &ids);
        }
        ShellCommand::AddCollection(name) => {
            model.gateway().add_collection(&name)?;
            println!("created collection {}", name);
        }
        ShellCommand::DropCollection(name) => {
            model.gateway_mut().delete_collection(&name)?;
            println!("dropped collection {}", name);
        }
        ShellCommand::Get(id) if model.gateway().current_collection() == Some(GRIDFS_FILES) => {
            println!("{}", model.gateway().get_document_gridfs(&id)?.to_text())
        }
        ShellCommand::Get(id) => println!("{}", model.gateway().get_document(&id)?.to_text()),
        ShellCommand::GetFile(id) => println!("{}", model.gateway().get_document_gridfs(&id)?.to_text()),
        ShellCommand::Import(path) => {
            let id = model.gateway().import_document(&path)?;
            println!("stored document {}", id);
        }
        ShellCommand::Save { id, path } => {
            let written: PathBuf = model.gateway().export_document(&id, &path)?;
            println!("written to {}", written.display());
        }
        ShellCommand::Download(path) => {
            let written = model.gateway().download_collection(&path)?;
            println!("collection written to {}", written.display());
        }
        ShellCommand::DeleteDocument(id) => {
            model.gateway().delete_document(&id)?;
            println!("deleted {}", id);
        }
        ShellCommand::Help => println!("{}", SHELL_HELP),
        ShellCommand::Quit => {}
    }
    Ok(())
}
