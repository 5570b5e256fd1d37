use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use clinicdesk::config::{self, AppConfig};
use clinicdesk::core_state::CoreState;
use clinicdesk::crypto;
use clinicdesk::db;
use clinicdesk::models::{NewStaff, StaffRole};
use clinicdesk::web;

#[derive(Debug, Parser)]
#[command(
    name = "clinicdesk",
    version,
    about = "Role-based clinic management web application"
)]
struct Cli {
    /// SQLite database file
    #[arg(long = "db", env = "CLINICDESK_DB", global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the web server (default)
    Serve(ServeArgs),

    /// Create the database and apply migrations
    InitDb,

    /// Add a staff account
    CreateStaff(CreateStaffArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "CLINICDESK_BIND", default_value_t = AppConfig::default().bind)]
    bind: SocketAddr,

    /// Idle seconds before a signed-in session expires
    #[arg(
        long = "session-timeout",
        env = "CLINICDESK_SESSION_TIMEOUT",
        default_value_t = config::DEFAULT_SESSION_IDLE_SECS,
        value_parser = clap::value_parser!(u64).range(60..)
    )]
    session_timeout: u64,

    /// Mark the session cookie `Secure` (serve behind HTTPS)
    #[arg(long = "secure-cookies", env = "CLINICDESK_SECURE_COOKIES")]
    secure_cookies: bool,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            bind: AppConfig::default().bind,
            session_timeout: config::DEFAULT_SESSION_IDLE_SECS,
            secure_cookies: false,
        }
    }
}

#[derive(Debug, Args)]
struct CreateStaffArgs {
    #[arg(long)]
    username: String,

    #[arg(long = "full-name")]
    full_name: String,

    /// doctor, nurse, lab_scientist, records_keeper or admin
    #[arg(long)]
    role: StaffRole,

    /// Initial password
    #[arg(long, env = "CLINICDESK_PASSWORD", hide_env_values = true)]
    password: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    clinicdesk::init_tracing();

    let cli = Cli::parse();
    let database_path = cli.database.unwrap_or_else(config::default_database_path);

    let outcome = match cli.command {
        None => serve(database_path, ServeArgs::default()).await,
        Some(Command::Serve(args)) => serve(database_path, args).await,
        Some(Command::InitDb) => init_db(&database_path),
        Some(Command::CreateStaff(args)) => create_staff(&database_path, args),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn serve(database_path: PathBuf, args: ServeArgs) -> Result<(), String> {
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = AppConfig {
        bind: args.bind,
        database_path,
        session_idle_timeout_secs: args.session_timeout,
        secure_cookies: args.secure_cookies,
    };
    let core = Arc::new(CoreState::new(config));

    let conn = core.open_db().map_err(|e| e.to_string())?;
    let active = db::count_active_staff(&conn).map_err(|e| e.to_string())?;
    drop(conn);
    if active == 0 {
        tracing::warn!("No active staff accounts. Add one with `clinicdesk create-staff --role admin`");
    }
    tracing::info!(database = %core.database_path().display(), active_staff = active, "Database ready");

    let mut server = web::start_server(core.clone(), core.config.bind).await?;
    tracing::info!("Listening on http://{}", server.addr);

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for shutdown signal: {e}");
    }
    server.shutdown();
    server.stopped().await;

    match core.flush_and_prune_audit() {
        Ok(n) => tracing::info!(flushed = n, "Audit log flushed"),
        Err(e) => tracing::warn!("Final audit flush failed: {e}"),
    }
    Ok(())
}

fn init_db(database_path: &std::path::Path) -> Result<(), String> {
    let conn = db::open_database(database_path).map_err(|e| e.to_string())?;
    let tables = db::count_tables(&conn).map_err(|e| e.to_string())?;
    tracing::info!(path = %database_path.display(), tables, "Database initialised");
    Ok(())
}

fn create_staff(database_path: &std::path::Path, args: CreateStaffArgs) -> Result<(), String> {
    crypto::check_password_strength(&args.password).map_err(|e| e.to_string())?;
    let password_hash = crypto::hash_password(&args.password).map_err(|e| e.to_string())?;

    let conn = db::open_database(database_path).map_err(|e| e.to_string())?;
    let staff = db::insert_staff(
        &conn,
        &NewStaff {
            username: args.username,
            full_name: args.full_name,
            role: args.role,
            password_hash,
        },
    )
    .map_err(|e| e.to_string())?;

    tracing::info!(username = %staff.username, role = staff.role.as_str(), "Staff account created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["clinicdesk"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_create_staff() {
        let cli = Cli::try_parse_from([
            "clinicdesk",
            "--db",
            "/tmp/x.db",
            "create-staff",
            "--username",
            "admin",
            "--full-name",
            "Site Admin",
            "--role",
            "admin",
            "--password",
            "long-enough-1",
        ])
        .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/x.db")));
        match cli.command {
            Some(Command::CreateStaff(args)) => {
                assert_eq!(args.role, StaffRole::Admin);
                assert_eq!(args.username, "admin");
            }
            other => panic!("expected create-staff, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_role() {
        let parsed = Cli::try_parse_from([
            "clinicdesk",
            "create-staff",
            "--username",
            "x",
            "--full-name",
            "X",
            "--role",
            "janitor",
            "--password",
            "long-enough-1",
        ]);
        assert!(parsed.is_err());
    }
}
