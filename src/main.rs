use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use gitwarden::audit::AuditLogger;
use gitwarden::security::SSH_COMMAND_ENV;
use gitwarden::{AppError, AppResult, BitbucketGateway, Config, Listener};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> ExitCode {
    // stdout carries the git protocol, so diagnostics go to stderr only
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run() {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> AppResult<i32> {
    let config = Config::load()?;

    let user = env::args()
        .nth(1)
        .ok_or_else(|| AppError::PermissionDenied("no user given".to_string()))?;
    let raw = env::var(SSH_COMMAND_ENV).unwrap_or_default();

    let audit = match AuditLogger::with_path(&config.audit.log_path) {
        Ok(logger) => Some(logger),
        Err(e) => {
            warn!(path = %config.audit.log_path.display(), error = %e, "audit log unavailable");
            None
        }
    };

    let gateway = Arc::new(BitbucketGateway::new(&config.api)?);
    let listener = Listener::new(config, gateway, audit);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let authorized = runtime.block_on(listener.authorize(&user, &raw))?;

    listener.execute(&authorized)
}
