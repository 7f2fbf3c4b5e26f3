use std::{path::PathBuf, time::Duration};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use sync_client::{
    api::ApiClient,
    controller::{Notifier, SyncController, SyncOutcome},
    session::{Session, SessionStore},
};
use utils::progress::SyncKind;

#[derive(Parser)]
#[command(author, version, about = "Trigger and follow catalog syncs", long_about = None)]
struct Cli {
    /// Server base URL, used by `login`
    #[arg(long, env = "CATALOG_SERVER_URL", default_value = "http://127.0.0.1:8080", global = true)]
    server: String,
    /// Where the login session is stored
    #[arg(long, env = "CATALOG_SESSION_FILE", global = true)]
    session_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login {
        #[arg(long)]
        email: String,
        /// Prompted for when omitted
        #[arg(long, env = "CATALOG_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Start a sync and follow its progress
    Sync {
        #[arg(value_enum)]
        kind: KindArg,
    },
    /// List recent sync runs
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    /// Refresh price and stock of existing products
    Manual,
    /// Also create new products and deactivate missing ones
    Full,
}

impl From<KindArg> for SyncKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Manual => SyncKind::Manual,
            KindArg::Full => SyncKind::Full,
        }
    }
}

/// Prints terminal results above the progress bar
struct ConsoleNotifier {
    bar: ProgressBar,
}

impl Notifier for ConsoleNotifier {
    fn success(&self, message: &str) {
        self.bar.println(format!("✓ {message}"));
    }

    fn failure(&self, message: &str) {
        self.bar.println(format!("✗ {message}"));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::logging::init("warn,sync_client=info");

    let cli = Cli::parse();
    let store = match cli.session_file {
        Some(path) => SessionStore::new(path),
        None => SessionStore::default_location()?,
    };

    match cli.command {
        Commands::Login { email, password } => login(&store, &cli.server, &email, password).await,
        Commands::Logout => {
            if store.clear().await? {
                println!("Logged out");
            } else {
                println!("No session stored");
            }
            Ok(())
        }
        Commands::Whoami => {
            let (session, client) = restore(&store).await?;
            let user = client.me().await.context("session is no longer valid, log in again")?;
            println!("{} <{}> ({}) on {}", user.name, user.email, user.role, session.server_url);
            Ok(())
        }
        Commands::Sync { kind } => {
            let (_, client) = restore(&store).await?;
            sync(client, kind.into()).await
        }
        Commands::Runs { limit } => {
            let (_, client) = restore(&store).await?;
            for run in client.list_runs(limit).await? {
                println!(
                    "{}  {:<6} {:<9} processed={} created={} updated={} deactivated={} skipped={}  {}",
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    run.kind.to_string(),
                    run.status.to_string(),
                    run.processed,
                    run.created,
                    run.updated,
                    run.deactivated,
                    run.skipped,
                    run.message.unwrap_or_default(),
                );
            }
            Ok(())
        }
    }
}

async fn login(
    store: &SessionStore,
    server: &str,
    email: &str,
    password: Option<String>,
) -> anyhow::Result<()> {
    let password = match password {
        Some(password) => password,
        None => dialoguer::Password::new()
            .with_prompt("Password")
            .interact()?,
    };

    let client = ApiClient::new(server)?;
    let response = client.login(email, &password).await?;
    let session = Session {
        server_url: server.to_string(),
        token: response.token,
        user: response.user,
    };
    store.save(&session).await?;

    println!("Logged in as {} ({})", session.user.name, session.user.role);
    Ok(())
}

async fn restore(store: &SessionStore) -> anyhow::Result<(Session, ApiClient)> {
    let Some(session) = store.load().await? else {
        bail!("not logged in, run `catalog-sync login` first");
    };
    let client = ApiClient::new(&session.server_url)?.with_token(session.token.clone());
    Ok((session, client))
}

async fn sync(client: ApiClient, kind: SyncKind) -> anyhow::Result<()> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {wide_msg}")?
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let controller = SyncController::new(client, ConsoleNotifier { bar: bar.clone() });
    let mut view = controller.subscribe();
    let render_bar = bar.clone();
    let render = tokio::spawn(async move {
        while view.changed().await.is_ok() {
            let view = view.borrow_and_update().clone();
            if !view.running {
                continue;
            }
            render_bar.set_position(view.percent.round() as u64);
            if let Some(message) = view.message {
                render_bar.set_message(message);
            }
        }
    });

    let outcome = tokio::select! {
        outcome = controller.start_sync(kind) => outcome,
        _ = tokio::signal::ctrl_c() => {
            bar.abandon_with_message("Stopped following; the sync keeps running on the server");
            render.abort();
            return Ok(());
        }
    };

    render.abort();
    bar.finish_and_clear();
    match outcome {
        SyncOutcome::Completed(_) => Ok(()),
        SyncOutcome::Failed(message) => bail!(message),
        SyncOutcome::AlreadyRunning => bail!("a sync is already running"),
    }
}
