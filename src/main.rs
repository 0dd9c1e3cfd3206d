use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};

use famhealth_lib::attachment::attachment_from_file;
use famhealth_lib::model::{new_id, HealthEntry, Member};
use famhealth_lib::{
    init_logging, AppError, ChangeEvent, CollectionKind, Config, FamilyCode, FamilyData,
    JoinError, MemoryRemote, Origin, PushOutcome, RemoteStore, RestRemote, Session,
    StaticIdentity, StoreHandle, SyncEngine,
};

/// How long to wait for the first remote snapshot before writing.
const INITIAL_SYNC_TIMEOUT: Duration = Duration::from_secs(10);
const EXIT_NOT_FOUND: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "famhealth", about = "Family health records", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create, join, or leave a shared family.
    #[command(subcommand)]
    Family(FamilyCommand),
    /// Show the joined family and how many records each collection holds.
    Status,
    /// List family members stored on this device.
    Members,
    /// Manage family members.
    #[command(subcommand)]
    Member(MemberCommand),
    /// Manage health entries.
    #[command(subcommand)]
    Entry(EntryCommand),
    /// Follow the joined family and print every change until interrupted.
    Watch,
}

#[derive(Debug, Subcommand)]
enum FamilyCommand {
    /// Print a freshly generated family code without registering it.
    Code,
    /// Register a new family and join it.
    Create,
    /// Join an existing family.
    Join { code: String },
    /// Check whether a family code exists.
    Check { code: String },
    /// Stop syncing and forget the family code. Local records are kept.
    Leave,
}

#[derive(Debug, Subcommand)]
enum MemberCommand {
    /// Add a family member.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 0.0)]
        age: f64,
        #[arg(long, default_value = "")]
        gender: String,
        #[arg(long, default_value = "")]
        role: String,
    },
}

#[derive(Debug, Subcommand)]
enum EntryCommand {
    /// Record a health observation for a member.
    Add {
        #[arg(long)]
        member: String,
        #[arg(long)]
        date: String,
        #[arg(long)]
        location: String,
        #[arg(long)]
        description: String,
        /// Image to attach. Attachments stay on this device.
        #[arg(long)]
        photo: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };
    let log_guard = match init_logging(Some(&config.log_dir)) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: file logging disabled: {err:#}");
            None
        }
    };

    let code = match handle_cli(cli.command, config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };
    // Flush the file writer before exiting.
    drop(log_guard);
    process::exit(code);
}

async fn handle_cli(command: Commands, config: Config) -> Result<i32> {
    match command {
        Commands::Family(family) => handle_family(family, &config).await,
        Commands::Status => {
            let store = open_store(&config)?;
            print_status(&store);
            Ok(0)
        }
        Commands::Members => {
            let engine = SyncEngine::new(open_store(&config)?, offline_remote());
            print_members(&engine.members());
            Ok(0)
        }
        Commands::Member(MemberCommand::Add {
            name,
            age,
            gender,
            role,
        }) => {
            let member = Member {
                id: new_id(),
                name,
                age,
                gender,
                role,
                ..Default::default()
            };
            let id = member.id.clone();
            let outcome = with_synced_session(&config, move |session| async move {
                Ok(session.engine().add_member(member).await)
            })
            .await?;
            println!("{id}");
            Ok(report_push(outcome))
        }
        Commands::Entry(EntryCommand::Add {
            member,
            date,
            location,
            description,
            photo,
        }) => {
            let image = photo
                .as_deref()
                .map(attachment_from_file)
                .transpose()
                .map_err(anyhow::Error::new)?;
            let entry = HealthEntry {
                id: new_id(),
                member_id: member,
                date,
                body_location: location,
                description,
                image,
                ..Default::default()
            };
            let id = entry.id.clone();
            let outcome = with_synced_session(&config, move |session| async move {
                if session.engine().member(&entry.member_id).is_none() {
                    anyhow::bail!("no member with id {}", entry.member_id);
                }
                Ok(session.engine().add_entry(entry).await)
            })
            .await?;
            println!("{id}");
            Ok(report_push(outcome))
        }
        Commands::Watch => watch(&config).await,
    }
}

async fn handle_family(command: FamilyCommand, config: &Config) -> Result<i32> {
    let provider = identity_provider(config);

    match command {
        FamilyCommand::Code => {
            println!("{}", FamilyCode::generate());
            Ok(0)
        }
        FamilyCommand::Create => {
            let mut session = online_session(config)?;
            session.sign_in(&provider).await.map_err(anyhow::Error::new)?;
            let code = session
                .create_family()
                .await
                .map_err(anyhow::Error::new)?;
            println!("{code}");
            Ok(0)
        }
        FamilyCommand::Join { code } => {
            let mut session = online_session(config)?;
            session.sign_in(&provider).await.map_err(anyhow::Error::new)?;
            match session.join_family(&code).await {
                Ok(code) => {
                    println!("joined {code}");
                    Ok(0)
                }
                Err(JoinError::NotFound(code)) => {
                    eprintln!("Family {code} not found. Check the code and try again.");
                    Ok(EXIT_NOT_FOUND)
                }
                Err(err) => Err(anyhow::Error::new(AppError::from(err))),
            }
        }
        FamilyCommand::Check { code } => {
            let session = online_session(config)?;
            match session.directory().resolve(&code).await {
                Ok(code) => {
                    println!("{code} exists");
                    Ok(0)
                }
                Err(JoinError::NotFound(code)) => {
                    println!("{code} not found");
                    Ok(EXIT_NOT_FOUND)
                }
                Err(err) => Err(anyhow::Error::new(AppError::from(err))),
            }
        }
        FamilyCommand::Leave => {
            let mut session = Session::new(open_store(config)?, offline_remote());
            session.leave_family();
            println!("left family; local records kept");
            Ok(0)
        }
    }
}

async fn watch(config: &Config) -> Result<i32> {
    let provider = identity_provider(config);
    let mut session = online_session(config)?;
    let Some(code) = session.family_code().cloned() else {
        anyhow::bail!("not joined to a family; run `famhealth family join <CODE>` first");
    };

    let mut changes = session.engine().changes();
    session.sign_in(&provider).await.map_err(anyhow::Error::new)?;
    println!("watching {code} (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = changes.recv() => match event {
                Ok(ChangeEvent { collection, origin }) => {
                    let count = session.engine().read(|data| collection_count(data, collection));
                    println!("{collection}\t{origin:?}\t{count} records");
                }
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("Warning: skipped {skipped} change events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.sign_out(&provider).await;
    Ok(0)
}

/// Open a session, resume replication when a family is joined and a
/// database is configured, wait for the first snapshot, then run `op`.
async fn with_synced_session<F, Fut>(config: &Config, op: F) -> Result<PushOutcome>
where
    F: FnOnce(Session) -> Fut,
    Fut: std::future::Future<Output = Result<PushOutcome>>,
{
    let store = open_store(config)?;
    let joined = store.family_code().is_some();
    let online = joined && config.database_url.is_some();

    let outcome = if online {
        let provider = identity_provider(config);
        let mut session = Session::new(store.clone(), online_remote(config)?);
        let mut changes = session.engine().changes();
        session.sign_in(&provider).await.map_err(anyhow::Error::new)?;
        wait_for_initial_sync(&mut changes).await;
        op(session).await?
    } else {
        op(Session::new(store.clone(), offline_remote())).await?
    };
    store.flush().context("flush local store")?;
    Ok(outcome)
}

async fn wait_for_initial_sync(changes: &mut broadcast::Receiver<ChangeEvent>) {
    let mut pending: Vec<CollectionKind> = CollectionKind::ALL.to_vec();
    let wait = async {
        while !pending.is_empty() {
            match changes.recv().await {
                Ok(ChangeEvent {
                    collection,
                    origin: Origin::Remote,
                }) => pending.retain(|kind| *kind != collection),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    };
    if tokio::time::timeout(INITIAL_SYNC_TIMEOUT, wait).await.is_err() {
        eprintln!("Warning: family data did not arrive in time; continuing with local copy");
    }
}

fn report_push(outcome: PushOutcome) -> i32 {
    match outcome {
        PushOutcome::LocalOnly | PushOutcome::Written => 0,
        PushOutcome::Failed => {
            eprintln!("Warning: saved on this device but the family copy was not updated");
            1
        }
        PushOutcome::Held => {
            eprintln!(
                "Warning: saved on this device; the family copy holds data this version cannot read, so it was left untouched"
            );
            1
        }
    }
}

fn open_store(config: &Config) -> Result<StoreHandle> {
    StoreHandle::file(config.store_path())
        .with_context(|| format!("open local store {}", config.store_path().display()))
}

fn offline_remote() -> Arc<dyn RemoteStore> {
    Arc::new(MemoryRemote::new())
}

fn online_remote(config: &Config) -> Result<Arc<dyn RemoteStore>> {
    let url = config.database_url.as_deref().with_context(|| {
        format!(
            "{} must be set for commands that reach the family database",
            famhealth_lib::config::DATABASE_URL_ENV
        )
    })?;
    let remote = RestRemote::new(url);
    remote.set_auth_token(config.identity.as_ref().and_then(|i| i.id_token.clone()));
    Ok(Arc::new(remote))
}

fn identity_provider(config: &Config) -> StaticIdentity {
    match &config.identity {
        Some(identity) => StaticIdentity::new(identity.clone()),
        None => StaticIdentity::unconfigured(),
    }
}

fn online_session(config: &Config) -> Result<Session> {
    Ok(Session::new(open_store(config)?, online_remote(config)?))
}

fn collection_count(data: &FamilyData, kind: CollectionKind) -> usize {
    fn nested<T>(map: &std::collections::BTreeMap<String, Vec<T>>) -> usize {
        map.values().map(Vec::len).sum()
    }
    match kind {
        CollectionKind::Members => data.members.len(),
        CollectionKind::Entries => data.entries.len(),
        CollectionKind::CheckupLogs => data.checkup_logs.values().map(|log| log.len()).sum(),
        CollectionKind::DismissedCheckups => nested(&data.dismissed_checkups),
        CollectionKind::Allergies => nested(&data.allergies),
        CollectionKind::GrowthRecords => nested(&data.growth_records),
        CollectionKind::Medications => nested(&data.medications),
        CollectionKind::PeriodRecords => nested(&data.period_records),
    }
}

fn print_status(store: &StoreHandle) {
    match store.family_code() {
        Some(code) => println!("family: {code}"),
        None => println!("family: not joined"),
    }
    let data = SyncEngine::new(store.clone(), offline_remote()).snapshot();
    for kind in CollectionKind::ALL {
        println!("{:<18} {}", kind.remote_name(), collection_count(&data, kind));
    }
}

fn print_members(members: &[Member]) {
    if members.is_empty() {
        println!("no members yet");
        return;
    }
    for member in members {
        println!("{}\t{}\t{}\t{}", member.id, member.name, member.age, member.role);
    }
}
