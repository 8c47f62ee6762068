use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cueclub::{
    cloud::{DriveApi, LoopbackConsent},
    shell::install_fault_backup,
    AppConfig, BackupRotator, CloudBackup, CloudConfig, ExportBundle, ImportPlan, Shell,
    Storage,
};
use dialoguer::Confirm;
use serde_json::Value;
use tokio::io::BufReader;
use tracing::info;

#[derive(Parser)]
#[command(name = "cueclub")]
#[command(about = "Local data store, backups and cloud backup for the CueClub point of sale")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (defaults to CUECLUB_DATA_DIR or the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the UI bridge over stdin/stdout
    Serve,
    /// Print the whole document, or one key
    Get { key: Option<String> },
    /// Store a JSON value under a key
    Set {
        key: String,
        /// Value as JSON text
        json: String,
    },
    /// Delete a key
    Remove { key: String },
    /// List stored keys
    Keys,
    /// Delete every key
    Clear {
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the data file location
    Path,
    /// Snapshot the data file now
    Backup,
    /// List local snapshots, newest first
    Backups,
    /// Replace the data file with a local snapshot
    RestoreBackup {
        name: String,
        #[arg(short, long)]
        yes: bool,
    },
    /// Write an export bundle
    Export {
        /// Output file (defaults to cueclub-export-<date>.json)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Write the flat pre-2.0 layout
        #[arg(long)]
        legacy: bool,
    },
    /// Import an export bundle
    Import {
        file: PathBuf,
        #[arg(short, long)]
        yes: bool,
    },
    /// Cloud backup
    Cloud {
        #[command(subcommand)]
        command: CloudCommands,
    },
}

#[derive(Subcommand)]
enum CloudCommands {
    /// Show sign-in state
    Status,
    /// Sign in through the browser
    SignIn,
    /// Forget the cached session
    SignOut,
    /// Upload the current data as a backup
    Upload {
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List remote backups
    List,
    /// Download a remote backup to a file
    Download {
        id: String,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Delete a remote backup
    Delete { id: String },
    /// Import a remote backup into the local data
    Restore {
        id: String,
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    cueclub::init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::resolve(cli.data_dir);
    let storage = Storage::with_path(config.data_file());

    match cli.command {
        Commands::Serve => serve(&config).await?,
        Commands::Get { key } => {
            let value = match key {
                Some(key) => storage.get(&key).unwrap_or(Value::Null),
                None => Value::Object(storage.get_all()),
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Set { key, json } => {
            let value: Value = serde_json::from_str(&json)
                .with_context(|| format!("`{}` is not valid JSON", json))?;
            if !storage.set(&key, value) {
                bail!("Failed to store {}", key);
            }
        }
        Commands::Remove { key } => {
            if !storage.remove(&key) {
                bail!("Failed to remove {}", key);
            }
        }
        Commands::Keys => {
            for key in storage.keys() {
                println!("{}", key);
            }
        }
        Commands::Clear { yes } => {
            if confirm("Delete all stored data?", yes)? && !storage.clear() {
                bail!("Failed to clear data");
            }
        }
        Commands::Path => {
            println!("{}", config.data_file().display());
        }
        Commands::Backup => {
            let rotator = BackupRotator::from_config(&config);
            match rotator.create_backup() {
                Some(path) => println!("{}", path.display()),
                None => bail!("No backup created (no data file yet, or the copy failed)"),
            }
        }
        Commands::Backups => {
            let rotator = BackupRotator::from_config(&config);
            for name in rotator.list_backups()? {
                println!("{}", name);
            }
        }
        Commands::RestoreBackup { name, yes } => {
            let rotator = BackupRotator::from_config(&config);
            let prompt = format!("Replace all current data with {}?", name);
            if confirm(&prompt, yes)? {
                rotator.restore(&name)?;
                println!("Restored {}", name);
            }
        }
        Commands::Export { out, legacy } => export(&storage, out, legacy)?,
        Commands::Import { file, yes } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            apply_import(ImportPlan::parse(&text)?, &storage, yes)?;
        }
        Commands::Cloud { command } => cloud(command, &config, &storage).await?,
    }

    Ok(())
}

async fn serve(config: &AppConfig) -> Result<()> {
    info!("Serving bridge for {}", config.data_file().display());
    install_fault_backup(BackupRotator::from_config(config));

    let shell = Shell::new(config);
    let served = shell
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    info!("Bridge closed after {} request(s)", served);
    Ok(())
}

fn export(storage: &Storage, out: Option<PathBuf>, legacy: bool) -> Result<()> {
    let bundle = ExportBundle::collect(storage);
    let content = if legacy {
        bundle.to_legacy_json()?
    } else {
        bundle.to_json()?
    };
    let path = out.unwrap_or_else(|| PathBuf::from(bundle.file_name()));
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Exported {} bucket(s) to {}", bundle.data.len(), path.display());
    Ok(())
}

fn apply_import(plan: ImportPlan, storage: &Storage, yes: bool) -> Result<()> {
    if plan.is_empty() {
        println!("Nothing to import");
        return Ok(());
    }
    let buckets: Vec<String> = plan.buckets().iter().map(ToString::to_string).collect();
    let prompt = format!(
        "Import will overwrite: {}. Continue?",
        buckets.join(", ")
    );
    if confirm(&prompt, yes)? {
        let count = plan.apply(storage)?;
        println!("Imported {} bucket(s)", count);
    }
    Ok(())
}

fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    let accepted = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    if !accepted {
        println!("Cancelled");
    }
    Ok(accepted)
}

async fn cloud(command: CloudCommands, config: &AppConfig, storage: &Storage) -> Result<()> {
    let cloud_config = CloudConfig::from_env();
    let remote = DriveApi::new(cloud_config.api_key.clone())?;
    let consent = LoopbackConsent::new()?;
    let mut client = CloudBackup::new(
        cloud_config,
        Arc::new(remote),
        Arc::new(consent),
        Storage::with_path(config.cloud_session_file()),
    );

    if !client.initialize().await {
        bail!(
            "{}",
            client
                .state()
                .error
                .unwrap_or_else(|| "Cloud backup could not be initialized".to_string())
        );
    }

    match command {
        CloudCommands::Status => {
            println!("{}", serde_json::to_string_pretty(&client.state())?);
            return Ok(());
        }
        CloudCommands::SignIn => {
            if client.sign_in().await {
                let email = client.state().user_email.unwrap_or_default();
                println!("Signed in {}", email);
            }
        }
        CloudCommands::SignOut => {
            client.sign_out().await;
            println!("Signed out");
        }
        CloudCommands::Upload { name } => {
            let bundle = ExportBundle::collect(storage);
            if client.upload_backup(&bundle, name.as_deref()).await {
                println!("Uploaded backup");
            }
        }
        CloudCommands::List => {
            for file in client.list_backups().await {
                let created = file
                    .created_time
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!("{}  {}  {}", file.id, created, file.name);
            }
        }
        CloudCommands::Download { id, out } => {
            if let Some(value) = client.download_backup(&id).await {
                let path = out.unwrap_or_else(|| PathBuf::from(format!("{}.json", id)));
                write_json(&path, &value)?;
                println!("Saved {}", path.display());
            }
        }
        CloudCommands::Delete { id } => {
            if client.delete_backup(&id).await {
                println!("Deleted {}", id);
            }
        }
        CloudCommands::Restore { id, yes } => {
            if let Some(value) = client.download_backup(&id).await {
                apply_import(ImportPlan::from_value(value)?, storage, yes)?;
            }
        }
    }

    if let Some(error) = client.state().error {
        bail!("{}", error);
    }
    Ok(())
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
