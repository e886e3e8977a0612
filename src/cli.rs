use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::auth::hash_password;
use crate::config::{Config, validate_password, validate_username};
use crate::db::{DatabaseExport, DatabaseManager, NewUser, Role, User};
use crate::web::WebServer;

#[derive(Parser, Debug)]
#[command(name = "school-cms")]
#[command(about = "School content management backend", version)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply migrations and serve the HTTP API (default)
    Serve,
    /// Apply pending schema migrations and exit
    Migrate,
    /// Create an account directly in the database
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "student")]
        role: Role,
        #[arg(long)]
        subject_id: Option<i64>,
    },
    /// Write a JSON dump of every table
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Replace every table with the contents of a JSON dump
    Import {
        #[arg(short, long)]
        input: PathBuf,
    },
}

impl Cli {
    pub async fn run(self, config: Arc<Config>) -> Result<()> {
        let db_manager = Arc::new(DatabaseManager::new(&config.database).await?);
        let version = db_manager.migrate().await?;
        info!(path = db_manager.sqlite_path(), version, "database ready");

        match self.command.unwrap_or(Command::Serve) {
            Command::Serve => {
                ensure_bootstrap_admin(&db_manager, &config).await?;
                let web_server = WebServer::new(config.clone(), db_manager).await?;
                web_server.start().await?;
            }
            Command::Migrate => {}
            Command::CreateUser {
                username,
                password,
                role,
                subject_id,
            } => {
                let user = create_user(&db_manager, &username, &password, role, subject_id).await?;
                info!(user_id = user.id, role = %user.role, "created user {}", user.username);
            }
            Command::Export { output } => export_to_file(&db_manager, &output).await?,
            Command::Import { input } => import_from_file(&db_manager, &input).await?,
        }
        Ok(())
    }
}

/// Creates the configured admin when no account exists yet.
pub async fn ensure_bootstrap_admin(
    db_manager: &DatabaseManager,
    config: &Config,
) -> Result<Option<User>> {
    let Some(bootstrap) = config.auth.bootstrap_admin.as_ref() else {
        return Ok(None);
    };
    if db_manager.user_store().count_users().await? > 0 {
        return Ok(None);
    }

    let admin = create_user(
        db_manager,
        &bootstrap.username,
        &bootstrap.password,
        Role::Admin,
        None,
    )
    .await?;
    info!(user_id = admin.id, "bootstrapped admin account {}", admin.username);
    Ok(Some(admin))
}

pub async fn create_user(
    db_manager: &DatabaseManager,
    username: &str,
    password: &str,
    role: Role,
    subject_id: Option<i64>,
) -> Result<User> {
    let username = username.trim();
    if let Err(reason) = validate_username(username) {
        bail!("invalid username: {reason}");
    }
    if let Err(reason) = validate_password(password) {
        bail!("invalid password: {reason}");
    }
    if let Some(id) = subject_id
        && db_manager.subject_store().get_subject(id).await?.is_none()
    {
        bail!("subject {id} does not exist");
    }

    let new_user = NewUser {
        username: username.to_string(),
        password_hash: hash_password(password)?,
        role,
        assigned_subject_id: subject_id,
    };
    Ok(db_manager.user_store().create_user(&new_user).await?)
}

pub async fn export_to_file(db_manager: &DatabaseManager, output: &Path) -> Result<()> {
    let export = db_manager.export().await?;
    let json = serde_json::to_vec_pretty(&export)?;
    tokio::fs::write(output, json)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(
        users = export.users.len(),
        subjects = export.subjects.len(),
        content = export.content.len(),
        files = export.files.len(),
        "exported database to {}",
        output.display()
    );
    Ok(())
}

pub async fn import_from_file(db_manager: &DatabaseManager, input: &Path) -> Result<()> {
    let raw = tokio::fs::read(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;
    let export: DatabaseExport = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a database export", input.display()))?;
    db_manager.import(&export).await?;
    Ok(())
}
