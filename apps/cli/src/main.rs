mod passphrase;
mod ui;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use passphrase::{
    prompt_create_passphrase, prompt_current_passphrase, ENV_NEW_PASSPHRASE, ENV_PASSPHRASE,
};
use std::path::Path;
use strongbox_vault::{
    AuthContext, EncryptedEnvelope, MigrationCoordinator, RecordStore, SensitiveFieldSet,
    SensitiveRecord, SqliteStore, VaultService, VaultState,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use ui::UI;

#[derive(Parser)]
#[command(name = "strongbox")]
#[command(about = "Strongbox - client-side encrypted record vault", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database holding the vault and records
    #[arg(long, global = true, default_value = "strongbox.db")]
    db: String,

    /// User the vault belongs to
    #[arg(long, global = true, default_value = "local")]
    user: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a vault for the user, or upgrade a legacy one
    Setup,

    /// Check the passphrase against the stored vault
    Unlock,

    /// Change the vault passphrase
    Passwd,

    /// Seal a JSON payload with the user's public key (no passphrase needed)
    Encrypt {
        /// JSON payload
        payload: String,
    },

    /// Open an envelope printed by `encrypt`
    Decrypt {
        /// Envelope JSON
        envelope: String,
    },

    /// Add a record; sealed immediately once privacy mode is on
    Add {
        /// Record id
        id: String,

        /// JSON object of field name to value
        fields: String,
    },

    /// Decrypt and print a stored record
    Show {
        /// Record id
        id: String,
    },

    /// Seal every plaintext and legacy record and enable privacy mode
    Migrate,

    /// Show vault and migration status
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    debug!(db = %cli.db, user = %cli.user, "opening store");
    let store = SqliteStore::open(Path::new(&cli.db))?;
    let ctx = AuthContext::user(cli.user.clone());

    match cli.command {
        Commands::Setup => setup(&store, &ctx)?,
        Commands::Unlock => {
            let mut vault = VaultService::new(&store);
            passphrase::unlock(&mut vault, &ctx)?;
            UI::print_state(&cli.user, vault.state(&ctx)?);
        }
        Commands::Passwd => change_passphrase(&store, &ctx)?,
        Commands::Encrypt { payload } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            let sealed = VaultService::new(&store).encrypt_for_user(&ctx, &payload)?;
            println!("{}", serde_json::to_string(&sealed)?);
        }
        Commands::Decrypt { envelope } => {
            let sealed: EncryptedEnvelope = serde_json::from_str(&envelope)?;
            let mut vault = VaultService::new(&store);
            passphrase::unlock(&mut vault, &ctx)?;
            let payload: serde_json::Value = vault.decrypt_payload(&sealed)?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Commands::Add { id, fields } => add_record(&store, &ctx, id, &fields)?,
        Commands::Show { id } => show_record(&store, &ctx, &id)?,
        Commands::Migrate => migrate(&store, &ctx)?,
        Commands::Status => status(&store, &ctx, &cli.db)?,
    }

    Ok(())
}

fn setup(store: &SqliteStore, ctx: &AuthContext) -> Result<()> {
    let mut vault = VaultService::new(store);
    match vault.state(ctx)? {
        VaultState::NoVault => {}
        VaultState::Legacy => {
            UI::print_info("Legacy vault found - enter the passphrase it was created with");
            let passphrase = prompt_current_passphrase()?;
            UI::print_spinner("Generating vault keypair");
            vault.upgrade_legacy_vault(ctx, store, &passphrase)?;
            println!();
            UI::print_success("Vault upgraded and unlocked");
            UI::print_info("Run `strongbox migrate` to re-seal legacy records");
            return Ok(());
        }
        VaultState::Locked | VaultState::Unlocked => {
            return Err(anyhow!("A vault already exists for this user"));
        }
    }

    let passphrase =
        prompt_create_passphrase(vault.config().passphrase_policy.as_ref(), ENV_PASSPHRASE)?;

    UI::print_spinner("Generating vault keypair");
    vault.setup_vault(ctx, &passphrase)?;
    println!();
    UI::print_success("Vault created and unlocked");
    UI::print_info("Run `strongbox migrate` to seal existing records");
    Ok(())
}

fn change_passphrase(store: &SqliteStore, ctx: &AuthContext) -> Result<()> {
    let mut vault = VaultService::new(store);
    let current = prompt_current_passphrase()?;
    let new =
        prompt_create_passphrase(vault.config().passphrase_policy.as_ref(), ENV_NEW_PASSPHRASE)?;

    vault.change_passphrase(ctx, store, &current, &new)?;
    UI::print_success("Passphrase changed");
    Ok(())
}

fn add_record(store: &SqliteStore, ctx: &AuthContext, id: String, fields: &str) -> Result<()> {
    let user = ctx.user_id()?;
    let fields: SensitiveFieldSet = serde_json::from_str(fields)?;

    let record = if store.privacy_mode_enabled_at(user)?.is_some() {
        let vault = VaultService::new(store);
        let sealed = vault.encrypt_for_user(ctx, &fields)?;
        let redacted = fields.redacted(&vault.config().redaction_placeholder);
        SensitiveRecord::sealed(id, user.clone(), redacted, &sealed)
    } else {
        SensitiveRecord::plaintext(id, user.clone(), fields)
    };

    store.insert_record(&record)?;
    if record.is_encrypted() {
        UI::print_success(&format!("Record {} sealed", record.id));
    } else {
        UI::print_warning(&format!(
            "Record {} stored as plaintext - privacy mode is off",
            record.id
        ));
    }
    Ok(())
}

fn show_record(store: &SqliteStore, ctx: &AuthContext, id: &str) -> Result<()> {
    let user = ctx.user_id()?;
    let record = store
        .get_record(user, id)?
        .ok_or_else(|| anyhow!("No record {}", id))?;

    let fields = match record.decoded_envelope()? {
        None => record.fields,
        Some(sealed) => {
            let mut vault = VaultService::new(store);
            passphrase::unlock(&mut vault, ctx)?;
            vault.decrypt_payload::<SensitiveFieldSet>(&sealed)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&fields)?);
    Ok(())
}

fn migrate(store: &SqliteStore, ctx: &AuthContext) -> Result<()> {
    let mut vault = VaultService::new(store);
    passphrase::unlock(&mut vault, ctx)?;

    let coordinator = MigrationCoordinator::new(&vault, store);
    let report = coordinator.migrate(ctx, UI::print_progress)?;
    UI::print_report(&report);
    Ok(())
}

fn status(store: &SqliteStore, ctx: &AuthContext, db: &str) -> Result<()> {
    let user = ctx.user_id()?;
    let vault = VaultService::new(store);

    UI::print_section_header("status");
    UI::print_field("database", db);
    UI::print_state(user.as_str(), vault.state(ctx)?);

    let pending = store.records_pending_encryption(user)?;
    let legacy = pending.iter().filter(|r| r.is_encrypted()).count();
    UI::print_field("plaintext records", &(pending.len() - legacy).to_string());
    UI::print_field("legacy records", &legacy.to_string());

    match store.privacy_mode_enabled_at(user)? {
        Some(at) => UI::print_field(
            "privacy mode",
            &at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        None => UI::print_field("privacy mode", "off"),
    }
    println!();
    Ok(())
}
