use anyhow::{anyhow, Result};
use colored::Colorize;
use strongbox_vault::{AuthContext, PassphrasePolicy, VaultError, VaultService, VaultStore};

/// Non-interactive passphrase for scripts and CI.
pub const ENV_PASSPHRASE: &str = "STRONGBOX_PASSPHRASE";
/// Non-interactive replacement passphrase for `passwd`.
pub const ENV_NEW_PASSPHRASE: &str = "STRONGBOX_NEW_PASSPHRASE";

const MAX_ATTEMPTS: usize = 3;

fn from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|p| !p.is_empty())
}

/// Check a freshly typed passphrase and its confirmation.
fn validate_new(
    policy: &dyn PassphrasePolicy,
    passphrase: &str,
    confirm: &str,
) -> std::result::Result<(), String> {
    if passphrase.is_empty() {
        return Err("Passphrase cannot be empty".to_string());
    }
    policy.check(passphrase)?;
    if passphrase != confirm {
        return Err("Passphrases don't match".to_string());
    }
    Ok(())
}

/// Ask for a new passphrase, or take it from `env_var`.
pub fn prompt_create_passphrase(policy: &dyn PassphrasePolicy, env_var: &str) -> Result<String> {
    if let Some(passphrase) = from_env(env_var) {
        validate_new(policy, &passphrase, &passphrase).map_err(|e| anyhow!(e))?;
        return Ok(passphrase);
    }

    println!();
    println!("{}", "▸ Choose Vault Passphrase".bright_yellow().bold());
    println!("{}", "─".repeat(72).bright_black());
    println!("  {} Protects the key that seals your records", "•".dimmed());
    println!(
        "  {} Cannot be recovered if lost - there is no reset",
        "•".dimmed()
    );
    println!();

    loop {
        let passphrase = rpassword::prompt_password("  New passphrase: ")?;
        let confirm = rpassword::prompt_password("  Confirm passphrase: ")?;

        match validate_new(policy, &passphrase, &confirm) {
            Ok(()) => {
                println!("  {} Passphrase accepted", "✓".green());
                println!();
                return Ok(passphrase);
            }
            Err(reason) => println!("  {} {}", "✗".red(), reason),
        }
    }
}

/// Ask for the current passphrase once, or take it from the environment.
pub fn prompt_current_passphrase() -> Result<String> {
    match from_env(ENV_PASSPHRASE) {
        Some(passphrase) => Ok(passphrase),
        None => Ok(rpassword::prompt_password("  Current passphrase: ")?),
    }
}

/// Unlock `vault`, re-prompting on a wrong passphrase up to three times.
/// A passphrase from the environment gets a single attempt.
pub fn unlock<S: VaultStore>(vault: &mut VaultService<S>, ctx: &AuthContext) -> Result<()> {
    if let Some(passphrase) = from_env(ENV_PASSPHRASE) {
        vault.unlock_vault(ctx, &passphrase)?;
        return Ok(());
    }

    println!();
    println!("{}", "▸ Unlock Vault".bright_cyan().bold());
    println!("{}", "─".repeat(72).bright_black());

    for attempt in 1..=MAX_ATTEMPTS {
        let passphrase = rpassword::prompt_password("  Vault passphrase: ")?;

        match vault.unlock_vault(ctx, &passphrase) {
            Ok(()) => {
                println!("  {} Vault unlocked", "✓".green());
                println!();
                return Ok(());
            }
            Err(VaultError::InvalidPassphrase) => {
                println!(
                    "  {} Wrong passphrase. Attempt {}/{}",
                    "✗".red(),
                    attempt,
                    MAX_ATTEMPTS
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(anyhow!("Too many failed attempts"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongbox_vault::MinLength;

    #[test]
    fn test_validate_new() {
        let policy = MinLength(8);

        assert!(validate_new(&policy, "", "").is_err());
        assert!(validate_new(&policy, "short", "short").is_err());
        assert!(validate_new(&policy, "long-enough", "long-enougH").is_err());
        assert!(validate_new(&policy, "long-enough", "long-enough").is_ok());
    }
}
