use colored::*;
use std::io::{self, Write};
use strongbox_vault::{MigrationProgress, MigrationReport, VaultState};

/// Terminal output helpers
pub struct UI;

impl UI {
    const WIDTH: usize = 72;
    const BAR_WIDTH: usize = 40;

    pub fn print_section_header(title: &str) {
        println!();
        println!("{} {}", "▸".bright_cyan(), title.truecolor(138, 201, 38).bold());
        println!("{}", "─".repeat(Self::WIDTH).bright_black());
    }

    pub fn print_spinner(msg: &str) {
        print!("  {} {} ", "⚡".bright_yellow(), msg.truecolor(138, 201, 38));
        io::stdout().flush().ok();
    }

    pub fn print_success(msg: &str) {
        println!("  {} {}", "✓".truecolor(138, 201, 38).bold(), msg.bright_green());
    }

    pub fn print_error(msg: &str) {
        println!("  {} {}", "✗".bright_red().bold(), msg.red());
    }

    pub fn print_info(msg: &str) {
        println!("  {} {}", "ℹ".bright_cyan(), msg.cyan());
    }

    pub fn print_warning(msg: &str) {
        println!("  {} {}", "⚠".bright_yellow(), msg.yellow());
    }

    pub fn print_field(label: &str, value: &str) {
        println!("  {} {}", format!("{}:", label).truecolor(138, 201, 38), value.bright_white());
    }

    pub fn print_state(user: &str, state: VaultState) {
        let state = match state {
            VaultState::NoVault => "no vault".bright_yellow(),
            VaultState::Legacy => "legacy - run setup to upgrade".bright_yellow(),
            VaultState::Locked => "locked".bright_cyan(),
            VaultState::Unlocked => "unlocked".bright_green(),
        };
        println!("  {} {} {}", "vault:".truecolor(138, 201, 38), user.bright_white(), state);
    }

    /// Redraws a single progress line in place.
    pub fn print_progress(progress: MigrationProgress) {
        print!("\r  {}", render_bar(progress, Self::BAR_WIDTH));
        if progress.processed == progress.total {
            println!();
        }
        io::stdout().flush().ok();
    }

    pub fn print_report(report: &MigrationReport) {
        Self::print_section_header("migration");
        Self::print_field("records", &report.total.to_string());
        Self::print_field("sealed", &report.sealed.to_string());
        Self::print_field("upgraded", &report.upgraded.to_string());
        if report.skipped > 0 {
            Self::print_field("skipped", &report.skipped.to_string());
        }

        for failed in &report.failed {
            Self::print_error(&format!("{}: {}", failed.id, failed.error));
        }

        match report.privacy_mode_enabled_at {
            Some(at) => Self::print_success(&format!(
                "Privacy mode enabled {}",
                at.format("%Y-%m-%d %H:%M:%S UTC")
            )),
            None => Self::print_warning("Privacy mode not enabled - rerun migrate to retry failed records"),
        }
        println!();
    }
}

fn render_bar(progress: MigrationProgress, width: usize) -> String {
    let filled = if progress.total == 0 {
        width
    } else {
        progress.processed * width / progress.total
    };
    format!(
        "[{}{}] {}/{}",
        "█".repeat(filled),
        "░".repeat(width - filled),
        progress.processed,
        progress.total
    )
}
