use clap::{Parser, ValueEnum};
use coldvault::{Archive, BackupConfig, StdinConfirm};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Copy, Clone, Eq, PartialEq, ValueEnum)]
enum Action {
    Backup,
    Restore,
    CleanupSoft,
    CleanupHard,
    Info,
}

#[derive(Parser)]
#[command(name = "coldvault", version = "1.0.0", about = "Incremental, content-addressed, encrypted backup archiver")]
struct Cli {
    /// Path to the JSON backup configuration file.
    #[arg(short, long, default_value = "backup_config.json")]
    config: PathBuf,

    /// Action to perform.
    #[arg(short, long, value_enum, default_value = "backup")]
    action: Action,
}

fn main() -> ExitCode {
    coldvault::logging::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        log::error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = BackupConfig::load(&cli.config)?;
    let mut archive = Archive::open(config)?;

    match cli.action {
        Action::Backup => {
            let stats = archive.backup(true)?;
            println!(
                "backup complete: {} new, {} removed, {} path changes, {} errors",
                stats.n_new, stats.n_removed, stats.n_path_change, stats.n_errs
            );
        }
        Action::Restore => {
            let stats = archive.restore()?;
            println!("restore complete: {} file(s) restored", stats.n_restored);
        }
        Action::CleanupSoft => {
            let stats = archive.cleanup_soft(&StdinConfirm)?;
            println!("cleanup_soft complete: {} history entr(y/ies) pruned", stats.entries_pruned);
        }
        Action::CleanupHard => {
            let stats = archive.cleanup_hard(&StdinConfirm)?;
            println!("cleanup_hard complete: {} history entr(y/ies) pruned", stats.entries_pruned);
        }
        Action::Info => {
            let info = archive.info();
            println!("── coldvault archive ────────────────────────────────────");
            println!("  Active entries      {}", info.n_active);
            println!("  History entries     {}", info.n_history);
            println!("  Restore size        {} B", info.restore_size);
            println!("  Archive size (live) {} B", info.archive_size_active);
            println!("  Archive size (hist) {} B", info.archive_size_history);
        }
    }
    Ok(())
}
