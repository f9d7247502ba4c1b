use anyhow::{Context, Result};
use tracing::{error, info};

use schemashift::config::{Command, Config};
use schemashift::parser::{ChangeLogParser, JsonChangeLogParser};
use schemashift::{Migrator, RollbackTarget, RunScope};

fn main() -> Result<()> {
    let config = Config::load();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(config.log_level.clone())
        .init();

    info!("schemashift v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&config) {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run(config: &Config) -> Result<()> {
    info!("Using database: {}", config.database);
    let migrator = Migrator::open_sqlite(&config.database, config.settings())
        .with_context(|| format!("Failed to open database {}", config.database))?;

    let scope = RunScope::new()
        .with_contexts(config.contexts.iter().cloned())
        .with_labels(config.labels.iter().cloned());

    match &config.command {
        Command::Update { count } => {
            let applied = migrator.update(&load_changelog(config)?, &scope, *count)?;
            if applied == 0 {
                info!("No pending change sets. Database is up to date.");
            }
        }
        Command::UpdateSql { count } => {
            for line in migrator.update_sql(&load_changelog(config)?, &scope, *count)? {
                println!("{}", line);
            }
        }
        Command::Rollback { tag, date, count } => {
            let target = match (tag, date, count) {
                (Some(tag), _, _) => RollbackTarget::Tag(tag.clone()),
                (_, Some(date), _) => RollbackTarget::Date(*date),
                (_, _, Some(count)) => RollbackTarget::Count(*count),
                _ => anyhow::bail!("rollback needs --tag, --date or --count"),
            };
            migrator.rollback(&load_changelog(config)?, &scope, target)?;
        }
        Command::Sync => {
            let marked = migrator.sync(&load_changelog(config)?, &scope)?;
            info!("Marked {} change set(s) as ran", marked);
        }
        Command::Status => {
            let pending = migrator.list_pending(&load_changelog(config)?, &scope)?;
            println!("{} change set(s) pending", pending.len());
            for change_set in pending {
                println!("  {}", change_set);
            }
        }
        Command::Validate => {
            migrator.validate(&load_changelog(config)?, &scope)?;
            println!("No validation errors found");
        }
        Command::Tag { tag } => migrator.tag(tag)?,
        Command::History => {
            for row in migrator.history()? {
                println!(
                    "{:>4}  {}  {:<8}  {}  {}",
                    row.order_executed,
                    row.date_executed.format("%Y-%m-%d %H:%M:%S"),
                    row.exec_type.as_str(),
                    row.id,
                    row.tag.as_deref().unwrap_or("")
                );
            }
        }
        Command::ClearChecksums => {
            migrator.clear_checksums()?;
        }
        Command::ReleaseLocks => {
            migrator.release_locks()?;
            info!("Released change log lock");
        }
        Command::ListLocks => {
            let locks = migrator.list_locks()?;
            if locks.is_empty() {
                println!("No locks held");
            }
            for lock in locks {
                println!(
                    "{} since {}",
                    lock.holder.as_deref().unwrap_or("unknown"),
                    lock.granted.map(|g| g.to_rfc3339()).unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn load_changelog(config: &Config) -> Result<schemashift::ChangeLog> {
    let parser = JsonChangeLogParser::new();
    if !parser.supports(&config.changelog) {
        anyhow::bail!("Unsupported changelog format: {}", config.changelog.display());
    }
    Ok(parser.parse(&config.changelog)?)
}
