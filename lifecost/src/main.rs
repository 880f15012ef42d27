use std::{env, process, str::FromStr};

use bill_ledger::{LabelTotals, LedgerConfig, LedgerController, LedgerError, UNLABELED};
use config::ConfigError;
use core_types::{AppConfig, GroupId};
use log::info;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = run() {
        eprintln!("lifecost failed: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let command = parse_command()?;
    let config = AppConfig::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .init();

    let (controller, report) = LedgerController::bootstrap(LedgerConfig::from_app(&config)?)?;
    info!(
        "lifecost ledger at {} with {} groups",
        report.bills_dir.display(),
        report.groups
    );

    match command {
        Command::Compact => compact(&controller),
        Command::ReplayStats => replay_stats(&controller),
        Command::Summary(group) => summary(&controller, group),
        Command::Deleted(group) => deleted(&controller, group),
    }
}

fn compact(controller: &LedgerController) -> Result<(), AppError> {
    let report = controller.compact_all()?;
    println!(
        "compacted {} shards across {} groups",
        report.shards, report.groups
    );
    for (group, err) in &report.failures {
        println!("  group {group}: {err}");
    }
    if report.failures.is_empty() {
        Ok(())
    } else {
        Err(AppError::Compaction {
            failed: report.failures.len(),
        })
    }
}

fn replay_stats(controller: &LedgerController) -> Result<(), AppError> {
    let totals = LabelTotals::new();
    let replayed = controller.replay(&totals)?;
    println!("replayed {replayed} bills");
    for group in totals.groups() {
        println!("group {group}: {}", totals.group(group));
        for (label, stats) in totals.labels(group) {
            if label == UNLABELED {
                println!("  unlabeled: {stats}");
            } else {
                println!("  label {label}: {stats}");
            }
        }
    }
    Ok(())
}

fn summary(controller: &LedgerController, group: GroupId) -> Result<(), AppError> {
    let today = controller.today().ok_or(AppError::Clock)?;
    let periods = controller.summarize_periods(group, today)?;
    println!("group {group} as of {today}");
    println!("  day:   {}", periods.day);
    println!("  week:  {}", periods.week);
    println!("  month: {}", periods.month);
    Ok(())
}

fn deleted(controller: &LedgerController, group: GroupId) -> Result<(), AppError> {
    let deleted = controller.list_deleted(group)?;
    if deleted.is_empty() {
        println!("group {group} has no deleted bills");
        return Ok(());
    }
    for entry in deleted {
        println!(
            "{} deleted {} {} {} {:?}",
            entry.id(),
            entry.deleted_at.to_rfc3339(),
            entry.bill.direction,
            entry.bill.amount,
            entry.bill.remark
        );
    }
    Ok(())
}

enum Command {
    Compact,
    ReplayStats,
    Summary(GroupId),
    Deleted(GroupId),
}

impl Command {
    fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self, AppError> {
        let name = args.next().ok_or(AppError::Usage)?;
        let mut group = || -> Result<GroupId, AppError> {
            let raw = args.next().ok_or(AppError::Usage)?;
            GroupId::from_str(&raw).map_err(|_| AppError::InvalidGroup(raw))
        };
        match name.as_str() {
            "compact" => Ok(Command::Compact),
            "replay-stats" => Ok(Command::ReplayStats),
            "summary" => Ok(Command::Summary(group()?)),
            "deleted" => Ok(Command::Deleted(group()?)),
            _ => Err(AppError::Usage),
        }
    }
}

fn parse_command() -> Result<Command, AppError> {
    Command::from_args(env::args().skip(1))
}

#[derive(Debug, Error)]
enum AppError {
    #[error("usage: lifecost <compact|replay-stats|summary <group-id>|deleted <group-id>>")]
    Usage,
    #[error("invalid group id {0:?}")]
    InvalidGroup(String),
    #[error("system clock is outside the supported date range")]
    Clock,
    #[error("compaction failed for {failed} groups")]
    Compaction { failed: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, AppError> {
        Command::from_args(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn commands_parse_with_group_ids() {
        assert!(matches!(parse(&["compact"]), Ok(Command::Compact)));
        assert!(matches!(parse(&["replay-stats"]), Ok(Command::ReplayStats)));
        assert!(matches!(parse(&["summary", "12"]), Ok(Command::Summary(12))));
        assert!(matches!(parse(&["deleted", "3"]), Ok(Command::Deleted(3))));
    }

    #[test]
    fn bad_arguments_are_usage_errors() {
        assert!(matches!(parse(&[]), Err(AppError::Usage)));
        assert!(matches!(parse(&["summary"]), Err(AppError::Usage)));
        assert!(matches!(parse(&["frobnicate"]), Err(AppError::Usage)));
        assert!(matches!(
            parse(&["deleted", "abc"]),
            Err(AppError::InvalidGroup(raw)) if raw == "abc"
        ));
    }
}
