//! # Audit Report
//!
//! Command-line tool to summarize an exported audit log.

use daddeck_security::{AuditConfig, AuditLogger, AuditQuery};
use daddeck_core::Severity;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         DADDECK AUDIT REPORT                                     ║");
    println!("║         THE PACK GUARD                                           ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        println!("Usage: audit_report <audit_export.json>");
        println!();
        println!("Options:");
        println!("  --top <n>       Number of offenders to list (default 10)");
        println!("  --recent <n>    Number of recent critical entries (default 5)");
        println!("  --identifier <id>  Show every entry for one identifier");
        return;
    }

    let export_path = &args[1];
    let flag = |name: &str| {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
    };
    let top: usize = flag("--top").and_then(|s| s.parse().ok()).unwrap_or(10);
    let recent: usize = flag("--recent").and_then(|s| s.parse().ok()).unwrap_or(5);
    let focus = flag("--identifier");

    println!("Loading export: {export_path}");

    let text = match std::fs::read_to_string(export_path) {
        Ok(t) => t,
        Err(e) => {
            println!("Error: Could not open file: {e}");
            std::process::exit(1);
        }
    };

    let logger = AuditLogger::new(AuditConfig {
        capacity: usize::MAX,
        top_offenders: top,
        persist: false,
        ..AuditConfig::default()
    });
    let imported = match logger.import_json(&text) {
        Ok(n) => n,
        Err(e) => {
            println!("Error: Could not read audit export: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(entries = imported, "imported audit export");

    let stats = logger.stats();

    println!();
    println!("┌─ LOG INFO ─────────────────────────────────────────────────────┐");
    println!("│ Entries:            {}", stats.total);
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!("│ From:               {}", oldest.to_rfc3339());
        println!("│ To:                 {}", newest.to_rfc3339());
    }
    for severity in Severity::DESCENDING {
        let count = stats.by_severity.get(&severity).copied().unwrap_or(0);
        println!("│ {:<20}{count}", format!("{severity}:"));
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ ACTIONS ──────────────────────────────────────────────────────┐");
    for (action, count) in &stats.by_action {
        println!("│ {action:<28}{count}");
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ TOP OFFENDERS ────────────────────────────────────────────────┐");
    if stats.top_offenders.is_empty() {
        println!("│ (none)");
    }
    for (rank, offender) in stats.top_offenders.iter().enumerate() {
        println!(
            "│ {:>2}. {:<32} {:>5} violations, worst {}",
            rank + 1,
            offender.identifier,
            offender.violations,
            offender.worst
        );
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let critical = logger.query(&AuditQuery::new().severity(Severity::Critical).limit(recent));
    println!("┌─ RECENT CRITICAL ──────────────────────────────────────────────┐");
    for entry in &critical {
        println!(
            "│ {}  {:<22} {}",
            entry.timestamp.to_rfc3339(),
            entry.action,
            entry.identifier
        );
    }
    println!("└──────────────────────────────────────────────────────────────────┘");

    if let Some(identifier) = focus {
        let entries = logger.by_identifier(identifier);
        println!();
        println!("Entries for {identifier}: {}", entries.len());
        for entry in &entries {
            println!(
                "  {} [{}] {} {}",
                entry.timestamp.to_rfc3339(),
                entry.severity,
                entry.action,
                entry.details
            );
        }
    }

    println!();
    let critical_total = stats.by_severity.get(&Severity::Critical).copied().unwrap_or(0);
    if critical_total == 0 {
        println!("✓ No critical events");
    } else {
        println!("⚠ {critical_total} critical events - review the offenders above");
    }
}
