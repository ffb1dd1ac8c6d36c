use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use bulkreg_core::config::AppConfig;
use bulkreg_core::AccountRequest;
use bulkreg_networks::{HttpTransport, ImapMailbox};
use bulkreg_registration::{
    build_target, AutoRegister, AutoRegisterConfig, PollSettings, ProgressFn, RandomCandidateGenerator,
    RegistrationEngine, RunProgress,
};
use bulkreg_storage::{Ledger, LedgerSnapshot};

/// Run a registration request and export the snapshot as JSON
pub async fn run(config: AppConfig, request: AccountRequest, output: Option<String>) -> Result<()> {
    info!(count = request.count(), concurrency = request.concurrency, "Starting registration run");

    let target = build_target(&config.target)?;
    let transport = Arc::new(HttpTransport::new(&config.target)?);
    let mailbox = Arc::new(ImapMailbox::default());
    let ledger = Arc::new(Ledger::new());

    let engine = RegistrationEngine::new(
        target,
        transport,
        mailbox,
        PollSettings::from(&config.poll),
        Arc::clone(&ledger),
    );
    let generator = RandomCandidateGenerator::new(
        config.identity.local_part_length,
        config.identity.password_length,
    );
    let auto_register = Arc::new(AutoRegister::new(
        Arc::new(engine),
        Arc::new(generator),
        ledger,
        AutoRegisterConfig {
            candidates_per_attempt: config.general.candidates_per_attempt,
            mailbox: config.mailbox.clone(),
        },
    ));

    let progress: ProgressFn = Arc::new(render_progress);
    let snapshot = auto_register.start_run(request, Some(progress)).wait().await?;

    let path = output.unwrap_or_else(|| config.general.export_path.clone());
    std::fs::write(&path, snapshot.to_json()?).with_context(|| format!("writing {}", path))?;
    info!(path = %path, "snapshot exported");

    print_summary(&snapshot, &config.target.name);
    Ok(())
}

fn render_progress(p: RunProgress) {
    eprintln!(
        "[{:>4}/{:<4}] {:>5.1}%  ok={} failed={}",
        p.completed,
        p.total,
        p.percent(),
        p.succeeded,
        p.failed
    );
}

fn print_summary(snapshot: &LedgerSnapshot, target: &str) {
    let total = snapshot.total();
    let rate = if total == 0 {
        0.0
    } else {
        snapshot.success_count as f64 / total as f64 * 100.0
    };

    println!("\n╔══════════════════════════════════════════════╗");
    println!("║      Registration Summary                    ║");
    println!("╠══════════════════════════════════════════════╣");
    println!("║ Target:               {:>20}    ║", target);
    println!("║ Requested:            {:>20}    ║", total);
    println!("║ Registered:           {:>20}    ║", snapshot.success_count);
    println!("║ Failed:               {:>20}    ║", snapshot.failures.len());
    println!("║ Success Rate:         {:>19.1}%   ║", rate);
    println!("╚══════════════════════════════════════════════╝\n");

    for record in &snapshot.successes {
        println!("  ✓ {:<40} {}", record.email, record.name);
    }
    for failure in &snapshot.failures {
        println!("  ✗ slot {:<4} {}", failure.slot, failure.reason);
    }
}
