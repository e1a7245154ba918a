use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use txcoord_coordinator::{
    Coordinator, CoordinatorConfig, ShutdownReport, Statistics, TransactionOutcome,
    TransactionRequest, error_chain,
};
use txcoord_core::{ParticipantConfig, ParticipantId, TransactionStatus};

use crate::error::{CliError, Result};
use crate::playbook::Playbook;

#[derive(Debug, Serialize)]
struct RunEntry {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<TransactionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    transactions: Vec<RunEntry>,
    statistics: Statistics,
    drained: bool,
}

pub(crate) fn run(path: &Path, json: bool) -> Result<()> {
    let playbook = Playbook::load(path)?;
    let config = playbook.config()?;
    let requests = playbook
        .transactions
        .iter()
        .enumerate()
        .map(|(i, spec)| Ok((spec.label(i + 1), spec.to_request(i + 1)?)))
        .collect::<Result<Vec<_>>>()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    let report = runtime.block_on(simulate(&playbook, config, requests))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn simulate(
    playbook: &Playbook,
    config: CoordinatorConfig,
    requests: Vec<(String, TransactionRequest)>,
) -> Result<SimulationReport> {
    let coordinator = Coordinator::new(config, Arc::new(playbook.client()))?;
    for id in playbook.scripted_participants() {
        if coordinator.participant(&ParticipantId::from(id)).is_err() {
            let scripted = ParticipantConfig::new(format!("playbook://{id}")).with_compensation(true);
            coordinator.register_participant(id, scripted)?;
        }
    }

    let mut transactions = Vec::with_capacity(requests.len());
    for (name, request) in requests {
        debug!(transaction = %name, "running playbook transaction");
        let entry = match coordinator.start_transaction(request).await {
            Ok(outcome) => {
                let reason = coordinator
                    .transaction(&outcome.transaction_id)
                    .and_then(|record| record.abort_reason);
                RunEntry {
                    name,
                    outcome: Some(outcome),
                    reason,
                    error: None,
                }
            }
            Err(error) => RunEntry {
                name,
                outcome: None,
                reason: None,
                error: Some(error_chain(&error)),
            },
        };
        transactions.push(entry);
    }

    let ShutdownReport { drained, .. } = coordinator.shutdown().await;
    Ok(SimulationReport {
        transactions,
        statistics: coordinator.statistics(),
        drained,
    })
}

fn print_report(report: &SimulationReport) {
    if report.transactions.is_empty() {
        println!("No transactions in playbook.");
    }
    for entry in &report.transactions {
        print_entry(entry);
    }

    let metrics = &report.statistics.metrics;
    println!();
    println!("Statistics:");
    println!("  started: {}", metrics.transactions_started);
    println!("  committed: {}", metrics.transactions_committed);
    println!("  aborted: {}", metrics.transactions_aborted);
    println!("  failed: {}", metrics.transactions_failed);
    println!(
        "  compensations: {} ({} failed)",
        metrics.compensations_executed, metrics.compensation_failures
    );
    println!("  commit failures: {}", metrics.commit_failures);
    println!("  retries: {}", metrics.retries);

    if !report.drained {
        println!();
        println!("Warning: shutdown timed out with transactions still running.");
    }
}

fn print_entry(entry: &RunEntry) {
    let Some(outcome) = &entry.outcome else {
        let error = entry.error.as_deref().unwrap_or("unknown error");
        println!("{}: error: {error}", entry.name);
        return;
    };

    let steps = outcome
        .steps_completed
        .map(|n| format!(" ({n} steps)"))
        .unwrap_or_default();
    match (&outcome.status, &entry.reason) {
        (TransactionStatus::Aborted, Some(reason)) => {
            println!("{}: aborted{steps}: {reason}", entry.name);
        }
        (status, _) => println!("{}: {status}{steps}", entry.name),
    }
    for failure in &outcome.commit_failures {
        println!(
            "  requires reconciliation: {} ({})",
            failure.participant, failure.error
        );
    }
}
