//! Terminal output helpers shared by the command handlers

use colored::*;
use stratus_core::domain::deploy::DeployStatus;
use stratus_core::domain::infra::InfraStatus;
use stratus_core::domain::saga::{SagaInstance, SagaLifecycle};
use stratus_core::dto::saga::SagaOutcome;
use stratus_core::error::SagaFailure;

pub fn colorize_infra_status(status: InfraStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        InfraStatus::Ready => text.green(),
        InfraStatus::Failed => text.red(),
        InfraStatus::Destroying => text.yellow(),
        InfraStatus::Pending => text.dimmed(),
        _ => text.cyan(),
    }
}

pub fn colorize_deploy_status(status: DeployStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        DeployStatus::Completed => text.green(),
        DeployStatus::Failed => text.red(),
        DeployStatus::RolledBack => text.yellow(),
        DeployStatus::Pending => text.dimmed(),
        _ => text.cyan(),
    }
}

pub fn colorize_lifecycle(lifecycle: SagaLifecycle) -> ColoredString {
    let text = lifecycle.as_str();
    match lifecycle {
        SagaLifecycle::Running => text.cyan(),
        SagaLifecycle::AwaitingSignal => text.blue(),
        SagaLifecycle::Completed => text.green(),
        SagaLifecycle::Failed => text.red(),
        SagaLifecycle::Cancelled | SagaLifecycle::Orphaned => text.dimmed(),
    }
}

/// Print an instance summary line block
pub fn print_instance_summary(instance: &SagaInstance) {
    println!(
        "  {} {} {}",
        "▸".cyan(),
        instance.id.bold(),
        format!("({})", instance.kind).dimmed()
    );
    println!("    Status:    {}", instance.status);
    println!("    Lifecycle: {}", colorize_lifecycle(instance.lifecycle));
    if instance.cycle > 1 {
        println!("    Cycles:    {}", instance.cycle);
    }
    println!(
        "    Started:   {}",
        instance
            .started_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(failure) = &instance.failure {
        println!("    Failure:   {}", failure.to_string().red());
    }
    println!();
}

pub fn print_failure(failure: &SagaFailure) {
    println!("  Step:    {}", failure.step);
    println!("  Kind:    {}", failure.kind);
    println!("  Message: {}", failure.message.red());

    if let Some(compensation) = &failure.compensation {
        println!(
            "\n{} {}",
            "⚠ Manual intervention needed:".yellow().bold(),
            compensation
        );
    }
}

/// Print a saga outcome; returns whether it was a success
pub fn print_outcome(id: &str, outcome: &SagaOutcome) -> bool {
    match outcome {
        SagaOutcome::Pending => {
            println!("{} {} is still running", "…".cyan(), id.bold());
            false
        }
        SagaOutcome::Completed { output } => {
            println!("{} {} completed", "✓".green(), id.bold());
            if let Ok(pretty) = serde_json::to_string_pretty(output) {
                println!("{}", pretty);
            }
            true
        }
        SagaOutcome::Failed { failure } => {
            println!("{} {} failed", "✗".red(), id.bold());
            print_failure(failure);
            false
        }
        SagaOutcome::Cancelled { failure } => {
            println!("{} {} was cancelled", "✗".yellow(), id.bold());
            print_failure(failure);
            false
        }
    }
}
