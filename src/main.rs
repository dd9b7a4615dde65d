mod cli;

use chrono::NaiveDate;
use clap::Parser;
use cli::{Cli, Commands};
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use venue_reconcile::{
    config::MAX_CONCURRENCY,
    error::{ReconcileError, Result},
    export,
    ledger::LedgerParser,
    notify::{self, Notifier, TracingNotifier},
    platform::{auth::load_token_file, Pager, PlatformClient, TokenCell},
    reconcile::{AggregateReconciler, EntityReconciler, EntityReconciliation, PageSizes, ReconciliationReport},
    retry::RetryPolicy,
    utils, Config,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("venue_reconcile=debug,info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::All {
            since,
            concurrency,
            top,
            no_export,
        } => {
            info!("Starting full reconciliation...");
            run_all(&config, since, concurrency, top, no_export).await
        }

        Commands::Member { id, since, verbose } => {
            info!("Reconciling member {}", id);
            run_member(&config, &id, since, verbose).await
        }

        Commands::CheckToken => check_token(&config).await,

        Commands::ShowConfig => show_config(&config),
    };

    if let Err(e) = result {
        TracingNotifier.notify_error(&e.to_string()).await;
        eprintln!("{}", format!("Error: {}", e).red());
        std::process::exit(1);
    }
}

/// Shared token plus a pager over the live platform client.
struct Session {
    tokens: Arc<TokenCell>,
    pager: Pager,
}

async fn connect(config: &Config) -> Result<Session> {
    let token = match config.platform.token.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(token) => token.to_string(),
        None => reload_token(config).await?,
    };

    let tokens = Arc::new(TokenCell::new(token));
    let client = PlatformClient::new(&config.platform.base_url, tokens.clone(), config.request_timeout())?;
    let pager = Pager::new(
        Arc::new(client),
        config.request_timeout(),
        Duration::from_millis(config.fetch.page_delay_ms),
    );
    Ok(Session { tokens, pager })
}

async fn reload_token(config: &Config) -> Result<String> {
    match &config.platform.token_file {
        Some(path) => load_token_file(path).await,
        None => Err(ReconcileError::Config(
            "no platform.token_file configured to reload the token from".to_string(),
        )),
    }
}

fn entity_reconciler(config: &Config, pager: Pager) -> Result<EntityReconciler> {
    let parser = LedgerParser::new(config.reconcile.ledger_kind_code.clone())?;
    let page_sizes = PageSizes {
        cards: config.fetch.card_page_size,
        payments: config.fetch.payment_page_size,
        ledger: config.fetch.ledger_page_size,
    };
    Ok(EntityReconciler::new(pager, parser, &config.platform.store_id, page_sizes))
}

fn parse_date(raw: Option<String>, fallback: NaiveDate) -> Result<NaiveDate> {
    match raw {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|e| ReconcileError::Config(format!("invalid date '{}': {}", raw, e))),
        None => Ok(fallback),
    }
}

async fn run_all(
    config: &Config,
    since: Option<String>,
    concurrency: Option<usize>,
    top: usize,
    no_export: bool,
) -> Result<()> {
    let since = parse_date(since, config.since_date()?)?;
    let concurrency = concurrency
        .map(|n| n.clamp(1, MAX_CONCURRENCY))
        .unwrap_or_else(|| config.concurrency());

    println!(
        "{}",
        format!("Reconciling store {} from {} to today...", config.platform.store_id, since).cyan()
    );

    let session = connect(config).await?;
    let reconciler = AggregateReconciler::new(
        entity_reconciler(config, session.pager.clone())?,
        Duration::from_millis(config.fetch.roster_page_delay_ms),
        concurrency,
    );

    let policy = RetryPolicy::from_config(&config.retry);
    let tokens = &session.tokens;
    let reconciler = &reconciler;

    let run = policy.run(
        "reconciliation run",
        |attempt| async move {
            let generation = tokens.generation();
            match reconciler.run(since).await {
                Err(e) if e.is_auth() => {
                    warn!("Token rejected on attempt {}, reloading it", attempt);
                    tokens.refresh_with(generation, || reload_token(config)).await?;
                    Err(e)
                }
                other => other,
            }
        },
        |e| e.is_transient() || e.is_auth() || matches!(e, ReconcileError::EmptyRoster),
    );

    let report = tokio::select! {
        result = run => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning the run");
            return Err(ReconcileError::Cancelled);
        }
    };

    print_report(&report, top);

    if !no_export {
        let path = export::write_json(&report, &config.output.dir)?;
        println!("\nReport saved to {}", path.display().to_string().cyan());
    }

    let alerts = notify::dispatch(&TracingNotifier, &report, config.notify.accuracy_threshold).await;
    if alerts > 0 {
        println!("{}", format!("{} alert(s) raised, see log", alerts).yellow());
    }

    Ok(())
}

async fn run_member(config: &Config, id: &str, since: Option<String>, verbose: bool) -> Result<()> {
    let since = parse_date(since, config.since_date()?)?;
    let session = connect(config).await?;
    let reconciler = entity_reconciler(config, session.pager)?;

    let result = tokio::select! {
        result = reconciler.reconcile(id, since) => result?,
        _ = tokio::signal::ctrl_c() => return Err(ReconcileError::Cancelled),
    };

    match result {
        Some(result) => print_member(&result, verbose),
        None => println!("{}", format!("Member {} holds no membership card", id).yellow()),
    }
    Ok(())
}

async fn check_token(config: &Config) -> Result<()> {
    let session = connect(config).await?;
    let valid = session
        .pager
        .validate_token(&config.platform.store_id, config.probe_timeout())
        .await?;

    if valid {
        println!("{}", "✓ Token accepted by the platform".green());
        Ok(())
    } else {
        Err(ReconcileError::Auth("token rejected by the platform".to_string()))
    }
}

fn show_config(config: &Config) -> Result<()> {
    println!("{}", "=== Effective Configuration ===".cyan().bold());
    println!("{}", serde_json::to_string_pretty(config)?);
    if config.platform.token.is_some() {
        println!("{}", "(token set via configuration, not shown)".dimmed());
    }
    Ok(())
}

fn print_report(report: &ReconciliationReport, top: usize) {
    let summary = &report.summary;
    let aggregate = &report.aggregate;

    println!("\n{}", "=== Reconciliation Summary ===".cyan().bold());
    println!("Period:             {} .. {}", report.since, report.until);
    println!("Generated:          {}", utils::format_timestamp(&report.generated_at));
    println!("Members:            {}", summary.total_entities);
    println!("Balanced:           {} ✓", summary.balanced_count.to_string().green());
    println!("Unbalanced:         {}", summary.unbalanced_count.to_string().red());
    println!("Accuracy Rate:      {:.1}%", summary.accuracy_percent());
    println!("Total |Difference|: {}", utils::format_money(summary.total_abs_difference));
    println!("Avg |Difference|:   {}", utils::format_money(summary.average_abs_difference));
    if summary.partial_count > 0 {
        println!("Partial Data:       {}", summary.partial_count.to_string().yellow());
    }
    if summary.unparsed_entry_count > 0 {
        println!("Unparsed Entries:   {}", summary.unparsed_entry_count.to_string().yellow());
    }

    println!("\n{}", "=== Venue ===".cyan().bold());
    println!("Turnover Sales:     {}", utils::format_money(aggregate.total_sales_amount));
    println!("Member Balances:    {}", utils::format_money(aggregate.total_member_balance));
    println!("Net Consumption:    {}", utils::format_money(aggregate.total_net_consumption));
    println!("Member Top-ups:     {}", utils::format_money(aggregate.total_purchase));
    println!(
        "Difference:         {}",
        utils::format_difference(aggregate.difference, aggregate.is_balanced)
    );
    if let Some(explanation) = &aggregate.explanation {
        println!("{}", explanation.yellow());
    }
    for issue in &report.diagnostics {
        println!("{}", format!("! {}: {}", issue.source, issue.detail).yellow());
    }

    let unbalanced = report.top_unbalanced(top);
    if unbalanced.is_empty() {
        return;
    }

    let widths = [10, 12, 12, 12, 12, 12, 12];
    println!("\n{}", "Unbalanced Members:".yellow());
    utils::print_table_border(96);
    utils::print_table_row(
        &["ID", "Name", "Top-ups", "Balance", "Net", "Expected", "Difference"],
        &widths,
    );
    utils::print_table_border(96);
    for e in unbalanced {
        utils::print_table_row(
            &[
                &e.entity.id,
                &e.entity.name,
                &utils::format_money(e.total_purchase),
                &utils::format_money(e.current_balance),
                &utils::format_money(e.net_consumption),
                &utils::format_money(e.calculated_balance),
                &utils::format_money(e.difference),
            ],
            &widths,
        );
    }
    utils::print_table_border(96);
    if aggregate.unbalanced.len() > unbalanced.len() {
        println!("... and {} more", aggregate.unbalanced.len() - unbalanced.len());
    }
}

fn print_member(result: &EntityReconciliation, verbose: bool) {
    println!("\n{}", format!("=== Member {} ===", result.entity.id).cyan().bold());
    println!("Name:               {}", result.entity.name);
    println!("Contact:            {}", result.entity.contact);
    println!("Cards:              {} ({})", result.card_count, result.card_names.join(", "));
    println!("Top-ups:            {} ({} payments)", utils::format_money(result.total_purchase), result.payment_count);
    println!(
        "Consumption:        {} gross, {} cancelled, {} net",
        utils::format_money(result.gross_consumption),
        utils::format_money(result.cancelled_amount),
        utils::format_money(result.net_consumption)
    );
    println!("Expected Balance:   {}", utils::format_money(result.calculated_balance));
    println!("Actual Balance:     {}", utils::format_money(result.current_balance));
    println!(
        "Difference:         {}",
        utils::format_difference(result.difference, result.is_balanced)
    );
    println!("Accuracy:           {}%", result.balance_accuracy);

    for issue in &result.diagnostics {
        println!("{}", format!("! {}: {}", issue.source, issue.detail).yellow());
    }

    if !verbose {
        return;
    }

    if !result.payments.is_empty() {
        println!("\n{}", "Payments:".yellow());
        for p in &result.payments {
            println!(
                "  {}  {:>12}  {:?}  {}",
                p.raw_timestamp,
                utils::format_money(p.amount),
                p.order_kind,
                p.order_ref
            );
        }
    }
    if !result.unparsed_entries.is_empty() {
        println!("\n{}", "Unparsed Ledger Entries:".yellow());
        for entry in &result.unparsed_entries {
            println!("  {}  {}  {}", entry.id, entry.raw_timestamp, entry.narrative);
        }
    }
}
