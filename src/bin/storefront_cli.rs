use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use storefront_api::{
    config,
    reconciliation::{
        extract_reference, CallbackQuery, FlowSettings, HttpOrderBackend, IdentityGate,
        OrderBackend, ReconciliationFlow, ReferenceKeys,
    },
    session::CheckoutSessionStore,
};

/// Operator tooling for checkout payments.
#[derive(Parser, Debug)]
#[command(name = "storefront-cli", version, about)]
struct Cli {
    /// Base URL of a running storefront API.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    base_url: String,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask the API whether a payment reference is verified.
    Verify(ReferenceArgs),
    /// Look up the order recorded for a payment reference.
    OrderStatus(ReferenceArgs),
    /// Show which reference a callback URL carries.
    ParseCallback(CallbackArgs),
    /// Replay a gateway callback against the API and materialize its order.
    Reconcile(ReconcileArgs),
}

#[derive(Args, Debug)]
struct ReferenceArgs {
    reference: String,
}

#[derive(Args, Debug)]
struct CallbackArgs {
    /// Full callback URL as the gateway sent it.
    url: String,
    #[arg(long, default_value = "reference")]
    reference_key: String,
    #[arg(long, default_value = "trxref")]
    legacy_reference_key: String,
}

#[derive(Args, Debug)]
struct ReconcileArgs {
    /// Full callback URL as the gateway sent it.
    url: String,
    /// Attribute the order to this user instead of a guest.
    #[arg(long)]
    user_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParsedCallback {
    reference: Option<String>,
    source_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    config::init_tracing("warn", false);
    let cli = Cli::parse();
    let backend = HttpOrderBackend::new(cli.base_url.clone());

    match cli.command {
        Commands::Verify(args) => {
            let response = backend
                .verify_payment(&args.reference)
                .await
                .context("verification request failed")?;
            if cli.json {
                print_json(&response)?;
            } else {
                match (&response.data, &response.error) {
                    (Some(data), _) if data.verified => println!("{}: verified", args.reference),
                    (Some(data), _) => println!(
                        "{}: not verified ({})",
                        args.reference,
                        data.error_message.as_deref().unwrap_or("no reason given")
                    ),
                    (None, Some(error)) => println!("{}: verification error: {}", args.reference, error),
                    (None, None) => println!("{}: empty verification response", args.reference),
                }
            }
        }
        Commands::OrderStatus(args) => {
            let response = backend
                .check_order_exists(&args.reference)
                .await
                .context("order lookup failed")?;
            if cli.json {
                print_json(&response)?;
            } else if let Some(order_id) = response.order_id.filter(|_| response.exists) {
                println!("{}: order {}", args.reference, order_id);
            } else {
                println!("{}: no order", args.reference);
            }
        }
        Commands::ParseCallback(args) => {
            let keys = ReferenceKeys::new(args.reference_key, args.legacy_reference_key);
            let query = CallbackQuery::from_url(&args.url).context("invalid callback url")?;
            let reference = extract_reference(&query, &keys);
            let source_key = reference.as_ref().map(|r| {
                if query.get(keys.primary()).map(str::trim) == Some(r.as_str()) {
                    keys.primary().to_string()
                } else {
                    keys.legacy().to_string()
                }
            });
            let parsed = ParsedCallback {
                reference: reference.map(|r| r.into_inner()),
                source_key,
            };
            if cli.json {
                print_json(&parsed)?;
            } else {
                match (&parsed.reference, &parsed.source_key) {
                    (Some(reference), Some(key)) => println!("{} (from `{}`)", reference, key),
                    _ => println!("no payment reference in callback"),
                }
            }
        }
        Commands::Reconcile(args) => {
            let query = CallbackQuery::from_url(&args.url).context("invalid callback url")?;
            // No local session store: checkout data comes from the gateway metadata.
            let flow = ReconciliationFlow::new(
                Arc::new(backend),
                Arc::new(CheckoutSessionStore::in_memory("storefront-cli")),
                IdentityGate::resolved(args.user_id),
                FlowSettings::default(),
            );
            let outcome = flow
                .run(&query, None)
                .await
                .ok_or_else(|| anyhow!("reconciliation did not run"))?;

            if cli.json {
                print_json(&serde_json::json!({
                    "status": outcome.state.phase,
                    "message": outcome.state.message,
                    "reference": outcome.reference,
                    "orderId": outcome.order_id,
                    "alreadyProcessed": outcome.already_processed,
                }))?;
            } else {
                println!("{}: {}", outcome.state.phase, outcome.state.message);
            }
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
