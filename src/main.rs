use std::sync::Arc;

use anyhow::Context;

use bulk_sender::campaigns::DispatchEngine;
use bulk_sender::classifier::ReplyClassifier;
use bulk_sender::config::AppConfig;
use bulk_sender::gateway::{GatewayCredential, MessageGateway, TwilioGateway};
use bulk_sender::llm::{LlmConfig, create_provider};
use bulk_sender::optout::{OptOutLedger, spawn_confirmation_task};
use bulk_sender::replies::{AutoResponder, ReplyPipeline};
use bulk_sender::retry::{Sleeper, TokioSleeper};
use bulk_sender::server::{self, AppState};
use bulk_sender::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env();

    eprintln!("📨 Bulk Sender v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Business: {}", config.business_name);
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook/whatsapp", config.port);
    eprintln!("   API: http://0.0.0.0:{}/api/campaigns", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&config.db_path))
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path))?,
    );
    eprintln!("   Database: {}", config.db_path);

    // ── Classifier ───────────────────────────────────────────────────────
    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
    let provider = match LlmConfig::from_env() {
        Some(llm_config) => {
            eprintln!("   Classifier: {:?} ({})", llm_config.backend, llm_config.model);
            Some(create_provider(&llm_config).context("Failed to create LLM provider")?)
        }
        None => {
            eprintln!("   Classifier: keywords only (no LLM key set)");
            None
        }
    };
    let classifier = Arc::new(ReplyClassifier::new(
        provider,
        Arc::clone(&sleeper),
        config.classifier.clone(),
    ));

    // ── Gateway ──────────────────────────────────────────────────────────
    let gateway: Arc<dyn MessageGateway> =
        Arc::new(TwilioGateway::new().context("Failed to create Twilio client")?);
    let credential = match GatewayCredential::from_env() {
        Ok(credential) => {
            eprintln!("   Gateway: Twilio (from {})", credential.from);
            Some(credential)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Gateway credentials missing, outbound sending disabled");
            eprintln!("   Gateway: disabled ({e})");
            None
        }
    };

    // ── Opt-out ledger + confirmations ───────────────────────────────────
    let ledger = OptOutLedger::new(
        Arc::clone(&db),
        config.numbering_plan.clone(),
        config.business_name.clone(),
    );
    let _confirmation_task = credential.clone().map(|credential| {
        spawn_confirmation_task(
            ledger.clone(),
            Arc::clone(&gateway),
            credential,
            config.confirmation_poll_interval,
        )
    });

    // ── Dispatch + replies ───────────────────────────────────────────────
    let engine = DispatchEngine::new(
        Arc::clone(&db),
        Arc::clone(&gateway),
        sleeper,
        config.numbering_plan.clone(),
        config.dispatch.clone(),
    );
    let pipeline = Arc::new(ReplyPipeline::new(
        Arc::clone(&db),
        classifier,
        ledger.clone(),
        AutoResponder::new(config.business_name.clone()),
    ));

    let state = AppState {
        engine,
        ledger,
        pipeline,
        credential,
    };

    eprintln!();
    server::serve(state, config.port)
        .await
        .context("HTTP server failed")?;
    Ok(())
}
