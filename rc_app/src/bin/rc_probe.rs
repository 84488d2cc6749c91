use std::sync::Arc;

use rc_app::cli;
use rc_app::config_loader;
use rc_app::probe;
use rc_app::tracing_setup;
use rc_http::CircuitBreakerRegistry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match cli::probe_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}\n{}", cli::USAGE);
            std::process::exit(2);
        }
    };

    let config = config_loader::load_config_or_default(args.config.as_deref());

    // Keep guard alive for the whole run so file logs are flushed
    let log_dir = args.log_dir.as_deref().or(config.log_dir.as_deref());
    let _guard = tracing_setup::init("rc_probe", log_dir, tracing::Level::INFO);

    let registry = Arc::new(CircuitBreakerRegistry::with_config(config.client.circuit_breaker.clone()));
    let token = std::env::var(probe::API_TOKEN_ENV).ok().filter(|t| !t.is_empty());
    let client = probe::build_client(&config, registry.clone(), token)?;
    info!("Probing {} URL(s)", args.urls.len());

    let outcomes = probe::run(&client, &args.urls).await;
    let failed = outcomes.iter().filter(|o| !o.success).count();

    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    println!("{}", serde_json::to_string_pretty(&registry.get_all_stats())?);

    if failed > 0 {
        info!("{failed} probe(s) failed");
        std::process::exit(1);
    }
    Ok(())
}
