use actix_web::{middleware, App, HttpServer};
use anyhow::Context;
use std::{env, process};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vg_gateway::config::Settings;
use vg_gateway::ollama::OllamaClient;
use vg_gateway::server;

const USAGE: &str = "usage: ./vg-gateway [config file]";

fn get_args() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    if args.len() > 2 {
        println!("{USAGE}");
        process::exit(1);
    }
    args.get(1).cloned()
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load(get_args().as_deref())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let client = OllamaClient::new(
        reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?,
    );

    info!(
        "listening on {}:{} with {} workers",
        settings.host, settings.port, settings.workers
    );

    let app_settings = settings.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(server::cors())
            .wrap(middleware::Logger::default())
            .configure(server::configure(&app_settings, client.clone()))
    })
    .workers(settings.workers)
    .bind((settings.host.as_str(), settings.port))
    .with_context(|| format!("failed to bind {}:{}", settings.host, settings.port))?
    .run()
    .await?;

    info!("shutting down");
    Ok(())
}
