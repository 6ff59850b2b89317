use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use customvision_host::config::Config;
use customvision_host::handlers::AppState;
use customvision_host::inference::TractPredictor;
use customvision_host::routes;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load and initialize the model before accepting any traffic.
    let predictor = TractPredictor::load(&config.model, &config.labels, config.inference_settings())
        .with_context(|| format!("failed to initialize model {}", config.model.display()))?;
    info!(labels = predictor.labels().len(), "model initialized");

    let state = web::Data::new(AppState::new(Arc::new(predictor), config.max_body_bytes));

    let (host, port) = config.bind_addr();
    info!("Server running at http://{}:{}", host, port);

    let mut server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .configure(routes::init(state.clone()))
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    server.bind((host, port))?.run().await?;
    Ok(())
}
