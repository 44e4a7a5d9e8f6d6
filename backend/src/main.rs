use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use backend::config::AppConfig;
use backend::cors::build_cors;
use backend::routes::{configure_routes, UploadLimit};
use backend::service::DiagnosisService;
use std::env;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let config = AppConfig::from_env().map_err(|e| {
        log::error!("Failed to load configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let service = web::Data::new(DiagnosisService::load(&config));
    if !service.is_ready() {
        log::warn!("No model could be loaded; /predict will answer with an error");
    }

    let cors_config = config.cors.clone();
    let upload_limit = UploadLimit(config.server.max_upload_bytes);
    let bind_address = config.bind_address();

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_config))
            .wrap(Logger::default())
            .app_data(service.clone())
            .configure(|cfg| configure_routes(cfg, upload_limit))
    })
    .bind(&bind_address)?
    .run()
    .await
}
