use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::io;
use std::sync::Arc;

use fitsocial_server::ai::AiService;
use fitsocial_server::api::{self, AppState};
use fitsocial_server::auth::AuthService;
use fitsocial_server::config::Config;
use fitsocial_server::store::Store;
use fitsocial_server::uploads::UploadStore;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // Initialize store
    let store = Arc::new(Store::new(&config.database_path).map_err(|e| {
        log::error!("Failed to initialize database {}: {}", config.database_path, e);
        io::Error::new(io::ErrorKind::Other, e)
    })?);

    let auth_service = Arc::new(AuthService::from_config(&config, store.clone()));
    let uploads = Arc::new(UploadStore::new(&config.upload_dir, config.max_upload_bytes)?);
    let ai = AiService::from_config(config.ai.as_ref());

    let state = web::Data::new(AppState::new(store, auth_service, uploads).with_ai(ai));

    log::info!("Database: {}", config.database_path);
    log::info!("Uploads: {}", config.upload_dir);
    log::info!(
        "AI coaching: {}",
        if state.ai.is_configured() { "enabled" } else { "disabled" }
    );

    let cors_origin = config.cors_origin.clone();
    let payload_limit = config.max_upload_bytes + 64 * 1024;

    let server = HttpServer::new(move || {
        let cors = match &cors_origin {
            Some(origin) => Cors::default()
                .allowed_origin(origin)
                .allow_any_method()
                .allow_any_header()
                .supports_credentials(),
            None => Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header(),
        }
        .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(payload_limit))
            .configure(api::configure_routes)
    });

    log::info!("Starting fitsocial-server on {}:{}", config.host, config.port);
    server.bind((config.host.as_str(), config.port))?.run().await
}
