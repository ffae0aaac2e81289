use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing::info;

use crate::classifier::Classifier;
use crate::config::ServerConfig;
use crate::handlers;

/// Process-wide state, built once and read by every request.
pub struct AppState {
    pub classifier: Arc<dyn Classifier>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(classifier: Arc<dyn Classifier>, max_upload_bytes: usize) -> Self {
        Self {
            classifier,
            max_upload_bytes,
        }
    }
}

/// Registers every route. Shared by [`startup`] and the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(handlers::root)))
        .service(web::resource("/docs").route(web::get().to(handlers::docs)))
        .service(web::resource("/openapi.json").route(web::get().to(handlers::openapi)))
        .service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(web::resource("/predict").route(web::post().to(handlers::predict)));
}

pub async fn startup(
    config: ServerConfig,
    classifier: Arc<dyn Classifier>,
) -> std::io::Result<()> {
    let state = web::Data::new(AppState::new(classifier, config.max_upload_bytes));

    info!("Max upload size: {} MB", config.max_upload_bytes / (1024 * 1024));
    info!("Server running at http://{}:{}", config.host, config.port);

    let mut server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    });

    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    server.bind(config.bind_address())?.run().await
}
