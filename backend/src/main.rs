mod config;
mod dispatcher;
mod inference;
mod routes;
mod storage;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use config::{ArtifactBackend, ServiceConfig};
use dispatcher::Dispatcher;
use inference::model::ModelLoader;
use inference::registry::ModelRegistry;
use routes::configure_routes;
use std::sync::Arc;
use storage::local_store::LocalArtifactStore;
use storage::s3_service::S3Service;
use storage::{ArtifactFetcher, ArtifactStore};

fn startup_error(message: String) -> std::io::Error {
    log::error!("{}", message);
    std::io::Error::other(message)
}

#[cfg(feature = "torch")]
fn model_loader() -> Box<dyn ModelLoader> {
    Box::new(inference::model::TorchScriptLoader)
}

#[cfg(not(feature = "torch"))]
fn model_loader() -> Box<dyn ModelLoader> {
    Box::new(inference::model::UnavailableLoader)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = ServiceConfig::from_env()
        .map_err(|e| startup_error(format!("Invalid configuration: {}", e)))?;

    let store: Box<dyn ArtifactStore> = match &config.backend {
        ArtifactBackend::S3 { endpoint_url } => {
            log::info!(
                "Fetching artifacts from bucket '{}'{}",
                config.bucket,
                endpoint_url
                    .as_deref()
                    .map(|url| format!(" via {}", url))
                    .unwrap_or_default()
            );
            Box::new(S3Service::from_env(endpoint_url.as_deref()).await)
        }
        ArtifactBackend::Local { root } => {
            log::info!(
                "Reading artifacts for bucket '{}' from {}",
                config.bucket,
                root.display()
            );
            Box::new(LocalArtifactStore::new(root.clone()))
        }
    };
    let fetcher = ArtifactFetcher::new(store, config.bucket.clone());

    let registry = Arc::new(ModelRegistry::new(
        config.tasks.clone(),
        config.scratch_dir.clone(),
    ));
    let loader = model_loader();
    if let Err(e) = registry.initialize(&fetcher, loader.as_ref()).await {
        return Err(startup_error(format!("Model loading failed: {}", e)));
    }
    if registry.is_ready() {
        log::info!("Models loaded successfully!");
    }

    let dispatcher = Dispatcher::new(registry);
    let max_payload = config.max_payload_bytes;
    let bind_address = config.bind_address();

    log::info!("Starting server on {}", bind_address);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allow_any_header()
                    .max_age(3600),
            )
            .app_data(web::JsonConfig::default().limit(max_payload).error_handler(
                |err, _req| {
                    let message = format!("Invalid request body: {}", err);
                    actix_web::error::InternalError::from_response(
                        err,
                        actix_web::HttpResponse::UnprocessableEntity()
                            .json(serde_json::json!({ "detail": message })),
                    )
                    .into()
                },
            ))
            .app_data(web::Data::new(dispatcher.clone()))
            .configure(configure_routes)
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
