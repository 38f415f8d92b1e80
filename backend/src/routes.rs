use actix_web::{HttpResponse, web};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use shared::{HealthResponse, PredictionRequest};
use uuid::Uuid;

use crate::dispatcher::{Dispatcher, PredictionError};
use crate::inference::preprocess::DecodeError;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/tasks").route(web::get().to(list_tasks)))
        .service(web::resource("/predict/{task}").route(web::post().to(predict)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse::healthy())
}

async fn list_tasks(dispatcher: web::Data<Dispatcher>) -> HttpResponse {
    HttpResponse::Ok().json(dispatcher.registry().summaries())
}

async fn predict(
    dispatcher: web::Data<Dispatcher>,
    path: web::Path<String>,
    request: web::Json<PredictionRequest>,
) -> Result<HttpResponse, PredictionError> {
    let task_id = path.into_inner();
    let request_id = Uuid::new_v4();
    log::debug!("[{}] prediction requested for task '{}'", request_id, task_id);

    let outcome = match decode_image(&request.image) {
        Ok(image) => dispatcher.predict_blocking(task_id.clone(), image).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(prediction) => Ok(HttpResponse::Ok().json(prediction)),
        Err(e) => {
            log::error!("[{}] Prediction for task '{}' failed: {}", request_id, task_id, e);
            Err(e)
        }
    }
}

fn decode_image(encoded: &str) -> Result<Vec<u8>, PredictionError> {
    // Wrapped encoders (e.g. the `base64` CLI) insert line breaks.
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD.decode(compact).map_err(DecodeError::from)?;
    Ok(bytes)
}
