use actix_multipart::{Field, Multipart};
use actix_web::http::header;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::classifier::{classify, TOP_K};
use crate::error::ApiError;
use crate::models::{HealthResponse, Prediction, PredictionsResponse};
use crate::server::AppState;

pub const UPLOAD_FIELD: &str = "file";

const DOCS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Fruit and Vegetable Detector API</title></head>
<body>
<h1>Fruit and Vegetable Detector API</h1>
<p>Classifies fruits and vegetables in an uploaded image using a pretrained model.</p>
<h2>GET /health</h2>
<p>Returns <code>{"status": "ok"}</code> once the model is loaded.</p>
<h2>POST /predict</h2>
<p>Multipart form upload with the image in the <code>file</code> field.
Returns the three most likely classes, highest confidence first:</p>
<pre>{"predictions": [{"label": "banana", "confidence": 0.97}, ...]}</pre>
<p>Missing uploads and undecodable images are rejected with 400 and a
<code>detail</code> message.</p>
<p>Machine-readable description: <a href="/openapi.json">/openapi.json</a></p>
</body>
</html>
"#;

pub async fn root() -> HttpResponse {
    HttpResponse::TemporaryRedirect()
        .insert_header((header::LOCATION, "/docs"))
        .finish()
}

pub async fn docs() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(DOCS_HTML)
}

pub async fn openapi() -> HttpResponse {
    let prediction = json!({
        "type": "object",
        "required": ["label", "confidence"],
        "properties": {
            "label": {"type": "string"},
            "confidence": {"type": "number", "minimum": 0, "maximum": 1}
        }
    });
    let error = json!({
        "type": "object",
        "required": ["detail"],
        "properties": {"detail": {"type": "string"}}
    });

    HttpResponse::Ok().json(json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Fruit and Vegetable Detector API",
            "description": "Classifies fruits and vegetables using a pretrained model.",
            "version": env!("CARGO_PKG_VERSION")
        },
        "paths": {
            "/health": {
                "get": {
                    "summary": "Health check",
                    "responses": {"200": {"description": "Service is up"}}
                }
            },
            "/predict": {
                "post": {
                    "summary": "Predict top 3 classes with confidence scores",
                    "requestBody": {
                        "required": true,
                        "content": {"multipart/form-data": {"schema": {
                            "type": "object",
                            "required": [UPLOAD_FIELD],
                            "properties": {UPLOAD_FIELD: {"type": "string", "format": "binary"}}
                        }}}
                    },
                    "responses": {
                        "200": {
                            "description": "Top predictions",
                            "content": {"application/json": {"schema": {
                                "type": "object",
                                "properties": {"predictions": {
                                    "type": "array",
                                    "minItems": TOP_K,
                                    "maxItems": TOP_K,
                                    "items": prediction
                                }}
                            }}}
                        },
                        "400": {
                            "description": "Missing file or invalid image",
                            "content": {"application/json": {"schema": error.clone()}}
                        },
                        "413": {
                            "description": "Upload too large",
                            "content": {"application/json": {"schema": error}}
                        }
                    }
                }
            }
        }
    }))
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse::ok())
}

/// Reads the multipart `file` field into memory. Other fields are skipped.
async fn read_upload(payload: &mut Multipart, limit: usize) -> Result<Vec<u8>, ApiError> {
    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| {
            warn!("Malformed multipart body: {}", e);
            ApiError::MissingFile
        })?;

        let disposition = field.content_disposition();
        if disposition.get_name() != Some(UPLOAD_FIELD) {
            drain(&mut field).await?;
            continue;
        }

        let filename = disposition
            .get_filename()
            .filter(|name| !name.is_empty())
            .map(str::to_owned);
        let Some(filename) = filename else {
            return Err(ApiError::MissingFile);
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| {
                warn!("Upload interrupted: {}", e);
                ApiError::MissingFile
            })?;
            if bytes.len() + data.len() > limit {
                return Err(ApiError::PayloadTooLarge { limit });
            }
            bytes.extend_from_slice(&data);
        }

        debug!(filename = %filename, size = bytes.len(), "Received upload");
        return Ok(bytes);
    }

    Err(ApiError::MissingFile)
}

async fn drain(field: &mut Field) -> Result<(), ApiError> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(|e| {
            warn!("Malformed multipart body: {}", e);
            ApiError::MissingFile
        })?;
    }
    Ok(())
}

#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn predict(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let bytes = read_upload(&mut payload, state.max_upload_bytes).await?;

    // Decoding and the forward pass are CPU-bound.
    let classifier = state.classifier.clone();
    let ranked = web::block(move || {
        let image = image::load_from_memory(&bytes).map_err(|e| {
            warn!("Failed to decode image: {}", e);
            ApiError::InvalidImage
        })?;
        classify(classifier.as_ref(), &image.to_rgb8(), TOP_K).map_err(ApiError::from)
    })
    .await
    .map_err(|_| ApiError::WorkerUnavailable)?
    .map_err(|e| {
        if let ApiError::Inference(cause) = &e {
            error!("Inference failed: {}", cause);
        }
        e
    })?;

    let predictions: Vec<Prediction> = ranked
        .into_iter()
        .map(|score| Prediction {
            label: score.label,
            confidence: score.probability,
        })
        .collect();

    if let Some(top) = predictions.first() {
        info!(label = %top.label, confidence = top.confidence, "Prediction complete");
    }

    Ok(HttpResponse::Ok().json(PredictionsResponse { predictions }))
}
