use axum::{response::IntoResponse, Extension, Json};
use chrono::Utc;
use serde_json::json;

use crate::{
    server::ModelCard,
    types::{ModelList, ModelObject},
};

/// `GET /v1/models`: the single model this gateway serves.
pub async fn list_models(Extension(card): Extension<ModelCard>) -> Json<ModelList> {
    Json(ModelList {
        object: "list".to_string(),
        data: vec![ModelObject {
            id: card.id.as_ref().clone(),
            object: "model".to_string(),
            created: Utc::now().timestamp(),
            owned_by: card.owned_by.as_ref().clone(),
            root: None,
            parent: None,
            permission: None,
        }],
    })
}

/// `GET /health`: liveness check.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
