use std::sync::Arc;

use axum::{Extension, Json};

use streamchat_core::GenerationDefaults;

use crate::{defaults::DefaultsStore, error::ApiResult};

/// `GET /v1/generation/defaults`
pub async fn get_defaults(Extension(store): Extension<Arc<DefaultsStore>>) -> Json<GenerationDefaults> {
    Json(store.snapshot())
}

/// `PUT /v1/generation/defaults`: replace the defaults used by later requests.
pub async fn put_defaults(
    Extension(store): Extension<Arc<DefaultsStore>>,
    Json(next): Json<GenerationDefaults>,
) -> ApiResult<Json<GenerationDefaults>> {
    Ok(Json(store.replace(next)?))
}
