use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use codeshare_core::exercise::{Exercise, NewExercise};

use crate::error::AppError;
use crate::state::AppState;

/// Request body for saving an exercise's code.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCodeBody {
    pub current_code: String,
}

/// GET /api/v1/exercises
pub async fn list_exercises(State(state): State<AppState>) -> Json<Vec<Exercise>> {
    Json(state.exercises.list())
}

/// POST /api/v1/exercises
pub async fn create_exercise(
    State(state): State<AppState>,
    Json(body): Json<NewExercise>,
) -> Result<(StatusCode, Json<Exercise>), AppError> {
    let exercise = state.exercises.create(body)?;
    Ok((StatusCode::CREATED, Json(exercise)))
}

/// GET /api/v1/exercises/{id}
pub async fn get_exercise(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Exercise>, AppError> {
    state
        .exercises
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("exercise not found: {id}")))
}

/// PUT /api/v1/exercises/{id}/current-code
pub async fn save_current_code(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SaveCodeBody>,
) -> Result<Json<Exercise>, AppError> {
    let exercise = state.exercises.save_current_code(&id, body.current_code)?;
    tracing::info!(id = %exercise.id, "Exercise code saved");
    Ok(Json(exercise))
}
