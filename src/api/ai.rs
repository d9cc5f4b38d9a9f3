use actix_web::{web, HttpResponse};

use super::AppState;
use crate::ai::{NutritionAdviceRequest, WorkoutPlanRequest};
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::ApiResponse;

// ==================== AI Endpoints ====================

pub async fn workout_plan(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<WorkoutPlanRequest>,
) -> ApiResult<HttpResponse> {
    body.validate().map_err(ApiError::BadRequest)?;

    log::info!("Generating workout plan for user {}", auth_user.user_id);
    let reply = state.ai.workout_plan(&body).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "plan": reply.structured,
        "raw": reply.raw,
    }))))
}

pub async fn nutrition_advice(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<NutritionAdviceRequest>,
) -> ApiResult<HttpResponse> {
    body.validate().map_err(ApiError::BadRequest)?;

    log::info!("Generating nutrition advice for user {}", auth_user.user_id);
    let reply = state.ai.nutrition_advice(&body).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "advice": reply.structured,
        "raw": reply.raw,
    }))))
}
