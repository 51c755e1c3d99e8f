// src/auth_handlers.rs - Login and user management

use actix_web::{web, HttpRequest, HttpResponse};
use validator::Validate;
use std::sync::Arc;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::handlers::ApiResponse;
use crate::auth::{
    AuthService, User, LoginRequest, LoginResponse, UserInfo, UserRole,
    get_current_user, check_permission,
};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

// ======== REQUEST STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(range(min = 0, message = "Badge code must be a positive number"))]
    pub badge_code: i64,
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, message = "Role is required"))]
    pub role: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: Option<String>,
    pub role: Option<String>,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: Option<String>,
}

fn parse_role(role: &str) -> ApiResult<UserRole> {
    UserRole::from_str(role).ok_or_else(|| ApiError::BadRequest(format!(
        "Invalid role '{}'. Valid roles: {}",
        role,
        UserRole::all_role_strings().join(", ")
    )))
}

// ======== AUTH HANDLERS ========

pub async fn login(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    let user = User::find_by_badge(&app_state.db_pool, request.badge_code)
        .await?
        .ok_or_else(|| ApiError::AuthError("Invalid badge code or password".to_string()))?;

    if !auth_service.verify_password(&request.password, &user.password_hash)? {
        log::warn!("Failed login for badge {}", request.badge_code);
        return Err(ApiError::AuthError("Invalid badge code or password".to_string()));
    }

    let token = auth_service.generate_token(&user)?;

    log::info!("User {} (badge {}) logged in", user.name, user.badge_code);

    let response = LoginResponse {
        token,
        expires_in: auth_service.token_ttl_seconds(),
        user: user.into(),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        response,
        "Login successful".to_string(),
    )))
}

pub async fn get_profile(http_request: HttpRequest) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;

    #[derive(Serialize)]
    struct ProfileResponse {
        id: String,
        badge_code: i64,
        name: String,
        role: UserRole,
        role_name: &'static str,
        can_manage_productions: bool,
        can_apply_checklist: bool,
    }

    let response = ProfileResponse {
        id: claims.sub,
        badge_code: claims.badge_code,
        name: claims.name,
        role: claims.role,
        role_name: claims.role.display_name(),
        can_manage_productions: claims.role.can_manage_productions(),
        can_apply_checklist: claims.role.can_apply_checklist(),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

// ======== USER MANAGEMENT (ADMIN) ========

pub async fn get_users(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    let users: Vec<UserInfo> = User::list(&app_state.db_pool)
        .await?
        .into_iter()
        .map(|u| u.into())
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(users)))
}

pub async fn create_user(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<CreateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    request.validate()?;
    let role = parse_role(&request.role)?;

    let user = User::create(
        &app_state.db_pool,
        request.badge_code,
        &request.name,
        role,
        &request.password,
        &auth_service,
    ).await?;

    log::info!("Admin {} created user {} (badge {}, {})", claims.name, user.name, user.badge_code, role);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        UserInfo::from(user),
        "User created successfully".to_string(),
    )))
}

pub async fn update_user(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    path: web::Path<String>,
    request: web::Json<UpdateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    request.validate()?;

    let role = request.role.as_deref().map(parse_role).transpose()?;
    if user_id == claims.sub {
        if let Some(role) = role {
            if role != claims.role {
                return Err(ApiError::BadRequest("Cannot change your own role".to_string()));
            }
        }
    }

    let mut user = User::find_by_id(&app_state.db_pool, &user_id).await?;
    if let Some(ref name) = request.name {
        user.name = name.trim().to_string();
    }
    if let Some(role) = role {
        user.role = role.as_str().to_string();
    }
    if let Some(ref password) = request.password {
        user.password_hash = auth_service.hash_password(password)?;
    }
    user.updated_at = Utc::now();

    sqlx::query("UPDATE users SET name = ?, role = ?, password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(&user.name)
        .bind(&user.role)
        .bind(&user.password_hash)
        .bind(user.updated_at)
        .bind(&user.id)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("Admin {} updated user {}", claims.name, user.id);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        UserInfo::from(user),
        "User updated successfully".to_string(),
    )))
}

pub async fn delete_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    if user_id == claims.sub {
        return Err(ApiError::BadRequest("Cannot delete your own account".to_string()));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&user_id)
        .execute(&app_state.db_pool)
        .await
        .map_err(|e| match e {
            // Scan events and checklist logs keep pointing at this worker
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                ApiError::Conflict("User has recorded scans or checklist entries".to_string())
            }
            other => ApiError::DatabaseError(other),
        })?;

    if result.rows_affected() == 0 {
        return Err(ApiError::user_not_found(&user_id));
    }

    log::info!("Admin {} deleted user {}", claims.name, user_id);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "User deleted successfully".to_string(),
    )))
}
