use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    InternalServerError(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
    AuthError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
            ApiError::AuthError(msg) => write!(f, "Auth Error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        // Storage details stay in the server log
        let message = match self {
            ApiError::DatabaseError(err) => {
                log::error!("Database error: {}", err);
                "Internal Server Error: storage failure".to_string()
            }
            _ => self.to_string(),
        };
        let error_response = ErrorResponse {
            success: false,
            message,
        };

        match self {
            ApiError::BadRequest(_) => HttpResponse::BadRequest().json(error_response),
            ApiError::NotFound(_) => HttpResponse::NotFound().json(error_response),
            ApiError::Unauthorized(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::Forbidden(_) => HttpResponse::Forbidden().json(error_response),
            ApiError::Conflict(_) => HttpResponse::Conflict().json(error_response),
            ApiError::ValidationError(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::DatabaseError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::AuthError(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::InternalServerError(_) => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

// Domain specific constructors
impl ApiError {
    pub fn bad_request(msg: &str) -> Self {
        ApiError::BadRequest(msg.to_string())
    }

    pub fn internal(msg: &str) -> Self {
        ApiError::InternalServerError(msg.to_string())
    }

    pub fn scan_code_not_found(code: &str) -> Self {
        ApiError::NotFound(format!("Scan code '{}' not found", code))
    }

    pub fn unit_not_found(key: &str) -> Self {
        ApiError::NotFound(format!("Production unit '{}' not found", key))
    }

    pub fn production_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Production with ID '{}' not found", id))
    }

    pub fn user_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("User with ID '{}' not found", id))
    }

    pub fn unknown_worker() -> Self {
        ApiError::Unauthorized("Acting user could not be resolved".to_string())
    }

    pub fn unknown_pipeline(name: &str) -> Self {
        ApiError::BadRequest(format!("Unknown process pipeline '{}'", name))
    }

    pub fn unknown_checklist_field(field: &str, allowed: &[String]) -> Self {
        ApiError::BadRequest(format!(
            "Unknown checklist field '{}'. Valid fields: {}",
            field,
            allowed.join(", ")
        ))
    }

    /// Maps a UNIQUE violation to `Conflict`, anything else stays a database error.
    pub fn from_unique_violation(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return ApiError::Conflict(format!("{} already exists", what));
            }
        }
        ApiError::DatabaseError(err)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::bad_request("x").error_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::scan_code_not_found("A").error_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::unknown_worker().error_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Conflict("dup".into()).error_response().status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::DatabaseError(sqlx::Error::RowNotFound).error_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unique_violation_passthrough() {
        let err = ApiError::from_unique_violation(sqlx::Error::RowNotFound, "User");
        assert!(matches!(err, ApiError::DatabaseError(_)));
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            ApiError::scan_code_not_found("P0001-001-INV-1810").to_string(),
            "Not Found: Scan code 'P0001-001-INV-1810' not found"
        );
        let fields = vec!["uji_ac".to_string(), "labelling".to_string()];
        assert!(ApiError::unknown_checklist_field("paint", &fields)
            .to_string()
            .contains("uji_ac, labelling"));
    }
}
