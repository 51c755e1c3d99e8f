use bcrypt::{hash, verify};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;
use actix_web::web;
use actix_web::HttpMessage;
use validator::Validate;
use actix_web::{HttpRequest, dev::ServiceRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use crate::error::{ApiError, ApiResult};

// ======== USER MODEL ========

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub badge_code: i64,
    pub name: String,
    pub role: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ======== USER ROLE ========

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    #[serde(rename = "ADMIN")]
    Admin,
    #[serde(rename = "OPT")]
    Operator,
    #[serde(rename = "QC")]
    Qc,
    #[serde(rename = "SCM")]
    Scm,
}

impl UserRole {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Some(UserRole::Admin),
            "OPT" => Some(UserRole::Operator),
            "QC" => Some(UserRole::Qc),
            "SCM" => Some(UserRole::Scm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Operator => "OPT",
            UserRole::Qc => "QC",
            UserRole::Scm => "SCM",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            UserRole::Admin => "Administrator",
            UserRole::Operator => "Line operator",
            UserRole::Qc => "Quality control",
            UserRole::Scm => "Supply chain",
        }
    }

    pub fn can_manage_users(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    /// Declare and delete productions, print token labels.
    pub fn can_manage_productions(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Scm)
    }

    pub fn can_apply_checklist(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Qc)
    }

    pub fn can_scan(&self) -> bool {
        true // Every badge on the floor scans
    }

    pub fn all_role_strings() -> Vec<&'static str> {
        vec!["ADMIN", "OPT", "QC", "SCM"]
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ======== REQUEST/RESPONSE STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(range(min = 0, message = "Badge code must be a positive number"))]
    pub badge_code: i64,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserInfo {
    pub id: String,
    pub badge_code: i64,
    pub name: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            role: user.get_role(),
            id: user.id,
            badge_code: user.badge_code,
            name: user.name,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub name: String,
    pub badge_code: i64,
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
}

// ======== AUTH SERVICE ========

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(jwt_secret: &str, token_expiration_hours: i64, bcrypt_cost: u32) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_ttl: Duration::hours(token_expiration_hours),
            bcrypt_cost,
        }
    }

    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl.num_seconds()
    }

    pub fn hash_password(&self, password: &str) -> ApiResult<String> {
        validate_password_strength(password)?;
        hash(password, self.bcrypt_cost)
            .map_err(|e| ApiError::InternalServerError(format!("Failed to hash password: {}", e)))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> ApiResult<bool> {
        verify(password, hash)
            .map_err(|_| ApiError::InternalServerError("Password verification failed".to_string()))
    }

    pub fn generate_token(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now();
        let exp = now + self.token_ttl;

        let claims = Claims {
            sub: user.id.clone(),
            name: user.name.clone(),
            badge_code: user.badge_code,
            role: user.get_role(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| ApiError::AuthError("Failed to generate token".to_string()))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        let validation = Validation::default();
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature =>
                        ApiError::AuthError("Token expired".to_string()),
                    jsonwebtoken::errors::ErrorKind::InvalidToken =>
                        ApiError::AuthError("Invalid token".to_string()),
                    _ =>
                        ApiError::AuthError("Token verification failed".to_string()),
                }
            })
    }
}

// ======== PASSWORD VALIDATION ========

fn validate_password_strength(password: &str) -> ApiResult<()> {
    if password.len() < 8 {
        return Err(ApiError::ValidationError("Password must be at least 8 characters".to_string()));
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::ValidationError("Password must not be digits only".to_string()));
    }
    Ok(())
}

// ======== USER METHODS ========

impl User {
    pub async fn find_by_badge(pool: &SqlitePool, badge_code: i64) -> ApiResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE badge_code = ?")
            .bind(badge_code)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::user_not_found(id))
    }

    pub async fn list(pool: &SqlitePool) -> ApiResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY badge_code ASC")
            .fetch_all(pool)
            .await?;
        Ok(users)
    }

    pub async fn create(
        pool: &SqlitePool,
        badge_code: i64,
        name: &str,
        role: UserRole,
        password: &str,
        auth_service: &AuthService,
    ) -> ApiResult<User> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            badge_code,
            name: name.trim().to_string(),
            role: role.as_str().to_string(),
            password_hash: auth_service.hash_password(password)?,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"INSERT INTO users (id, badge_code, name, role, password_hash, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#
        )
            .bind(&user.id)
            .bind(user.badge_code)
            .bind(&user.name)
            .bind(&user.role)
            .bind(&user.password_hash)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(pool)
            .await
            .map_err(|e| ApiError::from_unique_violation(e, &format!("Badge code {}", badge_code)))?;

        Ok(user)
    }

    /// Get the UserRole enum from the role string
    pub fn get_role(&self) -> UserRole {
        UserRole::from_str(&self.role).unwrap_or(UserRole::Operator)
    }
}

/// Creates an ADMIN with badge 0 when nobody can log in yet.
/// Returns the generated password when one had to be made up.
pub async fn ensure_default_admin(
    pool: &SqlitePool,
    auth_service: &AuthService,
    configured_password: Option<String>,
) -> ApiResult<Option<String>> {
    let user_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if user_count.0 > 0 {
        return Ok(None);
    }

    let (password, generated) = match configured_password {
        Some(password) => (password, false),
        None => {
            let password: String = thread_rng()
                .sample_iter(&Alphanumeric)
                .take(16)
                .map(char::from)
                .collect();
            (password, true)
        }
    };

    User::create(pool, 0, "Administrator", UserRole::Admin, &password, auth_service).await?;
    log::warn!("Created default admin account (badge 0)");

    Ok(if generated { Some(password) } else { None })
}

// ======== HELPER FUNCTIONS ========

pub fn get_current_user(req: &HttpRequest) -> ApiResult<Claims> {
    req.extensions()
        .get::<Claims>().cloned()
        .ok_or_else(|| ApiError::Unauthorized("No user information found".to_string()))
}

pub fn check_permission<F>(claims: &Claims, check: F) -> ApiResult<()>
where
    F: Fn(&UserRole) -> bool,
{
    if check(&claims.role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Insufficient permissions".to_string()))
    }
}

/// Check if the current user has a specific permission
pub fn require_permission(req: &HttpRequest, permission_check: fn(&UserRole) -> bool) -> ApiResult<Claims> {
    let claims = get_current_user(req)?;
    check_permission(&claims, permission_check)?;
    Ok(claims)
}

// ======== JWT MIDDLEWARE ========

pub async fn jwt_middleware(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (actix_web::Error, ServiceRequest)> {
    let token = credentials.token();

    let auth_service = match req.app_data::<web::Data<std::sync::Arc<AuthService>>>() {
        Some(svc) => svc,
        None => {
            log::error!("AuthService not found in app data");
            return Err((
                ApiError::InternalServerError("Auth service not available".to_string()).into(),
                req,
            ));
        }
    };

    match auth_service.verify_token(token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(req)
        }
        Err(err) => {
            log::warn!("JWT verification failed: {}", err);
            Err((err.into(), req))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    fn service() -> AuthService {
        // Lowest cost bcrypt accepts, keeps tests fast
        AuthService::new(&"s".repeat(32), 12, 4)
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(UserRole::from_str("opt"), Some(UserRole::Operator));
        assert_eq!(UserRole::from_str("ADMIN"), Some(UserRole::Admin));
        assert_eq!(UserRole::from_str("viewer"), None);
        assert_eq!(serde_json::to_string(&UserRole::Qc).unwrap(), "\"QC\"");
    }

    #[test]
    fn test_role_gates() {
        assert!(UserRole::Scm.can_manage_productions());
        assert!(!UserRole::Operator.can_manage_productions());
        assert!(UserRole::Qc.can_apply_checklist());
        assert!(!UserRole::Scm.can_apply_checklist());
        assert!(UserRole::Operator.can_scan());
        assert!(!UserRole::Qc.can_manage_users());
    }

    #[test]
    fn test_password_policy() {
        assert!(validate_password_strength("short").is_err());
        assert!(validate_password_strength("12345678").is_err());
        assert!(validate_password_strength("line-7-ok").is_ok());
    }

    #[actix_rt::test]
    async fn test_token_round_trip() {
        let pool = testing::memory_pool().await;
        let auth = service();
        let user = User::create(&pool, 7, "Ana", UserRole::Operator, "floor-pass", &auth)
            .await
            .unwrap();

        let token = auth.generate_token(&user).unwrap();
        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.badge_code, 7);
        assert_eq!(claims.role, UserRole::Operator);

        assert!(auth.verify_token("not-a-token").is_err());
    }

    #[actix_rt::test]
    async fn test_duplicate_badge_is_conflict() {
        let pool = testing::memory_pool().await;
        let auth = service();
        User::create(&pool, 7, "Ana", UserRole::Operator, "floor-pass", &auth).await.unwrap();
        let err = User::create(&pool, 7, "Budi", UserRole::Qc, "floor-pass", &auth)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[actix_rt::test]
    async fn test_default_admin_created_once() {
        let pool = testing::memory_pool().await;
        let auth = service();

        let generated = ensure_default_admin(&pool, &auth, None).await.unwrap();
        let password = generated.expect("password generated");
        let admin = User::find_by_badge(&pool, 0).await.unwrap().unwrap();
        assert_eq!(admin.get_role(), UserRole::Admin);
        assert!(auth.verify_password(&password, &admin.password_hash).unwrap());

        assert!(ensure_default_admin(&pool, &auth, None).await.unwrap().is_none());
        assert_eq!(User::list(&pool).await.unwrap().len(), 1);
    }
}
