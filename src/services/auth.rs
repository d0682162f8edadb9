use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::Rng;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{
    Claims, CreateUserRequest, LoginRequest, LoginResponse, RegisterResponse, User, UserResponse,
};

/// Characters a login code is drawn from. No lowercase: users read these
/// off a phone screen and type them on another device.
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Authentication service: registration, password login, token issuance
pub struct AuthService;

impl AuthService {
    /// Register a new user and assign the initial login code
    pub async fn register(
        db: &Database,
        code_length: usize,
        req: CreateUserRequest,
    ) -> Result<RegisterResponse> {
        // Validate email
        if !req.email.contains('@') {
            return Err(AppError::BadRequest("Invalid email format".to_string()));
        }

        // Validate password
        if req.password.len() < 6 {
            return Err(AppError::BadRequest(
                "Password must be at least 6 characters".to_string(),
            ));
        }

        // Check if username or email already exists
        let existing: Option<User> =
            sqlx::query_as("SELECT * FROM users WHERE username = ? OR email = ?")
                .bind(&req.username)
                .bind(&req.email)
                .fetch_optional(db.pool())
                .await?;

        if existing.is_some() {
            return Err(AppError::Conflict(
                "Username or email already exists".to_string(),
            ));
        }

        // Hash password
        let password_hash = Self::hash_password(&req.password)?;

        let user_id = Uuid::new_v4().to_string();
        let auth_code = Self::generate_code(code_length);
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, auth_code, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user_id)
        .bind(&req.username)
        .bind(&req.email)
        .bind(&password_hash)
        .bind(&auth_code)
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await?;

        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&user_id)
            .fetch_one(db.pool())
            .await?;

        Ok(RegisterResponse {
            user: UserResponse::from(user),
            auth_code,
        })
    }

    /// Login with username and password
    pub async fn login(db: &Database, config: &Config, req: LoginRequest) -> Result<LoginResponse> {
        let user: User = sqlx::query_as("SELECT * FROM users WHERE username = ?")
            .bind(&req.username)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;

        if !Self::verify_password(&req.password, &user.password_hash)? {
            return Err(AppError::Unauthorized("Invalid credentials".to_string()));
        }

        let token = Self::issue_token(config, &user.id, &user.username)?;

        Ok(LoginResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_in: config.jwt.token_expire_minutes * 60,
            user: UserResponse::from(user),
        })
    }

    /// Current login code for a user, as last written by the rotation scheduler
    pub async fn current_code(db: &Database, user_id: &str) -> Result<String> {
        let code: Option<String> = sqlx::query_scalar("SELECT auth_code FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(db.pool())
            .await?;

        code.ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Issue a bearer token (JWT) for a user
    pub fn issue_token(config: &Config, user_id: &str, username: &str) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::minutes(config.jwt.token_expire_minutes as i64);

        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt.secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Validate a bearer token and extract claims
    pub fn validate_token(token: &str, config: &Config) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt.secret.as_bytes()),
            &validation,
        )
        .map_err(|_| AppError::Unauthorized("Invalid token".to_string()))?;

        Ok(token_data.claims)
    }

    /// Generate a short login code
    pub fn generate_code(length: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..length)
            .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
            .collect()
    }

    /// Hash password using Argon2
    fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string();

        Ok(password_hash)
    }

    /// Verify password against hash
    fn verify_password(password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}
