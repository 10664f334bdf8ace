#![cfg(not(tarpaulin_include))]

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
#[cfg(feature = "web")]
use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, Uri},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "web")]
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

#[cfg(feature = "web")]
use crate::app::{ApiJson, AppState};
use crate::error::{AppError, AppResult};
use crate::saving::{JsonFile, next_id};

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "session";

/// Access level of a user
///
/// Every route carries an allow-list of roles; see [`crate::app`] for the lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Agronomist,
    Supervisor,
    Scout,
}

impl Role {
    pub const ALL: &'static [Role] = &[
        Role::Admin,
        Role::Manager,
        Role::Agronomist,
        Role::Supervisor,
        Role::Scout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Agronomist => "agronomist",
            Role::Supervisor => "supervisor",
            Role::Scout => "scout",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == wanted)
            .ok_or_else(|| AppError::bad_request(format!("Unknown role: {}", s.trim())))
    }
}

/// A registered application user
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,

    /// Unique login name
    pub username: String,

    /// Argon2 PHC string for accounts created here; hand-entered accounts may hold plaintext
    pub password: String,

    pub role: Role,

    /// Payroll number the role was checked against at registration
    pub payroll_number: String,

    pub created_at: DateTime<Utc>,
}

/// One row of the payroll reference table
///
/// The table is maintained outside this application and only ever read here.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PayrollRecord {
    pub payroll_number: String,
    pub role: Role,
}

/// Login form data
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    pub username: String,
    pub password: String,
}

/// Registration form data
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub role: String,
    pub payroll_number: String,
}

/// The authenticated user behind one request
///
/// Inserted into the request extensions by the role gate and read by handlers with
/// `Extension<Identity>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
struct Session {
    identity: Identity,
    expires_at: SystemTime,
}

/// Longest lifetime a session may be given
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Active login sessions keyed by session id
///
/// Owned by the application state; cloning shares the same table.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    /// A session table whose sessions live for `ttl`, capped at [`MAX_SESSION_TTL`]
    pub fn new(ttl: Duration) -> Self {
        if ttl > MAX_SESSION_TTL {
            log::warn!(
                "Session lifetime of {}s capped to {}s",
                ttl.as_secs(),
                MAX_SESSION_TTL.as_secs()
            );
        }
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl: ttl.min(MAX_SESSION_TTL),
        }
    }

    /// Start a session for `identity` and return its id
    pub fn create(&self, identity: Identity) -> String {
        let session_id = Uuid::new_v4().to_string();
        let now = SystemTime::now();
        let session = Session {
            identity,
            expires_at: now.checked_add(self.ttl).unwrap_or(now),
        };

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, s| s.expires_at > SystemTime::now());
        sessions.insert(session_id.clone(), session);

        session_id
    }

    /// The identity behind a live session, if any
    pub fn validate(&self, session_id: &str) -> Option<Identity> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(session_id)
            .filter(|session| session.expires_at > SystemTime::now())
            .map(|session| session.identity.clone())
    }

    pub fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }
}

/// Users and the payroll reference table
pub struct UserStore {
    users: JsonFile<User>,
    payroll: JsonFile<PayrollRecord>,
    lock: Mutex<()>,
}

impl UserStore {
    pub fn new(users_file: impl Into<PathBuf>, payroll_file: impl Into<PathBuf>) -> Self {
        Self {
            users: JsonFile::new(users_file),
            payroll: JsonFile::new(payroll_file),
            lock: Mutex::new(()),
        }
    }

    pub fn users(&self) -> AppResult<Vec<User>> {
        self.users.read()
    }

    /// Register a new user
    ///
    /// The requested role must equal the role recorded for the payroll number. Nothing is
    /// written unless every check passes.
    ///
    /// # Errors
    /// * `BadRequest` for blank fields, a taken username, an unknown role or payroll number
    /// * `CredentialMismatch` when the payroll record carries a different role
    pub fn register(&self, request: &RegisterRequest) -> AppResult<User> {
        let username = request.username.trim();
        let payroll_number = request.payroll_number.trim();
        if username.is_empty()
            || request.password.is_empty()
            || request.role.trim().is_empty()
            || payroll_number.is_empty()
        {
            return Err(AppError::bad_request(
                "Username, password, role and payroll number are required",
            ));
        }
        let role: Role = request.role.parse()?;

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut users = self.users.read()?;
        if users.iter().any(|user| user.username == username) {
            return Err(AppError::bad_request("Username already exists"));
        }

        let payroll = self.payroll.read()?;
        let record = payroll
            .iter()
            .find(|record| record.payroll_number.trim() == payroll_number)
            .ok_or_else(|| AppError::bad_request("Payroll number not found"))?;
        if record.role != role {
            return Err(AppError::CredentialMismatch(
                "Payroll number and role do not match".to_string(),
            ));
        }

        let user = User {
            id: next_id(users.iter().map(|user| user.id))?,
            username: username.to_string(),
            password: hash_password(&request.password)?,
            role,
            payroll_number: payroll_number.to_string(),
            created_at: Utc::now(),
        };
        users.push(user.clone());
        self.users.write(&users)?;

        log::info!("Registered user {} as {}", user.username, user.role);
        Ok(user)
    }

    /// The user matching `username` and `password`, if any
    pub fn verify(&self, username: &str, password: &str) -> AppResult<Option<User>> {
        let users = self.users.read()?;
        Ok(users
            .into_iter()
            .find(|user| user.username == username)
            .filter(|user| credential_matches(&user.password, password)))
    }
}

/// Hash a password using Argon2id with a fresh salt
fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Check a supplied password against a stored credential
///
/// Stored values that are not a PHC string are compared for exact equality.
fn credential_matches(stored: &str, supplied: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(hash) => Argon2::default()
            .verify_password(supplied.as_bytes(), &hash)
            .is_ok(),
        Err(_) => stored == supplied,
    }
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
pub async fn serve_login_page() -> Html<&'static str> {
    Html(include_str!("./static/login.html"))
}

#[cfg(feature = "web")]
pub async fn serve_register_page() -> Html<&'static str> {
    Html(include_str!("./static/register.html"))
}

/// Handle user registration
#[cfg(feature = "web")]
pub async fn handle_register(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let user = state.users.register(&request)?;
    Ok(Json(json!({
        "success": true,
        "message": "Registration successful",
        "data": { "username": user.username, "role": user.role },
    })))
}

/// Handle user login requests
///
/// On success a session is created and its id set in the `session` cookie.
#[cfg(feature = "web")]
pub async fn handle_login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(credentials): ApiJson<UserCredentials>,
) -> AppResult<(CookieJar, Json<serde_json::Value>)> {
    let user = state
        .users
        .verify(credentials.username.trim(), &credentials.password)?
        .ok_or_else(|| AppError::Unauthorized("Invalid username or password".to_string()))?;

    let identity = Identity {
        username: user.username,
        role: user.role,
    };
    let session_id = state.sessions.create(identity.clone());
    log::info!("{} logged in", identity.username);

    Ok((
        jar.add(session_cookie(session_id)),
        Json(json!({ "success": true, "data": identity })),
    ))
}

/// Handle user logout
///
/// Drops the server-side session and clears the cookie.
#[cfg(feature = "web")]
pub async fn handle_logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<serde_json::Value>) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.remove(cookie.value());
    }

    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Json(json!({ "success": true, "message": "Logged out" })),
    )
}

/// Report who is logged in
#[cfg(feature = "web")]
pub async fn handle_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<Json<serde_json::Value>> {
    let identity = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.validate(cookie.value()))
        .ok_or_else(|| AppError::Unauthorized("Not logged in".to_string()))?;

    Ok(Json(json!({ "success": true, "data": identity })))
}

#[cfg(feature = "web")]
fn session_cookie(session_id: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Whether a gated route answers with JSON or with pages
#[cfg(feature = "web")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Api,
    Page,
}

/// State for [`require_roles`]: who may pass and how refusals look
#[cfg(feature = "web")]
#[derive(Clone)]
pub struct Gate {
    pub state: AppState,
    pub roles: &'static [Role],
    pub surface: Surface,
}

/// Role gate middleware
///
/// Without a live session, API routes answer 401 and page routes redirect to the login page.
/// A session whose role is not in the allow-list gets 403. Otherwise the [`Identity`] is put in
/// the request extensions and the request continues.
#[cfg(feature = "web")]
pub async fn require_roles(
    State(gate): State<Gate>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| gate.state.sessions.validate(cookie.value()));

    let Some(identity) = identity else {
        return match gate.surface {
            Surface::Api => {
                AppError::Unauthorized("Authentication required".to_string()).into_response()
            }
            Surface::Page => Redirect::to(&login_redirect(request.uri())).into_response(),
        };
    };

    if !gate.roles.contains(&identity.role) {
        log::warn!(
            "{} ({}) refused at {}",
            identity.username,
            identity.role,
            request.uri().path()
        );
        return match gate.surface {
            Surface::Api => AppError::Forbidden(format!(
                "Role {} may not access this resource",
                identity.role
            ))
            .into_response(),
            Surface::Page => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
        };
    }

    request.extensions_mut().insert(identity);
    next.run(request).await
}

#[cfg(feature = "web")]
fn login_redirect(uri: &Uri) -> String {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("/login?next={}", urlencoding::encode(target))
}
