use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::IntoResponse,
};

use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    db::UserExt,
    error::{ErrorMessage, HttpError},
    models::{User, UserRole},
    utils::token,
};

/// Session cookie name.
pub const JWT_COOKIE: &str = "jwt";

/// Authenticated user, inserted into the request extensions by [`protect`].
///
/// ```ignore
/// async fn my_handler(Extension(auth): Extension<JWTAuthMiddleware>) {
///     // auth.user is the current user
/// }
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JWTAuthMiddleware {
    pub user: User,
}

/// Optional identity for server-rendered pages, inserted by [`is_logged_in`].
#[derive(Debug, Clone, Default)]
pub struct LoggedInUser(pub Option<User>);

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|auth_header| auth_header.to_str().ok())
        .and_then(|auth_value| auth_value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_owned())
        .filter(|token| !token.is_empty())
}

/// Resolve a token to its user, checking signature, expiry, that the user
/// still exists and that the password was not changed after issue.
async fn authenticate(app_state: &AppState, token: &str) -> Result<User, HttpError> {
    let claims = token::decode_token(token, app_state.env.jwt_secret.as_bytes())?;

    let user_id = uuid::Uuid::parse_str(&claims.sub)
        .map_err(|_| HttpError::unauthorized(ErrorMessage::InvalidToken))?;

    let user = app_state
        .db_client
        .get_user(user_id)
        .await?
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::UserNoLongerExist))?;

    if user.changed_password_after(claims.iat) {
        return Err(HttpError::unauthorized(ErrorMessage::PasswordRecentlyChanged));
    }

    Ok(user)
}

/// Require an authenticated user.
///
/// The token is read from `Authorization: Bearer <token>` first and from
/// the `jwt` cookie otherwise.
pub async fn protect(
    cookie_jar: CookieJar,
    State(app_state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, HttpError> {
    let token = bearer_token(&req)
        .or_else(|| {
            cookie_jar
                .get(JWT_COOKIE)
                .map(|cookie| cookie.value().to_string())
        })
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::TokenNotProvided))?;

    let user = authenticate(&app_state, &token).await.map_err(|e| {
        tracing::info!(reason = %e.message, "rejected token");
        e
    })?;

    req.extensions_mut().insert(JWTAuthMiddleware { user: user.clone() });
    req.extensions_mut().insert(LoggedInUser(Some(user)));

    Ok(next.run(req).await)
}

/// Attach the cookie's user if it holds a valid session; never rejects.
pub async fn is_logged_in(
    cookie_jar: CookieJar,
    State(app_state): State<AppState>,
    mut req: Request,
    next: Next,
) -> impl IntoResponse {
    let mut logged_in = LoggedInUser(None);

    if let Some(cookie) = cookie_jar.get(JWT_COOKIE) {
        match authenticate(&app_state, cookie.value()).await {
            Ok(user) => logged_in = LoggedInUser(Some(user)),
            Err(e) => tracing::debug!(reason = %e.message, "continuing anonymously"),
        }
    }

    req.extensions_mut().insert(logged_in);
    next.run(req).await
}

/// Role-based access control. Must run after [`protect`].
///
/// ```ignore
/// get(handler).route_layer(middleware::from_fn(|req, next| {
///     restrict_to(req, next, &[UserRole::Admin])
/// }))
/// ```
pub async fn restrict_to(
    req: Request,
    next: Next,
    roles: &'static [UserRole],
) -> Result<impl IntoResponse, HttpError> {
    let user = req
        .extensions()
        .get::<JWTAuthMiddleware>()
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::UserNotAuthenticated))?;

    if !roles.contains(&user.user.role) {
        return Err(HttpError::forbidden(ErrorMessage::PermissionDenied));
    }

    Ok(next.run(req).await)
}
