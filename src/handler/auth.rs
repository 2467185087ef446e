use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::instrument;
use validator::Validate;

use crate::{
    AppState,
    db::UserExt,
    dtos::{
        AuthResponseDto, FilterUserDto, ForgotPasswordRequestDto, LoginUserDto,
        ResetPasswordRequestDto, Response, SignupUserDto, UpdatePasswordDto, UserData,
    },
    error::{ErrorMessage, HttpError},
    handler::{AppJson, factory},
    mail::EmailKind,
    middleware::{JWTAuthMiddleware, JWT_COOKIE},
    models::User,
    utils::{password, token},
};

/// Router for the public authentication endpoints under `/api/v1/users`
pub fn auth_handler() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/forgotPassword", post(forgot_password))
        .route("/resetPassword/{token}", patch(reset_password))
}

/// Session cookie carrying `token`.
pub fn session_cookie(app_state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((JWT_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(app_state.env.environment.is_production())
        .max_age(time::Duration::days(app_state.env.jwt_cookie_expires_in))
        .build()
}

/// Issue a session token for `user`, as JSON and as the `jwt` cookie.
pub fn create_send_token(
    app_state: &AppState,
    user: &User,
    status: StatusCode,
) -> Result<(StatusCode, CookieJar, Json<AuthResponseDto>), HttpError> {
    let token = token::create_token(
        &user.id.to_string(),
        app_state.env.jwt_secret.as_bytes(),
        app_state.env.jwt_maxage,
    )?;

    let jar = CookieJar::new().add(session_cookie(app_state, token.clone()));
    let body = AuthResponseDto {
        status: "success",
        token,
        data: UserData {
            user: FilterUserDto::filter_user(user),
        },
    };

    Ok((status, jar, Json(body)))
}

/// Create an account and log it in.
///
/// A welcome mail goes out, but failing to send it does not fail signup.
#[instrument(skip(app_state, body), fields(email = ?body.email))]
pub async fn signup(
    State(app_state): State<AppState>,
    AppJson(body): AppJson<SignupUserDto>,
) -> Result<impl IntoResponse, HttpError> {
    let user = factory::create_one::<User>(&app_state.db_client, body).await?;

    let url = format!("{}/me", app_state.env.public_url.trim_end_matches('/'));
    if let Err(e) = app_state.mailer.send(&user, EmailKind::Welcome, &url).await {
        tracing::error!("Failed to send welcome email: {}", e);
    }

    tracing::info!(user_id = %user.id, "Signup Successful");
    create_send_token(&app_state, &user, StatusCode::CREATED)
}

/// Check an email and password pair. Unknown email and wrong password get
/// the same answer.
pub async fn verify_credentials(app_state: &AppState, body: &LoginUserDto) -> Result<User, HttpError> {
    let (Some(email), Some(plain)) = (body.email.as_deref(), body.password.as_deref()) else {
        return Err(HttpError::bad_request(ErrorMessage::MissingCredentials));
    };
    if email.is_empty() || plain.is_empty() {
        return Err(HttpError::bad_request(ErrorMessage::MissingCredentials));
    }

    let user = app_state.db_client.get_user_by_email(email).await?;

    let matched = match &user {
        Some(user) => password::compare(plain, &user.password).map_err(|e| match e {
            ErrorMessage::ExceededMaxPasswordLength(_) => {
                HttpError::unauthorized(ErrorMessage::IncorrectCredentials)
            }
            other => {
                tracing::error!("Password verification error: {}", other);
                HttpError::internal(other)
            }
        })?,
        None => false,
    };

    match user {
        Some(user) if matched => Ok(user),
        _ => {
            tracing::info!("Login failed");
            Err(HttpError::unauthorized(ErrorMessage::IncorrectCredentials))
        }
    }
}

#[instrument(skip(app_state, body), fields(email = ?body.email))]
pub async fn login(
    State(app_state): State<AppState>,
    AppJson(body): AppJson<LoginUserDto>,
) -> Result<impl IntoResponse, HttpError> {
    let user = verify_credentials(&app_state, &body).await?;

    tracing::info!(user_id = %user.id, "Login Successful");
    create_send_token(&app_state, &user, StatusCode::OK)
}

/// Replace the session cookie with a short-lived placeholder.
pub async fn logout() -> impl IntoResponse {
    let cookie = Cookie::build((JWT_COOKIE, "loggedout"))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::seconds(10))
        .build();

    (
        CookieJar::new().add(cookie),
        Json(serde_json::json!({ "status": "success" })),
    )
}

/// Email a single-use reset link. When the mail cannot be sent the token
/// is withdrawn again.
#[instrument(skip(app_state, body), fields(email = ?body.email))]
pub async fn forgot_password(
    State(app_state): State<AppState>,
    AppJson(body): AppJson<ForgotPasswordRequestDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()?;
    let email = body.email.unwrap_or_default();

    let mut user = app_state
        .db_client
        .get_user_by_email(&email)
        .await?
        .ok_or_else(|| HttpError::not_found(ErrorMessage::NoUserWithEmail))?;

    let reset = token::create_reset_token();
    user.password_reset_token = Some(reset.hashed);
    user.password_reset_expires = Some(reset.expires_at);
    app_state.db_client.update_user(&user).await?;

    let reset_url = format!(
        "{}/api/v1/users/resetPassword/{}",
        app_state.env.public_url.trim_end_matches('/'),
        reset.raw
    );

    if let Err(e) = app_state
        .mailer
        .send(&user, EmailKind::PasswordReset, &reset_url)
        .await
    {
        tracing::error!("Failed to send password reset email: {}", e);
        user.password_reset_token = None;
        user.password_reset_expires = None;
        app_state.db_client.update_user(&user).await?;
        return Err(HttpError::server_error(ErrorMessage::EmailNotSent).with_detail(e));
    }

    tracing::info!(user_id = %user.id, "Password reset token sent");
    Ok(Json(Response {
        status: "success",
        message: "Token sent to email!".to_string(),
    }))
}

#[instrument(skip(app_state, body, reset_token))]
pub async fn reset_password(
    State(app_state): State<AppState>,
    Path(reset_token): Path<String>,
    AppJson(body): AppJson<ResetPasswordRequestDto>,
) -> Result<impl IntoResponse, HttpError> {
    let hashed = token::hash_reset_token(&reset_token);
    let mut user = app_state
        .db_client
        .get_user_by_reset_token(&hashed)
        .await?
        .ok_or_else(|| HttpError::bad_request(ErrorMessage::ResetTokenInvalid))?;

    body.validate()?;
    let new_hash = password::hash(body.password.unwrap_or_default()).map_err(|e| {
        tracing::error!("Password hashing error: {}", e);
        HttpError::internal(e)
    })?;
    user.set_password(new_hash);

    let user = app_state
        .db_client
        .update_user(&user)
        .await?
        .ok_or_else(|| HttpError::bad_request(ErrorMessage::ResetTokenInvalid))?;

    tracing::info!(user_id = %user.id, "Password reset");
    create_send_token(&app_state, &user, StatusCode::OK)
}

/// Change the password of the logged-in user, given the current one.
#[instrument(skip(app_state, auth, body), fields(user_id = %auth.user.id))]
pub async fn update_password(
    State(app_state): State<AppState>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    AppJson(body): AppJson<UpdatePasswordDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()?;

    let mut user = auth.user;
    let current = body.password_current.unwrap_or_default();
    let matched = password::compare(&current, &user.password).map_err(|e| match e {
        ErrorMessage::ExceededMaxPasswordLength(_) | ErrorMessage::EmptyPassword => {
            HttpError::unauthorized(ErrorMessage::WrongCurrentPassword)
        }
        other => HttpError::internal(other),
    })?;
    if !matched {
        return Err(HttpError::unauthorized(ErrorMessage::WrongCurrentPassword));
    }

    let new_hash = password::hash(body.password.unwrap_or_default()).map_err(|e| {
        tracing::error!("Password hashing error: {}", e);
        HttpError::internal(e)
    })?;
    user.set_password(new_hash);

    let user = app_state
        .db_client
        .update_user(&user)
        .await?
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::UserNoLongerExist))?;

    tracing::info!("Password updated");
    create_send_token(&app_state, &user, StatusCode::OK)
}
