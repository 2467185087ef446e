use std::backtrace::Backtrace;
use std::fmt;

use axum::{
    Json,
    extract::{
        Request, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::{FormRejection, JsonRejection, QueryRejection},
    },
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use validator::ValidationErrors;

use crate::{AppState, config::Environment, db::StoreError, templates, utils::token::TokenError};

/// Error envelope sent to API clients.
///
/// ```json
/// { "status": "fail", "message": "Incorrect email or password" }
/// ```
///
/// `status` is `fail` for client errors and `error` for server errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => Err(fmt::Error),
        }
    }
}

/// Verbose envelope used in development mode.
#[derive(Debug, Serialize)]
struct VerboseErrorResponse<'a> {
    status: &'a str,
    message: &'a str,
    error: ErrorDetail<'a>,
    stack: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail<'a> {
    status_code: u16,
    operational: bool,
    detail: Option<&'a str>,
}

/// Every client-facing message the pipeline produces by itself.
#[derive(Debug, PartialEq)]
pub enum ErrorMessage {
    // Password validation
    EmptyPassword,
    ExceededMaxPasswordLength(usize),
    InvalidHashFormat,
    HashingError,

    // Authentication
    TokenNotProvided,
    InvalidToken,
    ExpiredToken,
    UserNoLongerExist,
    PasswordRecentlyChanged,
    UserNotAuthenticated,
    MissingCredentials,
    IncorrectCredentials,
    WrongCurrentPassword,
    ResetTokenInvalid,
    NoUserWithEmail,
    PasswordUpdateNotAllowed,
    EmailNotSent,

    // Authorization
    PermissionDenied,

    // Resources
    DocumentNotFound,
    PageNotFound,
    RouteNotFound(String),

    TooManyRequests,
    ServerError,
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ErrorMessage::EmptyPassword => "Password cannot be empty".to_string(),
            ErrorMessage::ExceededMaxPasswordLength(max_length) => {
                format!("Password must not be more than {} characters", max_length)
            }
            ErrorMessage::InvalidHashFormat => "Invalid password hash format".to_string(),
            ErrorMessage::HashingError => "Error while hashing password".to_string(),
            ErrorMessage::TokenNotProvided => {
                "You are not logged in! Please log in to get access.".to_string()
            }
            ErrorMessage::InvalidToken => "Invalid token. Please log in again!".to_string(),
            ErrorMessage::ExpiredToken => {
                "Your token has expired! Please log in again.".to_string()
            }
            ErrorMessage::UserNoLongerExist => {
                "The user belonging to this token does no longer exist.".to_string()
            }
            ErrorMessage::PasswordRecentlyChanged => {
                "User recently changed password! Please log in again.".to_string()
            }
            ErrorMessage::UserNotAuthenticated => {
                "Authentication required. Please log in.".to_string()
            }
            ErrorMessage::MissingCredentials => "Please provide email and password!".to_string(),
            ErrorMessage::IncorrectCredentials => "Incorrect email or password".to_string(),
            ErrorMessage::WrongCurrentPassword => "Your current password is wrong.".to_string(),
            ErrorMessage::ResetTokenInvalid => "Token is invalid or has expired.".to_string(),
            ErrorMessage::NoUserWithEmail => {
                "There is no user with that email address.".to_string()
            }
            ErrorMessage::PasswordUpdateNotAllowed => {
                "This route is not for password updates. Please use /updateMyPassword.".to_string()
            }
            ErrorMessage::EmailNotSent => {
                "There was an error sending the email. Try again later!".to_string()
            }
            ErrorMessage::PermissionDenied => {
                "You do not have permission to perform this action".to_string()
            }
            ErrorMessage::DocumentNotFound => "No document found with that ID".to_string(),
            ErrorMessage::PageNotFound => "This page does not exist".to_string(),
            ErrorMessage::RouteNotFound(path) => {
                format!("Can't find {} on this server!", path)
            }
            ErrorMessage::TooManyRequests => {
                "Too many requests from this IP, please try again in an hour!".to_string()
            }
            ErrorMessage::ServerError => "Something went wrong!".to_string(),
        };
        write!(f, "{}", message)
    }
}

/// Error type returned by every handler and middleware.
///
/// `operational` errors are anticipated conditions whose message is safe to
/// show to clients. Anything else is a fault: it is logged and, in
/// production, reduced to a generic 500.
#[derive(Debug, Clone)]
pub struct HttpError {
    pub message: String,
    pub status: StatusCode,
    pub operational: bool,
    /// Internal description of the underlying failure.
    pub detail: Option<String>,
    pub stack: Option<String>,
}

impl HttpError {
    pub fn new(message: impl Into<String>, status: StatusCode) -> Self {
        HttpError {
            message: message.into(),
            status,
            operational: true,
            detail: None,
            stack: None,
        }
    }

    /// 500 for an anticipated server-side condition (mail relay down, ...).
    pub fn server_error(message: impl Into<String>) -> Self {
        HttpError::new(message, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// 500 for an unexpected fault. Never shown verbatim in production.
    pub fn internal(detail: impl fmt::Display) -> Self {
        HttpError {
            message: ErrorMessage::ServerError.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            operational: false,
            detail: Some(detail.to_string()),
            stack: Some(Backtrace::force_capture().to_string()),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        HttpError::new(message, StatusCode::BAD_REQUEST)
    }

    /// Uniqueness violations are reported as 400, like other input errors.
    pub fn conflict(message: impl Into<String>) -> Self {
        HttpError::new(message, StatusCode::BAD_REQUEST)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        HttpError::new(message, StatusCode::UNAUTHORIZED)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        HttpError::new(message, StatusCode::FORBIDDEN)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HttpError::new(message, StatusCode::NOT_FOUND)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        HttpError::new(message, StatusCode::TOO_MANY_REQUESTS)
    }

    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    /// `fail` for 4xx, `error` for everything else.
    pub fn status_label(&self) -> &'static str {
        if self.status.is_client_error() {
            "fail"
        } else {
            "error"
        }
    }

    /// Restrained JSON rendering, the shape clients see when no normalizer
    /// runs.
    pub fn into_http_response(self) -> Response {
        let (status, body) = if self.operational {
            (
                self.status,
                ErrorResponse {
                    status: self.status_label().to_string(),
                    message: self.message.clone(),
                },
            )
        } else {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    status: "error".to_string(),
                    message: ErrorMessage::ServerError.to_string(),
                },
            )
        };
        (status, Json(body)).into_response()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HttpError: message: {}, status: {}",
            self.message, self.status
        )?;
        if let Some(detail) = &self.detail {
            write!(f, ", detail: {}", detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpError {}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let stashed = self.clone();
        let mut response = self.into_http_response();
        response.extensions_mut().insert(stashed);
        response
    }
}

impl From<ErrorMessage> for String {
    fn from(message: ErrorMessage) -> Self {
        message.to_string()
    }
}

impl From<StoreError> for HttpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidId(value) => HttpError::bad_request(format!("Invalid id: {}.", value)),
            StoreError::Cast { field, value } => {
                HttpError::bad_request(format!("Invalid {}: {}.", field, value))
            }
            StoreError::Duplicate { value } => HttpError::conflict(format!(
                "Duplicate field value: \"{}\". Please use another value!",
                value
            )),
            other => HttpError::internal(other),
        }
    }
}

impl From<ValidationErrors> for HttpError {
    fn from(errors: ValidationErrors) -> Self {
        HttpError::bad_request(validation_message(&errors))
    }
}

impl From<TokenError> for HttpError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => HttpError::unauthorized(ErrorMessage::ExpiredToken),
            TokenError::Invalid => HttpError::unauthorized(ErrorMessage::InvalidToken),
            TokenError::Creation(e) => HttpError::internal(e),
        }
    }
}

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        HttpError::bad_request(format!("Invalid input data. {}", rejection.body_text()))
    }
}

impl From<FormRejection> for HttpError {
    fn from(rejection: FormRejection) -> Self {
        HttpError::bad_request(format!("Invalid input data. {}", rejection.body_text()))
    }
}

impl From<MultipartRejection> for HttpError {
    fn from(rejection: MultipartRejection) -> Self {
        HttpError::bad_request(format!("Invalid input data. {}", rejection.body_text()))
    }
}

impl From<MultipartError> for HttpError {
    fn from(err: MultipartError) -> Self {
        HttpError::new(format!("Invalid input data. {}", err.body_text()), err.status())
    }
}

impl From<QueryRejection> for HttpError {
    fn from(rejection: QueryRejection) -> Self {
        HttpError::bad_request(rejection.body_text())
    }
}

/// Join every field message into one sentence list, fields in name order.
pub fn validation_message(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let messages: Vec<String> = fields
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{} is invalid", field),
            })
        })
        .collect();

    format!("Invalid input data. {}.", messages.join(". "))
}

/// Which renderer a failed request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Api,
    Page,
}

impl RequestClass {
    pub fn of(path: &str) -> Self {
        if path.starts_with("/api") {
            RequestClass::Api
        } else {
            RequestClass::Page
        }
    }
}

/// Terminal error stage. Re-renders any `HttpError` raised below it for the
/// current environment and request class.
pub async fn normalize_errors(
    State(app_state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let class = RequestClass::of(req.uri().path());
    let mut response = next.run(req).await;

    match response.extensions_mut().remove::<HttpError>() {
        Some(err) => render_error(err, app_state.env.environment, class),
        None => response,
    }
}

pub fn render_error(err: HttpError, environment: Environment, class: RequestClass) -> Response {
    match environment {
        Environment::Development => {
            tracing::error!(error = %err, "request failed");
            match class {
                RequestClass::Api => {
                    let body = VerboseErrorResponse {
                        status: err.status_label(),
                        message: &err.message,
                        error: ErrorDetail {
                            status_code: err.status.as_u16(),
                            operational: err.operational,
                            detail: err.detail.as_deref(),
                        },
                        stack: err.stack.as_deref(),
                    };
                    (err.status, Json(body)).into_response()
                }
                RequestClass::Page => error_page(err.status, &err.message),
            }
        }
        Environment::Production => {
            if !err.operational {
                tracing::error!(error = %err, stack = ?err.stack, "ERROR");
            }
            match class {
                RequestClass::Api => err.into_http_response(),
                RequestClass::Page if err.operational => error_page(err.status, &err.message),
                RequestClass::Page => {
                    error_page(StatusCode::INTERNAL_SERVER_ERROR, "Please try again later.")
                }
            }
        }
    }
}

fn error_page(status: StatusCode, message: &str) -> Response {
    let content = templates::fill(templates::ERROR, &[("message", templates::escape(message).as_str())]);
    let page = templates::page("Something went wrong!", None, &content);
    (status, Html(page)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;
    use validator::{ValidationError, ValidationErrors};

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn text_body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn production_api_surfaces_operational_errors() {
        let err = HttpError::not_found(ErrorMessage::DocumentNotFound);
        let response = render_error(err, Environment::Production, RequestClass::Api);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = json_body(response).await;
        assert_eq!(body["status"], "fail");
        assert_eq!(body["message"], "No document found with that ID");
        assert!(body.get("stack").is_none());
    }

    #[tokio::test]
    async fn production_api_hides_faults() {
        let err = HttpError::internal("connection reset by peer");
        let response = render_error(err, Environment::Production, RequestClass::Api);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = json_body(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Something went wrong!");
        assert!(!body.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn development_api_is_verbose() {
        let err = HttpError::internal("connection reset by peer");
        let response = render_error(err, Environment::Development, RequestClass::Api);
        let body = json_body(response).await;
        assert_eq!(body["error"]["statusCode"], 500);
        assert_eq!(body["error"]["operational"], false);
        assert_eq!(body["error"]["detail"], "connection reset by peer");
        assert!(body["stack"].is_string());
    }

    #[tokio::test]
    async fn pages_render_html_with_the_same_status() {
        let err = HttpError::forbidden(ErrorMessage::PermissionDenied);
        let response = render_error(err, Environment::Production, RequestClass::Page);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let html = text_body(response).await;
        assert!(html.contains(&templates::escape("You do not have permission to perform this action")));

        let fault = HttpError::internal("boom");
        let response = render_error(fault, Environment::Production, RequestClass::Page);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let html = text_body(response).await;
        assert!(html.contains(&templates::escape("Please try again later.")));
        assert!(!html.contains("boom"));
    }

    #[test]
    fn store_failures_become_operational_400s() {
        let err: HttpError = StoreError::InvalidId("abc".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Invalid id: abc.");

        let err: HttpError = StoreError::Duplicate {
            value: "Test Tour".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("\"Test Tour\""));
        assert!(err.operational);

        let err: HttpError = StoreError::Backend("pool timed out".to_string()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.operational);
    }

    #[test]
    fn validation_messages_are_aggregated_in_field_order() {
        let mut errors = ValidationErrors::new();
        let mut price = ValidationError::new("required");
        price.message = Some("A tour must have a price".into());
        let mut name = ValidationError::new("required");
        name.message = Some("A tour must have a name".into());
        errors.add("price", price);
        errors.add("name", name);

        let err: HttpError = errors.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            err.message,
            "Invalid input data. A tour must have a name. A tour must have a price."
        );
    }

    #[test]
    fn token_failures_have_distinct_messages() {
        let expired: HttpError = TokenError::Expired.into();
        let invalid: HttpError = TokenError::Invalid.into();
        assert_eq!(expired.status, StatusCode::UNAUTHORIZED);
        assert_eq!(invalid.status, StatusCode::UNAUTHORIZED);
        assert_ne!(expired.message, invalid.message);
    }

    #[test]
    fn request_class_follows_the_path() {
        assert_eq!(RequestClass::of("/api/v1/tours"), RequestClass::Api);
        assert_eq!(RequestClass::of("/tour/the-forest-hiker"), RequestClass::Page);
    }
}
