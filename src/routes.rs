use std::any::Any;

use axum::{
    Router,
    extract::{DefaultBodyLimit, OriginalUri},
    http::{
        HeaderValue, Method,
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    AppState,
    config::Config,
    error::{ErrorMessage, HttpError, normalize_errors},
    handler::{
        auth::auth_handler, booking::booking_handler, review::review_handler,
        tour::tour_handler, users::users_handler, views::views_handler,
    },
    rate_limit::rate_limit,
};

/// JSON bodies above this size are rejected.
pub const BODY_LIMIT: usize = 10 * 1024;

pub fn create_router(app_state: AppState) -> Router {
    let api_route = Router::new()
        .nest("/tours", tour_handler(app_state.clone()))
        .nest(
            "/users",
            auth_handler().merge(users_handler(app_state.clone())),
        )
        .nest("/reviews", review_handler(app_state.clone()))
        .nest("/bookings", booking_handler(app_state.clone()));

    let api = Router::new()
        .nest("/v1", api_route)
        .fallback(route_not_found)
        .layer(middleware::from_fn_with_state(app_state.clone(), rate_limit));

    Router::new()
        .nest("/api", api)
        .merge(views_handler(app_state.clone()))
        .nest_service("/css", ServeDir::new("public/css"))
        .nest_service("/img", ServeDir::new(app_state.images.root()))
        .fallback(route_not_found)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn_with_state(app_state.clone(), normalize_errors))
        .layer(cors(&app_state.env))
        .layer(TraceLayer::new_for_http())
        .layer(app_state.ip_extraction.clone().into_extension())
        .with_state(app_state)
}

fn cors(config: &Config) -> CorsLayer {
    let Some(origin) = config.frontend_url.as_deref() else {
        return CorsLayer::new();
    };

    match origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ]),
        Err(e) => {
            tracing::warn!("FRONTEND_URL is not a valid origin, CORS disabled: {}", e);
            CorsLayer::new()
        }
    }
}

/// Reports the path as the client sent it, `/api` prefix included.
async fn route_not_found(OriginalUri(uri): OriginalUri) -> HttpError {
    let target = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    HttpError::not_found(ErrorMessage::RouteNotFound(target))
}

/// The request that panicked answers 500; the panic hook installed in
/// `main` stops the server.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    HttpError::internal(format!("handler panicked: {}", detail)).into_response()
}
