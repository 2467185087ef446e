use axum::{
    Extension, Router,
    extract::{Path, State},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use validator::Validate;

use crate::{
    AppState,
    db::{BookingExt, ReviewExt, TourExt, UserExt},
    dtos::{BookingCheckoutQueryDto, LoginUserDto, UpdateMeDto},
    error::HttpError,
    handler::{AppForm, AppQuery, auth, booking},
    middleware::{JWTAuthMiddleware, LoggedInUser, is_logged_in, protect},
    models::{Tour, User},
    templates::{self, escape, fill},
    utils::token,
};

/// Router for the server-rendered pages.
pub fn views_handler(app_state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/", get(overview))
        .route("/tour/{slug}", get(tour_page))
        .route("/login", get(login_page).post(login_form))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), is_logged_in));

    let account = Router::new()
        .route("/me", get(account_page))
        .route("/my-tours", get(my_tours))
        .route("/submit-user-data", post(submit_user_data))
        .route_layer(middleware::from_fn_with_state(app_state, protect));

    public.merge(account)
}

fn tour_cards(tours: &[Tour]) -> String {
    tours
        .iter()
        .map(|tour| {
            fill(
                templates::TOUR_CARD,
                &[
                    ("name", escape(&tour.name).as_str()),
                    ("difficulty", tour.difficulty.to_str()),
                    ("duration", tour.duration.to_string().as_str()),
                    ("summary", escape(tour.summary.as_deref().unwrap_or_default()).as_str()),
                    ("price", tour.price.to_string().as_str()),
                    ("ratings_average", tour.ratings_average.to_string().as_str()),
                    ("ratings_quantity", tour.ratings_quantity.to_string().as_str()),
                    ("slug", escape(&tour.slug).as_str()),
                ],
            )
        })
        .collect()
}

fn overview_page(title: &str, user: Option<&User>, tours: &[Tour]) -> Html<String> {
    let content = fill(templates::OVERVIEW, &[("cards", tour_cards(tours).as_str())]);
    Html(templates::page(title, user, &content))
}

/// All tours. Also the landing point of the checkout success redirect,
/// which records the booking and redirects to a clean URL.
pub async fn overview(
    State(app_state): State<AppState>,
    Extension(LoggedInUser(user)): Extension<LoggedInUser>,
    AppQuery(checkout): AppQuery<BookingCheckoutQueryDto>,
) -> Result<Response, HttpError> {
    if booking::complete_checkout(&app_state.db_client, &checkout).await? {
        return Ok(Redirect::to("/").into_response());
    }

    let tours = app_state.db_client.get_tours().await?;
    Ok(overview_page("All Tours", user.as_ref(), &tours).into_response())
}

pub async fn tour_page(
    State(app_state): State<AppState>,
    Extension(LoggedInUser(user)): Extension<LoggedInUser>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let tour = app_state
        .db_client
        .get_tour_by_slug(&slug)
        .await?
        .ok_or_else(|| HttpError::not_found("There is no tour with that name."))?;

    let guides: String = app_state
        .db_client
        .get_users_by_ids(&tour.guides)
        .await?
        .iter()
        .map(|guide| {
            format!(
                "<li>{} ({})</li>",
                escape(&guide.name),
                escape(guide.role.to_str())
            )
        })
        .collect();

    let reviews = app_state.db_client.get_reviews_for_tour(tour.id).await?;
    let author_ids: Vec<_> = reviews.iter().map(|review| review.user).collect();
    let authors = app_state.db_client.get_users_by_ids(&author_ids).await?;
    let reviews: String = reviews
        .iter()
        .map(|review| {
            let author = authors
                .iter()
                .find(|author| author.id == review.user)
                .map(|author| author.name.as_str())
                .unwrap_or("Former user");
            format!(
                r#"<div class="reviews__card"><h6 class="reviews__user">{}</h6><p class="reviews__text">{}</p><p class="reviews__rating">{} / 5</p></div>"#,
                escape(author),
                escape(&review.review),
                review.rating
            )
        })
        .collect();

    let cta = match &user {
        Some(_) => format!(
            r#"<a class="btn btn--green span-all-rows" href="/api/v1/bookings/checkout-session/{}">Book tour now!</a>"#,
            tour.id
        ),
        None => r#"<a class="btn btn--green span-all-rows" href="/login">Log in to book tour</a>"#.to_string(),
    };

    let start_location = tour
        .start_location
        .as_ref()
        .and_then(|start| start.description.as_deref())
        .unwrap_or_default();

    let content = fill(
        templates::TOUR,
        &[
            ("name", escape(&tour.name).as_str()),
            ("duration", tour.duration.to_string().as_str()),
            ("start_location", escape(start_location).as_str()),
            ("difficulty", tour.difficulty.to_str()),
            ("max_group_size", tour.max_group_size.to_string().as_str()),
            ("ratings_average", tour.ratings_average.to_string().as_str()),
            ("guides", guides.as_str()),
            ("description", escape(&tour.description).as_str()),
            ("reviews", reviews.as_str()),
            ("cta", cta.as_str()),
        ],
    );

    Ok(Html(templates::page(
        &format!("{} Tour", tour.name),
        user.as_ref(),
        &content,
    )))
}

pub async fn login_page(Extension(LoggedInUser(user)): Extension<LoggedInUser>) -> impl IntoResponse {
    Html(templates::page(
        "Log into your account",
        user.as_ref(),
        templates::LOGIN,
    ))
}

/// Form login: sets the session cookie and goes back to the overview.
pub async fn login_form(
    State(app_state): State<AppState>,
    AppForm(body): AppForm<LoginUserDto>,
) -> Result<impl IntoResponse, HttpError> {
    let user = auth::verify_credentials(&app_state, &body).await?;
    let token = token::create_token(
        &user.id.to_string(),
        app_state.env.jwt_secret.as_bytes(),
        app_state.env.jwt_maxage,
    )?;

    tracing::info!(user_id = %user.id, "Login Successful");
    let jar = CookieJar::new().add(auth::session_cookie(&app_state, token));
    Ok((jar, Redirect::to("/")))
}

fn account(user: &User) -> Html<String> {
    let content = fill(
        templates::ACCOUNT,
        &[
            ("name", escape(&user.name).as_str()),
            ("email", escape(&user.email).as_str()),
            ("role", user.role.to_str()),
        ],
    );
    Html(templates::page("Your account", Some(user), &content))
}

pub async fn account_page(Extension(auth): Extension<JWTAuthMiddleware>) -> impl IntoResponse {
    account(&auth.user)
}

/// Tours the current user has booked.
pub async fn my_tours(
    State(app_state): State<AppState>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let tours = app_state.db_client.get_booked_tours(auth.user.id).await?;
    Ok(overview_page("My Tours", Some(&auth.user), &tours))
}

#[derive(Debug, Deserialize)]
pub struct UserDataForm {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Account form: name and email only.
pub async fn submit_user_data(
    State(app_state): State<AppState>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    AppForm(form): AppForm<UserDataForm>,
) -> Result<impl IntoResponse, HttpError> {
    let changes = UpdateMeDto {
        name: form.name,
        email: form.email,
        ..UpdateMeDto::default()
    };
    changes.validate()?;

    let mut user = auth.user;
    if let Some(name) = changes.name {
        user.name = name.trim().to_string();
    }
    if let Some(email) = changes.email {
        user.email = email.trim().to_lowercase();
    }

    let user = app_state
        .db_client
        .update_user(&user)
        .await?
        .ok_or_else(|| HttpError::not_found("There is no user with that name."))?;

    tracing::info!(user_id = %user.id, "profile updated from the account page");
    Ok(account(&user))
}
