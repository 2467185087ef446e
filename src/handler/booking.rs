use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::{Value, json};
use validator::Validate;

use crate::{
    AppState,
    db::{
        BookingExt, DBClient, StoreError, TourExt, UserExt, parse_id,
        query::{Field, Filter},
    },
    dtos::{
        BookingCheckoutQueryDto, CheckoutSessionResponseDto, CreateBookingDto, UpdateBookingDto,
        UserSummaryDto,
    },
    error::HttpError,
    handler::{
        AppQuery,
        factory::{self, Expand, Resource},
    },
    http::CheckoutRequest,
    middleware::{JWTAuthMiddleware, protect, restrict_to},
    models::{Booking, Tour, UserRole},
};

const BOOKING_MANAGERS: &[UserRole] = &[UserRole::Admin, UserRole::LeadGuide];

/// Router for `/api/v1/bookings`. Every route requires a session; plain
/// CRUD is for staff only.
pub fn booking_handler(app_state: AppState) -> Router<AppState> {
    let managed = Router::new()
        .route(
            "/",
            get(factory::list_handler::<Booking>).post(factory::create_handler::<Booking>),
        )
        .route(
            "/{id}",
            get(factory::get_handler::<Booking>)
                .patch(factory::update_handler::<Booking>)
                .delete(factory::delete_handler::<Booking>),
        )
        .route_layer(middleware::from_fn(|req, next| {
            restrict_to(req, next, BOOKING_MANAGERS)
        }));

    Router::new()
        .route("/checkout-session/{id}", get(checkout_session))
        .route("/my-bookings", get(my_bookings))
        .merge(managed)
        .route_layer(middleware::from_fn_with_state(app_state, protect))
}

impl Resource for Booking {
    type Input = CreateBookingDto;
    type Patch = UpdateBookingDto;

    fn build(input: CreateBookingDto) -> Result<Self, HttpError> {
        let missing = |message: &str| HttpError::bad_request(format!("Invalid input data. {}", message));

        let mut booking = Booking::new(
            input.tour.ok_or_else(|| missing("Booking must belong to a Tour!"))?,
            input.user.ok_or_else(|| missing("Booking must belong to a User!"))?,
            input.price.ok_or_else(|| missing("Booking must have a price."))?,
        );
        if let Some(paid) = input.paid {
            booking.paid = paid;
        }
        Ok(booking)
    }

    fn apply(&mut self, patch: UpdateBookingDto) -> Result<(), HttpError> {
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(paid) = patch.paid {
            self.paid = paid;
        }
        Ok(())
    }

    /// Embeds the booking user and the tour's name.
    async fn populate(&self, db: &DBClient, _expand: Expand) -> Result<Value, StoreError> {
        let mut view = self.view()?;

        let user = db
            .get_user(self.user)
            .await?
            .map(|user| serde_json::to_value(UserSummaryDto::from_user(&user)))
            .transpose()?
            .unwrap_or(Value::Null);
        let tour = db
            .find_by_id::<Tour>(self.tour, &[])
            .await?
            .map(|tour| json!({ "id": tour.id, "name": tour.name }))
            .unwrap_or(Value::Null);

        if let Some(object) = view.as_object_mut() {
            object.insert("user".to_string(), user);
            object.insert("tour".to_string(), tour);
        }
        Ok(view)
    }
}

/// Open a Stripe Checkout session for one seat on a tour.
pub async fn checkout_session(
    State(app_state): State<AppState>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(tour_id): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let tour = factory::get_one::<Tour>(&app_state.db_client, &tour_id, Vec::new()).await?;
    let public_url = app_state.env.public_url.trim_end_matches('/');

    let request = CheckoutRequest {
        tour_id: tour.id.to_string(),
        tour_name: tour.name.clone(),
        tour_summary: tour.summary.clone(),
        image_url: format!("{}/img/tours/{}", public_url, tour.image_cover),
        price: tour.price,
        customer_email: auth.user.email.clone(),
        success_url: format!(
            "{}/?tour={}&user={}&price={}",
            public_url, tour.id, auth.user.id, tour.price
        ),
        cancel_url: format!("{}/tour/{}", public_url, tour.slug),
    };

    let session = app_state.http_client.create_checkout_session(&request).await?;

    Ok(Json(CheckoutSessionResponseDto {
        status: "success",
        session,
    }))
}

/// Bookings of the current user.
pub async fn my_bookings(
    State(app_state): State<AppState>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    AppQuery(params): AppQuery<Vec<(String, String)>>,
) -> Result<impl IntoResponse, HttpError> {
    let scope = vec![Filter::eq(Field::id("user"), auth.user.id)];
    let views = factory::get_all::<Booking>(&app_state.db_client, scope, params).await?;
    Ok(factory::respond_list(views))
}

/// Record the booking carried by a checkout success redirect.
///
/// Returns `false` when the query is not a checkout completion. A tour or
/// user that no longer exists is skipped.
pub async fn complete_checkout(db: &DBClient, query: &BookingCheckoutQueryDto) -> Result<bool, HttpError> {
    let (Some(tour), Some(user), Some(price)) = (&query.tour, &query.user, &query.price) else {
        return Ok(false);
    };

    let tour_id = parse_id(tour)?;
    let user_id = parse_id(user)?;
    let price: f64 = price
        .parse()
        .map_err(|_| HttpError::bad_request(format!("Invalid price: {}.", price)))?;

    let input = CreateBookingDto {
        tour: Some(tour_id),
        user: Some(user_id),
        price: Some(price),
        paid: Some(true),
    };
    input.validate()?;

    if db.get_tour(tour_id).await?.is_none() || db.get_user(user_id).await?.is_none() {
        tracing::warn!(tour_id = %tour_id, user_id = %user_id, "checkout completion for unknown tour or user");
        return Ok(true);
    }

    let booking = db.save_booking(&Booking::build(input)?).await?;
    tracing::info!(booking_id = %booking.id, tour_id = %tour_id, user_id = %user_id, "booking created");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, User};

    async fn seeded() -> (DBClient, Tour, User) {
        let db = DBClient::memory();
        let tour = Tour {
            id: uuid::Uuid::new_v4(),
            name: "The Sea Explorer".to_string(),
            slug: "the-sea-explorer".to_string(),
            duration: 7,
            max_group_size: 15,
            difficulty: Difficulty::Medium,
            ratings_average: 4.8,
            ratings_quantity: 0,
            price: 497.0,
            price_discount: None,
            summary: None,
            description: "Sea".to_string(),
            image_cover: "tour-2-cover.jpg".to_string(),
            images: Vec::new(),
            start_dates: Vec::new(),
            secret_tour: false,
            start_location: None,
            locations: Vec::new(),
            guides: Vec::new(),
            created_at: chrono::Utc::now(),
            version: 0,
        };
        let tour = db.insert(&tour).await.unwrap();
        let user = db
            .save_user(&User::new("Buyer".to_string(), "buyer@example.com", "x".to_string()))
            .await
            .unwrap();
        (db, tour, user)
    }

    fn query(tour: &str, user: &str, price: &str) -> BookingCheckoutQueryDto {
        BookingCheckoutQueryDto {
            tour: Some(tour.to_string()),
            user: Some(user.to_string()),
            price: Some(price.to_string()),
        }
    }

    #[tokio::test]
    async fn completion_books_the_tour() {
        let (db, tour, user) = seeded().await;

        let done = complete_checkout(&db, &query(&tour.id.to_string(), &user.id.to_string(), "497"))
            .await
            .unwrap();
        assert!(done);

        let bookings = db.get_bookings_for_user(user.id).await.unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].price, 497.0);
        assert!(bookings[0].paid);
    }

    #[tokio::test]
    async fn incomplete_query_is_not_a_checkout() {
        let (db, _, _) = seeded().await;
        let done = complete_checkout(&db, &BookingCheckoutQueryDto::default()).await.unwrap();
        assert!(!done);
    }

    #[tokio::test]
    async fn unknown_user_is_skipped() {
        let (db, tour, user) = seeded().await;
        let stranger = uuid::Uuid::new_v4().to_string();

        let done = complete_checkout(&db, &query(&tour.id.to_string(), &stranger, "497"))
            .await
            .unwrap();
        assert!(done);
        assert!(db.get_bookings_for_user(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn populated_booking_names_the_tour() {
        let (db, tour, user) = seeded().await;
        let booking = db.save_booking(&Booking::new(tour.id, user.id, 497.0)).await.unwrap();

        let view = booking.populate(&db, Expand::Detail).await.unwrap();
        assert_eq!(view["tour"]["name"], "The Sea Explorer");
        assert_eq!(view["user"]["email"], "buyer@example.com");
    }
}
