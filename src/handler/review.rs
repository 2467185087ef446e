use axum::{
    Extension, Router,
    extract::{Path, State},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde_json::{Value, json};

use crate::{
    AppState,
    db::{
        DBClient, ReviewExt, StoreError, UserExt, parse_id,
        query::{Field, Filter},
    },
    dtos::{CreateReviewDto, UpdateReviewDto},
    error::HttpError,
    handler::{
        AppJson, AppQuery,
        factory::{self, Expand, Resource},
    },
    middleware::{JWTAuthMiddleware, protect, restrict_to},
    models::{Review, UserRole, round_rating},
};

pub const REVIEW_AUTHORS: &[UserRole] = &[UserRole::User];
const REVIEW_EDITORS: &[UserRole] = &[UserRole::User, UserRole::Admin];

/// Router for `/api/v1/reviews`. Every route requires a session.
pub fn review_handler(app_state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(factory::list_handler::<Review>))
        .route(
            "/",
            post(create_review).route_layer(middleware::from_fn(|req, next| {
                restrict_to(req, next, REVIEW_AUTHORS)
            })),
        )
        .route("/{id}", get(factory::get_handler::<Review>))
        .route(
            "/{id}",
            patch(factory::update_handler::<Review>)
                .delete(factory::delete_handler::<Review>)
                .route_layer(middleware::from_fn(|req, next| {
                    restrict_to(req, next, REVIEW_EDITORS)
                })),
        )
        .route_layer(middleware::from_fn_with_state(app_state, protect))
}

impl Resource for Review {
    type Input = CreateReviewDto;
    type Patch = UpdateReviewDto;

    fn build(input: CreateReviewDto) -> Result<Self, HttpError> {
        let missing = |message: &str| HttpError::bad_request(format!("Invalid input data. {}.", message));

        Ok(Review {
            id: uuid::Uuid::new_v4(),
            review: input
                .review
                .map(|r| r.trim().to_string())
                .ok_or_else(|| missing("Review can not be empty!"))?,
            rating: round_rating(input.rating.ok_or_else(|| missing("A review must have a rating"))?),
            tour: input.tour.ok_or_else(|| missing("Review must belong to a tour."))?,
            user: input.user.ok_or_else(|| missing("Review must belong to a user"))?,
            created_at: chrono::Utc::now(),
            version: 0,
        })
    }

    fn apply(&mut self, patch: UpdateReviewDto) -> Result<(), HttpError> {
        if let Some(review) = patch.review {
            self.review = review.trim().to_string();
        }
        if let Some(rating) = patch.rating {
            self.rating = round_rating(rating);
        }
        Ok(())
    }

    /// The author is embedded by name and photo only.
    async fn populate(&self, db: &DBClient, _expand: Expand) -> Result<Value, StoreError> {
        let mut view = self.view()?;
        let author = db
            .get_user(self.user)
            .await?
            .map(|user| json!({ "id": user.id, "name": user.name, "photo": user.photo }))
            .unwrap_or(Value::Null);

        if let Some(object) = view.as_object_mut() {
            object.insert("user".to_string(), author);
        }
        Ok(view)
    }

    /// Keep the tour's rating summary in step with its reviews.
    async fn after_write(&self, db: &DBClient) -> Result<(), StoreError> {
        db.calc_average_ratings(self.tour).await
    }
}

/// `POST /api/v1/reviews`. The tour comes from the body.
pub async fn create_review(
    State(app_state): State<AppState>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    AppJson(mut body): AppJson<CreateReviewDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.user = Some(auth.user.id);
    let review = factory::create_one::<Review>(&app_state.db_client, body).await?;
    Ok(factory::respond_created(review.view()?))
}

/// `GET /api/v1/tours/{id}/reviews`
pub async fn list_tour_reviews(
    State(app_state): State<AppState>,
    Path(tour_id): Path<String>,
    AppQuery(params): AppQuery<Vec<(String, String)>>,
) -> Result<impl IntoResponse, HttpError> {
    let tour_id = parse_id(&tour_id)?;
    let scope = vec![Filter::eq(Field::id("tour"), tour_id)];
    let views = factory::get_all::<Review>(&app_state.db_client, scope, params).await?;
    Ok(factory::respond_list(views))
}

/// `POST /api/v1/tours/{id}/reviews`. The tour comes from the path.
pub async fn create_tour_review(
    State(app_state): State<AppState>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(tour_id): Path<String>,
    AppJson(mut body): AppJson<CreateReviewDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.tour = Some(parse_id(&tour_id)?);
    body.user = Some(auth.user.id);
    let review = factory::create_one::<Review>(&app_state.db_client, body).await?;
    Ok(factory::respond_created(review.view()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TourExt;
    use crate::models::{Difficulty, Tour, User};

    fn tour() -> Tour {
        Tour {
            id: uuid::Uuid::new_v4(),
            name: "The Snow Adventurer".to_string(),
            slug: "the-snow-adventurer".to_string(),
            duration: 4,
            max_group_size: 10,
            difficulty: Difficulty::Difficult,
            ratings_average: 4.5,
            ratings_quantity: 0,
            price: 997.0,
            price_discount: None,
            summary: None,
            description: "Snow".to_string(),
            image_cover: "tour-3-cover.jpg".to_string(),
            images: Vec::new(),
            start_dates: Vec::new(),
            secret_tour: false,
            start_location: None,
            locations: Vec::new(),
            guides: Vec::new(),
            created_at: chrono::Utc::now(),
            version: 0,
        }
    }

    fn review_for(tour: &Tour, user: &User, rating: f64) -> CreateReviewDto {
        CreateReviewDto {
            review: Some("Great".to_string()),
            rating: Some(rating),
            tour: Some(tour.id),
            user: Some(user.id),
        }
    }

    #[tokio::test]
    async fn writes_refresh_the_tour_rating() {
        let db = DBClient::memory();
        let tour = db.insert(&tour()).await.unwrap();
        let alice = db
            .save_user(&User::new("Alice".to_string(), "alice@example.com", "x".to_string()))
            .await
            .unwrap();
        let bob = db
            .save_user(&User::new("Bob".to_string(), "bob@example.com", "x".to_string()))
            .await
            .unwrap();

        factory::create_one::<Review>(&db, review_for(&tour, &alice, 4.0)).await.unwrap();
        let second = factory::create_one::<Review>(&db, review_for(&tour, &bob, 5.0))
            .await
            .unwrap();

        let current = db.get_tour(tour.id).await.unwrap().unwrap();
        assert_eq!(current.ratings_quantity, 2);
        assert_eq!(current.ratings_average, 4.5);

        factory::delete_one::<Review>(&db, &second.id.to_string()).await.unwrap();
        let current = db.get_tour(tour.id).await.unwrap().unwrap();
        assert_eq!(current.ratings_quantity, 1);
        assert_eq!(current.ratings_average, 4.0);
    }

    #[tokio::test]
    async fn one_review_per_user_and_tour() {
        let db = DBClient::memory();
        let tour = db.insert(&tour()).await.unwrap();
        let alice = db
            .save_user(&User::new("Alice".to_string(), "alice@example.com", "x".to_string()))
            .await
            .unwrap();

        factory::create_one::<Review>(&db, review_for(&tour, &alice, 4.0)).await.unwrap();
        let err = factory::create_one::<Review>(&db, review_for(&tour, &alice, 3.0))
            .await
            .unwrap_err();
        assert!(err.message.starts_with("Duplicate field value"));
    }

    #[tokio::test]
    async fn author_is_embedded_without_private_fields() {
        let db = DBClient::memory();
        let tour = db.insert(&tour()).await.unwrap();
        let alice = db
            .save_user(&User::new("Alice".to_string(), "alice@example.com", "x".to_string()))
            .await
            .unwrap();
        let review = Review::build(review_for(&tour, &alice, 4.0)).unwrap();

        let view = review.populate(&db, Expand::Listing).await.unwrap();
        assert_eq!(view["user"]["name"], "Alice");
        assert!(view["user"].get("email").is_none());
    }
}
