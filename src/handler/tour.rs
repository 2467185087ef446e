use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::Value;

use crate::{
    AppState,
    db::{
        DBClient, DistanceUnit, ReviewExt, StoreError, TourExt, UserExt, public_scope,
        query::Filter,
    },
    dtos::{
        CreateTourDto, ListResponseDto, PlanData, PlanResponseDto, ResponseDto, StatsData,
        StatsResponseDto, TourDto, UpdateTourDto, UserSummaryDto,
    },
    error::HttpError,
    handler::{
        AppQuery, JsonOrMultipart, MultipartForm,
        factory::{self, Expand, Resource},
        review,
    },
    images::{TOUR_IMAGE, UPLOAD_LIMIT, Upload},
    middleware::{protect, restrict_to},
    models::{DEFAULT_RATINGS_AVERAGE, Difficulty, Tour, UserRole, round_rating, slugify},
};

const TOUR_MANAGERS: &[UserRole] = &[UserRole::Admin, UserRole::LeadGuide];
const TOUR_PLANNERS: &[UserRole] = &[UserRole::Admin, UserRole::LeadGuide, UserRole::Guide];

/// Router for `/api/v1/tours`
pub fn tour_handler(app_state: AppState) -> Router<AppState> {
    let auth = middleware::from_fn_with_state(app_state, protect);

    Router::new()
        .route("/", get(factory::list_handler::<Tour>))
        .route(
            "/",
            post(factory::create_handler::<Tour>)
                .route_layer(middleware::from_fn(|req, next| {
                    restrict_to(req, next, TOUR_MANAGERS)
                }))
                .route_layer(auth.clone()),
        )
        .route("/top-5-cheap", get(top_five_cheap))
        .route("/tour-stats", get(tour_stats))
        .route(
            "/monthly-plan/{year}",
            get(monthly_plan)
                .route_layer(middleware::from_fn(|req, next| {
                    restrict_to(req, next, TOUR_PLANNERS)
                }))
                .route_layer(auth.clone()),
        )
        .route(
            "/tours-within/{distance}/center/{latlng}/unit/{unit}",
            get(tours_within),
        )
        .route("/distances/{latlng}/unit/{unit}", get(distances))
        .route("/{id}", get(factory::get_handler::<Tour>))
        .route(
            "/{id}",
            axum::routing::patch(update_tour)
                .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
                .delete(factory::delete_handler::<Tour>)
                .route_layer(middleware::from_fn(|req, next| {
                    restrict_to(req, next, TOUR_MANAGERS)
                }))
                .route_layer(auth.clone()),
        )
        .route(
            "/{id}/reviews",
            get(review::list_tour_reviews).route_layer(auth.clone()),
        )
        .route(
            "/{id}/reviews",
            post(review::create_tour_review)
                .route_layer(middleware::from_fn(|req, next| {
                    restrict_to(req, next, review::REVIEW_AUTHORS)
                }))
                .route_layer(auth),
        )
}

fn invalid(message: &str) -> HttpError {
    HttpError::bad_request(format!("Invalid input data. {}.", message))
}

fn require<T>(value: Option<T>, message: &str) -> Result<T, HttpError> {
    value.ok_or_else(|| invalid(message))
}

fn parse_difficulty(value: &str) -> Result<Difficulty, HttpError> {
    Difficulty::parse(value).ok_or_else(|| invalid("Difficulty is either: easy, medium, difficult"))
}

fn check_discount(discount: Option<f64>, price: f64) -> Result<(), HttpError> {
    match discount {
        Some(discount) if discount >= price => Err(invalid(&format!(
            "Discount price ({}) should be below regular price",
            discount
        ))),
        _ => Ok(()),
    }
}

/// Trimmed text, `None` when nothing but whitespace was sent.
fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub const MAX_NAME_LENGTH: usize = 40;

fn tour_name(value: Option<String>) -> Result<String, HttpError> {
    let name = require(trimmed(value), "A tour must have a name")?;
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(invalid("A tour name must have less or equal then 40 characters"));
    }
    Ok(name)
}

impl Resource for Tour {
    type Input = CreateTourDto;
    type Patch = UpdateTourDto;

    fn build(input: CreateTourDto) -> Result<Self, HttpError> {
        let name = tour_name(input.name)?;
        let difficulty = parse_difficulty(&require(input.difficulty, "A tour must have a difficulty")?)?;
        let price = require(input.price, "A tour must have a price")?;
        check_discount(input.price_discount, price)?;

        Ok(Tour {
            id: uuid::Uuid::new_v4(),
            slug: slugify(&name),
            name,
            duration: require(input.duration, "A tour must have a duration")?,
            max_group_size: require(input.max_group_size, "A tour must have a group size")?,
            difficulty,
            ratings_average: round_rating(input.ratings_average.unwrap_or(DEFAULT_RATINGS_AVERAGE)),
            ratings_quantity: input.ratings_quantity.unwrap_or(0),
            price,
            price_discount: input.price_discount,
            summary: trimmed(input.summary),
            description: require(trimmed(input.description), "A tour must have a description")?,
            image_cover: require(input.image_cover, "A tour must have a cover image")?,
            images: input.images,
            start_dates: input.start_dates,
            secret_tour: input.secret_tour,
            start_location: input.start_location,
            locations: input.locations,
            guides: input.guides,
            created_at: chrono::Utc::now(),
            version: 0,
        })
    }

    fn apply(&mut self, patch: UpdateTourDto) -> Result<(), HttpError> {
        if patch.name.is_some() {
            let name = tour_name(patch.name)?;
            self.slug = slugify(&name);
            self.name = name;
        }
        if let Some(difficulty) = patch.difficulty {
            self.difficulty = parse_difficulty(&difficulty)?;
        }
        if let Some(duration) = patch.duration {
            self.duration = duration;
        }
        if let Some(size) = patch.max_group_size {
            self.max_group_size = size;
        }
        if let Some(average) = patch.ratings_average {
            self.ratings_average = round_rating(average);
        }
        if let Some(quantity) = patch.ratings_quantity {
            self.ratings_quantity = quantity;
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if patch.price_discount.is_some() {
            self.price_discount = patch.price_discount;
        }
        if let Some(summary) = trimmed(patch.summary) {
            self.summary = Some(summary);
        }
        if patch.description.is_some() {
            self.description = require(trimmed(patch.description), "A tour must have a description")?;
        }
        if let Some(cover) = patch.image_cover {
            self.image_cover = cover;
        }
        if let Some(images) = patch.images {
            self.images = images;
        }
        if let Some(dates) = patch.start_dates {
            self.start_dates = dates;
        }
        if let Some(secret) = patch.secret_tour {
            self.secret_tour = secret;
        }
        if patch.start_location.is_some() {
            self.start_location = patch.start_location;
        }
        if let Some(locations) = patch.locations {
            self.locations = locations;
        }
        if let Some(guides) = patch.guides {
            self.guides = guides;
        }

        check_discount(self.price_discount, self.price)
    }

    fn view(&self) -> Result<Value, StoreError> {
        Ok(serde_json::to_value(TourDto::from_tour(self))?)
    }

    fn visibility() -> Vec<Filter> {
        public_scope()
    }

    /// Guides are always embedded; the detail view adds the tour's reviews.
    async fn populate(&self, db: &DBClient, expand: Expand) -> Result<Value, StoreError> {
        let mut view = self.view()?;

        let users = db.get_users_by_ids(&self.guides).await?;
        let guides: Vec<UserSummaryDto> = self
            .guides
            .iter()
            .filter_map(|id| users.iter().find(|user| user.id == *id))
            .map(UserSummaryDto::from_user)
            .collect();
        let guides = serde_json::to_value(guides)?;

        let reviews = match expand {
            Expand::Detail => {
                let reviews = db.get_reviews_for_tour(self.id).await?;
                let mut rendered = Vec::with_capacity(reviews.len());
                for review in &reviews {
                    rendered.push(review.populate(db, Expand::Listing).await?);
                }
                Some(Value::Array(rendered))
            }
            Expand::Listing => None,
        };

        if let Some(object) = view.as_object_mut() {
            object.insert("guides".to_string(), guides);
            if let Some(reviews) = reviews {
                object.insert("reviews".to_string(), reviews);
            }
        }
        Ok(view)
    }
}

pub const MAX_TOUR_IMAGES: usize = 3;

/// Update a tour from JSON, or replace its pictures from a multipart form
/// with one `imageCover` and up to three `images`. All pictures are
/// processed together; if any fails, the tour is left unchanged.
pub async fn update_tour(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
    payload: JsonOrMultipart<UpdateTourDto>,
) -> Result<impl IntoResponse, HttpError> {
    let patch = match payload {
        JsonOrMultipart::Json(patch) => patch,
        JsonOrMultipart::Multipart(multipart) => {
            let form = MultipartForm::read(multipart).await?;
            let tour = factory::get_one::<Tour>(&app_state.db_client, &id, Vec::new()).await?;
            image_patch(&app_state, &tour, form).await?
        }
    };

    let tour = factory::update_one::<Tour>(&app_state.db_client, &id, patch).await?;
    Ok(factory::respond_one(tour.view()?))
}

async fn image_patch(
    app_state: &AppState,
    tour: &Tour,
    mut form: MultipartForm,
) -> Result<UpdateTourDto, HttpError> {
    if let Some((name, _)) = form.text.first() {
        return Err(invalid(&format!(
            "Multipart tour updates only carry imageCover and images, got {}",
            name
        )));
    }
    let covers = form.take_files("imageCover");
    let images = form.take_files("images");
    if covers.len() > 1 || images.len() > MAX_TOUR_IMAGES {
        return Err(invalid("Upload one imageCover and at most 3 images"));
    }
    if let Some((name, _)) = form.files.first() {
        return Err(invalid(&format!("Unexpected file field {}", name)));
    }

    let stamp = chrono::Utc::now().timestamp_millis();
    let has_cover = !covers.is_empty();
    let image_count = images.len();

    let mut uploads: Vec<(Upload, String)> = covers
        .into_iter()
        .map(|upload| (upload, format!("tour-{}-{}-cover.jpeg", tour.id, stamp)))
        .collect();
    uploads.extend(
        images
            .into_iter()
            .enumerate()
            .map(|(idx, upload)| (upload, format!("tour-{}-{}-{}.jpeg", tour.id, stamp, idx + 1))),
    );

    let mut names = app_state.images.save_all(uploads, "tours", TOUR_IMAGE).await?;

    let mut patch = UpdateTourDto::default();
    if has_cover {
        patch.image_cover = Some(names.remove(0));
    }
    if image_count > 0 {
        patch.images = Some(names);
    }
    Ok(patch)
}

/// Preset query: the five best-rated tours, cheapest first among equals.
pub async fn top_five_cheap(
    State(app_state): State<AppState>,
    AppQuery(params): AppQuery<Vec<(String, String)>>,
) -> Result<impl IntoResponse, HttpError> {
    let mut params: Vec<(String, String)> = params
        .into_iter()
        .filter(|(key, _)| !matches!(key.as_str(), "limit" | "sort" | "fields"))
        .collect();
    params.extend([
        ("limit".to_string(), "5".to_string()),
        ("sort".to_string(), "-ratingsAverage,price".to_string()),
        (
            "fields".to_string(),
            "name,price,ratingsAverage,summary,difficulty".to_string(),
        ),
    ]);

    let views = factory::get_all::<Tour>(&app_state.db_client, Vec::new(), params).await?;
    Ok(factory::respond_list(views))
}

pub async fn tour_stats(State(app_state): State<AppState>) -> Result<impl IntoResponse, HttpError> {
    let stats = app_state.db_client.tour_stats().await?;
    Ok(Json(StatsResponseDto {
        status: "success",
        data: StatsData { stats },
    }))
}

pub async fn monthly_plan(
    State(app_state): State<AppState>,
    Path(year): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let year: i32 = year
        .parse()
        .map_err(|_| HttpError::bad_request(format!("Invalid year: {}.", year)))?;

    let plan = app_state.db_client.monthly_plan(year).await?;
    Ok(Json(PlanResponseDto {
        status: "success",
        results: plan.len(),
        data: PlanData { plan },
    }))
}

/// Parse `lat,lng` in degrees.
pub fn parse_latlng(latlng: &str) -> Result<(f64, f64), HttpError> {
    let bad_format =
        || HttpError::bad_request("Please provide latitude and longitude in the format lat,lng.");

    let (lat, lng) = latlng.split_once(',').ok_or_else(bad_format)?;
    let lat: f64 = lat.trim().parse().map_err(|_| bad_format())?;
    let lng: f64 = lng.trim().parse().map_err(|_| bad_format())?;

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(bad_format());
    }
    Ok((lat, lng))
}

pub async fn tours_within(
    State(app_state): State<AppState>,
    Path((distance, latlng, unit)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, HttpError> {
    let center = parse_latlng(&latlng)?;
    let distance: f64 = distance
        .parse()
        .ok()
        .filter(|d: &f64| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| HttpError::bad_request(format!("Invalid distance: {}.", distance)))?;

    let tours = app_state
        .db_client
        .tours_within(distance, center, DistanceUnit::parse(&unit))
        .await?;

    let views = tours
        .iter()
        .map(|tour| tour.view())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(ListResponseDto::success(views)))
}

pub async fn distances(
    State(app_state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> Result<impl IntoResponse, HttpError> {
    let center = parse_latlng(&latlng)?;
    let distances = app_state
        .db_client
        .tour_distances(center, DistanceUnit::parse(&unit))
        .await?;

    Ok(Json(ResponseDto::success(distances)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input() -> CreateTourDto {
        serde_json::from_value(json!({
            "name": "  The Park Camper ",
            "duration": 10,
            "maxGroupSize": 15,
            "difficulty": "medium",
            "price": 1497,
            "ratingsAverage": 4.666,
            "description": " Breathtaking hike ",
            "imageCover": "tour-5-cover.jpg"
        }))
        .unwrap()
    }

    #[test]
    fn build_trims_slugs_and_rounds() {
        let tour = Tour::build(input()).unwrap();
        assert_eq!(tour.name, "The Park Camper");
        assert_eq!(tour.slug, "the-park-camper");
        assert_eq!(tour.description, "Breathtaking hike");
        assert_eq!(tour.ratings_average, 4.7);
        assert_eq!(tour.ratings_quantity, 0);
        assert_eq!(tour.difficulty, Difficulty::Medium);
    }

    #[test]
    fn blank_names_are_rejected_and_length_counts_after_trimming() {
        let mut dto = input();
        dto.name = Some("     ".to_string());
        let err = Tour::build(dto).unwrap_err();
        assert_eq!(err.message, "Invalid input data. A tour must have a name.");

        let forty = "a".repeat(MAX_NAME_LENGTH);
        let mut dto = input();
        dto.name = Some(format!("  {}  ", forty));
        assert_eq!(Tour::build(dto).unwrap().name, forty);

        let mut dto = input();
        dto.name = Some("a".repeat(MAX_NAME_LENGTH + 1));
        assert!(Tour::build(dto).is_err());

        let mut tour = Tour::build(input()).unwrap();
        let patch = UpdateTourDto {
            name: Some("  ".to_string()),
            ..UpdateTourDto::default()
        };
        assert!(tour.apply(patch).is_err());
        assert_eq!(tour.slug, "the-park-camper");
    }

    #[test]
    fn unknown_difficulty_is_rejected() {
        let mut dto = input();
        dto.difficulty = Some("extreme".to_string());
        let err = Tour::build(dto).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
        assert!(err.message.contains("Difficulty is either"));
    }

    #[test]
    fn discount_must_stay_below_the_price() {
        let mut dto = input();
        dto.price_discount = Some(2000.0);
        assert!(Tour::build(dto).is_err());

        let mut tour = Tour::build(input()).unwrap();
        let patch = UpdateTourDto {
            price_discount: Some(100.0),
            ..UpdateTourDto::default()
        };
        tour.apply(patch).unwrap();

        let patch = UpdateTourDto {
            price: Some(50.0),
            ..UpdateTourDto::default()
        };
        let err = tour.apply(patch).unwrap_err();
        assert!(err.message.contains("Discount price (100)"));
    }

    #[test]
    fn renaming_recomputes_the_slug() {
        let mut tour = Tour::build(input()).unwrap();
        let patch = UpdateTourDto {
            name: Some("The Sea Explorer".to_string()),
            ..UpdateTourDto::default()
        };
        tour.apply(patch).unwrap();
        assert_eq!(tour.slug, "the-sea-explorer");
    }

    #[test]
    fn latlng_must_be_two_coordinates() {
        assert_eq!(parse_latlng("34.111745,-118.113491").unwrap(), (34.111745, -118.113491));
        assert!(parse_latlng("34.1").is_err());
        assert!(parse_latlng("north,south").is_err());
        assert!(parse_latlng("95,10").is_err());
    }

    #[tokio::test]
    async fn views_carry_weeks_and_guides() {
        let db = DBClient::memory();
        let guide = crate::models::User::new("Lead".to_string(), "lead@example.com", "x".to_string());
        db.save_user(&guide).await.unwrap();

        let mut tour = Tour::build(input()).unwrap();
        tour.guides = vec![guide.id];
        let view = tour.populate(&db, Expand::Listing).await.unwrap();

        assert_eq!(view["durationWeeks"], json!(10.0 / 7.0));
        assert_eq!(view["guides"][0]["name"], "Lead");
        assert!(view.get("reviews").is_none());
        assert!(view["guides"][0].get("password").is_none());
    }
}
