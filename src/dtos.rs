use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::{GeoPoint, Location, Tour, User, UserRole};

// DTOs define the shapes exchanged with clients. Request DTOs are
// validated at the boundary; response DTOs control what is exposed.

pub fn field_error(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

/// Schema errors are reported under `__all__`, after field rules pass.
fn passwords_match(password: &Option<String>, confirm: &Option<String>) -> Result<(), ValidationError> {
    if password == confirm {
        Ok(())
    } else {
        Err(field_error("password_mismatch", "Passwords are not the same!"))
    }
}

fn signup_passwords_match(dto: &SignupUserDto) -> Result<(), ValidationError> {
    passwords_match(&dto.password, &dto.password_confirm)
}

fn reset_passwords_match(dto: &ResetPasswordRequestDto) -> Result<(), ValidationError> {
    passwords_match(&dto.password, &dto.password_confirm)
}

fn update_passwords_match(dto: &UpdatePasswordDto) -> Result<(), ValidationError> {
    passwords_match(&dto.password, &dto.password_confirm)
}

// ============================================================================
// Authentication DTOs
// ============================================================================

/// Signup request. A `role` in the body is ignored.
#[derive(Validate, Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "signup_passwords_match"))]
pub struct SignupUserDto {
    #[validate(
        required(message = "Please tell us your name!"),
        length(min = 1, message = "Please tell us your name!")
    )]
    pub name: Option<String>,

    #[validate(
        required(message = "Please provide your email"),
        email(message = "Please provide a valid email")
    )]
    pub email: Option<String>,

    #[validate(
        required(message = "Please provide a password"),
        length(min = 8, max = 64, message = "A password must have between 8 and 64 characters")
    )]
    pub password: Option<String>,

    #[validate(required(message = "Please confirm your password"))]
    pub password_confirm: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct LoginUserDto {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Validate, Debug, Default, Clone, Deserialize)]
pub struct ForgotPasswordRequestDto {
    #[validate(
        required(message = "Please provide your email"),
        email(message = "Please provide a valid email")
    )]
    pub email: Option<String>,
}

#[derive(Validate, Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "reset_passwords_match"))]
pub struct ResetPasswordRequestDto {
    #[validate(
        required(message = "Please provide a password"),
        length(min = 8, max = 64, message = "A password must have between 8 and 64 characters")
    )]
    pub password: Option<String>,

    #[validate(required(message = "Please confirm your password"))]
    pub password_confirm: Option<String>,
}

#[derive(Validate, Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "update_passwords_match"))]
pub struct UpdatePasswordDto {
    #[validate(required(message = "Please provide your current password"))]
    pub password_current: Option<String>,

    #[validate(
        required(message = "Please provide a password"),
        length(min = 8, max = 64, message = "A password must have between 8 and 64 characters")
    )]
    pub password: Option<String>,

    #[validate(required(message = "Please confirm your password"))]
    pub password_confirm: Option<String>,
}

/// Self-service profile update. Password fields are accepted only so they
/// can be rejected explicitly.
#[derive(Validate, Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeDto {
    #[validate(length(min = 1, message = "Please tell us your name!"))]
    pub name: Option<String>,

    #[validate(email(message = "Please provide a valid email"))]
    pub email: Option<String>,

    pub password: Option<serde_json::Value>,
    pub password_confirm: Option<serde_json::Value>,
}

impl UpdateMeDto {
    pub fn touches_password(&self) -> bool {
        self.password.is_some() || self.password_confirm.is_some()
    }
}

/// Administrative user update.
#[derive(Validate, Debug, Default, Clone, Deserialize)]
pub struct UpdateUserDto {
    #[validate(length(min = 1, message = "Please tell us your name!"))]
    pub name: Option<String>,

    #[validate(email(message = "Please provide a valid email"))]
    pub email: Option<String>,

    pub photo: Option<String>,
    pub role: Option<UserRole>,
}

// ============================================================================
// User Response DTOs
// ============================================================================

/// User data sent to clients; never carries password or reset state.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FilterUserDto {
    pub id: String,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "__v")]
    pub version: i64,
}

impl FilterUserDto {
    pub fn filter_user(user: &User) -> Self {
        FilterUserDto {
            id: user.id.to_string(),
            name: user.name.to_owned(),
            email: user.email.to_owned(),
            photo: user.photo.to_owned(),
            role: user.role.to_str().to_string(),
            created_at: user.created_at,
            version: user.version,
        }
    }
}

/// Embedded user reference (tour guides, review authors, booking owners).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserSummaryDto {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub photo: String,
}

impl UserSummaryDto {
    pub fn from_user(user: &User) -> Self {
        UserSummaryDto {
            id: user.id.to_string(),
            name: user.name.to_owned(),
            email: user.email.to_owned(),
            role: user.role.to_str().to_string(),
            photo: user.photo.to_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserData {
    pub user: FilterUserDto,
}

/// Session issued by signup, login, password reset and password update.
#[derive(Debug, Serialize)]
pub struct AuthResponseDto {
    pub status: &'static str,
    pub token: String,
    pub data: UserData,
}

#[derive(Debug, Serialize)]
pub struct UserResponseDto {
    pub status: &'static str,
    pub data: UserData,
}

// ============================================================================
// Tour DTOs
// ============================================================================

#[derive(Validate, Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTourDto {
    /// Trimmed and length-checked when the tour is built.
    #[validate(required(message = "A tour must have a name"))]
    pub name: Option<String>,

    #[validate(
        required(message = "A tour must have a duration"),
        range(min = 1, message = "A tour must last at least one day")
    )]
    pub duration: Option<u32>,

    #[validate(
        required(message = "A tour must have a group size"),
        range(min = 1, message = "A tour group must have at least one member")
    )]
    pub max_group_size: Option<u32>,

    #[validate(required(message = "A tour must have a difficulty"))]
    pub difficulty: Option<String>,

    #[validate(range(min = 1.0, max = 5.0, message = "Rating must be between 1.0 and 5.0"))]
    pub ratings_average: Option<f64>,

    pub ratings_quantity: Option<u32>,

    #[validate(
        required(message = "A tour must have a price"),
        range(min = 0.0, message = "A tour price cannot be negative")
    )]
    pub price: Option<f64>,

    pub price_discount: Option<f64>,

    pub summary: Option<String>,

    #[validate(required(message = "A tour must have a description"))]
    pub description: Option<String>,

    #[validate(required(message = "A tour must have a cover image"))]
    pub image_cover: Option<String>,

    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub start_dates: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub secret_tour: bool,
    pub start_location: Option<GeoPoint>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub guides: Vec<Uuid>,
}

#[derive(Validate, Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTourDto {
    pub name: Option<String>,

    #[validate(range(min = 1, message = "A tour must last at least one day"))]
    pub duration: Option<u32>,

    #[validate(range(min = 1, message = "A tour group must have at least one member"))]
    pub max_group_size: Option<u32>,

    pub difficulty: Option<String>,

    #[validate(range(min = 1.0, max = 5.0, message = "Rating must be between 1.0 and 5.0"))]
    pub ratings_average: Option<f64>,

    pub ratings_quantity: Option<u32>,

    #[validate(range(min = 0.0, message = "A tour price cannot be negative"))]
    pub price: Option<f64>,

    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<DateTime<Utc>>>,
    pub secret_tour: Option<bool>,
    pub start_location: Option<GeoPoint>,
    pub locations: Option<Vec<Location>>,
    pub guides: Option<Vec<Uuid>>,
}

/// Tour as rendered to clients, with the derived `durationWeeks`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TourDto<'a> {
    #[serde(flatten)]
    pub tour: &'a Tour,
    pub duration_weeks: f64,
}

impl<'a> TourDto<'a> {
    pub fn from_tour(tour: &'a Tour) -> Self {
        TourDto {
            tour,
            duration_weeks: tour.duration_weeks(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TourStatsDto {
    pub difficulty: String,
    pub num_tours: u64,
    pub num_ratings: u64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPlanDto {
    pub month: u32,
    pub num_tour_starts: u64,
    pub tours: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TourDistanceDto {
    pub id: String,
    pub name: String,
    pub distance: f64,
}

// ============================================================================
// Review & Booking DTOs
// ============================================================================

/// New review. `tour` may come from the body or the nested route; the
/// author is always the authenticated user.
#[derive(Validate, Debug, Default, Clone, Deserialize)]
pub struct CreateReviewDto {
    #[validate(
        required(message = "Review can not be empty!"),
        length(min = 1, message = "Review can not be empty!")
    )]
    pub review: Option<String>,

    #[validate(
        required(message = "A review must have a rating"),
        range(min = 1.0, max = 5.0, message = "Rating must be between 1 and 5")
    )]
    pub rating: Option<f64>,

    pub tour: Option<Uuid>,

    #[serde(skip_deserializing)]
    pub user: Option<Uuid>,
}

#[derive(Validate, Debug, Default, Clone, Deserialize)]
pub struct UpdateReviewDto {
    #[validate(length(min = 1, message = "Review can not be empty!"))]
    pub review: Option<String>,

    #[validate(range(min = 1.0, max = 5.0, message = "Rating must be between 1 and 5"))]
    pub rating: Option<f64>,
}

#[derive(Validate, Debug, Default, Clone, Deserialize)]
pub struct CreateBookingDto {
    #[validate(required(message = "Booking must belong to a Tour!"))]
    pub tour: Option<Uuid>,

    #[validate(required(message = "Booking must belong to a User!"))]
    pub user: Option<Uuid>,

    #[validate(
        required(message = "Booking must have a price."),
        range(min = 0.0, message = "A booking price cannot be negative")
    )]
    pub price: Option<f64>,

    pub paid: Option<bool>,
}

#[derive(Validate, Debug, Default, Clone, Deserialize)]
pub struct UpdateBookingDto {
    #[validate(range(min = 0.0, message = "A booking price cannot be negative"))]
    pub price: Option<f64>,
    pub paid: Option<bool>,
}

/// Query string of the checkout success redirect.
#[derive(Debug, Default, Deserialize)]
pub struct BookingCheckoutQueryDto {
    pub tour: Option<String>,
    pub user: Option<String>,
    pub price: Option<String>,
}

// ============================================================================
// Generic response envelopes
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

/// `{ "status": "success", "data": { "data": ... } }`
#[derive(Debug, Serialize)]
pub struct ResponseDto<T> {
    pub status: &'static str,
    pub data: DataEnvelope<T>,
}

impl<T> ResponseDto<T> {
    pub fn success(data: T) -> Self {
        ResponseDto {
            status: "success",
            data: DataEnvelope { data },
        }
    }
}

/// `{ "status": "success", "results": n, "data": { "data": [...] } }`
#[derive(Debug, Serialize)]
pub struct ListResponseDto<T> {
    pub status: &'static str,
    pub results: usize,
    pub data: DataEnvelope<Vec<T>>,
}

impl<T> ListResponseDto<T> {
    pub fn success(data: Vec<T>) -> Self {
        ListResponseDto {
            status: "success",
            results: data.len(),
            data: DataEnvelope { data },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsData {
    pub stats: Vec<TourStatsDto>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponseDto {
    pub status: &'static str,
    pub data: StatsData,
}

#[derive(Debug, Serialize)]
pub struct PlanData {
    pub plan: Vec<MonthlyPlanDto>,
}

#[derive(Debug, Serialize)]
pub struct PlanResponseDto {
    pub status: &'static str,
    pub results: usize,
    pub data: PlanData,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponseDto {
    pub status: &'static str,
    pub session: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub status: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_requires_matching_passwords() {
        let dto = SignupUserDto {
            name: Some("Jonas".to_string()),
            email: Some("jonas@example.com".to_string()),
            password: Some("pass1234".to_string()),
            password_confirm: Some("pass12345".to_string()),
        };
        let errors = dto.validate().unwrap_err();
        let all = errors.field_errors();
        let mismatch = &all["__all__"];
        assert_eq!(mismatch[0].code, "password_mismatch");
        assert_eq!(
            crate::error::validation_message(&errors),
            "Invalid input data. Passwords are not the same!."
        );
    }

    #[test]
    fn reset_and_update_check_the_confirmation_too() {
        let reset = ResetPasswordRequestDto {
            password: Some("pass1234".to_string()),
            password_confirm: Some("other123".to_string()),
        };
        assert!(reset.validate().is_err());

        let update = UpdatePasswordDto {
            password_current: Some("old-pass1".to_string()),
            password: Some("pass1234".to_string()),
            password_confirm: Some("pass1234".to_string()),
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn signup_reports_every_missing_field() {
        let errors = SignupUserDto::default().validate().unwrap_err();
        let fields = errors.field_errors();
        for field in ["name", "email", "password", "password_confirm"] {
            assert!(fields.contains_key(field), "{} should be reported", field);
        }
    }

    #[test]
    fn tour_payload_uses_camel_case() {
        let dto: CreateTourDto = serde_json::from_value(serde_json::json!({
            "name": "The Test Tour",
            "duration": 5,
            "maxGroupSize": 10,
            "difficulty": "easy",
            "price": 397,
            "description": "Wander",
            "imageCover": "tour-1-cover.jpg"
        }))
        .unwrap();
        assert!(dto.validate().is_ok());
        assert_eq!(dto.max_group_size, Some(10));
        assert!(!dto.secret_tour);
    }

    #[test]
    fn update_me_detects_password_fields() {
        let dto: UpdateMeDto =
            serde_json::from_value(serde_json::json!({ "password": "pass1234" })).unwrap();
        assert!(dto.touches_password());
    }
}
