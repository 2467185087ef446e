use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{Document, query::Field};

/// Permission level, serialized in kebab-case (`lead-guide`).
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum UserRole {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl UserRole {
    pub fn to_str(&self) -> &str {
        match self {
            UserRole::User => "user",
            UserRole::Guide => "guide",
            UserRole::LeadGuide => "lead-guide",
            UserRole::Admin => "admin",
        }
    }
}

pub const DEFAULT_PHOTO: &str = "default.jpg";

/// User account.
///
/// `password` holds the Argon2 PHC string and `password_reset_token` the
/// SHA-256 digest of the emailed token; neither ever reaches a response.
/// Deactivated accounts (`active == false`) are invisible to user queries.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: UserRole,
    pub password: String,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "__v", default)]
    pub version: i64,
}

impl User {
    pub fn new(name: String, email: &str, password_hash: String) -> Self {
        User {
            id: Uuid::new_v4(),
            name,
            email: email.trim().to_lowercase(),
            photo: DEFAULT_PHOTO.to_string(),
            role: UserRole::User,
            password: password_hash,
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: Utc::now(),
            version: 0,
        }
    }

    /// Whether the password was changed after a token issued at `iat`
    /// (seconds since the epoch).
    pub fn changed_password_after(&self, iat: i64) -> bool {
        self.password_changed_at
            .is_some_and(|changed_at| changed_at.timestamp() > iat)
    }

    /// Store a new password hash and invalidate reset tokens. The change is
    /// stamped one second in the past so a token issued right after still
    /// passes [`User::changed_password_after`].
    pub fn set_password(&mut self, password_hash: String) {
        self.password = password_hash;
        self.password_changed_at = Some(Utc::now() - chrono::Duration::seconds(1));
        self.password_reset_token = None;
        self.password_reset_expires = None;
    }
}

impl Document for User {
    const COLLECTION: &'static str = "users";
    const FIELDS: &'static [Field] = &[
        Field::id("id"),
        Field::text("name"),
        Field::text("email"),
        Field::text("photo"),
        Field::text("role"),
        Field::text("password").internal(),
        Field::time("passwordChangedAt").internal(),
        Field::text("passwordResetToken").internal(),
        Field::time("passwordResetExpires").internal(),
        Field::boolean("active").internal(),
        Field::time("createdAt"),
    ];
    const UNIQUE: &'static [&'static [&'static str]] = &[&["email"]];

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

impl Difficulty {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "difficult" => Some(Difficulty::Difficult),
            _ => None,
        }
    }

    pub fn to_str(&self) -> &str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Difficult => "difficult",
        }
    }
}

/// GeoJSON point. `coordinates` is `[longitude, latitude]`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GeoPoint {
    #[serde(rename = "type", default = "GeoPoint::point_type")]
    pub kind: String,
    pub coordinates: [f64; 2],
    pub address: Option<String>,
    pub description: Option<String>,
}

impl GeoPoint {
    fn point_type() -> String {
        "Point".to_string()
    }

    pub fn lng(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn lat(&self) -> f64 {
        self.coordinates[1]
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Location {
    #[serde(flatten)]
    pub point: GeoPoint,
    pub day: Option<u32>,
}

pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub duration: u32,
    pub max_group_size: u32,
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: u32,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: String,
    pub image_cover: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub start_dates: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub secret_tour: bool,
    pub start_location: Option<GeoPoint>,
    #[serde(default)]
    pub locations: Vec<Location>,
    /// User ids
    #[serde(default)]
    pub guides: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "__v", default)]
    pub version: i64,
}

impl Tour {
    pub fn duration_weeks(&self) -> f64 {
        f64::from(self.duration) / 7.0
    }
}

impl Document for Tour {
    const COLLECTION: &'static str = "tours";
    const FIELDS: &'static [Field] = &[
        Field::id("id"),
        Field::text("name"),
        Field::text("slug"),
        Field::number("duration"),
        Field::number("maxGroupSize"),
        Field::text("difficulty"),
        Field::number("ratingsAverage"),
        Field::number("ratingsQuantity"),
        Field::number("price"),
        Field::number("priceDiscount"),
        Field::text("summary"),
        Field::text("description"),
        Field::text("imageCover"),
        Field::text("images").list(),
        Field::time("startDates").list(),
        Field::boolean("secretTour").internal(),
        Field::id("guides").list(),
        Field::time("createdAt"),
    ];
    const UNIQUE: &'static [&'static [&'static str]] = &[&["name"]];

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub review: String,
    pub rating: f64,
    pub tour: Uuid,
    pub user: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "__v", default)]
    pub version: i64,
}

impl Document for Review {
    const COLLECTION: &'static str = "reviews";
    const FIELDS: &'static [Field] = &[
        Field::id("id"),
        Field::text("review"),
        Field::number("rating"),
        Field::id("tour"),
        Field::id("user"),
        Field::time("createdAt"),
    ];
    const UNIQUE: &'static [&'static [&'static str]] = &[&["tour", "user"]];

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub tour: Uuid,
    pub user: Uuid,
    pub price: f64,
    pub paid: bool,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "__v", default)]
    pub version: i64,
}

impl Booking {
    pub fn new(tour: Uuid, user: Uuid, price: f64) -> Self {
        Booking {
            id: Uuid::new_v4(),
            tour,
            user,
            price,
            paid: true,
            created_at: Utc::now(),
            version: 0,
        }
    }
}

impl Document for Booking {
    const COLLECTION: &'static str = "bookings";
    const FIELDS: &'static [Field] = &[
        Field::id("id"),
        Field::id("tour"),
        Field::id("user"),
        Field::number("price"),
        Field::boolean("paid"),
        Field::time("createdAt"),
    ];

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Lowercase the name and join its alphanumeric runs with hyphens.
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Round to one decimal place, 4.666 -> 4.7.
pub fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
