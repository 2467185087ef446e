use std::collections::BTreeMap;

use chrono::Datelike;
use uuid::Uuid;

use super::{
    DBClient, StoreError,
    query::{Field, Filter, FindQuery},
};
use crate::dtos::{MonthlyPlanDto, TourDistanceDto, TourStatsDto};
use crate::models::Tour;

const EARTH_RADIUS_METERS: f64 = 6_378_100.0;

/// Secret tours never leave the store through a public query.
pub fn public_scope() -> Vec<Filter> {
    vec![Filter::ne(Field::boolean("secretTour"), true)]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Mi,
    Km,
}

impl DistanceUnit {
    /// `mi` selects miles; anything else is kilometres.
    pub fn parse(unit: &str) -> Self {
        if unit == "mi" {
            DistanceUnit::Mi
        } else {
            DistanceUnit::Km
        }
    }

    pub fn earth_radius(&self) -> f64 {
        match self {
            DistanceUnit::Mi => 3963.2,
            DistanceUnit::Km => 6378.1,
        }
    }

    pub fn from_meters(&self, meters: f64) -> f64 {
        match self {
            DistanceUnit::Mi => meters * 0.000621371,
            DistanceUnit::Km => meters * 0.001,
        }
    }
}

/// Central angle in radians between two `(lat, lng)` points in degrees.
pub fn central_angle(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lng1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lng2) = (to.0.to_radians(), to.1.to_radians());
    let a = ((lat2 - lat1) / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * ((lng2 - lng1) / 2.0).sin().powi(2);
    2.0 * a.sqrt().min(1.0).asin()
}

/// Tour queries beyond plain CRUD. They read the visible tours and compute
/// in process, so both backends agree.
pub trait TourExt {
    async fn get_tour(&self, tour_id: Uuid) -> Result<Option<Tour>, StoreError>;

    async fn get_tour_by_slug(&self, slug: &str) -> Result<Option<Tour>, StoreError>;

    async fn get_tours(&self) -> Result<Vec<Tour>, StoreError>;

    /// Tours rated 4.5 or better, grouped by difficulty, cheapest group first
    async fn tour_stats(&self) -> Result<Vec<TourStatsDto>, StoreError>;

    /// Tour starts within `year` grouped by month, busiest month first
    async fn monthly_plan(&self, year: i32) -> Result<Vec<MonthlyPlanDto>, StoreError>;

    /// Tours starting within `distance` of `center` (`(lat, lng)`)
    async fn tours_within(
        &self,
        distance: f64,
        center: (f64, f64),
        unit: DistanceUnit,
    ) -> Result<Vec<Tour>, StoreError>;

    /// Distance from `center` to every tour start, nearest first
    async fn tour_distances(
        &self,
        center: (f64, f64),
        unit: DistanceUnit,
    ) -> Result<Vec<TourDistanceDto>, StoreError>;
}

impl TourExt for DBClient {
    async fn get_tour(&self, tour_id: Uuid) -> Result<Option<Tour>, StoreError> {
        self.find_by_id(tour_id, &public_scope()).await
    }

    async fn get_tour_by_slug(&self, slug: &str) -> Result<Option<Tour>, StoreError> {
        let mut filters = public_scope();
        filters.push(Filter::eq(Field::text("slug"), slug));
        self.find_one(filters).await
    }

    async fn get_tours(&self) -> Result<Vec<Tour>, StoreError> {
        self.find(&FindQuery::filtered(public_scope())).await
    }

    async fn tour_stats(&self) -> Result<Vec<TourStatsDto>, StoreError> {
        let mut filters = public_scope();
        filters.push(Filter::gte(Field::number("ratingsAverage"), 4.5));
        let tours: Vec<Tour> = self.find(&FindQuery::filtered(filters)).await?;

        let mut groups: BTreeMap<String, Vec<&Tour>> = BTreeMap::new();
        for tour in &tours {
            groups
                .entry(tour.difficulty.to_str().to_uppercase())
                .or_default()
                .push(tour);
        }

        let mut stats: Vec<TourStatsDto> = groups
            .into_iter()
            .map(|(difficulty, tours)| {
                let count = tours.len() as f64;
                let prices = tours.iter().map(|t| t.price);
                TourStatsDto {
                    difficulty,
                    num_tours: tours.len() as u64,
                    num_ratings: tours.iter().map(|t| u64::from(t.ratings_quantity)).sum(),
                    avg_rating: tours.iter().map(|t| t.ratings_average).sum::<f64>() / count,
                    avg_price: prices.clone().sum::<f64>() / count,
                    min_price: prices.clone().fold(f64::INFINITY, f64::min),
                    max_price: prices.fold(f64::NEG_INFINITY, f64::max),
                }
            })
            .collect();

        stats.sort_by(|a, b| a.avg_price.total_cmp(&b.avg_price));
        Ok(stats)
    }

    async fn monthly_plan(&self, year: i32) -> Result<Vec<MonthlyPlanDto>, StoreError> {
        let tours = self.get_tours().await?;

        let mut months: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for tour in &tours {
            for start in tour.start_dates.iter().filter(|d| d.year() == year) {
                months.entry(start.month()).or_default().push(tour.name.clone());
            }
        }

        let mut plan: Vec<MonthlyPlanDto> = months
            .into_iter()
            .map(|(month, tours)| MonthlyPlanDto {
                month,
                num_tour_starts: tours.len() as u64,
                tours,
            })
            .collect();

        plan.sort_by(|a, b| {
            b.num_tour_starts
                .cmp(&a.num_tour_starts)
                .then(a.month.cmp(&b.month))
        });
        plan.truncate(12);
        Ok(plan)
    }

    async fn tours_within(
        &self,
        distance: f64,
        center: (f64, f64),
        unit: DistanceUnit,
    ) -> Result<Vec<Tour>, StoreError> {
        let radius = distance / unit.earth_radius();
        let tours = self.get_tours().await?;

        Ok(tours
            .into_iter()
            .filter(|tour| {
                tour.start_location
                    .as_ref()
                    .is_some_and(|start| central_angle(center, (start.lat(), start.lng())) <= radius)
            })
            .collect())
    }

    async fn tour_distances(
        &self,
        center: (f64, f64),
        unit: DistanceUnit,
    ) -> Result<Vec<TourDistanceDto>, StoreError> {
        let tours = self.get_tours().await?;

        let mut distances: Vec<TourDistanceDto> = tours
            .iter()
            .filter_map(|tour| {
                let start = tour.start_location.as_ref()?;
                let meters = central_angle(center, (start.lat(), start.lng())) * EARTH_RADIUS_METERS;
                Some(TourDistanceDto {
                    id: tour.id.to_string(),
                    name: tour.name.clone(),
                    distance: unit.from_meters(meters),
                })
            })
            .collect();

        distances.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(distances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, GeoPoint};
    use chrono::{TimeZone, Utc};

    fn tour(name: &str, price: f64, difficulty: Difficulty) -> Tour {
        Tour {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: crate::models::slugify(name),
            duration: 5,
            max_group_size: 10,
            difficulty,
            ratings_average: 4.7,
            ratings_quantity: 3,
            price,
            price_discount: None,
            summary: None,
            description: "desc".to_string(),
            image_cover: "cover.jpg".to_string(),
            images: Vec::new(),
            start_dates: Vec::new(),
            secret_tour: false,
            start_location: None,
            locations: Vec::new(),
            guides: Vec::new(),
            created_at: Utc::now(),
            version: 0,
        }
    }

    fn at(lat: f64, lng: f64) -> Option<GeoPoint> {
        Some(GeoPoint {
            kind: "Point".to_string(),
            coordinates: [lng, lat],
            address: None,
            description: None,
        })
    }

    #[tokio::test]
    async fn stats_group_by_difficulty_and_skip_secret_tours() {
        let db = DBClient::memory();
        db.insert(&tour("Easy One", 100.0, Difficulty::Easy)).await.unwrap();
        db.insert(&tour("Easy Two", 300.0, Difficulty::Easy)).await.unwrap();
        db.insert(&tour("Hard One", 50.0, Difficulty::Difficult)).await.unwrap();
        let mut secret = tour("Secret", 10.0, Difficulty::Medium);
        secret.secret_tour = true;
        db.insert(&secret).await.unwrap();

        let stats = db.tour_stats().await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].difficulty, "DIFFICULT");
        assert_eq!(stats[1].difficulty, "EASY");
        assert_eq!(stats[1].num_tours, 2);
        assert_eq!(stats[1].avg_price, 200.0);
        assert_eq!(stats[1].min_price, 100.0);
        assert_eq!(stats[1].max_price, 300.0);
        assert_eq!(stats[1].num_ratings, 6);
    }

    #[tokio::test]
    async fn monthly_plan_counts_starts_in_the_year() {
        let db = DBClient::memory();
        let mut a = tour("A", 1.0, Difficulty::Easy);
        a.start_dates = vec![
            Utc.with_ymd_and_hms(2021, 3, 1, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2021, 7, 1, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2022, 3, 1, 9, 0, 0).unwrap(),
        ];
        let mut b = tour("B", 1.0, Difficulty::Easy);
        b.start_dates = vec![Utc.with_ymd_and_hms(2021, 7, 20, 9, 0, 0).unwrap()];
        db.insert(&a).await.unwrap();
        db.insert(&b).await.unwrap();

        let plan = db.monthly_plan(2021).await.unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].month, 7);
        assert_eq!(plan[0].num_tour_starts, 2);
        assert_eq!(plan[1].month, 3);
    }

    #[tokio::test]
    async fn geo_queries_use_the_start_location() {
        let db = DBClient::memory();
        let mut la = tour("Los Angeles", 1.0, Difficulty::Easy);
        la.start_location = at(34.0522, -118.2437);
        let mut ny = tour("New York", 1.0, Difficulty::Easy);
        ny.start_location = at(40.7128, -74.0060);
        db.insert(&la).await.unwrap();
        db.insert(&ny).await.unwrap();
        db.insert(&tour("Nowhere", 1.0, Difficulty::Easy)).await.unwrap();

        let center = (34.111745, -118.113491);
        let within = db.tours_within(200.0, center, DistanceUnit::Mi).await.unwrap();
        assert_eq!(within.len(), 1);
        assert_eq!(within[0].name, "Los Angeles");

        let distances = db.tour_distances(center, DistanceUnit::Km).await.unwrap();
        assert_eq!(distances.len(), 2);
        assert_eq!(distances[0].name, "Los Angeles");
        assert!(distances[0].distance < 20.0);
        assert!(distances[1].distance > 3_000.0);
    }
}
