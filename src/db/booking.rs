use uuid::Uuid;

use super::{
    DBClient, StoreError,
    query::{Field, Filter, FindQuery},
    tour::public_scope,
};
use crate::models::{Booking, Tour};

pub trait BookingExt {
    async fn get_bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError>;

    /// Visible tours the user has booked
    async fn get_booked_tours(&self, user_id: Uuid) -> Result<Vec<Tour>, StoreError>;

    async fn save_booking(&self, booking: &Booking) -> Result<Booking, StoreError>;
}

impl BookingExt for DBClient {
    async fn get_bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let query = FindQuery::filtered(vec![Filter::eq(Field::id("user"), user_id)]);
        self.find(&query).await
    }

    async fn get_booked_tours(&self, user_id: Uuid) -> Result<Vec<Tour>, StoreError> {
        let bookings = self.get_bookings_for_user(user_id).await?;
        if bookings.is_empty() {
            return Ok(Vec::new());
        }

        let mut filters = public_scope();
        filters.push(Filter::is_in(Field::id("id"), bookings.iter().map(|b| b.tour)));
        self.find(&FindQuery::filtered(filters)).await
    }

    async fn save_booking(&self, booking: &Booking) -> Result<Booking, StoreError> {
        self.insert(booking).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ReviewExt, TourExt};
    use crate::models::{Difficulty, Review, Tour};
    use chrono::Utc;

    fn tour(name: &str) -> Tour {
        serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "name": name,
            "slug": crate::models::slugify(name),
            "duration": 3,
            "maxGroupSize": 8,
            "difficulty": Difficulty::Easy,
            "ratingsAverage": 4.5,
            "ratingsQuantity": 0,
            "price": 250.0,
            "priceDiscount": null,
            "summary": null,
            "description": "desc",
            "imageCover": "cover.jpg",
            "startLocation": null,
            "createdAt": Utc::now()
        }))
        .unwrap()
    }

    fn review(tour: Uuid, rating: f64) -> Review {
        Review {
            id: Uuid::new_v4(),
            review: "Great".to_string(),
            rating,
            tour,
            user: Uuid::new_v4(),
            created_at: Utc::now(),
            version: 0,
        }
    }

    #[tokio::test]
    async fn booked_tours_follow_the_users_bookings() {
        let db = DBClient::memory();
        let booked = db.insert(&tour("Booked")).await.unwrap();
        db.insert(&tour("Not Booked")).await.unwrap();
        let user = Uuid::new_v4();
        db.save_booking(&Booking::new(booked.id, user, booked.price)).await.unwrap();

        let tours = db.get_booked_tours(user).await.unwrap();
        assert_eq!(tours.len(), 1);
        assert_eq!(tours[0].name, "Booked");
        assert!(db.get_booked_tours(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ratings_are_recomputed_and_reset() {
        let db = DBClient::memory();
        let saved = db.insert(&tour("Rated")).await.unwrap();
        let first = db.insert(&review(saved.id, 4.0)).await.unwrap();
        db.insert(&review(saved.id, 5.0)).await.unwrap();
        db.insert(&review(saved.id, 5.0)).await.unwrap();
        db.calc_average_ratings(saved.id).await.unwrap();

        let rated = db.get_tour(saved.id).await.unwrap().unwrap();
        assert_eq!(rated.ratings_quantity, 3);
        assert_eq!(rated.ratings_average, 4.7);

        for r in db.get_reviews_for_tour(saved.id).await.unwrap() {
            db.delete::<Review>(r.id).await.unwrap();
        }
        assert!(db.delete::<Review>(first.id).await.unwrap().is_none());
        db.calc_average_ratings(saved.id).await.unwrap();

        let reset = db.get_tour(saved.id).await.unwrap().unwrap();
        assert_eq!(reset.ratings_quantity, 0);
        assert_eq!(reset.ratings_average, 4.5);
    }
}
