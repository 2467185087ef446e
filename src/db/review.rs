use uuid::Uuid;

use super::{
    DBClient, StoreError,
    query::{Field, Filter, FindQuery},
};
use crate::models::{DEFAULT_RATINGS_AVERAGE, Review, Tour, round_rating};

pub trait ReviewExt {
    async fn get_reviews_for_tour(&self, tour_id: Uuid) -> Result<Vec<Review>, StoreError>;

    /// Recompute a tour's `ratingsQuantity` and `ratingsAverage` from its
    /// reviews. A tour without reviews falls back to the defaults.
    async fn calc_average_ratings(&self, tour_id: Uuid) -> Result<(), StoreError>;
}

impl ReviewExt for DBClient {
    async fn get_reviews_for_tour(&self, tour_id: Uuid) -> Result<Vec<Review>, StoreError> {
        let query = FindQuery::filtered(vec![Filter::eq(Field::id("tour"), tour_id)]);
        self.find(&query).await
    }

    async fn calc_average_ratings(&self, tour_id: Uuid) -> Result<(), StoreError> {
        let reviews = self.get_reviews_for_tour(tour_id).await?;

        // Secret tours are rated too, so no visibility scope here.
        let Some(mut tour) = self.find_by_id::<Tour>(tour_id, &[]).await? else {
            return Ok(());
        };

        if reviews.is_empty() {
            tour.ratings_quantity = 0;
            tour.ratings_average = DEFAULT_RATINGS_AVERAGE;
        } else {
            let total: f64 = reviews.iter().map(|r| r.rating).sum();
            tour.ratings_quantity = reviews.len() as u32;
            tour.ratings_average = round_rating(total / reviews.len() as f64);
        }

        self.replace(&tour).await?;
        tracing::debug!(tour_id = %tour_id, quantity = tour.ratings_quantity, average = tour.ratings_average, "tour ratings updated");
        Ok(())
    }
}
