// Profile ratings and their summary.

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::error::{AppError, AppResult, ValidationErrors};
use crate::model::{Rating, RatingSummary, User};
use crate::Marketplace;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RatingInput {
    pub rated_user_id: Option<i64>,
    pub rating: Option<i64>,
    pub content: String,
}

/// Mean rounded to two decimals, `None` without ratings.
pub fn average(count: u64, sum: u64) -> Option<f64> {
    if count == 0 {
        return None;
    }
    let mean = sum as f64 / count as f64;
    Some((mean * 100.0).round() / 100.0)
}

/// Viewer's own rating first, everything else keeps its order.
pub fn viewer_first(mut ratings: Vec<Rating>, viewer_id: i64) -> Vec<Rating> {
    ratings.sort_by_key(|r| r.user_id != viewer_id);
    ratings
}

fn validate(input: &RatingInput) -> AppResult<u8> {
    let mut errors = ValidationErrors::new();
    let stars = match input.rating {
        None => {
            errors.add("rating", "The rating field is required.");
            0
        }
        Some(r @ 1..=5) => r as u8,
        Some(_) => {
            errors.add("rating", "The rating must be between 1 and 5.");
            0
        }
    };
    if input.content.trim().is_empty() {
        errors.add("content", "The content field is required.");
    }
    errors.into_result()?;
    Ok(stars)
}

impl Marketplace {
    pub fn ratings_for(&self, rated_user_id: i64, viewer: &User) -> AppResult<Vec<Rating>> {
        let ratings = self.db.ratings_for_user(rated_user_id)?;
        Ok(viewer_first(ratings, viewer.id))
    }

    pub fn post_rating(&self, author: &User, input: &RatingInput) -> AppResult<Rating> {
        let rated_user_id = input
            .rated_user_id
            .ok_or_else(|| AppError::invalid("rated_user_id", "The rated user id field is required."))?;
        if self.db.get_user(rated_user_id)?.is_none() {
            return Err(AppError::invalid(
                "rated_user_id",
                "The selected rated user id is invalid.",
            ));
        }
        if rated_user_id == author.id {
            return Err(AppError::invalid("rated_user_id", "You cannot rate yourself."));
        }
        let stars = validate(input)?;

        let id = self.db.insert_rating(
            author.id,
            rated_user_id,
            stars,
            input.content.trim(),
            Utc::now(),
        )?;
        info!(rating_id = id, author = author.id, rated_user_id, "rating posted");
        self.db
            .get_rating(id)?
            .ok_or_else(|| AppError::not_found("Rating"))
    }

    pub fn edit_rating(&self, author: &User, id: i64, input: &RatingInput) -> AppResult<Rating> {
        let existing = self
            .db
            .get_rating(id)?
            .ok_or_else(|| AppError::not_found("Rating"))?;
        if existing.user_id != author.id {
            return Err(AppError::Forbidden("You can only edit your own ratings.".into()));
        }
        let stars = validate(input)?;
        self.db
            .update_rating(id, stars, input.content.trim(), Utc::now())?;
        self.db
            .get_rating(id)?
            .ok_or_else(|| AppError::not_found("Rating"))
    }

    pub fn rating_summary(&self, rated_user_id: i64) -> AppResult<RatingSummary> {
        let (count, sum) = self.db.rating_totals(rated_user_id)?;
        Ok(RatingSummary {
            rated_user_id,
            count,
            average: average(count, sum),
        })
    }
}
