use async_trait::async_trait;

use super::model::*;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn get_user(&self, username: &str) -> DbResult<User>;
    async fn get_user_by_id(&self, id: &str) -> DbResult<User>;
    async fn create_user(&self, user: &User) -> DbResult<()>;
    async fn upsert_user(&self, user: &User) -> DbResult<()>;
}

#[async_trait]
pub trait AccessTokenRepo: Send + Sync {
    async fn get_token(&self, token: &str) -> DbResult<AccessToken>;
    async fn upsert_token(&self, token: &AccessToken) -> DbResult<()>;
    async fn delete_token(&self, token: &str) -> DbResult<()>;
}

#[async_trait]
pub trait MovieRepo: Send + Sync {
    async fn get_movie(&self, id: i64) -> DbResult<Movie>;
    async fn get_movies(&self, ids: &[i64]) -> DbResult<Vec<Movie>>;
    /// Movies ordered by sort title. `query` filters on a case-insensitive
    /// title substring.
    async fn list_movies(&self, query: Option<&str>, offset: i64, limit: i64) -> DbResult<Vec<Movie>>;
    async fn count_movies(&self, query: Option<&str>) -> DbResult<i64>;
    async fn list_movie_ids(&self) -> DbResult<Vec<i64>>;
    async fn upsert_movie(&self, movie: &Movie) -> DbResult<()>;
    async fn delete_movie(&self, id: i64) -> DbResult<()>;
}

#[async_trait]
pub trait RatingRepo: Send + Sync {
    async fn get_rating(&self, user_id: &str, movie_id: i64) -> DbResult<Rating>;
    /// Creates the (user, movie) rating or replaces its value.
    async fn upsert_rating(&self, user_id: &str, movie_id: i64, value: f64) -> DbResult<Rating>;
    async fn has_ratings(&self, user_id: &str) -> DbResult<bool>;
    async fn list_ratings_by_user(&self, user_id: &str) -> DbResult<Vec<Rating>>;
    async fn list_all_ratings(&self) -> DbResult<Vec<Rating>>;
}

#[async_trait]
pub trait WatchListRepo: Send + Sync {
    async fn get_watchlist_entry(&self, user_id: &str, movie_id: i64) -> DbResult<WatchList>;
    /// Get-or-create the entry and mark it watched.
    async fn add_to_watchlist(&self, user_id: &str, movie_id: i64) -> DbResult<WatchList>;
    /// Returns whether an entry was deleted.
    async fn remove_from_watchlist(&self, user_id: &str, movie_id: i64) -> DbResult<bool>;
    async fn list_watchlist(&self, user_id: &str) -> DbResult<Vec<(WatchList, Movie)>>;
}
