use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use super::model::*;
use super::repo::*;
use crate::movies::make_sort_title;

type RatingRow = (String, i64, f64, Option<String>);
type WatchListRow = (String, i64, bool, Option<String>);

const MOVIE_COLUMNS: &str = "id, title, sort_title, year, genre, overview, director";

pub struct SqliteRepository {
    pool: SqlitePool,
    token_cache: Arc<RwLock<HashMap<String, AccessToken>>>,
}

impl SqliteRepository {
    pub async fn new(db_path: &str) -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str(db_path)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to an in-memory database sees its own empty
        // database, so keep exactly one alive for the lifetime of the pool.
        let pool = if db_path.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let repo = Self {
            pool,
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        };

        repo.init_schema().await?;

        info!("Database initialized at {}", db_path);

        Ok(repo)
    }

    async fn init_schema(&self) -> DbResult<()> {
        let schema = include_str!("schema.sql");
        sqlx::raw_sql(schema).execute(&self.pool).await?;
        Ok(())
    }

    pub fn start_background_tasks(self: Arc<Self>) {
        let repo_clone = Arc::clone(&self);
        tokio::spawn(async move {
            repo_clone.token_flush_loop().await;
        });
    }

    async fn token_flush_loop(&self) {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
        loop {
            interval.tick().await;
            if let Err(e) = self.flush_token_cache().await {
                error!("Failed to flush token cache: {}", e);
            }
        }
    }

    /// Write all cached access tokens to the database.
    pub async fn flush_token_cache(&self) -> DbResult<()> {
        let cache = self.token_cache.read().await;
        for token in cache.values() {
            sqlx::query(
                "INSERT OR REPLACE INTO accesstokens (token, userid, created, lastused)
                VALUES (?, ?, ?, ?)",
            )
            .bind(&token.token)
            .bind(&token.userid)
            .bind(token.created.as_ref().map(|dt| dt.to_rfc3339()))
            .bind(token.lastused.as_ref().map(|dt| dt.to_rfc3339()))
            .execute(&self.pool)
            .await?;
        }
        debug!("Flushed {} access tokens", cache.len());
        Ok(())
    }
}

fn not_found(what: String) -> impl FnOnce(sqlx::Error) -> DbError {
    move |e| match e {
        sqlx::Error::RowNotFound => DbError::NotFound(what),
        _ => DbError::Sqlx(e),
    }
}

fn rating_from_row(r: RatingRow) -> Rating {
    Rating {
        userid: r.0,
        movieid: r.1,
        rating: r.2,
        timestamp: parse_timestamp(r.3),
    }
}

fn watchlist_from_row(r: WatchListRow) -> WatchList {
    WatchList {
        userid: r.0,
        movieid: r.1,
        is_watched: r.2,
        timestamp: parse_timestamp(r.3),
    }
}

/// Build a LIKE pattern matching `query` anywhere, with wildcards escaped.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl UserRepo for SqliteRepository {
    async fn get_user(&self, username: &str) -> DbResult<User> {
        sqlx::query_as::<_, User>("SELECT id, username, password, created, lastlogin, lastused FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found(format!("User not found: {}", username)))
    }

    async fn get_user_by_id(&self, id: &str) -> DbResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, password, created, lastlogin, lastused FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("User not found: {}", id)))
    }

    async fn create_user(&self, user: &User) -> DbResult<()> {
        sqlx::query("INSERT INTO users (id, username, password, created, lastlogin, lastused) VALUES (?, ?, ?, ?, ?, ?)")
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.password)
            .bind(&user.created)
            .bind(&user.lastlogin)
            .bind(&user.lastused)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref dbe) if dbe.is_unique_violation() => {
                    DbError::AlreadyExists(format!("User already exists: {}", user.username))
                }
                _ => DbError::Sqlx(e),
            })?;
        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> DbResult<()> {
        // Not INSERT OR REPLACE: the implicit delete would cascade to ratings.
        sqlx::query(
            "INSERT INTO users (id, username, password, created, lastlogin, lastused)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                username = excluded.username,
                password = excluded.password,
                created = excluded.created,
                lastlogin = excluded.lastlogin,
                lastused = excluded.lastused",
        )
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.password)
            .bind(&user.created)
            .bind(&user.lastlogin)
            .bind(&user.lastused)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AccessTokenRepo for SqliteRepository {
    async fn get_token(&self, token: &str) -> DbResult<AccessToken> {
        // The write guard is held across the database read so a concurrent
        // delete_token cannot be undone by re-caching a stale row.
        let mut cache = self.token_cache.write().await;
        if let Some(t) = cache.get_mut(token) {
            t.lastused = Some(Utc::now());
            return Ok(t.clone());
        }

        let result = sqlx::query_as::<_, (String, String, Option<String>)>(
            "SELECT token, userid, created FROM accesstokens WHERE token = ?",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("Token not found: {}", token)))?;

        let access_token = AccessToken {
            token: result.0,
            userid: result.1,
            created: parse_timestamp(result.2),
            lastused: Some(Utc::now()),
        };
        cache.insert(token.to_string(), access_token.clone());

        Ok(access_token)
    }

    async fn upsert_token(&self, token: &AccessToken) -> DbResult<()> {
        let mut cache = self.token_cache.write().await;
        cache.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn delete_token(&self, token: &str) -> DbResult<()> {
        let mut cache = self.token_cache.write().await;
        cache.remove(token);

        sqlx::query("DELETE FROM accesstokens WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MovieRepo for SqliteRepository {
    async fn get_movie(&self, id: i64) -> DbResult<Movie> {
        sqlx::query_as::<_, Movie>(&format!("SELECT {} FROM movies WHERE id = ?", MOVIE_COLUMNS))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found(format!("Movie not found: {}", id)))
    }

    async fn get_movies(&self, ids: &[i64]) -> DbResult<Vec<Movie>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM movies WHERE id IN (", MOVIE_COLUMNS));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let movies = builder
            .build_query_as::<Movie>()
            .fetch_all(&self.pool)
            .await?;
        Ok(movies)
    }

    async fn list_movies(&self, query: Option<&str>, offset: i64, limit: i64) -> DbResult<Vec<Movie>> {
        let movies = match query {
            Some(q) => {
                sqlx::query_as::<_, Movie>(&format!(
                    "SELECT DISTINCT {} FROM movies WHERE title LIKE ? ESCAPE '\\'
                     ORDER BY sort_title, id LIMIT ? OFFSET ?",
                    MOVIE_COLUMNS
                ))
                .bind(like_pattern(q))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Movie>(&format!(
                    "SELECT {} FROM movies ORDER BY sort_title, id LIMIT ? OFFSET ?",
                    MOVIE_COLUMNS
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(movies)
    }

    async fn count_movies(&self, query: Option<&str>) -> DbResult<i64> {
        let count = match query {
            Some(q) => {
                sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM movies WHERE title LIKE ? ESCAPE '\\'")
                    .bind(like_pattern(q))
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM movies")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count.0)
    }

    async fn list_movie_ids(&self) -> DbResult<Vec<i64>> {
        let results = sqlx::query_as::<_, (i64,)>("SELECT id FROM movies ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(results.into_iter().map(|r| r.0).collect())
    }

    async fn upsert_movie(&self, movie: &Movie) -> DbResult<()> {
        // sort_title is always derived from the title.
        sqlx::query(
            "INSERT INTO movies (id, title, sort_title, year, genre, overview, director)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                sort_title = excluded.sort_title,
                year = excluded.year,
                genre = excluded.genre,
                overview = excluded.overview,
                director = excluded.director",
        )
        .bind(movie.id)
        .bind(&movie.title)
        .bind(make_sort_title(&movie.title))
        .bind(movie.year)
        .bind(&movie.genre)
        .bind(&movie.overview)
        .bind(&movie.director)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_movie(&self, id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM movies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RatingRepo for SqliteRepository {
    async fn get_rating(&self, user_id: &str, movie_id: i64) -> DbResult<Rating> {
        let result = sqlx::query_as::<_, RatingRow>(
            "SELECT userid, movieid, rating, timestamp FROM ratings WHERE userid = ? AND movieid = ?",
        )
        .bind(user_id)
        .bind(movie_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("Rating not found: {}/{}", user_id, movie_id)))?;

        Ok(rating_from_row(result))
    }

    async fn upsert_rating(&self, user_id: &str, movie_id: i64, value: f64) -> DbResult<Rating> {
        let result = sqlx::query_as::<_, RatingRow>(
            "INSERT INTO ratings (userid, movieid, rating, timestamp) VALUES (?, ?, ?, ?)
            ON CONFLICT (userid, movieid) DO UPDATE SET
                rating = excluded.rating,
                timestamp = excluded.timestamp
            RETURNING userid, movieid, rating, timestamp",
        )
        .bind(user_id)
        .bind(movie_id)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        Ok(rating_from_row(result))
    }

    async fn has_ratings(&self, user_id: &str) -> DbResult<bool> {
        let result = sqlx::query_as::<_, (bool,)>(
            "SELECT EXISTS (SELECT 1 FROM ratings WHERE userid = ?)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(result.0)
    }

    async fn list_ratings_by_user(&self, user_id: &str) -> DbResult<Vec<Rating>> {
        let results = sqlx::query_as::<_, RatingRow>(
            "SELECT userid, movieid, rating, timestamp FROM ratings WHERE userid = ? ORDER BY movieid",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results.into_iter().map(rating_from_row).collect())
    }

    async fn list_all_ratings(&self) -> DbResult<Vec<Rating>> {
        let results = sqlx::query_as::<_, RatingRow>(
            "SELECT userid, movieid, rating, timestamp FROM ratings",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(results.into_iter().map(rating_from_row).collect())
    }
}

#[async_trait]
impl WatchListRepo for SqliteRepository {
    async fn get_watchlist_entry(&self, user_id: &str, movie_id: i64) -> DbResult<WatchList> {
        let result = sqlx::query_as::<_, WatchListRow>(
            "SELECT userid, movieid, is_watched, timestamp FROM watchlist WHERE userid = ? AND movieid = ?",
        )
        .bind(user_id)
        .bind(movie_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("Watchlist entry not found: {}/{}", user_id, movie_id)))?;

        Ok(watchlist_from_row(result))
    }

    async fn add_to_watchlist(&self, user_id: &str, movie_id: i64) -> DbResult<WatchList> {
        let result = sqlx::query_as::<_, WatchListRow>(
            "INSERT INTO watchlist (userid, movieid, is_watched, timestamp) VALUES (?, ?, 1, ?)
            ON CONFLICT (userid, movieid) DO UPDATE SET is_watched = 1
            RETURNING userid, movieid, is_watched, timestamp",
        )
        .bind(user_id)
        .bind(movie_id)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        Ok(watchlist_from_row(result))
    }

    async fn remove_from_watchlist(&self, user_id: &str, movie_id: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM watchlist WHERE userid = ? AND movieid = ?")
            .bind(user_id)
            .bind(movie_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_watchlist(&self, user_id: &str) -> DbResult<Vec<(WatchList, Movie)>> {
        let results = sqlx::query_as::<
            _,
            (
                String,
                i64,
                bool,
                Option<String>,
                i64,
                String,
                String,
                Option<i32>,
                String,
                Option<String>,
                Option<String>,
            ),
        >(
            "SELECT w.userid, w.movieid, w.is_watched, w.timestamp,
                    m.id, m.title, m.sort_title, m.year, m.genre, m.overview, m.director
             FROM watchlist w
             JOIN movies m ON m.id = w.movieid
             WHERE w.userid = ?
             ORDER BY w.timestamp DESC, w.movieid",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let entries = results
            .into_iter()
            .map(|r| {
                let entry = watchlist_from_row((r.0, r.1, r.2, r.3));
                let movie = Movie {
                    id: r.4,
                    title: r.5,
                    sort_title: r.6,
                    year: r.7,
                    genre: r.8,
                    overview: r.9,
                    director: r.10,
                };
                (entry, movie)
            })
            .collect();

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_repo() -> SqliteRepository {
        let repo = SqliteRepository::new("sqlite::memory:").await.unwrap();
        for (id, title) in [(1, "The Matrix"), (2, "Alien"), (3, "100% Love"), (4, "Matrix Reloaded")] {
            repo.upsert_movie(&movie(id, title)).await.unwrap();
        }
        for name in ["alice", "bob"] {
            repo.create_user(&User {
                id: name.to_string(),
                username: name.to_string(),
                password: String::new(),
                created: None,
                lastlogin: None,
                lastused: None,
            })
            .await
            .unwrap();
        }
        repo
    }

    fn movie(id: i64, title: &str) -> Movie {
        Movie {
            id,
            title: title.to_string(),
            sort_title: String::new(),
            year: None,
            genre: String::new(),
            overview: None,
            director: None,
        }
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern("matrix"), "%matrix%");
        assert_eq!(like_pattern("100%"), "%100\\%%");
        assert_eq!(like_pattern("a_b"), "%a\\_b%");
    }

    #[tokio::test]
    async fn test_list_movies_sorted_and_filtered() {
        let repo = test_repo().await;

        let all = repo.list_movies(None, 0, 10).await.unwrap();
        let titles: Vec<&str> = all.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["100% Love", "Alien", "The Matrix", "Matrix Reloaded"]);

        let found = repo.list_movies(Some("MATRIX"), 0, 10).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(repo.count_movies(Some("matrix")).await.unwrap(), 2);

        // '%' in the query is matched literally.
        assert_eq!(repo.count_movies(Some("0%")).await.unwrap(), 1);
        assert_eq!(repo.count_movies(None).await.unwrap(), 4);

        let page = repo.list_movies(None, 1, 2).await.unwrap();
        assert_eq!(page[0].title, "Alien");
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_get_missing_movie() {
        let repo = test_repo().await;
        assert!(matches!(repo.get_movie(99).await, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_upsert_rating_is_unique() {
        let repo = test_repo().await;

        assert!(!repo.has_ratings("alice").await.unwrap());
        repo.upsert_rating("alice", 1, 4.0).await.unwrap();
        let updated = repo.upsert_rating("alice", 1, 2.5).await.unwrap();
        assert_eq!(updated.rating, 2.5);

        let ratings = repo.list_ratings_by_user("alice").await.unwrap();
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].rating, 2.5);
        assert!(repo.has_ratings("alice").await.unwrap());
        assert!(!repo.has_ratings("bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_watchlist_add_remove() {
        let repo = test_repo().await;

        let first = repo.add_to_watchlist("alice", 2).await.unwrap();
        let second = repo.add_to_watchlist("alice", 2).await.unwrap();
        assert!(second.is_watched);
        assert_eq!(first.timestamp, second.timestamp);

        let list = repo.list_watchlist("alice").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].1.title, "Alien");
        assert!(repo.list_watchlist("bob").await.unwrap().is_empty());

        assert!(repo.remove_from_watchlist("alice", 2).await.unwrap());
        assert!(!repo.remove_from_watchlist("alice", 2).await.unwrap());
        assert!(matches!(
            repo.get_watchlist_entry("alice", 2).await,
            Err(DbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_movie_cascades() {
        let repo = test_repo().await;
        repo.upsert_rating("alice", 3, 5.0).await.unwrap();
        repo.add_to_watchlist("alice", 3).await.unwrap();

        repo.delete_movie(3).await.unwrap();
        assert!(!repo.has_ratings("alice").await.unwrap());
        assert!(repo.list_watchlist("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_movies_by_ids() {
        let repo = test_repo().await;
        let mut movies = repo.get_movies(&[4, 2, 42]).await.unwrap();
        movies.sort_by_key(|m| m.id);
        assert_eq!(movies.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 4]);
        assert!(repo.get_movies(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_duplicate_user() {
        let repo = test_repo().await;
        let user = repo.get_user("alice").await.unwrap();
        assert!(matches!(repo.create_user(&user).await, Err(DbError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_token_survives_flush() {
        let repo = test_repo().await;
        let token = AccessToken {
            token: "tok".to_string(),
            userid: "alice".to_string(),
            created: Some(Utc::now()),
            lastused: None,
        };
        repo.upsert_token(&token).await.unwrap();
        repo.flush_token_cache().await.unwrap();
        repo.token_cache.write().await.clear();

        let loaded = repo.get_token("tok").await.unwrap();
        assert_eq!(loaded.userid, "alice");
        assert!(loaded.lastused.is_some());

        repo.delete_token("tok").await.unwrap();
        assert!(repo.get_token("tok").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lookup_racing_delete_cannot_restore_token() {
        let repo = Arc::new(test_repo().await);

        for round in 0..200 {
            let name = format!("tok-{}", round);
            repo.upsert_token(&AccessToken {
                token: name.clone(),
                userid: "alice".to_string(),
                created: Some(Utc::now()),
                lastused: None,
            })
            .await
            .unwrap();
            repo.flush_token_cache().await.unwrap();
            repo.token_cache.write().await.clear();

            let deleter = {
                let repo = Arc::clone(&repo);
                let name = name.clone();
                tokio::spawn(async move { repo.delete_token(&name).await })
            };
            let reader = {
                let repo = Arc::clone(&repo);
                let name = name.clone();
                tokio::spawn(async move { repo.get_token(&name).await })
            };
            deleter.await.unwrap().unwrap();
            let _ = reader.await.unwrap();

            assert!(repo.get_token(&name).await.is_err(), "round {}", round);
            repo.flush_token_cache().await.unwrap();
            repo.token_cache.write().await.clear();
            assert!(repo.get_token(&name).await.is_err(), "round {} after flush", round);
        }
    }

    #[tokio::test]
    async fn test_list_movie_ids() {
        let repo = test_repo().await;
        assert_eq!(repo.list_movie_ids().await.unwrap(), vec![1, 2, 3, 4]);
    }
}
