use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use tracing::{debug, info};

use super::auth::CurrentUser;
use super::messages::Message;
use super::pagination::Paginator;
use super::types::*;
use crate::db::{DbError, Movie, MovieRepo, RatingRepo, WatchListRepo};
use crate::error::{ApiError, ApiResult};
use crate::recommend::get_recommended_movies;
use crate::server::AppState;

pub const NO_RATINGS_MESSAGE: &str = "You haven't rated any movies";

async fn pending_messages(state: &AppState, user: Option<&CurrentUser>) -> Vec<Message> {
    match user {
        Some(user) => state.messages.take(&user.token).await,
        None => Vec::new(),
    }
}

/// Movie ids in paths are integers; anything else is simply not a movie.
async fn load_movie(state: &AppState, id: &str) -> ApiResult<Movie> {
    let id = id
        .parse::<i64>()
        .map_err(|_| ApiError::NotFound(format!("Movie not found: {}", id)))?;
    Ok(state.db.get_movie(id).await?)
}

pub async fn list_movies(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<MovieListPage>> {
    let query = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty());

    let count = state.db.count_movies(query).await?;
    let page = Paginator::new(count, state.config.movies.page_size)
        .page(params.page.as_deref())
        .map_err(|e| ApiError::NotFound(e.to_string()))?;

    let movies = state
        .db
        .list_movies(query, page.offset(), page.page_size)
        .await?;

    Ok(Json(MovieListPage {
        movies: movies.iter().map(MovieDto::from).collect(),
        page,
        query: query.map(str::to_string),
        messages: pending_messages(&state, user.as_ref()).await,
    }))
}

pub async fn movie_detail(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(movie_id): Path<String>,
) -> ApiResult<Json<MovieDetail>> {
    let movie = load_movie(&state, &movie_id).await?;

    let movie_rating = match state.db.get_rating(&user.id, movie.id).await {
        Ok(r) => r.rating,
        Err(DbError::NotFound(_)) => 0.0,
        Err(e) => return Err(e.into()),
    };

    let watchlist = match state.db.get_watchlist_entry(&user.id, movie.id).await {
        Ok(entry) => Some(WatchListDto::from(&entry)),
        Err(DbError::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };

    Ok(Json(MovieDetail {
        movie: MovieDto::from(&movie),
        movie_rating,
        watchlist,
        messages: pending_messages(&state, Some(&user)).await,
    }))
}

/// Validate a submitted rating: present, finite, within `[0, max]`.
pub fn parse_rating(value: Option<&str>, max: f64) -> Result<f64, ApiError> {
    let raw = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("rating is required".to_string()))?;

    let rating = raw
        .parse::<f64>()
        .ok()
        .filter(|r| r.is_finite())
        .ok_or_else(|| ApiError::InvalidInput(format!("rating is not a number: {}", raw)))?;

    if !(0.0..=max).contains(&rating) {
        return Err(ApiError::InvalidInput(format!(
            "rating must be between 0 and {}",
            max
        )));
    }
    Ok(rating)
}

pub async fn movie_action(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(movie_id): Path<String>,
    Form(form): Form<MovieActionForm>,
) -> ApiResult<Response> {
    let movie = load_movie(&state, &movie_id).await?;

    // Validate before touching anything so a bad rating changes no state.
    let rating = match form.rating_btn {
        Some(_) => Some(parse_rating(
            form.rating.as_deref(),
            state.config.movies.max_rating,
        )?),
        None => None,
    };

    if let Some(value) = rating {
        state.db.upsert_rating(&user.id, movie.id, value).await?;
        info!(user = %user.username, movie = movie.id, rating = value, "Rating submitted");
        state
            .messages
            .success(&user.token, "Rating has been submitted!")
            .await;
    }

    match form.watch.as_deref() {
        Some("add") => {
            state.db.add_to_watchlist(&user.id, movie.id).await?;
            info!(user = %user.username, movie = movie.id, "Added to watchlist");
            state
                .messages
                .success(&user.token, "Movie added to your list!")
                .await;
        }
        Some("remove") => {
            let removed = state.db.remove_from_watchlist(&user.id, movie.id).await?;
            info!(user = %user.username, movie = movie.id, removed, "Removed from watchlist");
            state
                .messages
                .success(&user.token, "Movie removed from your list!")
                .await;
        }
        Some(other) => debug!("Ignoring unknown watch action {:?}", other),
        None => {}
    }

    Ok(Redirect::to(&movie.absolute_url()).into_response())
}

pub async fn watchlist(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<WatchListPage>> {
    let entries = state
        .db
        .list_watchlist(&user.id)
        .await?
        .iter()
        .map(|(entry, movie)| WatchListItem {
            movie: MovieDto::from(movie),
            entry: WatchListDto::from(entry),
        })
        .collect();

    Ok(Json(WatchListPage {
        entries,
        messages: pending_messages(&state, Some(&user)).await,
    }))
}

pub async fn recommend(State(state): State<AppState>, user: CurrentUser) -> ApiResult<Response> {
    if !state.db.has_ratings(&user.id).await? {
        state.messages.error(&user.token, NO_RATINGS_MESSAGE).await;
        let page = RecommendPage {
            movies: Vec::new(),
            messages: pending_messages(&state, Some(&user)).await,
        };
        return Ok((StatusCode::FORBIDDEN, Json(page)).into_response());
    }

    let limit = state.config.movies.recommend_limit as usize;
    let movies = get_recommended_movies(&*state.db, &user.id, limit)
        .await?
        .into_iter()
        .map(|(movie, rec)| RecommendedMovie {
            movie: MovieDto::from(&movie),
            score: rec.score,
        })
        .collect();

    let page = RecommendPage {
        movies,
        messages: pending_messages(&state, Some(&user)).await,
    };
    Ok(Json(page).into_response())
}
