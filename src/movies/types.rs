use serde::{Deserialize, Serialize};

use super::messages::Message;
use super::pagination::PageInfo;
use crate::db::{Movie, WatchList};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieDto {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub genres: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    pub url: String,
}

impl From<&Movie> for MovieDto {
    fn from(movie: &Movie) -> Self {
        Self {
            id: movie.id,
            title: movie.title.clone(),
            year: movie.year,
            genres: movie.genres(),
            overview: movie.overview.clone(),
            director: movie.director.clone(),
            url: movie.absolute_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MovieListPage {
    pub movies: Vec<MovieDto>,
    pub page: PageInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchListDto {
    pub is_watched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<String>,
}

impl From<&WatchList> for WatchListDto {
    fn from(entry: &WatchList) -> Self {
        Self {
            is_watched: entry.is_watched,
            added: entry.timestamp.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MovieDetail {
    pub movie: MovieDto,
    /// The current user's rating, 0 when unrated.
    pub movie_rating: f64,
    pub watchlist: Option<WatchListDto>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchListItem {
    pub movie: MovieDto,
    #[serde(flatten)]
    pub entry: WatchListDto,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchListPage {
    pub entries: Vec<WatchListItem>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendedMovie {
    pub movie: MovieDto,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendPage {
    pub movies: Vec<RecommendedMovie>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
}

/// Form posted from the movie detail page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovieActionForm {
    #[serde(default)]
    pub rating_btn: Option<String>,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub watch: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    #[serde(alias = "pw")]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDto {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResult {
    pub user: UserDto,
    pub access_token: String,
}
