//! Movie recommendations derived from rating history.
//!
//! Ranking is user-based collaborative filtering: users whose mean-centred
//! ratings point the same way as the target user's act as neighbours, and
//! their ratings of movies the target has not seen are averaged, weighted by
//! similarity. Whatever slots remain are filled from the most popular unseen
//! movies so that a user with idiosyncratic taste still gets a full list.
//! Movies nobody has rated yet sit in that fallback at the global mean.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::db::{DbResult, Movie, MovieRepo, Rating, RatingRepo};

/// Prior weight for the popularity fallback's damped mean.
const POPULARITY_DAMPING: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct RecommendConfig {
    /// How many of the most similar users contribute to a prediction.
    pub neighbors: usize,
    /// Co-rated movies required before two users are compared.
    pub min_overlap: usize,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            neighbors: 20,
            min_overlap: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Neighbors,
    Popularity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub movie_id: i64,
    pub score: f64,
    /// Number of ratings the score was computed from.
    pub support: usize,
    pub source: Source,
}

type Profile = HashMap<i64, f64>;

fn build_profiles(ratings: &[Rating]) -> HashMap<&str, Profile> {
    let mut profiles: HashMap<&str, Profile> = HashMap::new();
    for r in ratings {
        profiles
            .entry(r.userid.as_str())
            .or_default()
            .insert(r.movieid, r.rating);
    }
    profiles
}

fn mean(profile: &Profile) -> f64 {
    if profile.is_empty() {
        return 0.0;
    }
    profile.values().sum::<f64>() / profile.len() as f64
}

/// Cosine similarity of mean-centred ratings over co-rated movies.
fn similarity(a: &Profile, b: &Profile, min_overlap: usize) -> Option<f64> {
    let (mean_a, mean_b) = (mean(a), mean(b));
    let mut overlap = 0;
    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);

    for (movie, ra) in a {
        if let Some(rb) = b.get(movie) {
            let (da, db) = (ra - mean_a, rb - mean_b);
            dot += da * db;
            norm_a += da * da;
            norm_b += db * db;
            overlap += 1;
        }
    }

    if overlap < min_overlap.max(1) {
        return None;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        // Flat raters agree with each other on everything they share.
        return (norm_a == 0.0 && norm_b == 0.0).then_some(1.0);
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

fn by_score(a: &Recommendation, b: &Recommendation) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.support.cmp(&a.support))
        .then_with(|| a.movie_id.cmp(&b.movie_id))
}

/// Rank movies for `user_id` from the full set of ratings.
/// `catalogue` lists every movie id that may be recommended; ids in it that
/// nobody rated only surface through the popularity fallback.
/// Movies the user already rated never appear. Returns at most `limit` entries.
pub fn rank_movies(
    user_id: &str,
    ratings: &[Rating],
    catalogue: &[i64],
    limit: usize,
    config: &RecommendConfig,
) -> Vec<Recommendation> {
    let profiles = build_profiles(ratings);
    let target = match profiles.get(user_id) {
        Some(p) if !p.is_empty() => p,
        _ => return Vec::new(),
    };

    let mut neighbors: Vec<(&str, f64)> = profiles
        .iter()
        .filter(|(uid, _)| **uid != user_id)
        .filter_map(|(uid, profile)| {
            similarity(target, profile, config.min_overlap)
                .filter(|sim| *sim > 0.0)
                .map(|sim| (*uid, sim))
        })
        .collect();
    neighbors.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    neighbors.truncate(config.neighbors);

    // movie -> (weighted sum, similarity sum, support)
    let mut accum: HashMap<i64, (f64, f64, usize)> = HashMap::new();
    for (uid, sim) in &neighbors {
        for (movie, rating) in &profiles[uid] {
            if target.contains_key(movie) {
                continue;
            }
            let entry = accum.entry(*movie).or_insert((0.0, 0.0, 0));
            entry.0 += sim * rating;
            entry.1 += sim;
            entry.2 += 1;
        }
    }

    let mut ranked: Vec<Recommendation> = accum
        .into_iter()
        .map(|(movie_id, (weighted, sims, support))| Recommendation {
            movie_id,
            score: weighted / sims,
            support,
            source: Source::Neighbors,
        })
        .collect();
    ranked.sort_by(by_score);
    ranked.truncate(limit);

    debug!(
        user = user_id,
        neighbors = neighbors.len(),
        predicted = ranked.len(),
        "Collaborative ranking done"
    );

    if ranked.len() < limit {
        let seen: HashSet<i64> = ranked.iter().map(|r| r.movie_id).collect();
        let mut popular = popularity(ratings, catalogue, |movie| {
            !target.contains_key(&movie) && !seen.contains(&movie)
        });
        popular.truncate(limit - ranked.len());
        ranked.extend(popular);
    }

    ranked
}

/// Movies ranked by damped mean rating, restricted to those `keep` accepts.
/// Unrated catalogue entries score the global mean with zero support.
fn popularity(
    ratings: &[Rating],
    catalogue: &[i64],
    keep: impl Fn(i64) -> bool,
) -> Vec<Recommendation> {
    if ratings.is_empty() {
        return Vec::new();
    }
    let global_mean = ratings.iter().map(|r| r.rating).sum::<f64>() / ratings.len() as f64;

    let mut totals: HashMap<i64, (f64, usize)> = HashMap::new();
    for r in ratings.iter().filter(|r| keep(r.movieid)) {
        let entry = totals.entry(r.movieid).or_insert((0.0, 0));
        entry.0 += r.rating;
        entry.1 += 1;
    }

    let mut ranked: Vec<Recommendation> = totals
        .into_iter()
        .map(|(movie_id, (sum, n))| Recommendation {
            movie_id,
            score: (POPULARITY_DAMPING * global_mean + sum) / (POPULARITY_DAMPING + n as f64),
            support: n,
            source: Source::Popularity,
        })
        .collect();

    let rated: HashSet<i64> = ratings.iter().map(|r| r.movieid).collect();
    let mut unrated: HashSet<i64> = HashSet::new();
    for &movie_id in catalogue {
        if rated.contains(&movie_id) || !keep(movie_id) || !unrated.insert(movie_id) {
            continue;
        }
        ranked.push(Recommendation {
            movie_id,
            score: global_mean,
            support: 0,
            source: Source::Popularity,
        });
    }

    ranked.sort_by(by_score);
    ranked
}

/// Ranked recommendations for a user, resolved to movies.
pub async fn get_recommended_movies<R>(
    db: &R,
    user_id: &str,
    limit: usize,
) -> DbResult<Vec<(Movie, Recommendation)>>
where
    R: MovieRepo + RatingRepo + ?Sized,
{
    let ratings = db.list_all_ratings().await?;
    let catalogue = db.list_movie_ids().await?;
    let ranked = rank_movies(user_id, &ratings, &catalogue, limit, &RecommendConfig::default());

    let ids: Vec<i64> = ranked.iter().map(|r| r.movie_id).collect();
    let mut movies: HashMap<i64, Movie> = db
        .get_movies(&ids)
        .await?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

    Ok(ranked
        .into_iter()
        .filter_map(|r| movies.remove(&r.movie_id).map(|m| (m, r)))
        .collect())
}
