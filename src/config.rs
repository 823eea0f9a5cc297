use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub appdir: Option<String>,
    #[serde(default)]
    pub dbdir: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub movies: MoviesConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default)]
    pub tlscert: Option<String>,
    #[serde(default)]
    pub tlskey: Option<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: default_port(),
            tlscert: None,
            tlskey: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub sqlite: Option<SqliteConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SqliteConfig {
    pub filename: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MoviesConfig {
    /// Create an account on first login for unknown usernames.
    #[serde(default)]
    pub autoregister: bool,
    #[serde(alias = "pagesize", default = "default_page_size")]
    pub page_size: u32,
    #[serde(alias = "recommendlimit", default = "default_recommend_limit")]
    pub recommend_limit: u32,
    #[serde(alias = "maxrating", default = "default_max_rating")]
    pub max_rating: f64,
    /// bcrypt cost used when hashing new passwords.
    #[serde(alias = "passwordcost", default = "default_password_cost")]
    pub password_cost: u32,
}

impl Default for MoviesConfig {
    fn default() -> Self {
        Self {
            autoregister: false,
            page_size: default_page_size(),
            recommend_limit: default_recommend_limit(),
            max_rating: default_max_rating(),
            password_cost: default_password_cost(),
        }
    }
}

fn default_port() -> String {
    "8000".to_string()
}

fn default_page_size() -> u32 {
    20
}

fn default_recommend_limit() -> u32 {
    20
}

fn default_max_rating() -> f64 {
    5.0
}

fn default_password_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_string(), e))?;

        Self::parse(&content).map_err(|e| ConfigError::ParseError(path.to_string(), e))
    }

    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        let mut config: Config = serde_yaml::from_str(content)?;
        // A zero page size would make every listing empty.
        if config.movies.page_size == 0 {
            config.movies.page_size = default_page_size();
        }
        Ok(config)
    }

    pub fn get_database_path(&self) -> Option<String> {
        if let Some(ref sqlite) = self.database.sqlite {
            return Some(sqlite.filename.clone());
        }

        if let Some(ref dbdir) = self.dbdir {
            let path = PathBuf::from(dbdir).join("movieshelf.db");
            return Some(path.to_string_lossy().to_string());
        }

        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(String, std::io::Error),
    #[error("Failed to parse config file {0}: {1}")]
    ParseError(String, serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let config = Config::parse("dbdir: /var/lib/movieshelf\n").unwrap();
        assert_eq!(config.listen.port, "8000");
        assert_eq!(config.movies.page_size, 20);
        assert_eq!(config.movies.max_rating, 5.0);
        assert!(!config.movies.autoregister);
        assert_eq!(
            config.get_database_path().as_deref(),
            Some("/var/lib/movieshelf/movieshelf.db")
        );
    }

    #[test]
    fn test_parse_full() {
        let yaml = r#"
listen:
  address: 127.0.0.1
  port: "9000"
database:
  sqlite:
    filename: /tmp/movies.db
dbdir: /ignored
movies:
  autoregister: true
  pagesize: 10
  max_rating: 10
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.listen.address.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.listen.port, "9000");
        assert!(config.movies.autoregister);
        assert_eq!(config.movies.page_size, 10);
        assert_eq!(config.movies.max_rating, 10.0);
        assert_eq!(config.get_database_path().as_deref(), Some("/tmp/movies.db"));
    }

    #[test]
    fn test_zero_page_size_falls_back() {
        let config = Config::parse("movies:\n  page_size: 0\n").unwrap();
        assert_eq!(config.movies.page_size, 20);
    }

    #[test]
    fn test_no_database() {
        let config = Config::parse("{}").unwrap();
        assert!(config.get_database_path().is_none());
    }
}
