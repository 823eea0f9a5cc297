pub mod auth;
pub mod handlers;
pub mod messages;
pub mod pagination;
pub mod sort_title;
pub mod types;

pub use auth::*;
pub use handlers::*;
pub use messages::{Level, Message, MessageStore};
pub use pagination::{PageInfo, Paginator};
pub use sort_title::make_sort_title;
pub use types::*;
