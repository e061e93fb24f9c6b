use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Startup and serving failures. Any of these ends the process with exit
/// code 1.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", .0)]
    Config(String),

    #[error("logging: {}", .0)]
    Logging(String),

    #[error("IO::{:?}: {}", .0, .0)]
    Io(#[from] std::io::Error),

    #[error("url: {}", .0)]
    Url(#[from] url::ParseError),

    #[error("store: {}", .0)]
    Store(#[from] gram_core::store::StoreError),

    #[error("migrations: {}", .0)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("cache: {}", .0)]
    Cache(#[from] gram_core::cache::CacheError),

    #[error("token codec: {}", .0)]
    Token(#[from] gram_core::auth::jwt::TokenError),

    #[error("local env: {}", .0)]
    LocalEnv(#[from] gram_core::auth::local::LocalEnvError),
}
