pub mod config;
pub mod db;
pub mod dtos;
pub mod error;
pub mod handler;
pub mod http;
pub mod images;
pub mod mail;
pub mod middleware;
pub mod models;
pub mod query_features;
pub mod rate_limit;
pub mod routes;
pub mod shutdown;
pub mod templates;
pub mod tracing_config;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use axum_client_ip::ClientIpSource;

use config::Config;
use db::DBClient;
use http::HttpClient;
use images::ImageStore;
use mail::{MailError, Mailer};
use rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub env: Arc<Config>,
    pub db_client: DBClient,
    pub mailer: Mailer,
    pub http_client: HttpClient,
    pub images: ImageStore,
    pub rate_limiter: Arc<RateLimiter>,
    pub ip_extraction: ClientIpSource,
}

impl AppState {
    pub fn new(config: Config, db_client: DBClient) -> Result<Self, MailError> {
        let mailer = Mailer::from_config(&config)?;
        let http_client = HttpClient::new(
            reqwest::Client::new(),
            config.stripe_api_base.clone(),
            config.stripe_secret_key.clone(),
        );
        let window = Duration::from_secs(config.rate_limit_window.max(1) as u64);
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_max, window));

        let images = ImageStore::new(config.upload_dir.clone());

        Ok(AppState {
            ip_extraction: config.ip_source.clone(),
            env: Arc::new(config),
            db_client,
            mailer,
            http_client,
            images,
            rate_limiter,
        })
    }
}
