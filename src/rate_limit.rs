//! Fixed-window request limiting per client IP.
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_client_ip::ClientIp;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::{
    AppState,
    error::{ErrorMessage, HttpError},
};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited,
}

#[derive(Debug)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    windows: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        RateLimiter {
            max,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, Window>> {
        // Counters stay usable after a panic elsewhere.
        self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn check(&self, ip: IpAddr) -> Decision {
        self.check_at(ip, Instant::now())
    }

    /// Count one request from `ip` at `now`.
    pub fn check_at(&self, ip: IpAddr, now: Instant) -> Decision {
        let mut windows = self.lock();
        let window = windows.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        if window.count >= self.max {
            return Decision::Limited;
        }
        window.count += 1;
        Decision::Allowed {
            remaining: self.max - window.count,
        }
    }

    /// Drop expired windows. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, window| now.duration_since(window.started) < self.window);
        before - windows.len()
    }

    pub fn tracked(&self) -> usize {
        self.lock().len()
    }
}

/// Middleware for `/api`. Answers 429 once the caller's window is used up.
pub async fn rate_limit(
    ClientIp(ip): ClientIp,
    State(app_state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let limiter = &app_state.rate_limiter;

    match limiter.check(ip) {
        Decision::Limited => {
            tracing::warn!(ip = %ip, "rate limit exceeded");
            Err(HttpError::too_many_requests(ErrorMessage::TooManyRequests))
        }
        Decision::Allowed { remaining } => {
            let mut response = next.run(req).await.into_response();
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.max()));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            Ok(response)
        }
    }
}

/// Schedule the sweep of expired windows, once a minute.
pub async fn start_sweeper(limiter: Arc<RateLimiter>) -> Result<JobScheduler, JobSchedulerError> {
    let sched = JobScheduler::new().await?;

    let job = Job::new_async("0 * * * * *", move |uuid, _l| {
        let limiter = limiter.clone();
        Box::pin(async move {
            let removed = limiter.sweep();
            tracing::debug!(job = %uuid, removed, tracked = limiter.tracked(), "rate limit sweep finished");
        })
    })?;

    sched.add(job).await?;
    // It doesn't block.
    sched.start().await?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn requests_beyond_the_max_are_limited() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(limiter.check_at(IP, now), Decision::Allowed { remaining: 1 });
        assert_eq!(limiter.check_at(IP, now), Decision::Allowed { remaining: 0 });
        assert_eq!(limiter.check_at(IP, now), Decision::Limited);
        assert_eq!(limiter.check_at(OTHER, now), Decision::Allowed { remaining: 1 });
    }

    #[test]
    fn a_new_window_resets_the_count() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(matches!(limiter.check_at(IP, now), Decision::Allowed { .. }));
        assert_eq!(limiter.check_at(IP, now + Duration::from_secs(59)), Decision::Limited);
        assert_eq!(
            limiter.check_at(IP, now + Duration::from_secs(60)),
            Decision::Allowed { remaining: 0 }
        );
    }

    #[test]
    fn sweep_removes_only_expired_windows() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let now = Instant::now();
        limiter.check_at(IP, now);
        limiter.check_at(OTHER, now + Duration::from_secs(30));

        assert_eq!(limiter.sweep_at(now + Duration::from_secs(61)), 1);
        assert_eq!(limiter.tracked(), 1);
    }
}
