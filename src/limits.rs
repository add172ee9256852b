//! Per-resource concurrency limits.
//!
//! Each external resource gets a named semaphore sized from [`Settings`]:
//! the platform API, generic web search, and the Wayback availability API.
//! The semaphores are shared across everything running in the process, so
//! parallel sub-forecasts contend for the same permits rather than each
//! getting their own budget.

use crate::Settings;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Named semaphores for the external resources the agent talks to.
#[derive(Clone)]
pub struct RateLimits {
    metaculus: Arc<Semaphore>,
    search: Arc<Semaphore>,
    wayback: Arc<Semaphore>,
}

impl RateLimits {
    /// Build the semaphore set from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            metaculus: Arc::new(Semaphore::new(settings.metaculus_max_concurrent)),
            search: Arc::new(Semaphore::new(settings.search_max_concurrent)),
            wayback: Arc::new(Semaphore::new(settings.wayback_max_concurrent)),
        }
    }

    /// Acquire a permit for the platform API.
    pub async fn metaculus(&self) -> SemaphorePermit<'_> {
        self.metaculus
            .acquire()
            .await
            .expect("metaculus semaphore is never closed")
    }

    /// Acquire a permit for web/news/wiki search.
    pub async fn search(&self) -> SemaphorePermit<'_> {
        self.search
            .acquire()
            .await
            .expect("search semaphore is never closed")
    }

    /// Acquire a permit for the Wayback availability API.
    pub async fn wayback(&self) -> SemaphorePermit<'_> {
        self.wayback
            .acquire()
            .await
            .expect("wayback semaphore is never closed")
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_bound_concurrency() {
        let mut settings = Settings::default();
        settings.search_max_concurrent = 2;
        let limits = RateLimits::from_settings(&settings);

        let p1 = limits.search().await;
        let _p2 = limits.search().await;

        // Third permit is not immediately available
        assert!(limits.search.try_acquire().is_err());

        drop(p1);
        assert!(limits.search.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_resources_are_independent() {
        let limits = RateLimits::default();
        let _m = limits.metaculus().await;
        let _w = limits.wayback().await;
        // Holding one resource's permit does not block another's
        assert!(limits.search.try_acquire().is_ok());
    }
}
