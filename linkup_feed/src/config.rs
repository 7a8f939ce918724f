use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Size of the first window requested on mount.
    pub initial_page_size: usize,
    /// How much each scroll-triggered load grows the window by.
    pub page_step: usize,
    pub lookup_timeout: Duration,
    /// Depth of the engine's mutation queue.
    pub queue_depth: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            initial_page_size: 10,
            page_step: 10,
            lookup_timeout: Duration::from_millis(5_000),
            queue_depth: 256,
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let initial_page_size = env_usize("LINKUP_PAGE_SIZE")
            .filter(|size| *size > 0)
            .unwrap_or(defaults.initial_page_size);
        let page_step = env_usize("LINKUP_PAGE_STEP")
            .filter(|step| *step > 0)
            .unwrap_or(defaults.page_step);
        let lookup_timeout = env_usize("LINKUP_LOOKUP_TIMEOUT_MS")
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(defaults.lookup_timeout);
        let queue_depth = env_usize("LINKUP_QUEUE_DEPTH")
            .filter(|depth| *depth > 0)
            .unwrap_or(defaults.queue_depth);
        Self {
            initial_page_size,
            page_step,
            lookup_timeout,
            queue_depth,
        }
    }

    pub fn with_page_size(mut self, initial_page_size: usize, page_step: usize) -> Self {
        self.initial_page_size = initial_page_size.max(1);
        self.page_step = page_step.max(1);
        self
    }
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}
