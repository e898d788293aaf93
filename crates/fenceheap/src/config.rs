use crate::grower::DEFAULT_LIMIT_BYTES;

/// Heap configuration, read once when the `Heap` handle is created.
#[derive(Debug, Clone, Copy)]
pub struct HeapConfig {
    /// Pages committed by `setup()` before the first allocation.
    pub initial_pages: usize,
    /// Cap on the default grower's reservation, in bytes.
    pub limit_bytes: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            initial_pages: 1,
            limit_bytes: DEFAULT_LIMIT_BYTES,
        }
    }
}

impl HeapConfig {
    /// Build a configuration from environment variables, falling back to
    /// the compiled defaults for anything unset or unparsable.
    ///
    /// Recognized variables: `FENCEHEAP_INITIAL_PAGES`, `FENCEHEAP_LIMIT_BYTES`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(pages) = env_usize("FENCEHEAP_INITIAL_PAGES") {
            if pages > 0 {
                config.initial_pages = pages;
            }
        }
        if let Some(bytes) = env_usize("FENCEHEAP_LIMIT_BYTES") {
            if bytes > 0 {
                config.limit_bytes = bytes;
            }
        }
        config
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}
