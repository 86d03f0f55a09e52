use std::env;
use std::str::FromStr;
use std::sync::OnceLock;

static CONFIG: OnceLock<Config> = OnceLock::new();

// --- CONFIG AGGREGATOR ---

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub log: LogConfig,
    pub browser: BrowserConfig,
}

impl Config {
    pub fn global() -> &'static Config {
        CONFIG.get_or_init(Self::load)
    }

    /// Reads `.env` (if any) and then the process environment.
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Self {
            log: LogConfig::load(),
            browser: BrowserConfig::load(),
        }
    }
}

// --- MODULES ---

// LOG
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl LogConfig {
    fn load() -> Self {
        let defaults = Self::default();
        Self {
            level: get_env("KEYSCOPE_LOG", defaults.level),
        }
    }
}

// BROWSER
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Keys accumulated before a scan round stops and commits a page.
    pub page_size: usize,
    /// COUNT hint handed to the store on every iteration call.
    pub scan_batch_size: usize,
    /// Hard cap on iteration calls per page. Hitting it ends the pass.
    pub max_scan_rounds: usize,
    /// Fetch each discovered key's type before committing a page.
    pub resolve_types: bool,
    pub actor_channel_capacity: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            scan_batch_size: 200,
            max_scan_rounds: 1000,
            resolve_types: true,
            actor_channel_capacity: 1024,
        }
    }
}

impl BrowserConfig {
    fn load() -> Self {
        let defaults = Self::default();
        Self {
            page_size:              get_env("BROWSER_PAGE_SIZE", defaults.page_size),
            scan_batch_size:        get_env("BROWSER_SCAN_BATCH_SIZE", defaults.scan_batch_size),
            max_scan_rounds:        get_env("BROWSER_MAX_SCAN_ROUNDS", defaults.max_scan_rounds),
            resolve_types:          get_env("BROWSER_RESOLVE_TYPES", defaults.resolve_types),
            actor_channel_capacity: get_env("BROWSER_ACTOR_CHAN_CAP", defaults.actor_channel_capacity),
        }
    }

    /// Zero sizes would stall the scanner, so they are lifted to 1.
    pub fn normalized(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self.scan_batch_size = self.scan_batch_size.max(1);
        self.max_scan_rounds = self.max_scan_rounds.max(1);
        self.actor_channel_capacity = self.actor_channel_capacity.max(1);
        self
    }
}

// --- PRIVATE HELPER ---

fn get_env<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Config: {}={:?} is not valid, using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
