//! Server configuration loaded from environment variables.

/// Runtime configuration. Every knob has a default that works for local
/// development; production overrides come from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port
    pub http_port: u16,
    /// Directory holding the redb database files. Empty means in-memory
    /// databases, used by tests.
    pub work_dir: String,
    /// Log level (trace | debug | info | warn | error)
    pub log_level: String,
    /// Optional directory for daily rolling log files
    pub log_dir: Option<String>,
    /// Optional JSON seed file for the in-memory catalog
    pub catalog_file: Option<String>,
    /// Cart session idle lifetime in seconds
    pub cart_ttl_secs: u64,
    /// Idempotency marker lifetime in seconds
    pub idempotency_ttl_secs: u64,
    /// Rate limit for order creation per actor per window
    pub order_rate_limit: u64,
    /// Rate limit window in seconds
    pub order_rate_window_secs: u64,
    /// Stock level at or below which a stock_low event is emitted
    pub low_stock_threshold: i64,
    /// Timeout for one TCP send to a printer, in milliseconds
    pub printer_timeout_ms: u64,
    /// Number of print worker tasks
    pub print_workers: usize,
    /// Interval between cache sweeps in seconds
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "./data".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_dir: std::env::var("LOG_DIR").ok(),
            catalog_file: std::env::var("CATALOG_FILE").ok(),
            cart_ttl_secs: std::env::var("CART_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2 * 60 * 60),
            idempotency_ttl_secs: std::env::var("IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 60),
            order_rate_limit: std::env::var("ORDER_RATE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            order_rate_window_secs: std::env::var("ORDER_RATE_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            low_stock_threshold: std::env::var("LOW_STOCK_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            printer_timeout_ms: std::env::var("PRINTER_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            print_workers: std::env::var("PRINT_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }

    /// Configuration for tests: in-memory databases, short TTLs.
    pub fn for_tests() -> Self {
        Self {
            http_port: 0,
            work_dir: String::new(),
            log_level: "debug".to_string(),
            log_dir: None,
            catalog_file: None,
            cart_ttl_secs: 60,
            idempotency_ttl_secs: 60,
            order_rate_limit: 100,
            order_rate_window_secs: 60,
            low_stock_threshold: 5,
            printer_timeout_ms: 200,
            print_workers: 1,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
