//! Registrar configuration loaded from environment variables.
//!
//! All settings come from environment variables (or a `.env` file via
//! `dotenvy`). Timeouts are expressed in microseconds, matching the
//! handlespace's [`TimeStamp`](crate::domain::TimeStamp) unit.

use crate::domain::RegistrarId;

/// Top-level registrar configuration.
///
/// Loaded once at startup via [`HandlespaceConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlespaceConfig {
    /// Identifier of this registrar (`0` = pick a random one at startup).
    pub registrar_id: RegistrarId,

    /// Upper bound for the entries returned by one name table page.
    pub name_table_max_entries: usize,

    /// Maximum number of pool elements (0 = unlimited).
    pub max_pool_elements: usize,

    /// Maximum number of peer list entries (0 = unlimited).
    pub max_peers: usize,

    /// Expiry timeout applied to freshly registered pool elements.
    pub pool_element_expiry_timeout_us: u64,

    /// Time a peer may stay silent before it is purged.
    pub peer_max_time_no_response_us: u64,

    /// Lifetime of a takeover process before it expires.
    pub takeover_expiry_timeout_us: u64,

    /// Run the full consistency check after every mutation.
    pub verify_after_mutation: bool,

    /// Seed for the selection RNG; `None` seeds from OS entropy.
    pub random_seed: Option<u64>,

    /// Capacity of the EventBus broadcast channel.
    pub event_bus_capacity: usize,

    /// Lower bound between two maintenance passes, in milliseconds.
    pub maintenance_min_interval_ms: u64,

    /// Emit logs as JSON lines instead of human-readable text.
    pub log_json: bool,
}

impl Default for HandlespaceConfig {
    fn default() -> Self {
        Self {
            registrar_id: RegistrarId::UNDEFINED,
            name_table_max_entries: 128,
            max_pool_elements: 0,
            max_peers: 0,
            pool_element_expiry_timeout_us: 5_000_000,
            peer_max_time_no_response_us: 5_000_000,
            takeover_expiry_timeout_us: 5_000_000,
            verify_after_mutation: false,
            random_seed: None,
            event_bus_capacity: 10_000,
            maintenance_min_interval_ms: 100,
            log_json: false,
        }
    }
}

impl HandlespaceConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the [`Default`] values when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `REGISTRAR_ID` is set but is neither a decimal
    /// nor a `0x`-prefixed hexadecimal `u32`.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let registrar_id = match std::env::var("REGISTRAR_ID") {
            Ok(raw) => parse_registrar_id(&raw)?,
            Err(_) => defaults.registrar_id,
        };

        Ok(Self {
            registrar_id,
            name_table_max_entries: parse_env(
                "NAME_TABLE_MAX_ENTRIES",
                defaults.name_table_max_entries,
            ),
            max_pool_elements: parse_env("MAX_POOL_ELEMENTS", defaults.max_pool_elements),
            max_peers: parse_env("MAX_PEERS", defaults.max_peers),
            pool_element_expiry_timeout_us: parse_env(
                "POOL_ELEMENT_EXPIRY_TIMEOUT_US",
                defaults.pool_element_expiry_timeout_us,
            ),
            peer_max_time_no_response_us: parse_env(
                "PEER_MAX_TIME_NO_RESPONSE_US",
                defaults.peer_max_time_no_response_us,
            ),
            takeover_expiry_timeout_us: parse_env(
                "TAKEOVER_EXPIRY_TIMEOUT_US",
                defaults.takeover_expiry_timeout_us,
            ),
            verify_after_mutation: parse_env_bool(
                "VERIFY_AFTER_MUTATION",
                defaults.verify_after_mutation,
            ),
            random_seed: std::env::var("RANDOM_SEED")
                .ok()
                .and_then(|v| v.parse().ok()),
            event_bus_capacity: parse_env("EVENT_BUS_CAPACITY", defaults.event_bus_capacity),
            maintenance_min_interval_ms: parse_env(
                "MAINTENANCE_MIN_INTERVAL_MS",
                defaults.maintenance_min_interval_ms,
            ),
            log_json: parse_env_bool("HANDLESPACE_LOG_JSON", defaults.log_json),
        })
    }
}

/// Parses a registrar identifier given as decimal or `0x` hexadecimal.
///
/// # Errors
///
/// Returns the underlying [`std::num::ParseIntError`] for malformed input.
pub fn parse_registrar_id(raw: &str) -> Result<RegistrarId, std::num::ParseIntError> {
    let raw = raw.trim();
    let value = match raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16)?,
        None => raw.parse::<u32>()?,
    };
    Ok(RegistrarId::new(value))
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
