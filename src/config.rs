use dotenvy::dotenv;
use std::env;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub api_prefix: String,

    // Per-IP edge limits; per-subject punch limits are DB-backed in
    // utils::punch_limiter so they survive restarts and multiple
    // instances.
    pub rate_ingest_per_min: u32,
    pub rate_punch_per_min: u32,
    pub rate_protected_per_min: u32,
    pub punch_window_secs: i64,
    pub punch_window_max: u32,

    // Normalizer / shift resolver
    pub dedup_window_secs: i64,
    pub rollover_buffer_hours: u32,

    // Geofence
    pub geofence_default_radius_m: f64,
    pub geofence_accuracy_ceiling_m: f64,
    pub geofence_max_speed_kmh: f64,

    // Device HMAC auth
    pub device_sig_freshness_secs: i64,

    // Approval workflow
    pub sla_hours: i64,

    // Reconciliation batch
    pub reconcile_hour: u32,
    pub reconcile_parallelism: usize,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        Self {
            server_addr: env::var("SERVER_ADDR").expect("SERVER_ADDR must be set"),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api/v1".to_string()),

            rate_ingest_per_min: env_or("RATE_INGEST_PER_MIN", 600),
            rate_punch_per_min: env_or("RATE_PUNCH_PER_MIN", 30),
            rate_protected_per_min: env_or("RATE_PROTECTED_PER_MIN", 1000),
            punch_window_secs: env_or("PUNCH_WINDOW_SECS", 300),
            punch_window_max: env_or("PUNCH_WINDOW_MAX", 6),

            dedup_window_secs: env_or("DEDUP_WINDOW_SECS", 120),
            rollover_buffer_hours: env_or("ROLLOVER_BUFFER_HOURS", 4),

            geofence_default_radius_m: env_or("GEOFENCE_DEFAULT_RADIUS_M", 100.0),
            geofence_accuracy_ceiling_m: env_or("GEOFENCE_ACCURACY_CEILING_M", 100.0),
            geofence_max_speed_kmh: env_or("GEOFENCE_MAX_SPEED_KMH", 150.0),

            device_sig_freshness_secs: env_or("DEVICE_SIG_FRESHNESS_SECS", 300),

            sla_hours: env_or("APPROVAL_SLA_HOURS", 48),

            reconcile_hour: env_or("RECONCILE_HOUR", 1),
            reconcile_parallelism: env_or("RECONCILE_PARALLELISM", 8),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Debug,
{
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|e| panic!("{key} invalid: {e:?}")),
        Err(_) => default,
    }
}
