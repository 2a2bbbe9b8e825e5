pub mod device_filter;
pub mod punch_limiter;
pub mod subject_cache;
