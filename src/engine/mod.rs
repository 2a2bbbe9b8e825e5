pub mod aggregator;
pub mod approval;
pub mod correction;
pub mod day;
pub mod geofence;
pub mod ingest;
pub mod normalizer;
pub mod reconcile;
pub mod shift_resolver;
