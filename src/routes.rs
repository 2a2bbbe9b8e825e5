use crate::{
    api::{ingest, punch, records, requests},
    auth::middleware::auth_middleware,
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    // Helper to build per-route limiter
    fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
        let per_ms = if requests_per_min == 0 {
            1
        } else {
            60_000 / requests_per_min as u64
        };
        let cfg = GovernorConfigBuilder::default()
            .per_millisecond(per_ms)
            .burst_size(requests_per_min)
            .key_extractor(PeerIpKeyExtractor)
            .finish()
            .unwrap();
        Governor::new(&cfg)
    }

    let ingest_limiter = Arc::new(build_limiter(config.rate_ingest_per_min));
    let punch_limiter = Arc::new(build_limiter(config.rate_punch_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Device-authenticated ingestion; auth happens in the AuthDevice
    // extractor, not in middleware, so terminals never touch JWT.
    cfg.service(
        web::scope("/ingest")
            .wrap(ingest_limiter)
            .service(
                web::scope("/punch")
                    .service(web::resource("").route(web::post().to(ingest::sync_single)))
                    .service(web::resource("/batch").route(web::post().to(ingest::sync_batch))),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware))
            // authentication
            .wrap(protected_limiter) // rate limiting
            .service(
                web::resource("/punch")
                    // per-subject DB window applies on top of this per-IP one
                    .wrap(punch_limiter)
                    .route(web::post().to(punch::self_punch)),
            )
            .service(
                web::scope("/requests")
                    // /requests
                    .service(
                        web::resource("")
                            .route(web::post().to(requests::submit_request))
                            .route(web::get().to(requests::list_requests)),
                    )
                    // /requests/{id}
                    .service(
                        web::resource("/{id}").route(web::get().to(requests::get_request)),
                    )
                    // /requests/{id}/decide
                    .service(
                        web::resource("/{id}/decide")
                            .route(web::put().to(requests::decide_request)),
                    )
                    // /requests/{id}/cancel
                    .service(
                        web::resource("/{id}/cancel")
                            .route(web::put().to(requests::cancel_request)),
                    ),
            )
            .service(
                web::scope("/attendance")
                    // /attendance
                    .service(web::resource("").route(web::get().to(records::my_records)))
                    // /attendance/{user_id}
                    .service(
                        web::resource("/{user_id}").route(web::get().to(records::user_records)),
                    )
                    // /attendance/{user_id}/punches
                    .service(
                        web::resource("/{user_id}/punches")
                            .route(web::get().to(records::day_punches)),
                    ),
            ),
    );
}
