use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest, dev::Payload};
use chrono::Utc;
use futures::future::LocalBoxFuture;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::MySqlPool;

use crate::config::Config;
use crate::engine::normalizer::Provider;
use crate::error::ApiError;

/// Authenticated terminal/device principal for the ingestion surface.
///
/// Two schemes: a plain `X-Api-Key`, or the stronger
/// `X-Timestamp` + `X-Signature` pair where the signature is
/// hex(HMAC-SHA256(key, "{device_id}:{timestamp}")) and the timestamp
/// must be within the configured freshness window (replay guard).
pub struct AuthDevice {
    pub device_id: String,
    pub org_id: u64,
    pub branch_id: Option<u64>,
    pub provider: Provider,
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    org_id: u64,
    branch_id: Option<u64>,
    provider: String,
    api_key: String,
    is_active: bool,
}

impl FromRequest for AuthDevice {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let pool = req.app_data::<Data<MySqlPool>>().cloned();
        let config = req.app_data::<Data<Config>>().cloned();
        let device_id = header(req, "X-Device-Id");
        let api_key = header(req, "X-Api-Key");
        let timestamp = header(req, "X-Timestamp");
        let signature = header(req, "X-Signature");

        Box::pin(async move {
            let pool =
                pool.ok_or_else(|| actix_web::error::ErrorInternalServerError("Pool missing"))?;
            let config =
                config.ok_or_else(|| actix_web::error::ErrorInternalServerError("Config missing"))?;

            let device_id = device_id
                .ok_or_else(|| ApiError::Unauthorized("missing X-Device-Id header".into()))?;

            let row = sqlx::query_as::<_, DeviceRow>(
                r#"
                SELECT org_id, branch_id, provider, api_key, is_active
                FROM devices
                WHERE device_id = ?
                "#,
            )
            .bind(&device_id)
            .fetch_optional(pool.get_ref())
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::Unauthorized("unknown device".into()))?;

            if !row.is_active {
                return Err(ApiError::Unauthorized("device disabled".into()).into());
            }

            match (signature, timestamp, api_key) {
                (Some(sig), Some(ts), _) => {
                    verify_signature(&device_id, &row.api_key, &ts, &sig, &config)?
                }
                (None, _, Some(key)) => {
                    if key != row.api_key {
                        return Err(ApiError::Unauthorized("bad api key".into()).into());
                    }
                }
                _ => {
                    return Err(ApiError::Unauthorized(
                        "provide X-Api-Key or X-Timestamp/X-Signature".into(),
                    )
                    .into());
                }
            }

            let provider = row
                .provider
                .parse::<Provider>()
                .map_err(|_| ApiError::Internal("device has unknown provider".into()))?;

            Ok(AuthDevice {
                device_id,
                org_id: row.org_id,
                branch_id: row.branch_id,
                provider,
            })
        })
    }
}

fn verify_signature(
    device_id: &str,
    key: &str,
    timestamp: &str,
    signature: &str,
    config: &Config,
) -> Result<(), ApiError> {
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| ApiError::Unauthorized("malformed X-Timestamp".into()))?;
    let skew = (Utc::now().timestamp() - ts).abs();
    if skew > config.device_sig_freshness_secs {
        return Err(ApiError::Unauthorized("signature timestamp too old".into()));
    }

    let expected = sign(device_id, key, timestamp);
    if !expected.eq_ignore_ascii_case(signature) {
        return Err(ApiError::Unauthorized("bad signature".into()));
    }
    Ok(())
}

pub fn sign(device_id: &str, key: &str, timestamp: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(device_id.as_bytes());
    mac.update(b":");
    mac.update(timestamp.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_and_key_sensitive() {
        let a = sign("dev-1", "secret", "1700000000");
        let b = sign("dev-1", "secret", "1700000000");
        let c = sign("dev-1", "other", "1700000000");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn signature_binds_device_and_timestamp() {
        let base = sign("dev-1", "secret", "1700000000");
        assert_ne!(base, sign("dev-2", "secret", "1700000000"));
        assert_ne!(base, sign("dev-1", "secret", "1700000001"));
    }
}
