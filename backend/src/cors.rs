use actix_cors::Cors;
use actix_web::http::header;

use crate::config::CorsConfig;

/// Matches an origin against the allow-list. An entry may hold one `*`
/// standing for a single subdomain label, e.g. `https://*.vercel.app`.
pub fn origin_allowed(allowed: &[String], origin: &str) -> bool {
    allowed.iter().any(|pattern| match pattern.split_once('*') {
        None => pattern == origin,
        Some((prefix, suffix)) => origin
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
            .is_some_and(|label| {
                !label.is_empty() && !label.contains('/') && !label.contains('.')
            }),
    })
}

pub fn build_cors(config: &CorsConfig) -> Cors {
    let allowed = config.allowed_origins.clone();
    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            origin
                .to_str()
                .map(|origin| origin_allowed(&allowed, origin))
                .unwrap_or(false)
        })
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT])
        .supports_credentials()
        .max_age(config.max_age)
}
