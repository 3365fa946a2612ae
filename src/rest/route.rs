//! Rate-limit route derivation.
//!
//! `/channels/<id>/...` and `/guilds/<id>/...` bucket per parent resource so
//! unrelated entities do not share quota; every other path buckets by its
//! first segment.

/// Derive the rate-limit bucket for a resource path.
#[must_use]
pub fn route_of(resource: &str) -> String {
    let path = resource.split('?').next().unwrap_or(resource);
    let mut segments = path.trim_start_matches('/').split('/');
    match (segments.next(), segments.next()) {
        (Some(root @ ("channels" | "guilds")), Some(id)) if !id.is_empty() => {
            format!("/{root}/{id}")
        }
        (Some(root), _) if !root.is_empty() => format!("/{root}"),
        _ => "/".to_string(),
    }
}
