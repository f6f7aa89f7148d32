//! HTTP Basic auth gate for the API surface.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine as _;

use crate::auth::{names_match, verify_password};
use crate::constants::http::AUTH_REALM;
use crate::state::App;

/// Whether a path sits behind the auth gate.
///
/// The published status stays public so dashboards keep working; every
/// other API path requires credentials when auth is enabled.
#[must_use]
pub fn requires_auth(path: &str) -> bool {
    path.starts_with("/api/") && !path.starts_with("/api/status")
}

fn decode_basic(headers: &HeaderMap) -> Option<(String, String)> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Basic ")?.trim();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Check the request credentials against the configured user and hash.
#[must_use]
pub fn is_authorized(app: &App, headers: &HeaderMap) -> bool {
    let settings = app.config.auth_settings();
    if !settings.enabled {
        return true;
    }
    let Some((user, password)) = decode_basic(headers) else {
        return false;
    };
    names_match(&user, &settings.user) && verify_password(&password, &settings.password_hash)
}

/// Middleware enforcing the gate; denials get a 401 with the realm.
pub async fn require_auth(
    State(app): State<Arc<App>>,
    request: Request,
    next: Next,
) -> Response {
    if requires_auth(request.uri().path()) && !is_authorized(&app, request.headers()) {
        return Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(
                header::WWW_AUTHENTICATE,
                format!("Basic realm=\"{AUTH_REALM}\""),
            )
            .header(header::CACHE_CONTROL, "no-store, max-age=0")
            .body(Body::empty())
            .unwrap_or_default();
    }
    next.run(request).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::hash_password;

    fn app_with_auth(enabled: bool) -> (tempfile::TempDir, Arc<App>) {
        let dir = tempfile::tempdir().unwrap();
        if enabled {
            let settings = serde_json::json!({
                "settings_auth_enabled": true,
                "settings_auth_user": "admin",
                "settings_auth_password_hash": hash_password("secret"),
            });
            std::fs::write(
                dir.path().join("settings.json"),
                settings.to_string(),
            )
            .unwrap();
        }
        let app = App::open(dir.path()).unwrap();
        (dir, app)
    }

    fn basic_header(user: &str, password: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let token =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        headers.insert(
            header::AUTHORIZATION,
            format!("Basic {token}").parse().unwrap(),
        );
        headers
    }

    #[test]
    fn test_requires_auth_paths() {
        assert!(!requires_auth("/api/status"));
        assert!(requires_auth("/api/settings"));
        assert!(requires_auth("/api/log"));
        assert!(!requires_auth("/"));
    }

    #[test]
    #[serial_test::serial]
    fn test_disabled_auth_admits_everyone() {
        let (_dir, app) = app_with_auth(false);
        assert!(is_authorized(&app, &HeaderMap::new()));
    }

    #[test]
    #[serial_test::serial]
    fn test_valid_and_invalid_credentials() {
        let (_dir, app) = app_with_auth(true);
        assert!(!is_authorized(&app, &HeaderMap::new()));
        assert!(is_authorized(&app, &basic_header("admin", "secret")));
        assert!(!is_authorized(&app, &basic_header("admin", "wrong")));
        assert!(!is_authorized(&app, &basic_header("root", "secret")));

        let mut garbage = HeaderMap::new();
        garbage.insert(header::AUTHORIZATION, "Basic !!!".parse().unwrap());
        assert!(!is_authorized(&app, &garbage));
    }
}
