/// HTTP surface: health check and JWKS publication
///
/// Token consumers fetch `/.well-known/jwks.json` to verify access tokens
/// issued by this service.
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::security::TokenService;

/// Shared HTTP server state
#[derive(Clone)]
pub struct HttpServerState {
    pub tokens: Arc<TokenService>,
}

pub fn build_router(state: HttpServerState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/health", get(health_check))
        .route("/.well-known/jwks.json", get(jwks))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn jwks(State(state): State<Arc<HttpServerState>>) -> impl IntoResponse {
    Json(state.tokens.jwks())
}

/// Serve until `shutdown` resolves
pub async fn start_http_server<F>(
    state: HttpServerState,
    host: &str,
    port: u16,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Starting HTTP server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::Duration;
    use crypto_core::KeyManager;
    use tower::ServiceExt;

    const TEST_KEY: &str = include_str!("../../tests/fixtures/test_rsa_key.pem");

    fn router() -> Router {
        let keys = Arc::new(KeyManager::from_pem(TEST_KEY).unwrap());
        let tokens = TokenService::new(keys, "idp-test", Duration::minutes(15), Duration::days(7));
        build_router(HttpServerState {
            tokens: Arc::new(tokens),
        })
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_jwks_document() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/.well-known/jwks.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let key = &doc["keys"][0];
        assert_eq!(key["kty"], "RSA");
        assert_eq!(key["use"], "sig");
        assert_eq!(key["alg"], "RS256");
        assert_eq!(key["e"], "AQAB");
        assert_eq!(key["kid"], "2Mg8LKUbPurKLuSZuFoP_KmLLoMu5qA6qOATyaes4qc");
        assert!(key["n"].as_str().unwrap().starts_with("5pNmaXnZzGdiw1IHaSnT"));
    }
}
