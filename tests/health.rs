use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use tower::ServiceExt; // for `oneshot`
use welcomepage_backend::routes::api_routes;

#[tokio::test]
async fn health_responds_ok() {
    let response = api_routes()
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(body, "ok".as_bytes());
}

#[tokio::test]
async fn metrics_render_alongside_api_routes() {
    let (layer, handle) = PrometheusMetricLayer::pair();
    let app = api_routes()
        .route("/metrics", get(move || async move { handle.render() }))
        .layer(layer);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
