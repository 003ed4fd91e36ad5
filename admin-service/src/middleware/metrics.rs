use axum::{extract::Request, middleware::Next, response::Response};

pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    crate::services::metrics::record_http_request(&method, &path, response.status().as_u16());
    response
}
