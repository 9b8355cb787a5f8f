use axum::{
    body::Body,
    http::{header, HeaderValue, Request, Response},
    middleware::Next,
};

/// Policy for the web mini-app: it loads Telegram's WebApp script and is
/// framed by the Telegram clients.
const MINI_APP_CSP: &str = "default-src 'self'; script-src 'self' https://telegram.org; connect-src 'self'; img-src 'self' https: data:; object-src 'none'; base-uri 'self'; frame-ancestors https://web.telegram.org https://*.telegram.org";

/// Add CSP and related headers to every response that does not set its own.
pub async fn security_headers(req: Request<Body>, next: Next) -> Response<Body> {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    let defaults = [
        (header::CONTENT_SECURITY_POLICY, MINI_APP_CSP),
        (header::REFERRER_POLICY, "no-referrer"),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    ];
    for (name, value) in defaults {
        if !headers.contains_key(&name) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }

    res
}
