use nova_http::{
    handler_fn, limits::ReqLimits, HandlerResult, Request, ResponseHeader, Router, Server,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut router = Router::new();
    router
        .register_static_file(
            "/index.html",
            "<!DOCTYPE html><html><body><h1>Hello, world!</h1></body></html>",
            "text/html; charset=utf-8",
        )
        .register_get(
            "/greet",
            handler_fn(|req: &Request, header: &mut ResponseHeader| -> HandlerResult {
                let name = match req.content_str() {
                    Some(name) if !name.is_empty() => name,
                    _ => "stranger",
                };
                header.content_type("text/plain").body(format!("Hello, {name}!"));
                Ok(())
            }),
        )
        .register_post(
            "/echo",
            handler_fn(|req: &Request, header: &mut ResponseHeader| -> HandlerResult {
                header
                    .content_type("application/octet-stream")
                    .body(req.content());
                Ok(())
            }),
        );

    Server::builder()
        .bind("127.0.0.1:8080".parse().unwrap())?
        .router(router)
        // browsers and curl send GET without Content-Length
        .request_limits(ReqLimits {
            bodyless_get: true,
            ..ReqLimits::default()
        })
        .build()
        .launch()
        .await;
    Ok(())
}
