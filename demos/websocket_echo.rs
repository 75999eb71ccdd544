use futures::future::BoxFuture;
use nova_http::{
    Connection, Handler, HandlerResult, Opcode, Request, ResponseHeader, Router, Server, Transport,
};
use tracing_subscriber::EnvFilter;

struct Echo;

impl<T: Transport> Handler<T> for Echo {
    fn handle<'a>(
        &'a self,
        conn: &'a mut Connection<T>,
        _: &'a Request,
        _: &'a mut ResponseHeader,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            while let Some(frame) = conn.recv_frame().await? {
                match frame.opcode {
                    Opcode::Ping => conn.send_frame(Opcode::Pong, &frame.payload).await?,
                    Opcode::Text | Opcode::Binary => {
                        conn.send_frame(frame.opcode, &frame.payload).await?
                    }
                    _ => {}
                }
            }
            Ok(())
        })
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .init();

    let mut router = Router::new();
    router.register_websocket("/ws", Echo);

    Server::builder()
        .bind("127.0.0.1:8080".parse().unwrap())?
        .router(router)
        .build()
        .launch()
        .await;
    Ok(())
}
