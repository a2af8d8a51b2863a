use crate::session::Session;
use async_trait::async_trait;
use std::future::Future;

/// Serves one connection. Returning releases the connection.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn serve(&self, session: Session);
}

/// Adapts an async closure into a [`Handler`].
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Session) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn serve(&self, session: Session) {
        (self.0)(session).await
    }
}

/// Writes every received data byte straight back.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn serve(&self, mut session: Session) {
        // One byte at a time so nothing waits for a fuller buffer.
        let mut buf = [0u8; 1];
        loop {
            match session.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(err) = session.write(&buf[..n]).await {
                        tracing::debug!(peer = %session.peer(), error = %err, "Echo write failed");
                        break;
                    }
                }
                Err(err) => {
                    tracing::debug!(peer = %session.peer(), error = %err, "Echo read ended");
                    break;
                }
            }
        }
    }
}
