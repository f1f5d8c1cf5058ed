//! Client-side session loop.
//!
//! The mirror of the server's fan-in: a single connection whose
//! inbound messages feed one handler, with the session itself as the
//! handler's writer.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use mooring_wire::Message;

use crate::config::SessionConfig;
use crate::error::CommsResult;
use crate::handler::{MessageContext, MessageHandler};
use crate::session::Session;

/// Synthetic signal delivered to the handler before any network
/// traffic, so it can send an opening message of its own.
pub const CLIENT_INIT_SIGNAL: &str = "client:init";

/// Drive a client session over `stream` until the server hangs up.
///
/// The handler first receives a [`CLIENT_INIT_SIGNAL`] signal with an
/// empty session ID; the first inbound message carrying a `sessionID`
/// (typically the server's greeting) establishes the ID used in every
/// later context. Returns `Ok(())` on clean EOF; malformed inbound
/// lines are logged and skipped.
pub async fn run_client<S, H>(handler: &H, stream: S, config: SessionConfig) -> CommsResult<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    H: MessageHandler<S> + ?Sized,
{
    let session = Arc::new(Session::with_config("", stream, config));
    let mut ctx: MessageContext<S> = MessageContext::new("");
    handler
        .handle_message(&ctx, &Message::signal(CLIENT_INIT_SIGNAL), session.as_ref())
        .await?;

    loop {
        match session.read_message().await {
            None => {
                debug!("server closed the connection");
                return Ok(());
            }
            Some(Ok(message)) => {
                if ctx.session_id().as_str().is_empty() && !message.session_id().is_empty() {
                    debug!(session_id = %message.session_id(), "session id established");
                    ctx = MessageContext::new(message.session_id());
                }
                if let Err(err) = handler
                    .handle_message(&ctx, &message, session.as_ref())
                    .await
                {
                    warn!(error = %err, "message handler failed");
                }
            }
            Some(Err(err)) if err.is_terminal() => return Err(err),
            Some(Err(err)) => {
                warn!(error = %err, "dropping malformed message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::time::timeout;

    use crate::handler::MessageWriter;

    /// Replies to the greeting with a join request and records every
    /// context it sees.
    struct JoiningHandler {
        contexts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessageHandler<DuplexStream> for JoiningHandler {
        async fn handle_message(
            &self,
            ctx: &MessageContext<DuplexStream>,
            message: &Message,
            out: &dyn MessageWriter,
        ) -> CommsResult<()> {
            self.contexts.lock().push((
                ctx.session_id().as_str().to_owned(),
                message.kind().as_str().to_owned(),
            ));
            if matches!(message.kind(), mooring_wire::Kind::Greeting) {
                out.write_message(&Message::request("r1", "join")).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_client_adopts_server_session_id() {
        let (near, far) = duplex(4096);
        let handler = Arc::new(JoiningHandler {
            contexts: Mutex::new(Vec::new()),
        });

        let client = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                run_client(handler.as_ref(), near, SessionConfig::default()).await
            })
        };

        // Act as the server: greet, read the join request, respond,
        // then hang up.
        let (read_half, mut write_half) = tokio::io::split(far);
        write_half
            .write_all(b"{\"sessionID\":\"abc123\",\"type\":\"greeting\"}\n")
            .await
            .unwrap();

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .expect("request timed out")
            .unwrap();
        assert!(line.contains("\"requestType\":\"join\""));
        assert!(line.contains("\"requestID\":\"r1\""));

        write_half
            .write_all(
                b"{\"sessionID\":\"abc123\",\"type\":\"response\",\"requestID\":\"r1\",\
                  \"requestType\":\"join\",\"response\":\"success\",\"code\":200}\n",
            )
            .await
            .unwrap();
        drop(write_half);
        drop(reader);

        timeout(Duration::from_secs(5), client)
            .await
            .expect("client did not end")
            .unwrap()
            .unwrap();

        let contexts = handler.contexts.lock();
        assert_eq!(
            *contexts,
            vec![
                (String::new(), "signal".to_owned()),
                ("abc123".to_owned(), "greeting".to_owned()),
                ("abc123".to_owned(), "response".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn test_client_skips_malformed_lines() {
        let (near, mut far) = duplex(4096);
        let handler = Arc::new(JoiningHandler {
            contexts: Mutex::new(Vec::new()),
        });

        let client = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                run_client(handler.as_ref(), near, SessionConfig::default()).await
            })
        };

        far.write_all(b"not json\n").await.unwrap();
        far.write_all(b"{\"sessionID\":\"abc123\",\"type\":\"event\"}\n")
            .await
            .unwrap();
        drop(far);

        timeout(Duration::from_secs(5), client)
            .await
            .expect("client did not end")
            .unwrap()
            .unwrap();

        let contexts = handler.contexts.lock();
        assert_eq!(
            *contexts,
            vec![
                (String::new(), "signal".to_owned()),
                ("abc123".to_owned(), "event".to_owned()),
            ]
        );
    }
}
