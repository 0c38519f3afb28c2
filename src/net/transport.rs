//! WebTransport server implementation
//!
//! One bidirectional stream per client. The first frame must authenticate; after
//! that a reader task feeds the game session and a writer task drains the
//! connection's outbox.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::game::constants::{chat, net::AUTH_TIMEOUT_SECS};
use crate::game::state::SessionId;
use crate::metrics::Metrics;
use crate::net::auth::{AuthClaims, AuthError, TokenVerifier};
use crate::net::connection::{outbox, Frame};
use crate::net::framing::{send, write_frame, FrameReader, FramingError};
use crate::net::game_session::{start_chat_maintenance, start_game_loop, GameSession};
use crate::net::protocol::{decode, ClientMessage, ServerMessage};
use crate::net::tls::TlsConfig;
use crate::store::{AccountRecord, ChatStore, PlayerStore};
use crate::util::unix_millis;

/// State shared by every connection task
#[derive(Clone)]
struct ConnectionContext {
    verifier: Arc<TokenVerifier>,
    players: Arc<dyn PlayerStore>,
    chat_store: Arc<dyn ChatStore>,
    game_session: Arc<RwLock<GameSession>>,
    metrics: Arc<Metrics>,
    auto_register: bool,
}

/// WebTransport server
pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    context: ConnectionContext,
}

impl WebTransportServer {
    pub fn new(
        config: ServerConfig,
        tls_config: TlsConfig,
        players: Arc<dyn PlayerStore>,
        chat_store: Arc<dyn ChatStore>,
        game_session: Arc<RwLock<GameSession>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let context = ConnectionContext {
            verifier: Arc::new(TokenVerifier::new(config.jwt_secret.as_bytes())),
            players,
            chat_store,
            game_session,
            metrics,
            auto_register: config.auto_register,
        };
        Self {
            config,
            tls_config,
            context,
        }
    }

    /// Get the certificate hash for client configuration
    pub fn cert_hash(&self) -> &str {
        &self.tls_config.cert_hash
    }

    /// Run the server
    pub async fn run(self) -> anyhow::Result<()> {
        use wtransport::Endpoint;
        use wtransport::ServerConfig;

        // Dual-stack bind so both IPv4 and IPv6 clients can reach us
        let server_config = ServerConfig::builder()
            .with_bind_default(self.config.port)
            .with_identity(self.tls_config.identity)
            .build();

        let server = Endpoint::server(server_config)
            .with_context(|| format!("Failed to bind WebTransport listener on port {}", self.config.port))?;

        info!("WebTransport server listening on port {}", self.config.port);

        start_game_loop(self.context.game_session.clone(), self.context.metrics.clone());
        start_chat_maintenance(self.context.game_session.clone());

        loop {
            let incoming = server.accept().await;
            let context = self.context.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, context).await {
                    warn!("Connection error: {:#}", e);
                }
            });
        }
    }
}

/// Handle a single WebTransport connection
async fn handle_connection(
    incoming: wtransport::endpoint::IncomingSession,
    context: ConnectionContext,
) -> anyhow::Result<()> {
    let session_request = incoming.await?;
    debug!(
        "New connection: authority {}, path {}",
        session_request.authority(),
        session_request.path()
    );

    let connection = session_request.accept().await?;
    let (mut send_stream, recv_stream) = connection
        .accept_bi()
        .await
        .context("Client never opened a stream")?;

    let mut frames = FrameReader::new(recv_stream);
    let record = match authenticate(&mut frames, &context).await {
        Ok(record) => record,
        Err(e) => {
            context.metrics.auth_failures.fetch_add(1, Ordering::Relaxed);
            let reject = ServerMessage::AuthRejected {
                reason: e.to_string(),
            };
            if let Err(send_err) = send(&mut send_stream, &reject).await {
                debug!("Failed to send AuthRejected: {}", send_err);
            }
            return Err(e).context("Authentication failed");
        }
    };

    backfill_chat(&context).await;

    let (tx, rx) = outbox();
    let admitted = {
        let mut session = context.game_session.write().await;
        session.admit(record, tx, Instant::now(), unix_millis())
    };
    let session_id = match admitted {
        Ok(session_id) => session_id,
        Err(e) => {
            info!("Connection refused: {}", e);
            let reject = ServerMessage::AuthRejected { reason: e.to_string() };
            send(&mut send_stream, &reject).await?;
            return Ok(());
        }
    };

    let writer = run_writer(send_stream, rx);
    let reader = run_reader(frames, session_id, &context);

    let result = tokio::select! {
        result = writer => result,
        result = reader => result,
    };

    context
        .game_session
        .write()
        .await
        .disconnect(session_id, unix_millis());

    match result {
        Ok(()) | Err(FramingError::ConnectionClosed) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Read the first frame and resolve it to an account
async fn authenticate<R: AsyncRead + Unpin>(
    frames: &mut FrameReader<R>,
    context: &ConnectionContext,
) -> anyhow::Result<AccountRecord> {
    let frame = tokio::time::timeout(Duration::from_secs(AUTH_TIMEOUT_SECS), frames.next_frame())
        .await
        .context("Timed out waiting for Authenticate")??;

    let token = match decode::<ClientMessage>(frame) {
        Ok(ClientMessage::Authenticate { token }) => token,
        _ => return Err(AuthError::NotAuthenticated.into()),
    };

    let now_secs = unix_millis() / 1000;
    let AuthClaims { account_id, username } = context.verifier.verify(&token, now_secs)?;

    if let Some(record) = context.players.load_account(&account_id).await? {
        return Ok(record);
    }
    if !context.auto_register {
        return Err(AuthError::UnknownAccount.into());
    }

    let username = username.unwrap_or_else(|| {
        let short: String = account_id.chars().take(6).collect();
        format!("Player-{}", short)
    });
    info!("Registering new account {} as {}", account_id, username);
    Ok(context
        .players
        .register_account(AccountRecord::new(account_id, username))
        .await?)
}

/// Top up the in-memory chat history from the store when it is short
async fn backfill_chat(context: &ConnectionContext) {
    if !context
        .game_session
        .read()
        .await
        .chat_needs_backfill(chat::HISTORY_ON_JOIN)
    {
        return;
    }

    match context.chat_store.recent(chat::HISTORY_ON_JOIN).await {
        Ok(fetched) if !fetched.is_empty() => {
            context.game_session.write().await.merge_chat_history(fetched);
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to load chat history: {}", e),
    }
}

/// Drain the outbox onto the stream until every sender is gone
async fn run_writer<W: AsyncWrite + Unpin>(
    mut stream: W,
    mut rx: mpsc::Receiver<Frame>,
) -> Result<(), FramingError> {
    while let Some(frame) = rx.recv().await {
        write_frame(&mut stream, &frame).await?;
    }
    debug!("Outbox closed, writer finished");
    Ok(())
}

/// Decode inbound frames and apply them, one lock acquisition per message
async fn run_reader<R: AsyncRead + Unpin>(
    mut frames: FrameReader<R>,
    session_id: SessionId,
    context: &ConnectionContext,
) -> Result<(), FramingError> {
    loop {
        let frame = frames.next_frame().await?;
        context.metrics.record_received(frame.len());

        let message: ClientMessage = match decode(frame) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping undecodable message from {}: {}", session_id, e);
                continue;
            }
        };
        if let Err(e) = message.validate() {
            debug!("Dropping invalid message from {}: {}", session_id, e);
            continue;
        }

        let mut session = context.game_session.write().await;
        match message {
            ClientMessage::Authenticate { .. } => {
                debug!("Ignoring repeated Authenticate from {}", session_id);
            }
            ClientMessage::Move(input) => session.handle_move(session_id, input),
            ClientMessage::Shoot => session.handle_shoot(session_id, Instant::now()),
            ClientMessage::ChatMessage { text } => session.handle_chat(session_id, &text, unix_millis()),
            ClientMessage::Ping { timestamp } => session.handle_ping(session_id, timestamp, unix_millis()),
        }
    }
}
