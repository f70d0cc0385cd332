use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::backend::{AuthRequest, BackendMessage};
use super::{
    ConnectOptions, Driver, DriverError, Param, QueryResult, ReadyStatus, Session, frames,
};
use crate::endpoint::SessionMode;
use crate::wire::{FramePeek, peek_frame};

const DEFAULT_APPLICATION_NAME: &str = "pgwarden";

// -----------------------------------------------------------------------------
// ----- PgDriver --------------------------------------------------------------

/// Postgres frontend/backend protocol v3 over plain TCP.
#[derive(Debug, Clone)]
pub struct PgDriver {
    application_name: String,
}

impl PgDriver {
    pub fn new() -> Self {
        Self {
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
        }
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }
}

impl Default for PgDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for PgDriver {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Session>, DriverError> {
        let session = PgSession::connect(options, &self.application_name).await?;
        Ok(Box::new(session))
    }
}

// -----------------------------------------------------------------------------
// ----- PgSession -------------------------------------------------------------

#[derive(Debug)]
pub struct PgSession {
    stream: TcpStream,
    buffer: BytesMut,
    mode: SessionMode,
    status: ReadyStatus,
    closed: bool,

    // Set while a request is on the wire and its reply not fully drained. A
    // caller that abandons `run` midway leaves it set; the stream is then
    // out of step with the server and the session must not be reused.
    in_flight: bool,
}

// -----------------------------------------------------------------------------
// ----- PgSession: Static -----------------------------------------------------

impl PgSession {
    pub async fn connect(
        options: &ConnectOptions,
        application_name: &str,
    ) -> Result<Self, DriverError> {
        let addr = format!("{}:{}", options.host, options.port);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let mut session = Self {
            stream,
            buffer: BytesMut::with_capacity(8192),
            mode: options.mode,
            status: ReadyStatus::Idle,
            closed: false,
            in_flight: false,
        };

        session.startup(options, application_name).await?;
        Ok(session)
    }
}

// -----------------------------------------------------------------------------
// ----- PgSession: Public -----------------------------------------------------

impl PgSession {
    pub fn status(&self) -> ReadyStatus {
        self.status
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

// -----------------------------------------------------------------------------
// ----- PgSession: Private ----------------------------------------------------

impl PgSession {
    async fn startup(
        &mut self,
        options: &ConnectOptions,
        application_name: &str,
    ) -> Result<(), DriverError> {
        let startup = frames::startup(&options.user, &options.database, application_name);
        self.send(&startup).await?;

        let password = options.password.expose_secret();
        let mut sent_password = false;

        loop {
            match self.next_message().await? {
                BackendMessage::Authentication(AuthRequest::Ok) => {}
                BackendMessage::Authentication(AuthRequest::CleartextPassword) => {
                    self.check_can_send_password(password, sent_password)?;
                    self.send(&frames::password(password)).await?;
                    sent_password = true;
                }
                BackendMessage::Authentication(AuthRequest::Md5Password { salt }) => {
                    self.check_can_send_password(password, sent_password)?;
                    let msg = frames::md5_password(&options.user, password, &salt);
                    self.send(&msg).await?;
                    sent_password = true;
                }
                BackendMessage::Authentication(AuthRequest::Other(code)) => {
                    return Err(DriverError::Unsupported(format!(
                        "authentication method {code}"
                    )));
                }
                BackendMessage::ErrorResponse(err) => return Err(err.into_driver_error()),
                BackendMessage::ReadyForQuery(status) => {
                    self.status = status;
                    debug!(
                        "session ready on {}:{} as {} ({})",
                        options.host,
                        options.port,
                        options.user,
                        self.mode.as_str()
                    );
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    fn check_can_send_password(&self, password: &str, already_sent: bool) -> Result<(), DriverError> {
        if already_sent {
            return Err(DriverError::Protocol(
                "backend requested password twice".to_string(),
            ));
        }
        if password.is_empty() {
            return Err(DriverError::Auth(
                "backend requested password but none configured".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_in_sync(&mut self) -> Result<(), DriverError> {
        if self.in_flight {
            self.closed = true;
            debug!("previous request was abandoned mid-reply, session unusable");
        }
        if self.closed {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    async fn run(
        &mut self,
        statement: &str,
        params: &[Param<'_>],
    ) -> Result<QueryResult, DriverError> {
        self.ensure_in_sync()?;
        let request = frames::extended_query(statement, params)?;

        trace!("execute: {statement}");
        self.in_flight = true;
        self.send(&request).await?;

        let mut result = QueryResult::default();
        let mut failure = None;

        // The server answers everything up to Sync, even after an error, so
        // always drain to ReadyForQuery to keep the stream aligned.
        loop {
            match self.next_message().await? {
                BackendMessage::RowDescription(columns) => result.columns = columns,
                BackendMessage::DataRow(row) => result.rows.push(row),
                BackendMessage::CommandComplete(tag) => result.command_tag = tag,
                BackendMessage::ErrorResponse(err) => failure = Some(err.into_driver_error()),
                BackendMessage::ReadyForQuery(status) => {
                    self.status = status;
                    self.in_flight = false;
                    break;
                }
                BackendMessage::Authentication(_) => {
                    self.closed = true;
                    return Err(DriverError::Protocol(
                        "unexpected authentication request".to_string(),
                    ));
                }
                _ => {}
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), DriverError> {
        if let Err(e) = self.stream.write_all(data).await {
            self.closed = true;
            return Err(e.into());
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Result<BackendMessage, DriverError> {
        loop {
            match peek_frame(&self.buffer) {
                FramePeek::Frame { tag, len } => {
                    let mut frame = self.buffer.split_to(1 + len);
                    frame.advance(5);
                    return BackendMessage::decode(tag, &frame);
                }
                FramePeek::Invalid { tag, len } => {
                    self.closed = true;
                    return Err(DriverError::Protocol(format!(
                        "invalid length {len} for backend message {:?}",
                        tag as char
                    )));
                }
                FramePeek::Incomplete => {}
            }

            let n = match self.stream.read_buf(&mut self.buffer).await {
                Ok(n) => n,
                Err(e) => {
                    self.closed = true;
                    return Err(e.into());
                }
            };
            if n == 0 {
                self.closed = true;
                return Err(DriverError::Closed);
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- PgSession: Session ----------------------------------------------------

#[async_trait]
impl Session for PgSession {
    async fn execute(
        &mut self,
        statement: &str,
        params: &[Param<'_>],
    ) -> Result<QueryResult, DriverError> {
        self.ensure_in_sync()?;
        if self.mode == SessionMode::Transactional && self.status == ReadyStatus::Idle {
            self.run("BEGIN", &[]).await?;
        }
        self.run(statement, params).await
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.ensure_in_sync()?;
        if self.status.in_transaction() {
            self.run("COMMIT", &[]).await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.ensure_in_sync()?;
        if self.status.in_transaction() {
            self.run("ROLLBACK", &[]).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.stream.write_all(&frames::terminate()).await;
        self.stream.shutdown().await?;
        Ok(())
    }

    fn mode(&self) -> SessionMode {
        self.mode
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
