//! Pool-owned wrapper around one underlying driver session.
//!
//! A [`ConnectionHandle`] is shared (`Arc`) by whichever pool created it, but
//! all of its mutable state sits behind a per-handle async mutex. Callers get
//! exclusive use through a [`HandleLease`], which is what the health check,
//! cursor lifecycle and statement execution all operate on.

pub mod cursor;
pub mod health;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{Instant, timeout};
use tracing::warn;

use crate::driver::{DriverError, Param, Row, Session};
use crate::endpoint::{ServerEndpoint, SessionMode};
use crate::errors::{CursorStateError, PoolError};

pub use cursor::CursorHandle;
pub use health::{CheckOutcome, PoolSettings};
pub(crate) use health::{CheckPolicy, HealthCheck};

// -----------------------------------------------------------------------------
// ----- ConnectionHandle ------------------------------------------------------

#[derive(Debug)]
pub struct ConnectionHandle {
    endpoint: Arc<ServerEndpoint>,
    mode: SessionMode,
    query_timeout: Duration,
    state: Arc<Mutex<HandleState>>,

    // Mirrors of `state`, readable without taking the lock. Routing filters on
    // them, then re-checks under the lock.
    connected: AtomicBool,
    cursor_open: AtomicBool,
}

#[derive(Debug, Default)]
struct HandleState {
    session: Option<Box<dyn Session>>,
    session_started_at: Option<Instant>,
    last_checked_at: Option<Instant>,
    cursor: Option<CursorHandle>,

    // Set for the duration of a session call. Still set when the lease is
    // next taken means the caller gave up mid-call and the session's reply
    // stream cannot be trusted.
    call_in_flight: bool,
}

// -----------------------------------------------------------------------------
// ----- ConnectionHandle: Static ----------------------------------------------

impl ConnectionHandle {
    /// Starts unconnected; nothing touches the network until acquired.
    pub fn new(endpoint: Arc<ServerEndpoint>, mode: SessionMode) -> Self {
        Self {
            endpoint,
            mode,
            query_timeout: PoolSettings::default().query_timeout,
            state: Arc::new(Mutex::new(HandleState::default())),
            connected: AtomicBool::new(false),
            cursor_open: AtomicBool::new(false),
        }
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionHandle: Public ----------------------------------------------

impl ConnectionHandle {
    pub fn endpoint(&self) -> &Arc<ServerEndpoint> {
        &self.endpoint
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn has_open_cursor(&self) -> bool {
        self.cursor_open.load(Ordering::Acquire)
    }

    /// Exclusive use of the handle, without any health check.
    pub async fn lock(self: &Arc<Self>, wait: Duration) -> Result<HandleLease, PoolError> {
        match timeout(wait, self.state.clone().lock_owned()).await {
            Ok(state) => Ok(HandleLease {
                handle: self.clone(),
                state,
            }),
            Err(_) => Err(PoolError::AcquireTimeout {
                endpoint: self.endpoint.to_string(),
            }),
        }
    }

    /// Exclusive use if nobody holds the handle right now.
    pub fn try_lock(self: &Arc<Self>) -> Option<HandleLease> {
        let state = self.state.clone().try_lock_owned().ok()?;
        Some(HandleLease {
            handle: self.clone(),
            state,
        })
    }

    /// Lock, then run the throttled health check; the returned lease holds a
    /// live session.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        check: &HealthCheck<'_>,
    ) -> Result<HandleLease, PoolError> {
        let mut lease = self.lock(check.settings.acquire_timeout).await?;
        check.run(&mut lease, CheckPolicy::Throttled).await?;
        Ok(lease)
    }
}

/// Pool teardown: releases every cursor and session it can, counting the
/// handles that could not be locked or closed cleanly.
pub(crate) async fn shutdown_all(
    handles: &[Arc<ConnectionHandle>],
    settings: &PoolSettings,
) -> Result<(), PoolError> {
    let mut failed = 0;

    for handle in handles {
        let mut lease = match handle.lock(settings.acquire_timeout).await {
            Ok(lease) => lease,
            Err(err) => {
                warn!("teardown skipped {}: {err}", handle.endpoint);
                failed += 1;
                continue;
            }
        };
        if let Err(err) = lease.shutdown(settings.probe_timeout).await {
            warn!("teardown of {} did not close cleanly: {err}", handle.endpoint);
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(PoolError::Teardown { failed });
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// ----- HandleLease -----------------------------------------------------------

/// Exclusive access to one [`ConnectionHandle`]. Dropping it releases the
/// handle to the next caller; the session (and any open cursor) stays.
#[derive(Debug)]
pub struct HandleLease {
    handle: Arc<ConnectionHandle>,
    state: OwnedMutexGuard<HandleState>,
}

// -----------------------------------------------------------------------------
// ----- HandleLease: Public ---------------------------------------------------

impl HandleLease {
    pub fn endpoint(&self) -> &Arc<ServerEndpoint> {
        &self.handle.endpoint
    }

    pub fn mode(&self) -> SessionMode {
        self.handle.mode
    }

    pub fn is_connected(&self) -> bool {
        self.state.session.is_some()
    }

    pub fn has_open_cursor(&self) -> bool {
        self.state.cursor.is_some()
    }

    pub fn session_age(&self) -> Option<Duration> {
        self.state
            .session_started_at
            .map(|started| Instant::now().saturating_duration_since(started))
    }

    pub fn open_cursor(&mut self) -> Result<(), CursorStateError> {
        if self.state.session.is_none() {
            return Err(CursorStateError::NotConnected);
        }
        if self.state.cursor.is_some() {
            return Err(CursorStateError::AlreadyOpen);
        }
        self.state.cursor = Some(CursorHandle::new());
        self.sync_flags();
        Ok(())
    }

    pub fn close_cursor(&mut self) -> Result<(), CursorStateError> {
        if self.state.cursor.take().is_none() {
            return Err(CursorStateError::NotOpen);
        }
        self.sync_flags();
        Ok(())
    }

    /// Runs `statement` through the open cursor, replacing its unread rows.
    pub async fn execute(
        &mut self,
        statement: &str,
        params: &[Param<'_>],
    ) -> Result<(), PoolError> {
        if self.state.cursor.is_none() {
            return Err(CursorStateError::NotOpen.into());
        }
        let wait = self.handle.query_timeout;
        let state = &mut *self.state;
        let session = state
            .session
            .as_mut()
            .ok_or(CursorStateError::NotConnected)?;

        state.call_in_flight = true;
        let outcome = match timeout(wait, session.execute(statement, params)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DriverError::Timeout(wait)),
        };
        state.call_in_flight = false;

        match outcome {
            Ok(result) => {
                if let Some(cursor) = state.cursor.as_mut() {
                    cursor.load(result);
                }
                Ok(())
            }
            Err(err) => Err(self.on_driver_error(err)),
        }
    }

    pub fn columns(&self) -> Result<&[String], CursorStateError> {
        Ok(self.cursor()?.columns())
    }

    pub fn command_tag(&self) -> Result<Option<&str>, CursorStateError> {
        Ok(self.cursor()?.command_tag())
    }

    pub fn fetch_one(&mut self) -> Result<Option<Row>, CursorStateError> {
        Ok(self.cursor_mut()?.fetch_one())
    }

    pub fn fetch_many(&mut self, n: usize) -> Result<Vec<Row>, CursorStateError> {
        Ok(self.cursor_mut()?.fetch_many(n))
    }

    pub fn fetch_all(&mut self) -> Result<Vec<Row>, CursorStateError> {
        Ok(self.cursor_mut()?.fetch_all())
    }

    pub async fn commit(&mut self) -> Result<(), PoolError> {
        self.end_transaction(true).await
    }

    pub async fn rollback(&mut self) -> Result<(), PoolError> {
        self.end_transaction(false).await
    }
}

// -----------------------------------------------------------------------------
// ----- HandleLease: Crate ----------------------------------------------------

impl HandleLease {
    pub(crate) fn last_checked_at(&self) -> Option<Instant> {
        self.state.last_checked_at
    }

    pub(crate) fn mark_checked(&mut self, now: Instant) {
        self.state.last_checked_at = Some(now);
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        match (self.state.session_started_at, self.handle.endpoint.max_lifetime) {
            (Some(started), Some(max)) => now.saturating_duration_since(started) > max,
            _ => false,
        }
    }

    /// The previous holder abandoned a session call before it finished.
    pub(crate) fn was_interrupted(&self) -> bool {
        self.state.call_in_flight
    }

    pub(crate) fn set_call_in_flight(&mut self, in_flight: bool) {
        self.state.call_in_flight = in_flight;
    }

    pub(crate) fn session_mut(&mut self) -> Option<&mut Box<dyn Session>> {
        self.state.session.as_mut()
    }

    /// Detaches the current session. The cursor goes with it: a handle with no
    /// session never has a cursor.
    pub(crate) fn take_session(&mut self) -> Option<Box<dyn Session>> {
        let session = self.state.session.take();
        self.state.session_started_at = None;
        self.state.cursor = None;
        self.state.call_in_flight = false;
        self.sync_flags();
        session
    }

    pub(crate) fn adopt(&mut self, session: Box<dyn Session>, now: Instant) {
        self.state.session = Some(session);
        self.state.session_started_at = Some(now);
        self.sync_flags();
    }

    /// Teardown: closes the cursor and the session. The handle ends up
    /// unconnected even when the close itself fails.
    pub(crate) async fn shutdown(&mut self, wait: Duration) -> Result<(), DriverError> {
        let Some(mut session) = self.take_session() else {
            return Ok(());
        };
        match timeout(wait, session.close()).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout(wait)),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- HandleLease: Private --------------------------------------------------

impl HandleLease {
    async fn end_transaction(&mut self, commit: bool) -> Result<(), PoolError> {
        let wait = self.handle.query_timeout;
        let state = &mut *self.state;
        let session = state
            .session
            .as_mut()
            .ok_or(CursorStateError::NotConnected)?;

        state.call_in_flight = true;
        let call = async {
            if commit {
                session.commit().await
            } else {
                session.rollback().await
            }
        };
        let outcome = match timeout(wait, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DriverError::Timeout(wait)),
        };
        state.call_in_flight = false;

        outcome.map_err(|err| self.on_driver_error(err))
    }

    fn cursor(&self) -> Result<&CursorHandle, CursorStateError> {
        self.state.cursor.as_ref().ok_or(CursorStateError::NotOpen)
    }

    fn cursor_mut(&mut self) -> Result<&mut CursorHandle, CursorStateError> {
        self.state.cursor.as_mut().ok_or(CursorStateError::NotOpen)
    }

    /// A broken session is dropped on the spot so the next acquisition
    /// reconnects instead of waiting out the check interval.
    fn on_driver_error(&mut self, err: DriverError) -> PoolError {
        if err.is_fatal_to_session() {
            warn!(
                "{}: dropping {} session after error: {err}",
                self.handle.endpoint,
                self.handle.mode.as_str()
            );
            drop(self.take_session());
        }
        PoolError::Driver(err)
    }

    fn sync_flags(&self) {
        self.handle
            .connected
            .store(self.state.session.is_some(), Ordering::Release);
        self.handle
            .cursor_open
            .store(self.state.cursor.is_some(), Ordering::Release);
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
