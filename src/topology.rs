//! Topological pool: per logical name, one master and any number of slaves.
//!
//! Each endpoint slot lazily materializes two handles, a plain (autocommit)
//! one and a transactional one. They are separate sessions and are
//! health-checked independently.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::analytics::{PoolCounters, PoolStats};
use crate::driver::{Driver, Param, Row};
use crate::endpoint::{ServerEndpoint, SessionMode};
use crate::errors::PoolError;
use crate::handle::{ConnectionHandle, HandleLease, HealthCheck, PoolSettings, shutdown_all};
use crate::routing::Picker;

// -----------------------------------------------------------------------------
// ----- TopologyPool ----------------------------------------------------------

#[derive(Debug)]
pub struct TopologyPool {
    driver: Arc<dyn Driver>,
    settings: PoolSettings,
    picker: Picker,
    counters: PoolCounters,
    topologies: RwLock<HashMap<String, Topology>>,
}

#[derive(Debug, Default)]
struct Topology {
    master: Option<Arc<EndpointSlot>>,
    slaves: Vec<Arc<EndpointSlot>>,
}

// -----------------------------------------------------------------------------
// ----- TopologyPool: Static --------------------------------------------------

impl TopologyPool {
    pub fn new(driver: Arc<dyn Driver>, settings: PoolSettings) -> Self {
        Self {
            driver,
            settings,
            picker: Picker::default(),
            counters: PoolCounters::new(),
            topologies: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_picker(mut self, picker: Picker) -> Self {
        self.picker = picker;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- TopologyPool: Registration --------------------------------------------

impl TopologyPool {
    /// One master per name; registering again replaces the previous one.
    /// Never touches the network.
    pub fn register_master(&self, name: &str, endpoint: ServerEndpoint) {
        let slot = Arc::new(EndpointSlot::new(endpoint, self.settings.query_timeout));
        let mut guard = self.topologies.write();
        let topology = guard.entry(name.to_string()).or_default();
        if topology.master.replace(slot).is_some() {
            debug!("pool '{name}': master replaced");
        }
    }

    /// Appends to the slave list of `name`.
    pub fn register_slave(&self, name: &str, endpoint: ServerEndpoint) {
        let slot = Arc::new(EndpointSlot::new(endpoint, self.settings.query_timeout));
        let mut guard = self.topologies.write();
        guard.entry(name.to_string()).or_default().slaves.push(slot);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topologies.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn slave_count(&self, name: &str) -> Result<usize, PoolError> {
        let guard = self.topologies.read();
        let topology = guard.get(name).ok_or_else(|| unknown_pool(name))?;
        Ok(topology.slaves.len())
    }
}

// -----------------------------------------------------------------------------
// ----- TopologyPool: Acquisition ---------------------------------------------

impl TopologyPool {
    pub async fn get_master_connection(&self, name: &str) -> Result<Connection, PoolError> {
        let slot = self.master_slot(name)?;
        let lease = self.checkout(&slot, SessionMode::Autocommit).await?;
        Ok(Connection::new(lease))
    }

    pub async fn get_master_transactional_connection(
        &self,
        name: &str,
    ) -> Result<TransactionalConnection, PoolError> {
        let slot = self.master_slot(name)?;
        let lease = self.checkout(&slot, SessionMode::Transactional).await?;
        Ok(TransactionalConnection::new(lease))
    }

    /// Picks a slave uniformly at random on every call. Two calls in the same
    /// unit of work may land on different replicas.
    pub async fn get_slave_connection(&self, name: &str) -> Result<Connection, PoolError> {
        let slot = self.slave_slot(name)?;
        let lease = self.checkout(&slot, SessionMode::Autocommit).await?;
        Ok(Connection::new(lease))
    }

    pub async fn get_slave_transactional_connection(
        &self,
        name: &str,
    ) -> Result<TransactionalConnection, PoolError> {
        let slot = self.slave_slot(name)?;
        let lease = self.checkout(&slot, SessionMode::Transactional).await?;
        Ok(TransactionalConnection::new(lease))
    }
}

// -----------------------------------------------------------------------------
// ----- TopologyPool: Lifecycle -----------------------------------------------

impl TopologyPool {
    /// Opens the plain session of every registered master and slave. Failures
    /// are logged and returned; they do not stop the remaining endpoints.
    pub async fn warm_all(&self) -> Vec<PoolError> {
        let slots = self.all_slots();
        info!("warming topology pool: {} endpoint(s)", slots.len());

        let check = self.health_check();
        let mut failures = Vec::new();
        for slot in slots {
            if let Err(err) = slot.handle(SessionMode::Autocommit).acquire(&check).await {
                warn!("failed to warm {}: {err}", slot.endpoint);
                failures.push(err);
            }
        }
        failures
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Closes every materialized session. Keeps going past failures and
    /// reports how many could not be closed cleanly.
    pub async fn close(&self) -> Result<(), PoolError> {
        let handles: Vec<Arc<ConnectionHandle>> = self
            .all_slots()
            .iter()
            .flat_map(|slot| slot.materialized())
            .collect();
        shutdown_all(&handles, &self.settings).await
    }
}

// -----------------------------------------------------------------------------
// ----- TopologyPool: Private -------------------------------------------------

impl TopologyPool {
    fn master_slot(&self, name: &str) -> Result<Arc<EndpointSlot>, PoolError> {
        let guard = self.topologies.read();
        guard
            .get(name)
            .and_then(|topology| topology.master.clone())
            .ok_or_else(|| unknown_pool(name))
    }

    fn slave_slot(&self, name: &str) -> Result<Arc<EndpointSlot>, PoolError> {
        let guard = self.topologies.read();
        let topology = guard.get(name).ok_or_else(|| unknown_pool(name))?;
        self.picker
            .choose(&topology.slaves)
            .cloned()
            .ok_or_else(|| PoolError::NoSlaveAvailable {
                name: name.to_string(),
            })
    }

    fn all_slots(&self) -> Vec<Arc<EndpointSlot>> {
        let guard = self.topologies.read();
        let mut slots = Vec::new();
        for topology in guard.values() {
            slots.extend(topology.master.iter().cloned());
            slots.extend(topology.slaves.iter().cloned());
        }
        slots
    }

    async fn checkout(
        &self,
        slot: &EndpointSlot,
        mode: SessionMode,
    ) -> Result<HandleLease, PoolError> {
        let handle = slot.handle(mode);
        let mut lease = handle.acquire(&self.health_check()).await?;
        lease.open_cursor()?;
        self.counters.inc_routed();
        Ok(lease)
    }

    fn health_check(&self) -> HealthCheck<'_> {
        HealthCheck {
            driver: self.driver.as_ref(),
            settings: &self.settings,
            counters: &self.counters,
        }
    }
}

fn unknown_pool(name: &str) -> PoolError {
    PoolError::UnknownPool {
        name: name.to_string(),
    }
}

// -----------------------------------------------------------------------------
// ----- EndpointSlot ----------------------------------------------------------

#[derive(Debug)]
struct EndpointSlot {
    endpoint: Arc<ServerEndpoint>,
    query_timeout: Duration,
    plain: OnceCell<Arc<ConnectionHandle>>,
    transactional: OnceCell<Arc<ConnectionHandle>>,
}

impl EndpointSlot {
    fn new(endpoint: ServerEndpoint, query_timeout: Duration) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            query_timeout,
            plain: OnceCell::new(),
            transactional: OnceCell::new(),
        }
    }

    fn handle(&self, mode: SessionMode) -> Arc<ConnectionHandle> {
        let cell = match mode {
            SessionMode::Autocommit => &self.plain,
            SessionMode::Transactional => &self.transactional,
        };
        cell.get_or_init(|| {
            let handle = ConnectionHandle::new(self.endpoint.clone(), mode)
                .with_query_timeout(self.query_timeout);
            Arc::new(handle)
        })
        .clone()
    }

    fn materialized(&self) -> impl Iterator<Item = Arc<ConnectionHandle>> + '_ {
        [self.plain.get(), self.transactional.get()]
            .into_iter()
            .flatten()
            .cloned()
    }
}

// -----------------------------------------------------------------------------
// ----- Connection ------------------------------------------------------------

/// Exclusive use of one autocommit session, with a cursor open for the
/// lifetime of the value. Dropping it closes the cursor and frees the handle.
#[derive(Debug)]
pub struct Connection {
    lease: HandleLease,
}

impl Connection {
    fn new(lease: HandleLease) -> Self {
        Self { lease }
    }

    pub fn endpoint(&self) -> &Arc<ServerEndpoint> {
        self.lease.endpoint()
    }

    pub async fn execute(&mut self, statement: &str, params: &[Param<'_>]) -> Result<(), PoolError> {
        self.lease.execute(statement, params).await
    }

    pub fn columns(&self) -> Result<&[String], PoolError> {
        Ok(self.lease.columns()?)
    }

    pub fn fetch_one(&mut self) -> Result<Option<Row>, PoolError> {
        Ok(self.lease.fetch_one()?)
    }

    pub fn fetch_many(&mut self, n: usize) -> Result<Vec<Row>, PoolError> {
        Ok(self.lease.fetch_many(n)?)
    }

    pub fn fetch_all(&mut self) -> Result<Vec<Row>, PoolError> {
        Ok(self.lease.fetch_all()?)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // NotOpen here just means the session died mid-use.
        let _ = self.lease.close_cursor();
    }
}

// -----------------------------------------------------------------------------
// ----- TransactionalConnection -----------------------------------------------

/// Like [`Connection`], on the slot's transactional session. Work not
/// committed before drop stays pending on the session.
#[derive(Debug)]
pub struct TransactionalConnection {
    conn: Connection,
}

impl TransactionalConnection {
    fn new(lease: HandleLease) -> Self {
        Self {
            conn: Connection::new(lease),
        }
    }

    pub async fn commit(&mut self) -> Result<(), PoolError> {
        self.conn.lease.commit().await
    }

    pub async fn rollback(&mut self) -> Result<(), PoolError> {
        self.conn.lease.rollback().await
    }
}

impl Deref for TransactionalConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for TransactionalConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
