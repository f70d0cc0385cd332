mod support;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, advance};

use pgwarden::driver::DriverError;
use pgwarden::{
    Capability, CursorStateError, FlatPool, Picker, PoolError, PoolSettings, RefreshReport,
};
use support::{ScriptedDriver, connection, served_by};

fn events_pool(driver: &ScriptedDriver) -> FlatPool {
    let settings = PoolSettings::default().with_connect_retries(0, Duration::ZERO);
    let pool = FlatPool::new(Arc::new(driver.clone()), settings).with_picker(Picker::seeded(11));
    pool.add_connection("events", connection("events", "writer", true, false));
    pool.add_connection("events", connection("events", "reader", false, true));
    pool.add_connection("events", connection("events", "both", true, true));
    pool
}

#[tokio::test]
async fn routing_respects_capabilities() {
    let driver = ScriptedDriver::new();
    let pool = events_pool(&driver);

    pool.refresh_connections().await;
    assert_eq!(pool.open_cursors().await, 3);

    for _ in 0..200 {
        let mut conn = pool.get_connection_for_writing_to("events").await.unwrap();
        assert!(conn.endpoint().accepts_writes);
        conn.execute("insert into events default values", &[]).await.unwrap();
        let (host, _) = served_by(&conn.fetch_one().unwrap().unwrap());
        assert_ne!(host, "reader");
    }

    for _ in 0..200 {
        let conn = pool.get_connection_for_reading_from("events").await.unwrap();
        assert_ne!(conn.endpoint().host, "writer");
    }

    assert_eq!(pool.stats().routed, 400);
}

#[tokio::test]
async fn nothing_is_eligible_outside_a_unit_of_work() {
    let driver = ScriptedDriver::new();
    let pool = events_pool(&driver);

    // Not connected yet: no cursor can open.
    assert_eq!(pool.open_cursors().await, 0);
    let err = pool.get_connection_for_reading_from("events").await.unwrap_err();
    assert!(matches!(
        err,
        PoolError::NoEligibleConnection {
            capability: Capability::Read,
            ..
        }
    ));

    pool.refresh_connections().await;
    assert!(pool.get_connection_for_writing_to("events").await.is_err());

    assert_eq!(pool.open_cursors().await, 3);
    assert!(pool.get_connection_for_writing_to("events").await.is_ok());

    assert_eq!(pool.close_cursors().await, 3);
    assert!(matches!(
        pool.get_connection_for_writing_to("events").await.unwrap_err(),
        PoolError::NoEligibleConnection {
            capability: Capability::Write,
            ..
        }
    ));
}

#[tokio::test]
async fn unknown_group_and_missing_capability() {
    let driver = ScriptedDriver::new();
    let pool = FlatPool::new(Arc::new(driver.clone()), PoolSettings::default());
    pool.add_connection("audit", connection("audit", "archive", false, true));

    pool.refresh_connections().await;
    pool.open_cursors().await;

    assert!(matches!(
        pool.get_connection_for_reading_from("events").await.unwrap_err(),
        PoolError::UnknownPool { .. }
    ));
    assert!(matches!(
        pool.get_connection_for_writing_to("audit").await.unwrap_err(),
        PoolError::NoEligibleConnection { .. }
    ));
    assert_eq!(pool.len("audit"), 1);
    assert_eq!(pool.len("events"), 0);
}

#[tokio::test]
async fn cursor_outlives_the_routed_connection() {
    let driver = ScriptedDriver::new();
    let pool = FlatPool::new(Arc::new(driver.clone()), PoolSettings::default());
    pool.add_connection("events", connection("events", "only", true, true));

    pool.refresh_connections().await;
    pool.open_cursors().await;

    let mut conn = pool.get_connection_for_writing_to("events").await.unwrap();
    conn.execute("select id from events", &[]).await.unwrap();
    assert_eq!(conn.open_cursor(), Err(CursorStateError::AlreadyOpen));
    drop(conn);

    // Same unit of work: the next caller finds the unread row.
    let mut conn = pool.get_connection_for_reading_from("events").await.unwrap();
    assert!(conn.has_open_cursor());
    assert!(conn.fetch_one().unwrap().is_some());
    drop(conn);

    pool.close_cursors().await;
    assert_eq!(pool.open_cursors().await, 1);
}

#[tokio::test]
async fn refresh_reports_each_outcome() {
    let driver = ScriptedDriver::new();
    let pool = events_pool(&driver);

    let first = pool.refresh_connections().await;
    assert_eq!(
        first,
        RefreshReport {
            checked: 0,
            reconnected: 3,
            failed: 0
        }
    );

    // Never throttled: every handle is probed on every refresh.
    let second = pool.refresh_connections().await;
    assert_eq!(second.checked, 3);
    assert_eq!(driver.probes(), 3);

    driver.break_open_sessions();
    driver.fail_next_connects([DriverError::Auth("password expired".into())]);
    let third = pool.refresh_connections().await;
    assert_eq!(third.reconnected, 2);
    assert_eq!(third.failed, 1);
    assert_eq!(pool.stats().connect_failures, 1);

    // The failed handle stays out of routing until a later refresh fixes it.
    assert_eq!(pool.open_cursors().await, 2);
    let fourth = pool.refresh_connections().await;
    assert_eq!(fourth.reconnected, 1);
    assert_eq!(fourth.checked, 2);
}

#[tokio::test]
async fn reconnect_drops_the_old_cursor() {
    let driver = ScriptedDriver::new();
    let pool = events_pool(&driver);

    pool.refresh_connections().await;
    assert_eq!(pool.open_cursors().await, 3);

    driver.break_open_sessions();
    pool.refresh_connections().await;

    assert!(pool.get_connection_for_reading_from("events").await.is_err());
    assert_eq!(pool.close_cursors().await, 0);
}

#[tokio::test(start_paused = true)]
async fn bulk_operations_skip_busy_handles() {
    let driver = ScriptedDriver::new();
    let settings = PoolSettings::default().with_acquire_timeout(Duration::from_millis(100));
    let pool = FlatPool::new(Arc::new(driver.clone()), settings);
    pool.add_connection("events", connection("events", "a", true, true));

    pool.refresh_connections().await;
    pool.open_cursors().await;

    let held = pool.get_connection_for_writing_to("events").await.unwrap();
    assert_eq!(pool.close_cursors().await, 0);
    let report = pool.refresh_connections().await;
    assert_eq!(report.failed, 1);
    drop(held);

    assert_eq!(pool.close_cursors().await, 1);
}

#[tokio::test(start_paused = true)]
async fn refresh_retires_aged_sessions() {
    let driver = ScriptedDriver::new();
    let pool = FlatPool::new(Arc::new(driver.clone()), PoolSettings::default());
    let endpoint =
        connection("events", "ledger", true, true).with_max_lifetime(Some(Duration::from_secs(600)));
    pool.add_connection("events", endpoint);

    assert_eq!(pool.refresh_connections().await.reconnected, 1);
    assert_eq!(pool.open_cursors().await, 1);

    advance(Duration::from_secs(300)).await;
    assert_eq!(pool.refresh_connections().await.checked, 1);
    assert_eq!(pool.stats().lifetime_retirements, 0);

    advance(Duration::from_secs(301)).await;
    let report = pool.refresh_connections().await;
    assert_eq!(
        report,
        RefreshReport {
            checked: 0,
            reconnected: 1,
            failed: 0
        }
    );
    assert_eq!(pool.stats().lifetime_retirements, 1);
    assert_eq!(driver.connects(), 2);
    assert_eq!(driver.closes(), 1);

    // The cursor went with the retired session.
    assert!(pool.get_connection_for_writing_to("events").await.is_err());
    assert_eq!(pool.close_cursors().await, 0);
}

#[tokio::test(start_paused = true)]
async fn routing_prefers_a_free_handle() {
    let driver = ScriptedDriver::new();
    let pool = FlatPool::new(Arc::new(driver.clone()), PoolSettings::default());
    pool.add_connection("events", connection("events", "a", true, true));
    pool.add_connection("events", connection("events", "b", true, true));

    pool.refresh_connections().await;
    pool.open_cursors().await;

    for _ in 0..50 {
        let held = pool.get_connection_for_reading_from("events").await.unwrap();
        let started = Instant::now();
        let other = pool.get_connection_for_reading_from("events").await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_ne!(held.endpoint().host, other.endpoint().host);
    }
    assert_eq!(pool.stats().routed, 100);
}

#[tokio::test]
async fn close_tears_down_every_session() {
    let driver = ScriptedDriver::new();
    let pool = events_pool(&driver);

    pool.refresh_connections().await;
    pool.open_cursors().await;
    pool.close().await.unwrap();

    assert_eq!(driver.closes(), 3);
    assert_eq!(pool.open_cursors().await, 0);
}
