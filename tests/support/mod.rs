#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pgwarden::driver::frames::md5_hash;
use pgwarden::driver::{ConnectOptions, Driver, DriverError, Param, QueryResult, Row, Session};
use pgwarden::{ServerEndpoint, SessionMode};

// -----------------------------------------------------------------------------
// ----- Endpoints -------------------------------------------------------------

pub fn master(name: &str, host: &str) -> ServerEndpoint {
    ServerEndpoint::master(name, "app_db", host, 5432, "app", "secret")
}

pub fn slave(name: &str, host: &str) -> ServerEndpoint {
    ServerEndpoint::slave(name, "app_db", host, 5432, "app", "secret")
}

pub fn connection(name: &str, host: &str, writes: bool, reads: bool) -> ServerEndpoint {
    ServerEndpoint::new(name, "app_db", host, 5432, "app", "secret").with_capabilities(writes, reads)
}

// -----------------------------------------------------------------------------
// ----- ScriptedDriver --------------------------------------------------------

/// In-memory driver. Every session answers any statement with one row of
/// `(host, session id)`, so tests can tell which server and which session
/// served a call. Statements starting with `select pg_sleep` never return.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDriver {
    state: Arc<DriverState>,
}

#[derive(Debug, Default)]
struct DriverState {
    connects: AtomicUsize,
    probes: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    closes: AtomicUsize,

    // Sessions with an id below this fail every call.
    broken_below: AtomicUsize,
    hang_probes: AtomicBool,
    connect_failures: Mutex<VecDeque<DriverError>>,
    statements: Mutex<Vec<(usize, String)>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.state.probes.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Every session opened so far starts failing; new ones are fine.
    pub fn break_open_sessions(&self) {
        let next_id = self.connects() + 1;
        self.state.broken_below.store(next_id, Ordering::SeqCst);
    }

    pub fn hang_probes(&self, hang: bool) {
        self.state.hang_probes.store(hang, Ordering::SeqCst);
    }

    /// The next connect attempts fail with these errors, in order.
    pub fn fail_next_connects(&self, errors: impl IntoIterator<Item = DriverError>) {
        self.state.connect_failures.lock().extend(errors);
    }

    /// Non-probe statements in execution order, tagged with session id.
    pub fn statements(&self) -> Vec<(usize, String)> {
        self.state.statements.lock().clone()
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Session>, DriverError> {
        if let Some(err) = self.state.connect_failures.lock().pop_front() {
            return Err(err);
        }
        let id = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(ScriptedSession {
            id,
            host: options.host.clone(),
            mode: options.mode,
            state: self.state.clone(),
        }))
    }
}

#[derive(Debug)]
struct ScriptedSession {
    id: usize,
    host: String,
    mode: SessionMode,
    state: Arc<DriverState>,
}

impl ScriptedSession {
    fn check_alive(&self) -> Result<(), DriverError> {
        if self.id < self.state.broken_below.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn execute(
        &mut self,
        statement: &str,
        _params: &[Param<'_>],
    ) -> Result<QueryResult, DriverError> {
        if statement == "SELECT 1" {
            self.state.probes.fetch_add(1, Ordering::SeqCst);
            if self.state.hang_probes.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
        } else {
            self.state
                .statements
                .lock()
                .push((self.id, statement.to_string()));
            if statement.starts_with("select pg_sleep") {
                std::future::pending::<()>().await;
            }
        }
        self.check_alive()?;

        Ok(QueryResult {
            columns: vec!["host".into(), "session".into()],
            rows: vec![Row::new(vec![
                Some(self.host.clone()),
                Some(self.id.to_string()),
            ])],
            command_tag: "SELECT 1".into(),
        })
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.check_alive()?;
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.check_alive()?;
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn mode(&self) -> SessionMode {
        self.mode
    }
}

/// Host and session id reported by the row a scripted session returns.
pub fn served_by(row: &Row) -> (String, usize) {
    let host = row.get(0).unwrap_or_default().to_string();
    let id = row.get(1).and_then(|v| v.parse().ok()).unwrap_or_default();
    (host, id)
}

// -----------------------------------------------------------------------------
// ----- FakeBackend -----------------------------------------------------------

pub const SLOW_REPLY: Duration = Duration::from_millis(200);

/// A Postgres backend that speaks just enough protocol v3 for the driver:
/// MD5 auth, the extended query flow and transaction status tracking.
///
/// `SELECT $1, ...` echoes the bound parameters back as one row, `FAIL`
/// raises a syntax error, `FATAL` raises a FATAL admin shutdown and
/// anything else completes with no rows. `SLOW $1, ...` echoes like
/// `SELECT` but only after [`SLOW_REPLY`].
pub struct FakeBackend {
    pub port: u16,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeBackend {
    pub async fn start(user: &'static str, password: &'static str) -> FakeBackend {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(Mutex::new(Vec::new()));

        let shared = log.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let log = shared.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, user, password, log).await;
                });
            }
        });

        FakeBackend { port, log }
    }

    pub fn options(&self, user: &str, password: &str, mode: SessionMode) -> ConnectOptions {
        let endpoint = ServerEndpoint::new("fake", "app_db", "127.0.0.1", self.port, user, password);
        ConnectOptions::for_endpoint(&endpoint, mode)
    }

    /// Statements the backend received, in order.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

async fn serve(
    mut stream: TcpStream,
    user: &str,
    password: &str,
    log: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    // Startup has no tag byte.
    let len = stream.read_i32().await?;
    let mut startup = vec![0u8; len as usize - 4];
    stream.read_exact(&mut startup).await?;

    let salt = [7u8, 1, 9, 3];
    let mut auth = 5i32.to_be_bytes().to_vec();
    auth.extend_from_slice(&salt);
    stream.write_all(&frame(b'R', &auth)).await?;

    let (tag, body) = read_frame(&mut stream).await?;
    let expected = md5_hash(user, password, &salt);
    if tag != b'p' || cstr_at(&body, 0).0 != expected {
        let err = error_body("FATAL", "28P01", "password authentication failed");
        stream.write_all(&frame(b'E', &err)).await?;
        return Ok(());
    }

    let mut out = frame(b'R', &0i32.to_be_bytes());
    out.extend(frame(b'S', b"server_version\x0016.0\x00"));
    out.extend(frame(b'K', &[0, 0, 0, 42, 0, 0, 0, 7]));
    out.extend(frame(b'Z', b"I"));
    stream.write_all(&out).await?;

    let mut status = b'I';
    let mut statement = String::new();
    let mut params: Vec<Option<String>> = Vec::new();

    loop {
        let (tag, body) = read_frame(&mut stream).await?;
        match tag {
            b'P' => {
                let (_, next) = cstr_at(&body, 0);
                statement = cstr_at(&body, next).0;
            }
            b'B' => params = bind_params(&body),
            b'D' | b'E' => {}
            b'S' => {
                log.lock().push(statement.clone());
                if statement.starts_with("SLOW") {
                    tokio::time::sleep(SLOW_REPLY).await;
                }
                let mut out = frame(b'1', &[]);
                out.extend(frame(b'2', &[]));
                respond(&mut out, &mut status, &statement, &params);
                let fatal = statement == "FATAL";
                out.extend(frame(b'Z', &[status]));
                stream.write_all(&out).await?;
                if fatal {
                    return Ok(());
                }
            }
            b'X' => return Ok(()),
            _ => {}
        }
    }
}

fn respond(out: &mut Vec<u8>, status: &mut u8, statement: &str, params: &[Option<String>]) {
    match statement {
        "BEGIN" => {
            *status = b'T';
            out.extend(frame(b'n', &[]));
            out.extend(frame(b'C', b"BEGIN\x00"));
        }
        "COMMIT" | "ROLLBACK" => {
            *status = b'I';
            out.extend(frame(b'n', &[]));
            let tag = format!("{statement}\x00");
            out.extend(frame(b'C', tag.as_bytes()));
        }
        "FAIL" => {
            if *status == b'T' {
                *status = b'E';
            }
            out.extend(frame(b'E', &error_body("ERROR", "42601", "syntax error")));
        }
        "FATAL" => {
            out.extend(frame(
                b'E',
                &error_body("FATAL", "57P01", "terminating connection"),
            ));
        }
        s if s.starts_with("SELECT") || s.starts_with("SLOW") => {
            let mut desc = (params.len() as i16).to_be_bytes().to_vec();
            for i in 0..params.len() {
                desc.extend_from_slice(format!("p{}\x00", i + 1).as_bytes());
                desc.extend_from_slice(&[0u8; 18]);
            }
            out.extend(frame(b'T', &desc));

            let mut row = (params.len() as i16).to_be_bytes().to_vec();
            for value in params {
                match value {
                    Some(v) => {
                        row.extend_from_slice(&(v.len() as i32).to_be_bytes());
                        row.extend_from_slice(v.as_bytes());
                    }
                    None => row.extend_from_slice(&(-1i32).to_be_bytes()),
                }
            }
            out.extend(frame(b'D', &row));
            out.extend(frame(b'C', b"SELECT 1\x00"));
        }
        _ => {
            out.extend(frame(b'n', &[]));
            out.extend(frame(b'C', b"OK\x00"));
        }
    }
}

fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn error_body(severity: &str, code: &str, message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
        body.push(field);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
    }
    body.push(0);
    body
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let tag = stream.read_u8().await?;
    let len = stream.read_i32().await?;
    let mut body = vec![0u8; len as usize - 4];
    stream.read_exact(&mut body).await?;
    Ok((tag, body))
}

/// The C string starting at `at`, and the offset just past its terminator.
fn cstr_at(body: &[u8], at: usize) -> (String, usize) {
    let end = body[at..]
        .iter()
        .position(|b| *b == 0)
        .map_or(body.len(), |p| at + p);
    (
        String::from_utf8_lossy(&body[at..end]).into_owned(),
        end + 1,
    )
}

fn bind_params(body: &[u8]) -> Vec<Option<String>> {
    let (_, at) = cstr_at(body, 0);
    let (_, mut at) = cstr_at(body, at);

    let read_i16 = |at: usize| i16::from_be_bytes([body[at], body[at + 1]]);
    let formats = read_i16(at) as usize;
    at += 2 + 2 * formats;

    let count = read_i16(at) as usize;
    at += 2;

    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        let len = i32::from_be_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]);
        at += 4;
        if len < 0 {
            params.push(None);
        } else {
            let value = &body[at..at + len as usize];
            params.push(Some(String::from_utf8_lossy(value).into_owned()));
            at += len as usize;
        }
    }
    params
}
