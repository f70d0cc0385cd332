//! Frontend message builders for the Postgres v3 protocol.

use bytes::{BufMut, BytesMut};
use md5::Context;

use super::{DriverError, Param};

const PROTOCOL_VERSION: u32 = 196608; // 3.0

// -----------------------------------------------------------------------------
// ----- Startup / Auth --------------------------------------------------------

pub fn startup(user: &str, database: &str, application_name: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(128);
    buf.put_u32(0);
    buf.put_u32(PROTOCOL_VERSION);
    put_cstr(&mut buf, "user");
    put_cstr(&mut buf, user);
    put_cstr(&mut buf, "database");
    put_cstr(&mut buf, database);
    if !application_name.is_empty() {
        put_cstr(&mut buf, "application_name");
        put_cstr(&mut buf, application_name);
    }
    buf.put_u8(0);
    let len = buf.len() as u32;
    buf[0..4].copy_from_slice(&len.to_be_bytes());
    buf
}

pub fn password(password: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(6 + password.len());
    tagged(&mut buf, b'p', |body| put_cstr(body, password));
    buf
}

/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, pass: &str, salt: &[u8]) -> BytesMut {
    password(&md5_hash(user, pass, salt))
}

pub fn md5_hash(user: &str, pass: &str, salt: &[u8]) -> String {
    let mut inner = Context::new();
    inner.consume(pass.as_bytes());
    inner.consume(user.as_bytes());
    let inner_hex = format!("{:x}", inner.compute());

    let mut outer = Context::new();
    outer.consume(inner_hex.as_bytes());
    outer.consume(salt);
    format!("md5{:x}", outer.compute())
}

pub fn terminate() -> BytesMut {
    let mut buf = BytesMut::with_capacity(5);
    tagged(&mut buf, b'X', |_| {});
    buf
}

// -----------------------------------------------------------------------------
// ----- Extended query --------------------------------------------------------

/// Parse + Bind + Describe(portal) + Execute + Sync for the unnamed statement
/// and portal, all parameters and results in text format.
///
/// Refuses what the frame cannot carry: more than `i16::MAX` parameters, and
/// NUL bytes, which end a C string and are never valid in text values.
pub fn extended_query(statement: &str, params: &[Param<'_>]) -> Result<BytesMut, DriverError> {
    let param_count = i16::try_from(params.len()).map_err(|_| {
        DriverError::Encode(format!(
            "{} parameters exceed the protocol limit of {}",
            params.len(),
            i16::MAX
        ))
    })?;
    if statement.contains('\0') {
        return Err(DriverError::Encode(
            "statement contains a NUL byte".to_string(),
        ));
    }
    if let Some(index) = params.iter().position(|p| p.is_some_and(|v| v.contains('\0'))) {
        return Err(DriverError::Encode(format!(
            "parameter ${} contains a NUL byte",
            index + 1
        )));
    }

    let mut buf = BytesMut::with_capacity(64 + statement.len());

    // Parse: unnamed statement, let the server infer parameter types.
    tagged(&mut buf, b'P', |body| {
        put_cstr(body, "");
        put_cstr(body, statement);
        body.put_i16(0);
    });

    // Bind: unnamed portal, default (text) formats.
    tagged(&mut buf, b'B', |body| {
        put_cstr(body, "");
        put_cstr(body, "");
        body.put_i16(0);
        body.put_i16(param_count);
        for param in params {
            match param {
                Some(value) => {
                    body.put_i32(value.len() as i32);
                    body.put_slice(value.as_bytes());
                }
                None => body.put_i32(-1),
            }
        }
        body.put_i16(0);
    });

    tagged(&mut buf, b'D', |body| {
        body.put_u8(b'P');
        put_cstr(body, "");
    });

    tagged(&mut buf, b'E', |body| {
        put_cstr(body, "");
        body.put_i32(0);
    });

    tagged(&mut buf, b'S', |_| {});
    Ok(buf)
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn tagged(buf: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(tag);
    let len_at = buf.len();
    buf.put_u32(0);
    body(buf);
    let len = (buf.len() - len_at) as u32;
    buf[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
}

#[inline]
fn put_cstr(buf: &mut BytesMut, value: &str) {
    buf.extend_from_slice(value.as_bytes());
    buf.put_u8(0);
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
