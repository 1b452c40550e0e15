//! Bounded HTTP exchange over an already-established transport. The caller
//! owns connection setup and teardown; this module owns the request framing
//! and the phase-budgeted, size-capped response read.

use core::cmp::min;

use embassy_futures::yield_now;
use embassy_time::{with_timeout, Duration, Instant};
use embedded_io_async::{Read, Write};

use super::config::RESPONSE_PHASE_TIMEOUT_MS;
use super::types::{ExchangeError, RESPONSE_BODY_MAX};

const RESPONSE_HEADER_MAX: usize = 1024;
const YIELD_BATCH_BYTES: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    fn token(self) -> &'static [u8] {
        match self {
            Method::Get => b"GET",
            Method::Post => b"POST",
        }
    }
}

/// Response body, capped at `RESPONSE_BODY_MAX` bytes. A capped read is still
/// a success; `truncated` says whether the peer had more to say.
pub struct ExchangeResponse {
    buf: [u8; RESPONSE_BODY_MAX],
    len: usize,
    truncated: bool,
}

impl ExchangeResponse {
    pub fn body(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

/// Writes the request and reads the response under three independent time
/// budgets: first response byte, end of headers, body. An empty body is a
/// failure; a timeout after at least one body byte is not.
pub async fn exchange<T: Read + Write>(
    transport: &mut T,
    host: &str,
    path: &str,
    method: Method,
    body: Option<&[u8]>,
) -> Result<ExchangeResponse, ExchangeError> {
    send_request(transport, host, path, method, body).await?;
    read_response(transport).await
}

async fn send_request<T: Read + Write>(
    transport: &mut T,
    host: &str,
    path: &str,
    method: Method,
    body: Option<&[u8]>,
) -> Result<(), ExchangeError> {
    transport
        .write_all(method.token())
        .await
        .map_err(|_| ExchangeError::Transport)?;
    transport
        .write_all(b" ")
        .await
        .map_err(|_| ExchangeError::Transport)?;
    transport
        .write_all(path.as_bytes())
        .await
        .map_err(|_| ExchangeError::Transport)?;
    transport
        .write_all(b" HTTP/1.0\r\nHost: ")
        .await
        .map_err(|_| ExchangeError::Transport)?;
    transport
        .write_all(host.as_bytes())
        .await
        .map_err(|_| ExchangeError::Transport)?;
    transport
        .write_all(b"\r\nConnection: close\r\n")
        .await
        .map_err(|_| ExchangeError::Transport)?;

    if let Some(body) = body {
        transport
            .write_all(b"Content-Type: application/json\r\n")
            .await
            .map_err(|_| ExchangeError::Transport)?;
        let mut length_line = [0u8; 40];
        let line_len = format_content_length(body.len(), &mut length_line);
        transport
            .write_all(&length_line[..line_len])
            .await
            .map_err(|_| ExchangeError::Transport)?;
        transport
            .write_all(b"\r\n\r\n")
            .await
            .map_err(|_| ExchangeError::Transport)?;
        transport
            .write_all(body)
            .await
            .map_err(|_| ExchangeError::Transport)?;
    } else {
        transport
            .write_all(b"\r\n")
            .await
            .map_err(|_| ExchangeError::Transport)?;
    }

    transport.flush().await.map_err(|_| ExchangeError::Transport)
}

async fn read_response<T: Read>(transport: &mut T) -> Result<ExchangeResponse, ExchangeError> {
    let phase_budget = Duration::from_millis(RESPONSE_PHASE_TIMEOUT_MS);

    // Phase 1: first response byte.
    let mut header_buf = [0u8; RESPONSE_HEADER_MAX];
    let first = with_timeout(phase_budget, transport.read(&mut header_buf))
        .await
        .map_err(|_| ExchangeError::Timeout)?
        .map_err(|_| ExchangeError::Transport)?;
    if first == 0 {
        return Err(ExchangeError::EmptyBody);
    }
    let mut filled = first;

    // Phase 2: consume the status line and headers.
    let header_deadline = Instant::now() + phase_budget;
    let header_end = loop {
        if let Some(end) = find_header_end(&header_buf[..filled]) {
            break end;
        }
        if filled == header_buf.len() {
            return Err(ExchangeError::Transport);
        }
        let remaining = header_deadline
            .checked_duration_since(Instant::now())
            .ok_or(ExchangeError::Timeout)?;
        let n = with_timeout(remaining, transport.read(&mut header_buf[filled..]))
            .await
            .map_err(|_| ExchangeError::Timeout)?
            .map_err(|_| ExchangeError::Transport)?;
        if n == 0 {
            return Err(ExchangeError::EmptyBody);
        }
        filled += n;
    };
    let body_start = header_end + 4;

    // Phase 3: body, capped at the buffer. Bytes past the cap mark the
    // response truncated; the read yields between batches so long bodies do
    // not starve the executor.
    let mut response = ExchangeResponse {
        buf: [0u8; RESPONSE_BODY_MAX],
        len: 0,
        truncated: false,
    };
    let carried = min(filled - body_start, response.buf.len());
    response.buf[..carried].copy_from_slice(&header_buf[body_start..body_start + carried]);
    response.len = carried;
    if filled - body_start > response.buf.len() {
        response.truncated = true;
    }

    let body_deadline = Instant::now() + phase_budget;
    let mut batched = carried;
    while !response.truncated {
        if batched >= YIELD_BATCH_BYTES {
            batched = 0;
            yield_now().await;
        }
        let Some(remaining) = body_deadline.checked_duration_since(Instant::now()) else {
            break;
        };
        if response.len == response.buf.len() {
            // Cap reached. One more read decides whether the peer was done.
            let mut probe = [0u8; 1];
            match with_timeout(remaining, transport.read(&mut probe)).await {
                Ok(Ok(0)) => {}
                Ok(Ok(_)) => response.truncated = true,
                Ok(Err(_)) | Err(_) => {}
            }
            break;
        }
        let read = with_timeout(remaining, transport.read(&mut response.buf[response.len..])).await;
        match read {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                response.len += n;
                batched += n;
            }
            Ok(Err(_)) => return Err(ExchangeError::Transport),
            // The budget elapsed mid-body; whatever arrived stands.
            Err(_) => break,
        }
    }

    if response.len == 0 {
        return Err(ExchangeError::EmptyBody);
    }
    Ok(response)
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

fn format_content_length(len: usize, out: &mut [u8; 40]) -> usize {
    const PREFIX: &[u8] = b"Content-Length: ";
    out[..PREFIX.len()].copy_from_slice(PREFIX);
    let mut digits = [0u8; 20];
    let mut value = len;
    let mut count = 0usize;
    loop {
        digits[count] = b'0' + (value % 10) as u8;
        value /= 10;
        count += 1;
        if value == 0 {
            break;
        }
    }
    for i in 0..count {
        out[PREFIX.len() + i] = digits[count - 1 - i];
    }
    PREFIX.len() + count
}
