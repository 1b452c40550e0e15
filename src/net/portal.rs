//! Provisioning portal. A one-connection-at-a-time HTTP/1.0 server that
//! serves the setup page, a network scan, and the credential save endpoint
//! while the device has no usable uplink.

use core::cmp::min;

use embedded_io_async::{Read, Write};
use esp_println::println;
use heapless::{String, Vec};

use serde::Serialize;

use super::arbiter::RadioArbiter;
use super::store::CredentialStore;
use super::supervisor::{NetLink, Supervisor};
use super::types::{DiscoveredNetwork, SaveError, SECRET_MAX, SSID_MAX};

const HTTP_HEADER_MAX: usize = 1024;
const FORM_BODY_MAX: usize = 256;
const SCAN_JSON_MAX: usize = 1536;

const PORTAL_PAGE: &str = include_str!("../../assets/portal.html");
const SAVED_BODY: &[u8] = b"Configuration saved. Rebooting...";
const MISSING_PARAMS_BODY: &[u8] = b"Missing parameters";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortalOutcome {
    Served,
    Saved,
}

#[derive(Serialize)]
struct ScanDocument<'a> {
    networks: &'a [DiscoveredNetwork],
}

/// Handles one accepted portal connection end to end. Scan and save both
/// touch the radio, so the whole exchange runs under a pause advisory.
pub async fn serve<T, L, S, A>(
    io: &mut T,
    supervisor: &mut Supervisor<L, S, A>,
) -> Result<PortalOutcome, &'static str>
where
    T: Read + Write,
    L: NetLink,
    S: CredentialStore,
    A: RadioArbiter,
{
    supervisor.radio_pause().await;
    let outcome = handle_connection(io, supervisor).await;
    supervisor.radio_resume().await;
    outcome
}

async fn handle_connection<T, L, S, A>(
    io: &mut T,
    supervisor: &mut Supervisor<L, S, A>,
) -> Result<PortalOutcome, &'static str>
where
    T: Read + Write,
    L: NetLink,
    S: CredentialStore,
    A: RadioArbiter,
{
    let mut header_buf = [0u8; HTTP_HEADER_MAX];
    let mut filled = 0usize;
    let header_end = loop {
        if filled == header_buf.len() {
            write_response(io, b"413 Payload Too Large", b"text/plain", b"header too large").await;
            return Err("header too large");
        }

        let n = io
            .read(&mut header_buf[filled..])
            .await
            .map_err(|_| "read")?;
        if n == 0 {
            return Err("eof");
        }
        filled += n;

        if let Some(end) = find_header_end(&header_buf[..filled]) {
            break end;
        }
    };

    let header = core::str::from_utf8(&header_buf[..header_end]).map_err(|_| "header utf8")?;
    let (method, target) = parse_request_line(header).ok_or("bad request line")?;
    let content_length = parse_content_length(header).unwrap_or(0);
    let body_start = header_end + 4;
    let body_bytes_in_buffer = filled.saturating_sub(body_start);

    match (method, target_path(target)) {
        ("GET", "/") => {
            write_response(io, b"200 OK", b"text/html", PORTAL_PAGE.as_bytes()).await;
            Ok(PortalOutcome::Served)
        }
        ("GET", "/scan") => {
            let networks = match supervisor.scan_networks().await {
                Ok(networks) => networks,
                Err(error) => {
                    println!("net::portal: scan failed error={error:?}");
                    write_response(io, b"503 Service Unavailable", b"text/plain", b"scan failed")
                        .await;
                    return Ok(PortalOutcome::Served);
                }
            };
            let document = ScanDocument {
                networks: networks.as_slice(),
            };
            let mut json = [0u8; SCAN_JSON_MAX];
            let len = serde_json_core::to_slice(&document, &mut json).map_err(|_| "scan json")?;
            write_response(io, b"200 OK", b"application/json", &json[..len]).await;
            Ok(PortalOutcome::Served)
        }
        ("POST", "/save") => {
            if content_length == 0 || content_length > FORM_BODY_MAX {
                write_response(io, b"400 Bad Request", b"text/plain", MISSING_PARAMS_BODY).await;
                return Ok(PortalOutcome::Served);
            }

            let mut body = [0u8; FORM_BODY_MAX];
            let carried = min(body_bytes_in_buffer, content_length);
            body[..carried].copy_from_slice(&header_buf[body_start..body_start + carried]);
            let mut body_filled = carried;
            while body_filled < content_length {
                let n = io
                    .read(&mut body[body_filled..content_length])
                    .await
                    .map_err(|_| "read body")?;
                if n == 0 {
                    return Err("incomplete body");
                }
                body_filled += n;
            }

            let form = core::str::from_utf8(&body[..content_length]).map_err(|_| "body utf8")?;
            let id = form_field::<SSID_MAX>(form, "id");
            let secret = form_field::<SECRET_MAX>(form, "secret");
            let (Some(id), Some(secret)) = (id, secret) else {
                write_response(io, b"400 Bad Request", b"text/plain", MISSING_PARAMS_BODY).await;
                return Ok(PortalOutcome::Served);
            };

            match supervisor.save_credentials(&id, &secret).await {
                Ok(()) => {
                    write_response(io, b"200 OK", b"text/plain", SAVED_BODY).await;
                    Ok(PortalOutcome::Saved)
                }
                Err(SaveError::InvalidInput) => {
                    write_response(io, b"400 Bad Request", b"text/plain", MISSING_PARAMS_BODY)
                        .await;
                    Ok(PortalOutcome::Served)
                }
                Err(SaveError::Store(error)) => {
                    println!("net::portal: save failed error={error:?}");
                    write_response(
                        io,
                        b"500 Internal Server Error",
                        b"text/plain",
                        b"save failed",
                    )
                    .await;
                    Ok(PortalOutcome::Served)
                }
            }
        }
        _ => {
            write_response(io, b"404 Not Found", b"text/plain", b"not found").await;
            Ok(PortalOutcome::Served)
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_request_line(header: &str) -> Option<(&str, &str)> {
    let first_line = header.lines().next()?;
    let mut parts = first_line.split_ascii_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let _version = parts.next()?;
    Some((method, target))
}

fn parse_content_length(header: &str) -> Option<usize> {
    for line in header.lines().skip(1) {
        let (name, value) = line.split_once(':')?;
        if name.eq_ignore_ascii_case("content-length") {
            return value.trim().parse::<usize>().ok();
        }
    }
    None
}

fn target_path(target: &str) -> &str {
    target.split('?').next().unwrap_or(target)
}

/// Extracts and percent-decodes one `application/x-www-form-urlencoded`
/// field. `None` covers absent keys, decode errors, and overlong values
/// alike; the caller only needs usable-or-not.
fn form_field<const N: usize>(form: &str, key: &str) -> Option<String<N>> {
    for pair in form.split('&') {
        let Some((name, encoded)) = pair.split_once('=') else {
            continue;
        };
        if name == key {
            return percent_decode(encoded);
        }
    }
    None
}

fn percent_decode<const N: usize>(encoded: &str) -> Option<String<N>> {
    let mut out: Vec<u8, N> = Vec::new();
    let bytes = encoded.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        let decoded = if b == b'%' {
            if i + 2 >= bytes.len() {
                return None;
            }
            let hi = decode_hex(bytes[i + 1])?;
            let lo = decode_hex(bytes[i + 2])?;
            i += 3;
            (hi << 4) | lo
        } else if b == b'+' {
            i += 1;
            b' '
        } else {
            i += 1;
            b
        };
        out.push(decoded).ok()?;
    }

    String::from_utf8(out).ok()
}

fn decode_hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(10 + (b - b'a')),
        b'A'..=b'F' => Some(10 + (b - b'A')),
        _ => None,
    }
}

async fn write_response<T: Write>(io: &mut T, status: &[u8], content_type: &[u8], body: &[u8]) {
    let _ = io.write_all(b"HTTP/1.0 ").await;
    let _ = io.write_all(status).await;
    let _ = io.write_all(b"\r\nContent-Type: ").await;
    let _ = io.write_all(content_type).await;
    let _ = io.write_all(b"\r\nConnection: close\r\n\r\n").await;
    let _ = io.write_all(body).await;
    let _ = io.flush().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_end_found_after_blank_line() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nbody"), Some(23));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\nHost: x\r\n"), None);
    }

    #[test]
    fn request_line_splits_method_and_target() {
        let header = "POST /save HTTP/1.1\r\nHost: portal";
        assert_eq!(parse_request_line(header), Some(("POST", "/save")));
    }

    #[test]
    fn content_length_is_case_insensitive() {
        let header = "POST /save HTTP/1.1\r\ncontent-LENGTH: 17\r\nHost: portal";
        assert_eq!(parse_content_length(header), Some(17));
    }

    #[test]
    fn form_field_decodes_escapes() {
        let form = "id=My%20Net&secret=p%40ss+word";
        assert_eq!(form_field::<32>(form, "id").as_deref(), Some("My Net"));
        assert_eq!(form_field::<64>(form, "secret").as_deref(), Some("p@ss word"));
    }

    #[test]
    fn missing_field_is_none() {
        assert!(form_field::<32>("secret=abc", "id").is_none());
    }

    #[test]
    fn valueless_pairs_are_skipped() {
        let form = "id=HomeNet&flag&secret=abc";
        assert_eq!(form_field::<32>(form, "id").as_deref(), Some("HomeNet"));
        assert_eq!(form_field::<64>(form, "secret").as_deref(), Some("abc"));
    }

    #[test]
    fn truncated_escape_is_rejected() {
        assert!(percent_decode::<32>("abc%2").is_none());
        assert!(percent_decode::<32>("abc%zz").is_none());
    }

    #[test]
    fn overlong_value_is_rejected() {
        assert!(percent_decode::<4>("abcde").is_none());
    }
}
