use core::net::Ipv4Addr;

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};

/// Access point identity while the provisioning portal is active.
pub const AP_SSID: &str = "gatelink-setup";
pub const AP_GATEWAY_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
pub const PORTAL_PORT: u16 = 80;

/// Link health is re-checked at most this often, no matter how fast the
/// supervisor is polled.
pub const HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;

pub const CONNECT_RETRY_MAX: u32 = 3;
pub const CONNECT_BACKOFF_MS: u64 = 1_000;
pub const CONNECT_POLL_MS: u64 = 1_000;
pub const CONNECT_ATTEMPT_WAIT_MS: u64 = 10_000;
// 20s gives several DHCP request/retry rounds on healthy APs without
// masking a hung join.
pub const DHCP_WAIT_MS: u64 = 20_000;

pub const API_PORT: u16 = 443;
pub const DNS_TIMEOUT_MS: u64 = 5_000;
pub const TCP_CONNECT_TIMEOUT_MS: u64 = 5_000;
/// Settle window after tearing down the previous socket, before a fresh
/// outbound connection is attempted.
pub const CONNECT_SETTLE_MS: u64 = 100;
pub const RESPONSE_PHASE_TIMEOUT_MS: u64 = 5_000;

/// How long one supervisor tick waits for a pending portal connection.
/// This bounds the latency of a provisioning tick: an idle window elapses
/// and control returns to the supervisor loop.
pub const PORTAL_ACCEPT_WINDOW_MS: u64 = 1_000;
pub const TICK_IDLE_MS: u64 = 250;

/// Fire-and-forget pause (`true`) / resume (`false`) advisories for the
/// subsystem sharing the 2.4 GHz radio. Never awaited on the sending side.
pub static RADIO_COEX_ADVISORIES: Channel<CriticalSectionRawMutex, bool, 4> = Channel::new();
