//! On-target behavior tests for the connectivity stack: the bounded HTTP
//! exchange, the provisioning portal routes, and the supervisor's
//! connect/fallback policy, all driven through in-memory fakes.

#![no_std]
#![no_main]

#[cfg(test)]
#[embedded_test::tests(executor = esp_rtos::embassy::Executor::new())]
mod tests {
    use core::cell::{Cell, RefCell};
    use core::cmp::min;
    use core::convert::Infallible;

    use embedded_io_async::{ErrorType, Read, Write};
    use heapless::Vec;

    use gatelink::net::arbiter::NoopArbiter;
    use gatelink::net::client::{exchange, Method};
    use gatelink::net::portal::{self, PortalOutcome};
    use gatelink::net::store::CredentialStore;
    use gatelink::net::supervisor::{NetLink, Supervisor, TickDirective};
    use gatelink::net::types::{
        Credentials, DiscoveredNetwork, LinkError, LinkState, StoreError, ExchangeError,
        RESPONSE_BODY_MAX, SCAN_RESULTS_MAX,
    };

    const HOST: &str = "api.example.com";

    /// Serves a canned byte stream and records everything written to it.
    /// Reads return EOF once the input is exhausted, like a closed peer.
    struct ScriptedTransport<'a> {
        input: &'a [u8],
        pos: usize,
        written: Vec<u8, 4096>,
    }

    impl<'a> ScriptedTransport<'a> {
        fn new(input: &'a [u8]) -> Self {
            Self {
                input,
                pos: 0,
                written: Vec::new(),
            }
        }
    }

    impl ErrorType for ScriptedTransport<'_> {
        type Error = Infallible;
    }

    impl Read for ScriptedTransport<'_> {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let take = min(buf.len(), self.input.len() - self.pos);
            buf[..take].copy_from_slice(&self.input[self.pos..self.pos + take]);
            self.pos += take;
            Ok(take)
        }
    }

    impl Write for ScriptedTransport<'_> {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.written.extend_from_slice(buf).unwrap();
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    struct MemoryStore<'a> {
        initial: Result<Credentials, StoreError>,
        saved: &'a RefCell<Option<Credentials>>,
    }

    impl CredentialStore for MemoryStore<'_> {
        fn load(&mut self) -> Result<Credentials, StoreError> {
            self.initial.clone()
        }

        fn save(&mut self, credentials: &Credentials) -> Result<(), StoreError> {
            *self.saved.borrow_mut() = Some(credentials.clone());
            Ok(())
        }
    }

    struct FakeLink<'a> {
        connect_ok: bool,
        connect_calls: &'a Cell<u32>,
        networks: Vec<DiscoveredNetwork, SCAN_RESULTS_MAX>,
    }

    impl NetLink for FakeLink<'_> {
        async fn connect(&mut self, _credentials: &Credentials) -> Result<(), LinkError> {
            self.connect_calls.set(self.connect_calls.get() + 1);
            if self.connect_ok {
                Ok(())
            } else {
                Err(LinkError::ConnectFailed)
            }
        }

        async fn is_connected(&mut self) -> bool {
            self.connect_ok
        }

        async fn disconnect(&mut self) {}

        async fn enter_provisioning(&mut self) -> Result<(), LinkError> {
            Ok(())
        }

        async fn scan(&mut self) -> Result<Vec<DiscoveredNetwork, SCAN_RESULTS_MAX>, LinkError> {
            Ok(self.networks.clone())
        }
    }

    fn supervisor<'a>(
        initial: Result<Credentials, StoreError>,
        connect_ok: bool,
        connect_calls: &'a Cell<u32>,
        saved: &'a RefCell<Option<Credentials>>,
    ) -> Supervisor<FakeLink<'a>, MemoryStore<'a>, NoopArbiter> {
        let link = FakeLink {
            connect_ok,
            connect_calls,
            networks: Vec::new(),
        };
        let store = MemoryStore { initial, saved };
        Supervisor::new(link, store, NoopArbiter, 0)
    }

    fn response_text<'a>(transport: &'a ScriptedTransport<'_>) -> &'a str {
        core::str::from_utf8(&transport.written).unwrap()
    }

    #[init]
    fn init() {
        let peripherals = esp_hal::init(esp_hal::Config::default());
        let timg0 = esp_hal::timer::timg::TimerGroup::new(peripherals.TIMG0);
        esp_rtos::start(timg0.timer0);
    }

    #[test]
    async fn exchange_reads_small_body() {
        let mut transport =
            ScriptedTransport::new(b"HTTP/1.0 200 OK\r\nContent-Length: 10\r\n\r\n0123456789");
        let response = exchange(&mut transport, HOST, "/status", Method::Get, None)
            .await
            .unwrap();
        assert_eq!(response.body(), b"0123456789");
        assert!(!response.truncated());
    }

    #[test]
    async fn exchange_writes_request_framing() {
        let mut transport = ScriptedTransport::new(b"HTTP/1.0 200 OK\r\n\r\nok");
        let _ = exchange(&mut transport, HOST, "/status", Method::Get, None)
            .await
            .unwrap();
        let request = response_text(&transport);
        assert!(request.starts_with("GET /status HTTP/1.0\r\nHost: api.example.com\r\n"));
        assert!(request.contains("Connection: close\r\n"));
    }

    #[test]
    async fn exchange_post_carries_body_and_length() {
        let mut transport = ScriptedTransport::new(b"HTTP/1.0 200 OK\r\n\r\nok");
        let _ = exchange(
            &mut transport,
            HOST,
            "/records",
            Method::Post,
            Some(b"{\"v\":1}"),
        )
        .await
        .unwrap();
        let request = response_text(&transport);
        assert!(request.starts_with("POST /records HTTP/1.0\r\n"));
        assert!(request.contains("Content-Length: 7\r\n\r\n{\"v\":1}"));
    }

    #[test]
    async fn exchange_empty_body_is_failure() {
        let mut transport = ScriptedTransport::new(b"HTTP/1.0 204 No Content\r\n\r\n");
        let result = exchange(&mut transport, HOST, "/status", Method::Get, None).await;
        assert!(matches!(result, Err(ExchangeError::EmptyBody)));
    }

    #[test]
    async fn exchange_immediate_close_is_failure() {
        let mut transport = ScriptedTransport::new(b"");
        let result = exchange(&mut transport, HOST, "/status", Method::Get, None).await;
        assert!(matches!(result, Err(ExchangeError::EmptyBody)));
    }

    #[test]
    async fn exchange_caps_body_and_reports_truncation() {
        let mut raw = [b'x'; 19 + 600];
        raw[..19].copy_from_slice(b"HTTP/1.0 200 OK\r\n\r\n");
        let mut transport = ScriptedTransport::new(&raw);
        let response = exchange(&mut transport, HOST, "/status", Method::Get, None)
            .await
            .unwrap();
        assert_eq!(response.body().len(), RESPONSE_BODY_MAX);
        assert!(response.truncated());
    }

    #[test]
    async fn exchange_body_at_cap_is_not_truncated() {
        let mut raw = [b'x'; 19 + RESPONSE_BODY_MAX];
        raw[..19].copy_from_slice(b"HTTP/1.0 200 OK\r\n\r\n");
        let mut transport = ScriptedTransport::new(&raw);
        let response = exchange(&mut transport, HOST, "/status", Method::Get, None)
            .await
            .unwrap();
        assert_eq!(response.body().len(), RESPONSE_BODY_MAX);
        assert!(!response.truncated());
    }

    #[test]
    async fn portal_serves_setup_page() {
        let calls = Cell::new(0);
        let saved = RefCell::new(None);
        let mut sup = supervisor(Err(StoreError::NotFound), false, &calls, &saved);
        let mut transport = ScriptedTransport::new(b"GET / HTTP/1.1\r\nHost: portal\r\n\r\n");
        let outcome = portal::serve(&mut transport, &mut sup).await.unwrap();
        assert_eq!(outcome, PortalOutcome::Served);
        let response = response_text(&transport);
        assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(response.contains("text/html"));
    }

    #[test]
    async fn portal_save_persists_credentials() {
        let calls = Cell::new(0);
        let saved = RefCell::new(None);
        let mut sup = supervisor(Err(StoreError::NotFound), false, &calls, &saved);
        let mut transport = ScriptedTransport::new(
            b"POST /save HTTP/1.1\r\nHost: portal\r\nContent-Length: 26\r\n\r\nid=HomeNet&secret=pass1234",
        );
        let outcome = portal::serve(&mut transport, &mut sup).await.unwrap();
        assert_eq!(outcome, PortalOutcome::Saved);
        assert!(response_text(&transport).contains("Configuration saved. Rebooting..."));
        let stored = saved.borrow().clone().unwrap();
        assert_eq!(stored.id.as_str(), "HomeNet");
        assert_eq!(stored.secret.as_str(), "pass1234");
    }

    #[test]
    async fn portal_save_missing_field_is_rejected() {
        let calls = Cell::new(0);
        let saved = RefCell::new(None);
        let mut sup = supervisor(Err(StoreError::NotFound), false, &calls, &saved);
        let mut transport = ScriptedTransport::new(
            b"POST /save HTTP/1.1\r\nHost: portal\r\nContent-Length: 10\r\n\r\nid=HomeNet",
        );
        let outcome = portal::serve(&mut transport, &mut sup).await.unwrap();
        assert_eq!(outcome, PortalOutcome::Served);
        let response = response_text(&transport);
        assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"));
        assert!(response.contains("Missing parameters"));
        assert!(saved.borrow().is_none());
    }

    #[test]
    async fn portal_unknown_route_is_404() {
        let calls = Cell::new(0);
        let saved = RefCell::new(None);
        let mut sup = supervisor(Err(StoreError::NotFound), false, &calls, &saved);
        let mut transport = ScriptedTransport::new(b"GET /nope HTTP/1.1\r\nHost: portal\r\n\r\n");
        let outcome = portal::serve(&mut transport, &mut sup).await.unwrap();
        assert_eq!(outcome, PortalOutcome::Served);
        assert!(response_text(&transport).starts_with("HTTP/1.0 404 Not Found\r\n"));
    }

    #[test]
    async fn portal_scan_reports_networks_as_json() {
        let calls = Cell::new(0);
        let saved = RefCell::new(None);
        let mut networks = Vec::new();
        networks
            .push(DiscoveredNetwork {
                id: heapless::String::try_from("CafeNet").unwrap(),
                signal: -61,
                secured: true,
            })
            .unwrap();
        let link = FakeLink {
            connect_ok: false,
            connect_calls: &calls,
            networks,
        };
        let store = MemoryStore {
            initial: Err(StoreError::NotFound),
            saved: &saved,
        };
        let mut sup = Supervisor::new(link, store, NoopArbiter, 0);
        let mut transport = ScriptedTransport::new(b"GET /scan HTTP/1.1\r\nHost: portal\r\n\r\n");
        let outcome = portal::serve(&mut transport, &mut sup).await.unwrap();
        assert_eq!(outcome, PortalOutcome::Served);
        let response = response_text(&transport);
        assert!(response.contains("application/json"));
        assert!(response.contains("\"networks\":["));
        assert!(response.contains("\"id\":\"CafeNet\""));
        assert!(response.contains("\"signal\":-61"));
    }

    #[test]
    async fn supervisor_without_credentials_opens_portal() {
        let calls = Cell::new(0);
        let saved = RefCell::new(None);
        let mut sup = supervisor(Err(StoreError::NotFound), true, &calls, &saved);
        assert_eq!(sup.tick(0).await, TickDirective::Idle);
        assert_eq!(sup.tick(250).await, TickDirective::ServicePortal);
        assert_eq!(sup.link_state(), LinkState::ProvisioningActive);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    async fn supervisor_parks_when_storage_is_unavailable() {
        let calls = Cell::new(0);
        let saved = RefCell::new(None);
        let mut sup = supervisor(Err(StoreError::Unavailable), true, &calls, &saved);
        assert_eq!(sup.tick(0).await, TickDirective::Idle);
        assert_eq!(sup.tick(250).await, TickDirective::Idle);
        assert_eq!(sup.tick(500).await, TickDirective::Idle);
        assert_eq!(sup.link_state(), LinkState::Uninitialized);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    async fn supervisor_connects_with_stored_credentials() {
        let calls = Cell::new(0);
        let saved = RefCell::new(None);
        let credentials = Credentials::from_parts("HomeNet", "pass1234").unwrap();
        let mut sup = supervisor(Ok(credentials), true, &calls, &saved);
        assert_eq!(sup.tick(0).await, TickDirective::Idle);
        assert_eq!(sup.tick(250).await, TickDirective::Idle);
        assert_eq!(sup.link_state(), LinkState::Connected);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    async fn supervisor_exhausts_retries_then_opens_portal() {
        let calls = Cell::new(0);
        let saved = RefCell::new(None);
        let credentials = Credentials::from_parts("HomeNet", "pass1234").unwrap();
        let mut sup = supervisor(Ok(credentials), false, &calls, &saved);
        let _ = sup.tick(0).await;
        let _ = sup.tick(250).await;
        assert_eq!(sup.link_state(), LinkState::ProvisioningActive);
        assert_eq!(calls.get(), 3);
        assert_eq!(sup.tick(500).await, TickDirective::ServicePortal);
    }

    #[test]
    async fn saved_credentials_move_supervisor_out_of_provisioning() {
        let calls = Cell::new(0);
        let saved = RefCell::new(None);
        let mut sup = supervisor(Err(StoreError::NotFound), true, &calls, &saved);
        let _ = sup.tick(0).await;
        let _ = sup.tick(250).await;
        assert_eq!(sup.link_state(), LinkState::ProvisioningActive);
        sup.save_credentials("HomeNet", "pass1234").await.unwrap();
        assert_eq!(sup.link_state(), LinkState::Connecting);
        assert!(saved.borrow().is_some());
    }
}
