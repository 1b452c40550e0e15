//! Radio bring-up and the embassy tasks that own it: the dual AP/STA stack
//! pair, the provisioning DHCP server, the supervisor loop, and the TLS
//! client used for outbound API calls once the uplink is up.

use core::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use embassy_net::{
    dns::DnsQueryType, tcp::TcpSocket, IpListenEndpoint, Ipv4Cidr, Runner, Stack, StackResources,
    StaticConfigV4,
};
use embassy_time::{with_timeout, Duration, Instant, Timer};
use embedded_tls::{Aes128GcmSha256, TlsConfig, TlsConnection, TlsContext, UnsecureProvider};
use esp_hal::rng::Rng;
use esp_println::println;
use esp_radio::wifi::{
    AccessPointConfig, AuthMethod, ClientConfig, Config as WifiRuntimeConfig, ModeConfig,
    ScanConfig, WifiController, WifiDevice,
};
use heapless::{String, Vec};
use rand_core::{CryptoRng, RngCore};
use static_cell::StaticCell;

use super::arbiter::CoexChannelArbiter;
use super::client::{self, ExchangeResponse, Method};
use super::config::{
    AP_GATEWAY_IP, AP_SSID, API_PORT, CONNECT_ATTEMPT_WAIT_MS, CONNECT_POLL_MS, CONNECT_SETTLE_MS,
    DHCP_WAIT_MS, DNS_TIMEOUT_MS, PORTAL_ACCEPT_WINDOW_MS, PORTAL_PORT, TCP_CONNECT_TIMEOUT_MS,
    TICK_IDLE_MS,
};
use super::portal::{self, PortalOutcome};
use super::store::FlashCredentialStore;
use super::supervisor::{NetLink, Supervisor, TickDirective};
use super::types::{
    Credentials, DiscoveredNetwork, ExchangeError, LinkError, SCAN_RESULTS_MAX, SSID_MAX,
};

const PORTAL_RW_BUF: usize = 2048;
const API_SOCKET_RW_BUF: usize = 2048;
// Record buffers sized for API responses, not arbitrary peers; the body cap
// keeps payloads far below a full 16 KiB TLS record.
const TLS_READ_RECORD_BUF: usize = 4096;
const TLS_WRITE_RECORD_BUF: usize = 2048;

const WIFI_RX_QUEUE_SIZE: usize = 3;
const WIFI_TX_QUEUE_SIZE: usize = 2;
const WIFI_STATIC_RX_BUF_NUM: u8 = 4;
const WIFI_DYNAMIC_RX_BUF_NUM: u16 = 8;
const WIFI_DYNAMIC_TX_BUF_NUM: u16 = 8;
const WIFI_RX_BA_WIN: u8 = 3;

pub struct NetRuntime {
    pub controller: WifiController<'static>,
    pub ap_runner: Runner<'static, WifiDevice<'static>>,
    pub sta_runner: Runner<'static, WifiDevice<'static>>,
    pub ap_stack: Stack<'static>,
    pub sta_stack: Stack<'static>,
}

/// Initializes the radio and both network stacks. The AP stack carries the
/// portal on a static subnet; the STA stack is a DHCP client on the uplink.
pub fn setup(wifi: esp_hal::peripherals::WIFI<'static>) -> Result<NetRuntime, &'static str> {
    static RADIO_CTRL: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    static AP_STACK_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
    static STA_STACK_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();

    let radio_ctrl = esp_radio::init().map_err(|_| "net: esp_radio::init failed")?;
    let radio_ctrl = RADIO_CTRL.init(radio_ctrl);
    let (controller, ifaces) = esp_radio::wifi::new(radio_ctrl, wifi, wifi_runtime_config())
        .map_err(|_| "net: wifi init failed")?;

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;

    let ap_config = embassy_net::Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(AP_GATEWAY_IP, 24),
        gateway: Some(AP_GATEWAY_IP),
        dns_servers: Default::default(),
    });
    let (ap_stack, ap_runner) = embassy_net::new(
        ifaces.ap,
        ap_config,
        AP_STACK_RESOURCES.init(StackResources::new()),
        seed,
    );
    let (sta_stack, sta_runner) = embassy_net::new(
        ifaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        STA_STACK_RESOURCES.init(StackResources::new()),
        seed,
    );

    Ok(NetRuntime {
        controller,
        ap_runner,
        sta_runner,
        ap_stack,
        sta_stack,
    })
}

fn wifi_runtime_config() -> WifiRuntimeConfig {
    WifiRuntimeConfig::default()
        .with_rx_queue_size(WIFI_RX_QUEUE_SIZE)
        .with_tx_queue_size(WIFI_TX_QUEUE_SIZE)
        .with_static_rx_buf_num(WIFI_STATIC_RX_BUF_NUM)
        .with_dynamic_rx_buf_num(WIFI_DYNAMIC_RX_BUF_NUM)
        .with_dynamic_tx_buf_num(WIFI_DYNAMIC_TX_BUF_NUM)
        .with_ampdu_rx_enable(false)
        .with_ampdu_tx_enable(false)
        .with_rx_ba_win(WIFI_RX_BA_WIN)
}

#[embassy_executor::task]
pub async fn ap_net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

#[embassy_executor::task]
pub async fn sta_net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// Leases portal-subnet addresses to whoever joins the setup AP.
#[embassy_executor::task]
pub async fn dhcp_server_task(stack: Stack<'static>) {
    use edge_dhcp::{
        io::{self, DEFAULT_SERVER_PORT},
        server::{Server, ServerOptions},
    };
    use edge_nal::UdpBind;
    use edge_nal_embassy::{Udp, UdpBuffers};

    stack.wait_link_up().await;

    let mut buf = [0u8; 1500];
    let mut gw_buf = [Ipv4Addr::UNSPECIFIED];

    let buffers = UdpBuffers::<3, 1024, 1024, 10>::new();
    let unbound_socket = Udp::new(stack, &buffers);
    let mut bound_socket = match unbound_socket
        .bind(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            DEFAULT_SERVER_PORT,
        )))
        .await
    {
        Ok(socket) => socket,
        Err(_) => {
            println!("net::runtime: dhcp bind failed");
            return;
        }
    };

    loop {
        if io::server::run(
            &mut Server::<_, 8>::new_with_et(AP_GATEWAY_IP),
            &ServerOptions::new(AP_GATEWAY_IP, Some(&mut gw_buf)),
            &mut bound_socket,
            &mut buf,
        )
        .await
        .is_err()
        {
            println!("net::runtime: dhcp server error");
        }
        Timer::after_millis(500).await;
    }
}

/// Drives the supervisor: reconnect policy while a link is wanted, portal
/// service while provisioning. A successful save restarts the chip so the
/// next boot comes up clean in station mode.
#[embassy_executor::task]
pub async fn supervisor_task(
    controller: WifiController<'static>,
    ap_stack: Stack<'static>,
    sta_stack: Stack<'static>,
    flash: esp_hal::peripherals::FLASH<'static>,
) {
    let link = EspNetLink {
        controller,
        sta_stack,
    };
    let store = FlashCredentialStore::new(flash);
    let mut supervisor = Supervisor::new(
        link,
        store,
        CoexChannelArbiter,
        Instant::now().as_millis(),
    );

    let mut rx_buffer = [0u8; PORTAL_RW_BUF];
    let mut tx_buffer = [0u8; PORTAL_RW_BUF];

    loop {
        match supervisor.tick(Instant::now().as_millis()).await {
            TickDirective::ServicePortal => {
                service_portal(&mut supervisor, ap_stack, &mut rx_buffer, &mut tx_buffer).await;
            }
            TickDirective::Idle => {
                Timer::after_millis(TICK_IDLE_MS).await;
            }
        }
    }
}

async fn service_portal(
    supervisor: &mut Supervisor<EspNetLink, FlashCredentialStore<'static>, CoexChannelArbiter>,
    ap_stack: Stack<'static>,
    rx_buffer: &mut [u8],
    tx_buffer: &mut [u8],
) {
    let mut socket = TcpSocket::new(ap_stack, rx_buffer, tx_buffer);
    socket.set_timeout(Some(Duration::from_secs(20)));

    // Bounded accept, not a blocking listen: a quiet portal hands the task
    // back to the tick loop when the window elapses.
    let accepted = with_timeout(
        Duration::from_millis(PORTAL_ACCEPT_WINDOW_MS),
        socket.accept(IpListenEndpoint {
            addr: None,
            port: PORTAL_PORT,
        }),
    )
    .await;
    let Ok(accepted) = accepted else {
        return;
    };
    if let Err(err) = accepted {
        println!("net::runtime: portal accept err={:?}", err);
        return;
    }

    let outcome = portal::serve(&mut socket, supervisor).await;

    let _ = socket.flush().await;
    Timer::after(Duration::from_millis(20)).await;
    socket.close();
    Timer::after(Duration::from_millis(20)).await;
    socket.abort();

    match outcome {
        Ok(PortalOutcome::Saved) => {
            println!("net::runtime: credentials saved, restarting");
            Timer::after(Duration::from_millis(CONNECT_SETTLE_MS)).await;
            esp_hal::system::software_reset();
        }
        Ok(PortalOutcome::Served) => {}
        Err(err) => {
            println!("net::runtime: portal request err={}", err);
        }
    }
}

/// WiFi attachment over esp-radio. Station joins drive the DHCP client on
/// the STA stack; provisioning runs AP+STA so scans work while the portal
/// subnet is up.
struct EspNetLink {
    controller: WifiController<'static>,
    sta_stack: Stack<'static>,
}

impl NetLink for EspNetLink {
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), LinkError> {
        let client = ClientConfig::default()
            .with_ssid(credentials.id.as_str().into())
            .with_password(credentials.secret.as_str().into());
        self.controller
            .set_config(&ModeConfig::Client(client))
            .map_err(|_| LinkError::ConfigRejected)?;

        match self.controller.is_started() {
            Ok(true) => {}
            _ => {
                self.controller
                    .start_async()
                    .await
                    .map_err(|_| LinkError::StartFailed)?;
            }
        }

        if let Err(err) = self.controller.connect_async().await {
            println!("net::runtime: wifi connect err={:?}", err);
            let _ = self.controller.disconnect_async().await;
            return Err(LinkError::ConnectFailed);
        }

        let deadline = Instant::now() + Duration::from_millis(CONNECT_ATTEMPT_WAIT_MS);
        while !self.sta_stack.is_link_up() {
            if Instant::now() >= deadline {
                let _ = self.controller.disconnect_async().await;
                return Err(LinkError::ConnectFailed);
            }
            Timer::after_millis(CONNECT_POLL_MS).await;
        }

        with_timeout(
            Duration::from_millis(DHCP_WAIT_MS),
            self.sta_stack.wait_config_up(),
        )
        .await
        .map_err(|_| LinkError::DhcpTimeout)?;

        if let Some(cfg) = self.sta_stack.config_v4() {
            println!("net::runtime: uplink address={}", cfg.address.address());
        }
        Ok(())
    }

    async fn is_connected(&mut self) -> bool {
        matches!(self.controller.is_connected(), Ok(true)) && self.sta_stack.is_link_up()
    }

    async fn disconnect(&mut self) {
        let _ = self.controller.disconnect_async().await;
    }

    async fn enter_provisioning(&mut self) -> Result<(), LinkError> {
        if matches!(self.controller.is_started(), Ok(true)) {
            let _ = self.controller.stop_async().await;
        }

        let ap = AccessPointConfig::default().with_ssid(AP_SSID.into());
        self.controller
            .set_config(&ModeConfig::ApSta(ClientConfig::default(), ap))
            .map_err(|_| LinkError::ConfigRejected)?;
        self.controller
            .start_async()
            .await
            .map_err(|_| LinkError::StartFailed)?;
        Ok(())
    }

    async fn scan(&mut self) -> Result<Vec<DiscoveredNetwork, SCAN_RESULTS_MAX>, LinkError> {
        let found = self
            .controller
            .scan_with_config_async(ScanConfig::default())
            .await
            .map_err(|_| LinkError::ConnectFailed)?;

        let mut networks = Vec::new();
        for ap in found.iter() {
            let Ok(id) = String::<SSID_MAX>::try_from(ap.ssid.as_str()) else {
                continue;
            };
            if id.is_empty() {
                continue;
            }
            let network = DiscoveredNetwork {
                id,
                signal: ap.signal_strength,
                secured: !matches!(ap.auth_method, Some(AuthMethod::None)),
            };
            if networks.push(network).is_err() {
                break;
            }
        }
        Ok(networks)
    }
}

/// Outbound HTTPS caller. Every call builds a fresh DNS + TCP + TLS path and
/// tears it down afterwards, so one bad exchange cannot poison the next.
pub struct ApiClient {
    stack: Stack<'static>,
    host: &'static str,
    rng: Rng,
}

impl ApiClient {
    /// Certificate verification is disabled: the session is encrypted but
    /// the peer is not authenticated. Callers that need authenticity must
    /// verify payloads at the application layer.
    pub fn new_insecure(stack: Stack<'static>, host: &'static str) -> Self {
        Self {
            stack,
            host,
            rng: Rng::new(),
        }
    }

    pub async fn fetch(
        &mut self,
        path: &str,
        method: Method,
        body: Option<&[u8]>,
    ) -> Result<ExchangeResponse, ExchangeError> {
        let addresses = with_timeout(
            Duration::from_millis(DNS_TIMEOUT_MS),
            self.stack.dns_query(self.host, DnsQueryType::A),
        )
        .await
        .map_err(|_| ExchangeError::Connect)?
        .map_err(|_| ExchangeError::Connect)?;
        let address = *addresses.first().ok_or(ExchangeError::Connect)?;

        let mut rx_buffer = [0u8; API_SOCKET_RW_BUF];
        let mut tx_buffer = [0u8; API_SOCKET_RW_BUF];
        let mut socket = TcpSocket::new(self.stack, &mut rx_buffer, &mut tx_buffer);
        with_timeout(
            Duration::from_millis(TCP_CONNECT_TIMEOUT_MS),
            socket.connect((address, API_PORT)),
        )
        .await
        .map_err(|_| ExchangeError::Connect)?
        .map_err(|_| ExchangeError::Connect)?;

        let mut read_record_buffer = [0u8; TLS_READ_RECORD_BUF];
        let mut write_record_buffer = [0u8; TLS_WRITE_RECORD_BUF];
        let config = TlsConfig::new().with_server_name(self.host);
        let mut tls: TlsConnection<'_, _, Aes128GcmSha256> =
            TlsConnection::new(&mut socket, &mut read_record_buffer, &mut write_record_buffer);
        tls.open(TlsContext::new(
            &config,
            UnsecureProvider::new::<Aes128GcmSha256>(EspRandom(self.rng)),
        ))
        .await
        .map_err(|_| ExchangeError::Connect)?;

        let result = client::exchange(&mut tls, self.host, path, method, body).await;

        let _ = tls.close().await;
        let _ = socket.flush().await;
        Timer::after(Duration::from_millis(20)).await;
        socket.close();
        Timer::after(Duration::from_millis(20)).await;
        socket.abort();
        Timer::after(Duration::from_millis(CONNECT_SETTLE_MS)).await;

        result
    }
}

struct EspRandom(Rng);

impl RngCore for EspRandom {
    fn next_u32(&mut self) -> u32 {
        self.0.random()
    }

    fn next_u64(&mut self) -> u64 {
        (self.0.random() as u64) << 32 | self.0.random() as u64
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let word = self.0.random().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for EspRandom {}
