//! Connectivity supervisor. Owns the link lifecycle state machine, the
//! credential cache, and the reconnect/health-check policy. The radio and the
//! persistence layer come in through traits so the policy is testable without
//! hardware.

mod engine;
mod health;
mod machine;

use embassy_time::Timer;
use esp_println::println;
use heapless::Vec;

use super::arbiter::RadioArbiter;
use super::config::{CONNECT_BACKOFF_MS, CONNECT_RETRY_MAX};
use super::store::CredentialStore;
use super::types::{
    Credentials, DiscoveredNetwork, LinkError, LinkState, SaveError, StoreError, SCAN_RESULTS_MAX,
};

pub(crate) use engine::LinkEngine;
pub(crate) use health::HealthCheckTimer;
pub(crate) use machine::LinkEvent;

/// Network attachment as the supervisor sees it. `connect` blocks through the
/// join and address acquisition and reports one attempt's outcome.
pub trait NetLink {
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), LinkError>;
    async fn is_connected(&mut self) -> bool;
    async fn disconnect(&mut self);
    /// Brings up the provisioning access point alongside the station
    /// interface so scans keep working while the portal is reachable.
    async fn enter_provisioning(&mut self) -> Result<(), LinkError>;
    async fn scan(&mut self) -> Result<Vec<DiscoveredNetwork, SCAN_RESULTS_MAX>, LinkError>;
}

/// What the owning task should do after a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickDirective {
    ServicePortal,
    Idle,
}

pub struct Supervisor<L, S, A> {
    engine: LinkEngine,
    link: L,
    store: S,
    arbiter: A,
    health: HealthCheckTimer,
    credentials: Option<Credentials>,
    portal_ready: bool,
    storage_fatal: bool,
}

impl<L: NetLink, S: CredentialStore, A: RadioArbiter> Supervisor<L, S, A> {
    pub fn new(link: L, store: S, arbiter: A, now_ms: u64) -> Self {
        Self {
            engine: LinkEngine::new(),
            link,
            store,
            arbiter,
            health: HealthCheckTimer::new(now_ms),
            credentials: None,
            portal_ready: false,
            storage_fatal: false,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.engine.link_state()
    }

    /// Loads stored credentials and leaves `Uninitialized`. Missing or
    /// malformed records route to the portal; unreachable storage is fatal
    /// and parks the supervisor.
    pub async fn initialize(&mut self) {
        match self.store.load() {
            Ok(credentials) => {
                println!("net::supervisor: credentials loaded id={}", credentials.id);
                self.credentials = Some(credentials);
                let _ = self.engine.apply(LinkEvent::CredentialsLoaded);
            }
            Err(StoreError::NotFound) => {
                println!("net::supervisor: no stored credentials");
                let _ = self.engine.apply(LinkEvent::CredentialsUnavailable);
            }
            Err(StoreError::InvalidData) => {
                println!("net::supervisor: stored credentials malformed");
                let _ = self.engine.apply(LinkEvent::CredentialsUnavailable);
            }
            Err(StoreError::Unavailable) => {
                println!("net::supervisor: credential storage unavailable, halting");
                self.storage_fatal = true;
            }
        }
    }

    /// One full connection round: up to `CONNECT_RETRY_MAX` attempts with a
    /// fixed backoff between them. Exhaustion hands the device to the portal.
    pub async fn attempt_connection(&mut self, now_ms: u64) {
        if matches!(self.engine.link_state(), LinkState::Connected) {
            return;
        }
        let Some(credentials) = self.credentials.clone() else {
            let _ = self.engine.apply(LinkEvent::CredentialsUnavailable);
            return;
        };
        if !credentials.valid_for_connect() {
            println!("net::supervisor: stored credentials unusable");
            let _ = self.engine.apply(LinkEvent::CredentialsUnavailable);
            return;
        }

        self.arbiter.advise_pause().await;
        for attempt in 1..=CONNECT_RETRY_MAX {
            Timer::after_millis(CONNECT_BACKOFF_MS).await;
            match self.link.connect(&credentials).await {
                Ok(()) => {
                    println!("net::supervisor: link up attempt={attempt}");
                    let _ = self.engine.apply(LinkEvent::LinkUp);
                    self.health.reset(now_ms);
                    self.arbiter.advise_resume().await;
                    return;
                }
                Err(error) => {
                    println!("net::supervisor: connect failed attempt={attempt} error={error:?}");
                }
            }
        }
        self.arbiter.advise_resume().await;

        println!("net::supervisor: retries exhausted, opening portal");
        let _ = self.engine.apply(LinkEvent::RetriesExhausted);
    }

    /// Periodic poll. Connected links get a health probe on the configured
    /// cadence; a dead link drops back to `Connecting` and reconnects here.
    pub async fn tick(&mut self, now_ms: u64) -> TickDirective {
        match self.engine.link_state() {
            LinkState::Uninitialized => {
                // Once storage is declared dead the supervisor stays parked;
                // neither a connect round nor the portal can do useful work.
                if !self.storage_fatal {
                    self.initialize().await;
                }
                TickDirective::Idle
            }
            LinkState::Connecting => {
                self.attempt_connection(now_ms).await;
                TickDirective::Idle
            }
            LinkState::Connected => {
                if self.health.due(now_ms) && !self.link.is_connected().await {
                    println!("net::supervisor: health check failed, reconnecting");
                    self.link.disconnect().await;
                    let _ = self.engine.apply(LinkEvent::LinkLost);
                    self.attempt_connection(now_ms).await;
                }
                TickDirective::Idle
            }
            LinkState::ProvisioningActive => {
                if !self.portal_ready {
                    match self.link.enter_provisioning().await {
                        Ok(()) => {
                            println!("net::supervisor: provisioning portal up");
                            self.portal_ready = true;
                        }
                        Err(error) => {
                            println!("net::supervisor: portal bring-up failed error={error:?}");
                            return TickDirective::Idle;
                        }
                    }
                }
                TickDirective::ServicePortal
            }
        }
    }

    /// Validates and persists portal-submitted credentials. The in-memory
    /// cache and the state machine only move once the store write lands.
    pub async fn save_credentials(&mut self, id: &str, secret: &str) -> Result<(), SaveError> {
        let credentials =
            Credentials::from_parts(id, secret).map_err(|_| SaveError::InvalidInput)?;
        if !credentials.valid_for_connect() {
            return Err(SaveError::InvalidInput);
        }
        self.store.save(&credentials).map_err(SaveError::Store)?;
        println!("net::supervisor: credentials saved id={}", credentials.id);
        self.credentials = Some(credentials);
        let _ = self.engine.apply(LinkEvent::CredentialsSaved);
        Ok(())
    }

    pub async fn scan_networks(
        &mut self,
    ) -> Result<Vec<DiscoveredNetwork, SCAN_RESULTS_MAX>, LinkError> {
        self.link.scan().await
    }

    pub async fn radio_pause(&mut self) {
        self.arbiter.advise_pause().await;
    }

    pub async fn radio_resume(&mut self) {
        self.arbiter.advise_resume().await;
    }
}
