//! Advisory radio-activity signalling. Subsystems that share the antenna or
//! the power budget with WiFi (BLE coexistence, duty-cycled sensors) can
//! subscribe to pause/resume advisories around bursts of radio work.

use super::config::RADIO_COEX_ADVISORIES;

pub trait RadioArbiter {
    async fn advise_pause(&mut self);
    async fn advise_resume(&mut self);
}

/// Arbiter for builds with nothing else on the radio.
#[derive(Default)]
pub struct NoopArbiter;

impl RadioArbiter for NoopArbiter {
    async fn advise_pause(&mut self) {}
    async fn advise_resume(&mut self) {}
}

/// Publishes advisories on the shared coex channel. Advisories are best
/// effort: a full channel drops the notification rather than stalling the
/// connection path.
#[derive(Default)]
pub struct CoexChannelArbiter;

impl RadioArbiter for CoexChannelArbiter {
    async fn advise_pause(&mut self) {
        let _ = RADIO_COEX_ADVISORIES.try_send(true);
    }

    async fn advise_resume(&mut self) {
        let _ = RADIO_COEX_ADVISORIES.try_send(false);
    }
}
