use heapless::String;
use serde::{Deserialize, Serialize};

pub const SSID_MAX: usize = 32;
pub const SECRET_MAX: usize = 64;
pub const SCAN_RESULTS_MAX: usize = 16;
/// Hard cap on the body the bounded exchange client will hold.
pub const RESPONSE_BODY_MAX: usize = 512;

/// Network identity plus secret. The same shape is the persisted JSON
/// document and the product of a portal `/save` submission; persisted
/// wholesale, never field-by-field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub id: String<SSID_MAX>,
    pub secret: String<SECRET_MAX>,
}

impl Credentials {
    pub fn from_parts(id: &str, secret: &str) -> Result<Self, CredentialsError> {
        if id.is_empty() {
            return Err(CredentialsError::EmptyId);
        }
        let id = String::try_from(id).map_err(|_| CredentialsError::TooLong)?;
        let secret = String::try_from(secret).map_err(|_| CredentialsError::TooLong)?;
        Ok(Self { id, secret })
    }

    /// Only credentials with both fields non-empty ever reach the radio.
    pub fn valid_for_connect(&self) -> bool {
        !self.id.is_empty() && !self.secret.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialsError {
    EmptyId,
    TooLong,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Uninitialized,
    Connecting,
    Connected,
    ProvisioningActive,
}

/// One scan hit, serialized into the portal's `/scan` response. Transient;
/// never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiscoveredNetwork {
    pub id: String<SSID_MAX>,
    pub signal: i8,
    pub secured: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// No record has ever been written.
    NotFound,
    /// A record exists but its frame or document is unusable. There is no
    /// partial-credential success.
    InvalidData,
    /// The backing storage itself failed; fatal at startup.
    Unavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkError {
    ConfigRejected,
    StartFailed,
    ConnectFailed,
    DhcpTimeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeError {
    /// Transport could not be established within its own budget.
    Connect,
    /// The first-byte or header phase deadline elapsed.
    Timeout,
    /// The transport failed mid-exchange.
    Transport,
    /// The remote closed without sending a single body byte. No transport
    /// error occurred; callers treat this as a silent rejection.
    EmptyBody,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveError {
    /// A field was empty or over length; the store was not touched.
    InvalidInput,
    Store(StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_id_is_rejected() {
        assert_eq!(
            Credentials::from_parts("", "secret123"),
            Err(CredentialsError::EmptyId)
        );
    }

    #[test]
    fn empty_secret_is_not_valid_for_connect() {
        let credentials = Credentials::from_parts("Home", "").unwrap();
        assert!(!credentials.valid_for_connect());
    }

    #[test]
    fn oversized_fields_are_rejected() {
        let long = core::str::from_utf8(&[b'a'; 80]).unwrap();
        assert_eq!(
            Credentials::from_parts("Home", long),
            Err(CredentialsError::TooLong)
        );
    }
}
