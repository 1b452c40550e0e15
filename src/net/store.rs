use embedded_storage::{ReadStorage, Storage};
use esp_storage::FlashStorage;

use super::types::{Credentials, StoreError};

// Worst case: 21 bytes of JSON framing plus every credential byte escaping
// to a six-byte \uXXXX sequence (21 + 6*32 + 6*64 = 597).
pub const CREDENTIAL_DOC_MAX: usize = 608;
pub const CREDENTIAL_STORE_MAGIC: u32 = 0x4B4C_5447; // "GTLK"
pub const CREDENTIAL_STORE_VERSION: u8 = 1;
pub const CREDENTIAL_STORE_RECORD_LEN: usize = 4 + 1 + 2 + CREDENTIAL_DOC_MAX + 1;

/// Whole-blob credential persistence. `load` either yields a complete,
/// well-formed credential pair or fails; `save` is a single overwrite and
/// the previous value stays good unless the write succeeds.
pub trait CredentialStore {
    fn load(&mut self) -> Result<Credentials, StoreError>;
    fn save(&mut self, credentials: &Credentials) -> Result<(), StoreError>;
}

pub fn encode_document(
    credentials: &Credentials,
    out: &mut [u8; CREDENTIAL_DOC_MAX],
) -> Result<usize, StoreError> {
    serde_json_core::to_slice(credentials, out).map_err(|_| StoreError::InvalidData)
}

pub fn parse_document(raw: &[u8]) -> Result<Credentials, StoreError> {
    let (credentials, _) =
        serde_json_core::from_slice::<Credentials>(raw).map_err(|_| StoreError::InvalidData)?;
    if credentials.id.is_empty() {
        return Err(StoreError::InvalidData);
    }
    Ok(credentials)
}

pub fn frame_record(doc: &[u8]) -> [u8; CREDENTIAL_STORE_RECORD_LEN] {
    let mut record = [0xFFu8; CREDENTIAL_STORE_RECORD_LEN];
    record[0..4].copy_from_slice(&CREDENTIAL_STORE_MAGIC.to_le_bytes());
    record[4] = CREDENTIAL_STORE_VERSION;
    record[5..7].copy_from_slice(&(doc.len() as u16).to_le_bytes());
    record[7..7 + doc.len()].copy_from_slice(doc);
    record[CREDENTIAL_STORE_RECORD_LEN - 1] =
        checksum8(&record[..CREDENTIAL_STORE_RECORD_LEN - 1]);
    record
}

pub fn unframe_record(record: &[u8; CREDENTIAL_STORE_RECORD_LEN]) -> Result<&[u8], StoreError> {
    if record.iter().all(|&byte| byte == 0xFF) {
        return Err(StoreError::NotFound);
    }
    if u32::from_le_bytes([record[0], record[1], record[2], record[3]]) != CREDENTIAL_STORE_MAGIC {
        return Err(StoreError::NotFound);
    }
    if record[4] != CREDENTIAL_STORE_VERSION {
        return Err(StoreError::InvalidData);
    }
    let expected = checksum8(&record[..CREDENTIAL_STORE_RECORD_LEN - 1]);
    if record[CREDENTIAL_STORE_RECORD_LEN - 1] != expected {
        return Err(StoreError::InvalidData);
    }
    let doc_len = u16::from_le_bytes([record[5], record[6]]) as usize;
    if doc_len == 0 || doc_len > CREDENTIAL_DOC_MAX {
        return Err(StoreError::InvalidData);
    }
    Ok(&record[7..7 + doc_len])
}

fn checksum8(bytes: &[u8]) -> u8 {
    let mut acc = 0xA5u8;
    for &byte in bytes {
        acc = acc.rotate_left(3) ^ byte;
    }
    acc
}

/// Credential record stored in the last flash sector.
pub struct FlashCredentialStore<'d> {
    flash: FlashStorage<'d>,
    offset: u32,
}

impl<'d> FlashCredentialStore<'d> {
    pub fn new(flash_peripheral: esp_hal::peripherals::FLASH<'d>) -> Self {
        let flash = FlashStorage::new(flash_peripheral).multicore_auto_park();
        let capacity = flash.capacity() as u32;
        let offset = capacity.saturating_sub(FlashStorage::SECTOR_SIZE);
        Self { flash, offset }
    }
}

impl CredentialStore for FlashCredentialStore<'_> {
    fn load(&mut self) -> Result<Credentials, StoreError> {
        let mut record = [0u8; CREDENTIAL_STORE_RECORD_LEN];
        self.flash
            .read(self.offset, &mut record)
            .map_err(|_| StoreError::Unavailable)?;
        parse_document(unframe_record(&record)?)
    }

    fn save(&mut self, credentials: &Credentials) -> Result<(), StoreError> {
        let mut doc = [0u8; CREDENTIAL_DOC_MAX];
        let doc_len = encode_document(credentials, &mut doc)?;
        let record = frame_record(&doc[..doc_len]);
        self.flash
            .write(self.offset, &record)
            .map_err(|_| StoreError::Unavailable)
    }
}
