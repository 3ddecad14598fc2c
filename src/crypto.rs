//! OTAA join primitives.
//!
//! Session keys are derived from the AppKey and the join nonces with plain
//! AES-128 blocks; frame integrity uses a 4-byte AES-CMAC tag. Nothing
//! here is novel; the simulator only needs the byte counts and the join
//! handshake to be faithful so frame sizes and join timing match reality.

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use cmac::{Cmac, Mac};

/// Derived session key pair of one activated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub nwk_s_key: [u8; 16],
    pub app_s_key: [u8; 16],
}

impl SessionKeys {
    /// All-zero keys for devices modeled as pre-provisioned (ABP).
    pub fn zeroed() -> Self {
        Self { nwk_s_key: [0u8; 16], app_s_key: [0u8; 16] }
    }
}

/// MAC-layer byte overhead of a data uplink:
/// MHDR(1) + DevAddr(4) + FCtrl(1) + FCnt(2) + FPort(1) + MIC(4).
pub const MAC_OVERHEAD_BYTES: usize = 13;

/// Byte length of a JoinRequest frame: MHDR(1) + JoinEUI(8) + DevEUI(8) +
/// DevNonce(2) + MIC(4).
pub const JOIN_REQUEST_BYTES: usize = 23;

/// Encrypt one 16-byte block with AES-128.
fn aes128_block(key: &[u8; 16], block: [u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buf = GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut buf);
    buf.into()
}

/// Derive NwkSKey and AppSKey from the AppKey and the join nonces.
///
/// Per the LoRaWAN 1.0 key schedule:
/// `NwkSKey = aes128(AppKey, 0x01 | AppNonce | NetID | DevNonce | pad16)`
/// `AppSKey = aes128(AppKey, 0x02 | AppNonce | NetID | DevNonce | pad16)`
pub fn derive_session_keys(app_key: &[u8; 16], app_nonce: [u8; 3], net_id: [u8; 3], dev_nonce: [u8; 2]) -> SessionKeys {
    let mut block = [0u8; 16];
    block[1..4].copy_from_slice(&app_nonce);
    block[4..7].copy_from_slice(&net_id);
    block[7..9].copy_from_slice(&dev_nonce);

    block[0] = 0x01;
    let nwk_s_key = aes128_block(app_key, block);
    block[0] = 0x02;
    let app_s_key = aes128_block(app_key, block);

    SessionKeys { nwk_s_key, app_s_key }
}

/// 4-byte MIC over a frame: the leading bytes of AES-CMAC(key, data).
pub fn compute_mic(key: &[u8; 16], data: &[u8]) -> [u8; 4] {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).expect("AES-128 CMAC accepts 16-byte keys");
    mac.update(data);
    let tag = mac.finalize().into_bytes();
    [tag[0], tag[1], tag[2], tag[3]]
}

/// Verify a frame's MIC in constant structure (the simulator never carries
/// attacker-controlled data, so plain comparison suffices).
pub fn verify_mic(key: &[u8; 16], data: &[u8], mic: &[u8; 4]) -> bool {
    compute_mic(key, data) == *mic
}
