use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use std::fmt::Write;

const ITERATIONS: u32 = 4096;
const KEY_LEN: usize = 32;
const PASSPHRASE_MIN: usize = 8;
const PASSPHRASE_MAX: usize = 63;

/// Derive the WPA pre-shared key for `ssid` from a plaintext passphrase.
///
/// PBKDF2-HMAC-SHA1 with the SSID bytes as salt, 4096 rounds, 256 bit output,
/// rendered as 64 lower-case hex digits.
pub fn derive_psk(ssid: &str, passphrase: &str) -> String {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha1>(passphrase.as_bytes(), ssid.as_bytes(), ITERATIONS, &mut key);

    key.iter().fold(String::with_capacity(KEY_LEN * 2), |mut hex, b| {
        let _ = write!(hex, "{b:02x}");
        hex
    })
}

/// A 64 digit hex string is an already derived key
pub fn is_derived_key(psk: &str) -> bool {
    psk.len() == KEY_LEN * 2 && psk.chars().all(|c| c.is_ascii_hexdigit())
}

/// WPA passphrases are 8 to 63 printable ASCII characters
pub fn is_passphrase(psk: &str) -> bool {
    (PASSPHRASE_MIN..=PASSPHRASE_MAX).contains(&psk.len())
        && psk.bytes().all(|b| b.is_ascii_graphic() || b == b' ')
}

/// Accepted by both `wpa_supplicant` and `hostapd`: a passphrase or a derived key
pub fn is_valid_psk(psk: &str) -> bool {
    is_derived_key(psk) || is_passphrase(psk)
}
