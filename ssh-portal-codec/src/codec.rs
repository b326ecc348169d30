//! User-code mnemonic codec (spec §3, §4.5).
//!
//! A 64-bit secret splits into a 32-bit `relayCode` (minted by the relay) and a
//! 32-bit `receiverCode` (minted by the receiver). Concatenated big-endian the
//! halves form `fullCode`, the SSH password the sender must present. For humans
//! the same 64 bits render as `word-word-word-word-ddd-dddd`: the high 44 bits
//! are four 11-bit dictionary indices, the low 20 bits a zero-padded decimal.

use data_encoding::BASE64_NOPAD as BASE64;
use ssh_portal_common::helpers::rng::get_crypto_rng;

use crate::error::CodecError;
use crate::wordlist;

const NUM_MASK: u64 = 0xF_FFFF; // 20 bits
const WORD_MASK: u64 = 0x7FF; // 11 bits
const MAX_NUM: u32 = 0xF_FFFF;

/// 4 random bytes, raw base64 (no padding). Used for both relay and receiver halves.
fn generate_code_half() -> String {
    use rand::RngCore;
    let mut buf = [0u8; 4];
    get_crypto_rng().fill_bytes(&mut buf);
    BASE64.encode(&buf)
}

pub fn generate_relay_code() -> String {
    generate_code_half()
}

pub fn generate_receiver_code() -> String {
    generate_code_half()
}

fn decode_half(b64: &str) -> Result<[u8; 4], CodecError> {
    let bytes = BASE64
        .decode(b64.as_bytes())
        .map_err(CodecError::Base64)?;
    bytes.try_into().map_err(|_| CodecError::BadCodeLength)
}

/// Combines a relay half and a receiver half into the mnemonic user code plus
/// `fullB64`, the raw base64 of the concatenated 8-byte secret.
pub fn generate_user_code(relay_b64: &str, receiver_b64: &str) -> Result<(String, String), CodecError> {
    let relay = decode_half(relay_b64)?;
    let receiver = decode_half(receiver_b64)?;

    let mut full = [0u8; 8];
    full[..4].copy_from_slice(&relay);
    full[4..].copy_from_slice(&receiver);

    let full_b64 = BASE64.encode(&full);
    let v = u64::from_be_bytes(full);

    let w1 = wordlist::word_at(((v >> 53) & WORD_MASK) as u16);
    let w2 = wordlist::word_at(((v >> 42) & WORD_MASK) as u16);
    let w3 = wordlist::word_at(((v >> 31) & WORD_MASK) as u16);
    let w4 = wordlist::word_at(((v >> 20) & WORD_MASK) as u16);
    let num = (v & NUM_MASK) as u32;

    let user_code = format!("{w1}-{w2}-{w3}-{w4}-{:03}-{:04}", num / 10_000, num % 10_000);
    Ok((user_code, full_b64))
}

/// Reverses [`generate_user_code`], returning `(relayB64, receiverB64, fullB64)`.
pub fn parse_user_code(user_code: &str) -> Result<(String, String, String), CodecError> {
    let parts: Vec<&str> = user_code.split('-').collect();
    let [w1, w2, w3, w4, ddd, dddd] = parts[..] else {
        return Err(CodecError::BadShape);
    };

    let idx = |w: &str| wordlist::index_of(w).ok_or_else(|| CodecError::UnknownWord(w.to_string()));
    let i1 = idx(w1)? as u64;
    let i2 = idx(w2)? as u64;
    let i3 = idx(w3)? as u64;
    let i4 = idx(w4)? as u64;

    if ddd.len() != 3 || dddd.len() != 4 || !ddd.bytes().all(|b| b.is_ascii_digit()) || !dddd.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CodecError::BadShape);
    }
    let num: u32 = format!("{ddd}{dddd}").parse().map_err(|_| CodecError::BadShape)?;
    if num > MAX_NUM {
        return Err(CodecError::NumericOverflow(num));
    }

    let v = (i1 << 53) | (i2 << 42) | (i3 << 31) | (i4 << 20) | (num as u64);
    let full = v.to_be_bytes();

    let relay_b64 = BASE64.encode(&full[..4]);
    let receiver_b64 = BASE64.encode(&full[4..]);
    let full_b64 = BASE64.encode(&full);

    Ok((relay_b64, receiver_b64, full_b64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_random_codes() {
        for _ in 0..200 {
            let relay = generate_relay_code();
            let receiver = generate_receiver_code();
            let (user_code, full_b64) = generate_user_code(&relay, &receiver).unwrap();
            let (relay2, receiver2, full_b64_2) = parse_user_code(&user_code).unwrap();
            assert_eq!(relay, relay2);
            assert_eq!(receiver, receiver2);
            assert_eq!(full_b64, full_b64_2);
        }
    }

    #[test]
    fn rejects_numeric_overflow() {
        let code = "aveke-aveke-aveke-aveke-999-9999";
        // 9999999 > 0xFFFFF (1048575), must be rejected regardless of words.
        match parse_user_code(code) {
            Err(CodecError::NumericOverflow(_)) | Err(CodecError::UnknownWord(_)) => {}
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_shape() {
        assert!(matches!(parse_user_code("not-enough-parts"), Err(CodecError::BadShape)));
    }

    #[test]
    fn word_lookup_is_case_insensitive_end_to_end() {
        let (user_code, _) = generate_user_code(&generate_relay_code(), &generate_receiver_code()).unwrap();
        let upper = user_code.to_uppercase();
        assert!(parse_user_code(&upper).is_ok());
    }

    #[test]
    fn rejects_bad_half_length() {
        assert!(matches!(decode_half(&BASE64.encode(&[1, 2, 3])), Err(CodecError::BadCodeLength)));
    }
}
