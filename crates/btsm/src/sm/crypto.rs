//! Cryptographic toolbox for LE legacy pairing
//!
//! Implements the confirm value generation function c1 and the key
//! generation function s1 over a self-contained AES-128 block cipher.
//! All 128-bit values are handled most significant byte first; the PDU
//! codecs convert to and from wire order.

use super::constants::SMP_MAX_PASSKEY;
use rand::Rng;

/// AES S-box
static SBOX: [u8; 256] = [
    0x63, 0x7c, 0x77, 0x7b, 0xf2, 0x6b, 0x6f, 0xc5, 0x30, 0x01, 0x67, 0x2b, 0xfe, 0xd7, 0xab, 0x76,
    0xca, 0x82, 0xc9, 0x7d, 0xfa, 0x59, 0x47, 0xf0, 0xad, 0xd4, 0xa2, 0xaf, 0x9c, 0xa4, 0x72, 0xc0,
    0xb7, 0xfd, 0x93, 0x26, 0x36, 0x3f, 0xf7, 0xcc, 0x34, 0xa5, 0xe5, 0xf1, 0x71, 0xd8, 0x31, 0x15,
    0x04, 0xc7, 0x23, 0xc3, 0x18, 0x96, 0x05, 0x9a, 0x07, 0x12, 0x80, 0xe2, 0xeb, 0x27, 0xb2, 0x75,
    0x09, 0x83, 0x2c, 0x1a, 0x1b, 0x6e, 0x5a, 0xa0, 0x52, 0x3b, 0xd6, 0xb3, 0x29, 0xe3, 0x2f, 0x84,
    0x53, 0xd1, 0x00, 0xed, 0x20, 0xfc, 0xb1, 0x5b, 0x6a, 0xcb, 0xbe, 0x39, 0x4a, 0x4c, 0x58, 0xcf,
    0xd0, 0xef, 0xaa, 0xfb, 0x43, 0x4d, 0x33, 0x85, 0x45, 0xf9, 0x02, 0x7f, 0x50, 0x3c, 0x9f, 0xa8,
    0x51, 0xa3, 0x40, 0x8f, 0x92, 0x9d, 0x38, 0xf5, 0xbc, 0xb6, 0xda, 0x21, 0x10, 0xff, 0xf3, 0xd2,
    0xcd, 0x0c, 0x13, 0xec, 0x5f, 0x97, 0x44, 0x17, 0xc4, 0xa7, 0x7e, 0x3d, 0x64, 0x5d, 0x19, 0x73,
    0x60, 0x81, 0x4f, 0xdc, 0x22, 0x2a, 0x90, 0x88, 0x46, 0xee, 0xb8, 0x14, 0xde, 0x5e, 0x0b, 0xdb,
    0xe0, 0x32, 0x3a, 0x0a, 0x49, 0x06, 0x24, 0x5c, 0xc2, 0xd3, 0xac, 0x62, 0x91, 0x95, 0xe4, 0x79,
    0xe7, 0xc8, 0x37, 0x6d, 0x8d, 0xd5, 0x4e, 0xa9, 0x6c, 0x56, 0xf4, 0xea, 0x65, 0x7a, 0xae, 0x08,
    0xba, 0x78, 0x25, 0x2e, 0x1c, 0xa6, 0xb4, 0xc6, 0xe8, 0xdd, 0x74, 0x1f, 0x4b, 0xbd, 0x8b, 0x8a,
    0x70, 0x3e, 0xb5, 0x66, 0x48, 0x03, 0xf6, 0x0e, 0x61, 0x35, 0x57, 0xb9, 0x86, 0xc1, 0x1d, 0x9e,
    0xe1, 0xf8, 0x98, 0x11, 0x69, 0xd9, 0x8e, 0x94, 0x9b, 0x1e, 0x87, 0xe9, 0xce, 0x55, 0x28, 0xdf,
    0x8c, 0xa1, 0x89, 0x0d, 0xbf, 0xe6, 0x42, 0x68, 0x41, 0x99, 0x2d, 0x0f, 0xb0, 0x54, 0xbb, 0x16,
];

/// Round constants for key expansion
static RCON: [u8; 11] = [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80, 0x1b, 0x36];

/// Galois field multiplication by 2
fn gf_mul2(x: u8) -> u8 {
    let h = (x >> 7) & 1;
    let shifted = x << 1;
    shifted ^ (h * 0x1b)
}

/// Galois field multiplication by 3
fn gf_mul3(x: u8) -> u8 {
    gf_mul2(x) ^ x
}

/// SubBytes transformation
fn sub_bytes(state: &mut [u8; 16]) {
    for byte in state.iter_mut() {
        *byte = SBOX[*byte as usize];
    }
}

/// ShiftRows transformation
fn shift_rows(state: &mut [u8; 16]) {
    // Row 0: no shift
    // Row 1: shift left by 1
    let tmp = state[1];
    state[1] = state[5];
    state[5] = state[9];
    state[9] = state[13];
    state[13] = tmp;

    // Row 2: shift left by 2
    let tmp1 = state[2];
    let tmp2 = state[6];
    state[2] = state[10];
    state[6] = state[14];
    state[10] = tmp1;
    state[14] = tmp2;

    // Row 3: shift left by 3 (= shift right by 1)
    let tmp = state[15];
    state[15] = state[11];
    state[11] = state[7];
    state[7] = state[3];
    state[3] = tmp;
}

/// MixColumns transformation
fn mix_columns(state: &mut [u8; 16]) {
    for col in 0..4 {
        let i = col * 4;
        let s0 = state[i];
        let s1 = state[i + 1];
        let s2 = state[i + 2];
        let s3 = state[i + 3];

        state[i] = gf_mul2(s0) ^ gf_mul3(s1) ^ s2 ^ s3;
        state[i + 1] = s0 ^ gf_mul2(s1) ^ gf_mul3(s2) ^ s3;
        state[i + 2] = s0 ^ s1 ^ gf_mul2(s2) ^ gf_mul3(s3);
        state[i + 3] = gf_mul3(s0) ^ s1 ^ s2 ^ gf_mul2(s3);
    }
}

/// AddRoundKey transformation
fn add_round_key(state: &mut [u8; 16], round_key: &[u8; 16]) {
    for (s, k) in state.iter_mut().zip(round_key.iter()) {
        *s ^= k;
    }
}

/// Expand a 128-bit key to 11 round keys
fn expand_key_128(key: &[u8; 16]) -> [[u8; 16]; 11] {
    let mut w = [[0u8; 16]; 11];
    w[0] = *key;

    for i in 1..11 {
        let prev = w[i - 1];
        let mut temp = [prev[12], prev[13], prev[14], prev[15]];

        // RotWord
        temp.rotate_left(1);
        // SubWord
        for byte in &mut temp {
            *byte = SBOX[*byte as usize];
        }
        // XOR with Rcon
        temp[0] ^= RCON[i];

        for k in 0..4 {
            w[i][k] = prev[k] ^ temp[k];
        }
        for j in 1..4 {
            for k in 0..4 {
                w[i][j * 4 + k] = prev[j * 4 + k] ^ w[i][(j - 1) * 4 + k];
            }
        }
    }

    w
}

/// The security function e: AES-128 encryption of one block
pub fn e(key: &[u8; 16], plaintext: &[u8; 16]) -> [u8; 16] {
    let round_keys = expand_key_128(key);
    let mut state = *plaintext;

    add_round_key(&mut state, &round_keys[0]);

    for round_key in &round_keys[1..10] {
        sub_bytes(&mut state);
        shift_rows(&mut state);
        mix_columns(&mut state);
        add_round_key(&mut state, round_key);
    }

    sub_bytes(&mut state);
    shift_rows(&mut state);
    add_round_key(&mut state, &round_keys[10]);

    state
}

fn xor_128(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Confirm value generation function c1 for LE legacy pairing:
/// `c1(k, r, ...) = e(k, e(k, r XOR p1) XOR p2)`.
///
/// `preq` and `pres` are the seven pairing request/response PDU bytes
/// in transmitted order; `ia` and `ra` are the initiating and
/// responding addresses, most significant byte first.
#[allow(clippy::too_many_arguments)]
pub fn c1(
    k: &[u8; 16],
    r: &[u8; 16],
    preq: &[u8; 7],
    pres: &[u8; 7],
    iat: u8,
    rat: u8,
    ia: &[u8; 6],
    ra: &[u8; 6],
) -> [u8; 16] {
    // p1 = pres || preq || rat || iat, each field in value order
    let mut p1 = [0u8; 16];
    for i in 0..7 {
        p1[i] = pres[6 - i];
        p1[7 + i] = preq[6 - i];
    }
    p1[14] = rat & 1;
    p1[15] = iat & 1;

    // p2 = padding || ia || ra
    let mut p2 = [0u8; 16];
    p2[4..10].copy_from_slice(ia);
    p2[10..16].copy_from_slice(ra);

    let inner = e(k, &xor_128(r, &p1));
    e(k, &xor_128(&inner, &p2))
}

/// Key generation function s1 for LE legacy pairing. Concatenates the
/// least significant halves of `r1` and `r2` and encrypts under `k`.
pub fn s1(k: &[u8; 16], r1: &[u8; 16], r2: &[u8; 16]) -> [u8; 16] {
    let mut r = [0u8; 16];
    r[0..8].copy_from_slice(&r1[8..16]);
    r[8..16].copy_from_slice(&r2[8..16]);
    e(k, &r)
}

/// Shorten a key to the negotiated encryption key size by zeroing its
/// most significant octets.
pub fn mask_key(key: &[u8; 16], key_size: u8) -> [u8; 16] {
    let mut out = *key;
    let strip = 16usize.saturating_sub(key_size as usize);
    for byte in out.iter_mut().take(strip) {
        *byte = 0;
    }
    out
}

/// Generate a 128-bit random value
pub fn generate_random_128() -> [u8; 16] {
    rand::thread_rng().gen()
}

/// Generate a six-digit decimal passkey
pub fn generate_passkey() -> u32 {
    rand::thread_rng().gen_range(0..=SMP_MAX_PASSKEY)
}

/// The temporary key encoding a passkey: the value itself, zero padded
pub fn passkey_to_tk(passkey: u32) -> [u8; 16] {
    let mut tk = [0u8; 16];
    tk[12..16].copy_from_slice(&passkey.to_be_bytes());
    tk
}
