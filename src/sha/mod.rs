//! SHA-1 secret/MAC engine of DS1961S/DS2432 style devices.
//!
//! Every computation hashes one 64-byte message block (a 55-byte message
//! plus fixed SHA-1 padding). The device and the host build the same block
//! from the shared secret, page data, an address/status byte and the device
//! identity; the digest words then become either a new secret or a MAC.

use std::fmt;

use sha1::{
	Digest,
	Sha1,
};

use crate::bus::DeviceAddress;

mod device;

pub use self::device::{
	read_signed_page,
	ShaDevice,
	ShaStatus,
};

pub const PAGE_SIZE: usize = 32;
pub const BLOCK_SIZE: usize = 64;

// message length in bits, stored big-endian at the end of the block
const MESSAGE_BITS: u16 = 55 * 8;

/// Shared 8-byte secret; never logged.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Secret(pub [u8; 8]);

impl Secret {
	pub const UNSET: Secret = Secret([0xFF; 8]);
	pub const ZERO: Secret = Secret([0x00; 8]);

	pub fn is_set(&self) -> bool {
		*self != Secret::UNSET
	}
}

impl fmt::Debug for Secret {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if self.is_set() {
			write!(f, "Secret(<redacted>)")
		} else {
			write!(f, "Secret(<unset>)")
		}
	}
}

/// Caller-chosen nonce for authenticated reads.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Challenge(pub [u8; 3]);

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Mac(pub [u8; 20]);

impl Mac {
	/// Check a page signature (as returned by `ShaDevice::read_page_signature`).
	pub fn is_valid_for(&self, secret: &Secret, page: &[u8; PAGE_SIZE], address: u16, device: &DeviceAddress, challenge: &Challenge) -> bool {
		*self == authenticated_read_mac(secret, page, address, &device.identity(), challenge)
	}
}

impl fmt::Debug for Mac {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Mac({})", self)
	}
}

impl fmt::Display for Mac {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for b in self.0.iter() {
			write!(f, "{:02x}", b)?;
		}
		Ok(())
	}
}

/// Lay out the 64-byte message block.
///
/// `tail` lands in bytes 52..55; it is the challenge for authenticated reads
/// and 0xFF fill otherwise.
pub fn build_message_block(secret: &Secret, page: &[u8; PAGE_SIZE], address_status: u8, device_id: &[u8; 7], tail: &[u8; 3]) -> [u8; BLOCK_SIZE] {
	let mut block = [0u8; BLOCK_SIZE];
	block[0..4].copy_from_slice(&secret.0[0..4]);
	block[4..36].copy_from_slice(page);
	for b in &mut block[36..40] {
		*b = 0xFF;
	}
	block[40] = address_status;
	block[41..48].copy_from_slice(device_id);
	block[48..52].copy_from_slice(&secret.0[4..8]);
	block[52..55].copy_from_slice(tail);
	block[55] = 0x80;
	// 56..62 stay zero
	block[62] = (MESSAGE_BITS >> 8) as u8;
	block[63] = MESSAGE_BITS as u8;
	block
}

/// SHA-1 over a single message block; returns the state words A..E.
pub fn compute_sha1(block: &[u8; BLOCK_SIZE]) -> [u32; 5] {
	assert_eq!(block[55], 0x80, "message block without padding marker");
	assert_eq!(&block[56..62], &[0u8; 6], "message block padding not zero");
	assert_eq!(((block[62] as u16) << 8) | block[63] as u16, MESSAGE_BITS, "message block length");

	// the padding already encodes a 55-byte message, so hashing that
	// message produces exactly this block.
	let digest = Sha1::digest(&block[..55]);
	let mut words = [0u32; 5];
	for (word, chunk) in words.iter_mut().zip(digest.chunks(4)) {
		*word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
	}
	words
}

/// New secret from digest words E and D.
pub fn rotate(words: &[u32; 5]) -> Secret {
	let mut secret = [0u8; 8];
	secret[0..4].copy_from_slice(&words[4].to_le_bytes());
	secret[4..8].copy_from_slice(&words[3].to_le_bytes());
	Secret(secret)
}

/// MAC from digest words E, D, C, B, A.
pub fn sign(words: &[u32; 5]) -> Mac {
	let mut mac = [0u8; 20];
	for (chunk, word) in mac.chunks_mut(4).zip(words.iter().rev()) {
		chunk.copy_from_slice(&word.to_le_bytes());
	}
	Mac(mac)
}

pub fn authenticated_read_status(address: u16) -> u8 {
	0x40 | ((address << 3) & 0x08) as u8 | ((address >> 5) & 0x07) as u8
}

pub fn copy_status_byte(address: u16) -> u8 {
	((address & 0xE0) >> 5) as u8
}

/// The MAC a device returns for an authenticated read of the page at
/// `address` with `challenge`.
pub fn authenticated_read_mac(secret: &Secret, page: &[u8; PAGE_SIZE], address: u16, device_id: &[u8; 7], challenge: &Challenge) -> Mac {
	let block = build_message_block(secret, page, authenticated_read_status(address), device_id, &challenge.0);
	sign(&compute_sha1(&block))
}

/// The MAC a device expects for copying `scratchpad` to `address`.
///
/// `page` is the current content of the target page; the device hashes its
/// first 28 bytes followed by the staged scratchpad.
pub fn copy_mac(secret: &Secret, page: &[u8; PAGE_SIZE], scratchpad: &[u8; 8], address: u16, device_id: &[u8; 7]) -> Mac {
	let mut context = [0u8; PAGE_SIZE];
	context[0..28].copy_from_slice(&page[0..28]);
	context[28..32].copy_from_slice(&scratchpad[0..4]);
	let mut block = build_message_block(secret, &context, copy_status_byte(address), device_id, &[0xFF; 3]);
	block[36..40].copy_from_slice(&scratchpad[4..8]);
	sign(&compute_sha1(&block))
}

/// The secret a device derives from `page` and the staged `partial`
/// secret on Compute Next Secret.
pub fn next_secret(secret: &Secret, page: &[u8; PAGE_SIZE], partial: &[u8; 8]) -> Secret {
	let mut id = [0u8; 7];
	id.copy_from_slice(&partial[1..8]);
	let block = build_message_block(secret, page, partial[0] & 0x3F, &id, &[0xFF; 3]);
	rotate(&compute_sha1(&block))
}
