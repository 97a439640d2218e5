//! CRC helpers for the 1-Wire checksums.
//!
//! Both CRCs are the reflected variants with no final XOR; the running
//! register starts at the caller's seed, so a page number can be folded in
//! up front. A block followed by the one's complement of its CRC16 (low
//! byte first) always leaves `CRC16_RESIDUE`; a block followed by its
//! CRC8 leaves `CRC8_RESIDUE`.

use crc::{
	Crc,
	CRC_16_ARC,
	CRC_8_MAXIM_DOW,
};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);
const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

pub const CRC16_RESIDUE: u16 = 0xB001;
pub const CRC8_RESIDUE: u8 = 0x00;

// the crc crate expects the initial value in non-reflected form and
// reflects it itself; our seeds are register values already.
pub fn crc16(bytes: &[u8], seed: u16) -> u16 {
	let mut digest = CRC16.digest_with_initial(seed.reverse_bits());
	digest.update(bytes);
	digest.finalize()
}

pub fn crc8(bytes: &[u8], seed: u8) -> u8 {
	let mut digest = CRC8.digest_with_initial(seed.reverse_bits());
	digest.update(bytes);
	digest.finalize()
}

/// Whether `bytes` (including the two trailing inverted CRC bytes) check out.
pub fn crc16_valid(bytes: &[u8], seed: u16) -> bool {
	crc16(bytes, seed) == CRC16_RESIDUE
}

pub fn crc8_valid(bytes: &[u8], seed: u8) -> bool {
	crc8(bytes, seed) == CRC8_RESIDUE
}

/// The two bytes to append so that `crc16_valid` holds for the result.
pub fn crc16_trailer(bytes: &[u8], seed: u16) -> [u8; 2] {
	let inverted = !crc16(bytes, seed);
	[inverted as u8, (inverted >> 8) as u8]
}
