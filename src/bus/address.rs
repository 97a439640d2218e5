use std::fmt;
use std::str;

use crate::crc::{
	crc8,
	crc8_valid,
};

/// 64-bit ROM id of a device, in wire order.
///
/// Byte 0 is the family code, bytes 1..7 the serial number and byte 7 the
/// CRC8 over the first seven bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceAddress(pub [u8; 8]);

impl DeviceAddress {
	pub fn new(family: u8, serial: [u8; 6]) -> Self {
		let mut rom = [0u8; 8];
		rom[0] = family;
		rom[1..7].copy_from_slice(&serial);
		rom[7] = crc8(&rom[..7], 0);
		DeviceAddress(rom)
	}

	pub fn family(&self) -> u8 {
		self.0[0]
	}

	/// family code and serial, as folded into MAC message blocks
	pub fn identity(&self) -> [u8; 7] {
		let mut id = [0u8; 7];
		id.copy_from_slice(&self.0[..7]);
		id
	}

	pub fn is_valid(&self) -> bool {
		crc8_valid(&self.0, 0)
	}
}

impl fmt::Debug for DeviceAddress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("DeviceAddress")
			.field("family", &format_args!("0x{:02x}", self.0[0]))
			.field("address", &format_args!("{}", self))
			.finish()
	}
}

impl fmt::Display for DeviceAddress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for b in self.0.iter().rev() {
			write!(f, "{:02X}", b)?;
		}
		Ok(())
	}
}

impl str::FromStr for DeviceAddress {
	type Err = ::failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ensure!(s.len() == 16, "device address needs exactly 16 hex digits: {:?}", s);
		ensure!(s.bytes().all(|b| b.is_ascii_hexdigit()), "invalid device address: {:?}", s);

		let mut rom = [0u8; 8];
		for (i, b) in rom.iter_mut().rev().enumerate() {
			let digits = &s[2 * i..2 * i + 2];
			*b = with_context!(("invalid device address: {:?}", s),
				Ok(u8::from_str_radix(digits, 16)?)
			)?;
		}
		Ok(DeviceAddress(rom))
	}
}

#[cfg(test)]
mod test {
	use super::DeviceAddress;

	fn check_address(rom: [u8; 8], repr: &str) {
		match repr.parse::<DeviceAddress>() {
			Err(e) => panic!("{} failed to parse as DeviceAddress: {}", repr, e),
			Ok(addr) => assert_eq!(DeviceAddress(rom), addr, "failed validating parsed {}", repr),
		}
	}

	fn check_address_canonical(rom: [u8; 8], repr: &str) {
		check_address(rom, repr);
		assert_eq!(DeviceAddress(rom).to_string(), repr, "failed stringifying {:?}", rom);
	}

	fn check_invalid_address(repr: &str) {
		assert!(repr.parse::<DeviceAddress>().is_err(), "{:?} must not be a valid device address", repr);
	}

	#[test]
	fn parse_address() {
		check_address_canonical([0x2D, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0xA7], "A70605040302012D");
		check_address_canonical([0; 8], "0000000000000000");
		check_address([0x33, 0xab, 0, 0, 0, 0, 0, 0xff], "ff0000000000ab33");
		check_invalid_address("");
		check_invalid_address("2D");
		check_invalid_address("A70605040302012");
		check_invalid_address("A70605040302012D0");
		check_invalid_address("A7:06:05:04:03:02:01:2D");
		check_invalid_address("A7060504030201-D");
		check_invalid_address("G70605040302012D");
		check_invalid_address("+70605040302012D");
	}

	#[test]
	fn crc_byte() {
		let addr = DeviceAddress::new(0x23, [0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
		assert!(addr.is_valid(), "{} has a bad CRC", addr);
		assert_eq!(addr.family(), 0x23);
		assert_eq!(addr.identity(), [0x23, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);

		let mut broken = addr;
		broken.0[2] ^= 0x01;
		assert!(!broken.is_valid(), "{} must not pass the CRC check", broken);
	}
}
