//! Page packets: `[len][data; len][~crc16 lo][~crc16 hi]`, the CRC16 seeded
//! with the page number so a packet read from the wrong page doesn't check
//! out.

use crate::bus::{
	Session,
	Transport,
};
use crate::crc::{
	crc16_trailer,
	crc16_valid,
};
use crate::error::{
	PResult,
	ProtocolError,
};

use super::MemoryBank;

/// Packet bytes (to be written at the start of `page`).
pub fn encode_packet(page: u32, data: &[u8]) -> Vec<u8> {
	assert!(data.len() < 0x100, "packet payload too long");
	let mut packet = Vec::with_capacity(data.len() + 3);
	packet.push(data.len() as u8);
	packet.extend_from_slice(data);
	let trailer = crc16_trailer(&packet, page as u16);
	packet.extend_from_slice(&trailer);
	packet
}

/// Payload of the packet at the start of `raw` (page content).
///
/// The length is checked before the CRC.
pub fn decode_packet(page: u32, raw: &[u8], max_len: usize) -> PResult<&[u8]> {
	let len = raw[0] as usize;
	if len > max_len || len + 3 > raw.len() {
		return Err(ProtocolError::InvalidPacketLength { len, max: max_len });
	}
	if !crc16_valid(&raw[..len + 3], page as u16) {
		return Err(ProtocolError::CrcMismatch("page packet"));
	}
	Ok(&raw[1..1 + len])
}

impl MemoryBank {
	pub fn read_page_packet<T: Transport>(&self, session: &mut Session<T>, page: u32) -> PResult<Vec<u8>> {
		let raw = if self.capabilities().page_auto_crc {
			self.read_page_with_crc(session, page, false)?
		} else {
			self.read_page(session, page, false)?
		};
		match decode_packet(page, &raw, self.max_packet_len()) {
			Ok(data) => Ok(data.to_vec()),
			Err(e) => session.fail(self.id(), e),
		}
	}

	pub fn write_page_packet<T: Transport>(&self, session: &mut Session<T>, page: u32, data: &[u8]) -> PResult<()> {
		if data.len() > self.max_packet_len() {
			return Err(ProtocolError::InvalidPacketLength { len: data.len(), max: self.max_packet_len() });
		}
		if !self.capabilities().general_purpose {
			return Err(ProtocolError::Unsupported("packets on a non general purpose bank"));
		}
		let offset = self.page_offset(page)?;
		self.write(session, offset, &encode_packet(page, data))
	}
}

#[cfg(test)]
mod test {
	use super::{
		decode_packet,
		encode_packet,
	};
	use crate::bus::{
		Bus,
		DeviceAddress,
		Speed,
	};
	use crate::chips;
	use crate::crc::crc16;
	use crate::error::ProtocolError;
	use crate::memory::MemoryBank;
	use crate::sim::{
		EepromSim,
		EpromSim,
		SimBus,
	};

	fn page_image(page: u32, data: &[u8]) -> Vec<u8> {
		let mut raw = encode_packet(page, data);
		raw.resize(32, 0xFF);
		raw
	}

	#[test]
	fn packet_residue() {
		for page in 0..16 {
			let packet = encode_packet(page, b"hello packet");
			assert_eq!(crc16(&packet, page as u16), 0xB001, "page {}", page);
		}
	}

	#[test]
	fn single_byte_mutations_are_detected() {
		let packet = encode_packet(3, &[0x10, 0x20, 0x30, 0x40, 0x50]);
		for i in 0..packet.len() {
			for bit in 0..8 {
				let mut broken = packet.clone();
				broken[i] ^= 1 << bit;
				assert_ne!(crc16(&broken, 3), 0xB001, "flipping bit {} of byte {} not detected", bit, i);
			}
		}
	}

	#[test]
	fn decode() {
		let raw = page_image(2, b"abc");
		assert_eq!(decode_packet(2, &raw, 29), Ok(&b"abc"[..]));
		assert_eq!(decode_packet(3, &raw, 29), Err(ProtocolError::CrcMismatch("page packet")));
		assert_eq!(decode_packet(2, &page_image(2, b""), 29), Ok(&b""[..]));
	}

	#[test]
	fn length_checked_first() {
		// erased page: length 0xFF, no valid CRC anywhere
		let raw = [0xFFu8; 32];
		assert_eq!(decode_packet(0, &raw, 29), Err(ProtocolError::InvalidPacketLength { len: 0xFF, max: 29 }));

		// a valid CRC doesn't help with a length beyond the bank's limit
		let raw = page_image(1, &[0x11; 29]);
		assert_eq!(decode_packet(1, &raw, 28), Err(ProtocolError::InvalidPacketLength { len: 29, max: 28 }));
	}

	#[test]
	fn bank_packets() {
		let address = DeviceAddress::new(0x23, [7, 7, 7, 7, 7, 7]);
		let mut sim = SimBus::new();
		sim.attach(EepromSim::ds2433(address));
		let bus = Bus::new(sim);
		let mut session = bus.session().unwrap();
		let main = MemoryBank::new(address, Speed::Regular, &chips::DS2433_MAIN);

		main.write_page_packet(&mut session, 3, b"packet payload").unwrap();
		assert_eq!(main.read_page_packet(&mut session, 3).unwrap(), b"packet payload".to_vec());
		main.write_page_packet(&mut session, 4, &[]).unwrap();
		assert_eq!(main.read_page_packet(&mut session, 4).unwrap(), Vec::<u8>::new());

		assert_eq!(main.write_page_packet(&mut session, 0, &[0; 30]), Err(ProtocolError::InvalidPacketLength { len: 30, max: 29 }));

		// erased page
		main.write(&mut session, 64, &[0xFF; 32]).unwrap();
		assert_eq!(main.read_page_packet(&mut session, 2), Err(ProtocolError::InvalidPacketLength { len: 0xFF, max: 29 }));
		assert!(session.needs_verify(main.id()));

		// packet written for another page
		let packet = encode_packet(5, b"moved");
		main.write(&mut session, 6 * 32, &packet).unwrap();
		assert_eq!(main.read_page_packet(&mut session, 6), Err(ProtocolError::CrcMismatch("page packet")));
	}

	#[test]
	fn eprom_packets() {
		let address = DeviceAddress::new(0x09, [1, 1, 1, 1, 1, 1]);
		let mut sim = SimBus::new().with_program_voltage(true);
		sim.attach(EpromSim::ds1982(address));
		let bus = Bus::new(sim);
		let mut session = bus.session().unwrap();
		let main = MemoryBank::new(address, Speed::Regular, &chips::DS1982_MAIN);
		let status = MemoryBank::new(address, Speed::Regular, &chips::DS1982_STATUS);

		main.write_page_packet(&mut session, 1, b"add-only").unwrap();
		assert_eq!(main.read_page_packet(&mut session, 1).unwrap(), b"add-only".to_vec());
		assert_eq!(status.write_page_packet(&mut session, 0, b"x"), Err(ProtocolError::Unsupported("packets on a non general purpose bank")));
	}
}
