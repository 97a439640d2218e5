use std::any::Any;
use std::collections::VecDeque;
use std::mem;

use crate::bus::DeviceAddress;
use crate::chips::{
	COPY_SCRATCHPAD,
	READ_MEMORY,
	READ_SCRATCHPAD,
	WRITE_SCRATCHPAD,
};
use crate::crc::crc16_trailer;
use crate::scratchpad::{
	ES_AUTHORIZATION_ACCEPTED,
	ES_PARTIAL,
	COMPUTE_NEXT_SECRET,
	LOAD_FIRST_SECRET,
	READ_AUTHENTICATED_PAGE,
	REFRESH_SCRATCHPAD,
};
use crate::sha::{
	authenticated_read_mac,
	copy_mac,
	next_secret,
	Challenge,
	Secret,
	PAGE_SIZE,
};

use super::SimDevice;

const MEMORY_SIZE: usize = 0xA0;
const PAD_SIZE: usize = 8;
const SECRET_ADDRESS: usize = 0x80;
const ES_FIXED: u8 = 0x58;

const SECRET_PROTECTED: usize = 0x88;
const ALL_PROTECTED: usize = 0x89;
const PAGE_ONE_EPROM: usize = 0x8C;
const PAGE_ZERO_PROTECTED: usize = 0x8D;

fn is_set(b: u8) -> bool {
	b == 0xAA || b == 0x55
}

enum Phase {
	Command,
	Header(u8),
	WriteScratchpad(usize),
	// target and E/S of a copy matched, collecting the MAC
	CopyMac(Vec<u8>),
	RefreshData(usize),
	ReadMemory(usize),
	Done,
}

/// DS1961S / DS2432: 128 bytes EEPROM, 8 byte secret, SHA-1 engine.
pub struct ShaSim {
	address: DeviceAddress,
	memory: Vec<u8>,
	secret: Secret,
	pad: [u8; PAD_SIZE],
	target: u16,
	es: u8,
	refreshed: bool,
	phase: Phase,
	wire: Vec<u8>,
	out: VecDeque<u8>,
}

impl ShaSim {
	pub fn ds2432(address: DeviceAddress) -> Self {
		ShaSim {
			address,
			memory: vec![0x00; MEMORY_SIZE],
			secret: Secret::ZERO,
			pad: [0xFF; PAD_SIZE],
			target: 0,
			es: ES_FIXED | ES_PARTIAL,
			refreshed: false,
			phase: Phase::Done,
			wire: Vec::new(),
			out: VecDeque::new(),
		}
	}

	pub fn secret(&self) -> &Secret {
		&self.secret
	}

	pub fn set_secret(&mut self, secret: Secret) {
		self.secret = secret;
	}

	/// Raw memory; the secret bytes 0x80..0x88 are kept separately.
	pub fn memory(&self) -> &[u8] {
		&self.memory
	}

	pub fn memory_mut(&mut self) -> &mut [u8] {
		&mut self.memory
	}

	fn readable(&self, address: usize) -> u8 {
		if address >= SECRET_ADDRESS && address < SECRET_ADDRESS + 8 {
			return 0xFF;
		}
		self.memory.get(address).cloned().unwrap_or(0xFF)
	}

	fn readable_page(&self, page_address: usize) -> [u8; PAGE_SIZE] {
		let mut page = [0u8; PAGE_SIZE];
		for (i, b) in page.iter_mut().enumerate() {
			*b = self.readable(page_address + i);
		}
		page
	}

	// what the SHA engine sees: the secret in place of its hidden bytes
	fn engine_page(&self, page_address: usize) -> [u8; PAGE_SIZE] {
		let mut page = self.readable_page(page_address);
		if page_address == SECRET_ADDRESS {
			page[0..8].copy_from_slice(&self.secret.0);
		}
		page
	}

	fn ta(&self) -> u16 {
		self.wire[1] as u16 | (self.wire[2] as u16) << 8
	}

	fn is_write_protected(&self, row: usize) -> bool {
		let all = is_set(self.memory[ALL_PROTECTED]);
		match row {
			0x00..=0x1F => all || is_set(self.memory[PAGE_ZERO_PROTECTED]),
			0x20..=0x7F => all,
			0x80..=0x87 => true,
			_ => row >= MEMORY_SIZE,
		}
	}

	fn store_row(&mut self, row: usize) {
		let eprom = is_set(self.memory[PAGE_ONE_EPROM]) && row >= 0x20 && row < 0x40;
		for i in 0..PAD_SIZE {
			let cell = &mut self.memory[row + i];
			if row + i >= SECRET_PROTECTED && is_set(*cell) {
				// control bytes are final once set
				continue;
			}
			*cell = if eprom { *cell & self.pad[i] } else { self.pad[i] };
		}
	}

	// result byte of copy scratchpad with MAC; 0xFF means nothing driven
	fn copy_with_mac(&mut self, mac: &[u8], strong_pullup: bool) -> u8 {
		let row = self.target as usize & !(PAD_SIZE - 1);
		let page_address = row & !(PAGE_SIZE - 1);
		let expected = copy_mac(&self.secret, &self.engine_page(page_address), &self.pad, self.target, &self.address.identity());
		if expected.0[..] != mac[..] {
			trace!("{}: copy to 0x{:02x}: MAC mismatch", self.address, row);
			return 0x00;
		}
		if !strong_pullup || self.is_write_protected(row) {
			trace!("{}: copy to 0x{:02x} refused", self.address, row);
			return 0xFF;
		}
		self.store_row(row);
		self.es |= ES_AUTHORIZATION_ACCEPTED;
		0xAA
	}

	fn load_first_secret(&mut self, host: u8, strong_pullup: bool) -> bool {
		if self.ta() != self.target || host != self.es || !strong_pullup {
			return false;
		}
		let target = self.target as usize;
		if target == SECRET_ADDRESS {
			if is_set(self.memory[SECRET_PROTECTED]) {
				return false;
			}
			self.secret = Secret(self.pad);
		} else if self.refreshed {
			let row = target & !(PAD_SIZE - 1);
			self.memory[row..row + PAD_SIZE].copy_from_slice(&self.pad);
		} else {
			return false;
		}
		self.es |= ES_AUTHORIZATION_ACCEPTED;
		true
	}

	fn compute_next_secret(&mut self, strong_pullup: bool) {
		if !strong_pullup || is_set(self.memory[SECRET_PROTECTED]) {
			trace!("{}: compute next secret refused", self.address);
			return;
		}
		let page = self.readable_page(self.ta() as usize & 0xE0);
		self.secret = next_secret(&self.secret, &page, &self.pad);
		self.pad = [0xAA; PAD_SIZE];
	}

	fn queue_with_crc(&mut self, data: &[u8], crc_prefix: &[u8]) {
		let mut covered = crc_prefix.to_vec();
		covered.extend_from_slice(data);
		let trailer = crc16_trailer(&covered, 0);
		self.out.extend(data.iter());
		self.out.extend(trailer.iter());
	}

	fn queue_scratchpad(&mut self) {
		let mut reply = vec![self.target as u8, (self.target >> 8) as u8, self.es];
		reply.extend_from_slice(&self.pad);
		self.queue_with_crc(&reply, &[READ_SCRATCHPAD]);
	}

	fn queue_authenticated_page(&mut self) {
		let ta = self.ta();
		let page_address = ta as usize & !(PAGE_SIZE - 1);
		let page = self.readable_page(page_address);

		let mut reply = page[ta as usize - page_address..].to_vec();
		reply.push(0xFF);
		let header = self.wire.clone();
		self.queue_with_crc(&reply, &header);

		let mut challenge = Challenge::default();
		challenge.0.copy_from_slice(&self.pad[4..7]);
		let mac = authenticated_read_mac(&self.secret, &page, ta, &self.address.identity(), &challenge);
		self.queue_with_crc(&mac.0, &[]);
	}

	fn command(&mut self, host: u8) -> Phase {
		self.wire.clear();
		self.wire.push(host);
		match host {
			WRITE_SCRATCHPAD | COPY_SCRATCHPAD | READ_MEMORY | LOAD_FIRST_SECRET | COMPUTE_NEXT_SECRET | REFRESH_SCRATCHPAD | READ_AUTHENTICATED_PAGE => Phase::Header(host),
			READ_SCRATCHPAD => {
				self.queue_scratchpad();
				Phase::Done
			},
			_ => {
				trace!("{}: unknown command 0x{:02x}", self.address, host);
				Phase::Done
			},
		}
	}

	fn header(&mut self, op: u8, host: u8, strong_pullup: bool) -> Phase {
		self.wire.push(host);
		if self.wire.len() < 3 {
			return Phase::Header(op);
		}
		if self.wire.len() == 3 {
			let ta = self.ta();
			match op {
				WRITE_SCRATCHPAD => {
					self.target = ta;
					self.es = ES_FIXED | ES_PARTIAL;
					self.refreshed = false;
					return Phase::WriteScratchpad(ta as usize % PAD_SIZE);
				},
				READ_MEMORY => return Phase::ReadMemory(ta as usize),
				COMPUTE_NEXT_SECRET => {
					self.compute_next_secret(strong_pullup);
					return Phase::Done;
				},
				REFRESH_SCRATCHPAD => {
					let row = ta as usize & !(PAD_SIZE - 1);
					if row + PAD_SIZE <= MEMORY_SIZE {
						self.pad.copy_from_slice(&self.memory[row..row + PAD_SIZE]);
					}
					self.target = ta;
					self.es = ES_FIXED | (PAD_SIZE - 1) as u8;
					self.refreshed = true;
					return Phase::RefreshData(0);
				},
				READ_AUTHENTICATED_PAGE => {
					self.queue_authenticated_page();
					return Phase::Done;
				},
				_ => return Phase::Header(op),
			}
		}

		// fourth byte: E/S of copy and load first secret
		let es_ok = self.ta() == self.target && host == self.es;
		match op {
			COPY_SCRATCHPAD if es_ok => Phase::CopyMac(Vec::new()),
			LOAD_FIRST_SECRET => {
				if self.load_first_secret(host, strong_pullup) {
					self.out.extend([0xAAu8, 0x55, 0xAA, 0x55].iter());
				}
				self.refreshed = false;
				Phase::Done
			},
			_ => Phase::Done,
		}
	}
}

impl SimDevice for ShaSim {
	fn address(&self) -> DeviceAddress {
		self.address
	}

	fn begin(&mut self) {
		self.out.clear();
		self.phase = Phase::Command;
	}

	fn exchange(&mut self, host: u8, strong_pullup: bool) -> u8 {
		if let Some(b) = self.out.pop_front() {
			return b;
		}
		let next = match mem::replace(&mut self.phase, Phase::Done) {
			Phase::Command => self.command(host),
			Phase::Header(op) => self.header(op, host, strong_pullup),
			Phase::WriteScratchpad(offset) if offset < PAD_SIZE => {
				self.pad[offset] = host;
				self.es = ES_FIXED | offset as u8;
				self.wire.push(host);
				if offset + 1 == PAD_SIZE {
					let trailer = crc16_trailer(&self.wire, 0);
					self.out.extend(trailer.iter());
				}
				Phase::WriteScratchpad(offset + 1)
			},
			Phase::CopyMac(mut mac) => {
				mac.push(host);
				if mac.len() < 20 {
					Phase::CopyMac(mac)
				} else {
					let result = self.copy_with_mac(&mac, strong_pullup);
					self.out.push_back(result);
					if result == 0xAA {
						self.out.extend([0x55u8, 0xAA, 0x55].iter());
					}
					Phase::Done
				}
			},
			Phase::RefreshData(count) => {
				self.wire.push(host);
				if count + 1 == PAD_SIZE {
					let trailer = crc16_trailer(&self.wire, 0);
					self.out.extend(trailer.iter());
					Phase::Done
				} else {
					Phase::RefreshData(count + 1)
				}
			},
			Phase::ReadMemory(a) => {
				self.phase = Phase::ReadMemory(a + 1);
				return self.readable(a);
			},
			_ => Phase::Done,
		};
		self.phase = next;
		0xFF
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}

#[cfg(test)]
mod test {
	use super::ShaSim;
	use crate::bus::{
		DeviceAddress,
		Transport,
	};
	use crate::crc::crc16_valid;
	use crate::sim::SimBus;

	fn address() -> DeviceAddress {
		DeviceAddress::new(0x33, [0x10, 0x20, 0x30, 0x40, 0x50, 0x60])
	}

	#[test]
	fn header_bytes_one_at_a_time() {
		let mut bus = SimBus::new();
		bus.attach(ShaSim::ds2432(address()));
		bus.device_mut::<ShaSim>(&address()).unwrap().memory_mut()[0x40..0x44].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

		// write scratchpad, byte by byte
		assert!(bus.select(&address()).unwrap());
		let mut wire = vec![0x0F, 0x48, 0x00];
		for &b in wire.iter() {
			bus.put_byte(b).unwrap();
		}
		for b in 1..=8u8 {
			bus.put_byte(b).unwrap();
			wire.push(b);
		}
		wire.push(bus.get_byte().unwrap());
		wire.push(bus.get_byte().unwrap());
		assert!(crc16_valid(&wire, 0), "write scratchpad CRC: {:02x?}", wire);

		// read memory, byte by byte
		assert!(bus.select(&address()).unwrap());
		for &b in [0xF0u8, 0x40, 0x00].iter() {
			bus.put_byte(b).unwrap();
		}
		let data: Vec<u8> = (0..4).map(|_| bus.get_byte().unwrap()).collect();
		assert_eq!(data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
	}
}
