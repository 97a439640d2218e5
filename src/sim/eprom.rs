use std::any::Any;
use std::collections::VecDeque;
use std::mem;

use crate::bus::DeviceAddress;
use crate::chips::{
	EPROM_READ_DATA_CRC,
	EPROM_READ_STATUS,
	EPROM_WRITE_MEMORY,
	EPROM_WRITE_STATUS,
	READ_MEMORY,
};
use crate::crc::crc8;

use super::SimDevice;

const MEMORY_SIZE: usize = 128;
const MEMORY_PAGE: usize = 32;
const STATUS_SIZE: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Space {
	Memory,
	Status,
}

impl Space {
	fn page_size(self) -> usize {
		match self {
			Space::Memory => MEMORY_PAGE,
			Space::Status => STATUS_SIZE,
		}
	}
}

enum Phase {
	Command,
	Header(u8),
	Stream(usize),
	Paged { space: Space, address: usize, sent: Vec<u8> },
	// CRC of the program request is out, waiting for the pulse
	Programming { space: Space, address: usize, data: u8 },
	NextData { space: Space, address: usize },
	Done,
}

/// DS1982 style add-only memory: 4 pages of EPROM plus 8 bytes status.
///
/// Programming only clears bits; the status byte 0 holds one "page still
/// writable" bit per page.
pub struct EpromSim {
	address: DeviceAddress,
	memory: Vec<u8>,
	status: Vec<u8>,
	phase: Phase,
	wire: Vec<u8>,
	out: VecDeque<u8>,
	pulses: usize,
}

impl EpromSim {
	pub fn ds1982(address: DeviceAddress) -> Self {
		EpromSim {
			address,
			memory: vec![0xFF; MEMORY_SIZE],
			status: vec![0xFF; STATUS_SIZE],
			phase: Phase::Done,
			wire: Vec::new(),
			out: VecDeque::new(),
			pulses: 0,
		}
	}

	pub fn memory(&self) -> &[u8] {
		&self.memory
	}

	pub fn status(&self) -> &[u8] {
		&self.status
	}

	/// Program pulses received so far.
	pub fn pulses(&self) -> usize {
		self.pulses
	}

	fn space(&self, space: Space) -> &[u8] {
		match space {
			Space::Memory => &self.memory,
			Space::Status => &self.status,
		}
	}

	fn byte(&self, space: Space, address: usize) -> u8 {
		self.space(space).get(address).cloned().unwrap_or(0xFF)
	}

	fn is_locked(&self, space: Space, address: usize) -> bool {
		space == Space::Memory && self.status[0] & (1 << (address / MEMORY_PAGE)) == 0
	}

	fn header(&mut self, op: u8, host: u8) -> Phase {
		self.wire.push(host);
		let wanted = match op {
			EPROM_WRITE_MEMORY | EPROM_WRITE_STATUS => 4,
			_ => 3,
		};
		if self.wire.len() < wanted {
			return Phase::Header(op);
		}
		self.out.push_back(crc8(&self.wire, 0));
		let address = self.wire[1] as usize | (self.wire[2] as usize) << 8;
		match op {
			READ_MEMORY => Phase::Stream(address),
			EPROM_READ_DATA_CRC => Phase::Paged { space: Space::Memory, address, sent: Vec::new() },
			EPROM_READ_STATUS => Phase::Paged { space: Space::Status, address, sent: Vec::new() },
			EPROM_WRITE_MEMORY => Phase::Programming { space: Space::Memory, address, data: self.wire[3] },
			_ => Phase::Programming { space: Space::Status, address, data: self.wire[3] },
		}
	}
}

impl SimDevice for EpromSim {
	fn address(&self) -> DeviceAddress {
		self.address
	}

	fn begin(&mut self) {
		self.out.clear();
		self.phase = Phase::Command;
	}

	fn exchange(&mut self, host: u8, _strong_pullup: bool) -> u8 {
		if let Some(b) = self.out.pop_front() {
			return b;
		}
		let (next, driven) = match mem::replace(&mut self.phase, Phase::Done) {
			Phase::Command => {
				self.wire.clear();
				self.wire.push(host);
				match host {
					READ_MEMORY | EPROM_READ_DATA_CRC | EPROM_READ_STATUS | EPROM_WRITE_MEMORY | EPROM_WRITE_STATUS => (Phase::Header(host), 0xFF),
					_ => {
						trace!("{}: unknown command 0x{:02x}", self.address, host);
						(Phase::Done, 0xFF)
					},
				}
			},
			Phase::Header(op) => (self.header(op, host), 0xFF),
			Phase::Stream(address) => (Phase::Stream(address + 1), self.byte(Space::Memory, address)),
			Phase::Paged { space, address, mut sent } => {
				let b = self.byte(space, address);
				sent.push(b);
				if (address + 1) % space.page_size() == 0 {
					self.out.push_back(crc8(&sent, 0));
					sent.clear();
				}
				(Phase::Paged { space, address: address + 1, sent }, b)
			},
			Phase::Programming { space, address, .. } => {
				// read back, pulsed or not
				(Phase::NextData { space, address: address + 1 }, self.byte(space, address))
			},
			Phase::NextData { space, address } => {
				self.out.push_back(crc8(&[host], address as u8));
				(Phase::Programming { space, address, data: host }, 0xFF)
			},
			Phase::Done => (Phase::Done, 0xFF),
		};
		self.phase = next;
		driven
	}

	fn program_pulse(&mut self) {
		self.pulses += 1;
		if let Phase::Programming { space, address, data } = self.phase {
			if !self.out.is_empty() || self.is_locked(space, address) {
				trace!("{}: program pulse ignored", self.address);
				return;
			}
			let cells = match space {
				Space::Memory => &mut self.memory,
				Space::Status => &mut self.status,
			};
			if let Some(cell) = cells.get_mut(address) {
				*cell &= data;
			}
		}
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}
