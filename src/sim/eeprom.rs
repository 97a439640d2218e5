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
use crate::memory::PAGE_PROTECTED;
use crate::scratchpad::{
	ES_AUTHORIZATION_ACCEPTED,
	ES_PARTIAL,
};

use super::SimDevice;

// protection register value for EPROM emulation mode; also final
const PAGE_EPROM_MODE: u8 = 0xAA;

enum Phase {
	Command,
	Header(u8),
	WriteScratchpad(usize),
	Copy,
	ReadMemory(usize),
	Done,
}

/// DS2431 / DS2433 style EEPROM.
pub struct EepromSim {
	address: DeviceAddress,
	memory: Vec<u8>,
	pad: Vec<u8>,
	// start of the page protection registers, one byte per 32-byte page
	registers: Option<usize>,
	target: u16,
	es: u8,
	phase: Phase,
	wire: Vec<u8>,
	out: VecDeque<u8>,
	copies: usize,
}

impl EepromSim {
	fn new(address: DeviceAddress, memory_size: usize, pad_size: usize, registers: Option<usize>) -> Self {
		EepromSim {
			address,
			memory: vec![0x00; memory_size],
			pad: vec![0xFF; pad_size],
			registers,
			target: 0,
			es: ES_PARTIAL,
			phase: Phase::Done,
			wire: Vec::new(),
			out: VecDeque::new(),
			copies: 0,
		}
	}

	pub fn ds2431(address: DeviceAddress) -> Self {
		EepromSim::new(address, 0x88, 8, Some(0x80))
	}

	pub fn ds2433(address: DeviceAddress) -> Self {
		EepromSim::new(address, 0x200, 32, None)
	}

	pub fn memory(&self) -> &[u8] {
		&self.memory
	}

	pub fn memory_mut(&mut self) -> &mut [u8] {
		&mut self.memory
	}

	pub fn scratchpad(&self) -> &[u8] {
		&self.pad
	}

	/// Number of copies the device actually performed.
	pub fn copies(&self) -> usize {
		self.copies
	}

	fn is_protected(&self, row: usize) -> bool {
		match self.registers {
			Some(registers) if row < registers => self.memory[registers + row / 32] == PAGE_PROTECTED,
			_ => false,
		}
	}

	fn copy(&mut self) -> bool {
		let size = self.pad.len();
		let row = self.target as usize & !(size - 1);
		if row + size > self.memory.len() || self.is_protected(row) {
			return false;
		}
		for i in 0..size {
			let cell = &mut self.memory[row + i];
			let is_register = self.registers.map_or(false, |r| row + i >= r);
			if is_register && (*cell == PAGE_PROTECTED || *cell == PAGE_EPROM_MODE) {
				continue;
			}
			*cell = self.pad[i];
		}
		self.copies += 1;
		true
	}

	fn queue_scratchpad(&mut self) {
		let mut reply = vec![READ_SCRATCHPAD, self.target as u8, (self.target >> 8) as u8, self.es];
		reply.extend_from_slice(&self.pad);
		let trailer = crc16_trailer(&reply, 0);
		reply.extend_from_slice(&trailer);
		self.out.extend(reply.into_iter().skip(1));
	}

	fn command(&mut self, host: u8) -> Phase {
		self.wire.clear();
		self.wire.push(host);
		match host {
			WRITE_SCRATCHPAD | COPY_SCRATCHPAD | READ_MEMORY => Phase::Header(host),
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

	fn header(&mut self, op: u8, host: u8) -> Phase {
		self.wire.push(host);
		if self.wire.len() < 3 {
			return Phase::Header(op);
		}
		let ta = self.wire[1] as u16 | (self.wire[2] as u16) << 8;
		match op {
			WRITE_SCRATCHPAD => {
				self.target = ta;
				self.es = ES_PARTIAL;
				Phase::WriteScratchpad(ta as usize % self.pad.len())
			},
			COPY_SCRATCHPAD => Phase::Copy,
			_ => Phase::ReadMemory(ta as usize),
		}
	}
}

impl SimDevice for EepromSim {
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
		let (next, driven) = match mem::replace(&mut self.phase, Phase::Done) {
			Phase::Command => (self.command(host), 0xFF),
			Phase::Header(op) => (self.header(op, host), 0xFF),
			Phase::WriteScratchpad(offset) => {
				if offset >= self.pad.len() {
					(Phase::Done, 0xFF)
				} else {
					self.pad[offset] = host;
					self.es = offset as u8;
					self.wire.push(host);
					if offset + 1 == self.pad.len() {
						let trailer = crc16_trailer(&self.wire, 0);
						self.out.extend(trailer.iter());
					}
					(Phase::WriteScratchpad(offset + 1), 0xFF)
				}
			},
			Phase::Copy => {
				let ta = self.wire[1] as u16 | (self.wire[2] as u16) << 8;
				let authorized = ta == self.target && host == self.es;
				if authorized && strong_pullup && self.copy() {
					self.es |= ES_AUTHORIZATION_ACCEPTED;
					self.out.extend([0xAAu8, 0x55, 0xAA, 0x55].iter());
				} else {
					trace!("{}: copy to 0x{:04x} refused", self.address, ta);
				}
				(Phase::Done, 0xFF)
			},
			Phase::ReadMemory(a) => {
				let b = self.memory.get(a).cloned().unwrap_or(0xFF);
				(Phase::ReadMemory(a + 1), b)
			},
			Phase::Done => (Phase::Done, 0xFF),
		};
		self.phase = next;
		driven
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}
