//! Per-chip constant tables.

use std::fmt;
use std::time::Duration;

use crate::bus::{
	DeviceAddress,
	Speed,
};
use crate::memory::{
	BankKind,
	BankProfile,
	CapabilitySet,
	EepromLayout,
	EpromLayout,
	MemoryBank,
	ShaLayout,
	StatusRef,
};
use crate::scratchpad::ScratchpadLayout;

pub const READ_MEMORY: u8 = 0xF0;
pub const WRITE_SCRATCHPAD: u8 = 0x0F;
pub const READ_SCRATCHPAD: u8 = 0xAA;
pub const COPY_SCRATCHPAD: u8 = 0x55;

pub const EPROM_READ_DATA_CRC: u8 = 0xC3;
pub const EPROM_READ_STATUS: u8 = 0xAA;
pub const EPROM_WRITE_MEMORY: u8 = 0x0F;
pub const EPROM_WRITE_STATUS: u8 = 0x55;

const EEPROM_MEMORY: CapabilitySet = CapabilitySet {
	general_purpose: true,
	read_write: true,
	non_volatile: true,
	needs_power: true,
	..CapabilitySet::EMPTY
};

const EPROM_MEMORY: CapabilitySet = CapabilitySet {
	general_purpose: true,
	write_once: true,
	non_volatile: true,
	needs_program_pulse: true,
	page_auto_crc: true,
	..CapabilitySet::EMPTY
};

// DS2431: 1 Kbit EEPROM, 8-byte scratchpad, page protection registers

pub static DS2431_SCRATCHPAD: ScratchpadLayout = ScratchpadLayout {
	size: 8,
	write_opcode: WRITE_SCRATCHPAD,
	read_opcode: READ_SCRATCHPAD,
	copy_opcode: COPY_SCRATCHPAD,
	program_time: Duration::from_millis(10),
	write_returns_crc: true,
	es_fixed_bits: 0x00,
};

pub static DS2431_MAIN: BankProfile = BankProfile {
	description: "Main memory",
	start: 0x00,
	page_size: 32,
	page_count: 4,
	max_packet_len: 29,
	capabilities: CapabilitySet {
		lockable: true,
		..EEPROM_MEMORY
	},
	kind: BankKind::Eeprom(EepromLayout {
		read_opcode: READ_MEMORY,
		scratchpad: &DS2431_SCRATCHPAD,
		lock: Some(StatusRef { bank: &DS2431_REGISTERS, offset: 0 }),
	}),
};

pub static DS2431_REGISTERS: BankProfile = BankProfile {
	description: "Protection registers",
	start: 0x80,
	page_size: 8,
	page_count: 1,
	max_packet_len: 5,
	capabilities: CapabilitySet {
		general_purpose: false,
		..EEPROM_MEMORY
	},
	kind: BankKind::Eeprom(EepromLayout {
		read_opcode: READ_MEMORY,
		scratchpad: &DS2431_SCRATCHPAD,
		lock: None,
	}),
};

// DS2433: 4 Kbit EEPROM, 32-byte scratchpad, no protection

pub static DS2433_SCRATCHPAD: ScratchpadLayout = ScratchpadLayout {
	size: 32,
	write_opcode: WRITE_SCRATCHPAD,
	read_opcode: READ_SCRATCHPAD,
	copy_opcode: COPY_SCRATCHPAD,
	program_time: Duration::from_millis(5),
	write_returns_crc: true,
	es_fixed_bits: 0x00,
};

pub static DS2433_MAIN: BankProfile = BankProfile {
	description: "Main memory",
	start: 0x000,
	page_size: 32,
	page_count: 16,
	max_packet_len: 29,
	capabilities: EEPROM_MEMORY,
	kind: BankKind::Eeprom(EepromLayout {
		read_opcode: READ_MEMORY,
		scratchpad: &DS2433_SCRATCHPAD,
		lock: None,
	}),
};

// DS1982: 1 Kbit add-only (EPROM) memory with status memory

pub static DS1982_MAIN: BankProfile = BankProfile {
	description: "Main memory",
	start: 0x00,
	page_size: 32,
	page_count: 4,
	max_packet_len: 29,
	capabilities: CapabilitySet {
		lockable: true,
		redirectable: true,
		..EPROM_MEMORY
	},
	kind: BankKind::Eprom(EpromLayout {
		read_opcode: READ_MEMORY,
		crc_read_opcode: EPROM_READ_DATA_CRC,
		write_opcode: EPROM_WRITE_MEMORY,
		paged_read: false,
		lock: Some(StatusRef { bank: &DS1982_STATUS, offset: 0 }),
		redirect: Some(StatusRef { bank: &DS1982_STATUS, offset: 1 }),
	}),
};

pub static DS1982_STATUS: BankProfile = BankProfile {
	description: "Write protect pages and page redirection",
	start: 0x00,
	page_size: 8,
	page_count: 1,
	max_packet_len: 5,
	capabilities: CapabilitySet {
		general_purpose: false,
		..EPROM_MEMORY
	},
	kind: BankKind::Eprom(EpromLayout {
		read_opcode: EPROM_READ_STATUS,
		crc_read_opcode: EPROM_READ_STATUS,
		write_opcode: EPROM_WRITE_STATUS,
		paged_read: true,
		lock: None,
		redirect: None,
	}),
};

// DS1961S / DS2432: 1 Kbit EEPROM with SHA-1 engine

pub static DS2432_SCRATCHPAD: ScratchpadLayout = ScratchpadLayout {
	size: 8,
	write_opcode: WRITE_SCRATCHPAD,
	read_opcode: READ_SCRATCHPAD,
	copy_opcode: COPY_SCRATCHPAD,
	program_time: Duration::from_millis(12),
	write_returns_crc: true,
	es_fixed_bits: 0x58,
};

const SHA_MEMORY: CapabilitySet = CapabilitySet {
	page_auto_crc: true,
	..EEPROM_MEMORY
};

pub static DS2432_PAGE_ZERO: BankProfile = BankProfile {
	description: "Page Zero with write protection",
	start: 0x00,
	page_size: 32,
	page_count: 1,
	max_packet_len: 29,
	capabilities: SHA_MEMORY,
	kind: BankKind::Sha(ShaLayout {
		read_opcode: READ_MEMORY,
		scratchpad: &DS2432_SCRATCHPAD,
	}),
};

pub static DS2432_PAGE_ONE: BankProfile = BankProfile {
	description: "Page One with EPROM mode and write protection",
	start: 0x20,
	page_size: 32,
	page_count: 1,
	max_packet_len: 29,
	capabilities: SHA_MEMORY,
	kind: BankKind::Sha(ShaLayout {
		read_opcode: READ_MEMORY,
		scratchpad: &DS2432_SCRATCHPAD,
	}),
};

pub static DS2432_PAGES_TWO_THREE: BankProfile = BankProfile {
	description: "Page Two and Three with write protection",
	start: 0x40,
	page_size: 32,
	page_count: 2,
	max_packet_len: 29,
	capabilities: SHA_MEMORY,
	kind: BankKind::Sha(ShaLayout {
		read_opcode: READ_MEMORY,
		scratchpad: &DS2432_SCRATCHPAD,
	}),
};

pub static DS2432_STATUS_PAGE: BankProfile = BankProfile {
	description: "Status Page that contains the secret and the status",
	start: 0x80,
	page_size: 32,
	page_count: 1,
	max_packet_len: 29,
	capabilities: CapabilitySet {
		general_purpose: false,
		page_auto_crc: false,
		..EEPROM_MEMORY
	},
	kind: BankKind::Sha(ShaLayout {
		read_opcode: READ_MEMORY,
		scratchpad: &DS2432_SCRATCHPAD,
	}),
};

static DS2431_BANKS: [&BankProfile; 2] = [&DS2431_MAIN, &DS2431_REGISTERS];
static DS2433_BANKS: [&BankProfile; 1] = [&DS2433_MAIN];
static DS1982_BANKS: [&BankProfile; 2] = [&DS1982_MAIN, &DS1982_STATUS];
static DS2432_BANKS: [&BankProfile; 4] = [&DS2432_PAGE_ZERO, &DS2432_PAGE_ONE, &DS2432_PAGES_TWO_THREE, &DS2432_STATUS_PAGE];

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Chip {
	Ds2431,
	Ds2433,
	Ds1982,
	Ds2432,
}

impl Chip {
	pub fn from_family(family: u8) -> Option<Chip> {
		match family {
			0x2D => Some(Chip::Ds2431),
			0x23 => Some(Chip::Ds2433),
			0x09 => Some(Chip::Ds1982),
			0x33 => Some(Chip::Ds2432),
			_ => None,
		}
	}

	pub fn from_address(address: &DeviceAddress) -> Option<Chip> {
		Chip::from_family(address.family())
	}

	pub fn family(&self) -> u8 {
		match self {
			Chip::Ds2431 => 0x2D,
			Chip::Ds2433 => 0x23,
			Chip::Ds1982 => 0x09,
			Chip::Ds2432 => 0x33,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Chip::Ds2431 => "DS2431",
			Chip::Ds2433 => "DS2433",
			Chip::Ds1982 => "DS1982",
			Chip::Ds2432 => "DS2432",
		}
	}

	pub fn description(&self) -> &'static str {
		match self {
			Chip::Ds2431 => "1024-bit 1-Wire EEPROM",
			Chip::Ds2433 => "4096-bit 1-Wire EEPROM",
			Chip::Ds1982 => "1024-bit add-only memory",
			Chip::Ds2432 => "1024-bit EEPROM with SHA-1 engine",
		}
	}

	pub fn profiles(&self) -> &'static [&'static BankProfile] {
		match self {
			Chip::Ds2431 => &DS2431_BANKS,
			Chip::Ds2433 => &DS2433_BANKS,
			Chip::Ds1982 => &DS1982_BANKS,
			Chip::Ds2432 => &DS2432_BANKS,
		}
	}

	pub fn memory_banks(&self, address: DeviceAddress, speed: Speed) -> Vec<MemoryBank> {
		self.profiles().iter().map(|&profile| MemoryBank::new(address, speed, profile)).collect()
	}
}

impl fmt::Display for Chip {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} ({})", self.name(), self.description())
	}
}
