//! Memory banks: paged regions of device memory.
//!
//! One `MemoryBank` type covers all chips; what differs between them
//! (geometry, capabilities, opcodes, scratchpad, lock and redirection
//! bytes) is data in a `BankProfile` (see `chips`).
//!
//! - EEPROM banks are written through the scratchpad, one whole scratchpad
//!   unit at a time.
//! - EPROM banks are programmed byte by byte with a program pulse and
//!   carry CRC8 checked reads.
//! - SHA banks read like EEPROM but are only written with a MAC.

mod bank;
mod capabilities;
mod eeprom;
mod eprom;
mod packet;

pub use self::bank::{
	BankKind,
	BankProfile,
	EepromLayout,
	EpromLayout,
	MemoryBank,
	ShaLayout,
	StatusRef,
};

pub use self::capabilities::{
	CapabilitySet,
};

pub use self::eeprom::{
	PAGE_PROTECTED,
};

pub use self::packet::{
	decode_packet,
	encode_packet,
};
