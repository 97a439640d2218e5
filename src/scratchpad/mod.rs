//! Scratchpad staging protocol.
//!
//! Non-volatile memory is never written directly: data goes to the
//! volatile scratchpad first (`write_scratchpad`), may be read back to check
//! the device got what we sent (`Staged::read_back`) and is then committed
//! with a copy command (`Staged::copy`, `Verified::copy` or their MAC
//! authorized forms). Each transition consumes the previous state, so a
//! copy can't be issued without a staged scratchpad, and the whole sequence
//! borrows one `Session`.

use std::time::Duration;

use crate::bus::{
	BankId,
	DeviceAddress,
	PowerCondition,
	PowerDuration,
	Session,
	Speed,
	Transport,
};
use crate::crc::crc16_valid;
use crate::error::{
	PResult,
	ProtocolError,
};

mod sha;

pub use self::sha::{
	COMPUTE_NEXT_SECRET,
	LOAD_FIRST_SECRET,
	READ_AUTHENTICATED_PAGE,
	REFRESH_SCRATCHPAD,
};

/// Wire parameters of a scratchpad.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ScratchpadLayout {
	pub size: usize,
	pub write_opcode: u8,
	pub read_opcode: u8,
	pub copy_opcode: u8,
	/// how long the strong pull-up has to be held for a copy
	pub program_time: Duration,
	/// device appends an inverted CRC16 when a write fills the scratchpad
	pub write_returns_crc: bool,
	/// bits of the E/S byte that are always set on this device
	pub es_fixed_bits: u8,
}

// E/S byte flags
pub const ES_PARTIAL: u8 = 0x20;
pub const ES_AUTHORIZATION_ACCEPTED: u8 = 0x80;

/// Target address and E/S byte echoed by a scratchpad read.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ExtraInfo {
	pub target: u16,
	pub es: u8,
}

impl ExtraInfo {
	pub fn to_bytes(&self) -> [u8; 3] {
		[self.target as u8, (self.target >> 8) as u8, self.es]
	}
}

/// Result code of a copy (or load first secret) command.
pub fn copy_status(result: u8) -> PResult<()> {
	match result {
		0xAA | 0x55 => Ok(()),
		0xFF => Err(ProtocolError::WriteProtected),
		0x00 => Err(ProtocolError::AuthenticationFailed),
		b => Err(ProtocolError::UnknownDeviceResponse(b)),
	}
}

/// The scratchpad of one device.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Scratchpad {
	device: DeviceAddress,
	speed: Speed,
	layout: &'static ScratchpadLayout,
}

impl Scratchpad {
	pub fn new(device: DeviceAddress, speed: Speed, layout: &'static ScratchpadLayout) -> Self {
		Scratchpad { device, speed, layout }
	}

	pub fn size(&self) -> usize {
		self.layout.size
	}

	pub fn layout(&self) -> &'static ScratchpadLayout {
		self.layout
	}

	pub fn bank(&self) -> BankId {
		BankId::scratchpad(self.device)
	}

	/// E/S byte the device reports after staging `len` bytes at `target`
	pub fn es_for(&self, target: u16, len: usize) -> u8 {
		let mask = (self.layout.size - 1) as u8;
		let offset = (target as usize % self.layout.size) as u8;
		self.layout.es_fixed_bits | (offset.wrapping_add(len as u8).wrapping_sub(1) & mask)
	}

	fn begin<T: Transport>(&self, session: &mut Session<T>) -> PResult<()> {
		let bank = self.bank();
		session.check_speed(bank, self.speed)?;
		session.select_bank(bank)
	}

	/// Idle -> Staged
	///
	/// `data` must fit between the target's scratchpad offset and the end of
	/// the scratchpad.
	pub fn write_scratchpad<'s, 'a, T: Transport>(&self, session: &'s mut Session<'a, T>, target: u16, data: &[u8]) -> PResult<Staged<'s, 'a, T>> {
		let offset = target as usize % self.layout.size;
		assert!(!data.is_empty(), "empty scratchpad write");
		assert!(offset + data.len() <= self.layout.size, "scratchpad write of {} bytes at offset {} overflows", data.len(), offset);

		let bank = self.bank();
		self.begin(session)?;

		let crc_len = if self.layout.write_returns_crc && offset + data.len() == self.layout.size { 2 } else { 0 };
		let write_opcode = self.layout.write_opcode;
		let crc_ok = session.exchange(bank, |transport, buffers| {
			buffers.page(data.len()).copy_from_slice(data);
			let buf = buffers.io(3 + data.len() + crc_len);
			buf[0] = write_opcode;
			buf[1] = target as u8;
			buf[2] = (target >> 8) as u8;
			buf[3..3 + data.len()].copy_from_slice(data);
			transport.data_block(buf)?;
			trace!("write scratchpad: {:02x?}", buf);
			Ok(crc_len == 0 || crc16_valid(buf, 0))
		})?;
		if !crc_ok {
			return session.fail(bank, ProtocolError::CrcMismatch("write scratchpad"));
		}

		debug!("{}: staged {} bytes for 0x{:04x}", self.device, data.len(), target);
		Ok(Staged {
			session,
			pad: *self,
			target,
			len: data.len(),
		})
	}

	// leaves the scratchpad data in the session io buffer at offset 4
	fn exchange_read<T: Transport>(&self, session: &mut Session<T>) -> PResult<ExtraInfo> {
		let bank = self.bank();
		self.begin(session)?;

		let size = self.layout.size;
		let read_opcode = self.layout.read_opcode;
		let (crc_ok, info) = session.exchange(bank, |transport, buffers| {
			let buf = buffers.io(4 + size + 2);
			buf[0] = read_opcode;
			transport.data_block(buf)?;
			trace!("read scratchpad: {:02x?}", buf);
			let info = ExtraInfo {
				target: buf[1] as u16 | (buf[2] as u16) << 8,
				es: buf[3],
			};
			Ok((crc16_valid(buf, 0), info))
		})?;
		if !crc_ok {
			return session.fail(bank, ProtocolError::CrcMismatch("read scratchpad"));
		}
		Ok(info)
	}

	/// Read the full scratchpad into `out` (which must be exactly the
	/// scratchpad size) and return the echoed target and E/S byte.
	pub fn read_scratchpad<T: Transport>(&self, session: &mut Session<T>, out: &mut [u8]) -> PResult<ExtraInfo> {
		assert_eq!(out.len(), self.layout.size, "scratchpad read buffer size");
		let info = self.exchange_read(session)?;
		let (_, buffers) = session.parts();
		let size = self.layout.size;
		out.copy_from_slice(&buffers.io_data()[4..4 + size]);
		Ok(info)
	}

	/// Plain copy of the `len` bytes staged at `target`.
	pub fn copy_scratchpad<T: Transport>(&self, session: &mut Session<T>, target: u16, len: usize) -> PResult<()> {
		let es = self.es_for(target, len);
		self.commit(session, target, es)
	}

	fn commit<T: Transport>(&self, session: &mut Session<T>, target: u16, es: u8) -> PResult<()> {
		let bank = self.bank();
		self.begin(session)?;

		let mut header = [self.layout.copy_opcode, target as u8, (target >> 8) as u8];
		let program_time = self.layout.program_time;
		let result = session.exchange(bank, |transport, _| {
			transport.data_block(&mut header)?;
			transport.set_power_duration(PowerDuration::Infinite)?;
			transport.start_power_delivery(PowerCondition::AfterNextByte)?;
			transport.put_byte(es)?;
			transport.delay(program_time);
			transport.set_power_normal()?;
			transport.get_byte()
		})?;
		trace!("copy scratchpad 0x{:04x} es 0x{:02x}: 0x{:02x}", target, es, result);

		match copy_status(result) {
			Ok(()) => {
				debug!("{}: committed scratchpad to 0x{:04x}", self.device, target);
				Ok(())
			},
			Err(e) => session.fail(bank, e),
		}
	}
}

/// Scratchpad holds data for `target`, not yet checked.
#[must_use]
pub struct Staged<'s, 'a: 's, T: Transport + 'a> {
	session: &'s mut Session<'a, T>,
	pad: Scratchpad,
	target: u16,
	len: usize,
}

impl<'s, 'a, T: Transport> Staged<'s, 'a, T> {
	pub fn target(&self) -> u16 {
		self.target
	}

	/// Staged -> Verified
	///
	/// Reads the scratchpad back and compares echoed target, ending offset
	/// and data with what was staged.
	pub fn read_back(self) -> PResult<Verified<'s, 'a, T>> {
		let Staged { session, pad, target, len } = self;
		let bank = pad.bank();
		let info = pad.exchange_read(session)?;

		let expected_es = pad.es_for(target, len);
		let offset = target as usize % pad.size();
		let problem = {
			let (_, buffers) = session.parts();
			let mut problem = None;
			if info.target != target {
				problem = Some("scratchpad target address");
			} else if info.es & ES_PARTIAL != 0 || (info.es ^ expected_es) & (pad.size() - 1) as u8 != 0 {
				problem = Some("scratchpad ending offset");
			} else if buffers.io_data()[4 + offset..4 + offset + len] != buffers.page_data()[..len] {
				problem = Some("scratchpad data");
			}
			problem
		};
		if let Some(what) = problem {
			return session.fail(bank, ProtocolError::VerificationFailed(what));
		}

		Ok(Verified {
			session,
			pad,
			target,
			es: info.es,
		})
	}

	/// Staged -> Committed, trusting the device's status byte.
	pub fn copy(self) -> PResult<Committed> {
		let es = self.pad.es_for(self.target, self.len);
		self.pad.commit(self.session, self.target, es)?;
		Ok(Committed { target: self.target, es })
	}
}

/// Scratchpad content confirmed by a read back.
#[must_use]
pub struct Verified<'s, 'a: 's, T: Transport + 'a> {
	session: &'s mut Session<'a, T>,
	pad: Scratchpad,
	target: u16,
	es: u8,
}

impl<'s, 'a, T: Transport> Verified<'s, 'a, T> {
	pub fn es(&self) -> u8 {
		self.es
	}

	pub fn copy(self) -> PResult<Committed> {
		self.pad.commit(self.session, self.target, self.es)?;
		Ok(Committed { target: self.target, es: self.es })
	}

	/// Leave the data in the scratchpad for a command that reads it from
	/// there (e.g. the challenge of an authenticated page read).
	pub fn finish(self) {
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Committed {
	pub target: u16,
	pub es: u8,
}
