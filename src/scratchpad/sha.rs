use std::time::Duration;

use crate::bus::{
	PowerCondition,
	PowerDuration,
	Session,
	Transport,
};
use crate::crc::crc16_valid;
use crate::error::{
	PResult,
	ProtocolError,
};
use crate::sha::{
	Mac,
	PAGE_SIZE,
};

use super::{
	copy_status,
	Committed,
	Scratchpad,
	Staged,
	Verified,
};

pub const LOAD_FIRST_SECRET: u8 = 0x5A;
pub const COMPUTE_NEXT_SECRET: u8 = 0x33;
pub const REFRESH_SCRATCHPAD: u8 = 0xA3;
pub const READ_AUTHENTICATED_PAGE: u8 = 0xA5;

const SHA_COMPUTATION_TIME: Duration = Duration::from_millis(2);
const LOAD_FIRST_SECRET_TIME: Duration = Duration::from_millis(20);
const COMPUTE_NEXT_SECRET_TIME: Duration = Duration::from_millis(14);
const COPY_WITH_MAC_TIME: Duration = Duration::from_millis(12);

// scratchpad content after a successful compute next secret
const NEXT_SECRET_FILL: u8 = 0xAA;

/// Commands of SHA-1 capable devices (DS1961S/DS2432).
impl Scratchpad {
	/// Copy the 8 staged bytes into the secret (target 0x80) or, after a
	/// refresh, back into memory at `target`.
	pub fn load_first_secret<T: Transport>(&self, session: &mut Session<T>, target: u16) -> PResult<()> {
		let bank = self.bank();
		let es = self.es_for(target, self.size());
		self.begin(session)?;

		let mut header = [LOAD_FIRST_SECRET, target as u8, (target >> 8) as u8];
		let result = session.exchange(bank, |transport, _| {
			transport.data_block(&mut header)?;
			transport.set_power_duration(PowerDuration::Infinite)?;
			transport.start_power_delivery(PowerCondition::AfterNextByte)?;
			transport.put_byte(es)?;
			transport.delay(LOAD_FIRST_SECRET_TIME);
			transport.set_power_normal()?;
			transport.get_byte()
		})?;
		trace!("load first secret 0x{:04x}: 0x{:02x}", target, result);

		match copy_status(result) {
			Ok(()) => Ok(()),
			Err(e) => session.fail(bank, e),
		}
	}

	/// Let the device derive its next secret from the page at `target` and
	/// the partial secret staged in the scratchpad.
	pub fn compute_next_secret<T: Transport>(&self, session: &mut Session<T>, target: u16) -> PResult<()> {
		let bank = self.bank();
		self.begin(session)?;

		let mut header = [COMPUTE_NEXT_SECRET, target as u8];
		session.exchange(bank, |transport, _| {
			transport.data_block(&mut header)?;
			transport.set_power_duration(PowerDuration::Infinite)?;
			transport.start_power_delivery(PowerCondition::AfterNextByte)?;
			transport.put_byte((target >> 8) as u8)?;
			transport.delay(COMPUTE_NEXT_SECRET_TIME);
			transport.set_power_normal()
		})?;

		// the device wipes the scratchpad once the new secret is stored
		self.exchange_read(session)?;
		let wiped = {
			let (_, buffers) = session.parts();
			buffers.io_data()[4..4 + self.size()].iter().all(|&b| b == NEXT_SECRET_FILL)
		};
		if !wiped {
			return session.fail(bank, ProtocolError::VerificationFailed("scratchpad after compute next secret"));
		}
		Ok(())
	}

	/// Load the memory row at `target` into the scratchpad.
	pub fn refresh_scratchpad<T: Transport>(&self, session: &mut Session<T>, target: u16) -> PResult<()> {
		let bank = self.bank();
		self.begin(session)?;

		let size = self.size();
		let crc_ok = session.exchange(bank, |transport, buffers| {
			let buf = buffers.io(3 + size + 2);
			buf[0] = REFRESH_SCRATCHPAD;
			buf[1] = target as u8;
			buf[2] = (target >> 8) as u8;
			for b in &mut buf[3..3 + size] {
				*b = 0x00;
			}
			transport.data_block(buf)?;
			trace!("refresh scratchpad: {:02x?}", buf);
			Ok(crc16_valid(buf, 0))
		})?;
		if !crc_ok {
			return session.fail(bank, ProtocolError::CrcMismatch("refresh scratchpad"));
		}
		Ok(())
	}

	/// Read a page signed with the challenge staged before; returns the
	/// device's MAC unchecked.
	pub fn read_authenticated_page<T: Transport>(&self, session: &mut Session<T>, target: u16, page: &mut [u8; PAGE_SIZE]) -> PResult<Mac> {
		let bank = self.bank();
		self.begin(session)?;

		// command, address, page, 0xFF, CRC16
		let crc_ok = session.exchange(bank, |transport, buffers| {
			let buf = buffers.io(3 + PAGE_SIZE + 1 + 2);
			buf[0] = READ_AUTHENTICATED_PAGE;
			buf[1] = target as u8;
			buf[2] = (target >> 8) as u8;
			transport.data_block(buf)?;
			trace!("read authenticated page: {:02x?}", buf);
			page.copy_from_slice(&buf[3..3 + PAGE_SIZE]);
			Ok(crc16_valid(buf, 0))
		})?;
		if !crc_ok {
			return session.fail(bank, ProtocolError::CrcMismatch("authenticated page"));
		}

		session.delay(SHA_COMPUTATION_TIME);

		let mut mac = [0xFFu8; 20];
		let crc_ok = session.exchange(bank, |transport, buffers| {
			let buf = buffers.io(20 + 2);
			transport.data_block(buf)?;
			trace!("page MAC: {:02x?}", buf);
			mac.copy_from_slice(&buf[..20]);
			Ok(crc16_valid(buf, 0))
		})?;
		if !crc_ok {
			return session.fail(bank, ProtocolError::CrcMismatch("page MAC"));
		}
		Ok(Mac(mac))
	}

	fn commit_with_mac<T: Transport>(&self, session: &mut Session<T>, target: u16, es: u8, mac: &Mac) -> PResult<()> {
		let bank = self.bank();
		self.begin(session)?;

		let mut header = [self.layout.copy_opcode, target as u8, (target >> 8) as u8, es];
		let mut head = [0u8; 19];
		head.copy_from_slice(&mac.0[..19]);
		let result = session.exchange(bank, |transport, _| {
			transport.data_block(&mut header)?;
			transport.delay(SHA_COMPUTATION_TIME);
			transport.data_block(&mut head)?;
			transport.set_power_duration(PowerDuration::Infinite)?;
			transport.start_power_delivery(PowerCondition::AfterNextByte)?;
			transport.put_byte(mac.0[19])?;
			transport.delay(COPY_WITH_MAC_TIME);
			transport.set_power_normal()?;
			transport.get_byte()
		})?;
		trace!("copy scratchpad with MAC 0x{:04x}: 0x{:02x}", target, result);

		match copy_status(result) {
			Ok(()) => {
				debug!("{}: authenticated copy to 0x{:04x}", self.device, target);
				Ok(())
			},
			Err(e) => session.fail(bank, e),
		}
	}
}

impl<'s, 'a, T: Transport> Staged<'s, 'a, T> {
	pub fn copy_with_mac(self, mac: &Mac) -> PResult<Committed> {
		let es = self.pad.es_for(self.target, self.len);
		self.pad.commit_with_mac(self.session, self.target, es, mac)?;
		Ok(Committed { target: self.target, es })
	}
}

impl<'s, 'a, T: Transport> Verified<'s, 'a, T> {
	pub fn copy_with_mac(self, mac: &Mac) -> PResult<Committed> {
		self.pad.commit_with_mac(self.session, self.target, self.es, mac)?;
		Ok(Committed { target: self.target, es: self.es })
	}

	pub fn load_first_secret(self) -> PResult<Committed> {
		self.pad.load_first_secret(self.session, self.target)?;
		Ok(Committed { target: self.target, es: self.es })
	}

	pub fn compute_next_secret(self) -> PResult<()> {
		self.pad.compute_next_secret(self.session, self.target)
	}
}
