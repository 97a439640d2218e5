use crate::bus::{
	BankId,
	DeviceAddress,
	Session,
	Speed,
	Transport,
};
use crate::error::{
	PResult,
	ProtocolError,
};
use crate::scratchpad::{
	Scratchpad,
	ScratchpadLayout,
};

use super::{
	eeprom,
	eprom,
	CapabilitySet,
};

/// A byte in another bank holding per-page state (lock bits, redirection).
#[derive(Clone, Copy, Debug)]
pub struct StatusRef {
	pub bank: &'static BankProfile,
	pub offset: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct EepromLayout {
	pub read_opcode: u8,
	pub scratchpad: &'static ScratchpadLayout,
	/// one protection byte per page
	pub lock: Option<StatusRef>,
}

#[derive(Clone, Copy, Debug)]
pub struct EpromLayout {
	pub read_opcode: u8,
	/// read with a CRC8 after the header and after every page
	pub crc_read_opcode: u8,
	pub write_opcode: u8,
	/// plain reads carry page CRCs as well
	pub paged_read: bool,
	/// one bit per page, cleared when locked
	pub lock: Option<StatusRef>,
	/// one byte per page, complement of the new page number
	pub redirect: Option<StatusRef>,
}

#[derive(Clone, Copy, Debug)]
pub struct ShaLayout {
	pub read_opcode: u8,
	pub scratchpad: &'static ScratchpadLayout,
}

#[derive(Clone, Copy, Debug)]
pub enum BankKind {
	Eeprom(EepromLayout),
	Eprom(EpromLayout),
	/// written only with a MAC, see `sha::ShaDevice`
	Sha(ShaLayout),
}

/// Constant description of a memory bank of some chip.
#[derive(Debug)]
pub struct BankProfile {
	pub description: &'static str,
	/// physical address of the first byte
	pub start: u32,
	pub page_size: u16,
	pub page_count: u16,
	pub max_packet_len: usize,
	pub capabilities: CapabilitySet,
	pub kind: BankKind,
}

impl BankProfile {
	pub fn size(&self) -> u32 {
		self.page_size as u32 * self.page_count as u32
	}
}

/// A memory bank of one device.
///
/// Addresses passed to the operations are relative to the start of the
/// bank. Every operation runs inside the caller's `Session`.
#[derive(Clone, Debug)]
pub struct MemoryBank {
	device: DeviceAddress,
	speed: Speed,
	profile: &'static BankProfile,
	capabilities: CapabilitySet,
	write_verification: bool,
}

impl MemoryBank {
	pub fn new(device: DeviceAddress, speed: Speed, profile: &'static BankProfile) -> Self {
		assert!(profile.capabilities.is_consistent(), "inconsistent capabilities for {}", profile.description);
		let write_verification = match profile.kind {
			BankKind::Eprom(_) => true,
			_ => false,
		};
		MemoryBank {
			device,
			speed,
			profile,
			capabilities: profile.capabilities,
			write_verification,
		}
	}

	pub fn device(&self) -> DeviceAddress {
		self.device
	}

	pub fn speed(&self) -> Speed {
		self.speed
	}

	pub fn profile(&self) -> &'static BankProfile {
		self.profile
	}

	pub fn description(&self) -> &'static str {
		self.profile.description
	}

	pub fn start(&self) -> u32 {
		self.profile.start
	}

	pub fn size(&self) -> u32 {
		self.profile.size()
	}

	pub fn page_size(&self) -> usize {
		self.profile.page_size as usize
	}

	pub fn page_count(&self) -> u32 {
		self.profile.page_count as u32
	}

	pub fn max_packet_len(&self) -> usize {
		self.profile.max_packet_len
	}

	pub fn capabilities(&self) -> &CapabilitySet {
		&self.capabilities
	}

	pub fn id(&self) -> BankId {
		BankId::bank(self.device, self.profile.description)
	}

	pub fn write_verification(&self) -> bool {
		self.write_verification
	}

	/// Re-read memory after every committed write unit and compare.
	pub fn set_write_verification(&mut self, enabled: bool) {
		self.write_verification = enabled;
	}

	pub fn write_protect(&mut self) {
		if !self.capabilities.read_only {
			debug!("{}: {} is write-protected now", self.device, self.profile.description);
		}
		self.capabilities.write_protect();
	}

	pub fn set_write_once(&mut self) {
		self.capabilities.set_write_once();
	}

	/// Another bank of the same device (e.g. the status bank holding this
	/// bank's lock bits).
	pub(super) fn sibling(&self, profile: &'static BankProfile) -> MemoryBank {
		MemoryBank::new(self.device, self.speed, profile)
	}

	pub(super) fn scratchpad(&self, layout: &'static ScratchpadLayout) -> Scratchpad {
		Scratchpad::new(self.device, self.speed, layout)
	}

	pub(super) fn begin<T: Transport>(&self, session: &mut Session<T>) -> PResult<()> {
		let id = self.id();
		session.check_speed(id, self.speed)?;
		session.select_bank(id)
	}

	fn check_range(&self, start: u32, len: usize) -> PResult<()> {
		if start as u64 + len as u64 > self.size() as u64 {
			return Err(ProtocolError::OutOfRange {
				start,
				len,
				size: self.size(),
			});
		}
		Ok(())
	}

	pub(super) fn check_page(&self, page: u32) -> PResult<()> {
		if page >= self.page_count() {
			return Err(ProtocolError::OutOfRange {
				start: page.saturating_mul(self.profile.page_size as u32),
				len: self.page_size(),
				size: self.size(),
			});
		}
		Ok(())
	}

	pub fn page_offset(&self, page: u32) -> PResult<u32> {
		self.check_page(page)?;
		Ok(page * self.profile.page_size as u32)
	}

	pub fn read<T: Transport>(&self, session: &mut Session<T>, start: u32, continue_session: bool, len: usize) -> PResult<Vec<u8>> {
		let mut data = vec![0u8; len];
		self.read_into(session, start, continue_session, &mut data)?;
		Ok(data)
	}

	/// With `continue_session` the device is expected to still stream from
	/// the previous read: no select and no command header are sent.
	pub fn read_into<T: Transport>(&self, session: &mut Session<T>, start: u32, continue_session: bool, out: &mut [u8]) -> PResult<()> {
		self.check_range(start, out.len())?;
		if out.is_empty() {
			return Ok(());
		}
		match self.profile.kind {
			BankKind::Eeprom(ref layout) => eeprom::read(self, layout.read_opcode, session, start, continue_session, out),
			BankKind::Sha(ref layout) => eeprom::read(self, layout.read_opcode, session, start, continue_session, out),
			BankKind::Eprom(ref layout) => eprom::read(self, layout, session, start, continue_session, out),
		}
	}

	pub fn write<T: Transport>(&self, session: &mut Session<T>, start: u32, data: &[u8]) -> PResult<()> {
		if !self.capabilities.is_writable() {
			return Err(ProtocolError::ReadOnly);
		}
		self.check_range(start, data.len())?;
		if data.is_empty() {
			return Ok(());
		}
		match self.profile.kind {
			BankKind::Eeprom(ref layout) => eeprom::write(self, layout, session, start, data),
			BankKind::Eprom(ref layout) => eprom::write(self, layout, session, start, data),
			BankKind::Sha(_) => Err(ProtocolError::Unsupported("plain write to SHA memory, use the authenticated write")),
		}
	}

	pub fn read_page<T: Transport>(&self, session: &mut Session<T>, page: u32, continue_session: bool) -> PResult<Vec<u8>> {
		let offset = self.page_offset(page)?;
		self.read(session, offset, continue_session, self.page_size())
	}

	/// Page read checked by a device generated CRC.
	pub fn read_page_with_crc<T: Transport>(&self, session: &mut Session<T>, page: u32, continue_session: bool) -> PResult<Vec<u8>> {
		self.check_page(page)?;
		let mut data = vec![0u8; self.page_size()];
		match self.profile.kind {
			BankKind::Eeprom(_) => return Err(ProtocolError::Unsupported("page read with CRC")),
			BankKind::Eprom(ref layout) => eprom::read_page_with_crc(self, layout, session, page, continue_session, &mut data)?,
			BankKind::Sha(ref layout) => {
				let address = (self.start() + self.page_offset(page)?) as u16;
				let pad = self.scratchpad(layout.scratchpad);
				let (page_data, _) = crate::sha::read_signed_page(&pad, session, address, &crate::sha::Challenge([0xFF; 3]))?;
				data.copy_from_slice(&page_data[..self.page_size()]);
			},
		}
		Ok(data)
	}

	pub fn lock_page<T: Transport>(&self, session: &mut Session<T>, page: u32) -> PResult<()> {
		self.check_page(page)?;
		if !self.capabilities.lockable {
			return Err(ProtocolError::Unsupported("page locking"));
		}
		match self.profile.kind {
			BankKind::Eeprom(EepromLayout { lock: Some(ref lock), .. }) => eeprom::lock_page(self, lock, session, page),
			BankKind::Eprom(EpromLayout { lock: Some(ref lock), .. }) => eprom::lock_page(self, lock, session, page),
			_ => Err(ProtocolError::Unsupported("page locking")),
		}
	}

	pub fn is_page_locked<T: Transport>(&self, session: &mut Session<T>, page: u32) -> PResult<bool> {
		self.check_page(page)?;
		match self.profile.kind {
			BankKind::Eeprom(EepromLayout { lock: Some(ref lock), .. }) => eeprom::is_page_locked(self, lock, session, page),
			BankKind::Eprom(EpromLayout { lock: Some(ref lock), .. }) => eprom::is_page_locked(self, lock, session, page),
			_ => Ok(false),
		}
	}

	/// Mark `page` as replaced by `new_page` (EPROM only).
	pub fn redirect_page<T: Transport>(&self, session: &mut Session<T>, page: u32, new_page: u8) -> PResult<()> {
		self.check_page(page)?;
		match self.profile.kind {
			BankKind::Eprom(EpromLayout { redirect: Some(ref redirect), .. }) if self.capabilities.redirectable => {
				eprom::redirect_page(self, redirect, session, page, new_page)
			},
			_ => Err(ProtocolError::Unsupported("page redirection")),
		}
	}

	/// The page `page` was redirected to; 0 if it isn't.
	pub fn redirected_page<T: Transport>(&self, session: &mut Session<T>, page: u32) -> PResult<u8> {
		self.check_page(page)?;
		match self.profile.kind {
			BankKind::Eprom(EpromLayout { redirect: Some(ref redirect), .. }) => eprom::redirected_page(self, redirect, session, page),
			_ => Ok(0),
		}
	}
}
