use crate::bus::{
	DeviceAddress,
	Session,
	Speed,
	Transport,
};
use crate::chips;
use crate::error::{
	PResult,
	ProtocolError,
};
use crate::memory::{
	decode_packet,
	encode_packet,
	MemoryBank,
};
use crate::scratchpad::Scratchpad;

use super::{
	authenticated_read_mac,
	copy_mac,
	next_secret,
	Challenge,
	Mac,
	Secret,
	PAGE_SIZE,
};

pub const STATUS_PAGE: u32 = 4;
pub const SECRET_ADDRESS: u16 = 0x80;

const MEMORY_END: u16 = 0xA0;
const UNIT: u16 = 8;

// control bytes in the status page
const CONTROL_SECRET_PROTECTED: u16 = 0x88;
const CONTROL_ALL_PROTECTED: u16 = 0x89;
const CONTROL_PAGE_ONE_EPROM: u16 = 0x8C;
const CONTROL_PAGE_ZERO_PROTECTED: u16 = 0x8D;

const CONTROL_SET: u8 = 0xAA;

fn control_set(b: u8) -> bool {
	b == 0xAA || b == 0x55
}

/// Protection state as read from the control bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ShaStatus {
	pub secret_protected: bool,
	pub all_protected: bool,
	pub page_one_eprom: bool,
	pub page_zero_protected: bool,
}

impl ShaStatus {
	fn merge(&mut self, other: ShaStatus) {
		self.secret_protected |= other.secret_protected;
		self.all_protected |= other.all_protected;
		self.page_one_eprom |= other.page_one_eprom;
		self.page_zero_protected |= other.page_zero_protected;
	}
}

/// Stage `challenge` at `address` and read the page signed by the device.
pub fn read_signed_page<T: Transport>(pad: &Scratchpad, session: &mut Session<T>, address: u16, challenge: &Challenge) -> PResult<([u8; PAGE_SIZE], Mac)> {
	let mut block = [0u8; 8];
	block[4..7].copy_from_slice(&challenge.0);
	pad.write_scratchpad(session, address, &block)?.read_back()?.finish();

	let mut page = [0u8; PAGE_SIZE];
	let mac = pad.read_authenticated_page(session, address, &mut page)?;
	Ok((page, mac))
}

/// A DS1961S/DS2432: EEPROM pages that only accept MAC authorized writes.
///
/// The device object keeps the host's copy of the secret in sync with the
/// device; every command changing the device secret updates it as well.
pub struct ShaDevice {
	address: DeviceAddress,
	scratchpad: Scratchpad,
	secret: Secret,
	challenge: Challenge,
	banks: [MemoryBank; 4],
	status: ShaStatus,
}

impl ShaDevice {
	pub fn new(address: DeviceAddress, speed: Speed) -> Self {
		ShaDevice {
			address,
			scratchpad: Scratchpad::new(address, speed, &chips::DS2432_SCRATCHPAD),
			secret: Secret::UNSET,
			challenge: Challenge::default(),
			banks: [
				MemoryBank::new(address, speed, &chips::DS2432_PAGE_ZERO),
				MemoryBank::new(address, speed, &chips::DS2432_PAGE_ONE),
				MemoryBank::new(address, speed, &chips::DS2432_PAGES_TWO_THREE),
				MemoryBank::new(address, speed, &chips::DS2432_STATUS_PAGE),
			],
			status: ShaStatus::default(),
		}
	}

	pub fn address(&self) -> DeviceAddress {
		self.address
	}

	pub fn secret(&self) -> &Secret {
		&self.secret
	}

	/// Use a secret already known to be on the device.
	pub fn set_secret(&mut self, secret: Secret) {
		self.secret = secret;
	}

	pub fn is_secret_set(&self) -> bool {
		self.secret.is_set()
	}

	pub fn challenge(&self) -> &Challenge {
		&self.challenge
	}

	pub fn set_challenge(&mut self, challenge: Challenge) {
		self.challenge = challenge;
	}

	pub fn banks(&self) -> &[MemoryBank] {
		&self.banks
	}

	pub fn status(&self) -> ShaStatus {
		self.status
	}

	pub fn is_secret_write_protected(&self) -> bool {
		self.status.secret_protected
	}

	pub fn is_all_write_protected(&self) -> bool {
		self.status.all_protected
	}

	pub fn is_page_one_eprom_mode(&self) -> bool {
		self.status.page_one_eprom
	}

	pub fn is_page_zero_write_protected(&self) -> bool {
		self.status.page_zero_protected
	}

	fn bank_for(&self, address: u16) -> &MemoryBank {
		match address {
			0x00..=0x1F => &self.banks[0],
			0x20..=0x3F => &self.banks[1],
			0x40..=0x7F => &self.banks[2],
			_ => &self.banks[3],
		}
	}

	fn page_address(page: u32) -> u16 {
		assert!(page <= STATUS_PAGE, "page {} out of range", page);
		(page * PAGE_SIZE as u32) as u16
	}

	fn require_secret(&self) -> PResult<()> {
		if !self.secret.is_set() {
			warn!("{}: no secret set", self.address);
			return Err(ProtocolError::SecretNotSet);
		}
		Ok(())
	}

	fn read_raw<T: Transport>(&self, session: &mut Session<T>, address: u16, out: &mut [u8]) -> PResult<()> {
		let bank = self.bank_for(address);
		bank.read_into(session, address as u32 - bank.start(), false, out)
	}

	pub fn read_memory_page<T: Transport>(&self, session: &mut Session<T>, page: u32) -> PResult<[u8; PAGE_SIZE]> {
		let mut data = [0u8; PAGE_SIZE];
		self.read_raw(session, Self::page_address(page), &mut data)?;
		Ok(data)
	}

	/// Install `data` as the device secret (no MAC needed unless the
	/// secret is write-protected).
	pub fn load_first_secret<T: Transport>(&mut self, session: &mut Session<T>, data: &[u8; 8]) -> PResult<()> {
		self.scratchpad.write_scratchpad(session, SECRET_ADDRESS, data)?.read_back()?.load_first_secret()?;
		self.secret = Secret(*data);
		debug!("{}: first secret loaded", self.address);
		Ok(())
	}

	/// Fold page `page` and `partial` into the secret, on the device and
	/// here.
	pub fn compute_next_secret<T: Transport>(&mut self, session: &mut Session<T>, page: u32, partial: &[u8; 8]) -> PResult<()> {
		self.require_secret()?;
		let address = Self::page_address(page);
		let mut page_data = [0u8; PAGE_SIZE];
		self.read_raw(session, address & 0xE0, &mut page_data)?;

		self.scratchpad.write_scratchpad(session, address, partial)?.read_back()?.compute_next_secret()?;
		self.secret = next_secret(&self.secret, &page_data, partial);
		debug!("{}: secret rotated with page {}", self.address, page);
		Ok(())
	}

	/// Derive the secret from `material` in 47-byte strides: bytes 0..32
	/// are page data and bytes 36..44 the partial secret of each stride.
	pub fn install_master_secret<T: Transport>(&mut self, session: &mut Session<T>, page: u32, material: &[u8]) -> PResult<()> {
		assert!(!material.is_empty(), "empty secret material");
		assert!(page < STATUS_PAGE, "master secret needs a data page, not {}", page);

		self.load_first_secret(session, &[0u8; 8])?;

		let mut padded = material.to_vec();
		let strides = (padded.len() + 46) / 47;
		padded.resize(strides * 47, 0x00);
		for stride in padded.chunks(47) {
			let mut page_data = [0u8; PAGE_SIZE];
			page_data.copy_from_slice(&stride[0..32]);
			let mut partial = [0u8; 8];
			partial.copy_from_slice(&stride[36..44]);

			self.write_data_page(session, page, &page_data)?;
			self.compute_next_secret(session, page, &partial)?;
		}
		debug!("{}: master secret installed ({} strides)", self.address, strides);
		Ok(())
	}

	/// Make the secret unique to this device: write `bind_data` to `page`
	/// and fold the page number and device identity into the secret.
	pub fn bind_secret_to_device<T: Transport>(&mut self, session: &mut Session<T>, page: u32, bind_data: &[u8; PAGE_SIZE]) -> PResult<()> {
		self.write_data_page(session, page, bind_data)?;
		let mut partial = [0u8; 8];
		partial[0] = page as u8;
		partial[1..8].copy_from_slice(&self.address.identity());
		self.compute_next_secret(session, page, &partial)?;
		debug!("{}: secret bound to device", self.address);
		Ok(())
	}

	/// Rewrite page `page` from its own content (refreshes weak EEPROM
	/// cells).
	pub fn refresh_page<T: Transport>(&self, session: &mut Session<T>, page: u32) -> PResult<()> {
		let address = Self::page_address(page);
		for block in 0..(PAGE_SIZE as u16 / UNIT) {
			let target = address + block * UNIT;
			self.scratchpad.refresh_scratchpad(session, target)?;
			self.scratchpad.load_first_secret(session, target)?;
		}
		debug!("{}: page {} refreshed", self.address, page);
		Ok(())
	}

	/// Page content and device MAC for the current challenge, unverified;
	/// see `Mac::is_valid_for`.
	pub fn read_page_signature<T: Transport>(&self, session: &mut Session<T>, page: u32) -> PResult<([u8; PAGE_SIZE], Mac)> {
		read_signed_page(&self.scratchpad, session, Self::page_address(page), &self.challenge)
	}

	pub fn read_authenticated_page<T: Transport>(&self, session: &mut Session<T>, page: u32) -> PResult<[u8; PAGE_SIZE]> {
		self.require_secret()?;
		let address = Self::page_address(page);
		let (data, mac) = self.read_page_signature(session, page)?;
		let expected = authenticated_read_mac(&self.secret, &data, address, &self.address.identity(), &self.challenge);
		if mac != expected {
			return session.fail(self.scratchpad.bank(), ProtocolError::AuthenticationFailed);
		}
		Ok(data)
	}

	/// Authenticated write of `data` at `address`, one 8-byte unit at a
	/// time; partial units are completed with the current memory content.
	pub fn write_memory<T: Transport>(&self, session: &mut Session<T>, address: u16, data: &[u8]) -> PResult<()> {
		self.require_secret()?;
		if address as usize + data.len() > MEMORY_END as usize {
			return Err(ProtocolError::OutOfRange {
				start: address as u32,
				len: data.len(),
				size: MEMORY_END as u32,
			});
		}
		if data.is_empty() {
			return Ok(());
		}

		let end = address + data.len() as u16;
		if address < SECRET_ADDRESS + UNIT && end > SECRET_ADDRESS {
			return Err(ProtocolError::Unsupported("secret is only written by load first secret"));
		}
		// refuse before the first unit is committed
		let first_unit = address & !(UNIT - 1);
		for unit_address in (first_unit..end).step_by(UNIT as usize) {
			let bank = self.bank_for(unit_address);
			if !bank.capabilities().is_writable() {
				warn!("{}: {} is write-protected", self.address, bank.description());
				return Err(ProtocolError::ReadOnly);
			}
		}

		let mut unit_address = first_unit;
		while unit_address < end {
			let bank = self.bank_for(unit_address);
			let page_address = unit_address & !(PAGE_SIZE as u16 - 1);
			let mut page = [0u8; PAGE_SIZE];
			self.read_raw(session, page_address, &mut page)?;
			if page_address == SECRET_ADDRESS {
				// the device hashes its secret in place of these bytes
				page[0..8].copy_from_slice(&self.secret.0);
			}

			let in_page = (unit_address - page_address) as usize;
			let mut unit = [0u8; UNIT as usize];
			unit.copy_from_slice(&page[in_page..in_page + UNIT as usize]);
			for (i, b) in unit.iter_mut().enumerate() {
				let a = unit_address + i as u16;
				if a >= address && a < end {
					*b = data[(a - address) as usize];
				}
			}

			let mac = copy_mac(&self.secret, &page, &unit, unit_address, &self.address.identity());
			self.scratchpad.write_scratchpad(session, unit_address, &unit)?.read_back()?.copy_with_mac(&mac)?;

			if bank.write_verification() {
				let mut check = [0u8; UNIT as usize];
				self.read_raw(session, unit_address, &mut check)?;
				if check != unit {
					return session.fail(bank.id(), ProtocolError::VerificationFailed("memory after authenticated copy"));
				}
			}
			unit_address += UNIT;
		}
		debug!("{}: authenticated write of {} bytes at 0x{:02x}", self.address, data.len(), address);
		Ok(())
	}

	pub fn write_data_page<T: Transport>(&self, session: &mut Session<T>, page: u32, data: &[u8; PAGE_SIZE]) -> PResult<()> {
		self.write_memory(session, Self::page_address(page), data)
	}

	// packet CRCs are seeded with the page number within the bank
	fn bank_page(&self, page: u32) -> (&MemoryBank, u32) {
		let address = Self::page_address(page);
		let bank = self.bank_for(address);
		(bank, (address as u32 - bank.start()) / PAGE_SIZE as u32)
	}

	pub fn read_page_packet<T: Transport>(&self, session: &mut Session<T>, page: u32) -> PResult<Vec<u8>> {
		let raw = self.read_memory_page(session, page)?;
		let (bank, bank_page) = self.bank_page(page);
		match decode_packet(bank_page, &raw, bank.max_packet_len()) {
			Ok(data) => Ok(data.to_vec()),
			Err(e) => session.fail(bank.id(), e),
		}
	}

	pub fn write_page_packet<T: Transport>(&self, session: &mut Session<T>, page: u32, data: &[u8]) -> PResult<()> {
		let (bank, bank_page) = self.bank_page(page);
		let max = bank.max_packet_len();
		if data.len() > max {
			return Err(ProtocolError::InvalidPacketLength { len: data.len(), max });
		}
		self.write_memory(session, Self::page_address(page), &encode_packet(bank_page, data))
	}

	/// Read the control bytes and apply protections to the banks.
	pub fn check_status<T: Transport>(&mut self, session: &mut Session<T>) -> PResult<ShaStatus> {
		let mut control = [0u8; 8];
		self.read_raw(session, CONTROL_SECRET_PROTECTED, &mut control)?;
		let read = ShaStatus {
			secret_protected: control_set(control[0]),
			all_protected: control_set(control[1]),
			page_one_eprom: control_set(control[4]),
			page_zero_protected: control_set(control[5]) || control_set(control[1]),
		};
		self.status.merge(read);

		if self.status.all_protected {
			for bank in &mut self.banks[0..3] {
				bank.write_protect();
			}
		}
		if self.status.page_zero_protected {
			self.banks[0].write_protect();
		}
		if self.status.page_one_eprom {
			self.banks[1].set_write_once();
		}
		Ok(self.status)
	}

	fn set_control<T: Transport>(&mut self, session: &mut Session<T>, address: u16, what: &'static str, applied: fn(&ShaStatus) -> bool) -> PResult<()> {
		self.write_memory(session, address, &[CONTROL_SET])?;
		let status = self.check_status(session)?;
		if !applied(&status) {
			return session.fail(self.banks[3].id(), ProtocolError::VerificationFailed(what));
		}
		debug!("{}: {}", self.address, what);
		Ok(())
	}

	pub fn write_protect_secret<T: Transport>(&mut self, session: &mut Session<T>) -> PResult<()> {
		self.set_control(session, CONTROL_SECRET_PROTECTED, "secret write-protected", |s| s.secret_protected)
	}

	pub fn write_protect_all<T: Transport>(&mut self, session: &mut Session<T>) -> PResult<()> {
		self.set_control(session, CONTROL_ALL_PROTECTED, "all pages write-protected", |s| s.all_protected)
	}

	pub fn set_eprom_mode_page_one<T: Transport>(&mut self, session: &mut Session<T>) -> PResult<()> {
		self.set_control(session, CONTROL_PAGE_ONE_EPROM, "page one in EPROM mode", |s| s.page_one_eprom)
	}

	pub fn write_protect_page_zero<T: Transport>(&mut self, session: &mut Session<T>) -> PResult<()> {
		self.set_control(session, CONTROL_PAGE_ZERO_PROTECTED, "page zero write-protected", |s| s.page_zero_protected)
	}
}

#[cfg(test)]
mod test {
	use super::ShaDevice;
	use crate::bus::{
		Bus,
		DeviceAddress,
		Speed,
	};
	use crate::chips;
	use crate::error::ProtocolError;
	use crate::memory::MemoryBank;
	use crate::sha::{
		next_secret,
		Challenge,
		Secret,
		PAGE_SIZE,
	};
	use crate::sim::{
		ShaSim,
		SimBus,
	};

	const FIRST_SECRET: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];

	fn address() -> DeviceAddress {
		DeviceAddress::new(0x33, [0x5E, 0x1F, 0x0B, 0x00, 0x00, 0x00])
	}

	fn bus() -> Bus<SimBus> {
		let mut sim = SimBus::new();
		sim.attach(ShaSim::ds2432(address()));
		Bus::new(sim)
	}

	fn page_of(fill: u8) -> [u8; PAGE_SIZE] {
		let mut page = [0u8; PAGE_SIZE];
		for (i, b) in page.iter_mut().enumerate() {
			*b = fill ^ i as u8;
		}
		page
	}

	fn sim_memory(session: &SimBus, from: usize, len: usize) -> Vec<u8> {
		session.device::<ShaSim>(&address()).unwrap().memory()[from..from + len].to_vec()
	}

	#[test]
	fn first_secret_and_authenticated_read() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut device = ShaDevice::new(address(), Speed::Regular);
		assert!(!device.is_secret_set());

		device.load_first_secret(&mut session, &FIRST_SECRET).unwrap();
		assert!(device.is_secret_set());
		assert_eq!(session.device::<ShaSim>(&address()).unwrap().secret(), &Secret(FIRST_SECRET));

		device.set_challenge(Challenge([0x0A, 0x0B, 0x0C]));
		assert_eq!(device.read_authenticated_page(&mut session, 1).unwrap(), [0u8; PAGE_SIZE]);

		// secret bytes never show up in plain reads
		let status = device.read_memory_page(&mut session, 4).unwrap();
		assert_eq!(&status[0..8], &[0xFF; 8]);
	}

	#[test]
	fn signature_for_third_party() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut device = ShaDevice::new(address(), Speed::Regular);
		device.load_first_secret(&mut session, &FIRST_SECRET).unwrap();
		device.write_data_page(&mut session, 2, &page_of(0x3C)).unwrap();

		let challenge = Challenge([0x99, 0x98, 0x97]);
		device.set_challenge(challenge);
		let (page, mac) = device.read_page_signature(&mut session, 2).unwrap();
		assert_eq!(page, page_of(0x3C));
		assert!(mac.is_valid_for(&Secret(FIRST_SECRET), &page, 0x40, &address(), &challenge));
		assert!(!mac.is_valid_for(&Secret::ZERO, &page, 0x40, &address(), &challenge));
		assert!(!mac.is_valid_for(&Secret(FIRST_SECRET), &page, 0x60, &address(), &challenge));
	}

	#[test]
	fn authenticated_write() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut device = ShaDevice::new(address(), Speed::Regular);
		device.load_first_secret(&mut session, &FIRST_SECRET).unwrap();

		device.write_data_page(&mut session, 0, &page_of(0xA0)).unwrap();
		assert_eq!(sim_memory(&session, 0, 32), page_of(0xA0).to_vec());

		// unaligned range across pages
		device.write_memory(&mut session, 0x1D, &[1, 2, 3, 4, 5, 6]).unwrap();
		let mut expected = page_of(0xA0).to_vec();
		expected.extend_from_slice(&[0; 32]);
		expected[0x1D..0x23].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
		assert_eq!(sim_memory(&session, 0, 64), expected);
		assert_eq!(device.read_memory_page(&mut session, 1).unwrap()[..3], [4, 5, 6]);
	}

	#[test]
	fn wrong_secret() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut device = ShaDevice::new(address(), Speed::Regular);

		assert_eq!(device.write_memory(&mut session, 0, &[1]), Err(ProtocolError::SecretNotSet));
		assert_eq!(device.read_authenticated_page(&mut session, 0), Err(ProtocolError::SecretNotSet));

		device.set_secret(Secret([0x01; 8]));
		assert_eq!(device.write_data_page(&mut session, 3, &page_of(0x77)), Err(ProtocolError::AuthenticationFailed));
		assert_eq!(sim_memory(&session, 0x60, 32), vec![0u8; 32]);
		assert_eq!(device.read_authenticated_page(&mut session, 3), Err(ProtocolError::AuthenticationFailed));

		// the device starts out with an all-zero secret
		device.set_secret(Secret::ZERO);
		device.write_data_page(&mut session, 3, &page_of(0x77)).unwrap();
		assert_eq!(device.read_authenticated_page(&mut session, 3).unwrap(), page_of(0x77));
	}

	#[test]
	fn master_secret_and_binding() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut device = ShaDevice::new(address(), Speed::Regular);

		let material: Vec<u8> = (0..60u8).collect();
		device.install_master_secret(&mut session, 0, &material).unwrap();
		assert_eq!(device.secret(), session.device::<ShaSim>(&address()).unwrap().secret());
		let master = *device.secret();
		assert_ne!(master, Secret::ZERO);

		device.bind_secret_to_device(&mut session, 1, &page_of(0xB1)).unwrap();
		assert_eq!(device.secret(), session.device::<ShaSim>(&address()).unwrap().secret());
		assert_ne!(*device.secret(), master);

		device.set_challenge(Challenge([1, 2, 3]));
		assert_eq!(device.read_authenticated_page(&mut session, 1).unwrap(), page_of(0xB1));
	}

	#[test]
	fn master_secret_stride_layout() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut device = ShaDevice::new(address(), Speed::Regular);

		let material: Vec<u8> = (0..47u8).map(|i| i.wrapping_mul(5) ^ 0x3C).collect();
		device.install_master_secret(&mut session, 1, &material).unwrap();

		let mut page = [0u8; PAGE_SIZE];
		page.copy_from_slice(&material[0..32]);
		let mut partial = [0u8; 8];
		partial.copy_from_slice(&material[36..44]);
		let expected = next_secret(&Secret::ZERO, &page, &partial);
		assert_eq!(device.secret(), &expected);
		assert_eq!(session.device::<ShaSim>(&address()).unwrap().secret(), &expected);
		assert_eq!(sim_memory(&session, 0x20, 32), page.to_vec());
	}

	#[test]
	fn same_material_same_secret() {
		let material = b"installed on every device of the system";
		let mut secrets = Vec::new();
		for _ in 0..2 {
			let bus = bus();
			let mut session = bus.session().unwrap();
			let mut device = ShaDevice::new(address(), Speed::Regular);
			device.install_master_secret(&mut session, 2, material).unwrap();
			secrets.push(*device.secret());
		}
		assert_eq!(secrets[0], secrets[1]);
	}

	#[test]
	fn refresh_keeps_content() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let device = ShaDevice::new(address(), Speed::Regular);
		session.device_mut::<ShaSim>(&address()).unwrap().memory_mut()[0x60..0x80].copy_from_slice(&page_of(0x42));

		device.refresh_page(&mut session, 3).unwrap();
		assert_eq!(sim_memory(&session, 0x60, 32), page_of(0x42).to_vec());
		assert_eq!(session.device::<ShaSim>(&address()).unwrap().secret(), &Secret::ZERO);
	}

	#[test]
	fn packets() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut device = ShaDevice::new(address(), Speed::Regular);
		device.load_first_secret(&mut session, &FIRST_SECRET).unwrap();

		device.write_page_packet(&mut session, 3, b"sha packet").unwrap();
		assert_eq!(device.read_page_packet(&mut session, 3).unwrap(), b"sha packet".to_vec());
		assert_eq!(device.write_page_packet(&mut session, 0, &[0; 30]), Err(ProtocolError::InvalidPacketLength { len: 30, max: 29 }));

		// the generic bank view reads the same packet (page 1 of "pages two and three")
		let bank = MemoryBank::new(address(), Speed::Regular, &chips::DS2432_PAGES_TWO_THREE);
		assert_eq!(bank.read_page_packet(&mut session, 1).unwrap(), b"sha packet".to_vec());
		assert_eq!(bank.write(&mut session, 0, &[1]), Err(ProtocolError::Unsupported("plain write to SHA memory, use the authenticated write")));
	}

	#[test]
	fn secret_area() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut device = ShaDevice::new(address(), Speed::Regular);
		device.load_first_secret(&mut session, &FIRST_SECRET).unwrap();

		assert_eq!(device.write_memory(&mut session, 0x84, &[0]), Err(ProtocolError::Unsupported("secret is only written by load first secret")));
		assert_eq!(device.write_memory(&mut session, 0x9F, &[0, 0]), Err(ProtocolError::OutOfRange { start: 0x9F, len: 2, size: 0xA0 }));

		// user bytes behind the control bytes are fair game
		device.write_memory(&mut session, 0x90, &[0xC0, 0xFF, 0xEE]).unwrap();
		assert_eq!(sim_memory(&session, 0x90, 3), vec![0xC0, 0xFF, 0xEE]);
	}

	#[test]
	fn page_zero_protection() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut device = ShaDevice::new(address(), Speed::Regular);
		device.load_first_secret(&mut session, &FIRST_SECRET).unwrap();
		device.write_data_page(&mut session, 0, &page_of(0x10)).unwrap();

		assert!(!device.is_page_zero_write_protected());
		device.write_protect_page_zero(&mut session).unwrap();
		assert!(device.is_page_zero_write_protected());
		assert!(device.banks()[0].capabilities().read_only);
		assert!(!device.banks()[1].capabilities().read_only);
		assert_eq!(device.write_data_page(&mut session, 0, &page_of(0x20)), Err(ProtocolError::ReadOnly));

		// a host that doesn't know yet is stopped by the device
		let mut stale = ShaDevice::new(address(), Speed::Regular);
		stale.set_secret(Secret(FIRST_SECRET));
		assert_eq!(stale.write_data_page(&mut session, 0, &page_of(0x20)), Err(ProtocolError::WriteProtected));
		assert_eq!(sim_memory(&session, 0, 32), page_of(0x10).to_vec());

		stale.check_status(&mut session).unwrap();
		assert!(stale.is_page_zero_write_protected());
		assert!(!stale.is_all_write_protected());
	}

	#[test]
	fn page_one_eprom_mode() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut device = ShaDevice::new(address(), Speed::Regular);
		device.load_first_secret(&mut session, &FIRST_SECRET).unwrap();
		session.device_mut::<ShaSim>(&address()).unwrap().memory_mut()[0x20..0x40].copy_from_slice(&[0xFF; 32]);

		device.set_eprom_mode_page_one(&mut session).unwrap();
		assert!(device.is_page_one_eprom_mode());
		assert!(device.banks()[1].capabilities().write_once);

		device.write_data_page(&mut session, 1, &[0x0F; PAGE_SIZE]).unwrap();
		device.write_data_page(&mut session, 1, &[0xF3; PAGE_SIZE]).unwrap();
		assert_eq!(sim_memory(&session, 0x20, 32), vec![0x03; 32]);
	}

	#[test]
	fn protected_secret() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut device = ShaDevice::new(address(), Speed::Regular);
		device.load_first_secret(&mut session, &FIRST_SECRET).unwrap();
		device.write_protect_secret(&mut session).unwrap();
		assert!(device.is_secret_write_protected());

		assert_eq!(device.load_first_secret(&mut session, &[0; 8]), Err(ProtocolError::WriteProtected));
		assert_eq!(
			device.compute_next_secret(&mut session, 0, &[0; 8]),
			Err(ProtocolError::VerificationFailed("scratchpad after compute next secret"))
		);
		assert_eq!(device.secret(), &Secret(FIRST_SECRET));
		assert_eq!(session.device::<ShaSim>(&address()).unwrap().secret(), &Secret(FIRST_SECRET));
	}

	#[test]
	fn all_protected() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut device = ShaDevice::new(address(), Speed::Regular);
		device.load_first_secret(&mut session, &FIRST_SECRET).unwrap();
		device.write_protect_all(&mut session).unwrap();

		let status = device.status();
		assert!(status.all_protected && status.page_zero_protected);
		for bank in &device.banks()[0..3] {
			assert!(bank.capabilities().read_only, "{}", bank.description());
		}
		assert_eq!(device.write_data_page(&mut session, 2, &page_of(0)), Err(ProtocolError::ReadOnly));
	}
}
