use crate::bus::{
	Session,
	Transport,
};
use crate::error::{
	PResult,
	ProtocolError,
};

use super::{
	EepromLayout,
	MemoryBank,
	StatusRef,
};

/// Protection register value of a write-protected page.
pub const PAGE_PROTECTED: u8 = 0x55;

pub(super) fn read<T: Transport>(bank: &MemoryBank, read_opcode: u8, session: &mut Session<T>, start: u32, continue_session: bool, out: &mut [u8]) -> PResult<()> {
	let header_len = if continue_session {
		0
	} else {
		bank.begin(session)?;
		3
	};

	let address = bank.start() + start;
	session.exchange(bank.id(), |transport, buffers| {
		let buf = buffers.io(header_len + out.len());
		if !continue_session {
			buf[0] = read_opcode;
			buf[1] = address as u8;
			buf[2] = (address >> 8) as u8;
		}
		transport.data_block(buf)?;
		trace!("read memory 0x{:04x}: {:02x?}", address, &buf[header_len..]);
		out.copy_from_slice(&buf[header_len..]);
		Ok(())
	})
}

/// Write through the scratchpad in whole scratchpad sized units; partial
/// units at either end are completed with the current memory content.
pub(super) fn write<T: Transport>(bank: &MemoryBank, layout: &EepromLayout, session: &mut Session<T>, start: u32, data: &[u8]) -> PResult<()> {
	let pad = bank.scratchpad(layout.scratchpad);
	let unit = pad.size() as u32;
	let end = start + data.len() as u32;
	let first = start - start % unit;
	let last = (end + unit - 1) / unit * unit;
	let head = (start - first) as usize;

	let mut image = vec![0u8; (last - first) as usize];
	if head != 0 {
		bank.read_into(session, first, false, &mut image[..unit as usize])?;
	}
	if end != last && !(head != 0 && last - unit == first) {
		let tail = (last - unit - first) as usize;
		bank.read_into(session, last - unit, false, &mut image[tail..])?;
	}
	image[head..head + data.len()].copy_from_slice(data);

	let mut check = vec![0u8; unit as usize];
	for (i, chunk) in image.chunks(unit as usize).enumerate() {
		let offset = first + i as u32 * unit;
		let target = (bank.start() + offset) as u16;
		pad.write_scratchpad(session, target, chunk)?.read_back()?.copy()?;

		if bank.write_verification() {
			bank.read_into(session, offset, false, &mut check)?;
			if check[..] != chunk[..] {
				return session.fail(bank.id(), ProtocolError::VerificationFailed("memory after copy"));
			}
		}
	}
	debug!("{}: wrote {} bytes at 0x{:04x} of {}", bank.device(), data.len(), start, bank.description());
	Ok(())
}

pub(super) fn is_page_locked<T: Transport>(bank: &MemoryBank, lock: &StatusRef, session: &mut Session<T>, page: u32) -> PResult<bool> {
	let registers = bank.sibling(lock.bank);
	let mut flag = [0u8; 1];
	registers.read_into(session, lock.offset + page, false, &mut flag)?;
	Ok(flag[0] == PAGE_PROTECTED)
}

pub(super) fn lock_page<T: Transport>(bank: &MemoryBank, lock: &StatusRef, session: &mut Session<T>, page: u32) -> PResult<()> {
	let registers = bank.sibling(lock.bank);
	registers.write(session, lock.offset + page, &[PAGE_PROTECTED])?;
	if !is_page_locked(bank, lock, session, page)? {
		return session.fail(bank.id(), ProtocolError::VerificationFailed("page lock"));
	}
	debug!("{}: locked page {} of {}", bank.device(), page, bank.description());
	Ok(())
}

#[cfg(test)]
mod test {
	use crate::bus::{
		Bus,
		DeviceAddress,
		Speed,
	};
	use crate::chips;
	use crate::error::{
		PResult,
		ProtocolError,
	};
	use crate::memory::MemoryBank;
	use crate::sim::{
		EepromSim,
		SimBus,
	};

	fn ds2431() -> DeviceAddress {
		DeviceAddress::new(0x2D, [0x31, 0x24, 0x00, 0x00, 0x00, 0x01])
	}

	fn ds2433() -> DeviceAddress {
		DeviceAddress::new(0x23, [0x33, 0x24, 0x00, 0x00, 0x00, 0x02])
	}

	fn bus() -> Bus<SimBus> {
		let mut sim = SimBus::new();
		sim.attach(EepromSim::ds2431(ds2431()));
		sim.attach(EepromSim::ds2433(ds2433()));
		Bus::new(sim)
	}

	fn pattern(len: usize, seed: u8) -> Vec<u8> {
		(0..len).map(|i| (i as u8).wrapping_mul(13).wrapping_add(seed)).collect()
	}

	fn check_write(bank: &MemoryBank, start: u32, data: &[u8]) {
		let bus = bus();
		let mut session = bus.session().unwrap();
		bank.write(&mut session, start, data).unwrap();
		assert_eq!(bank.read(&mut session, start, false, data.len()).unwrap(), data, "read back at 0x{:x}", start);

		let memory = session.device::<EepromSim>(&bank.device()).unwrap().memory().to_vec();
		let at = (bank.start() + start) as usize;
		assert!(memory[..at].iter().all(|&b| b == 0), "bytes before 0x{:x} modified", start);
		assert!(memory[at + data.len()..bank.size() as usize].iter().all(|&b| b == 0), "bytes after 0x{:x} modified", start);
	}

	#[test]
	fn write_read() {
		let main = MemoryBank::new(ds2433(), Speed::Regular, &chips::DS2433_MAIN);
		check_write(&main, 0, &pattern(32, 1));
		check_write(&main, 5, &pattern(40, 2));
		check_write(&main, 31, &pattern(2, 3));
		check_write(&main, 0x1F0, &pattern(16, 4));
		check_write(&main, 100, &[0xA5]);

		let mut main = MemoryBank::new(ds2431(), Speed::Regular, &chips::DS2431_MAIN);
		main.set_write_verification(true);
		check_write(&main, 3, &pattern(70, 5));
		check_write(&main, 0x7F, &[0x42]);
	}

	#[test]
	fn staged_block_lands_on_page() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let main = MemoryBank::new(ds2431(), Speed::Regular, &chips::DS2431_MAIN);
		let data = [1, 2, 3, 4, 5, 6, 7, 8];

		let pad = main.scratchpad(&chips::DS2431_SCRATCHPAD);
		pad.write_scratchpad(&mut session, 0x00, &data).unwrap().copy().unwrap();
		let page = main.read_page(&mut session, 0, false).unwrap();
		assert_eq!(&page[..8], &data);
		assert_eq!(page.len(), 32);
	}

	#[test]
	fn continued_read() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let main = MemoryBank::new(ds2433(), Speed::Regular, &chips::DS2433_MAIN);
		let data = pattern(64, 9);
		main.write(&mut session, 0, &data).unwrap();

		let first = main.read_page(&mut session, 0, false).unwrap();
		let second = main.read_page(&mut session, 1, true).unwrap();
		assert_eq!(first, &data[..32]);
		assert_eq!(second, &data[32..]);
	}

	#[test]
	fn range_checks() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let main = MemoryBank::new(ds2431(), Speed::Regular, &chips::DS2431_MAIN);
		assert_eq!(main.write(&mut session, 120, &[0; 9]), Err(ProtocolError::OutOfRange { start: 120, len: 9, size: 128 }));
		assert_eq!(main.read(&mut session, 128, false, 1), Err(ProtocolError::OutOfRange { start: 128, len: 1, size: 128 }));
		assert_eq!(main.read_page_with_crc(&mut session, 0, false), Err(ProtocolError::Unsupported("page read with CRC")));
		assert_eq!(main.redirect_page(&mut session, 0, 1), Err(ProtocolError::Unsupported("page redirection")));
		assert_eq!(main.redirected_page(&mut session, 0), Ok(0));
	}

	fn check_page_out_of_range<R: std::fmt::Debug + PartialEq>(result: PResult<R>) {
		assert_eq!(result, Err(ProtocolError::OutOfRange { start: 128, len: 32, size: 128 }), "page 4 of a 4 page bank");
	}

	#[test]
	fn page_numbers_checked() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let main = MemoryBank::new(ds2431(), Speed::Regular, &chips::DS2431_MAIN);
		assert_eq!(main.page_offset(3), Ok(96));
		check_page_out_of_range(main.page_offset(4));
		check_page_out_of_range(main.read_page(&mut session, 4, false));
		check_page_out_of_range(main.read_page_with_crc(&mut session, 4, false));
		check_page_out_of_range(main.lock_page(&mut session, 4));
		check_page_out_of_range(main.is_page_locked(&mut session, 4));
		check_page_out_of_range(main.redirected_page(&mut session, 4));
		check_page_out_of_range(main.write_page_packet(&mut session, 4, &[1, 2, 3]));
	}

	#[test]
	fn locked_page() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let main = MemoryBank::new(ds2431(), Speed::Regular, &chips::DS2431_MAIN);
		main.write(&mut session, 32, &[0x77; 32]).unwrap();

		assert!(!main.is_page_locked(&mut session, 1).unwrap());
		main.lock_page(&mut session, 1).unwrap();
		assert!(main.is_page_locked(&mut session, 1).unwrap());
		assert!(!main.is_page_locked(&mut session, 0).unwrap());

		assert_eq!(main.write(&mut session, 40, &[0x11; 8]), Err(ProtocolError::WriteProtected));
		assert!(session.needs_verify(main.scratchpad(&chips::DS2431_SCRATCHPAD).bank()));
		assert_eq!(main.read(&mut session, 32, false, 32).unwrap(), vec![0x77; 32]);

		// other pages still writable
		main.write(&mut session, 0, &[0x11; 8]).unwrap();

		// locking twice is fine, the register keeps its value
		main.lock_page(&mut session, 1).unwrap();
		let memory = session.device::<EepromSim>(&ds2431()).unwrap().memory().to_vec();
		assert_eq!(&memory[0x80..0x84], &[0x00, 0x55, 0x00, 0x00]);
	}

	#[test]
	fn no_locks_on_ds2433() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let main = MemoryBank::new(ds2433(), Speed::Regular, &chips::DS2433_MAIN);
		assert_eq!(main.lock_page(&mut session, 0), Err(ProtocolError::Unsupported("page locking")));
		assert!(!main.is_page_locked(&mut session, 0).unwrap());
	}

	#[test]
	fn read_only_bank() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let mut main = MemoryBank::new(ds2433(), Speed::Regular, &chips::DS2433_MAIN);
		main.write_protect();
		assert!(main.capabilities().read_only);
		assert_eq!(main.write(&mut session, 0, &[1, 2, 3]), Err(ProtocolError::ReadOnly));
		assert_eq!(session.device::<EepromSim>(&ds2433()).unwrap().copies(), 0);

		// protection is one-way
		main.set_write_once();
		assert!(!main.capabilities().is_writable());
	}

	#[test]
	fn device_missing() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let absent = DeviceAddress::new(0x23, [0xDE, 0xAD, 0x00, 0x00, 0x00, 0x00]);
		let main = MemoryBank::new(absent, Speed::Regular, &chips::DS2433_MAIN);
		assert_eq!(main.read(&mut session, 0, false, 4), Err(ProtocolError::DeviceNotPresent(absent)));
		assert!(session.needs_verify(main.id()));
	}

	#[test]
	fn line_failure_during_read() {
		let bus = bus();
		let mut session = bus.session().unwrap();
		let main = MemoryBank::new(ds2433(), Speed::Regular, &chips::DS2433_MAIN);
		main.read(&mut session, 0, false, 4).unwrap();
		assert!(!session.needs_verify(main.id()));

		// match ROM and the command header go through, the data doesn't
		session.inject_line_failure(9 + 3);
		assert_eq!(main.read(&mut session, 0, false, 4), Err(ProtocolError::Bus("adapter lost the line".into())));
		assert!(session.needs_verify(main.id()), "bus error must force renegotiation");
		assert_eq!(main.read(&mut session, 0, false, 4).unwrap(), vec![0x00; 4]);
	}
}
