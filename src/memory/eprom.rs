use crate::bus::{
	PowerCondition,
	Session,
	Transport,
};
use crate::crc::crc8_valid;
use crate::error::{
	PResult,
	ProtocolError,
};

use super::{
	EpromLayout,
	MemoryBank,
	StatusRef,
};

// send command header, check the CRC8 the device appends to it
fn send_header<T: Transport>(bank: &MemoryBank, session: &mut Session<T>, opcode: u8, address: u32) -> PResult<()> {
	bank.begin(session)?;
	let mut header = [opcode, address as u8, (address >> 8) as u8, 0xFF];
	session.exchange(bank.id(), |transport, _| transport.data_block(&mut header))?;
	trace!("EPROM header: {:02x?}", header);
	if !crc8_valid(&header, 0) {
		return session.fail(bank.id(), ProtocolError::CrcMismatch("command header"));
	}
	Ok(())
}

pub(super) fn read<T: Transport>(bank: &MemoryBank, layout: &EpromLayout, session: &mut Session<T>, start: u32, continue_session: bool, out: &mut [u8]) -> PResult<()> {
	if layout.paged_read {
		return read_paged(bank, layout, session, start, continue_session, out);
	}

	let address = bank.start() + start;
	if !continue_session {
		send_header(bank, session, layout.read_opcode, address)?;
	}
	session.exchange(bank.id(), |transport, buffers| {
		let buf = buffers.io(out.len());
		transport.data_block(buf)?;
		out.copy_from_slice(buf);
		Ok(())
	})
}

// memory that can only be streamed in pages with a trailing CRC8
fn read_paged<T: Transport>(bank: &MemoryBank, layout: &EpromLayout, session: &mut Session<T>, start: u32, continue_session: bool, out: &mut [u8]) -> PResult<()> {
	let page_size = bank.page_size() as u32;
	let first_page = start / page_size;
	let last_page = (start + out.len() as u32 - 1) / page_size;

	let mut page_data = vec![0u8; page_size as usize];
	let mut written = 0usize;
	for page in first_page..=last_page {
		let continued = continue_session || page != first_page;
		read_page_with_crc(bank, layout, session, page, continued, &mut page_data)?;

		let page_start = page * page_size;
		let from = start.max(page_start) - page_start;
		let to = (start + out.len() as u32).min(page_start + page_size) - page_start;
		let n = (to - from) as usize;
		out[written..written + n].copy_from_slice(&page_data[from as usize..to as usize]);
		written += n;
	}
	Ok(())
}

pub(super) fn read_page_with_crc<T: Transport>(bank: &MemoryBank, layout: &EpromLayout, session: &mut Session<T>, page: u32, continue_session: bool, out: &mut [u8]) -> PResult<()> {
	if !continue_session {
		let address = bank.start() + bank.page_offset(page)?;
		send_header(bank, session, layout.crc_read_opcode, address)?;
	}

	let page_size = bank.page_size();
	let crc_ok = session.exchange(bank.id(), |transport, buffers| {
		let buf = buffers.io(page_size + 1);
		transport.data_block(buf)?;
		trace!("EPROM page {}: {:02x?}", page, buf);
		out.copy_from_slice(&buf[..page_size]);
		Ok(crc8_valid(buf, 0))
	})?;
	if !crc_ok {
		return session.fail(bank.id(), ProtocolError::CrcMismatch("EPROM page"));
	}
	Ok(())
}

/// Program bytes; every byte is CRC checked, pulsed and read back.
pub(super) fn write<T: Transport>(bank: &MemoryBank, layout: &EpromLayout, session: &mut Session<T>, start: u32, data: &[u8]) -> PResult<()> {
	if !session.can_program() {
		return Err(ProtocolError::ProgramVoltageUnavailable);
	}

	if let Some(ref lock) = layout.lock {
		let page_size = bank.page_size() as u32;
		let first_page = start / page_size;
		let last_page = (start + data.len() as u32 - 1) / page_size;
		for page in first_page..=last_page {
			if is_page_locked(bank, lock, session, page)? {
				warn!("{}: page {} of {} is locked", bank.device(), page, bank.description());
				return Err(ProtocolError::WriteProtected);
			}
		}
	}

	bank.begin(session)?;
	for (i, &b) in data.iter().enumerate() {
		let address = bank.start() + start + i as u32;
		let write_opcode = layout.write_opcode;
		let crc_ok = session.exchange(bank.id(), |transport, _| {
			if i == 0 {
				let mut buf = [write_opcode, address as u8, (address >> 8) as u8, b, 0xFF];
				transport.data_block(&mut buf)?;
				Ok(crc8_valid(&buf, 0))
			} else {
				// consecutive bytes: only data, CRC seeded with the new address
				let mut buf = [b, 0xFF];
				transport.data_block(&mut buf)?;
				Ok(crc8_valid(&buf, address as u8))
			}
		})?;
		if !crc_ok {
			return session.fail(bank.id(), ProtocolError::CrcMismatch("program byte"));
		}

		let programmed = session.exchange(bank.id(), |transport, _| {
			transport.start_program_pulse(PowerCondition::Now)?;
			transport.get_byte()
		})?;
		trace!("EPROM program 0x{:04x}: 0x{:02x} -> 0x{:02x}", address, b, programmed);
		if bank.write_verification() && programmed != b {
			return session.fail(bank.id(), ProtocolError::VerificationFailed("programmed byte"));
		}
	}
	debug!("{}: programmed {} bytes at 0x{:04x} of {}", bank.device(), data.len(), start, bank.description());
	Ok(())
}

fn lock_position(lock: &StatusRef, page: u32) -> (u32, u8) {
	(lock.offset + page / 8, 1u8 << (page % 8))
}

pub(super) fn is_page_locked<T: Transport>(bank: &MemoryBank, lock: &StatusRef, session: &mut Session<T>, page: u32) -> PResult<bool> {
	let (offset, bit) = lock_position(lock, page);
	let mut status = [0u8; 1];
	bank.sibling(lock.bank).read_into(session, offset, false, &mut status)?;
	Ok(status[0] & bit == 0)
}

pub(super) fn lock_page<T: Transport>(bank: &MemoryBank, lock: &StatusRef, session: &mut Session<T>, page: u32) -> PResult<()> {
	let (offset, bit) = lock_position(lock, page);
	let status_bank = bank.sibling(lock.bank);
	let mut status = [0u8; 1];
	status_bank.read_into(session, offset, false, &mut status)?;
	if status[0] & bit != 0 {
		// keep the lock bits of the other pages as they are
		status_bank.write(session, offset, &[status[0] & !bit])?;
	}
	if !is_page_locked(bank, lock, session, page)? {
		return session.fail(bank.id(), ProtocolError::VerificationFailed("page lock"));
	}
	debug!("{}: locked page {} of {}", bank.device(), page, bank.description());
	Ok(())
}

pub(super) fn redirected_page<T: Transport>(bank: &MemoryBank, redirect: &StatusRef, session: &mut Session<T>, page: u32) -> PResult<u8> {
	let mut status = [0u8; 1];
	bank.sibling(redirect.bank).read_into(session, redirect.offset + page, false, &mut status)?;
	Ok(!status[0])
}

pub(super) fn redirect_page<T: Transport>(bank: &MemoryBank, redirect: &StatusRef, session: &mut Session<T>, page: u32, new_page: u8) -> PResult<()> {
	bank.sibling(redirect.bank).write(session, redirect.offset + page, &[!new_page])?;
	if redirected_page(bank, redirect, session, page)? != new_page {
		return session.fail(bank.id(), ProtocolError::VerificationFailed("page redirection"));
	}
	debug!("{}: page {} of {} redirected to {}", bank.device(), page, bank.description(), new_page);
	Ok(())
}
