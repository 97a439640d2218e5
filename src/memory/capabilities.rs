/// What a memory bank can do.
///
/// Banks start from a per-chip constant and may only lose write access at
/// runtime (`write_protect`, `set_write_once`); nothing turns a protected
/// bank writable again.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct CapabilitySet {
	pub general_purpose: bool,
	pub read_write: bool,
	pub write_once: bool,
	pub read_only: bool,
	pub non_volatile: bool,
	pub needs_program_pulse: bool,
	pub needs_power: bool,
	pub page_auto_crc: bool,
	/// length of the extra info returned with page reads (0: none)
	pub extra_info_len: usize,
	pub lockable: bool,
	pub redirectable: bool,
}

impl CapabilitySet {
	pub const EMPTY: CapabilitySet = CapabilitySet {
		general_purpose: false,
		read_write: false,
		write_once: false,
		read_only: false,
		non_volatile: false,
		needs_program_pulse: false,
		needs_power: false,
		page_auto_crc: false,
		extra_info_len: 0,
		lockable: false,
		redirectable: false,
	};

	pub fn is_writable(&self) -> bool {
		!self.read_only && (self.read_write || self.write_once)
	}

	pub fn is_consistent(&self) -> bool {
		let access_modes = self.read_write as u8 + self.write_once as u8 + self.read_only as u8;
		access_modes == 1
			&& !(self.needs_program_pulse && !self.write_once && !self.read_only)
			&& !(self.redirectable && !self.write_once && !self.read_only)
	}

	pub fn write_protect(&mut self) {
		self.read_write = false;
		self.write_once = false;
		self.read_only = true;
	}

	/// read/write -> write once; no effect on protected banks
	pub fn set_write_once(&mut self) {
		if self.read_write {
			self.read_write = false;
			self.write_once = true;
		}
	}
}

#[cfg(test)]
mod test {
	use super::CapabilitySet;

	fn read_write() -> CapabilitySet {
		CapabilitySet {
			general_purpose: true,
			read_write: true,
			non_volatile: true,
			needs_power: true,
			..CapabilitySet::EMPTY
		}
	}

	#[test]
	fn protection_is_monotonic() {
		let mut caps = read_write();
		assert!(caps.is_consistent());
		assert!(caps.is_writable());

		caps.set_write_once();
		assert!(caps.write_once && !caps.read_write);
		assert!(caps.is_consistent());
		assert!(caps.is_writable());

		caps.write_protect();
		assert!(caps.is_consistent());
		assert!(!caps.is_writable());

		// no way back
		caps.set_write_once();
		assert!(caps.read_only && !caps.write_once && !caps.read_write);
	}

	#[test]
	fn inconsistent_sets() {
		let mut caps = read_write();
		caps.read_only = true;
		assert!(!caps.is_consistent(), "read-only and read/write at once");
		assert!(!caps.is_writable());
		assert!(!CapabilitySet::EMPTY.is_consistent(), "no access mode");
	}
}
