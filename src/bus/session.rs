use std::collections::HashSet;
use std::ops::{
	Deref,
	DerefMut,
};
use std::sync::{
	Mutex,
	MutexGuard,
};

use crate::error::{
	PResult,
	ProtocolError,
};

use super::{
	DeviceAddress,
	Speed,
	Transport,
};

/// Which part of a device a speed flag belongs to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Region {
	Scratchpad,
	/// memory bank, by description
	Bank(&'static str),
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BankId {
	pub device: DeviceAddress,
	pub region: Region,
}

impl BankId {
	pub fn bank(device: DeviceAddress, description: &'static str) -> Self {
		BankId { device, region: Region::Bank(description) }
	}

	pub fn scratchpad(device: DeviceAddress) -> Self {
		BankId { device, region: Region::Scratchpad }
	}
}

/// Transfer buffers reused by every protocol step of a session.
#[derive(Default, Debug)]
pub struct SessionBuffers {
	io: Vec<u8>,
	page: Vec<u8>,
}

impl SessionBuffers {
	/// `len` bytes of 0xFF (the idle level, i.e. "read")
	pub fn io(&mut self, len: usize) -> &mut [u8] {
		self.io.clear();
		self.io.resize(len, 0xFF);
		&mut self.io[..]
	}

	pub fn page(&mut self, len: usize) -> &mut [u8] {
		self.page.clear();
		self.page.resize(len, 0xFF);
		&mut self.page[..]
	}

	pub fn io_data(&self) -> &[u8] {
		&self.io
	}

	pub fn page_data(&self) -> &[u8] {
		&self.page
	}
}

struct BusState<T> {
	transport: T,
	// banks whose speed was negotiated and not invalidated since
	settled: HashSet<BankId>,
	buffers: SessionBuffers,
}

/// A bus shared between threads; every conversation with a device runs
/// inside a `Session`.
pub struct Bus<T: Transport> {
	state: Mutex<BusState<T>>,
}

impl<T: Transport> Bus<T> {
	pub fn new(transport: T) -> Self {
		Bus {
			state: Mutex::new(BusState {
				transport,
				settled: HashSet::new(),
				buffers: SessionBuffers::default(),
			}),
		}
	}

	/// Blocks until no other session is active.
	pub fn session(&self) -> PResult<Session<T>> {
		let guard = self.state.lock().map_err(|_| ProtocolError::Bus("bus session lock poisoned".into()))?;
		Ok(Session { guard })
	}

	pub fn into_transport(self) -> PResult<T> {
		let state = self.state.into_inner().map_err(|_| ProtocolError::Bus("bus session lock poisoned".into()))?;
		Ok(state.transport)
	}
}

/// Exclusive access to the bus; dropping it releases the bus.
pub struct Session<'a, T: Transport + 'a> {
	guard: MutexGuard<'a, BusState<T>>,
}

impl<'a, T: Transport> Session<'a, T> {
	pub fn parts(&mut self) -> (&mut T, &mut SessionBuffers) {
		let state = &mut *self.guard;
		(&mut state.transport, &mut state.buffers)
	}

	/// Renegotiate the bus speed if the last exchange with `bank` couldn't
	/// be trusted (or it never happened).
	pub fn check_speed(&mut self, bank: BankId, speed: Speed) -> PResult<()> {
		if self.guard.settled.contains(&bank) {
			return Ok(());
		}
		debug!("negotiating {:?} speed for {} ({:?})", speed, bank.device, bank.region);
		self.guard.transport.set_speed(speed)?;
		self.guard.settled.insert(bank);
		Ok(())
	}

	pub fn force_verify(&mut self, bank: BankId) {
		self.guard.settled.remove(&bank);
	}

	pub fn needs_verify(&self, bank: BankId) -> bool {
		!self.guard.settled.contains(&bank)
	}

	pub fn select_bank(&mut self, bank: BankId) -> PResult<()> {
		match self.guard.transport.select(&bank.device) {
			Ok(true) => Ok(()),
			Ok(false) => {
				warn!("device {} not responding", bank.device);
				self.force_verify(bank);
				Err(ProtocolError::DeviceNotPresent(bank.device))
			},
			Err(e) => self.fail(bank, e),
		}
	}

	/// Run transport steps on behalf of `bank`; any error they return goes
	/// through `fail`.
	pub fn exchange<R, F>(&mut self, bank: BankId, steps: F) -> PResult<R>
	where
		F: FnOnce(&mut T, &mut SessionBuffers) -> PResult<R>,
	{
		let result = {
			let (transport, buffers) = self.parts();
			steps(transport, buffers)
		};
		match result {
			Ok(r) => Ok(r),
			Err(e) => self.fail(bank, e),
		}
	}

	/// Mark `bank` for renegotiation and pass `error` on.
	pub fn fail<R>(&mut self, bank: BankId, error: ProtocolError) -> PResult<R> {
		warn!("{} ({:?}): {}", bank.device, bank.region, error);
		self.force_verify(bank);
		Err(error)
	}
}

impl<'a, T: Transport> Deref for Session<'a, T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		&self.guard.transport
	}
}

impl<'a, T: Transport> DerefMut for Session<'a, T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.guard.transport
	}
}

#[cfg(test)]
mod test {
	use super::{
		BankId,
		Bus,
	};
	use crate::bus::{
		DeviceAddress,
		Speed,
	};
	use crate::error::ProtocolError;
	use crate::sim::{
		EepromSim,
		SimBus,
	};

	fn address() -> DeviceAddress {
		DeviceAddress::new(0x2D, [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5])
	}

	#[test]
	fn missing_device() {
		let bus = Bus::new(SimBus::new());
		let mut session = bus.session().unwrap();
		let bank = BankId::bank(address(), "Main memory");

		session.check_speed(bank, Speed::Regular).unwrap();
		assert!(!session.needs_verify(bank));
		assert_eq!(session.select_bank(bank), Err(ProtocolError::DeviceNotPresent(address())));
		assert!(session.needs_verify(bank), "failed select must force renegotiation");
	}

	#[test]
	fn speed_negotiated_once_per_bank() {
		let mut sim = SimBus::new();
		sim.attach(EepromSim::ds2431(address()));
		let bus = Bus::new(sim);
		let mut session = bus.session().unwrap();
		let main = BankId::bank(address(), "Main memory");
		let pad = BankId::scratchpad(address());

		for _ in 0..3 {
			session.check_speed(main, Speed::Overdrive).unwrap();
			session.select_bank(main).unwrap();
		}
		assert_eq!(session.speed_changes(), 1);
		assert_eq!(session.speed(), Speed::Overdrive);

		session.check_speed(pad, Speed::Overdrive).unwrap();
		assert_eq!(session.speed_changes(), 2, "scratchpad has its own flag");

		let e: Result<(), _> = session.fail(main, ProtocolError::CrcMismatch("test"));
		assert_eq!(e, Err(ProtocolError::CrcMismatch("test")));
		session.check_speed(main, Speed::Overdrive).unwrap();
		assert_eq!(session.speed_changes(), 3);
	}

	#[test]
	fn sessions_are_exclusive() {
		let bus = Bus::new(SimBus::new());
		{
			let _session = bus.session().unwrap();
			assert!(bus.state.try_lock().is_err());
		}
		assert!(bus.state.try_lock().is_ok());
		bus.into_transport().unwrap();
	}
}
