//! Simulated 1-Wire bus.
//!
//! `SimBus` implements `Transport` over a set of simulated devices. Every
//! byte slot is full duplex and wired-AND: the line carries what the master
//! drives AND'ed with what every selected device drives (0xFF releases the
//! line). Devices keep their own memory and compute CRCs and MACs from it,
//! so the host side protocol code gets no help from here. MACs come from
//! the same message block engine as on the host (`sha`), which has its own
//! known-answer tests.

use std::any::Any;
use std::time::Duration;

use crate::bus::{
	DeviceAddress,
	PowerCondition,
	PowerDuration,
	ResetResult,
	Speed,
	Transport,
	MATCH_ROM,
};
use crate::error::{
	PResult,
	ProtocolError,
};

mod eeprom;
mod eprom;
mod sha;

pub use self::eeprom::{
	EepromSim,
};

pub use self::eprom::{
	EpromSim,
};

pub use self::sha::{
	ShaSim,
};

const SKIP_ROM: u8 = 0xCC;

/// A device on the simulated bus, seen after ROM selection.
pub trait SimDevice: Any {
	fn address(&self) -> DeviceAddress;

	/// Selected by a ROM command; a new command byte follows.
	fn begin(&mut self);

	/// One byte slot: `host` is what the master drives, the result what
	/// the device drives. `strong_pullup` is set if power delivery starts
	/// right after this byte.
	fn exchange(&mut self, host: u8, strong_pullup: bool) -> u8;

	fn program_pulse(&mut self) {
	}

	fn as_any(&self) -> &dyn Any;
	fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Things the master did to the line besides exchanging bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusEvent {
	Reset,
	Speed(Speed),
	PowerDuration(PowerDuration),
	PowerArmed(PowerCondition),
	PowerNormal,
	ProgramPulse,
	Delay(Duration),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum RomState {
	Idle,
	Matching(usize),
	Selected,
	Deselected,
}

struct Slot {
	device: Box<dyn SimDevice>,
	rom: RomState,
}

impl Slot {
	fn exchange(&mut self, host: u8, strong_pullup: bool) -> u8 {
		match self.rom {
			RomState::Idle => {
				self.rom = match host {
					MATCH_ROM => RomState::Matching(0),
					SKIP_ROM => {
						self.device.begin();
						RomState::Selected
					},
					_ => RomState::Deselected,
				};
				0xFF
			},
			RomState::Matching(i) => {
				let rom = self.device.address().0;
				self.rom = if rom[i] != host {
					RomState::Deselected
				} else if i == 7 {
					self.device.begin();
					RomState::Selected
				} else {
					RomState::Matching(i + 1)
				};
				0xFF
			},
			RomState::Selected => self.device.exchange(host, strong_pullup),
			RomState::Deselected => 0xFF,
		}
	}
}

pub struct SimBus {
	slots: Vec<Slot>,
	program_voltage: bool,
	speed: Speed,
	armed: bool,
	events: Vec<BusEvent>,
	// (bytes to let through first, bits to flip)
	bit_error: Option<(usize, u8)>,
	// byte slots left before the adapter reports a failure
	line_failure: Option<usize>,
}

impl SimBus {
	pub fn new() -> Self {
		SimBus {
			slots: Vec::new(),
			program_voltage: false,
			speed: Speed::Regular,
			armed: false,
			events: Vec::new(),
			bit_error: None,
			line_failure: None,
		}
	}

	/// Pretend the adapter can generate the EPROM program voltage.
	pub fn with_program_voltage(mut self, available: bool) -> Self {
		self.program_voltage = available;
		self
	}

	pub fn attach<D: SimDevice>(&mut self, device: D) {
		self.slots.push(Slot {
			device: Box::new(device),
			rom: RomState::Idle,
		});
	}

	pub fn detach(&mut self, address: &DeviceAddress) {
		self.slots.retain(|slot| slot.device.address() != *address);
	}

	pub fn device<D: SimDevice>(&self, address: &DeviceAddress) -> Option<&D> {
		self.slots.iter()
			.find(|slot| slot.device.address() == *address)
			.and_then(|slot| slot.device.as_any().downcast_ref::<D>())
	}

	pub fn device_mut<D: SimDevice>(&mut self, address: &DeviceAddress) -> Option<&mut D> {
		self.slots.iter_mut()
			.find(|slot| slot.device.address() == *address)
			.and_then(|slot| slot.device.as_any_mut().downcast_mut::<D>())
	}

	/// Flip `mask` in the byte read from the line after `skip` more bytes.
	pub fn inject_bit_error(&mut self, skip: usize, mask: u8) {
		self.bit_error = Some((skip, mask));
	}

	/// Let `skip` more byte slots through, then fail the next block
	/// transfer with a bus error.
	pub fn inject_line_failure(&mut self, skip: usize) {
		self.line_failure = Some(skip);
	}

	pub fn events(&self) -> &[BusEvent] {
		&self.events
	}

	pub fn clear_events(&mut self) {
		self.events.clear();
	}

	pub fn delays(&self) -> Vec<Duration> {
		self.events.iter().filter_map(|e| match *e {
			BusEvent::Delay(d) => Some(d),
			_ => None,
		}).collect()
	}

	pub fn speed(&self) -> Speed {
		self.speed
	}

	pub fn speed_changes(&self) -> usize {
		self.events.iter().filter(|e| match e {
			BusEvent::Speed(_) => true,
			_ => false,
		}).count()
	}

	fn exchange(&mut self, host: u8) -> u8 {
		let strong_pullup = self.armed;
		self.armed = false;
		let mut line = host;
		for slot in &mut self.slots {
			line &= slot.exchange(host, strong_pullup);
		}
		match self.bit_error {
			Some((0, mask)) => {
				self.bit_error = None;
				line ^ mask
			},
			Some((n, mask)) => {
				self.bit_error = Some((n - 1, mask));
				line
			},
			None => line,
		}
	}
}

impl Default for SimBus {
	fn default() -> Self {
		SimBus::new()
	}
}

impl Transport for SimBus {
	fn reset(&mut self) -> PResult<ResetResult> {
		self.events.push(BusEvent::Reset);
		self.armed = false;
		for slot in &mut self.slots {
			slot.rom = RomState::Idle;
		}
		Ok(if self.slots.is_empty() { ResetResult::NoDevice } else { ResetResult::PresenceDetected })
	}

	fn data_block(&mut self, buf: &mut [u8]) -> PResult<()> {
		for b in buf.iter_mut() {
			match self.line_failure {
				Some(0) => {
					self.line_failure = None;
					return Err(ProtocolError::Bus("adapter lost the line".into()));
				},
				Some(n) => self.line_failure = Some(n - 1),
				None => (),
			}
			*b = self.exchange(*b);
		}
		Ok(())
	}

	fn set_power_duration(&mut self, duration: PowerDuration) -> PResult<()> {
		self.events.push(BusEvent::PowerDuration(duration));
		Ok(())
	}

	fn start_power_delivery(&mut self, condition: PowerCondition) -> PResult<()> {
		self.events.push(BusEvent::PowerArmed(condition));
		// no bit level here: "after next bit" lands on the next byte too
		self.armed = condition != PowerCondition::Now;
		Ok(())
	}

	fn set_power_normal(&mut self) -> PResult<()> {
		self.events.push(BusEvent::PowerNormal);
		self.armed = false;
		Ok(())
	}

	fn set_speed(&mut self, speed: Speed) -> PResult<()> {
		self.events.push(BusEvent::Speed(speed));
		self.speed = speed;
		Ok(())
	}

	fn select(&mut self, address: &DeviceAddress) -> PResult<bool> {
		if self.reset()? == ResetResult::NoDevice {
			return Ok(false);
		}
		let mut buf = [0u8; 9];
		buf[0] = MATCH_ROM;
		buf[1..].copy_from_slice(&address.0);
		self.data_block(&mut buf)?;
		// a real adapter can't tell; the simulation can
		Ok(self.slots.iter().any(|slot| slot.rom == RomState::Selected))
	}

	fn can_program(&self) -> bool {
		self.program_voltage
	}

	fn start_program_pulse(&mut self, condition: PowerCondition) -> PResult<()> {
		if !self.program_voltage {
			return Err(ProtocolError::ProgramVoltageUnavailable);
		}
		if condition != PowerCondition::Now {
			return Err(ProtocolError::Bus(format!("program pulse {:?} not supported", condition)));
		}
		self.events.push(BusEvent::ProgramPulse);
		for slot in &mut self.slots {
			if slot.rom == RomState::Selected {
				slot.device.program_pulse();
			}
		}
		Ok(())
	}

	fn delay(&mut self, duration: Duration) {
		self.events.push(BusEvent::Delay(duration));
	}
}

#[cfg(test)]
mod test {
	use super::{
		BusEvent,
		EepromSim,
		SimBus,
	};
	use crate::bus::{
		DeviceAddress,
		ResetResult,
		Transport,
	};
	use crate::error::ProtocolError;

	fn address() -> DeviceAddress {
		DeviceAddress::new(0x23, [1, 2, 3, 4, 5, 6])
	}

	#[test]
	fn presence_and_selection() {
		let mut bus = SimBus::new();
		assert_eq!(bus.reset().unwrap(), ResetResult::NoDevice);
		assert!(!bus.select(&address()).unwrap());

		bus.attach(EepromSim::ds2433(address()));
		assert_eq!(bus.reset().unwrap(), ResetResult::PresenceDetected);
		assert!(bus.select(&address()).unwrap());
		assert!(!bus.select(&DeviceAddress::new(0x23, [9, 9, 9, 9, 9, 9])).unwrap());
		assert_eq!(bus.events().iter().filter(|&&e| e == BusEvent::Reset).count(), 5);
	}

	#[test]
	fn bit_error_hits_one_byte() {
		let mut bus = SimBus::new();
		bus.attach(EepromSim::ds2433(address()));
		bus.device_mut::<EepromSim>(&address()).unwrap().memory_mut()[0..4].copy_from_slice(&[0x10, 0x20, 0x30, 0x40]);

		assert!(bus.select(&address()).unwrap());
		bus.inject_bit_error(4, 0x01);
		let mut buf = [0xF0, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF];
		bus.data_block(&mut buf).unwrap();
		assert_eq!(buf[3..], [0x10, 0x21, 0x30, 0x40]);
	}

	#[test]
	fn line_failure_fails_one_block() {
		let mut bus = SimBus::new();
		bus.attach(EepromSim::ds2433(address()));
		bus.inject_line_failure(2);

		let mut buf = [0xFF; 4];
		assert_eq!(bus.data_block(&mut buf), Err(ProtocolError::Bus("adapter lost the line".into())));
		bus.data_block(&mut buf).unwrap();
	}
}
