use std::thread;
use std::time::{
	Duration,
	Instant,
};

use crate::error::{
	PResult,
	ProtocolError,
};

use super::DeviceAddress;

pub const MATCH_ROM: u8 = 0x55;

pub fn reliable_sleep(mut duration: Duration) {
	loop {
		let now = Instant::now();
		thread::sleep(duration);
		let elapsed = now.elapsed();
		if elapsed >= duration {
			return;
		}
		duration -= elapsed;
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResetResult {
	PresenceDetected,
	NoDevice,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Speed {
	Regular,
	Flex,
	Overdrive,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PowerDuration {
	HalfSecond,
	Infinite,
}

/// When strong pull-up (or program voltage) kicks in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PowerCondition {
	Now,
	AfterNextBit,
	AfterNextByte,
}

/// Byte level access to a 1-Wire bus.
///
/// Implemented by adapter drivers (and by `sim::SimBus`). All transfers are
/// full duplex: every byte sent also yields the byte read back from the line.
pub trait Transport {
	fn reset(&mut self) -> PResult<ResetResult>;

	/// exchange `buf` in place: bytes are sent from and received into it
	fn data_block(&mut self, buf: &mut [u8]) -> PResult<()>;

	fn put_byte(&mut self, b: u8) -> PResult<()> {
		let mut buf = [b];
		self.data_block(&mut buf)
	}

	fn get_byte(&mut self) -> PResult<u8> {
		let mut buf = [0xFF];
		self.data_block(&mut buf)?;
		Ok(buf[0])
	}

	fn set_power_duration(&mut self, duration: PowerDuration) -> PResult<()>;
	fn start_power_delivery(&mut self, condition: PowerCondition) -> PResult<()>;
	fn set_power_normal(&mut self) -> PResult<()>;

	fn set_speed(&mut self, speed: Speed) -> PResult<()>;

	/// reset and address a single device; `false` if nobody answered
	fn select(&mut self, address: &DeviceAddress) -> PResult<bool> {
		if self.reset()? == ResetResult::NoDevice {
			return Ok(false);
		}
		let mut buf = [0u8; 9];
		buf[0] = MATCH_ROM;
		buf[1..].copy_from_slice(&address.0);
		self.data_block(&mut buf)?;
		Ok(true)
	}

	fn can_program(&self) -> bool {
		false
	}

	fn start_program_pulse(&mut self, _condition: PowerCondition) -> PResult<()> {
		Err(ProtocolError::ProgramVoltageUnavailable)
	}

	fn delay(&mut self, duration: Duration) {
		reliable_sleep(duration);
	}
}
