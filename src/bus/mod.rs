//! 1-Wire bus access.
//!
//! The electrical layer lives behind the `Transport` trait; this crate only
//! needs reset, full duplex byte exchange and power delivery control. A
//! `Bus` serializes all access: protocol steps take a `Session`, which holds
//! the bus lock together with the reusable transfer buffers and the per-bank
//! "renegotiate speed" flags.

mod address;
mod session;
mod transport;

pub use self::address::{
	DeviceAddress,
};

pub use self::session::{
	BankId,
	Bus,
	Region,
	Session,
	SessionBuffers,
};

pub use self::transport::{
	reliable_sleep,
	PowerCondition,
	PowerDuration,
	ResetResult,
	Speed,
	Transport,
	MATCH_ROM,
};
