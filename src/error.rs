use crate::bus::DeviceAddress;

/// Everything that can go wrong while talking to a device.
///
/// Each protocol step returns one of these; nothing is retried internally.
#[derive(Clone, PartialEq, Eq, Debug, Fail)]
pub enum ProtocolError {
	#[fail(display = "device {} not present", _0)]
	DeviceNotPresent(DeviceAddress),

	#[fail(display = "range 0x{:x}+{} exceeds memory bank end (size {})", start, len, size)]
	OutOfRange {
		start: u32,
		len: usize,
		size: u32,
	},

	#[fail(display = "memory bank is read-only")]
	ReadOnly,

	#[fail(display = "memory area is write-protected")]
	WriteProtected,

	#[fail(display = "invalid CRC in {}", _0)]
	CrcMismatch(&'static str),

	#[fail(display = "invalid packet length {} (max {})", len, max)]
	InvalidPacketLength {
		len: usize,
		max: usize,
	},

	#[fail(display = "authentication failed (MAC mismatch)")]
	AuthenticationFailed,

	#[fail(display = "secret is not set")]
	SecretNotSet,

	#[fail(display = "verification failed: {}", _0)]
	VerificationFailed(&'static str),

	#[fail(display = "unknown device response 0x{:02x}", _0)]
	UnknownDeviceResponse(u8),

	#[fail(display = "not supported by this memory bank: {}", _0)]
	Unsupported(&'static str),

	#[fail(display = "program voltage required but not available")]
	ProgramVoltageUnavailable,

	#[fail(display = "bus failure: {}", _0)]
	Bus(String),
}

pub type PResult<T> = Result<T, ProtocolError>;
