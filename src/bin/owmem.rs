#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate onewire_memory;
use onewire_memory::*;

use std::process::exit;

use onewire_memory::bus::{
	Bus,
	DeviceAddress,
	Speed,
};
use onewire_memory::sha::{
	authenticated_read_mac,
	Challenge,
	Secret,
	ShaDevice,
	PAGE_SIZE,
};
use onewire_memory::sim::{
	EepromSim,
	EpromSim,
	ShaSim,
	SimBus,
};

fn get_param<T>(matches: &clap::ArgMatches, name: &str) -> AResult<T>
where
	T: std::str::FromStr,
	failure::Error: From<<T as std::str::FromStr>::Err>,
{
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => bail!("missing parameter {}", name),
	};
	param.parse::<T>().map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid parameter {}: {}", name, e);
		e.context(msg).into()
	})
}

fn parse_number(s: &str) -> AResult<u16> {
	let parsed = if s.starts_with("0x") || s.starts_with("0X") {
		u16::from_str_radix(&s[2..], 16)
	} else {
		s.parse::<u16>()
	};
	parsed.map_err(|e| format_err!("invalid number {:?}: {}", s, e))
}

fn parse_hex(s: &str) -> AResult<Vec<u8>> {
	let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
	ensure!(s.len() % 2 == 0, "odd number of hex digits in {:?}", s);
	ensure!(s.bytes().all(|b| b.is_ascii_hexdigit()), "invalid hex digits in {:?}", s);
	(0..s.len()).step_by(2).map(|i| {
		u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| format_err!("invalid hex byte {:?}: {}", &s[i..i + 2], e))
	}).collect()
}

fn hex_param(matches: &clap::ArgMatches, name: &str, len: usize) -> AResult<Vec<u8>> {
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => bail!("missing parameter {}", name),
	};
	let data = parse_hex(param)?;
	ensure!(data.len() == len, "{} needs {} bytes, got {}", name, len, data.len());
	Ok(data)
}

fn crc16(sub_m: &clap::ArgMatches) -> AResult<()> {
	let seed = match sub_m.value_of("seed") {
		Some(seed) => parse_number(seed)?,
		None => 0,
	};
	let data = match sub_m.value_of("DATA") {
		Some(data) => parse_hex(data)?,
		None => bail!("missing parameter DATA"),
	};
	let crc = onewire_memory::crc::crc16(&data, seed);
	let trailer = onewire_memory::crc::crc16_trailer(&data, seed);
	println!("crc16 0x{:04x} (trailer {:02x} {:02x})", crc, trailer[0], trailer[1]);
	Ok(())
}

fn mac(sub_m: &clap::ArgMatches) -> AResult<()> {
	let mut secret = Secret::UNSET;
	secret.0.copy_from_slice(&hex_param(sub_m, "SECRET", 8)?);
	let mut page = [0u8; PAGE_SIZE];
	page.copy_from_slice(&hex_param(sub_m, "PAGE", PAGE_SIZE)?);
	let address = match sub_m.value_of("ADDRESS") {
		Some(address) => parse_number(address)?,
		None => bail!("missing parameter ADDRESS"),
	};
	let rom: DeviceAddress = get_param(sub_m, "ROM")?;
	if !rom.is_valid() {
		warn!("ROM {} has an invalid CRC", rom);
	}
	let mut challenge = Challenge::default();
	if sub_m.is_present("CHALLENGE") {
		challenge.0.copy_from_slice(&hex_param(sub_m, "CHALLENGE", 3)?);
	}

	println!("{}", authenticated_read_mac(&secret, &page, address, &rom.identity(), &challenge));
	Ok(())
}

fn demo_eeprom() -> AResult<()> {
	let address = DeviceAddress::new(0x2D, [0x01, 0x00, 0x00, 0x5E, 0x1D, 0x00]);
	let mut sim = SimBus::new();
	sim.attach(EepromSim::ds2431(address));
	let bus = Bus::new(sim);
	let mut session = bus.session()?;

	let chip = match chips::Chip::from_address(&address) {
		Some(chip) => chip,
		None => bail!("unknown family code 0x{:02x}", address.family()),
	};
	info!("{}: {}", address, chip);
	let banks = chip.memory_banks(address, Speed::Regular);
	let main = &banks[0];

	main.write_page_packet(&mut session, 0, b"hello 1-Wire")?;
	info!("page 0 packet: {:?}", String::from_utf8_lossy(&main.read_page_packet(&mut session, 0)?));

	main.write(&mut session, 0x25, &[0xDE, 0xAD, 0xBE, 0xEF])?;
	info!("0x20..0x30: {:02x?}", main.read(&mut session, 0x20, false, 16)?);

	main.lock_page(&mut session, 1)?;
	info!("page 1 locked: {}", main.is_page_locked(&mut session, 1)?);
	match main.write(&mut session, 0x20, &[0x00]) {
		Err(e) => info!("write to locked page refused: {}", e),
		Ok(()) => bail!("write to locked page went through"),
	}
	Ok(())
}

fn demo_eprom() -> AResult<()> {
	let address = DeviceAddress::new(0x09, [0x02, 0x00, 0x00, 0x5E, 0x1D, 0x00]);
	let mut sim = SimBus::new().with_program_voltage(true);
	sim.attach(EpromSim::ds1982(address));
	let bus = Bus::new(sim);
	let mut session = bus.session()?;

	let chip = match chips::Chip::from_address(&address) {
		Some(chip) => chip,
		None => bail!("unknown family code 0x{:02x}", address.family()),
	};
	info!("{}: {}", address, chip);
	let banks = chip.memory_banks(address, Speed::Regular);
	let main = &banks[0];

	main.write_page_packet(&mut session, 1, b"add-only")?;
	info!("page 1 packet: {:?}", String::from_utf8_lossy(&main.read_page_packet(&mut session, 1)?));

	main.redirect_page(&mut session, 1, 2)?;
	info!("page 1 redirected to page {}", main.redirected_page(&mut session, 1)?);

	main.lock_page(&mut session, 3)?;
	for page in 0..main.page_count() {
		info!("page {} locked: {}", page, main.is_page_locked(&mut session, page)?);
	}
	Ok(())
}

fn demo_sha() -> AResult<()> {
	let address = DeviceAddress::new(0x33, [0x03, 0x00, 0x00, 0x5E, 0x1D, 0x00]);
	let mut sim = SimBus::new();
	sim.attach(ShaSim::ds2432(address));
	let bus = Bus::new(sim);
	let mut session = bus.session()?;

	let mut device = ShaDevice::new(address, Speed::Regular);
	info!("{}: {}", address, chips::Chip::Ds2432);

	device.install_master_secret(&mut session, 0, b"system wide master secret material")?;
	info!("master secret installed");
	let mut bind_data = [0u8; PAGE_SIZE];
	bind_data[..12].copy_from_slice(b"binding data");
	device.bind_secret_to_device(&mut session, 0, &bind_data)?;
	info!("secret bound to {}", address);

	device.write_page_packet(&mut session, 2, b"signed data")?;
	device.set_challenge(Challenge([0x12, 0x34, 0x56]));
	let page = device.read_authenticated_page(&mut session, 2)?;
	info!("authenticated read of page 2: {:02x?}", &page[..16]);

	let (page, mac) = device.read_page_signature(&mut session, 2)?;
	info!("page 2 MAC {} valid: {}", mac, mac.is_valid_for(device.secret(), &page, 0x40, &address, device.challenge()));

	device.write_protect_page_zero(&mut session)?;
	info!("status: {:?}", device.check_status(&mut session)?);
	Ok(())
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(@setting SubcommandRequiredElseHelp)
		(global_setting: clap::AppSettings::VersionlessSubcommands)
		(@subcommand crc16 =>
			(about: "CRC16 of hex data, as appended to 1-Wire packets")
			(@arg seed: -s --seed +takes_value "initial CRC register (e.g. the page number)")
			(@arg DATA: +required "data as hex digits")
		)
		(@subcommand mac =>
			(about: "MAC of an authenticated page read")
			(@arg SECRET: +required "8 byte secret as hex digits")
			(@arg PAGE: +required "32 byte page content as hex digits")
			(@arg ADDRESS: +required "page address (0x00, 0x20, ...)")
			(@arg ROM: +required "device ROM as 16 hex digits, family code last")
			(@arg CHALLENGE: "3 byte challenge as hex digits (default 000000)")
		)
		(@subcommand demo =>
			(about: "run the protocol against a simulated device")
			(@arg DEVICE: +required "device type: eeprom, eprom or sha")
		)
	).get_matches();

	match matches.subcommand() {
		("crc16", Some(sub_m)) => {
			crc16(sub_m)
		},
		("mac", Some(sub_m)) => {
			mac(sub_m)
		},
		("demo", Some(sub_m)) => match sub_m.value_of("DEVICE") {
			Some("eeprom") => demo_eeprom(),
			Some("eprom") => demo_eprom(),
			Some("sha") => demo_sha(),
			device => bail!("unknown demo device {:?}", device),
		},
		("", _) => bail!("no subcommand"),
		(cmd, _) => bail!("not implemented subcommand {:?}", cmd),
	}
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		exit(1);
	}
}
