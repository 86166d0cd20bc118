use clap::Args;
use color_eyre::eyre::Context;
use ubertooth::list_ubertooth_devices;

/// Retrieve as much info as possible from each attached Ubertooth.
#[derive(Args, Debug)]
pub struct Cmd {}

const FAILED: &str = "❌ Failed to retrieve";

impl Cmd {
    pub async fn cmd(&self, filter_serial: Option<String>) -> color_eyre::Result<()> {
        println!("Binary release {}", env!("CARGO_PKG_VERSION"));

        let mut found = false;
        for dev in list_ubertooth_devices().wrap_err("Couldn't enumerate Ubertooth devices")? {
            let serial = dev
                .serial()
                .map(|s| s.to_owned())
                .unwrap_or_else(|| String::from("Unknown"));

            if let Some(s) = filter_serial.as_ref() {
                if s != &serial {
                    continue;
                }
            }
            found = true;

            let ut = match dev.open() {
                Ok(ut) => ut,
                Err(e) => {
                    println!("Couldn't open Ubertooth, serial {serial}: {e}");
                    continue;
                }
            };

            println!();
            println!("Found {}, USB serial {serial}", ut.radio_type());

            let info = ut.info();
            let api = info.api_version();
            match info.serial().await {
                Ok(s) => println!("Serial number: {s}"),
                Err(_) => println!("Serial number: {FAILED}"),
            }
            match info.board_id().await {
                Ok(id) => println!("Board ID: {id}"),
                Err(_) => println!("Board ID: {FAILED}"),
            }
            let rev = info
                .firmware_rev()
                .await
                .unwrap_or_else(|_| String::from(FAILED));
            println!(
                "Firmware revision: {} (API:{}{}.{}{})",
                rev,
                (api >> 12) & 0xF,
                (api >> 8) & 0xF,
                (api >> 4) & 0xF,
                api & 0xF
            );
            if let Err(e) = ut.check_api() {
                println!("    {e}");
            }
            match info.compile_info().await {
                Ok(s) => println!("Compile info: {s}"),
                Err(_) => println!("Compile info: {FAILED}"),
            }
            match info.part_number().await {
                Ok(p) => println!("Part ID Number: {p}"),
                Err(_) => println!("Part ID Number: {FAILED}"),
            }
            match ut.get_modulation().await {
                Ok(m) => println!("Modulation: {m}"),
                Err(_) => println!("Modulation: {FAILED}"),
            }
            match ut.get_channel().await {
                Ok(ch) => println!("Channel: {ch} MHz"),
                Err(_) => println!("Channel: {FAILED}"),
            }
            match ut.get_clock().await {
                Ok(clk) => println!("Clock: {clk}"),
                Err(_) => println!("Clock: {FAILED}"),
            }
        }

        if !found {
            if let Some(serial) = filter_serial {
                println!("Unable to locate Ubertooth with serial number {serial}");
            } else {
                println!("Couldn't find any Ubertooth devices");
            }
        }
        Ok(())
    }
}
