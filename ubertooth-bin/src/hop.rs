use clap::Args;
use color_eyre::eyre::eyre;
use ubertooth::bluetooth::{AfhMap, BdAddr, HopKernel};

/// Print the hop sequence of a piconet, without touching any hardware.
#[derive(Args, Debug)]
pub struct Cmd {
    /// Master's Bluetooth address. Only the lower 32 bits (UAP and LAP) matter.
    #[arg(short, long)]
    address: BdAddr,

    /// Master clock (CLK) to start from.
    #[arg(short, long, default_value_t = 0)]
    clock: u32,

    /// Number of slots to print.
    #[arg(short = 'n', long, default_value_t = 32)]
    count: u32,

    /// AFH channel map, as 20 hex digits with channel 0 in the first byte.
    #[arg(short = 'm', long)]
    afh_map: Option<AfhMap>,
}

impl Cmd {
    pub fn cmd(&self) -> color_eyre::Result<()> {
        let mut kernel = HopKernel::new(self.address, None);
        if let Some(map) = self.afh_map {
            kernel
                .set_afh_map(map)
                .map_err(|e| eyre!("Bad AFH map {map}: {e}"))?;
        }
        println!(
            "Address {} (UAP {:02x}, LAP {:06x}), {} channels in use",
            self.address,
            self.address.uap(),
            self.address.lap(),
            kernel.used_channels()
        );
        // Each slot is two ticks of CLK.
        for slot in 0..self.count {
            let clock = self.clock.wrapping_add(slot.wrapping_mul(2)) & 0x0fff_fffe;
            println!(
                "clk={:07x} ch={:2} freq={} MHz",
                clock,
                kernel.channel(clock),
                kernel.next_hop(clock)
            );
        }
        Ok(())
    }
}
