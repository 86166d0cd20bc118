use clap::Args;
use color_eyre::eyre::Context;
use tracing::{error, info, warn};
use ubertooth::{
    DeviceCommand, Receive, Session, SessionConfig, Ubertooth,
    bluetooth::{AfhMap, BdAddr},
};

/// Follow a piconet: find its access code, keep the clock trimmed, and print
/// each packet seen.
#[derive(Args, Debug)]
pub struct Cmd {
    /// Master's Bluetooth address. Only the lower 32 bits (UAP and LAP) matter.
    #[arg(short, long)]
    address: BdAddr,

    /// Access codes must have fewer than this many bit errors.
    #[arg(short = 'e', long, default_value_t = ubertooth::bluetooth::MAX_SYNCWORD_ERRS)]
    max_ac_errors: u32,

    /// Don't trim the radio's clock to line up with the piconet.
    #[arg(long)]
    no_trim: bool,

    /// AFH channel map in use by the piconet, as 20 hex digits.
    #[arg(short = 'm', long)]
    afh_map: Option<AfhMap>,

    /// Master clock minus the radio's native clock. When given, the radio
    /// hops along with the piconet.
    #[arg(short = 'o', long)]
    clock_offset: Option<u32>,

    /// Channel to park on when not hopping, in MHz.
    #[arg(short, long, default_value_t = 2441)]
    channel: u16,

    /// Records in a row without the access code before the piconet counts as
    /// lost and hopping restarts. Zero never gives up.
    #[arg(long, default_value_t = ubertooth::LOST_AFTER_RECORDS)]
    lost_after: u32,

    /// Stop after this many packets (default is unlimited).
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Number of USB transfers to keep in flight.
    #[arg(long, default_value_t = 16)]
    depth: usize,
}

impl Cmd {
    fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.address);
        config.afh_map = self.afh_map;
        config.max_ac_errors = self.max_ac_errors;
        config.trim = !self.no_trim;
        config.clkn_offset = self.clock_offset;
        config.lost_after = self.lost_after;
        config
    }

    pub async fn cmd(&self, ut: Ubertooth) -> color_eyre::Result<()> {
        let mut session = Session::new(self.config());

        ut.set_bdaddr(session.address())
            .await
            .wrap_err("Failed setting the piconet address")?;
        let afh = match session.config().afh_map {
            Some(map) => ut.set_afh_map(&map).await,
            None => ut.clear_afh_map().await,
        };
        afh.wrap_err("Failed setting the AFH map")?;

        if session.config().clkn_offset.is_none() {
            ut.set_channel(self.channel)
                .await
                .wrap_err("Failed setting the channel")?;
        }

        let quit = crate::os_signal::quit_watch().await;

        let mut rx = match ut.start_rx().await {
            Ok(rx) => rx,
            Err(e) => {
                if e.ut.stop().await.is_err() {
                    error!("Failed switching to RX, and failed switching it off too");
                }
                return Err(e.err).wrap_err("Failed to start receiving");
            }
        };
        info!(
            "Following LAP {:06x}, UAP {:02x}",
            session.address().lap(),
            session.address().uap()
        );

        if let Err(e) = start_hopping(&rx, &session).await {
            let _ = rx.stop().await;
            return Err(e);
        }

        let depth = self.depth.max(1);
        let result = quit
            .run_until_cancelled(follow(&mut rx, &mut session, depth, self.count))
            .await;

        let stats = session.stats();
        info!(
            "{} records, {} basic rate, {} with access code, {} clock trims, {} restarts",
            stats.blocks, stats.valid, stats.found, stats.trims, stats.losses
        );
        rx.stop().await.wrap_err("Failed to stop receiving")?;
        result.unwrap_or(Ok(()))
    }
}

/// Put the radio on the hop sequence, if the piconet's clock is known.
async fn start_hopping(rx: &Receive, session: &Session) -> color_eyre::Result<()> {
    if session.config().clkn_offset.is_none() {
        return Ok(());
    }
    let clkn = rx
        .device()
        .get_clock()
        .await
        .wrap_err("Failed reading the clock")?;
    for cmd in session.start_commands(clkn).iter() {
        rx.send(cmd)
            .await
            .wrap_err_with(|| format!("Failed to {cmd}"))?;
    }
    Ok(())
}

async fn follow(
    rx: &mut Receive,
    session: &mut Session,
    depth: usize,
    max_packets: Option<u64>,
) -> color_eyre::Result<()> {
    let mut packets = 0u64;
    loop {
        while rx.pending() < depth {
            rx.submit();
        }
        let blocks = match rx.next_complete().await {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!("Receive error: {}", e);
                continue;
            }
        };
        for block in blocks.iter() {
            let pkt = session.process(block);
            let restart: Vec<DeviceCommand> = session.drain_commands().collect();
            for cmd in restart.iter() {
                if let Err(e) = rx.send(cmd).await {
                    warn!("Failed sending {}: {}", cmd, e);
                }
            }
            let Some(pkt) = pkt else {
                continue;
            };
            println!("{pkt}");
            for cmd in pkt.commands.iter() {
                if let Err(e) = rx.send(cmd).await {
                    warn!("Failed sending {}: {}", cmd, e);
                }
            }
            packets += 1;
            if max_packets.is_some_and(|max| packets >= max) {
                return Ok(());
            }
        }
    }
}
