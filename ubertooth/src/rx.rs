use nusb::transfer::RequestBuffer;
use tracing::warn;

use crate::{
    CapturedBlock, DeviceCommand, Error, Ubertooth, consts::TRANSFER_BUFFER_SIZE,
    error::StateChangeError,
};

/// An Ubertooth streaming captured symbols.
///
/// To receive data, first take an Ubertooth peripheral and call
/// [`Ubertooth::start_rx`], or use [`Receive::new`] with it.
///
/// Next, call [`submit`][Receive::submit] to queue up requests, stopping when
/// there are enough pending requests. Each request brings back a handful of
/// 64-byte records, so a few dozen pending requests is plenty.
///
/// Actual reception is done with [`next_complete`][Receive::next_complete],
/// which will panic if there are no pending requests. The number of pending
/// requests can always be checked with [`pending`][Receive::pending].
///
/// While receiving, the radio can still be retuned or have its clock trimmed,
/// either with [`send`][Receive::send] for commands produced by a
/// [`Session`][crate::Session], or through [`device`][Receive::device].
///
/// When finished receiving, call [`stop`][Receive::stop] to cancel all
/// remaining transactions and switch the Ubertooth back to idle.
///
/// ```no_run
/// use anyhow::Result;
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let ut = ubertooth::open_ubertooth()?;
///     ut.set_channel(2402).await?;
///     let mut rx = ut.start_rx().await.map_err(|e| e.err)?;
///     for _ in 0..32 {
///         rx.submit();
///     }
///     for _ in 0..1000 {
///         for block in rx.next_complete().await? {
///             println!(
///                 "ch={} clk100ns={} rssi_max={}",
///                 block.channel, block.clk100ns, block.rssi_max
///             );
///         }
///         rx.submit();
///     }
///     rx.stop().await?;
///     Ok(())
/// }
/// ```
pub struct Receive {
    ut: Ubertooth,
}

impl Receive {
    /// Switch an Ubertooth into symbol streaming mode.
    pub async fn new(ut: Ubertooth) -> Result<Self, StateChangeError> {
        if let Err(err) = ut.check_api() {
            return Err(StateChangeError { err, ut });
        }
        if let Err(err) = ut.rx_symbols().await {
            return Err(StateChangeError { err, ut });
        }
        Ok(Self { ut })
    }

    /// Access the underlying device, for commands that make sense while
    /// receiving.
    pub fn device(&self) -> &Ubertooth {
        &self.ut
    }

    /// Apply a command produced by a [`Session`][crate::Session].
    pub async fn send(&self, cmd: &DeviceCommand) -> Result<(), Error> {
        self.ut.send(cmd).await
    }

    /// Queue up a receive transfer.
    ///
    /// This will pull from a reusable buffer pool first, and allocate a new
    /// buffer if none are available in the pool.
    pub fn submit(&mut self) {
        let req = if let Ok(buf) = self.ut.rx.buf_pool.try_recv() {
            RequestBuffer::reuse(buf, TRANSFER_BUFFER_SIZE)
        } else {
            RequestBuffer::new(TRANSFER_BUFFER_SIZE)
        };
        self.ut.rx.queue.submit(req);
    }

    /// Retrieve the records from the next completed transfer.
    ///
    /// This future is cancel-safe, so feel free to use it alongside a timeout
    /// or a `select!`-type pattern.
    pub async fn next_complete(&mut self) -> Result<Vec<CapturedBlock>, Error> {
        let result = self.ut.rx.queue.next_complete().await;
        let parsed = match result.status {
            Ok(_) => CapturedBlock::parse_all(&result.data).inspect_err(|_| {
                warn!(
                    "Dropping a {}-byte transfer that isn't a whole number of records",
                    result.data.len()
                )
            }),
            Err(e) => Err(e.into()),
        };
        // The buffer goes back to the pool either way.
        let _ = self.ut.rx.buf_pool_send.send(result.data);
        parsed
    }

    /// Get the number of pending requests.
    pub fn pending(&self) -> usize {
        self.ut.rx.queue.pending()
    }

    /// Halt receiving and return to idle mode.
    ///
    /// This attempts to cancel all transfers and then complete whatever is
    /// left. Transfer errors are ignored.
    pub async fn stop(mut self) -> Result<Ubertooth, Error> {
        self.ut.rx.queue.cancel_all();
        while self.pending() > 0 {
            let _ = self.next_complete().await;
        }
        self.ut.stop().await?;
        Ok(self.ut)
    }
}
