use std::sync::{Arc, atomic};

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use ubertooth::CapturedBlock;

#[tokio::main]
async fn main() -> Result<()> {
    // Set up the ctrl-c handler
    let ctrlc_rx = Arc::new(atomic::AtomicBool::new(false));
    let ctrlc_tx = ctrlc_rx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc_tx.store(true, atomic::Ordering::Release);
        }
    });

    // Channel in MHz, then an output file for the raw 64-byte records.
    let mut args = std::env::args();
    args.next();
    let channel: u16 = match args.next() {
        Some(s) => s.parse()?,
        None => 2441,
    };
    let file_name = args.next().unwrap_or_else(|| String::from("./rx.bin"));
    let mut file = tokio::fs::File::create(&file_name).await?;

    // Park on one channel and stream symbols
    let ut = ubertooth::open_ubertooth()?;
    ut.set_channel(channel).await?;
    let mut rx = ut.start_rx().await.map_err(|e| e.err)?;

    // Separate the file writer from the record reader with a separate task
    let (data_send, mut data_recv) = tokio::sync::mpsc::unbounded_channel::<Vec<CapturedBlock>>();
    let file_writer = tokio::spawn(async move {
        while let Some(blocks) = data_recv.recv().await {
            for block in blocks {
                file.write_all(&block.to_bytes()).await?;
            }
        }
        file.flush().await?;
        Ok::<(), anyhow::Error>(())
    });

    for _ in 0..16 {
        rx.submit();
    }
    let mut count = 0usize;
    while !ctrlc_rx.load(atomic::Ordering::Acquire) {
        let blocks = rx.next_complete().await?;
        count += blocks.len();
        if let Some(best) = blocks.iter().map(|b| b.rssi_max).max() {
            println!("{count:8} records, peak RSSI {best}");
        }
        if data_send.send(blocks).is_err() {
            break;
        }
        rx.submit();
    }

    rx.stop().await?;
    drop(data_send);
    file_writer.await??;

    Ok(())
}
