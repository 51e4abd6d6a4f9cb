//! Runs a group of ranks as threads, prints the tree each rank sees, and
//! moves some data through every kind of link.
//!
//! ```text
//! RUST_LOG=ppif=debug cargo run --example tree_demo -- 12
//! ```

use ppif::message::MemoryTransport;
use ppif::{wait_for, Config, Ppif};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn run(ppif: &Ppif) -> ppif::Result<()> {
    let me = ppif.me();

    for rank in 0..ppif.procs() {
        if rank == me {
            println!(
                "rank {:2} at {:?}: uptree {:?}, downtree {:?}, slvcnt {:?}",
                me,
                ppif.coord(),
                ppif.uptree(),
                ppif.downtree(),
                ppif.slvcnt()
            );
        }
        ppif.synchronize()?;
    }

    let mut step = if me == ppif.master() { 1.5f64.to_le_bytes() } else { [0; 8] };
    ppif.broadcast(&mut step)?;

    // Ring exchange over asynchronous channels.
    let procs = ppif.procs();
    if procs > 1 {
        let right = ppif.connect_async((me + 1) % procs, 0)?;
        let left = if procs > 2 {
            ppif.connect_async((me + procs - 1) % procs, 0)?
        } else {
            right
        };
        let outgoing = ppif.send_async(right, format!("hello from {}", me).into_bytes())?;
        let incoming = ppif.recv_async(left, 64)?;
        wait_for(Duration::from_secs(10), || ppif.info_send(right, outgoing))?;
        let greeting = wait_for(Duration::from_secs(10), || ppif.info_recv(left, incoming))?;
        println!("rank {:2} got {:?}", me, String::from_utf8_lossy(&greeting));

        for channel in if left == right { vec![right] } else { vec![left, right] } {
            ppif.disconnect_async(channel)?;
            wait_for(Duration::from_secs(10), || ppif.info_disc(channel))?;
        }
        ppif.send_mail(ppif.master(), me as u32, &step)?;
    }
    ppif.synchronize()?;

    if me == ppif.master() {
        while let Some(mail) = ppif.get_mail()? {
            println!("master got mail {} from rank {}", mail.request_id, mail.source);
        }
    }
    ppif.synchronize()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let procs = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(8);

    let handles: Vec<_> = MemoryTransport::group(procs)
        .into_iter()
        .map(|transport| {
            thread::spawn(move || -> ppif::Result<()> {
                let ppif = Ppif::init(Arc::new(transport), Config::default())?;
                run(&ppif)?;
                ppif.exit()
            })
        })
        .collect();

    for handle in handles {
        if let Err(e) = handle.join().unwrap() {
            eprintln!("Error: {}", e);
        }
    }
}
