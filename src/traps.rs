/*!
Passive SNMP trap listener.

A long-lived task reads datagrams from the trap port, decodes each one as an SNMP v1/v2c
PDU and pushes a [`TrapEvent`] onto a bounded channel. Emission is fire-and-forget: when the
consumer falls behind the event is dropped with a warning, so memory stays bounded.
*/

use std::{collections::BTreeMap, net::SocketAddr, time::Duration};

use serde::Serialize;
use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::data_aquisition::core::{ObjectId, SnmpValue};

/// Largest datagram the listener accepts.
const MAX_DATAGRAM: usize = 65_535;

const RECV_BACKOFF_MIN: Duration = Duration::from_millis(50);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Pause after failed socket reads, doubling while the failures repeat.
#[derive(Debug)]
struct RecvBackoff {
    next: Duration,
}

impl Default for RecvBackoff {
    fn default() -> Self {
        Self {
            next: RECV_BACKOFF_MIN,
        }
    }
}

impl RecvBackoff {
    fn failed(&mut self) -> Duration {
        let wait = self.next;
        self.next = (self.next * 2).min(RECV_BACKOFF_MAX);
        wait
    }

    fn succeeded(&mut self) {
        self.next = RECV_BACKOFF_MIN;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrapEvent {
    pub source: SocketAddr,
    pub community: String,
    /// OID -> rendered value.
    pub varbinds: BTreeMap<String, String>,
}

pub fn decode_trap(source: SocketAddr, datagram: &[u8]) -> Result<TrapEvent, snmp2::Error> {
    let pdu = snmp2::Pdu::from_bytes(datagram)?;
    let community = String::from_utf8_lossy(pdu.community).into_owned();
    let varbinds = pdu
        .varbinds
        .map(|(oid, value)| {
            let oid = ObjectId::from_snmp(&oid)
                .map(|oid| oid.to_string())
                .unwrap_or_else(|| oid.to_string());
            (oid, SnmpValue::from(&value).as_text())
        })
        .collect();
    Ok(TrapEvent {
        source,
        community,
        varbinds,
    })
}

/// Hand an event to the consumer without waiting. Returns false when it was dropped.
fn emit(tx: &mpsc::Sender<TrapEvent>, event: TrapEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!("Trap queue full, dropping trap from {}", event.source);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Running listener: the receiving end of the trap queue plus the reader task.
pub struct TrapListener {
    rx: mpsc::Receiver<TrapEvent>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TrapListener {
    pub async fn bind(addr: SocketAddr, capacity: usize) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!("Listening for SNMP traps on {local_addr}");
        Ok(Self::spawn(socket, local_addr, capacity))
    }

    fn spawn(socket: UdpSocket, local_addr: SocketAddr, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let mut backoff = RecvBackoff::default();
            loop {
                let (len, source) = match socket.recv_from(&mut buf).await {
                    Ok(received) => {
                        backoff.succeeded();
                        received
                    }
                    Err(e) => {
                        let wait = backoff.failed();
                        warn!("Trap socket receive failed, retrying in {wait:?}: {e}");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                };
                match decode_trap(source, &buf[..len]) {
                    Ok(event) => {
                        debug!("Trap from {source} with {} varbinds", event.varbinds.len());
                        emit(&tx, event);
                    }
                    Err(e) => warn!("Skipping malformed trap datagram from {source}: {e:?}"),
                }
                if tx.is_closed() {
                    debug!("Trap consumer gone, stopping listener");
                    break;
                }
            }
        });
        Self {
            rx,
            local_addr,
            task,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next received trap. `None` once the reader task has stopped.
    pub async fn next(&mut self) -> Option<TrapEvent> {
        self.rx.recv().await
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for TrapListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
