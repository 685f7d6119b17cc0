/*

Ripcord layers three delivery guarantees over one datagram socket: unreliable, notify (a one-shot
delivered/lost outcome per message) and reliable-ordered.

# Sequences and acks

Every notify and reliable packet consumes a wire sequence from a 2^N sequence space (N <= 16,
default 12). Each packet also carries the sender's receive state: the most recent sequence it has
seen (the ack sequence) and a 64-bit mask where bit i means "ack sequence - i was received".

  v latest
  1 1 0 1 1 1 0 1 ...   => latest, latest-1, latest-3 ... received; latest-2 missing

The sender keeps every outstanding notify/reliable packet in a ring buffer indexed by wire
sequence. When a report arrives, every slot at or behind the reported ack sequence is resolved:

  - bit set:                        acked
  - bit clear, or 64+ behind:       lost

Reports are compared with signed sequence distance, which only reaches half the sequence space, so
no more than 2^(N-1) - 1 sequences are ever outstanding. Sends beyond that fail with
SendWindowFull until the oldest outstanding packet is resolved.

A lost notify is reported to the caller and forgotten. A lost reliable packet is resent with a
fresh wire sequence, but only if its most recent transmission is itself behind the report. A
reliable packet remembers every wire sequence it has used, and all of them are released when any
one is acked.

# Reliable ordering

Reliable packets also carry an order number from a second sequence space. The receiver stores
them in a ring buffer indexed by order and delivers from its read cursor forward, so reliable
messages are handed up in order and without duplicates.

Small messages are batched into one packet, each prefixed by a 16-bit length:

  [type][seq][ack][mask][order] [len][msg] [len][msg] ...

A message that cannot fit in one packet is split into fragments, each its own reliable packet with
consecutive order numbers and a descending fragment index:

  [type][seq][ack][mask][order] [index][data]

The last fragment carries index 0, so the first fragment tells the receiver how many further
orders must be present before the message is complete. The sender flushes any pending batch
before the first fragment and nothing else is sent between fragments, so the fragments of one
message always occupy a contiguous run of orders.

# Empty acks

If a connection receives but has nothing to send, acks are sent on their own: immediately once
enough new sequences have arrived since the last send, otherwise after a short idle time. Empty
acks stop after a fixed count until something new is received, which keeps two silent peers from
acking each other forever.

# Connections

  Created -> Connecting -> Connected -> Disconnected -> Removing -> Destroyed

Clients resend the connect request at a fixed interval until accepted, rejected, or out of
attempts. Servers only create a connection for a well-formed connect request carrying the right
key digest, and answer with a rejection once full. Connected peers time out after a period of
silence, and keep-alives are sent when a connection has otherwise been quiet.

*/

mod ack_system;
mod batch;
mod clock;
mod config;
mod connect_key;
mod connection;
mod error;
pub mod metrics;
mod packet;
mod peer;
pub mod pool;
pub mod ring_buffer;
pub mod sequencer;
mod socket;

/// Delivery requested of the underlying socket for an outgoing datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendMode {
    Reliable,
    Unreliable,
}

pub use ack_system::{NotifyCallback, NotifyStatus, NotifyToken};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use connection::ConnectionState;
pub use error::{Error, Result};
pub use metrics::{Channel, Metrics};
pub use packet::{DisconnectReason, RejectReason};
pub use peer::{ConnectionMut, DataHandler, Event, Peer};
pub use socket::{Socket, SocketInfo, SocketReliability, UdpSocket};
