use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ripcord::{Clock, Peer, SendMode, Socket, SocketInfo, SocketReliability};

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init()
        .ok();
}

/// Millisecond clock advanced by hand, shared between peers.
#[derive(Clone, Default)]
pub struct ManualClock {
    now_ms: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }

    pub fn now(&self) -> u64 {
        self.now_ms.get()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }
}

struct NetworkState {
    queues: HashMap<SocketAddr, VecDeque<(SocketAddr, Vec<u8>)>>,
    rng: StdRng,
    drop_rate: f64,
    reorder_rate: f64,
    next_port: u16,
    dropped: usize,
    delivered: usize,
}

/// In-memory datagram network. Datagrams that the sending socket does not guarantee may be
/// dropped or reordered according to the configured rates; the rest always arrive in order.
#[derive(Clone)]
pub struct SimNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl SimNetwork {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Rc::new(RefCell::new(NetworkState {
                queues: HashMap::new(),
                rng: StdRng::seed_from_u64(seed),
                drop_rate: 0.0,
                reorder_rate: 0.0,
                next_port: 50_000,
                dropped: 0,
                delivered: 0,
            })),
        }
    }

    pub fn set_drop_rate(&self, drop_rate: f64) {
        self.state.borrow_mut().drop_rate = drop_rate;
    }

    pub fn set_reorder_rate(&self, reorder_rate: f64) {
        self.state.borrow_mut().reorder_rate = reorder_rate;
    }

    pub fn dropped(&self) -> usize {
        self.state.borrow().dropped
    }

    pub fn delivered(&self) -> usize {
        self.state.borrow().delivered
    }

    pub fn socket(&self, info: SocketInfo) -> SimSocket {
        SimSocket {
            state: Rc::clone(&self.state),
            info,
            addr: None,
        }
    }

    pub fn udp_socket(&self) -> SimSocket {
        self.socket(SocketInfo::udp())
    }

    /// Sends a datagram as if from `from`, bypassing any peer.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, packet: &[u8]) {
        if let Some(queue) = self.state.borrow_mut().queues.get_mut(&to) {
            queue.push_back((from, packet.to_vec()));
        }
    }
}

pub struct SimSocket {
    state: Rc<RefCell<NetworkState>>,
    info: SocketInfo,
    addr: Option<SocketAddr>,
}

impl Socket for SimSocket {
    fn info(&self) -> SocketInfo {
        self.info
    }

    fn bind(&mut self, addr: SocketAddr) -> io::Result<()> {
        let mut state = self.state.borrow_mut();

        if state.queues.contains_key(&addr) {
            return Err(io::ErrorKind::AddrInUse.into());
        }

        state.queues.insert(addr, VecDeque::new());
        self.addr = Some(addr);

        Ok(())
    }

    fn connect(&mut self, _addr: SocketAddr) -> io::Result<()> {
        let port = {
            let mut state = self.state.borrow_mut();
            state.next_port += 1;
            state.next_port
        };

        self.bind(([10, 0, 0, 1], port).into())
    }

    fn close(&mut self) {
        if let Some(addr) = self.addr.take() {
            self.state.borrow_mut().queues.remove(&addr);
        }
    }

    fn poll(&mut self) -> bool {
        let state = self.state.borrow();

        match self.addr.and_then(|addr| state.queues.get(&addr)) {
            Some(queue) => !queue.is_empty(),
            None => false,
        }
    }

    fn receive(&mut self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut state = self.state.borrow_mut();

        let datagram = self
            .addr
            .and_then(|addr| state.queues.get_mut(&addr))
            .and_then(|queue| queue.pop_front());

        match datagram {
            Some((from, packet)) => {
                let len = packet.len().min(buffer.len());
                buffer[..len].copy_from_slice(&packet[..len]);
                Ok((len, from))
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn send(&mut self, addr: &SocketAddr, packet: &[u8], mode: SendMode) {
        let Some(from) = self.addr else {
            return;
        };

        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;

        let lossy = match self.info.reliability {
            SocketReliability::Unreliable => true,
            SocketReliability::Reliable => false,
            SocketReliability::Both => mode == SendMode::Unreliable,
        };

        if lossy && state.rng.gen_bool(state.drop_rate) {
            state.dropped += 1;
            return;
        }

        let reorder = lossy && state.rng.gen_bool(state.reorder_rate);

        if let Some(queue) = state.queues.get_mut(addr) {
            if reorder && !queue.is_empty() {
                let index = state.rng.gen_range(0..queue.len());
                queue.insert(index, (from, packet.to_vec()));
            } else {
                queue.push_back((from, packet.to_vec()));
            }

            state.delivered += 1;
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }
}

/// Messages received by a peer, by sender.
pub type Inbox = Rc<RefCell<Vec<(SocketAddr, Vec<u8>)>>>;

/// A data handler that records every message into the returned inbox.
pub fn recording_handler() -> (Inbox, impl FnMut(SocketAddr, &[u8]) + 'static) {
    let inbox: Inbox = Default::default();
    let sink = Rc::clone(&inbox);

    let handler = move |endpoint: SocketAddr, message: &[u8]| {
        sink.borrow_mut().push((endpoint, message.to_vec()));
    };

    (inbox, handler)
}

pub fn server_addr() -> SocketAddr {
    ([10, 0, 0, 100], 7777).into()
}

/// Advances the clock in steps, updating every peer after each step.
pub fn run_for(clock: &ManualClock, peers: &mut [&mut Peer<SimSocket>], ms: u64, step_ms: u64) {
    let mut elapsed = 0;

    while elapsed < ms {
        clock.advance(step_ms);
        elapsed += step_ms;

        for peer in peers.iter_mut() {
            peer.update();
        }
    }
}
