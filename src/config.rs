use super::ring_buffer;

const MAX_CONNECTIONS_DEFAULT: usize = 100;

const CONNECT_ATTEMPT_INTERVAL_DEFAULT_MS: u64 = 250;
const MAX_CONNECT_ATTEMPTS_DEFAULT: u32 = 10;

const KEEP_ALIVE_INTERVAL_DEFAULT_MS: u64 = 2_000;
const TIMEOUT_DURATION_DEFAULT_MS: u64 = 10_000;
const DISCONNECT_DURATION_DEFAULT_MS: u64 = 1_000;

const BUFFER_POOL_START_SIZE_DEFAULT: usize = 100;
const BUFFER_POOL_MAX_SIZE_DEFAULT: usize = 5_000;

const TIME_BEFORE_EMPTY_ACK_DEFAULT_MS: u64 = 110;
const RECEIVES_BEFORE_EMPTY_ACK_DEFAULT: u32 = 8;
const EMPTY_ACK_LIMIT_DEFAULT: u32 = 8;

const MAX_RELIABLE_PACKETS_IN_SEND_BUFFER_DEFAULT: usize = 2_000;
const SEQUENCE_SIZE_DEFAULT: u32 = 12;
const MAX_RELIABLE_FRAGMENTS_DEFAULT: usize = 5;
const MAX_RELIABLE_FRAGMENTS_MAX: usize = 255;

/// Configuration for a [`Peer`](crate::Peer) and every connection it creates.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of connections a bound peer will accept.
    ///
    /// Minimum value: 1 \
    /// Default value: 100
    pub max_connections: usize,

    /// Time between connect requests while connecting, in milliseconds.
    ///
    /// Minimum value: 1 \
    /// Default value: 250
    pub connect_attempt_interval_ms: u64,

    /// Number of connect requests sent before giving up.
    ///
    /// Minimum value: 1 \
    /// Default value: 10
    pub max_connect_attempts: u32,

    /// Idle time after the last send before a keep-alive is sent, in milliseconds. Must be less
    /// than `timeout_duration_ms` so that a few lost keep-alives do not time the connection out.
    ///
    /// Default value: 2,000
    pub keep_alive_interval_ms: u64,

    /// Time without receiving anything before a connection is dropped, in milliseconds.
    ///
    /// Minimum value: 1 \
    /// Default value: 10,000
    pub timeout_duration_ms: u64,

    /// Time a disconnected connection lingers before removal, in milliseconds.
    ///
    /// Default value: 1,000
    pub disconnect_duration_ms: u64,

    /// Application key sent with connect requests. Peers with different keys will not connect.
    ///
    /// Default value: `"ripcord/<major version>"`
    pub key: String,

    /// Number of buffers created up front.
    ///
    /// Maximum value: `buffer_pool_max_size` \
    /// Default value: 100
    pub buffer_pool_start_size: usize,

    /// Number of buffers kept for reuse. More may be created under load; a warning is logged
    /// when that happens.
    ///
    /// Minimum value: 1 \
    /// Default value: 5,000
    pub buffer_pool_max_size: usize,

    /// Idle time after the last send before an ack is sent on its own, in milliseconds.
    ///
    /// Default value: 110
    pub time_before_empty_ack_ms: u64,

    /// Number of new sequences received since the last send that forces an immediate ack.
    ///
    /// Default value: 8
    pub receives_before_empty_ack: u32,

    /// Number of acks sent without anything new being received before empty acks stop.
    ///
    /// Default value: 8
    pub empty_ack_limit: u32,

    /// Maximum number of unacknowledged packets per connection. Together with the MTU this
    /// bounds per-connection memory, e.g. 2,000 packets * 1,200 bytes * 100 connections = 240MB.
    ///
    /// Minimum value: 1 \
    /// Maximum value: less than `2^(sequence_size - 1)` \
    /// Default value: 2,000
    pub max_reliable_packets_in_send_buffer: usize,

    /// Size in bits of the wire sequence and reliable order spaces. A connection never has more
    /// than `2^(sequence_size - 1) - 1` sequences outstanding.
    ///
    /// Minimum value: 2 \
    /// Maximum value: 16 \
    /// Default value: 12
    pub sequence_size: u32,

    /// Maximum number of fragments a reliable message may be split into. 0 disables
    /// fragmentation.
    ///
    /// Maximum value: 255, and less than `2^(sequence_size - 1)` \
    /// Default value: 5
    pub max_reliable_fragments: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connections: MAX_CONNECTIONS_DEFAULT,
            connect_attempt_interval_ms: CONNECT_ATTEMPT_INTERVAL_DEFAULT_MS,
            max_connect_attempts: MAX_CONNECT_ATTEMPTS_DEFAULT,
            keep_alive_interval_ms: KEEP_ALIVE_INTERVAL_DEFAULT_MS,
            timeout_duration_ms: TIMEOUT_DURATION_DEFAULT_MS,
            disconnect_duration_ms: DISCONNECT_DURATION_DEFAULT_MS,
            key: concat!("ripcord/", env!("CARGO_PKG_VERSION_MAJOR")).to_string(),
            buffer_pool_start_size: BUFFER_POOL_START_SIZE_DEFAULT,
            buffer_pool_max_size: BUFFER_POOL_MAX_SIZE_DEFAULT,
            time_before_empty_ack_ms: TIME_BEFORE_EMPTY_ACK_DEFAULT_MS,
            receives_before_empty_ack: RECEIVES_BEFORE_EMPTY_ACK_DEFAULT,
            empty_ack_limit: EMPTY_ACK_LIMIT_DEFAULT,
            max_reliable_packets_in_send_buffer: MAX_RELIABLE_PACKETS_IN_SEND_BUFFER_DEFAULT,
            sequence_size: SEQUENCE_SIZE_DEFAULT,
            max_reliable_fragments: MAX_RELIABLE_FRAGMENTS_DEFAULT,
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) {
        assert!(
            self.max_connections > 0,
            "invalid configuration: max_connections == 0"
        );
        assert!(
            self.connect_attempt_interval_ms > 0,
            "invalid configuration: connect_attempt_interval_ms == 0"
        );
        assert!(
            self.max_connect_attempts > 0,
            "invalid configuration: max_connect_attempts == 0"
        );
        assert!(
            self.timeout_duration_ms > 0,
            "invalid configuration: timeout_duration_ms == 0"
        );
        assert!(
            self.keep_alive_interval_ms < self.timeout_duration_ms,
            "invalid configuration: keep_alive_interval_ms >= timeout_duration_ms"
        );
        assert!(
            self.buffer_pool_max_size > 0,
            "invalid configuration: buffer_pool_max_size == 0"
        );
        assert!(
            self.buffer_pool_start_size <= self.buffer_pool_max_size,
            "invalid configuration: buffer_pool_start_size > buffer_pool_max_size"
        );
        assert!(
            self.max_reliable_packets_in_send_buffer > 0,
            "invalid configuration: max_reliable_packets_in_send_buffer == 0"
        );
        assert!(
            self.sequence_size >= 2 && self.sequence_size <= ring_buffer::MAX_BITS,
            "invalid configuration: sequence_size not in [2, {}]",
            ring_buffer::MAX_BITS
        );

        let max_window_len = (1usize << (self.sequence_size - 1)) - 1;

        assert!(
            self.max_reliable_packets_in_send_buffer <= max_window_len,
            "invalid configuration: max_reliable_packets_in_send_buffer >= 2^(sequence_size - 1)"
        );
        assert!(
            self.max_reliable_fragments <= MAX_RELIABLE_FRAGMENTS_MAX,
            "invalid configuration: max_reliable_fragments > {}",
            MAX_RELIABLE_FRAGMENTS_MAX
        );
        assert!(
            self.max_reliable_fragments <= max_window_len,
            "invalid configuration: max_reliable_fragments >= 2^(sequence_size - 1)"
        );
    }
}
