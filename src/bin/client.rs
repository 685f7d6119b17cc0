static WAIT_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(10);
static SEND_INTERVAL: std::time::Duration = std::time::Duration::from_millis(1000);

fn main() {
    let config = ripcord::Config {
        timeout_duration_ms: 4_000,
        keep_alive_interval_ms: 1_000,
        ..Default::default()
    };

    let handler = |endpoint: std::net::SocketAddr, message: &[u8]| {
        println!("receive from {endpoint} {message:02X?}");
    };

    let mut client = ripcord::Peer::new(ripcord::UdpSocket::new(), handler, config);

    let server_addr = client
        .connect(([127, 0, 0, 1], 8888).into())
        .expect("failed to create ripcord client");

    let mut connected = false;
    let mut last_send = std::time::Instant::now();
    let mut counter = 0u8;

    loop {
        client
            .wait_for_packets(WAIT_TIMEOUT)
            .expect("failed to wait for packets");
        client.update();

        while let Some(event) = client.poll_event() {
            match event {
                ripcord::Event::Connected(_) => {
                    println!("Event::Connected");
                    connected = true;
                }
                ripcord::Event::Disconnected(_, reason) => {
                    println!("Event::Disconnected {reason:?}");
                    return;
                }
                ripcord::Event::ConnectionFailed(_, reason) => {
                    println!("Event::ConnectionFailed {reason:?}");
                    return;
                }
            }
        }

        if connected && last_send.elapsed() >= SEND_INTERVAL {
            last_send = std::time::Instant::now();
            counter = counter.wrapping_add(1);

            if let Some(mut connection) = client.connection(server_addr) {
                let _ = connection.send_reliable(&[0x00, 0x01, counter]);
                let _ = connection.send_unreliable(&[0x10, 0x11, counter]);

                match connection.send_notify(&[0x20, 0x21, counter]) {
                    Ok(token) => println!("notify sent, status {:?}", token.status()),
                    Err(err) => println!("notify failed: {err}"),
                }
            }
        }
    }
}
