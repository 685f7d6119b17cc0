static WAIT_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(10);

fn main() {
    let config = ripcord::Config {
        max_connections: 1,
        timeout_duration_ms: 4_000,
        keep_alive_interval_ms: 1_000,
        ..Default::default()
    };

    let received = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = received.clone();

    let handler = move |endpoint: std::net::SocketAddr, message: &[u8]| {
        println!("receive from {endpoint} {message:02X?}");
        sink.borrow_mut().push((endpoint, message.to_vec()));
    };

    let mut server = ripcord::Peer::new(ripcord::UdpSocket::new(), handler, config);

    server
        .bind(([127, 0, 0, 1], 8888).into())
        .expect("failed to bind ripcord server");

    loop {
        server
            .wait_for_packets(WAIT_TIMEOUT)
            .expect("failed to wait for packets");
        server.update();

        while let Some(event) = server.poll_event() {
            match event {
                ripcord::Event::Connected(endpoint) => {
                    println!("Event::Connected {endpoint}");
                }
                ripcord::Event::Disconnected(endpoint, reason) => {
                    println!("Event::Disconnected {endpoint} {reason:?}");
                }
                ripcord::Event::ConnectionFailed(endpoint, reason) => {
                    println!("Event::ConnectionFailed {endpoint} {reason:?}");
                }
            }
        }

        // Echo everything back reliably
        for (endpoint, message) in received.borrow_mut().drain(..) {
            if let Some(mut connection) = server.connection(endpoint) {
                if let Err(err) = connection.send_reliable(&message) {
                    println!("echo to {endpoint} failed: {err}");
                }
            }
        }
    }
}
