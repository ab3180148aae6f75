//! End-to-end exercises of the socket layer and the listener engine,
//! driven over the loopback interface.

use std::thread;
use std::time::{Duration, Instant};

use multios_oskit::net::{
    multi_read_select, AddrFamily, IpAddress, IpEndpoint, ListenerEngine, RecvMode, SelectFlags,
    SelectItem, ShutdownMode, SockProtocol, Socket, SocketKind, SocketListener,
};
use multios_oskit::ErrorKind;

fn loopback(port: u16) -> IpEndpoint {
    IpEndpoint::new(IpAddress::loopback(AddrFamily::IpV4), port)
}

fn tcp_socket() -> Socket {
    Socket::create(SocketKind::Stream, SockProtocol::Tcp, AddrFamily::IpV4).unwrap()
}

fn udp_socket_bound() -> Socket {
    let mut sock =
        Socket::create(SocketKind::Datagram, SockProtocol::Udp, AddrFamily::IpV4).unwrap();
    sock.bind_listen(&IpAddress::loopback(AddrFamily::IpV4), 0)
        .unwrap();
    sock
}

#[test]
fn udp_echo_round_trip() {
    // Server: echo every datagram back with each byte incremented
    let server = udp_socket_bound();
    let server_ep = server.local_endpoint().unwrap();

    let server_thread = thread::spawn(move || {
        let mut buf = [0u8; 512];
        let (got, from) = server
            .recv_from(&mut buf, Some(Duration::from_secs(5)), false)
            .unwrap();
        for byte in &mut buf[..got] {
            *byte = byte.wrapping_add(1);
        }
        server.send_to(&buf[..got], &from).unwrap();
    });

    let client = udp_socket_bound();
    let payload: Vec<u8> = (0u8..64).collect();
    assert_eq!(client.send_to(&payload, &server_ep).unwrap(), 64);

    let mut reply = [0u8; 512];
    let (got, from) = client
        .recv_from(&mut reply, Some(Duration::from_secs(1)), false)
        .unwrap();
    assert_eq!(got, 64);
    assert_eq!(from, server_ep);

    let expected: Vec<u8> = (1u8..=64).collect();
    assert_eq!(&reply[..got], expected.as_slice());

    server_thread.join().unwrap();
}

#[test]
fn tcp_replay_at_max_payload() {
    const PAYLOAD: usize = 65_536;

    let mut listener = tcp_socket();
    listener
        .bind_listen(&IpAddress::loopback(AddrFamily::IpV4), 0)
        .unwrap();
    listener.listen(1).unwrap();
    let server_ep = listener.local_endpoint().unwrap();

    // Server: read the full payload, send it back incremented
    let server_thread = thread::spawn(move || {
        assert!(listener
            .wait_for_data_ready(Some(Duration::from_secs(5)))
            .unwrap());
        let (conn, _peer) = listener.accept().unwrap();

        let mut buf = vec![0u8; PAYLOAD];
        let got = conn
            .recv_to(&mut buf, Some(Duration::from_secs(10)), RecvMode::All)
            .unwrap();
        assert_eq!(got, PAYLOAD);

        for byte in &mut buf {
            *byte = byte.wrapping_add(1);
        }
        assert_eq!(
            conn.send_throttled(&buf, Some(Duration::from_secs(10))).unwrap(),
            PAYLOAD
        );
    });

    let mut client = tcp_socket();
    client
        .connect(&server_ep, Some(Duration::from_secs(5)))
        .unwrap();
    assert!(client.is_connected());

    let outgoing: Vec<u8> = (0..PAYLOAD).map(|index| (index % 256) as u8).collect();
    assert_eq!(
        client
            .send_throttled(&outgoing, Some(Duration::from_secs(10)))
            .unwrap(),
        PAYLOAD
    );

    let mut incoming = vec![0u8; PAYLOAD];
    let got = client
        .recv_to(&mut incoming, Some(Duration::from_secs(10)), RecvMode::All)
        .unwrap();
    assert_eq!(got, PAYLOAD);

    for (index, &byte) in incoming.iter().enumerate() {
        assert_eq!(byte, ((index + 1) % 256) as u8, "byte {index}");
    }

    server_thread.join().unwrap();
}

#[test]
fn multi_select_flags_only_the_talker() {
    let mut listener = tcp_socket();
    listener
        .bind_listen(&IpAddress::loopback(AddrFamily::IpV4), 0)
        .unwrap();
    listener.listen(2).unwrap();
    let server_ep = listener.local_endpoint().unwrap();

    let mut client_a = tcp_socket();
    client_a.connect(&server_ep, Some(Duration::from_secs(5))).unwrap();
    let mut client_b = tcp_socket();
    client_b.connect(&server_ep, Some(Duration::from_secs(5))).unwrap();

    assert!(listener
        .wait_for_data_ready(Some(Duration::from_secs(5)))
        .unwrap());
    let (conn_one, peer_one) = listener.accept().unwrap();
    assert!(listener
        .wait_for_data_ready(Some(Duration::from_secs(5)))
        .unwrap());
    let (conn_two, _peer_two) = listener.accept().unwrap();

    // Client A talks, client B stays silent
    client_a.send(b"A").unwrap();
    let a_is_first = peer_one == client_a.local_endpoint().unwrap();

    let mut items = [SelectItem::new(&conn_one), SelectItem::new(&conn_two)];
    let changed = multi_read_select(&mut items, Some(Duration::from_secs(2)), None).unwrap();
    assert_eq!(changed, 1);

    let (talker, silent) = if a_is_first { (0, 1) } else { (1, 0) };
    assert_eq!(items[talker].flags, SelectFlags::READ);
    assert_eq!(items[silent].flags, SelectFlags::empty());
}

#[test]
fn graceful_shutdown_reads_as_peer_close() {
    let mut listener = tcp_socket();
    listener
        .bind_listen(&IpAddress::loopback(AddrFamily::IpV4), 0)
        .unwrap();
    listener.listen(1).unwrap();
    let server_ep = listener.local_endpoint().unwrap();

    let mut client = tcp_socket();
    client.connect(&server_ep, Some(Duration::from_secs(5))).unwrap();

    assert!(listener
        .wait_for_data_ready(Some(Duration::from_secs(5)))
        .unwrap());
    let (conn, _peer) = listener.accept().unwrap();

    client.shutdown(ShutdownMode::Both).unwrap();
    client.close();

    // The orderly close is its own signal, not a generic failure
    let mut buf = [0u8; 8];
    let err = conn
        .recv_to(&mut buf, Some(Duration::from_secs(2)), RecvMode::All)
        .unwrap_err();
    assert!(err.is(ErrorKind::NotConnected));
}

#[test]
fn listener_engine_two_ports_with_backpressure() {
    const PLAIN_PORT: u16 = 48_100;
    const SECURE_PORT: u16 = 48_101;
    const MAX_WAITING: u32 = 4;

    let mut engine = ListenerEngine::start(PLAIN_PORT, SECURE_PORT, MAX_WAITING).unwrap();
    assert_eq!(engine.non_secure_port(), PLAIN_PORT);
    assert_eq!(engine.secure_port(), SECURE_PORT);

    // Let both listener threads reach their accept loops
    thread::sleep(Duration::from_millis(200));

    // Five clients against the plain port; the queue holds four
    let mut clients = Vec::new();
    for _ in 0..5 {
        let mut client = tcp_socket();
        client
            .connect(&loopback(PLAIN_PORT), Some(Duration::from_secs(5)))
            .unwrap();
        clients.push(client);
        thread::sleep(Duration::from_millis(50));
    }
    // Give the engine time to accept (and drop the overflow)
    thread::sleep(Duration::from_millis(300));

    let client_ports: Vec<u16> = clients
        .iter()
        .map(|client| client.local_endpoint().unwrap().port)
        .collect();

    // Hold the claimed connections so their sockets stay open while the
    // clients are probed below
    let mut claimed = Vec::new();
    let mut accepted_ports = Vec::new();
    for _ in 0..4 {
        let conn = engine
            .wait(Duration::from_millis(100))
            .expect("expected a queued connection");
        assert!(!conn.secure());
        accepted_ports.push(conn.client().port);
        claimed.push(conn);
    }

    // Delivered in accept order, which is connect order here
    assert_eq!(accepted_ports, client_ports[..4].to_vec());

    // Nothing else is queued: the fifth connection was dropped
    assert!(engine.wait(Duration::from_millis(100)).is_none());

    // And the dropped client observes its socket dying, while the four
    // queued ones merely see silence
    let mut dead = 0;
    let mut quiet = 0;
    for client in &clients {
        let mut buf = [0u8; 1];
        match client.recv_to(&mut buf, Some(Duration::from_millis(300)), RecvMode::Partial) {
            Err(err) if err.is(ErrorKind::NotConnected) => dead += 1,
            Err(err) if err.is(ErrorKind::ConnectionReset) => dead += 1,
            Ok(0) => quiet += 1,
            other => panic!("unexpected read result: {other:?}"),
        }
    }
    assert_eq!(dead, 1, "exactly one client was turned away");
    assert_eq!(quiet, 4);

    drop(claimed);
    engine.shutdown();
}

#[test]
fn secure_port_marks_connections() {
    const SECURE_ONLY: u16 = 48_102;

    let mut engine = ListenerEngine::start(0, SECURE_ONLY, 2).unwrap();
    thread::sleep(Duration::from_millis(200));

    let mut client = tcp_socket();
    client
        .connect(&loopback(SECURE_ONLY), Some(Duration::from_secs(5)))
        .unwrap();

    let conn = engine
        .wait(Duration::from_secs(5))
        .expect("secure connection expected");
    assert!(conn.secure());
    assert!(conn.accepted_at().ticks() > 0);

    engine.shutdown();
}

#[test]
fn engine_start_rejects_no_ports() {
    // Both ports disabled is a caller mistake, not a quiet no-op
    let err = ListenerEngine::start(0, 0, 1).unwrap_err();
    assert!(err.is(ErrorKind::InvalidArguments));
}

#[test]
fn endpoint_equality_is_binary() {
    let alpha = IpEndpoint::parse("10.0.0.1:80", AddrFamily::Unspec).unwrap();
    let beta = IpEndpoint::new(IpAddress::V4([10, 0, 0, 1]), 80);
    assert_eq!(alpha, beta);

    let other_port = IpEndpoint::parse("10.0.0.1:81", AddrFamily::Unspec).unwrap();
    assert_ne!(alpha, other_port);
}

#[test]
fn standalone_listener_shares_port_across_families() {
    let listener = SocketListener::new(0, 2).unwrap();
    assert!(listener.port() != 0);

    // Quick sanity that the listener actually accepts on the shared port
    let mut client = tcp_socket();
    client
        .connect(&loopback(listener.port()), Some(Duration::from_secs(5)))
        .unwrap();
    let accepted = listener
        .listen_for(Some(Duration::from_secs(5)))
        .unwrap()
        .is_some();
    assert!(accepted);
}

#[test]
fn empty_engine_wait_is_bounded() {
    let mut engine = ListenerEngine::start(48_103, 0, 1).unwrap();
    let before = Instant::now();
    assert!(engine.wait(Duration::ZERO).is_none());
    assert!(before.elapsed() < Duration::from_millis(50));
    engine.shutdown();
}
