//! Raw stream events and connected datagram sockets over loopback.

mod common;

use std::cell::RefCell;
use std::io::Write;
use std::net::{TcpStream, UdpSocket};
use std::rc::Rc;
use std::time::Duration;

use common::{keep_running, start_network, wait_until, Server};
use nfw_networking::{packet_payload, CloseStatus, Family, IoSocket, Protocol};

#[test]
fn test_stream_events_carry_every_byte() {
    let mut server = Server::start();
    let mut peer = TcpStream::connect(server.addr()).unwrap();
    assert!(wait_until(|| {
        server.tick();
        server.container.len() == 1
    }));

    let index = server.established.borrow()[0];
    let stream = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&stream);
    server
        .container
        .get_mut(index)
        .unwrap()
        .on_stream(move |bytes| sink.borrow_mut().extend_from_slice(bytes));

    let mut sent = Vec::new();
    for i in 0..50u8 {
        let payload = packet_payload(&vec![i; usize::from(i) + 1][..]);
        peer.write_all(&payload).unwrap();
        sent.extend_from_slice(&payload);
        if i % 10 == 0 {
            std::thread::sleep(Duration::from_millis(2));
            server.tick();
        }
    }
    peer.flush().unwrap();

    assert!(wait_until(|| {
        server.tick();
        server.packet_count() == 50
    }));
    assert_eq!(*stream.borrow(), sent);
}

#[test]
fn test_datagram_round_trip() {
    let network = start_network();
    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut socket = IoSocket::new(network.backend(), Protocol::Udp, Family::Inet4);
    socket.connect_addr(peer.local_addr().unwrap()).unwrap();
    let local = socket.local_addr().unwrap();

    let packets = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&packets);
    socket.on_packet(move |body| sink.borrow_mut().push(body.to_vec()));

    peer.send_to(&packet_payload(&[4u8, 5, 6][..]), local).unwrap();
    assert!(wait_until(|| {
        socket.synchronise();
        !packets.borrow().is_empty()
    }));
    assert_eq!(packets.borrow()[0], vec![4, 5, 6]);

    socket.send_packet(&[7u8, 8][..]);
    socket.synchronise();
    let mut datagram = [0u8; 64];
    let (len, from) = peer.recv_from(&mut datagram).unwrap();
    assert_eq!(from, local);
    assert_eq!(&datagram[..len], &packet_payload(&[7u8, 8][..])[..]);
}

#[test]
fn test_empty_datagram_disconnects_gracefully() {
    let network = start_network();
    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();

    let mut socket = IoSocket::new(network.backend(), Protocol::Udp, Family::Inet4);
    socket.connect_addr(peer.local_addr().unwrap()).unwrap();
    let local = socket.local_addr().unwrap();

    let disconnects = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&disconnects);
    socket.on_disconnect(move |status| sink.borrow_mut().push(*status));

    peer.send_to(&[], local).unwrap();
    assert!(wait_until(|| {
        socket.synchronise();
        !disconnects.borrow().is_empty()
    }));
    keep_running(Duration::from_millis(30), || socket.synchronise());

    assert_eq!(disconnects.borrow().as_slice(), &[CloseStatus::Graceful]);
    assert!(!socket.is_connected());
}
