//! Socket-layer behaviour driven by hand-fed transport events.
//!
//! No transport runs here: commands land in an mpsc receiver the test
//! inspects, and events are pushed straight into `Network::dispatch`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use rand::Rng;
use socket_bridge::channel::Outbound;
use socket_bridge::pending::CallId;
use socket_bridge::state::{self, Operation};
use socket_bridge::{
    Command, Completion, DispatchError, Endpoint, ErrorCode, Event, Handle, MpscChannel, Network, Protocol, Security,
    SocketConfig, SocketError, SocketState, TransportError,
};
use tokio::sync::mpsc::UnboundedReceiver;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn network(config: SocketConfig) -> (Network, UnboundedReceiver<Outbound>) {
    let (chan, rx) = MpscChannel::new();
    (Network::new(chan, config), rx)
}

fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn peer() -> Endpoint {
    Endpoint::new("10.0.0.1", 9000)
}

fn local() -> Endpoint {
    Endpoint::new("10.0.0.2", 40000)
}

fn data(payload: &[u8]) -> Event {
    Event::Data {
        payload: payload.to_vec(),
        source: None,
    }
}

fn connected_tcp(net: &mut Network) -> Handle {
    let h = net.create(Protocol::Tcp, Security::None).unwrap();
    net.connect(h, peer()).unwrap();
    net.dispatch(
        h,
        Event::Connected {
            local: local(),
            peer: peer(),
        },
    )
    .unwrap();
    h
}

/// The last `CallId` sent on `h`, if any.
fn last_call(sent: &[Outbound], h: Handle) -> Option<CallId> {
    sent.iter().rev().find_map(|(handle, cmd)| {
        if *handle != h {
            return None;
        }
        match cmd {
            Command::Bind { call, .. }
            | Command::SetOption { call, .. }
            | Command::GetOption { call, .. }
            | Command::AddMembership { call, .. }
            | Command::DropMembership { call, .. } => Some(*call),
            _ => None,
        }
    })
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn connect_then_send_consumes_credit() {
    let (mut net, mut rx) = network(SocketConfig::default());
    let h = net.create(Protocol::Tcp, Security::None).unwrap();
    assert_eq!(net.state(h), SocketState::Closed);

    net.connect(h, peer()).unwrap();
    assert_eq!(net.state(h), SocketState::Connecting);
    net.dispatch(
        h,
        Event::Connected {
            local: local(),
            peer: peer(),
        },
    )
    .unwrap();
    assert_eq!(net.state(h), SocketState::Ready);
    assert_eq!(net.peer_addr(h).unwrap(), Some(peer()));
    assert_eq!(net.local_addr(h).unwrap(), Some(local()));

    let mut buf = b"hello".to_vec();
    assert_eq!(net.send(h, &mut buf, None, None), Ok(5));
    assert!(buf.is_empty());
    assert_eq!(net.writable_len(h), Ok(65_531));

    let sent = drain(&mut rx);
    assert_eq!(
        sent.last(),
        Some(&(
            h,
            Command::Send {
                payload: b"hello".to_vec(),
                destination: None
            }
        ))
    );
}

#[test]
fn oversized_datagram_would_block() {
    let (mut net, _rx) = network(SocketConfig::default().with_max_send_credit(1400));
    let h = net.create(Protocol::Udp, Security::None).unwrap();
    let mut buf = vec![0u8; 2000];

    assert_eq!(net.send(h, &mut buf, None, Some(&peer())), Err(SocketError::WouldBlock));
    assert_eq!(buf.len(), 2000);
    assert_eq!(net.writable_len(h), Ok(1400));
    assert_eq!(net.state(h), SocketState::Closed);
}

#[test]
fn stream_recv_spans_data_events() {
    let (mut net, mut rx) = network(SocketConfig::default());
    let h = connected_tcp(&mut net);
    net.dispatch(h, data(b"ABC")).unwrap();
    net.dispatch(h, data(b"DEFG")).unwrap();
    drain(&mut rx);

    let mut buf = Vec::new();
    assert_eq!(net.recv(h, &mut buf, Some(5)), Ok(5));
    assert_eq!(buf, b"ABCDE");
    let mut rest = Vec::new();
    assert_eq!(net.recv(h, &mut rest, None), Ok(2));
    assert_eq!(rest, b"FG");

    assert_eq!(
        drain(&mut rx),
        vec![(h, Command::Consumed { bytes: 5 }), (h, Command::Consumed { bytes: 2 })]
    );
}

#[test]
fn end_of_stream_is_sticky() {
    let (mut net, _rx) = network(SocketConfig::default());
    let h = connected_tcp(&mut net);
    net.dispatch(h, data(b"")).unwrap();

    let mut buf = Vec::new();
    assert_eq!(net.recv(h, &mut buf, None), Ok(0));
    assert_eq!(net.recv(h, &mut buf, None), Ok(0));

    // Data after end of stream never resurfaces.
    net.dispatch(h, data(b"late")).unwrap();
    assert_eq!(net.recv(h, &mut buf, None), Ok(0));
    assert!(buf.is_empty());
}

#[test]
fn accept_returns_ready_child_then_none() {
    let (mut net, mut rx) = network(SocketConfig::default());
    let listener = net.create(Protocol::Tcp, Security::None).unwrap();
    net.listen(listener).unwrap();
    assert_eq!(net.state(listener), SocketState::Listening);

    let fired = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fired);
    net.set_on_readable(listener, move |_, _| counter.set(counter.get() + 1))
        .unwrap();

    let remote = Endpoint::new("10.0.0.7", 51000);
    drain(&mut rx);
    net.dispatch(
        listener,
        Event::Accepted {
            peer: remote.clone(),
            token: 7,
        },
    )
    .unwrap();
    assert_eq!(fired.get(), 1);

    let child = net.accept(listener).unwrap().expect("one pending connection");
    assert_ne!(child, listener);
    assert_eq!(net.state(child), SocketState::Ready);
    assert_eq!(net.peer_addr(child).unwrap(), Some(remote));
    assert!(net.socket(child).unwrap().is_server());
    assert_eq!(drain(&mut rx), vec![(child, Command::Attach { token: 7 })]);

    assert_eq!(net.accept(listener), Ok(None));
}

// ---------------------------------------------------------------------------
// Callbacks and completions
// ---------------------------------------------------------------------------

#[test]
fn credit_edge_fires_writable_once() {
    let (mut net, _rx) = network(SocketConfig::default().with_max_send_credit(4));
    let h = connected_tcp(&mut net);

    let fired = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fired);
    net.set_on_writable(h, move |_, _| counter.set(counter.get() + 1)).unwrap();

    let mut buf = b"abcdef".to_vec();
    assert_eq!(net.send(h, &mut buf, None, None), Ok(4));
    assert_eq!(buf, b"ef");
    assert_eq!(net.send(h, &mut buf, None, None), Ok(0));

    net.dispatch(h, Event::Credit { flushed: 2 }).unwrap();
    net.dispatch(h, Event::Credit { flushed: 2 }).unwrap();
    assert_eq!(fired.get(), 1);
    assert_eq!(net.writable_len(h), Ok(4));
}

#[test]
fn readable_callback_may_close_its_socket() {
    let (mut net, _rx) = network(SocketConfig::default());
    let h = connected_tcp(&mut net);
    let got = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&got);
    net.set_on_readable(h, move |net, h| {
        let mut buf = Vec::new();
        net.recv(h, &mut buf, None).unwrap();
        sink.borrow_mut().extend(buf);
        net.close(h).unwrap();
    })
    .unwrap();

    net.dispatch(h, data(b"bye")).unwrap();
    assert_eq!(*got.borrow(), b"bye");
    assert_eq!(net.state(h), SocketState::Closed);
    assert_eq!(net.readable_len(h), Err(SocketError::InvalidHandle(h)));

    // Anything still in flight for the handle is dropped.
    net.dispatch(h, data(b"more")).unwrap();
    assert_eq!(*got.borrow(), b"bye");
}

#[test]
fn readable_callback_survives_registering_writable() {
    let (mut net, _rx) = network(SocketConfig::default());
    let h = connected_tcp(&mut net);
    let fired = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fired);
    net.set_on_readable(h, move |net, h| {
        counter.set(counter.get() + 1);
        let mut buf = Vec::new();
        net.recv(h, &mut buf, None).unwrap();
        net.set_on_writable(h, |_, _| {}).unwrap();
    })
    .unwrap();

    net.dispatch(h, data(b"one")).unwrap();
    net.dispatch(h, data(b"two")).unwrap();
    assert_eq!(fired.get(), 2);
}

#[test]
fn callback_replacing_itself_keeps_the_replacement() {
    let (mut net, _rx) = network(SocketConfig::default());
    let h = connected_tcp(&mut net);
    let log = Rc::new(RefCell::new(Vec::new()));
    let first = Rc::clone(&log);
    net.set_on_readable(h, move |net, h| {
        first.borrow_mut().push("first");
        let second = Rc::clone(&first);
        net.set_on_readable(h, move |_, _| second.borrow_mut().push("second"))
            .unwrap();
    })
    .unwrap();

    net.dispatch(h, data(b"a")).unwrap();
    net.dispatch(h, data(b"b")).unwrap();
    assert_eq!(*log.borrow(), vec!["first", "second"]);
}

#[test]
fn error_callback_survives_registering_readable() {
    let (mut net, _rx) = network(SocketConfig::default());
    let h = connected_tcp(&mut net);
    let errors = Rc::new(Cell::new(0));
    let counter = Rc::clone(&errors);
    net.set_on_error(h, move |net, h, _| {
        counter.set(counter.get() + 1);
        net.set_on_readable(h, |_, _| {}).unwrap();
    })
    .unwrap();

    for _ in 0..2 {
        net.dispatch(h, Event::Error(TransportError::new(ErrorCode::Unreachable, "gone")))
            .unwrap();
    }
    assert_eq!(errors.get(), 2);
}

#[test]
fn error_event_reaches_error_callback() {
    let (mut net, _rx) = network(SocketConfig::default());
    let h = net.create(Protocol::Tcp, Security::None).unwrap();
    net.connect(h, peer()).unwrap();

    let seen = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&seen);
    net.set_on_error(h, move |_, _, e| *slot.borrow_mut() = Some(e.code)).unwrap();

    net.dispatch(
        h,
        Event::Error(TransportError::new(ErrorCode::ConnectionRefused, "refused")),
    )
    .unwrap();
    assert_eq!(*seen.borrow(), Some(ErrorCode::ConnectionRefused));
}

#[test]
fn bind_completion_delivers_address_and_readies_datagram_socket() {
    let (mut net, mut rx) = network(SocketConfig::default());
    let h = net.create(Protocol::Udp, Security::None).unwrap();
    let bound = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&bound);
    net.bind(h, 0, move |_, _, r| *slot.borrow_mut() = Some(r)).unwrap();

    let call = last_call(&drain(&mut rx), h).expect("bind call");
    let addr = Endpoint::new("0.0.0.0", 50123);
    net.dispatch(
        h,
        Event::CallComplete {
            call,
            result: Ok(Completion::Bound(addr.clone())),
        },
    )
    .unwrap();

    assert_eq!(*bound.borrow(), Some(Ok(addr.clone())));
    assert_eq!(net.state(h), SocketState::Ready);
    assert_eq!(net.local_addr(h).unwrap(), Some(addr));
}

#[test]
fn completion_after_close_is_dropped_once() {
    let (mut net, mut rx) = network(SocketConfig::default());
    let h = net.create(Protocol::Udp, Security::None).unwrap();
    let ran = Rc::new(Cell::new(false));
    let flag = Rc::clone(&ran);
    net.get_option(h, socket_bridge::SocketOption::ReceiveBufferSize, move |_, _, _| flag.set(true))
        .unwrap();
    let call = last_call(&drain(&mut rx), h).unwrap();
    net.close(h).unwrap();

    let late = Event::CallComplete {
        call,
        result: Ok(Completion::OptionValue(1)),
    };
    assert_eq!(net.dispatch(h, late.clone()), Ok(()));
    assert!(!ran.get());
    assert_eq!(net.dispatch(h, late), Err(DispatchError::UnknownCall { handle: h, call }));
}

#[test]
fn retired_calls_are_bounded() {
    let (mut net, mut rx) = network(SocketConfig::default().with_max_retired_calls(2));
    let mut calls = Vec::new();
    for _ in 0..3 {
        let h = net.create(Protocol::Udp, Security::None).unwrap();
        net.get_option(h, socket_bridge::SocketOption::SendBufferSize, |_, _, _| {})
            .unwrap();
        calls.push((h, last_call(&drain(&mut rx), h).unwrap()));
        net.close(h).unwrap();
    }

    let late = |call| Event::CallComplete {
        call,
        result: Ok(Completion::OptionValue(0)),
    };
    let (oldest, forgotten) = calls[0];
    assert_eq!(
        net.dispatch(oldest, late(forgotten)),
        Err(DispatchError::UnknownCall {
            handle: oldest,
            call: forgotten
        })
    );
    for &(h, call) in &calls[1..] {
        assert_eq!(net.dispatch(h, late(call)), Ok(()));
    }
}

#[test]
fn empty_datagrams_are_neither_sent_nor_received() {
    let (mut net, mut rx) = network(SocketConfig::default());
    let h = net.create(Protocol::Udp, Security::None).unwrap();
    drain(&mut rx);

    let mut empty = Vec::new();
    assert_eq!(
        net.send(h, &mut empty, None, Some(&peer())),
        Err(SocketError::Invalid("empty datagram"))
    );
    assert_eq!(net.state(h), SocketState::Closed);
    assert!(drain(&mut rx).is_empty());

    net.bind(h, 0, |_, _, _| {}).unwrap();
    let call = last_call(&drain(&mut rx), h).unwrap();
    net.dispatch(
        h,
        Event::CallComplete {
            call,
            result: Ok(Completion::Bound(local())),
        },
    )
    .unwrap();
    net.dispatch(
        h,
        Event::Data {
            payload: Vec::new(),
            source: Some(peer()),
        },
    )
    .unwrap();
    assert_eq!(net.readable_len(h), Ok(0));
    assert_eq!(net.recv(h, &mut Vec::new(), None), Err(SocketError::WouldBlock));
}

#[test]
fn failed_bind_may_be_retried() {
    let (mut net, mut rx) = network(SocketConfig::default());
    let h = net.create(Protocol::Tcp, Security::None).unwrap();
    net.bind(h, 80, |_, _, _| {}).unwrap();
    let call = last_call(&drain(&mut rx), h).unwrap();
    net.dispatch(
        h,
        Event::CallComplete {
            call,
            result: Err(TransportError::new(ErrorCode::AddrInUse, "port 80 in use")),
        },
    )
    .unwrap();

    assert_eq!(net.bind(h, 8080, |_, _, _| {}), Ok(()));
    assert!(matches!(
        drain(&mut rx).last(),
        Some((_, Command::Bind { port: 8080, .. }))
    ));
}

#[test]
fn unknown_completion_is_an_error() {
    let (mut net, _rx) = network(SocketConfig::default());
    let h = net.create(Protocol::Udp, Security::None).unwrap();
    let call = CallId(4242);
    assert_eq!(
        net.dispatch(
            h,
            Event::CallComplete {
                call,
                result: Ok(Completion::Done)
            }
        ),
        Err(DispatchError::UnknownCall { handle: h, call })
    );
}

#[test]
fn accepted_event_on_non_listener_is_an_error() {
    let (mut net, _rx) = network(SocketConfig::default());
    let h = net.create(Protocol::Tcp, Security::None).unwrap();
    assert_eq!(
        net.dispatch(h, Event::Accepted { peer: peer(), token: 1 }),
        Err(DispatchError::NotListening {
            handle: h,
            state: SocketState::Closed
        })
    );
}

#[test]
fn configured_timeouts_are_pushed_to_stream_sockets() {
    let config = SocketConfig::default()
        .with_connection_timeout(Duration::from_secs(5))
        .with_shutdown_timeout(Duration::from_millis(250));
    let (mut net, mut rx) = network(config);

    let tcp = net.create(Protocol::Tcp, Security::None).unwrap();
    let values: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|(_, cmd)| match cmd {
            Command::SetOption { option, value, .. } => Some((option, value)),
            _ => None,
        })
        .collect();
    assert_eq!(
        values,
        vec![
            (socket_bridge::SocketOption::ConnectionTimeout, 5000),
            (socket_bridge::SocketOption::ShutdownTimeout, 250),
        ]
    );
    assert_eq!(net.socket(tcp).unwrap().pending_calls(), 2);

    net.create(Protocol::Udp, Security::None).unwrap();
    assert!(drain(&mut rx)
        .iter()
        .all(|(_, cmd)| matches!(cmd, Command::Create { .. })));
}

#[test]
fn closed_handle_is_never_reused() {
    let (mut net, _rx) = network(SocketConfig::default());
    let a = net.create(Protocol::Tcp, Security::None).unwrap();
    net.close(a).unwrap();
    let b = net.create(Protocol::Tcp, Security::None).unwrap();
    assert_ne!(a, b);
    assert_eq!(net.close(a), Err(SocketError::InvalidHandle(a)));
    assert_eq!(net.state(b), SocketState::Closed);
    assert_eq!(net.len(), 1);
}

#[test]
fn datagram_only_and_stream_only_operations_are_not_supported() {
    let (mut net, _rx) = network(SocketConfig::default());
    let udp = net.create(Protocol::Udp, Security::None).unwrap();
    let tcp = net.create(Protocol::Tcp, Security::None).unwrap();

    assert!(matches!(net.listen(udp), Err(SocketError::NotSupported(_))));
    assert!(matches!(
        net.add_membership(tcp, "239.1.2.3", Default::default(), |_, _, _| {}),
        Err(SocketError::NotSupported(_))
    ));
    assert!(matches!(
        net.set_option(udp, socket_bridge::SocketOption::NoDelay, 1, |_, _, _| {}),
        Err(SocketError::NotSupported(_))
    ));
    assert!(matches!(
        net.create(Protocol::Udp, Security::Tls),
        Err(SocketError::NotSupported(_))
    ));
    assert_eq!(
        net.drop_membership(udp, "", |_, _, _| {}),
        Err(SocketError::Invalid("empty multicast group"))
    );
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn send_credit_stays_within_bounds() {
    const MAX: usize = 1000;
    let mut rng = rand::rng();
    for _ in 0..50 {
        let (mut net, _rx) = network(SocketConfig::default().with_max_send_credit(MAX));
        let h = connected_tcp(&mut net);
        let mut in_flight = 0usize;

        for _ in 0..200 {
            if rng.random_bool(0.5) {
                let mut buf = vec![0u8; rng.random_range(0..600)];
                in_flight += net.send(h, &mut buf, None, None).unwrap();
            } else {
                // The transport may report more than was outstanding.
                let flushed = rng.random_range(0..=in_flight + 50);
                in_flight = in_flight.saturating_sub(flushed);
                net.dispatch(h, Event::Credit { flushed }).unwrap();
            }
            let credit = net.writable_len(h).unwrap();
            assert!(credit <= MAX, "credit {credit} above {MAX}");
        }
    }
}

#[test]
fn datagrams_are_received_whole() {
    let mut rng = rand::rng();
    let (mut net, _rx) = network(SocketConfig::default());
    let h = net.create(Protocol::Udp, Security::None).unwrap();
    net.connect(h, peer()).unwrap();
    net.dispatch(
        h,
        Event::Connected {
            local: local(),
            peer: peer(),
        },
    )
    .unwrap();

    let sizes: Vec<usize> = (0..100).map(|_| rng.random_range(1..1500)).collect();
    for (i, &n) in sizes.iter().enumerate() {
        net.dispatch(
            h,
            Event::Data {
                payload: vec![i as u8; n],
                source: Some(peer()),
            },
        )
        .unwrap();
    }

    for (i, &n) in sizes.iter().enumerate() {
        assert_eq!(net.readable_len(h), Ok(n));
        let mut buf = Vec::new();
        let cap = rng.random_range(0..2000);
        let (len, source) = net.recv_from(h, &mut buf, Some(cap)).unwrap();
        assert_eq!(len, n);
        assert_eq!(buf, vec![i as u8; n]);
        assert_eq!(source, Some(peer()));
    }
    assert_eq!(net.recv(h, &mut Vec::new(), None), Err(SocketError::WouldBlock));
}

/// Drive a fresh socket of `protocol` into `target`, with some data queued
/// where the state allows it.
fn socket_in(net: &mut Network, protocol: Protocol, target: SocketState) -> Handle {
    let h = net.create(protocol, Security::None).unwrap();
    match target {
        SocketState::Closed => {}
        SocketState::Listening => net.listen(h).unwrap(),
        SocketState::Connecting => net.connect(h, peer()).unwrap(),
        SocketState::Ready | SocketState::Closing => {
            net.connect(h, peer()).unwrap();
            net.dispatch(
                h,
                Event::Connected {
                    local: local(),
                    peer: peer(),
                },
            )
            .unwrap();
            let source = (protocol == Protocol::Udp).then(peer);
            net.dispatch(
                h,
                Event::Data {
                    payload: b"queued".to_vec(),
                    source,
                },
            )
            .unwrap();
            if target == SocketState::Closing {
                net.shutdown(h).unwrap();
            }
        }
    }
    assert_eq!(net.state(h), target);
    h
}

fn attempt(net: &mut Network, h: Handle, op: Operation) -> Result<(), SocketError> {
    match op {
        Operation::Bind => net.bind(h, 0, |_, _, _| {}),
        Operation::Connect => net.connect(h, peer()),
        Operation::Listen => net.listen(h),
        Operation::Accept => net.accept(h).map(|_| ()),
        Operation::Send => {
            let mut buf = b"payload".to_vec();
            net.send(h, &mut buf, None, Some(&peer())).map(|_| ())
        }
        Operation::Recv => net.recv(h, &mut Vec::new(), None).map(|_| ()),
        Operation::Shutdown => net.shutdown(h),
        Operation::Close => net.close(h),
    }
}

#[test]
fn illegal_operations_change_nothing() {
    let ops = [
        Operation::Bind,
        Operation::Connect,
        Operation::Listen,
        Operation::Accept,
        Operation::Send,
        Operation::Recv,
        Operation::Shutdown,
    ];
    let cases = [
        (Protocol::Tcp, SocketState::Closed),
        (Protocol::Tcp, SocketState::Connecting),
        (Protocol::Tcp, SocketState::Listening),
        (Protocol::Tcp, SocketState::Ready),
        (Protocol::Tcp, SocketState::Closing),
        (Protocol::Udp, SocketState::Closed),
        (Protocol::Udp, SocketState::Connecting),
        (Protocol::Udp, SocketState::Ready),
    ];

    for (protocol, target) in cases {
        for op in ops {
            if state::check(protocol, target, op).is_ok() {
                continue;
            }
            let (mut net, mut rx) = network(SocketConfig::default());
            let h = socket_in(&mut net, protocol, target);
            drain(&mut rx);
            let before = (net.writable_len(h), net.readable_len(h), net.peer_addr(h));

            assert!(
                attempt(&mut net, h, op).is_err(),
                "{op} should fail on {protocol:?} in {target}"
            );
            assert_eq!(net.state(h), target, "{op} moved {protocol:?} out of {target}");
            assert_eq!(
                (net.writable_len(h), net.readable_len(h), net.peer_addr(h)),
                before,
                "{op} touched buffers of {protocol:?} in {target}"
            );
            assert!(drain(&mut rx).is_empty(), "{op} reached the transport");
        }
    }

    // A second bind is illegal while the first is in flight and after it
    // succeeded, even though the state is still `Closed`.
    for protocol in [Protocol::Tcp, Protocol::Udp] {
        let (mut net, mut rx) = network(SocketConfig::default());
        let h = net.create(protocol, Security::None).unwrap();
        net.bind(h, 5000, |_, _, _| {}).unwrap();
        let call = last_call(&drain(&mut rx), h).unwrap();

        let second = attempt(&mut net, h, Operation::Bind);
        assert_eq!(
            second,
            Err(SocketError::InvalidState {
                op: Operation::Bind,
                state: SocketState::Closed
            })
        );
        assert!(drain(&mut rx).is_empty(), "second bind reached the transport");

        net.dispatch(
            h,
            Event::CallComplete {
                call,
                result: Ok(Completion::Bound(local())),
            },
        )
        .unwrap();
        let state = net.state(h);
        let before = (net.writable_len(h), net.readable_len(h), net.local_addr(h));
        assert!(attempt(&mut net, h, Operation::Bind).is_err());
        assert_eq!(net.state(h), state);
        assert_eq!((net.writable_len(h), net.readable_len(h), net.local_addr(h)), before);
        assert!(drain(&mut rx).is_empty(), "bind after bind reached the transport");
    }
}
