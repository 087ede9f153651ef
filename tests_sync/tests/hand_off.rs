//! Gate Hand-off Tests
//!
//! Validates WAIT / SEND_WAIT coordination:
//! - A free gate is entered immediately
//! - SEND_WAIT passes the gate to the longest waiter before re-queueing
//! - Out-of-order requests are dropped without disturbing the gate

use ipc::{MessageLabel, Request};
use services_sync::{Queue, ServerConfig};
use sim_kernel::delivery_audit::DeliveryRoute;
use sim_kernel::test_utils::ScriptedClients;
use tests_sync::{drain, released_server, variant_config, TestServer, ALL_PRIMITIVES, ALL_STRATEGIES};

fn wait(server: &mut TestServer, clients: &ScriptedClients, index: usize) {
    clients.call(
        server.kernel_mut(),
        index,
        Request::Wait {
            client: clients.client(index),
        },
    );
}

fn send_wait(server: &mut TestServer, clients: &ScriptedClients, index: usize, seq: u64) {
    clients.call(
        server.kernel_mut(),
        index,
        Request::SendWait {
            client: clients.client(index),
            seq: Some(seq),
        },
    );
}

#[test]
fn test_gate_rotates_through_waiters() {
    for primitive in ALL_PRIMITIVES {
        for strategy in ALL_STRATEGIES {
            let (mut server, clients) = released_server(variant_config(3, primitive, strategy));
            for index in 0..3 {
                wait(&mut server, &clients, index);
            }
            drain(&mut server).unwrap();
            assert_eq!(server.state().gate_holder(), Some(clients.client(0)));
            assert_eq!(server.state().primitive().waiting(Queue::Gate), 2);

            send_wait(&mut server, &clients, 0, 1);
            drain(&mut server).unwrap();
            assert_eq!(server.state().gate_holder(), Some(clients.client(1)));

            send_wait(&mut server, &clients, 1, 1);
            drain(&mut server).unwrap();
            assert_eq!(server.state().gate_holder(), Some(clients.client(2)));

            send_wait(&mut server, &clients, 2, 1);
            drain(&mut server).unwrap();
            assert_eq!(server.state().gate_holder(), Some(clients.client(0)));

            let last = server.kernel().deliveries().to_caller(clients.caller(0));
            let last = last.last().unwrap();
            assert_eq!(last.message.label(), MessageLabel::SendWait.as_word());
            assert_eq!(last.message.words(), &[0]);
            assert!(matches!(last.route, DeliveryRoute::Slot(_)));
            assert_eq!(server.state().stats().violations, 0);
        }
    }
}

#[test]
fn test_send_wait_alone_reenters() {
    for primitive in ALL_PRIMITIVES {
        let (mut server, clients) = released_server(variant_config(
            1,
            primitive,
            services_sync::ReplyStrategy::Slow,
        ));
        wait(&mut server, &clients, 0);
        send_wait(&mut server, &clients, 0, 1);
        send_wait(&mut server, &clients, 0, 2);
        drain(&mut server).unwrap();

        assert_eq!(server.state().gate_holder(), Some(clients.client(0)));
        assert_eq!(server.state().stats().parks, 0);
        let replies = server.kernel().deliveries().to_caller(clients.caller(0));
        assert_eq!(replies.len(), 4);
        assert!(matches!(replies[1].route, DeliveryRoute::Slot(_)));
        assert!(replies[2..].iter().all(|d| d.route == DeliveryRoute::Reply));
    }
}

#[test]
fn test_woken_waiter_answered_before_sender_requeues() {
    let (mut server, clients) = released_server(ServerConfig::with_population(2));
    wait(&mut server, &clients, 0);
    wait(&mut server, &clients, 1);
    send_wait(&mut server, &clients, 0, 7);
    drain(&mut server).unwrap();

    assert!(server.state().registry().is_parked(clients.client(0)));
    let to_waiter = server.kernel().deliveries().to_caller(clients.caller(1));
    assert_eq!(
        to_waiter.last().unwrap().message.label(),
        MessageLabel::Wait.as_word()
    );
    // The sender's caller now sits in a slot, waiting for the gate to return.
    assert_eq!(server.kernel().saved_callers(), vec![clients.caller(0)]);
}

#[test]
fn test_send_wait_before_wait_is_dropped() {
    let (mut server, clients) = released_server(ServerConfig::with_population(2));
    send_wait(&mut server, &clients, 1, 1);
    drain(&mut server).unwrap();
    assert_eq!(server.state().stats().violations, 1);
    assert_eq!(server.state().gate_holder(), None);

    wait(&mut server, &clients, 0);
    send_wait(&mut server, &clients, 1, 2);
    drain(&mut server).unwrap();
    assert_eq!(server.state().stats().violations, 2);
    assert_eq!(server.state().gate_holder(), Some(clients.client(0)));
}

#[test]
fn test_wait_while_holding_is_dropped() {
    let (mut server, clients) = released_server(ServerConfig::with_population(1));
    wait(&mut server, &clients, 0);
    wait(&mut server, &clients, 0);
    drain(&mut server).unwrap();
    assert_eq!(server.state().stats().violations, 1);
    assert_eq!(server.state().primitive().waiting(Queue::Gate), 0);
}

#[test]
fn test_terminating_holder_passes_gate() {
    for primitive in ALL_PRIMITIVES {
        let (mut server, clients) = released_server(variant_config(
            3,
            primitive,
            services_sync::ReplyStrategy::Fast,
        ));
        for index in 0..3 {
            wait(&mut server, &clients, index);
        }
        clients.terminate(server.kernel_mut(), 0);
        drain(&mut server).unwrap();
        assert_eq!(server.state().gate_holder(), Some(clients.client(1)));

        clients.terminate(server.kernel_mut(), 1);
        drain(&mut server).unwrap();
        assert_eq!(server.state().gate_holder(), Some(clients.client(2)));

        clients.terminate(server.kernel_mut(), 2);
        let summary = drain(&mut server).unwrap().unwrap();
        assert_eq!(server.state().gate_holder(), None);
        assert_eq!(summary.stats.wakeups, 2);
    }
}
