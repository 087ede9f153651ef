//! Bounded Buffer Tests
//!
//! Validates producer/consumer coordination for every primitive and reply
//! strategy:
//! - Occupancy follows the expected trace when a producer blocks
//! - A blocked consumer is served before any later producer
//! - Parked clients wake in arrival order

use core_types::CallerId;
use ipc::{MessageLabel, Request};
use services_sync::{Queue, ReplyStrategy, ServerConfig};
use sim_kernel::delivery_audit::{Delivery, DeliveryRoute};
use tests_sync::{drain, released_server, ALL_PRIMITIVES, ALL_STRATEGIES};

fn completion_index(deliveries: &[Delivery], caller: CallerId, label: MessageLabel) -> Option<usize> {
    deliveries
        .iter()
        .position(|d| d.caller == caller && d.message.label() == label.as_word())
}

#[test]
fn test_blocked_producer_resumes_after_consume() {
    for primitive in ALL_PRIMITIVES {
        for strategy in ALL_STRATEGIES {
            let config = ServerConfig {
                population: 3,
                primitive,
                reply_strategy: strategy,
                buffer_capacity: 1,
                trace_occupancy: true,
                ..ServerConfig::default()
            };
            let (mut server, clients) = released_server(config);

            clients.produce(server.kernel_mut(), 0);
            clients.produce(server.kernel_mut(), 1);
            drain(&mut server).unwrap();
            assert!(server.state().registry().is_parked(clients.client(1)));
            assert_eq!(server.state().primitive().waiting(Queue::NotFull), 1);

            clients.consume(server.kernel_mut(), 2);
            drain(&mut server).unwrap();
            assert!(!server.state().registry().is_parked(clients.client(1)));
            assert_eq!(server.state().buffer().trace(), Some(&[0, 1, 0, 1][..]));

            clients.terminate_all(server.kernel_mut());
            let summary = drain(&mut server).unwrap().unwrap();
            assert_eq!(summary.final_occupancy, 1);
            assert_eq!(summary.occupancy_trace, Some(vec![0, 1, 0, 1]));
            assert_eq!(summary.stats.parks, 1);
            assert_eq!(summary.stats.wakeups, 1);

            let deliveries = server.kernel().deliveries().all();
            let producer = completion_index(deliveries, clients.caller(1), MessageLabel::Producer)
                .unwrap();
            let consumer = completion_index(deliveries, clients.caller(2), MessageLabel::Consumer)
                .unwrap();
            assert!(producer < consumer, "{:?}/{:?}", primitive, strategy);
            assert!(matches!(deliveries[producer].route, DeliveryRoute::Slot(_)));

            let expected_route = match strategy {
                ReplyStrategy::Fast => Some(DeliveryRoute::ReplyRecv),
                ReplyStrategy::Slow => Some(DeliveryRoute::Reply),
                ReplyStrategy::Saved => None,
            };
            match expected_route {
                Some(route) => assert_eq!(deliveries[consumer].route, route),
                None => assert!(matches!(deliveries[consumer].route, DeliveryRoute::Slot(_))),
            }
        }
    }
}

#[test]
fn test_no_lost_wakeup() {
    for primitive in ALL_PRIMITIVES {
        for strategy in ALL_STRATEGIES {
            let config = ServerConfig {
                population: 2,
                primitive,
                reply_strategy: strategy,
                buffer_capacity: 1,
                ..ServerConfig::default()
            };
            let (mut server, clients) = released_server(config);

            clients.consume(server.kernel_mut(), 1);
            drain(&mut server).unwrap();
            assert!(server.state().registry().is_parked(clients.client(1)));

            clients.produce(server.kernel_mut(), 0);
            server.step().unwrap();
            // The consumer is answered within the producer's own step.
            assert!(!server.state().registry().is_parked(clients.client(1)));
            assert_eq!(server.state().buffer().occupancy(), 0);
            let deliveries = server.kernel().deliveries().all();
            assert!(
                completion_index(deliveries, clients.caller(1), MessageLabel::Consumer).is_some()
            );

            clients.produce(server.kernel_mut(), 0);
            drain(&mut server).unwrap();
            assert_eq!(server.state().buffer().occupancy(), 1);
        }
    }
}

#[test]
fn test_consumers_wake_in_arrival_order() {
    for primitive in ALL_PRIMITIVES {
        let config = ServerConfig {
            population: 3,
            primitive,
            ..ServerConfig::default()
        };
        let (mut server, clients) = released_server(config);

        clients.consume(server.kernel_mut(), 2);
        clients.consume(server.kernel_mut(), 1);
        clients.produce(server.kernel_mut(), 0);
        drain(&mut server).unwrap();

        assert!(!server.state().registry().is_parked(clients.client(2)));
        assert!(server.state().registry().is_parked(clients.client(1)));

        clients.produce(server.kernel_mut(), 0);
        drain(&mut server).unwrap();

        let deliveries = server.kernel().deliveries().all();
        let first = completion_index(deliveries, clients.caller(2), MessageLabel::Consumer);
        let second = completion_index(deliveries, clients.caller(1), MessageLabel::Consumer);
        assert!(first.unwrap() < second.unwrap());
        assert_eq!(server.state().buffer().occupancy(), 0);
    }
}

#[test]
fn test_larger_buffer_absorbs_producers() {
    let config = ServerConfig {
        population: 2,
        buffer_capacity: 3,
        trace_occupancy: true,
        ..ServerConfig::default()
    };
    let (mut server, clients) = released_server(config);
    for _ in 0..3 {
        clients.produce(server.kernel_mut(), 0);
    }
    clients.produce(server.kernel_mut(), 1);
    drain(&mut server).unwrap();

    assert_eq!(server.state().buffer().occupancy(), 3);
    assert!(server.state().registry().is_parked(clients.client(1)));
    assert_eq!(server.state().stats().parks, 1);

    clients.consume(server.kernel_mut(), 0);
    drain(&mut server).unwrap();
    assert_eq!(server.state().buffer().trace(), Some(&[0, 1, 2, 3, 2, 3][..]));
}

#[test]
fn test_request_from_parked_client_is_dropped() {
    let (mut server, clients) = released_server(ServerConfig::with_population(2));
    clients.consume(server.kernel_mut(), 1);
    clients.call(
        server.kernel_mut(),
        1,
        Request::Producer {
            client: clients.client(1),
        },
    );
    drain(&mut server).unwrap();

    assert_eq!(server.state().stats().violations, 1);
    assert_eq!(server.state().buffer().occupancy(), 0);
    assert!(server.state().registry().is_parked(clients.client(1)));
}
