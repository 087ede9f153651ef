//! Continuation Token Tests
//!
//! Validates reply-token capture and delivery:
//! - Capture then take yields the same slot
//! - Parked clients hold exactly one slot each, released on delivery
//! - Allocator and channel failures surface as fatal errors

use core_types::ClientId;
use ipc::{Message, MessageLabel, Request};
use kernel_api::Endpoint;
use services_sync::{ContinuationStore, ProtocolViolation, ServerConfig, ServerError, SyncServer};
use sim_kernel::fault_injection::FaultPlan;
use sim_kernel::test_utils::ScriptedClients;
use sim_kernel::SimulatedKernel;
use tests_sync::{drain, released_server};

#[test]
fn test_capture_then_take_same_token() {
    let mut kernel = SimulatedKernel::new();
    let caller = kernel.new_caller();
    kernel
        .push_call(caller, Request::Init.encode())
        .unwrap();
    kernel.receive().unwrap();

    let mut store = ContinuationStore::new(8);
    let client = ClientId::new(3);
    let slot = store.capture(&mut kernel, client).unwrap();
    let token = store.take(client).unwrap();
    assert_eq!(token.slot(), slot);
    assert_eq!(token.client(), client);

    assert_eq!(
        store.take(client),
        Err(ServerError::Protocol(ProtocolViolation::NoPendingReply(
            client
        )))
    );

    store
        .deliver(&mut kernel, token, Message::empty(MessageLabel::Init.as_word()))
        .unwrap();
    assert_eq!(kernel.deliveries().to_caller(caller).len(), 1);
    assert_eq!(kernel.slots_in_use(), 0);
}

#[test]
fn test_parked_clients_hold_one_slot_each() {
    let (mut server, clients) = released_server(ServerConfig::with_population(3));
    assert_eq!(server.kernel().slots_in_use(), 0);

    clients.consume(server.kernel_mut(), 1);
    clients.consume(server.kernel_mut(), 2);
    drain(&mut server).unwrap();
    assert_eq!(server.kernel().slots_in_use(), 2);
    assert_eq!(
        server.kernel().saved_callers(),
        vec![clients.caller(1), clients.caller(2)]
    );
    assert_eq!(server.state().continuations().outstanding(), 2);

    clients.produce(server.kernel_mut(), 0);
    drain(&mut server).unwrap();
    assert_eq!(server.kernel().slots_in_use(), 1);
    assert_eq!(server.kernel().saved_callers(), vec![clients.caller(2)]);
}

#[test]
fn test_slot_exhaustion_is_fatal() {
    let mut kernel = SimulatedKernel::new().with_fault_plan(FaultPlan::new().with_slot_limit(1));
    let clients = ScriptedClients::new(&mut kernel, 2);
    clients.init_all(&mut kernel);

    let mut server = SyncServer::new(kernel, ServerConfig::with_population(2)).unwrap();
    let err = server.run().unwrap_err();
    assert!(matches!(err, ServerError::ResourceExhausted(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_save_caller_failure_is_fatal() {
    let mut kernel =
        SimulatedKernel::new().with_fault_plan(FaultPlan::new().with_save_caller_failure_on(2));
    let clients = ScriptedClients::new(&mut kernel, 2);
    clients.init_all(&mut kernel);

    let mut server = SyncServer::new(kernel, ServerConfig::with_population(2)).unwrap();
    let err = server.run().unwrap_err();
    match err {
        ServerError::SaveCaller { client, .. } => assert_eq!(client, ClientId::new(1)),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(server.kernel().slots_in_use(), 1);
}

#[test]
fn test_receive_failure_is_channel_error() {
    let mut kernel =
        SimulatedKernel::new().with_fault_plan(FaultPlan::new().with_receive_failure_on(2));
    let clients = ScriptedClients::new(&mut kernel, 2);
    clients.init_all(&mut kernel);

    let mut server = SyncServer::new(kernel, ServerConfig::with_population(2)).unwrap();
    assert!(matches!(server.run(), Err(ServerError::Channel(_))));
    assert_eq!(server.state().registry().registered(), 1);
}
