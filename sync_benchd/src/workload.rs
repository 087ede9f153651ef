//! Benchmark client workloads
//!
//! Each simulated client registers with `INIT`, learns its id from the
//! release message, and then works through a fixed plan, issuing the next
//! request as soon as the previous one is answered.

use core_types::{CallerId, ClientId, Word};
use ipc::{Message, MessageLabel, Request};
use serde::{Deserialize, Serialize};
use sim_kernel::{ClientDriver, Outgoing};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// What the simulated clients do once released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workload {
    /// Even clients produce, odd clients consume
    #[default]
    ProducerConsumer,
    /// One `WAIT`, then repeated `SEND_WAIT` hand-offs
    HandOff,
}

impl FromStr for Workload {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "producer_consumer" => Ok(Workload::ProducerConsumer),
            "hand_off" => Ok(Workload::HandOff),
            other => Err(format!("Invalid workload: {}", other)),
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Workload::ProducerConsumer => f.write_str("producer_consumer"),
            Workload::HandOff => f.write_str("hand_off"),
        }
    }
}

impl Workload {
    /// Builds the request plan for `client` in a run of `population`
    ///
    /// `initiator_waits` prefixes client 0's plan with a `WAIT`, which is
    /// what releases its peers when the multicast is tied to that request.
    pub fn plan(
        self,
        client: ClientId,
        population: usize,
        iterations: usize,
        initiator_waits: bool,
    ) -> VecDeque<Request> {
        let mut plan = VecDeque::new();
        let index = client.as_usize();

        match self {
            Workload::ProducerConsumer => {
                if initiator_waits && index == 0 {
                    plan.push_back(Request::Wait { client });
                }
                let unpaired = population % 2 == 1 && index == population - 1;
                if !unpaired {
                    let request = if index % 2 == 0 {
                        Request::Producer { client }
                    } else {
                        Request::Consumer { client }
                    };
                    plan.extend(std::iter::repeat(request).take(iterations));
                }
            }
            Workload::HandOff => {
                plan.push_back(Request::Wait { client });
                plan.extend((1..=iterations).map(|seq| Request::SendWait {
                    client,
                    seq: Some(seq as Word),
                }));
            }
        }

        plan.push_back(Request::Terminate { client });
        plan
    }
}

fn outgoing(request: Request) -> Outgoing {
    match request {
        Request::Terminate { .. } => Outgoing::Send(request.encode()),
        _ => Outgoing::Call(request.encode()),
    }
}

/// Plays every benchmark client on the simulated kernel
#[derive(Debug)]
pub struct WorkloadDriver {
    workload: Workload,
    population: usize,
    iterations: usize,
    initiator_waits: bool,
    plans: HashMap<CallerId, VecDeque<Request>>,
}

impl WorkloadDriver {
    pub fn new(workload: Workload, population: usize, iterations: usize) -> Self {
        Self {
            workload,
            population,
            iterations,
            initiator_waits: false,
            plans: HashMap::new(),
        }
    }

    /// Makes client 0 open with a `WAIT`
    pub fn with_initiator_wait(mut self) -> Self {
        self.initiator_waits = true;
        self
    }

    fn next_request(&mut self, caller: CallerId) -> Option<Outgoing> {
        self.plans
            .get_mut(&caller)
            .and_then(VecDeque::pop_front)
            .map(outgoing)
    }
}

impl ClientDriver for WorkloadDriver {
    fn start(&mut self) -> Vec<(CallerId, Outgoing)> {
        (0..self.population)
            .map(|i| (CallerId::new(i as u64), Outgoing::Call(Request::Init.encode())))
            .collect()
    }

    fn on_reply(&mut self, caller: CallerId, reply: &Message) -> Option<Outgoing> {
        if reply.label() == MessageLabel::Init.as_word() {
            let client = reply.word(0).and_then(ClientId::from_word)?;
            let plan = self.workload.plan(
                client,
                self.population,
                self.iterations,
                self.initiator_waits,
            );
            self.plans.insert(caller, plan);
        }
        self.next_request(caller)
    }
}
