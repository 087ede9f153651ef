//! Server configuration
//!
//! Variant selection happens here, at configuration time: which
//! synchronization primitive backs the coordination policy, how fast-path
//! replies are executed, and when the "ready" multicast goes out.

use crate::ServerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Population of the original benchmark run
pub const DEFAULT_POPULATION: usize = 6;

/// Fixed upper bound on registered clients
pub const DEFAULT_CLIENT_CAPACITY: usize = 32;

/// Which synchronization primitive implements the coordination policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    /// Lock plus manual sleep/wakeup lists
    #[default]
    Mutex,
    /// Binary semaphore for exclusion, counting semaphores as wait queues
    Semaphore,
    /// Condition variables under a companion binary-semaphore lock
    #[serde(rename = "condvar")]
    CondVar,
}

/// How a `NextIsReply` directive is carried out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStrategy {
    /// Fold the reply into the next receive (reply-then-receive)
    #[default]
    Fast,
    /// Reply, then receive, as two operations
    Slow,
    /// Save the caller, send through the saved slot, then receive
    Saved,
}

/// When clients other than client 0 are released from the barrier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MulticastTrigger {
    /// As soon as the barrier fires
    #[default]
    Barrier,
    /// On client 0's first WAIT
    InitiatorWait,
}

macro_rules! str_enum {
    ($ty:ty, $what:literal, { $($name:literal => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = ServerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($variant),)+
                    other => Err(ServerError::InvalidConfig(format!(
                        concat!("unknown ", $what, ": {}"),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                $(if *self == $variant {
                    return f.write_str($name);
                })+
                Ok(())
            }
        }
    };
}

str_enum!(PrimitiveKind, "primitive", {
    "mutex" => PrimitiveKind::Mutex,
    "semaphore" => PrimitiveKind::Semaphore,
    "condvar" => PrimitiveKind::CondVar,
});

str_enum!(ReplyStrategy, "reply strategy", {
    "fast" => ReplyStrategy::Fast,
    "slow" => ReplyStrategy::Slow,
    "saved" => ReplyStrategy::Saved,
});

str_enum!(MulticastTrigger, "multicast trigger", {
    "barrier" => MulticastTrigger::Barrier,
    "initiator_wait" => MulticastTrigger::InitiatorWait,
});

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Expected number of clients; the barrier fires when this many arrive
    pub population: usize,
    /// Hard limit on registrations
    pub client_capacity: usize,
    /// Bounded buffer capacity for producer/consumer runs
    pub buffer_capacity: usize,
    pub primitive: PrimitiveKind,
    pub reply_strategy: ReplyStrategy,
    pub multicast: MulticastTrigger,
    /// Record every buffer occupancy change
    pub trace_occupancy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            population: DEFAULT_POPULATION,
            client_capacity: DEFAULT_CLIENT_CAPACITY,
            buffer_capacity: 1,
            primitive: PrimitiveKind::default(),
            reply_strategy: ReplyStrategy::default(),
            multicast: MulticastTrigger::default(),
            trace_occupancy: false,
        }
    }
}

impl ServerConfig {
    /// Creates a default configuration for `population` clients
    pub fn with_population(population: usize) -> Self {
        Self {
            population,
            ..Self::default()
        }
    }

    /// Parses a JSON configuration; absent fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ServerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ServerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the server cannot run with
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.population == 0 {
            return Err(ServerError::InvalidConfig(
                "population must be at least 1".to_string(),
            ));
        }
        if self.population > self.client_capacity {
            return Err(ServerError::InvalidConfig(format!(
                "population {} exceeds client capacity {}",
                self.population, self.client_capacity
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(ServerError::InvalidConfig(
                "buffer capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
