//! Typed requests and replies.
//!
//! Raw messages are decoded into [`Request`] once, at the dispatch boundary.
//! Every request except `Init` and `Immediate` names its sender in word 0.

use crate::Message;
use core_types::{ClientId, Word};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Message labels understood by the synchronization server.
///
/// Label 0 is the null label and never names a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageLabel {
    /// First contact; registers the client and arrives at the barrier.
    Init,
    /// Enter the gate, blocking until it is free.
    Wait,
    /// Hand the gate to the next waiter and queue up again.
    SendWait,
    /// Put one item into the bounded buffer.
    Producer,
    /// Take one item out of the bounded buffer.
    Consumer,
    /// The client is done; no reply is expected.
    Terminate,
    /// Diagnostic no-op.
    Immediate,
}

impl MessageLabel {
    /// Every label, in wire order.
    pub const ALL: [MessageLabel; 7] = [
        MessageLabel::Init,
        MessageLabel::Wait,
        MessageLabel::SendWait,
        MessageLabel::Producer,
        MessageLabel::Consumer,
        MessageLabel::Terminate,
        MessageLabel::Immediate,
    ];

    /// Returns the wire value of this label.
    pub const fn as_word(self) -> Word {
        match self {
            MessageLabel::Init => 1,
            MessageLabel::Wait => 2,
            MessageLabel::SendWait => 3,
            MessageLabel::Producer => 4,
            MessageLabel::Consumer => 5,
            MessageLabel::Terminate => 6,
            MessageLabel::Immediate => 7,
        }
    }

    /// Parses a wire label.
    pub fn from_word(raw: Word) -> Option<Self> {
        Self::ALL.into_iter().find(|label| label.as_word() == raw)
    }

    /// Short upper-case name, as used in logs and statistics.
    pub const fn name(self) -> &'static str {
        match self {
            MessageLabel::Init => "INIT",
            MessageLabel::Wait => "WAIT",
            MessageLabel::SendWait => "SEND_WAIT",
            MessageLabel::Producer => "PRODUCER",
            MessageLabel::Consumer => "CONSUMER",
            MessageLabel::Terminate => "TMNT",
            MessageLabel::Immediate => "IMMD",
        }
    }
}

impl fmt::Display for MessageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised while decoding a raw message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown message label {0}")]
    UnknownLabel(Word),

    #[error("{label} is missing argument word {index}")]
    MissingWord { label: MessageLabel, index: usize },

    #[error("{label} names client word {word}, which is outside the client id space")]
    InvalidClient { label: MessageLabel, word: Word },
}

/// A decoded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Init,
    Wait { client: ClientId },
    SendWait { client: ClientId, seq: Option<Word> },
    Producer { client: ClientId },
    Consumer { client: ClientId },
    Terminate { client: ClientId },
    Immediate,
}

impl Request {
    /// Decodes a raw message.
    pub fn decode(message: &Message) -> Result<Self, DecodeError> {
        let label = MessageLabel::from_word(message.label())
            .ok_or(DecodeError::UnknownLabel(message.label()))?;

        let client = || -> Result<ClientId, DecodeError> {
            let word = message
                .word(0)
                .ok_or(DecodeError::MissingWord { label, index: 0 })?;
            ClientId::from_word(word).ok_or(DecodeError::InvalidClient { label, word })
        };

        Ok(match label {
            MessageLabel::Init => Request::Init,
            MessageLabel::Wait => Request::Wait { client: client()? },
            MessageLabel::SendWait => Request::SendWait {
                client: client()?,
                seq: message.word(1),
            },
            MessageLabel::Producer => Request::Producer { client: client()? },
            MessageLabel::Consumer => Request::Consumer { client: client()? },
            MessageLabel::Terminate => Request::Terminate { client: client()? },
            MessageLabel::Immediate => Request::Immediate,
        })
    }

    /// Encodes this request as a raw message (the client side of the protocol).
    pub fn encode(&self) -> Message {
        let label = self.label().as_word();
        let words: Vec<Word> = match *self {
            Request::Init | Request::Immediate => Vec::new(),
            Request::SendWait {
                client,
                seq: Some(seq),
            } => vec![client.as_word(), seq],
            Request::Wait { client }
            | Request::SendWait { client, seq: None }
            | Request::Producer { client }
            | Request::Consumer { client }
            | Request::Terminate { client } => vec![client.as_word()],
        };
        // At most two words, always within the envelope.
        Message::new(label, &words).unwrap_or_else(|_| Message::empty(label))
    }

    /// Returns the label this request travels under.
    pub fn label(&self) -> MessageLabel {
        match self {
            Request::Init => MessageLabel::Init,
            Request::Wait { .. } => MessageLabel::Wait,
            Request::SendWait { .. } => MessageLabel::SendWait,
            Request::Producer { .. } => MessageLabel::Producer,
            Request::Consumer { .. } => MessageLabel::Consumer,
            Request::Terminate { .. } => MessageLabel::Terminate,
            Request::Immediate => MessageLabel::Immediate,
        }
    }

    /// Returns the client that sent this request, when the request names one.
    pub fn client(&self) -> Option<ClientId> {
        match *self {
            Request::Init | Request::Immediate => None,
            Request::Wait { client }
            | Request::SendWait { client, .. }
            | Request::Producer { client }
            | Request::Consumer { client }
            | Request::Terminate { client } => Some(client),
        }
    }
}

/// Reply builders.
pub mod replies {
    use super::MessageLabel;
    use crate::Message;
    use core_types::ClientId;

    fn two_words(label: MessageLabel, first: u64, second: u64) -> Message {
        Message::new(label.as_word(), &[first, second])
            .unwrap_or_else(|_| Message::empty(label.as_word()))
    }

    /// Barrier release for client 0: `INIT (0, 1)`.
    pub fn initiator_release() -> Message {
        two_words(MessageLabel::Init, 0, 1)
    }

    /// "Ready" multicast payload for `client`: `INIT (index, 1)`.
    pub fn ready(client: ClientId) -> Message {
        two_words(MessageLabel::Init, client.as_word(), 1)
    }

    /// Completion reply for a request: the request label echoed, word 0 = client.
    pub fn completion(label: MessageLabel, client: ClientId) -> Message {
        Message::new(label.as_word(), &[client.as_word()])
            .unwrap_or_else(|_| Message::empty(label.as_word()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_wire_values_roundtrip() {
        for label in MessageLabel::ALL {
            assert_eq!(MessageLabel::from_word(label.as_word()), Some(label));
        }
        assert_eq!(MessageLabel::from_word(0), None);
        assert_eq!(MessageLabel::from_word(99), None);
    }

    #[test]
    fn test_decode_init_needs_no_words() {
        let msg = Message::empty(MessageLabel::Init.as_word());
        assert_eq!(Request::decode(&msg), Ok(Request::Init));
    }

    #[test]
    fn test_decode_producer() {
        let msg = Message::new(MessageLabel::Producer.as_word(), &[3]).unwrap();
        assert_eq!(
            Request::decode(&msg),
            Ok(Request::Producer {
                client: ClientId::new(3)
            })
        );
    }

    #[test]
    fn test_decode_send_wait_sequence() {
        let msg = Message::new(MessageLabel::SendWait.as_word(), &[1, 42]).unwrap();
        assert_eq!(
            Request::decode(&msg),
            Ok(Request::SendWait {
                client: ClientId::new(1),
                seq: Some(42)
            })
        );
    }

    #[test]
    fn test_decode_unknown_label() {
        let msg = Message::empty(55);
        assert_eq!(Request::decode(&msg), Err(DecodeError::UnknownLabel(55)));
    }

    #[test]
    fn test_decode_missing_client_word() {
        let msg = Message::empty(MessageLabel::Wait.as_word());
        assert_eq!(
            Request::decode(&msg),
            Err(DecodeError::MissingWord {
                label: MessageLabel::Wait,
                index: 0
            })
        );
    }

    #[test]
    fn test_decode_oversized_client_word() {
        let msg = Message::new(MessageLabel::Consumer.as_word(), &[u64::MAX]).unwrap();
        assert!(matches!(
            Request::decode(&msg),
            Err(DecodeError::InvalidClient { .. })
        ));
    }

    #[test]
    fn test_encode_then_decode() {
        let requests = [
            Request::Init,
            Request::Wait {
                client: ClientId::new(2),
            },
            Request::SendWait {
                client: ClientId::new(2),
                seq: Some(8),
            },
            Request::Terminate {
                client: ClientId::new(0),
            },
        ];
        for request in requests {
            assert_eq!(Request::decode(&request.encode()), Ok(request));
        }
    }

    #[test]
    fn test_request_client() {
        assert_eq!(Request::Init.client(), None);
        assert_eq!(
            Request::Consumer {
                client: ClientId::new(4)
            }
            .client(),
            Some(ClientId::new(4))
        );
    }

    #[test]
    fn test_reply_payloads() {
        let release = replies::initiator_release();
        assert_eq!(release.label(), MessageLabel::Init.as_word());
        assert_eq!(release.words(), &[0, 1]);

        let ready = replies::ready(ClientId::new(2));
        assert_eq!(ready.words(), &[2, 1]);

        let done = replies::completion(MessageLabel::Producer, ClientId::new(5));
        assert_eq!(done.label(), MessageLabel::Producer.as_word());
        assert_eq!(done.words(), &[5]);
    }
}
