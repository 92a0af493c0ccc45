//! Outbound event encoding and delivery.
//!
//! The emitter is responsible for:
//! - expanding an `EdgeDecision` into wire events according to the configured protocol
//! - encoding events as JSON text messages
//! - writing them to the channel only while it is open
//!
//! The emitter MUST NOT:
//! - queue, buffer, or retry events that could not be delivered
//! - open, close, or reconnect the channel

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::gesture::{EdgeDecision, Transition};
use crate::transport::{Channel, ChannelState};

pub const DEFAULT_SHOT_MESSAGE: &str = "dead";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OutboundEvent {
    Shot { position: [f32; 3] },
    Aim { position: [f32; 3] },
    Reset,
    HandPresence { present: bool },
}

/// Wire protocol spoken to the game server.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Protocol {
    /// `{"shoot":bool,"position":[x,y,z]}` per fire, plus aim updates.
    ShootFlag {
        #[serde(default = "default_stream_aim")]
        stream_aim: bool,
    },
    /// `{"message":"dead"}` per fire, optional message on rearm.
    Message {
        #[serde(default = "default_shot_message")]
        shot_message: String,
        #[serde(default)]
        reset_message: Option<String>,
    },
    /// `{"handPresence":bool}` every tick.
    Presence,
}

fn default_stream_aim() -> bool {
    true
}

fn default_shot_message() -> String {
    DEFAULT_SHOT_MESSAGE.to_string()
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::ShootFlag { stream_aim: true }
    }
}

impl FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shoot_flag" | "shoot-flag" | "shoot" => Ok(Protocol::default()),
            "message" => Ok(Protocol::Message {
                shot_message: default_shot_message(),
                reset_message: None,
            }),
            "presence" => Ok(Protocol::Presence),
            other => Err(anyhow!(
                "unknown protocol '{}' (expected shoot_flag, message or presence)",
                other
            )),
        }
    }
}

#[derive(Serialize)]
struct ShootPayload {
    shoot: bool,
    position: [f32; 3],
}

#[derive(Serialize)]
struct MessagePayload<'a> {
    message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresencePayload {
    hand_present: bool,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::ShootFlag { .. } => "shoot_flag",
            Protocol::Message { .. } => "message",
            Protocol::Presence => "presence",
        }
    }

    /// Events to send for one tick's decision, in send order.
    pub fn events(&self, decision: &EdgeDecision) -> Vec<OutboundEvent> {
        match self {
            Protocol::ShootFlag { stream_aim } => match (decision.transition, decision.position) {
                (Transition::Fire, Some(position)) => vec![OutboundEvent::Shot { position }],
                (_, Some(position)) if *stream_aim && decision.hand_present => {
                    vec![OutboundEvent::Aim { position }]
                }
                _ => Vec::new(),
            },
            Protocol::Message { reset_message, .. } => match decision.transition {
                Transition::Fire => vec![OutboundEvent::Shot {
                    position: decision.position.unwrap_or_default(),
                }],
                Transition::Rearm if reset_message.is_some() => vec![OutboundEvent::Reset],
                _ => Vec::new(),
            },
            Protocol::Presence => vec![OutboundEvent::HandPresence {
                present: decision.hand_present,
            }],
        }
    }

    /// Encode one event. `Ok(None)` means this protocol has no wire form for it.
    pub fn encode(&self, event: &OutboundEvent) -> Result<Option<String>> {
        let text = match (self, event) {
            (Protocol::ShootFlag { .. }, OutboundEvent::Shot { position }) => {
                serde_json::to_string(&ShootPayload {
                    shoot: true,
                    position: *position,
                })?
            }
            (Protocol::ShootFlag { .. }, OutboundEvent::Aim { position }) => {
                serde_json::to_string(&ShootPayload {
                    shoot: false,
                    position: *position,
                })?
            }
            (Protocol::Message { shot_message, .. }, OutboundEvent::Shot { .. }) => {
                serde_json::to_string(&MessagePayload {
                    message: shot_message,
                })?
            }
            (
                Protocol::Message {
                    reset_message: Some(reset_message),
                    ..
                },
                OutboundEvent::Reset,
            ) => serde_json::to_string(&MessagePayload {
                message: reset_message,
            })?,
            (Protocol::Presence, OutboundEvent::HandPresence { present }) => {
                serde_json::to_string(&PresencePayload {
                    hand_present: *present,
                })?
            }
            _ => return Ok(None),
        };
        Ok(Some(text))
    }
}

// ----------------------------------------------------------------------------
// Delivery
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    NotReady(ChannelState),
    WriteFailed,
    Unencodable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Dropped(DropReason),
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub sent: u64,
    pub dropped: u64,
}

pub struct EventEmitter {
    protocol: Protocol,
    stats: EmitStats,
    write_failing: bool,
}

impl EventEmitter {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            stats: EmitStats::default(),
            write_failing: false,
        }
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn stats(&self) -> EmitStats {
        self.stats
    }

    /// Send one event if the channel is open. Never retried.
    pub fn emit(&mut self, event: &OutboundEvent, channel: &dyn Channel) -> Delivery {
        let delivery = self.deliver(event, channel);
        match delivery {
            Delivery::Sent => self.stats.sent += 1,
            Delivery::Dropped(reason) => {
                self.stats.dropped += 1;
                log::trace!("dropped {:?}: {:?}", event, reason);
            }
        }
        delivery
    }

    /// Expand a decision into protocol events and emit each.
    pub fn dispatch(
        &mut self,
        decision: &EdgeDecision,
        channel: &dyn Channel,
    ) -> Vec<(OutboundEvent, Delivery)> {
        self.protocol
            .events(decision)
            .into_iter()
            .map(|event| {
                let delivery = self.emit(&event, channel);
                (event, delivery)
            })
            .collect()
    }

    fn deliver(&mut self, event: &OutboundEvent, channel: &dyn Channel) -> Delivery {
        let state = channel.state();
        if state != ChannelState::Open {
            return Delivery::Dropped(DropReason::NotReady(state));
        }

        let text = match self.protocol.encode(event) {
            Ok(Some(text)) => text,
            Ok(None) => return Delivery::Dropped(DropReason::Unencodable),
            Err(e) => {
                log::warn!("failed to encode {:?}: {}", event, e);
                return Delivery::Dropped(DropReason::Unencodable);
            }
        };

        match channel.send_text(&text) {
            Ok(()) => {
                if self.write_failing {
                    log::info!("event writes recovered");
                    self.write_failing = false;
                }
                if matches!(event, OutboundEvent::Shot { .. }) {
                    log::info!("shot sent: {}", text);
                }
                Delivery::Sent
            }
            Err(e) => {
                if !self.write_failing {
                    log::warn!("event write failed: {:#}", e);
                    self.write_failing = true;
                }
                Delivery::Dropped(DropReason::WriteFailed)
            }
        }
    }
}
