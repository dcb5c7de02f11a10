//! JSON envelopes used on stdio, socket and HTTP connections.
//!
//! Commands: `{"command": {"kind": .., "token": .., "targetKernelUri": .., ..}, "id": .., "routingSlip": [..]}`
//! Events: `{"event": {"eventType": .., ..}, "command": <command envelope>, "routingSlip": [..]}`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::{is_valid_token, CommandKind, KernelCommand};
use crate::error::KernelError;
use crate::event::{EventKind, KernelEvent};
use crate::routing_slip::RoutingSlip;
use crate::uri::KernelUri;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    #[serde(flatten)]
    pub kind: CommandKind,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_kernel_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_uri: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command: CommandPayload,
    pub id: String,
    #[serde(default)]
    pub routing_slip: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event: EventKind,
    pub command: CommandEnvelope,
    #[serde(default)]
    pub routing_slip: Vec<String>,
}

impl From<&KernelCommand> for CommandEnvelope {
    fn from(cmd: &KernelCommand) -> Self {
        Self {
            command: CommandPayload {
                kind: cmd.kind().clone(),
                token: cmd.token().to_string(),
                target_kernel_uri: cmd.target_kernel_uri().map(str::to_string),
                origin_uri: cmd.origin_uri().map(ToString::to_string),
                properties: cmd.properties().clone(),
            },
            id: cmd.id().to_string(),
            routing_slip: cmd.routing_slip().to_vec(),
        }
    }
}

impl TryFrom<CommandEnvelope> for KernelCommand {
    type Error = KernelError;

    fn try_from(env: CommandEnvelope) -> Result<Self, Self::Error> {
        if !is_valid_token(&env.command.token) {
            return Err(KernelError::InvalidToken(env.command.token));
        }
        let origin_uri = env
            .command
            .origin_uri
            .as_deref()
            .map(KernelUri::parse)
            .transpose()?;
        Ok(KernelCommand::from_parts(
            env.command.kind,
            env.command.token,
            env.id,
            env.command.target_kernel_uri,
            origin_uri,
            RoutingSlip::from(env.routing_slip),
            env.command.properties,
        ))
    }
}

impl From<&KernelEvent> for EventEnvelope {
    fn from(event: &KernelEvent) -> Self {
        Self {
            event: event.kind.clone(),
            command: CommandEnvelope::from(&event.command),
            routing_slip: event.routing_slip.to_vec(),
        }
    }
}

impl TryFrom<EventEnvelope> for KernelEvent {
    type Error = KernelError;

    fn try_from(env: EventEnvelope) -> Result<Self, Self::Error> {
        Ok(KernelEvent {
            kind: env.event,
            command: KernelCommand::try_from(env.command)?,
            routing_slip: RoutingSlip::from(env.routing_slip),
        })
    }
}

/// One decoded line from a connection.
#[derive(Debug, Clone)]
pub enum CommandOrEvent {
    Command(KernelCommand),
    Event(KernelEvent),
    ParseError { raw: String, message: String },
}

impl CommandOrEvent {
    pub fn parse(raw: &str) -> Self {
        match Self::try_parse(raw) {
            Ok(item) => item,
            Err(err) => CommandOrEvent::ParseError {
                raw: raw.to_string(),
                message: err.to_string(),
            },
        }
    }

    fn try_parse(raw: &str) -> Result<Self, KernelError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.get("event").is_some() {
            let env: EventEnvelope = serde_json::from_value(value)?;
            Ok(CommandOrEvent::Event(KernelEvent::try_from(env)?))
        } else if value.get("command").is_some() {
            let env: CommandEnvelope = serde_json::from_value(value)?;
            Ok(CommandOrEvent::Command(KernelCommand::try_from(env)?))
        } else {
            Err(KernelError::handler(
                "expected a command or event envelope",
            ))
        }
    }
}

pub fn serialize_command(cmd: &KernelCommand) -> Result<String, KernelError> {
    Ok(serde_json::to_string(&CommandEnvelope::from(cmd))?)
}

pub fn serialize_event(event: &KernelEvent) -> Result<String, KernelError> {
    Ok(serde_json::to_string(&EventEnvelope::from(event))?)
}
