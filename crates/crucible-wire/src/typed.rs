use std::path::PathBuf;
use std::str::FromStr;

use uuid::Uuid;

use crucible_types::{ComponentInvocation, Manifest};

use crate::message::{Message, WireError};

pub const CMD_REQUEST_MANIFEST: &str = "request_manifest";
pub const CMD_RESPONSE_MANIFEST: &str = "response_manifest";
pub const CMD_EXECUTE: &str = "execute";
pub const CMD_DONE: &str = "done";
pub const CMD_EXIT: &str = "exit";

/// `key_for_encfs` serializes on the wire as the literal string `"NULL"` when
/// absent, matching the worker side's sentinel-string convention rather than
/// an empty argument (which would shift the remaining command tokens).
const ENCFS_NULL: &str = "NULL";

/// A typed view over the five message kinds a worker connection exchanges
/// with the coordinator (spec §6). Converts to and from the untyped
/// [`Message`]/frame representation that actually crosses the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// Worker asks the coordinator which component to introspect next.
    RequestManifest,
    /// Worker reports the environment snapshot for the component it was
    /// asked about.
    ResponseManifest(Manifest),
    /// Coordinator dispatches a component invocation to the worker.
    Execute(ComponentInvocation),
    /// Worker reports that the named component finished executing.
    Done { component_id: Uuid },
    /// Coordinator tells the worker to terminate.
    Exit,
}

impl WireMessage {
    /// Converts to the untyped frame body, stamped with `sender_id`.
    pub fn into_message(self, sender_id: impl Into<String>) -> Result<Message, WireError> {
        let sender_id = sender_id.into();
        let (command, args) = match self {
            WireMessage::RequestManifest => (CMD_REQUEST_MANIFEST, vec![]),
            WireMessage::ResponseManifest(manifest) => {
                let json = ManifestJson::encode(&manifest)?;
                (CMD_RESPONSE_MANIFEST, vec![json])
            }
            WireMessage::Execute(invocation) => {
                let mut args = vec![
                    invocation.component_id.to_string(),
                    invocation.working_dir.display().to_string(),
                    invocation.key_for_encfs.clone().unwrap_or_else(|| ENCFS_NULL.to_string()),
                ];
                args.extend(invocation.command.iter().cloned());
                (CMD_EXECUTE, args)
            }
            WireMessage::Done { component_id } => (CMD_DONE, vec![component_id.to_string()]),
            WireMessage::Exit => (CMD_EXIT, vec![]),
        };
        Ok(Message::new(sender_id, command, args))
    }

    /// Parses a [`Message`] back into its typed form, validating the
    /// argument shape for each known command.
    pub fn from_message(message: &Message) -> Result<Self, WireError> {
        match message.command.as_str() {
            CMD_REQUEST_MANIFEST => Ok(WireMessage::RequestManifest),
            CMD_RESPONSE_MANIFEST => {
                let json = message.args.first().ok_or(WireError::WrongFieldCount(0))?;
                let manifest = ManifestJson::decode(json)?;
                Ok(WireMessage::ResponseManifest(manifest))
            }
            CMD_EXECUTE => {
                if message.args.len() < 3 {
                    return Err(WireError::WrongFieldCount(message.args.len()));
                }
                let component_id = parse_uuid(&message.args[0])?;
                let working_dir = PathBuf::from(&message.args[1]);
                let key_for_encfs = if message.args[2] == ENCFS_NULL {
                    None
                } else {
                    Some(message.args[2].clone())
                };
                let command = message.args[3..].to_vec();
                Ok(WireMessage::Execute(ComponentInvocation {
                    component_id,
                    working_dir,
                    key_for_encfs,
                    command,
                }))
            }
            CMD_DONE => {
                let raw = message.args.first().ok_or(WireError::WrongFieldCount(0))?;
                Ok(WireMessage::Done { component_id: parse_uuid(raw)? })
            }
            CMD_EXIT => Ok(WireMessage::Exit),
            other => Err(WireError::InvalidField {
                field: "command",
                reason: command_reason(other),
            }),
        }
    }
}

fn command_reason(_command: &str) -> &'static str {
    "unrecognized command"
}

fn parse_uuid(raw: &str) -> Result<Uuid, WireError> {
    Uuid::from_str(raw).map_err(|_| WireError::InvalidField { field: "component_id", reason: "not a UUID" })
}

/// Serializes/deserializes a [`Manifest`] as the sorted-keys JSON object
/// described in spec §6 (`name, type, version, packages_semver, hash,
/// packages`). `Manifest`'s own `Serialize`/`Deserialize` already match that
/// shape; this is a thin, named entry point so callers don't reach past
/// `crucible-wire` into `serde_json` directly.
pub struct ManifestJson;

impl ManifestJson {
    pub fn encode(manifest: &Manifest) -> Result<String, WireError> {
        serde_json::to_string(manifest).map_err(|e| WireError::InvalidField {
            field: "manifest",
            reason: Box::leak(e.to_string().into_boxed_str()),
        })
    }

    pub fn decode(json: &str) -> Result<Manifest, WireError> {
        serde_json::from_str(json).map_err(|_| WireError::InvalidField {
            field: "manifest",
            reason: "invalid manifest JSON",
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crucible_types::{ComponentType, SemanticVersion};

    use super::*;

    #[test]
    fn request_manifest_round_trips() {
        let msg = WireMessage::RequestManifest.into_message("worker-1").unwrap();
        assert_eq!(msg.command, CMD_REQUEST_MANIFEST);
        assert!(msg.args.is_empty());
        let typed = WireMessage::from_message(&msg).unwrap();
        assert_eq!(typed, WireMessage::RequestManifest);
    }

    #[test]
    fn exit_round_trips() {
        let msg = WireMessage::Exit.into_message("coordinator").unwrap();
        let typed = WireMessage::from_message(&msg).unwrap();
        assert_eq!(typed, WireMessage::Exit);
    }

    #[test]
    fn done_round_trips_its_uuid() {
        let component_id = Uuid::new_v4();
        let msg = WireMessage::Done { component_id }.into_message("worker-1").unwrap();
        let typed = WireMessage::from_message(&msg).unwrap();
        assert_eq!(typed, WireMessage::Done { component_id });
    }

    #[test]
    fn execute_round_trips_with_no_encfs_key() {
        let invocation = ComponentInvocation::new("/tmp/work", vec!["python".into(), "train.py".into()]);
        let component_id = invocation.component_id;
        let msg = WireMessage::Execute(invocation).into_message("coordinator").unwrap();
        assert_eq!(msg.args[2], "NULL");
        match WireMessage::from_message(&msg).unwrap() {
            WireMessage::Execute(invocation) => {
                assert_eq!(invocation.component_id, component_id);
                assert_eq!(invocation.key_for_encfs, None);
                assert_eq!(invocation.command, vec!["python".to_string(), "train.py".to_string()]);
            }
            other => panic!("expected Execute, got {other:?}"),
        }
    }

    #[test]
    fn execute_round_trips_with_an_encfs_key() {
        let invocation = ComponentInvocation::new("/tmp/work", vec!["run".into()]).with_encfs_key("secret-key");
        let msg = WireMessage::Execute(invocation).into_message("coordinator").unwrap();
        match WireMessage::from_message(&msg).unwrap() {
            WireMessage::Execute(invocation) => {
                assert_eq!(invocation.key_for_encfs, Some("secret-key".to_string()));
            }
            other => panic!("expected Execute, got {other:?}"),
        }
    }

    #[test]
    fn response_manifest_round_trips_through_json() {
        let manifest = Manifest::new(
            "fit-model",
            ComponentType::Library,
            SemanticVersion::new("master", 0, 1),
            BTreeMap::from([("numpy".to_string(), "1.26.0".to_string())]),
            true,
        );
        let msg = WireMessage::ResponseManifest(manifest.clone()).into_message("worker-1").unwrap();
        match WireMessage::from_message(&msg).unwrap() {
            WireMessage::ResponseManifest(decoded) => {
                assert_eq!(decoded.name, manifest.name);
                assert_eq!(decoded.packages_hash, manifest.packages_hash);
            }
            other => panic!("expected ResponseManifest, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_command_is_rejected() {
        let msg = Message::new("worker-1", "bogus", vec![]);
        assert!(matches!(WireMessage::from_message(&msg), Err(WireError::InvalidField { .. })));
    }
}
