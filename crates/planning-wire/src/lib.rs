//! XML wire format for planning sync messages.
//!
//! Every message is a single XML document whose root tag names the kind and
//! the operation (`CreateEvent`, `UpdateSession`, ...). Timestamps use
//! `YYYY-MM-DDTHH:MM:SS.mmmZ`; participant sets are lists of child
//! elements and decode with set semantics.
//!
//! ```text
//! <UpdateEvent>
//!   <UUID>evt-1</UUID>
//!   <FieldsToUpdate>
//!     <Field><Name>Location</Name><NewValue>Aula</NewValue></Field>
//!   </FieldsToUpdate>
//! </UpdateEvent>
//! ```

mod error;
mod event;
mod heartbeat;
mod session;
mod xml;

pub use error::{WireError, WireResult};
pub use heartbeat::{encode_heartbeat, Heartbeat};

use planning_model::SyncMessage;

/// Encodes a message into its XML document.
pub fn encode(message: &SyncMessage) -> String {
    match message {
        SyncMessage::Event(message) => event::encode(message),
        SyncMessage::Session(message) => session::encode(message),
    }
}

/// Decodes an XML document into a message.
///
/// The root tag selects the message type; legacy event roots (`Event`,
/// `EventUpdate`, `EventDelete`) are accepted as aliases.
pub fn decode(payload: &str) -> WireResult<SyncMessage> {
    let root = xml::parse(payload)?;
    let tag = root.name.as_str();

    let message = if event::CREATE_ROOTS.contains(&tag) {
        SyncMessage::Event(event::decode_create(&root)?)
    } else if event::UPDATE_ROOTS.contains(&tag) {
        SyncMessage::Event(event::decode_update(&root)?)
    } else if event::DELETE_ROOTS.contains(&tag) {
        SyncMessage::Event(event::decode_delete(&root)?)
    } else if tag == session::CREATE_ROOT {
        SyncMessage::Session(session::decode_create(&root)?)
    } else if tag == session::UPDATE_ROOT {
        SyncMessage::Session(session::decode_update(&root)?)
    } else if tag == session::DELETE_ROOT {
        SyncMessage::Session(session::decode_delete(&root)?)
    } else {
        return Err(WireError::SchemaViolation {
            element: root.name.clone(),
            reason: "unknown message type".to_string(),
        });
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_root_is_schema_violation() {
        let err = decode("<Reservation><UUID>r-1</UUID></Reservation>").unwrap_err();
        assert!(matches!(err, WireError::SchemaViolation { ref element, .. } if element == "Reservation"));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(decode("not xml at all <"), Err(WireError::MalformedXml(_))));
    }

    #[test]
    fn test_declaration_is_optional() {
        let with_decl = decode(
            r#"<?xml version="1.0" encoding="UTF-8"?><DeleteEvent><UUID>e</UUID><TimeOfAction>2025-01-01T00:00:00Z</TimeOfAction></DeleteEvent>"#,
        )
        .unwrap();
        let without_decl = decode(
            "<DeleteEvent><UUID>e</UUID><TimeOfAction>2025-01-01T00:00:00Z</TimeOfAction></DeleteEvent>",
        )
        .unwrap();
        assert_eq!(with_decl, without_decl);
    }
}
