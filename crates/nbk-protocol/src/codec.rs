use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::message::{Header, Message};
use crate::signer::Signer;

/// Frame separating routing identities from the signed body.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

const EMPTY_OBJECT: &[u8] = b"{}";

/// Frames after the delimiter: signature, header, parent header, metadata, content.
const BODY_FRAMES: usize = 5;

/// Turns multipart frame lists into [`Message`]s and back.
///
/// Layout: `identities.. <IDS|MSG> signature header parent metadata content blobs..`.
#[derive(Clone, Debug)]
pub struct Codec {
    signer: Signer,
}

impl Codec {
    pub fn new(signer: Signer) -> Self {
        Self { signer }
    }

    pub fn unsigned() -> Self {
        Self::new(Signer::unsigned())
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn decode(&self, mut frames: Vec<Vec<u8>>) -> Result<Message, ProtocolError> {
        let delimiter = frames
            .iter()
            .position(|frame| frame.as_slice() == DELIMITER)
            .ok_or(ProtocolError::MissingDelimiter)?;

        let mut body = frames.split_off(delimiter + 1);
        frames.pop();
        let identities = frames;

        if body.len() < BODY_FRAMES {
            return Err(ProtocolError::MissingFrames { expected: BODY_FRAMES, found: body.len() });
        }
        let blobs = body.split_off(BODY_FRAMES);
        let [signature, header, parent, metadata, content]: [Vec<u8>; BODY_FRAMES] = body
            .try_into()
            .map_err(|_| ProtocolError::MissingFrames { expected: BODY_FRAMES, found: 0 })?;

        self.signer.verify([&header, &parent, &metadata, &content], &signature)?;

        let mut header: Header = serde_json::from_slice(&header).map_err(|err| malformed("header", err))?;
        let parent_header = decode_parent(&parent)?;
        let metadata = match serde_json::from_slice(&metadata).map_err(|err| malformed("metadata", err))? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ProtocolError::Malformed {
                    part: "metadata",
                    reason: format!("expected an object, found {other}"),
                });
            }
        };
        let content: Value = serde_json::from_slice(&content).map_err(|err| malformed("content", err))?;

        if header.msg_type.is_reply() && content.get("status").and_then(Value::as_str) == Some("error") {
            header.msg_type = header.msg_type.error();
        }

        Ok(Message { identities, header, parent_header, metadata, content, blobs })
    }

    pub fn encode(&self, message: &Message) -> Result<Vec<Vec<u8>>, ProtocolError> {
        let header = serde_json::to_vec(&message.header)?;
        let parent = match &message.parent_header {
            Some(parent) => serde_json::to_vec(parent)?,
            None => EMPTY_OBJECT.to_vec(),
        };
        let metadata = serde_json::to_vec(&message.metadata)?;
        let content = serde_json::to_vec(&message.content)?;
        let signature = self.signer.sign([&header, &parent, &metadata, &content])?;

        let mut frames = Vec::with_capacity(message.identities.len() + 1 + BODY_FRAMES + message.blobs.len());
        frames.extend(message.identities.iter().cloned());
        frames.push(DELIMITER.to_vec());
        frames.push(signature.into_bytes());
        frames.push(header);
        frames.push(parent);
        frames.push(metadata);
        frames.push(content);
        frames.extend(message.blobs.iter().cloned());
        Ok(frames)
    }
}

fn decode_parent(bytes: &[u8]) -> Result<Option<Header>, ProtocolError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|err| malformed("parent_header", err))?;
    match value {
        Value::Null => Ok(None),
        Value::Object(ref map) if map.is_empty() => Ok(None),
        other => serde_json::from_value(other).map(Some).map_err(|err| malformed("parent_header", err)),
    }
}

fn malformed(part: &'static str, err: serde_json::Error) -> ProtocolError {
    ProtocolError::Malformed { part, reason: err.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use serde_json::json;

    fn sample() -> Message {
        let parent = Header::new(MessageType::ExecuteRequest, "s1", "user");
        Message::new(Header::new(MessageType::ExecuteReply, "s1", "user"), json!({"status": "ok", "execution_count": 1}))
            .with_identities(vec![b"id-a".to_vec(), b"id-b".to_vec()])
            .with_parent(parent)
            .with_blobs(vec![vec![0, 1, 2]])
    }

    #[test]
    fn frame_layout_places_delimiter_after_identities() {
        let codec = Codec::new(Signer::new("hmac-sha256", "k").unwrap());
        let frames = codec.encode(&sample()).unwrap();
        assert_eq!(frames.len(), 2 + 1 + 5 + 1);
        assert_eq!(frames[2], DELIMITER);
        assert_eq!(frames[3].len(), 64);
        assert_eq!(frames[8], vec![0, 1, 2]);
    }

    #[test]
    fn missing_parent_encodes_as_empty_object() {
        let codec = Codec::unsigned();
        let msg = Message::new(Header::new(MessageType::Status, "s", "u"), json!({"execution_state": "idle"}));
        let frames = codec.encode(&msg).unwrap();
        assert_eq!(frames[0], DELIMITER);
        assert!(frames[1].is_empty());
        assert_eq!(frames[3], b"{}");
        assert_eq!(frames[4], b"{}");
        assert_eq!(codec.decode(frames).unwrap().parent_header, None);
    }

    #[test]
    fn missing_delimiter_is_rejected() {
        let err = Codec::unsigned().decode(vec![b"a".to_vec(), b"b".to_vec()]).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingDelimiter));
    }

    #[test]
    fn short_body_is_rejected() {
        let frames = vec![DELIMITER.to_vec(), Vec::new(), b"{}".to_vec()];
        let err = Codec::unsigned().decode(frames).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingFrames { expected: 5, found: 2 }));
    }

    #[test]
    fn error_status_rewrites_reply_type() {
        let codec = Codec::unsigned();
        let msg = Message::new(
            Header::new(MessageType::ExecuteReply, "s", "u"),
            json!({"status": "error", "ename": "E", "evalue": "v", "traceback": []}),
        );
        let decoded = codec.decode(codec.encode(&msg).unwrap()).unwrap();
        assert!(decoded.header.msg_type.is_error_for(&MessageType::ExecuteReply));
    }

    #[test]
    fn error_status_on_publication_is_left_alone() {
        let codec = Codec::unsigned();
        let msg = Message::new(Header::new(MessageType::Stream, "s", "u"), json!({"status": "error"}));
        let decoded = codec.decode(codec.encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded.header.msg_type, MessageType::Stream);
    }
}
