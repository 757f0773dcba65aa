use nbk_protocol::content::{ExecuteRequest, Status};
use nbk_protocol::{Codec, Header, Message, MessageType, ProtocolError, Signer, DELIMITER};
use serde_json::json;

fn signed_codec() -> Codec {
    Codec::new(Signer::new("hmac-sha256", "a0436f6c-1916-498b-8eb9-e81ab9368e84").unwrap())
}

fn execute_request() -> Message {
    let content = serde_json::to_value(ExecuteRequest::new("int x = 1;")).unwrap();
    let mut metadata = serde_json::Map::new();
    metadata.insert("cellId".into(), json!("c-1"));
    Message::new(Header::new(MessageType::ExecuteRequest, "session", "user"), content)
        .with_identities(vec![b"frontend".to_vec()])
        .with_metadata(metadata)
}

#[test]
fn decode_of_encode_reproduces_message() {
    let codec = signed_codec();
    let original = execute_request().with_blobs(vec![b"blob".to_vec()]);
    let decoded = codec.decode(codec.encode(&original).unwrap()).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn reencoding_decoded_frames_is_byte_identical() {
    let codec = signed_codec();
    let frames = codec.encode(&execute_request()).unwrap();
    let again = codec.encode(&codec.decode(frames.clone()).unwrap()).unwrap();
    assert_eq!(again, frames);
}

#[test]
fn tampered_content_fails_signature_check() {
    let codec = signed_codec();
    let mut frames = codec.encode(&execute_request()).unwrap();
    let content = frames.len() - 1;
    frames[content] = br#"{"code":"int x = 2;"}"#.to_vec();
    assert!(matches!(codec.decode(frames), Err(ProtocolError::InvalidSignature)));
}

#[test]
fn wrong_key_fails_signature_check() {
    let frames = signed_codec().encode(&execute_request()).unwrap();
    let other = Codec::new(Signer::new("hmac-sha256", "other").unwrap());
    assert!(matches!(other.decode(frames), Err(ProtocolError::InvalidSignature)));
}

#[test]
fn typed_reply_links_parent() {
    let codec = signed_codec();
    let request = codec.decode(codec.encode(&execute_request()).unwrap()).unwrap();
    let status = Message::typed_reply(&request, &Status::busy()).unwrap();
    assert_eq!(status.header.msg_type, MessageType::Status);
    let frames = codec.encode(&status).unwrap();
    assert_eq!(frames[0], b"frontend");
    assert_eq!(frames[1], DELIMITER);
    let decoded = codec.decode(frames).unwrap();
    assert_eq!(decoded.parent_header.unwrap().msg_id, request.header.msg_id);
    assert_eq!(decoded.content, json!({"execution_state": "busy"}));
}

#[test]
fn tampered_content_with_recomputed_signature_decodes() {
    let codec = signed_codec();
    let mut frames = codec.encode(&execute_request()).unwrap();
    let content = frames.len() - 1;
    frames[content] = br#"{"code":"int x = 2;"}"#.to_vec();
    let signature = codec
        .signer()
        .sign([&frames[content - 3], &frames[content - 2], &frames[content - 1], &frames[content]])
        .unwrap();
    frames[content - 4] = signature.into_bytes();

    let decoded = codec.decode(frames).unwrap();
    assert_eq!(decoded.content, json!({"code": "int x = 2;"}));
    assert_eq!(decoded.header.msg_type, MessageType::ExecuteRequest);
}
