use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nbk_exec::ExecConfig;
use nbk_kernel::{Kernel, KernelConfig, KernelConnection, MemPeer, MemTransport};
use nbk_protocol::{ChannelKind, Codec, ConnectionInfo, Header, Message, MessageType, Signer};
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(5);

struct Session {
    transport: MemTransport,
    info: ConnectionInfo,
    connection: Arc<KernelConnection>,
    codec: Codec,
    shell: MemPeer,
    control: MemPeer,
    iopub: MemPeer,
    heartbeat: MemPeer,
}

impl Session {
    fn start(timeout: Option<&str>) -> Self {
        let info = ConnectionInfo {
            transport: "mem".into(),
            ip: "kernel".into(),
            shell_port: 1,
            iopub_port: 2,
            control_port: 3,
            hb_port: 4,
            stdin_port: None,
            key: "secret".into(),
            signature_scheme: "hmac-sha256".into(),
            kernel_name: None,
        };
        let config = KernelConfig {
            heartbeat_interval: Duration::from_millis(5),
            poll_interval: Duration::from_millis(5),
            comm_targets: vec!["echo".into()],
            ..KernelConfig::default()
        };
        let exec = ExecConfig { registration_id: "integration".into(), timeout: timeout.map(str::to_string) };
        let transport = MemTransport::new();

        let kernel = Arc::new(Kernel::new(config.clone(), &exec, Vec::new()).unwrap());
        let connection = Arc::new(KernelConnection::new(info.clone(), &transport, &config).unwrap());
        kernel.install(&connection);
        connection.connect().unwrap();

        let peer = |kind| transport.connect(&info.address(kind)).unwrap();
        Self {
            shell: peer(ChannelKind::Shell),
            control: peer(ChannelKind::Control),
            iopub: peer(ChannelKind::IOPub),
            heartbeat: peer(ChannelKind::Heartbeat),
            codec: Codec::new(info.signer().unwrap()),
            transport,
            info,
            connection,
        }
    }

    fn request(&self, msg_type: MessageType, content: Value) -> Message {
        Message::new(Header::new(msg_type, "client-session", "tester"), content)
            .with_identities(vec![b"client-1".to_vec()])
    }

    fn send(&self, peer: &MemPeer, message: &Message) {
        peer.send(self.codec.encode(message).unwrap());
    }

    fn reply(&self, peer: &MemPeer) -> Message {
        let frames = peer.recv_timeout(WAIT).expect("no reply before deadline");
        self.codec.decode(frames).unwrap()
    }

    /// Iopub traffic caused by `parent`, up to and including its idle status.
    fn published(&self, parent: &Message) -> Vec<Message> {
        let deadline = Instant::now() + WAIT;
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            let Some(frames) = self.iopub.recv_timeout(Duration::from_millis(50)) else {
                continue;
            };
            let message = self.codec.decode(frames).unwrap();
            if message.parent_header.as_ref().map(|h| h.msg_id.as_str()) != Some(parent.header.msg_id.as_str()) {
                continue;
            }
            let idle = message.header.msg_type == MessageType::Status
                && message.content["execution_state"] == "idle";
            seen.push(message);
            if idle {
                return seen;
            }
        }
        panic!("no idle status for {}", parent.header.msg_id);
    }

    fn execute(&self, code: &str) -> (Message, Vec<Message>) {
        let request = self.request(MessageType::ExecuteRequest, json!({ "code": code }));
        self.send(&self.shell, &request);
        let reply = self.reply(&self.shell);
        (reply, self.published(&request))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.connection.close();
        let _ = self.connection.wait_until_close();
    }
}

fn kinds(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .map(|msg| match msg.header.msg_type {
            MessageType::Status => format!("status:{}", msg.content["execution_state"].as_str().unwrap_or("?")),
            ref other => other.to_string(),
        })
        .collect()
}

#[test]
fn execute_publishes_input_result_and_status_pair() {
    let session = Session::start(None);
    let (reply, published) = session.execute("int a = 20; a + 1");

    assert_eq!(reply.header.msg_type, MessageType::ExecuteReply);
    assert_eq!(reply.identities, vec![b"client-1".to_vec()]);
    assert_eq!(reply.content["status"], "ok");
    assert_eq!(reply.content["execution_count"], 1);
    assert_eq!(
        kinds(&published),
        vec!["status:busy", "execute_input", "execute_result", "status:idle"]
    );
    assert_eq!(published[2].content["data"]["text/plain"], "21");

    let (second, _) = session.execute("a");
    assert_eq!(second.content["execution_count"], 2);
}

#[test]
fn evaluation_failure_is_an_error_reply_with_traceback() {
    let session = Session::start(None);
    let (reply, published) = session.execute("fail(\"nope\")");

    assert!(reply.header.msg_type.is_error_for(&MessageType::ExecuteReply));
    assert_eq!(reply.content["ename"], "Failure");
    assert_eq!(reply.content["evalue"], "nope");
    assert_eq!(reply.content["execution_count"], 1);

    let error = published.iter().find(|msg| msg.header.msg_type == MessageType::Error).unwrap();
    let traceback = error.content["traceback"].as_array().unwrap();
    assert!(traceback[0].as_str().unwrap().starts_with("-----"));
    assert_eq!(kinds(&published).first().map(String::as_str), Some("status:busy"));
    assert_eq!(kinds(&published).last().map(String::as_str), Some("status:idle"));
}

#[test]
fn silent_execution_publishes_nothing_and_keeps_the_count() {
    let session = Session::start(None);
    let request = session.request(MessageType::ExecuteRequest, json!({ "code": "1 + 1", "silent": true }));
    session.send(&session.shell, &request);
    let reply = session.reply(&session.shell);
    assert_eq!(reply.content["execution_count"], 0);
    assert_eq!(kinds(&session.published(&request)), vec!["status:busy", "status:idle"]);

    let (next, _) = session.execute("2");
    assert_eq!(next.content["execution_count"], 1);
}

#[test]
fn kernel_info_and_is_complete() {
    let session = Session::start(None);
    let info = session.request(MessageType::KernelInfoRequest, json!({}));
    session.send(&session.shell, &info);
    let reply = session.reply(&session.shell);
    assert_eq!(reply.header.msg_type, MessageType::KernelInfoReply);
    assert_eq!(reply.content["protocol_version"], "5.3");
    assert_eq!(reply.content["language_info"]["name"], "scratch");
    assert!(reply.content["banner"].as_str().unwrap().ends_with("Protocol v5.3"));

    let check = session.request(MessageType::IsCompleteRequest, json!({ "code": "int x = 1; int y =" }));
    session.send(&session.shell, &check);
    let reply = session.reply(&session.shell);
    assert_eq!(reply.content["status"], "incomplete");
    assert!(reply.content["indent"].is_string());
}

#[test]
fn unsupported_and_forged_messages_are_dropped() {
    let session = Session::start(None);
    session.send(&session.shell, &session.request(MessageType::from_name("custom_request"), json!({})));

    let forged = Codec::new(Signer::new("hmac-sha256", "not-the-key").unwrap());
    let request = session.request(MessageType::KernelInfoRequest, json!({}));
    session.shell.send(forged.encode(&request).unwrap());

    assert!(session.shell.recv_timeout(Duration::from_millis(200)).is_none());
    assert!(session.iopub.try_recv().is_none());

    session.send(&session.shell, &request);
    assert_eq!(session.reply(&session.shell).header.msg_type, MessageType::KernelInfoReply);
}

#[test]
fn comm_open_for_unknown_target_is_closed() {
    let session = Session::start(None);
    let open = session.request(MessageType::CommOpen, json!({ "comm_id": "c1", "target_name": "widgets" }));
    session.send(&session.shell, &open);
    let published = session.published(&open);
    let close = published.iter().find(|msg| msg.header.msg_type == MessageType::CommClose).unwrap();
    assert_eq!(close.content["comm_id"], "c1");

    let open = session.request(MessageType::CommOpen, json!({ "comm_id": "c2", "target_name": "echo" }));
    session.send(&session.shell, &open);
    session.published(&open);
    let info = session.request(MessageType::CommInfoRequest, json!({}));
    session.send(&session.shell, &info);
    let reply = session.reply(&session.shell);
    assert_eq!(reply.content["comms"], json!({ "c2": { "target_name": "echo" } }));
}

#[test]
fn timeout_is_reported_with_configured_duration() {
    let session = Session::start(Some("100ms"));
    let (reply, _) = session.execute("sleep(2000)");
    assert_eq!(reply.content["ename"], "EvaluationTimeoutException");
    assert!(reply.content["evalue"].as_str().unwrap().contains("100 milliseconds"));

    let (after, _) = session.execute("5");
    assert_eq!(after.content["status"], "ok");
}

#[test]
fn control_channel_interrupts_a_running_execution() {
    let session = Session::start(None);
    let request = session.request(MessageType::ExecuteRequest, json!({ "code": "sleep(10000)" }));
    session.send(&session.shell, &request);

    let deadline = Instant::now() + WAIT;
    let reply = loop {
        assert!(Instant::now() < deadline, "execution was never interrupted");
        let interrupt = session.request(MessageType::InterruptRequest, json!({}));
        session.send(&session.control, &interrupt);
        assert_eq!(session.reply(&session.control).header.msg_type, MessageType::InterruptReply);
        if let Some(frames) = session.shell.recv_timeout(Duration::from_millis(200)) {
            break session.codec.decode(frames).unwrap();
        }
    };
    assert_eq!(reply.content["ename"], "EvaluationInterruptedException");
}

#[test]
fn heartbeat_echoes_payload() {
    let session = Session::start(None);
    let payload = vec![b"ping".to_vec(), vec![7; 4096]];
    session.heartbeat.send(payload.clone());
    assert_eq!(session.heartbeat.recv_timeout(WAIT), Some(payload));
}

#[test]
fn shutdown_replies_then_closes_the_connection() {
    let session = Session::start(None);
    let request = session.request(MessageType::ShutdownRequest, json!({ "restart": true }));
    session.send(&session.control, &request);

    let reply = session.reply(&session.control);
    assert_eq!(reply.header.msg_type, MessageType::ShutdownReply);
    assert_eq!(reply.content["restart"], true);

    let connection = session.connection.clone();
    let waiter = thread::spawn(move || connection.wait_until_close());
    waiter.join().unwrap().unwrap();
    for kind in [ChannelKind::Shell, ChannelKind::Control, ChannelKind::Heartbeat, ChannelKind::IOPub] {
        assert!(!session.transport.is_bound(&session.info.address(kind)), "{kind} still bound");
    }
}

#[test]
fn print_is_published_as_stdout_stream_before_the_result() {
    let session = Session::start(None);
    let (reply, published) = session.execute("print(\"a\"); 1 + 1");

    assert_eq!(reply.content["status"], "ok");
    assert_eq!(
        kinds(&published),
        vec!["status:busy", "execute_input", "stream", "execute_result", "status:idle"]
    );
    assert_eq!(published[2].content, json!({ "name": "stdout", "text": "a\n" }));
}

#[test]
fn stream_output_stays_published_ahead_of_a_later_failure() {
    let session = Session::start(None);
    let (reply, published) = session.execute("print(\"a\"); fail(\"b\")");

    assert_eq!(reply.content["ename"], "Failure");
    assert_eq!(reply.content["evalue"], "b");
    assert_eq!(
        kinds(&published),
        vec!["status:busy", "execute_input", "stream", "error", "status:idle"]
    );
    assert_eq!(published[2].content["text"], "a\n");
}

#[test]
fn deeply_nested_input_is_a_compilation_error() {
    let session = Session::start(None);
    let code = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
    let (reply, published) = session.execute(&code);

    assert_eq!(reply.content["ename"], "CompilationException");
    assert!(reply.content["evalue"].as_str().unwrap().contains("too deeply nested"));
    assert_eq!(kinds(&published).last().map(String::as_str), Some("status:idle"));

    session.heartbeat.send(vec![b"ping".to_vec()]);
    assert_eq!(session.heartbeat.recv_timeout(WAIT), Some(vec![b"ping".to_vec()]));
    let (after, _) = session.execute("(((2)))");
    assert_eq!(after.content["status"], "ok");
}

#[test]
fn shutdown_during_execution_aborts_the_running_request() {
    let session = Session::start(None);
    let execute = session.request(MessageType::ExecuteRequest, json!({ "code": "sleep(3000)" }));
    session.send(&session.shell, &execute);
    thread::sleep(Duration::from_millis(300));

    let shutdown = session.request(MessageType::ShutdownRequest, json!({ "restart": false }));
    session.send(&session.control, &shutdown);
    assert_eq!(session.reply(&session.control).header.msg_type, MessageType::ShutdownReply);

    let reply = session.reply(&session.shell);
    assert_eq!(reply.header.msg_type, MessageType::ExecuteReply);
    assert_eq!(reply.content["status"], "abort");
    assert_eq!(reply.content["execution_count"], 1);
    assert!(session.shell.recv_timeout(Duration::from_millis(200)).is_none());

    assert_eq!(
        kinds(&session.published(&execute)),
        vec!["status:busy", "execute_input", "status:idle"]
    );
}
