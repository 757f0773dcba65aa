//! Request handlers for the notebook protocol, backed by a [`CodeEvaluator`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use nbk_exec::{scratch, CodeEvaluator, EvalError, ExecConfig, ExecutionControl, ExecutionControlProvider, IsComplete};
use nbk_protocol::content::{
    CommClose, CommInfoReply, CommInfoRequest, CommMsg, CommOpen, CompleteReply, CompleteRequest, ErrorReply,
    ExecuteInput, ExecuteReply, ExecuteRequest, ExecuteResult, HistoryReply, InspectReply, InspectRequest,
    InterruptReply, IsCompleteReply, IsCompleteRequest, IsCompleteStatus, KernelInfoReply, ReplyStatus,
    ShutdownReply, ShutdownRequest, Stream,
};
use nbk_protocol::{Message, MessageType, PROTOCOL_VERSION};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::KernelConfig;
use crate::connection::KernelConnection;
use crate::error::KernelError;
use crate::reply_env::ReplyEnv;

const ERROR_RULE: &str = "---------------------------------------------------------------------------";

type Handler = fn(&Kernel, &mut ReplyEnv, &Message) -> Result<(), KernelError>;

pub struct Kernel {
    config: KernelConfig,
    evaluator: Arc<CodeEvaluator>,
    // the provider only holds a weak reference
    control: Arc<ExecutionControl>,
    executions: AtomicU32,
    /// Open comms: id to target name.
    comms: Mutex<HashMap<String, String>>,
}

impl Kernel {
    /// Kernel over the scratch language with a fresh execution control.
    pub fn new(config: KernelConfig, exec: &ExecConfig, startup: Vec<String>) -> Result<Self, KernelError> {
        let provider = Arc::new(ExecutionControlProvider::new());
        let control = provider.generate(&exec.to_parameters())?;
        let evaluator = Arc::new(scratch::evaluator(provider, exec.registration_id.clone(), startup));
        Ok(Self::with_evaluator(config, evaluator, control))
    }

    pub fn with_evaluator(config: KernelConfig, evaluator: Arc<CodeEvaluator>, control: Arc<ExecutionControl>) -> Self {
        Self {
            config,
            evaluator,
            control,
            executions: AtomicU32::new(0),
            comms: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Arc<CodeEvaluator> {
        &self.evaluator
    }

    pub fn control(&self) -> &Arc<ExecutionControl> {
        &self.control
    }

    /// Count of the last non-silent execution.
    pub fn execution_count(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }

    /// Registers a handler for every request kind the kernel serves.
    pub fn install(self: &Arc<Self>, connection: &KernelConnection) {
        let routes: [(MessageType, Handler); 12] = [
            (MessageType::ExecuteRequest, Kernel::handle_execute),
            (MessageType::InspectRequest, Kernel::handle_inspect),
            (MessageType::CompleteRequest, Kernel::handle_complete),
            (MessageType::HistoryRequest, Kernel::handle_history),
            (MessageType::IsCompleteRequest, Kernel::handle_is_complete),
            (MessageType::KernelInfoRequest, Kernel::handle_kernel_info),
            (MessageType::ShutdownRequest, Kernel::handle_shutdown),
            (MessageType::InterruptRequest, Kernel::handle_interrupt),
            (MessageType::CommInfoRequest, Kernel::handle_comm_info),
            (MessageType::CommOpen, Kernel::handle_comm_open),
            (MessageType::CommMsg, Kernel::handle_comm_msg),
            (MessageType::CommClose, Kernel::handle_comm_close),
        ];
        for (msg_type, handler) in routes {
            let kernel = self.clone();
            connection.set_handler(msg_type, move |env: &mut ReplyEnv, request: &Message| {
                handler(&kernel, env, request)
            });
        }
    }

    pub fn kernel_info(&self) -> KernelInfoReply {
        KernelInfoReply {
            status: ReplyStatus::Ok,
            protocol_version: PROTOCOL_VERSION.to_string(),
            implementation: self.config.implementation.clone(),
            implementation_version: self.config.implementation_version.clone(),
            language_info: self.config.language.clone(),
            banner: self.config.banner(),
            help_links: self.config.help_links.clone(),
        }
    }

    pub fn interrupt(&self) {
        info!("interrupting running evaluations");
        self.evaluator.interrupt();
    }

    /// Stops execution control; later evaluations fail as stopped.
    pub fn on_shutdown(&self, restart: bool) {
        info!(restart, "kernel shutting down");
        self.evaluator.shutdown();
    }

    /// Error reply with a traceback of display lines under a separator rule.
    pub fn format_error(&self, err: &EvalError) -> ErrorReply {
        let evalue = match err {
            EvalError::Exception { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let mut traceback = vec![ERROR_RULE.to_string(), format!("{}: {}", err.ename(), evalue)];
        match err {
            EvalError::Compilation { code, diagnostics, unresolved } => {
                traceback.push(code.clone());
                traceback.extend(diagnostics.iter().map(|diag| format!("  {diag}")));
                if !unresolved.is_empty() {
                    traceback.push(format!("  unresolved: {}", unresolved.join(", ")));
                }
            }
            EvalError::Incomplete { remaining } => traceback.push(remaining.trim().to_string()),
            EvalError::Timeout { code, .. } | EvalError::Interrupted { code } => traceback.push(code.clone()),
            _ => {}
        }
        ErrorReply::new(err.ename(), evalue, traceback)
    }

    fn handle_execute(&self, env: &mut ReplyEnv, request: &Message) -> Result<(), KernelError> {
        let request: ExecuteRequest = request.content_as()?;
        let silent = request.silent;
        let count = if silent {
            self.executions.load(Ordering::SeqCst)
        } else {
            self.executions.fetch_add(1, Ordering::SeqCst) + 1
        };
        env.set_busy_defer_idle();
        if !silent {
            env.publish(&ExecuteInput { code: request.code.clone(), execution_count: count })?;
        }

        if !silent {
            let stdout = env.publisher();
            self.evaluator.output().redirect(Arc::new(move |text: &str| {
                let stream = Stream { name: "stdout".into(), text: text.to_string() };
                if let Err(err) = stdout.publish(&stream) {
                    warn!(error = %err, "failed to publish stream output");
                }
            }));
        }
        let outcome = self.evaluator.eval(&request.code);
        self.evaluator.output().reset();

        match outcome {
            Ok(value) => {
                if let Some(text) = value.filter(|_| !silent) {
                    env.publish(&ExecuteResult::text(count, text))?;
                }
                env.defer_reply(ExecuteReply {
                    status: ReplyStatus::Ok,
                    execution_count: count,
                    user_expressions: Map::new(),
                });
            }
            Err(EvalError::Stopped) => {
                debug!(execution_count = count, "evaluation stopped by shutdown");
                env.defer_reply(ExecuteReply {
                    status: ReplyStatus::Abort,
                    execution_count: count,
                    user_expressions: Map::new(),
                });
            }
            Err(err) => {
                debug!(execution_count = count, ename = err.ename(), error = %err, "evaluation failed");
                let mut error = self.format_error(&err);
                error.execution_count = Some(count);
                if !silent {
                    env.publish(&error.published())?;
                }
                env.defer_reply_error(MessageType::ExecuteReply, error);
            }
        }
        Ok(())
    }

    fn handle_inspect(&self, env: &mut ReplyEnv, request: &Message) -> Result<(), KernelError> {
        let request: InspectRequest = request.content_as()?;
        let found = self.evaluator.inspect(&request.code, request.cursor_pos);
        let mut data = Map::new();
        if let Some(text) = &found {
            data.insert("text/plain".into(), Value::String(text.clone()));
        }
        env.reply(&InspectReply {
            status: ReplyStatus::Ok,
            found: found.is_some(),
            data,
            metadata: Map::new(),
        })
    }

    fn handle_complete(&self, env: &mut ReplyEnv, request: &Message) -> Result<(), KernelError> {
        let request: CompleteRequest = request.content_as()?;
        let completions = self.evaluator.complete(&request.code, request.cursor_pos);
        env.reply(&CompleteReply {
            status: ReplyStatus::Ok,
            matches: completions.matches,
            cursor_start: completions.cursor_start,
            cursor_end: completions.cursor_end,
            metadata: Map::new(),
        })
    }

    fn handle_history(&self, env: &mut ReplyEnv, _request: &Message) -> Result<(), KernelError> {
        env.reply(&HistoryReply { status: ReplyStatus::Ok, history: Vec::new() })
    }

    fn handle_is_complete(&self, env: &mut ReplyEnv, request: &Message) -> Result<(), KernelError> {
        let request: IsCompleteRequest = request.content_as()?;
        let (status, indent) = match self.evaluator.is_complete(&request.code) {
            IsComplete::Complete => (IsCompleteStatus::Complete, None),
            IsComplete::Invalid => (IsCompleteStatus::Invalid, None),
            IsComplete::Unknown => (IsCompleteStatus::Unknown, None),
            IsComplete::Incomplete(indent) => (IsCompleteStatus::Incomplete, Some(indent)),
        };
        env.reply(&IsCompleteReply { status, indent })
    }

    fn handle_kernel_info(&self, env: &mut ReplyEnv, _request: &Message) -> Result<(), KernelError> {
        env.reply(&self.kernel_info())
    }

    fn handle_shutdown(&self, env: &mut ReplyEnv, request: &Message) -> Result<(), KernelError> {
        let request: ShutdownRequest = request.content_as()?;
        env.defer_reply(ShutdownReply { status: ReplyStatus::Ok, restart: request.restart });
        self.on_shutdown(request.restart);
        env.resolve_deferrals();
        env.mark_for_shutdown();
        Ok(())
    }

    fn handle_interrupt(&self, env: &mut ReplyEnv, _request: &Message) -> Result<(), KernelError> {
        env.defer_reply(InterruptReply { status: ReplyStatus::Ok });
        self.interrupt();
        Ok(())
    }

    fn handle_comm_info(&self, env: &mut ReplyEnv, request: &Message) -> Result<(), KernelError> {
        let request: CommInfoRequest = request.content_as()?;
        let comms: Map<String, Value> = self
            .comms
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, target)| request.target_name.as_ref().is_none_or(|wanted| wanted == *target))
            .map(|(id, target)| (id.clone(), json!({ "target_name": target })))
            .collect();
        env.reply(&CommInfoReply { status: ReplyStatus::Ok, comms })
    }

    fn handle_comm_open(&self, env: &mut ReplyEnv, request: &Message) -> Result<(), KernelError> {
        let open: CommOpen = request.content_as()?;
        if self.config.comm_targets.contains(&open.target_name) {
            debug!(comm_id = %open.comm_id, target = %open.target_name, "comm opened");
            self.comms.lock().unwrap().insert(open.comm_id, open.target_name);
            return Ok(());
        }
        warn!(comm_id = %open.comm_id, target = %open.target_name, "no such comm target, closing");
        env.publish(&CommClose { comm_id: open.comm_id, data: json!({}) })
    }

    fn handle_comm_msg(&self, _env: &mut ReplyEnv, request: &Message) -> Result<(), KernelError> {
        let msg: CommMsg = request.content_as()?;
        match self.comms.lock().unwrap().get(&msg.comm_id) {
            Some(target) => debug!(comm_id = %msg.comm_id, %target, "comm message"),
            None => warn!(comm_id = %msg.comm_id, "message for unknown comm"),
        }
        Ok(())
    }

    fn handle_comm_close(&self, _env: &mut ReplyEnv, request: &Message) -> Result<(), KernelError> {
        let close: CommClose = request.content_as()?;
        if self.comms.lock().unwrap().remove(&close.comm_id).is_none() {
            warn!(comm_id = %close.comm_id, "close for unknown comm");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel() -> Kernel {
        let exec = ExecConfig { registration_id: "kernel-unit".into(), timeout: None };
        Kernel::new(KernelConfig::default(), &exec, Vec::new()).unwrap()
    }

    #[test]
    fn kernel_info_reports_protocol_and_banner() {
        let info = kernel().kernel_info();
        assert_eq!(info.protocol_version, "5.3");
        assert_eq!(info.language_info.name, "scratch");
        assert!(info.banner.contains(":: nbk "));
        assert!(!info.help_links.is_empty());
    }

    #[test]
    fn traceback_starts_with_rule_and_names_the_error() {
        let kernel = kernel();
        let err = EvalError::Exception { class_name: "Failure".into(), message: "boom".into() };
        let reply = kernel.format_error(&err);
        assert_eq!(reply.ename, "Failure");
        assert_eq!(reply.evalue, "boom");
        assert_eq!(reply.traceback[0], ERROR_RULE);
        assert_eq!(reply.traceback[1], "Failure: boom");

        let incomplete = kernel.format_error(&EvalError::Incomplete { remaining: " int y =".into() });
        assert_eq!(incomplete.ename, "IncompleteSourceException");
        assert_eq!(incomplete.traceback.last().map(String::as_str), Some("int y ="));
    }
}
