use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use nbk_exec::{
    scratch, CodeEvaluator, EvalError, ExecConfig, ExecutionControl, ExecutionControlProvider, IsComplete,
    TimeUnit,
};

struct Session {
    control: Arc<ExecutionControl>,
    evaluator: Arc<CodeEvaluator>,
}

fn session(timeout: Option<&str>, startup: Vec<String>) -> Session {
    let provider = Arc::new(ExecutionControlProvider::new());
    let config = ExecConfig {
        registration_id: "test-session".into(),
        timeout: timeout.map(str::to_string),
    };
    let control = provider.generate(&config.to_parameters()).unwrap();
    let evaluator = Arc::new(scratch::evaluator(provider, config.registration_id, startup));
    Session { control, evaluator }
}

#[test]
fn expressions_yield_values_and_declarations_do_not() {
    let s = session(None, Vec::new());
    assert_eq!(s.evaluator.eval("int a = 5;").unwrap(), None);
    assert_eq!(s.evaluator.eval("a * 2 + 1").unwrap(), Some("11".to_string()));
    assert_eq!(s.evaluator.eval("String g = \"hi \" + a; g").unwrap(), Some("hi 5".to_string()));
    assert_eq!(s.evaluator.eval("a = 7; a").unwrap(), Some("7".to_string()));
    assert_eq!(s.evaluator.eval("   ").unwrap(), None);
}

#[test]
fn incomplete_source_runs_complete_prefix() {
    let s = session(None, Vec::new());
    match s.evaluator.eval("int x = 1; int y =") {
        Err(EvalError::Incomplete { remaining }) => assert_eq!(remaining, "int y ="),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(s.evaluator.eval("x").unwrap(), Some("1".to_string()));

    match s.evaluator.is_complete("int x = 1; int y =") {
        IsComplete::Incomplete(indent) => assert!(indent.trim().is_empty()),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(s.evaluator.is_complete("int x = 1;"), IsComplete::Complete);
    assert_eq!(s.evaluator.is_complete("x)"), IsComplete::Invalid);
    assert_eq!(s.evaluator.is_complete("sleep(\n  fail("), IsComplete::Incomplete("    ".into()));
}

#[test]
fn timeout_reports_duration_unit_and_source() {
    let s = session(Some("200ms"), Vec::new());
    let start = Instant::now();
    match s.evaluator.eval("sleep(2000);") {
        Err(EvalError::Timeout { duration, unit, code }) => {
            assert_eq!(duration, 200);
            assert_eq!(unit, TimeUnit::Milliseconds);
            assert_eq!(code, "sleep(2000);");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(start.elapsed() < Duration::from_millis(1_500));
    assert_eq!(s.evaluator.eval("1 + 1").unwrap(), Some("2".to_string()));
}

#[test]
fn redefinition_unloads_superseded_artifact() {
    let s = session(None, Vec::new());
    s.evaluator.eval("int x = 1;").unwrap();
    let store = s.control.store();
    assert!(store.contains("unit_1"));

    s.evaluator.eval("int x = 2;").unwrap();
    let live: Vec<_> = s
        .evaluator
        .snippets()
        .into_iter()
        .filter(|snippet| snippet.name.as_deref() == Some("x"))
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].source, "int x = 2;");
    assert!(!store.contains("unit_1"));
    assert!(store.contains("unit_2"));
    assert_eq!(s.evaluator.eval("x").unwrap(), Some("2".to_string()));
}

#[test]
fn failure_taxonomy() {
    let s = session(None, Vec::new());
    match s.evaluator.eval("String s = 1;") {
        Err(EvalError::Compilation { diagnostics, .. }) => {
            assert!(diagnostics[0].contains("incompatible types"), "{diagnostics:?}")
        }
        other => panic!("unexpected {other:?}"),
    }
    match s.evaluator.eval("fail(\"boom\")") {
        Err(err @ EvalError::Exception { .. }) => {
            assert_eq!(err.ename(), "Failure");
            assert_eq!(err.to_string(), "Failure: boom");
        }
        other => panic!("unexpected {other:?}"),
    }
    match s.evaluator.eval("10 / 0") {
        Err(EvalError::Exception { class_name, .. }) => assert_eq!(class_name, "ArithmeticError"),
        other => panic!("unexpected {other:?}"),
    }
    match s.evaluator.eval("nope + 1") {
        Err(EvalError::Compilation { unresolved, .. }) => assert_eq!(unresolved, vec!["nope".to_string()]),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unresolved_declaration_recovers_once_dependency_exists() {
    let s = session(None, Vec::new());
    match s.evaluator.eval("int y = z + 1;") {
        Err(err @ EvalError::Unresolved { .. }) => {
            assert!(err.is_recoverable());
            assert!(err.to_string().contains('z'));
        }
        other => panic!("unexpected {other:?}"),
    }
    let pending = s.evaluator.snippets().into_iter().find(|s| s.name.as_deref() == Some("y")).unwrap();
    assert_eq!(s.evaluator.unresolved_dependencies(&pending.id), vec!["z".to_string()]);

    assert_eq!(s.evaluator.eval("int z = 41;").unwrap(), None);
    assert_eq!(s.evaluator.eval("y").unwrap(), Some("42".to_string()));
    assert!(s.evaluator.unresolved_dependencies(&pending.id).is_empty());
}

#[test]
fn startup_snippets_run_once_before_first_eval() {
    let s = session(None, vec!["int base = 10;".to_string()]);
    assert_eq!(s.evaluator.eval("base + 1").unwrap(), Some("11".to_string()));
    s.evaluator.eval("base = 1;").unwrap();
    assert_eq!(s.evaluator.eval("base").unwrap(), Some("1".to_string()));
}

#[test]
fn failed_startup_snippet_runs_again_on_next_eval() {
    let s = session(
        None,
        vec![
            "int tries = 0;".to_string(),
            "tries = tries + 1;".to_string(),
            "fail(\"boot \" + tries)".to_string(),
        ],
    );
    for _ in 0..2 {
        match s.evaluator.eval("1") {
            Err(EvalError::Exception { class_name, message }) => {
                assert_eq!(class_name, "Failure");
                assert_eq!(message, "boot 1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[test]
fn interrupt_from_another_thread() {
    let s = session(None, Vec::new());
    let evaluator = s.evaluator.clone();
    let running = thread::spawn(move || evaluator.eval("sleep(5000)"));

    let deadline = Instant::now() + Duration::from_secs(2);
    while s.control.interrupt() == 0 {
        assert!(Instant::now() < deadline, "evaluation never reached a worker");
        thread::sleep(Duration::from_millis(10));
    }
    match running.join().unwrap() {
        Err(EvalError::Interrupted { code }) => assert_eq!(code, "sleep(5000);"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(s.evaluator.eval("3").unwrap(), Some("3".to_string()));
}

#[test]
fn shutdown_stops_later_evaluations() {
    let s = session(None, Vec::new());
    s.evaluator.eval("int k = 1;").unwrap();
    s.evaluator.shutdown();
    assert!(matches!(s.evaluator.eval("k + 1"), Err(EvalError::Stopped)));
}

#[test]
fn completion_and_inspection_use_declared_names() {
    let s = session(None, Vec::new());
    s.evaluator.eval("int total = 3; int tally = 4; String name = \"n\";").unwrap();
    let completions = s.evaluator.complete("ta", 2);
    assert_eq!(completions.matches, vec!["tally".to_string()]);
    assert_eq!(completions.cursor_start, 0);
    assert_eq!(s.evaluator.inspect("total + 1", 2).as_deref(), Some("int total = 3"));
    assert_eq!(s.evaluator.inspect("+", 1), None);
}

#[test]
fn print_output_reaches_the_redirected_sink_in_order() {
    let s = session(None, Vec::new());
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = written.clone();
    s.evaluator
        .output()
        .redirect(Arc::new(move |text: &str| sink.lock().unwrap().push(text.to_string())));

    assert_eq!(s.evaluator.eval("int n = 2; print(\"n=\" + n); n + 1").unwrap(), Some("3".to_string()));
    match s.evaluator.eval("print(\"before\"); fail(\"after\"); print(\"never\")") {
        Err(EvalError::Exception { message, .. }) => assert_eq!(message, "after"),
        other => panic!("unexpected {other:?}"),
    }
    s.evaluator.output().reset();
    s.evaluator.eval("print(\"dropped\")").unwrap();

    assert_eq!(*written.lock().unwrap(), vec!["n=2\n".to_string(), "before\n".to_string()]);
}
