//! Tests for single-flight task coordination.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cargo_lens::config::RunnerConfig;
use cargo_lens::diagnostics::Severity;
use cargo_lens::sink::{BufferedText, CollectingDiagnostics, Notice, RecordingNotifier, TextSink};
use cargo_lens::task::{
    CheckSupport, Invocation, Sinks, TaskCoordinator, TaskError, TaskOutcome, TaskRequest,
};
use tempfile::TempDir;

const SIMPLE_ERROR: &str = r#"{"reason":"compiler-message","package_id":"demo","message":{"children":[],"code":null,"level":"error","message":"cannot find value `x` in this scope","spans":[{"line_start":3,"line_end":3,"column_start":5,"column_end":6,"is_primary":true,"label":"not found in this scope","file_name":"src/main.rs","expansion":null}]}}"#;
const ARTIFACT: &str = r#"{"reason":"compiler-artifact","package_id":"demo","fresh":true}"#;

struct Harness {
    coordinator: TaskCoordinator,
    diagnostics: Arc<CollectingDiagnostics>,
    text: Arc<BufferedText>,
    notices: Arc<RecordingNotifier>,
    dir: TempDir,
}

impl Harness {
    fn with_config(config: &RunnerConfig) -> Self {
        let diagnostics = Arc::new(CollectingDiagnostics::new());
        let text = Arc::new(BufferedText::new());
        let notices = Arc::new(RecordingNotifier::new());
        let coordinator = TaskCoordinator::new(
            config,
            Sinks {
                diagnostics: diagnostics.clone(),
                text: text.clone(),
                notifier: notices.clone(),
            },
        );
        Self {
            coordinator,
            diagnostics,
            text,
            notices,
            dir: TempDir::new().unwrap(),
        }
    }

    /// Uses `sh` as the build tool so `-c <script>` acts as a subcommand.
    fn new() -> Self {
        Self::with_config(&RunnerConfig {
            cargo_path: "sh".to_string(),
            ..Default::default()
        })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn script(&self, script: &str) -> TaskRequest {
        TaskRequest::new("-c", self.path()).args([script])
    }

    fn write(&self, name: &str, lines: &[&str]) {
        std::fs::write(self.path().join(name), lines.join("\n") + "\n").unwrap();
    }

    async fn start(&self, request: TaskRequest) -> cargo_lens::task::TaskTicket {
        match self.coordinator.invoke(request).await.unwrap() {
            Invocation::Started(ticket) => ticket,
            Invocation::Dropped => panic!("Expected the task to start"),
        }
    }
}

#[tokio::test]
async fn routes_output_to_sinks() {
    let h = Harness::new();
    h.write("events.jsonl", &[ARTIFACT, SIMPLE_ERROR, "{not json", "plain stdout"]);

    let ticket = h.start(h.script("cat events.jsonl; echo 'on stderr' >&2")).await;
    let report = ticket.wait().await.unwrap();

    assert_eq!(report.exit_code(), Some(0));
    assert_eq!(report.diagnostics, 1);
    assert_eq!(report.malformed_lines, 1);

    let found = h.diagnostics.for_file(&h.path().join("src/main.rs"));
    assert_eq!(found.len(), 1);
    assert_eq!(
        found[0].message,
        "cannot find value `x` in this scope\nnot found in this scope"
    );
    assert_eq!(found[0].severity, Severity::Error);

    let lines = h.text.lines();
    assert!(lines[0].starts_with("Started sh -c "));
    assert!(lines.contains(&"plain stdout".to_string()));
    assert!(lines.contains(&"on stderr".to_string()));
    assert!(!lines.iter().any(|l| l.contains("compiler-artifact")));
    assert!(!lines.iter().any(|l| l.contains("not json")));
    assert!(lines.contains(&"Completed with code 0".to_string()));
    assert!(lines.last().unwrap().starts_with("Finished in "));
    assert!(!h.coordinator.is_running());
}

#[tokio::test]
async fn reports_nonzero_exit_code() {
    let h = Harness::new();

    let report = h.start(h.script("exit 101")).await.wait().await.unwrap();

    assert_eq!(report.exit_code(), Some(101));
    assert!(matches!(
        report.outcome,
        TaskOutcome::Exited { code: Some(101), .. }
    ));
    assert!(h.text.lines().contains(&"Completed with code 101".to_string()));
}

#[tokio::test]
async fn unforced_request_is_dropped_while_running() {
    let h = Harness::new();
    let first = h.start(h.script("sleep 30")).await;
    let first_id = first.id();

    let second = h.coordinator.invoke(h.script("echo second")).await.unwrap();

    assert!(matches!(second, Invocation::Dropped));
    assert_eq!(h.coordinator.current_task(), Some(first_id));
    assert!(!h.text.lines().iter().any(|l| l == "second"));

    assert!(h.coordinator.stop().await.unwrap());
    let report = first.wait().await.unwrap();
    assert!(report.is_cancelled());
}

#[tokio::test]
async fn forced_request_preempts_running_task() {
    let h = Harness::new();
    let first = h.start(h.script("echo first; sleep 30")).await;
    let first_id = first.id();

    let second = h
        .start(h.script("echo second").force(true))
        .await;

    // Preemption waits for the first task before starting the second.
    let first_report = tokio::time::timeout(Duration::from_millis(500), first.wait())
        .await
        .expect("first task should already be finished")
        .unwrap();
    assert!(first_report.is_cancelled());
    assert_ne!(second.id(), first_id);

    let second_report = second.wait().await.unwrap();
    assert_eq!(second_report.exit_code(), Some(0));

    let lines = h.text.lines();
    assert!(lines.contains(&"second".to_string()));
    // Only the second task reports completion.
    assert_eq!(lines.iter().filter(|l| l.starts_with("Completed")).count(), 1);
}

#[tokio::test]
async fn forced_request_when_idle_just_starts() {
    let h = Harness::new();

    let report = h
        .start(h.script("true").force(true))
        .await
        .wait()
        .await
        .unwrap();

    assert_eq!(report.exit_code(), Some(0));
}

#[tokio::test]
async fn new_task_clears_previous_diagnostics() {
    let h = Harness::new();
    h.write("events.jsonl", &[SIMPLE_ERROR]);

    h.start(h.script("cat events.jsonl")).await.wait().await.unwrap();
    assert_eq!(h.diagnostics.len(), 1);

    h.start(h.script("true")).await.wait().await.unwrap();
    assert!(h.diagnostics.is_empty());
}

#[tokio::test]
async fn stop_when_idle_is_noop() {
    let h = Harness::new();
    assert!(!h.coordinator.stop().await.unwrap());
}

#[tokio::test]
async fn cancelled_task_reports_nothing() {
    let h = Harness::new();
    let ticket = h.start(h.script("sleep 30")).await;

    assert!(h.coordinator.stop().await.unwrap());
    let report = ticket.wait().await.unwrap();

    assert_eq!(report.outcome, TaskOutcome::Cancelled);
    assert!(!h.text.lines().iter().any(|l| l.starts_with("Completed")));
    assert!(!h.coordinator.is_running());
}

#[tokio::test]
async fn missing_tool_notifies_and_stays_usable() {
    let h = Harness::with_config(&RunnerConfig {
        cargo_path: "/nonexistent/cargo-lens-cargo".to_string(),
        ..Default::default()
    });

    for _ in 0..2 {
        let result = h.coordinator.invoke(TaskRequest::new("build", h.path())).await;
        assert!(matches!(result, Err(TaskError::Spawn(_))));
        assert!(!h.coordinator.is_running());
    }

    let notices = h.notices.notices();
    assert_eq!(notices.len(), 2);
    assert_eq!(
        notices[0],
        Notice::ToolNotAvailable {
            program: "/nonexistent/cargo-lens-cargo".to_string()
        }
    );
    assert!(!h
        .text
        .lines()
        .iter()
        .any(|l| l.starts_with("Completed")));
}

#[tokio::test]
async fn diagnostic_commands_get_json_flags() {
    let h = Harness::new();

    // `sh build ...` fails, but the start line shows the arguments.
    let report = h
        .start(TaskRequest::new("build", h.path()).args(["--release"]))
        .await
        .wait()
        .await
        .unwrap();

    assert_ne!(report.exit_code(), Some(0));
    assert_eq!(
        report.command_line,
        "sh build --message-format json --release"
    );
}

#[tokio::test]
async fn environment_from_config_reaches_process() {
    let mut config = RunnerConfig {
        cargo_path: "sh".to_string(),
        ..Default::default()
    };
    config
        .env
        .insert("CARGO_LENS_FLAVOR".to_string(), "configured".to_string());
    let h = Harness::with_config(&config);

    h.start(h.script("echo $CARGO_LENS_FLAVOR")).await.wait().await.unwrap();

    assert!(h.text.lines().contains(&"configured".to_string()));
}

#[tokio::test]
async fn check_falls_back_when_unsupported() {
    let h = Harness::new();

    // `sh check --help` fails because there is no script named `check`.
    assert_eq!(
        h.coordinator.check_support(h.path()).await,
        CheckSupport::Unsupported
    );

    let report = h
        .coordinator
        .check(h.path(), None, false)
        .await
        .unwrap()
        .ticket()
        .expect("check should start")
        .wait()
        .await
        .unwrap();

    assert_eq!(report.command_line, "sh rustc -- -Zno-trans");
}

#[tokio::test]
async fn check_support_is_probed_once() {
    let h = Harness::new();
    assert_eq!(
        h.coordinator.check_support(h.path()).await,
        CheckSupport::Unsupported
    );

    // A `check` script would now make the probe succeed, but the result is cached.
    h.write("check", &["exit 0"]);
    assert_eq!(
        h.coordinator.check_support(h.path()).await,
        CheckSupport::Unsupported
    );
}

/// Fails the way a console sink does when stdout is a closed pipe.
struct PanickingText;

impl TextSink for PanickingText {
    fn append_line(&self, line: &str) {
        if line == "boom" {
            panic!("Failed printing to stdout: Broken pipe");
        }
    }
}

#[tokio::test]
async fn panicking_sink_releases_task_slot() {
    let dir = TempDir::new().unwrap();
    let config = RunnerConfig {
        cargo_path: "sh".to_string(),
        ..Default::default()
    };
    let coordinator = TaskCoordinator::new(
        &config,
        Sinks {
            diagnostics: Arc::new(CollectingDiagnostics::new()),
            text: Arc::new(PanickingText),
            notifier: Arc::new(RecordingNotifier::new()),
        },
    );
    let script = |body: &str| TaskRequest::new("-c", dir.path()).args([body]);

    let ticket = coordinator
        .invoke(script("echo boom; sleep 30"))
        .await
        .unwrap()
        .ticket()
        .expect("first task should start");
    let result = tokio::time::timeout(Duration::from_secs(5), ticket.wait())
        .await
        .expect("panicked task should end");
    assert!(matches!(result, Err(TaskError::Join(_))));
    assert!(!coordinator.is_running());

    // Unforced requests are accepted again.
    let report = coordinator
        .invoke(script("true"))
        .await
        .unwrap()
        .ticket()
        .expect("next task should start")
        .wait()
        .await
        .unwrap();
    assert_eq!(report.exit_code(), Some(0));

    // So are forced ones.
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.invoke(script("true").force(true)),
    )
    .await
    .expect("forced invoke should not spin")
    .unwrap()
    .ticket()
    .expect("forced task should start")
    .wait()
    .await
    .unwrap();
    assert_eq!(report.exit_code(), Some(0));
}

/// A task that appends `start`, then `stop` when killed or `done` when it
/// finishes, to `log` in its working directory.
fn logged(name: &str, seconds: u32) -> String {
    format!(
        "trap 'echo stop {name} >> log; exit 143' TERM; \
         echo start {name} >> log; sleep {seconds}; echo done {name} >> log"
    )
}

#[tokio::test]
async fn overlapping_forced_requests_run_one_at_a_time() {
    let h = Harness::new();
    let first = h.start(h.script(&logged("a", 30))).await;
    // Let the shell install its trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (x, y) = tokio::join!(
        h.coordinator.invoke(h.script(&logged("x", 2)).force(true)),
        h.coordinator.invoke(h.script(&logged("y", 2)).force(true)),
    );
    let mut tickets: Vec<_> = [x, y]
        .into_iter()
        .map(|invocation| invocation.unwrap().ticket().expect("forced request should start"))
        .collect();
    tickets.sort_by_key(cargo_lens::task::TaskTicket::id);
    let last = tickets.pop().unwrap();
    let preempted = tickets.pop().unwrap();

    assert!(h.coordinator.is_running());
    assert_eq!(h.coordinator.current_task(), Some(last.id()));

    let quick = Duration::from_millis(500);
    let first_report = tokio::time::timeout(quick, first.wait())
        .await
        .expect("first task should be finished")
        .unwrap();
    let preempted_report = tokio::time::timeout(quick, preempted.wait())
        .await
        .expect("preempted task should be finished")
        .unwrap();
    assert!(first_report.is_cancelled());
    assert!(preempted_report.is_cancelled());

    let last_report = last.wait().await.unwrap();
    assert_eq!(last_report.exit_code(), Some(0));
    assert!(!h.coordinator.is_running());

    // Every task that got to run ended before the next one began.
    let log = std::fs::read_to_string(h.path().join("log")).unwrap();
    let mut open: Option<&str> = None;
    for entry in log.lines() {
        let (event, name) = entry.split_once(' ').unwrap();
        match event {
            "start" => {
                assert_eq!(open, None, "{name} started while {open:?} was running\n{log}");
                open = Some(name);
            }
            // A task killed right after installing its trap stops without starting.
            "stop" | "done" => {
                assert!(
                    open == Some(name) || (event == "stop" && open.is_none()),
                    "unexpected {entry}\n{log}"
                );
                open = None;
            }
            other => panic!("Unexpected log entry {other}"),
        }
    }
    assert_eq!(open, None);
    assert!(log.starts_with("start a\nstop a\n"));
    assert_eq!(log.lines().filter(|l| l.starts_with("done")).count(), 1);

    let lines = h.text.lines();
    assert_eq!(lines.iter().filter(|l| l.starts_with("Started")).count(), 3);
    assert_eq!(lines.iter().filter(|l| l.starts_with("Completed")).count(), 1);
}
