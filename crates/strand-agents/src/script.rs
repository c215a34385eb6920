//! Bash runner executed inside each thread's pane.
//!
//! The script walks the candidate models with the same early-failure rule as
//! [`FailoverPolicy::evaluate`], timing each attempt in milliseconds, locates
//! the agent session through its tracking token, optionally runs a headless
//! synthesis pass over the working transcript, and finally publishes the
//! session id and a completion marker. Every side-channel file is written to
//! a temp name and renamed into place.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use crate::adapter::{AgentAdapter, RunSpec};
use crate::failover::{FailoverDecision, FailoverPolicy};
use crate::types::{AgentCommand, NormalizedModelSpec};
use crate::util::shell_quote;

/// Contents of `<thread>.done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMarker {
    pub exit_code: i32,
    /// 1-based index of the candidate that ran last.
    pub attempt: usize,
    /// Whole runner, all attempts.
    #[serde(default)]
    pub elapsed_secs: u64,
    /// The last attempt alone.
    #[serde(default)]
    pub last_elapsed_ms: u64,
}

impl CompletionMarker {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// The failover rule applied to the last attempt, out of `candidates`.
    pub fn verdict(&self, policy: &FailoverPolicy, candidates: usize) -> FailoverDecision {
        policy.evaluate(
            self.exit_code,
            Duration::from_millis(self.last_elapsed_ms),
            self.attempt < candidates,
        )
    }
}

/// Session title prefix plus a random suffix, unique per dispatch.
pub fn tracking_token(stream_id: &str, thread: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("strand-{stream_id}-{thread}-{}", &suffix[..12])
}

#[derive(Debug, Clone)]
pub struct SynthesisPhase<'a> {
    pub agent: &'a str,
    pub models: &'a [NormalizedModelSpec],
    pub transcript_path: &'a Path,
    pub output_path: &'a Path,
    pub working_session_path: &'a Path,
}

#[derive(Debug, Clone)]
pub struct ThreadScript<'a> {
    /// Display label, e.g. `01.02.03`.
    pub thread_label: &'a str,
    pub token: &'a str,
    pub cwd: &'a Path,
    pub agent: &'a str,
    pub candidates: &'a [NormalizedModelSpec],
    pub prompt_path: &'a Path,
    /// Existing session to continue, if any.
    pub session: Option<&'a str>,
    pub policy: FailoverPolicy,
    /// Prints the session id for the token on stdout.
    pub locator: AgentCommand,
    pub session_path: &'a Path,
    pub done_path: &'a Path,
    pub synthesis: Option<SynthesisPhase<'a>>,
}

const SESSION_PLACEHOLDER: &str = "__STRAND_SESSION_ID__";

impl ThreadScript<'_> {
    pub fn render(&self, adapter: &dyn AgentAdapter) -> String {
        let mut out = String::new();
        out.push_str("#!/usr/bin/env bash\n");
        let _ = writeln!(out, "# strand runner for thread {}", self.thread_label);
        out.push_str("set -u\n\n");
        let _ = writeln!(out, "cd {} || exit 1", quote_path(self.cwd));
        let _ = writeln!(out, "THRESHOLD_MS={}", self.policy.threshold_ms());
        out.push_str(PRELUDE);

        let runs: Vec<AgentCommand> = self
            .candidates
            .iter()
            .map(|model| {
                adapter.run_command(&RunSpec {
                    agent: self.agent,
                    model,
                    title: self.token,
                    session: self.session,
                    stdin: Some(self.prompt_path),
                })
            })
            .collect();
        render_attempts(&mut out, self.thread_label, self.candidates, &runs, None);

        out.push_str("WORK_STATUS=$STATUS\nWORK_ATTEMPT=$ATTEMPT\nWORK_ELAPSED_MS=$ELAPSED_MS\n");
        let _ = writeln!(
            out,
            "SESSION_ID=$({} 2>/dev/null | head -n 1)",
            self.locator.render_words()
        );

        if let Some(synthesis) = &self.synthesis {
            self.render_synthesis(&mut out, adapter, synthesis);
        }

        let _ = writeln!(
            out,
            "printf '%s\\n' \"$SESSION_ID\" | publish {}",
            quote_path(self.session_path)
        );
        publish_marker(&mut out, "WORK_STATUS", "WORK_ATTEMPT", "WORK_ELAPSED_MS", self.done_path);
        out.push_str("exit \"$WORK_STATUS\"\n");
        out
    }

    fn render_synthesis(
        &self,
        out: &mut String,
        adapter: &dyn AgentAdapter,
        synthesis: &SynthesisPhase<'_>,
    ) {
        let _ = writeln!(
            out,
            "\nprintf '%s\\n' \"$SESSION_ID\" | publish {}",
            quote_path(synthesis.working_session_path)
        );
        out.push_str("if [ -n \"$SESSION_ID\" ]; then\n");
        let export = adapter
            .export_command(SESSION_PLACEHOLDER)
            .render_words()
            .replace(&shell_quote(SESSION_PLACEHOLDER), "\"$SESSION_ID\"");
        let _ = writeln!(
            out,
            "  {export} > {} 2>/dev/null",
            quote_path(synthesis.transcript_path)
        );

        let runs: Vec<AgentCommand> = synthesis
            .models
            .iter()
            .map(|model| {
                adapter.headless_command(&RunSpec {
                    agent: synthesis.agent,
                    model,
                    title: self.token,
                    session: None,
                    stdin: Some(synthesis.transcript_path),
                })
            })
            .collect();
        let staging = format!("{}.tmp", synthesis.output_path.display());
        render_attempts(
            out,
            self.thread_label,
            synthesis.models,
            &runs,
            Some(&staging),
        );
        let _ = writeln!(
            out,
            "  if [ \"$STATUS\" -eq 0 ] && [ -s {staged} ]; then\n    mv -f {staged} {}\n  else\n    rm -f {staged}\n    printf '[strand] %s: synthesis failed (exit %s)\\n' {} \"$STATUS\"\n  fi",
            quote_path(synthesis.output_path),
            shell_quote(self.thread_label),
            staged = shell_quote(&staging),
        );
        out.push_str("fi\n\n");
    }
}

/// Runner for `resume`: continues one agent session in the thread's pane,
/// republishes the session id at once and a fresh marker when the agent exits.
#[derive(Debug, Clone)]
pub struct ResumeScript<'a> {
    pub thread_label: &'a str,
    pub cwd: &'a Path,
    pub session_id: &'a str,
    pub command: AgentCommand,
    /// Candidate index carried over from the run being resumed.
    pub attempt: usize,
    pub session_path: &'a Path,
    pub done_path: &'a Path,
}

impl ResumeScript<'_> {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("#!/usr/bin/env bash\n");
        let _ = writeln!(out, "# strand resume for thread {}", self.thread_label);
        out.push_str("set -u\n\n");
        let _ = writeln!(out, "cd {} || exit 1", quote_path(self.cwd));
        out.push_str(PRELUDE);
        let _ = writeln!(
            out,
            "printf '%s\\n' {} | publish {}",
            shell_quote(self.session_id),
            quote_path(self.session_path)
        );
        let _ = writeln!(
            out,
            "printf '[strand] %s: resuming %s\\n' {} {}",
            shell_quote(self.thread_label),
            shell_quote(self.session_id)
        );
        let _ = writeln!(
            out,
            "attempt {} {}",
            self.attempt.max(1),
            invocation(&self.command)
        );
        publish_marker(&mut out, "STATUS", "ATTEMPT", "ELAPSED_MS", self.done_path);
        out.push_str("exit \"$STATUS\"\n");
        out
    }
}

fn publish_marker(out: &mut String, status: &str, attempt: &str, elapsed_ms: &str, done_path: &Path) {
    let _ = writeln!(
        out,
        "printf '{{\"exitCode\":%d,\"attempt\":%d,\"elapsedSecs\":%d,\"lastElapsedMs\":%d}}\\n' \"${status}\" \"${attempt}\" \"$SECONDS\" \"${elapsed_ms}\" | publish {}",
        quote_path(done_path)
    );
}

const PRELUDE: &str = r#"
STATUS=1
ELAPSED_MS=0
ATTEMPT=0

# now_ms: wall clock in milliseconds, whole seconds where bash lacks EPOCHREALTIME.
now_ms() {
  local now=${EPOCHREALTIME:-}
  if [ -n "$now" ]; then
    now=${now//[.,]/}
    echo $(( 10#$now / 1000 ))
  else
    echo $(( SECONDS * 1000 ))
  fi
}

# attempt <index> <command...>
attempt() {
  ATTEMPT=$1
  shift
  local started
  started=$(now_ms)
  "$@"
  STATUS=$?
  ELAPSED_MS=$(( $(now_ms) - started ))
}

# publish <path>: stdin to a temp file, then rename over <path>.
publish() {
  local tmp="$1.tmp.$$"
  cat > "$tmp" && mv -f "$tmp" "$1"
}

"#;

/// One unconditional first attempt, then one guarded block per remaining
/// candidate. Guards run in sequence, so once an attempt succeeds or fails
/// late every later guard is false.
fn render_attempts(
    out: &mut String,
    thread_label: &str,
    models: &[NormalizedModelSpec],
    commands: &[AgentCommand],
    stdout_to: Option<&str>,
) {
    let indent = if stdout_to.is_some() { "  " } else { "" };
    for (idx, (model, command)) in models.iter().zip(commands).enumerate() {
        let mut body = String::new();
        let _ = writeln!(
            body,
            "printf '[strand] %s: %s\\n' {} {}",
            shell_quote(thread_label),
            shell_quote(&model.label())
        );
        body.push_str(&format!("attempt {} {}", idx + 1, invocation(command)));
        if let Some(path) = stdout_to {
            body.push_str(" > ");
            body.push_str(&shell_quote(path));
        }
        body.push('\n');

        if idx == 0 {
            for line in body.lines() {
                let _ = writeln!(out, "{indent}{line}");
            }
        } else {
            let _ = writeln!(
                out,
                "{indent}if [ \"$STATUS\" -ne 0 ] && [ \"$ELAPSED_MS\" -lt \"$THRESHOLD_MS\" ]; then"
            );
            for line in body.lines() {
                let _ = writeln!(out, "{indent}  {line}");
            }
            let _ = writeln!(out, "{indent}fi");
        }
    }
    out.push('\n');
}

/// Command words for `attempt`; env assignments go through `env` since a
/// function call cannot take them as prefixes.
fn invocation(command: &AgentCommand) -> String {
    let mut rendered = String::new();
    let env: Vec<_> = command
        .env
        .iter()
        .filter(|(key, _)| !key.trim().is_empty())
        .collect();
    if !env.is_empty() {
        rendered.push_str("env");
        for (key, value) in env {
            rendered.push(' ');
            rendered.push_str(&shell_quote(&format!("{key}={value}")));
        }
        rendered.push(' ');
    }
    rendered.push_str(&command.render_words());
    if let Some(stdin) = &command.stdin {
        rendered.push_str(" < ");
        rendered.push_str(&quote_path(stdin));
    }
    rendered
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::OpencodeAdapter;
    use crate::failover::AttemptVerdict;
    use std::path::PathBuf;

    struct Paths {
        cwd: PathBuf,
        prompt: PathBuf,
        session: PathBuf,
        done: PathBuf,
        transcript: PathBuf,
        output: PathBuf,
        working: PathBuf,
    }

    fn paths() -> Paths {
        let scratch = PathBuf::from("/tmp/strand");
        Paths {
            cwd: PathBuf::from("/repo"),
            prompt: scratch.join("auth-01.01.01.prompt.md"),
            session: scratch.join("01.01.01.session"),
            done: scratch.join("01.01.01.done"),
            transcript: scratch.join("auth-01.01.01.transcript"),
            output: scratch.join("auth-01.01.01.synthesis.json"),
            working: scratch.join("auth-01.01.01.working-session"),
        }
    }

    fn script<'a>(paths: &'a Paths, models: &'a [NormalizedModelSpec]) -> ThreadScript<'a> {
        ThreadScript {
            thread_label: "01.01.01",
            token: "strand-auth-01.01.01-abc",
            cwd: &paths.cwd,
            agent: "build",
            candidates: models,
            prompt_path: &paths.prompt,
            session: None,
            policy: FailoverPolicy::new(Duration::from_secs(10)),
            locator: AgentCommand::new("strand").args([
                "locate-session",
                "--token",
                "strand-auth-01.01.01-abc",
            ]),
            session_path: &paths.session,
            done_path: &paths.done,
            synthesis: None,
        }
    }

    #[test]
    fn later_candidates_are_guarded_by_early_failure() {
        let paths = paths();
        let models = vec![
            NormalizedModelSpec::new("a/one"),
            NormalizedModelSpec::new("b/two").with_variant("high"),
        ];
        let rendered = script(&paths, &models).render(&OpencodeAdapter::default());

        assert!(rendered.starts_with("#!/usr/bin/env bash\n"));
        assert!(rendered.contains("THRESHOLD_MS=10000\n"));
        let first = rendered
            .find("attempt 1 'opencode' 'run' '--model' 'a/one'")
            .expect("first attempt");
        let guard = rendered
            .find("if [ \"$STATUS\" -ne 0 ] && [ \"$ELAPSED_MS\" -lt \"$THRESHOLD_MS\" ]; then")
            .expect("guard");
        let second = rendered
            .find("attempt 2 'opencode' 'run' '--model' 'b/two' '--variant' 'high'")
            .expect("second attempt");
        assert!(first < guard && guard < second);
        assert!(rendered.contains("< '/tmp/strand/auth-01.01.01.prompt.md'"));
        assert!(rendered.contains(
            "SESSION_ID=$('strand' 'locate-session' '--token' 'strand-auth-01.01.01-abc' 2>/dev/null | head -n 1)"
        ));
        assert!(rendered.contains("| publish '/tmp/strand/01.01.01.done'"));
        assert!(rendered.contains("\"$WORK_ELAPSED_MS\" | publish"));
        assert!(rendered.contains("EPOCHREALTIME"));
        assert!(!rendered.contains("$(( SECONDS - "));
        assert!(rendered.ends_with("exit \"$WORK_STATUS\"\n"));
        assert!(!rendered.contains("synthesis"));
    }

    #[test]
    fn synthesis_phase_exports_transcript_and_stages_output() {
        let paths = paths();
        let models = vec![NormalizedModelSpec::new("a/one")];
        let synth_models = vec![NormalizedModelSpec::new("c/small")];
        let mut script = script(&paths, &models);
        script.synthesis = Some(SynthesisPhase {
            agent: "summarize",
            models: &synth_models,
            transcript_path: &paths.transcript,
            output_path: &paths.output,
            working_session_path: &paths.working,
        });
        let rendered = script.render(&OpencodeAdapter::default());

        assert!(rendered.contains(
            "'opencode' 'export' \"$SESSION_ID\" > '/tmp/strand/auth-01.01.01.transcript'"
        ));
        assert!(rendered.contains("'--agent' 'summarize'"));
        assert!(rendered.contains("'--format' 'json' < '/tmp/strand/auth-01.01.01.transcript' > '/tmp/strand/auth-01.01.01.synthesis.json.tmp'"));
        assert!(rendered.contains("publish '/tmp/strand/auth-01.01.01.working-session'"));
        // The marker reports the working phase, not synthesis.
        let restore = rendered.find("WORK_STATUS=$STATUS").expect("work status");
        let synth = rendered.find("'--agent' 'summarize'").expect("synthesis run");
        assert!(restore < synth);
    }

    #[test]
    fn env_is_passed_through_env_command() {
        let mut command = AgentCommand::new("opencode").arg("run");
        command.env.push(("OPENCODE_LOG".to_string(), "debug".to_string()));
        assert_eq!(invocation(&command), "env 'OPENCODE_LOG=debug' 'opencode' 'run'");
    }

    #[test]
    fn tracking_tokens_are_unique_and_prefixed() {
        let a = tracking_token("auth", "01.01.01");
        let b = tracking_token("auth", "01.01.01");
        assert!(a.starts_with("strand-auth-01.01.01-"));
        assert_eq!(a.len(), "strand-auth-01.01.01-".len() + 12);
        assert_ne!(a, b);
    }

    #[test]
    fn marker_uses_camel_case_fields() {
        let marker: CompletionMarker = serde_json::from_str(
            r#"{"exitCode":3,"attempt":2,"elapsedSecs":41,"lastElapsedMs":30500}"#,
        )
        .expect("decode");
        assert!(!marker.succeeded());
        assert_eq!(marker.attempt, 2);
        assert_eq!(marker.last_elapsed_ms, 30_500);

        let older: CompletionMarker =
            serde_json::from_str(r#"{"exitCode":0,"attempt":1}"#).expect("decode older");
        assert_eq!(older.elapsed_secs, 0);
        assert_eq!(older.last_elapsed_ms, 0);
    }

    #[test]
    fn marker_verdict_explains_why_failover_stopped() {
        let policy = FailoverPolicy::new(Duration::from_secs(10));
        let marker = |attempt, last_elapsed_ms| CompletionMarker {
            exit_code: 1,
            attempt,
            elapsed_secs: 60,
            last_elapsed_ms,
        };

        let late = marker(1, 45_000).verdict(&policy, 2);
        assert_eq!(late.verdict, AttemptVerdict::Failed);
        assert!(late.reason.contains("early-failure window"));

        let exhausted = marker(2, 900).verdict(&policy, 2);
        assert_eq!(exhausted.verdict, AttemptVerdict::Failed);
        assert!(exhausted.reason.contains("no candidate models left"));
    }

    #[test]
    fn resume_runner_republishes_session_and_marker() {
        let paths = paths();
        let rendered = ResumeScript {
            thread_label: "01.01.01",
            cwd: &paths.cwd,
            session_id: "ses_42",
            command: AgentCommand::new("opencode").args(["--session", "ses_42"]),
            attempt: 2,
            session_path: &paths.session,
            done_path: &paths.done,
        }
        .render();

        let session = rendered
            .find("printf '%s\\n' 'ses_42' | publish '/tmp/strand/01.01.01.session'")
            .expect("session published");
        let run = rendered
            .find("attempt 2 'opencode' '--session' 'ses_42'")
            .expect("resume attempt");
        let marker = rendered
            .find("| publish '/tmp/strand/01.01.01.done'")
            .expect("marker published");
        assert!(session < run && run < marker);
        assert!(rendered.contains("\"$STATUS\" \"$ATTEMPT\" \"$SECONDS\" \"$ELAPSED_MS\""));
        assert!(rendered.ends_with("exit \"$STATUS\"\n"));
    }
}
