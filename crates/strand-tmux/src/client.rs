//! Typed tmux operations behind the [`Multiplexer`] trait.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::command::TmuxCli;
use crate::error::TmuxError;

/// Stable tmux pane identity (`%N`). Never reused while the server lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaneId(pub String);

impl PaneId {
    pub fn parse(raw: &str) -> Result<Self, TmuxError> {
        let trimmed = raw.trim();
        let valid = trimmed.len() > 1
            && trimmed.starts_with('%')
            && trimmed[1..].bytes().all(|b| b.is_ascii_digit());
        if !valid {
            return Err(TmuxError::Parse {
                context: format!("expected pane id like %12, got '{trimmed}'"),
            });
        }
        Ok(PaneId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitDirection {
    /// New pane to the right (`-h`).
    Horizontal,
    /// New pane below (`-v`).
    Vertical,
}

impl SplitDirection {
    fn flag(self) -> &'static str {
        match self {
            SplitDirection::Horizontal => "-h",
            SplitDirection::Vertical => "-v",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOptions {
    pub direction: SplitDirection,
    /// Span the whole window instead of only the target pane (`-f`).
    pub full_span: bool,
    /// Size of the new pane in lines or columns.
    pub size: Option<u32>,
}

impl SplitOptions {
    pub fn new(direction: SplitDirection) -> Self {
        Self {
            direction,
            full_span: false,
            size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPane {
    pub pane_id: PaneId,
    pub window_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    pub pane_id: PaneId,
    pub window_index: u32,
    pub dead: bool,
    pub dead_status: Option<i32>,
}

/// The subset of tmux the execution backend drives.
pub trait Multiplexer {
    fn has_session(&self, session: &str) -> Result<bool, TmuxError>;

    /// Start a detached session whose first pane runs `command`.
    fn new_session(&self, session: &str, cwd: &Path, command: &str)
        -> Result<WindowPane, TmuxError>;

    fn split_window(
        &self,
        target: &PaneId,
        options: &SplitOptions,
        cwd: &Path,
        command: &str,
    ) -> Result<PaneId, TmuxError>;

    /// Detached window named `name` running `command`.
    fn new_window(
        &self,
        session: &str,
        name: &str,
        cwd: &Path,
        command: &str,
    ) -> Result<WindowPane, TmuxError>;

    fn set_option(&self, session: &str, key: &str, value: &str) -> Result<(), TmuxError>;

    fn swap_pane(&self, source: &PaneId, target: &PaneId) -> Result<(), TmuxError>;

    fn list_panes(&self, session: &str) -> Result<Vec<PaneInfo>, TmuxError>;

    /// Kill whatever runs in `pane` and start `command` in its place.
    fn respawn_pane(&self, pane: &PaneId, cwd: &Path, command: &str) -> Result<(), TmuxError>;

    fn kill_session(&self, session: &str) -> Result<(), TmuxError>;
}

const PANE_FORMAT: &str = "#{pane_id}\t#{window_index}";
const LIST_FORMAT: &str = "#{pane_id}\t#{window_index}\t#{pane_dead}\t#{pane_dead_status}";

#[derive(Debug, Clone, Default)]
pub struct TmuxClient {
    cli: TmuxCli,
}

impl TmuxClient {
    pub fn new(cli: TmuxCli) -> Self {
        Self { cli }
    }

    pub fn cli(&self) -> &TmuxCli {
        &self.cli
    }
}

fn exact(session: &str) -> String {
    format!("={session}")
}

fn path_arg(cwd: &Path) -> String {
    cwd.to_string_lossy().into_owned()
}

impl Multiplexer for TmuxClient {
    fn has_session(&self, session: &str) -> Result<bool, TmuxError> {
        match self.cli.run(["has-session", "-t", &exact(session)]) {
            Ok(_) => Ok(true),
            Err(err) if err.is_missing() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn new_session(
        &self,
        session: &str,
        cwd: &Path,
        command: &str,
    ) -> Result<WindowPane, TmuxError> {
        let output = self.cli.run([
            "new-session",
            "-d",
            "-P",
            "-F",
            PANE_FORMAT,
            "-s",
            session,
            "-c",
            &path_arg(cwd),
            command,
        ])?;
        parse_window_pane(&output.stdout)
    }

    fn split_window(
        &self,
        target: &PaneId,
        options: &SplitOptions,
        cwd: &Path,
        command: &str,
    ) -> Result<PaneId, TmuxError> {
        let mut args = vec![
            "split-window".to_string(),
            "-d".to_string(),
            options.direction.flag().to_string(),
        ];
        if options.full_span {
            args.push("-f".to_string());
        }
        if let Some(size) = options.size {
            args.push("-l".to_string());
            args.push(size.to_string());
        }
        args.extend([
            "-P".to_string(),
            "-F".to_string(),
            "#{pane_id}".to_string(),
            "-t".to_string(),
            target.to_string(),
            "-c".to_string(),
            path_arg(cwd),
            command.to_string(),
        ]);
        let output = self.cli.run(&args)?;
        PaneId::parse(&output.stdout)
    }

    fn new_window(
        &self,
        session: &str,
        name: &str,
        cwd: &Path,
        command: &str,
    ) -> Result<WindowPane, TmuxError> {
        let output = self.cli.run([
            "new-window",
            "-d",
            "-P",
            "-F",
            PANE_FORMAT,
            "-n",
            name,
            "-t",
            &format!("{}:", exact(session)),
            "-c",
            &path_arg(cwd),
            command,
        ])?;
        parse_window_pane(&output.stdout)
    }

    fn set_option(&self, session: &str, key: &str, value: &str) -> Result<(), TmuxError> {
        self.cli
            .run(["set-option", "-t", &exact(session), key, value])?;
        Ok(())
    }

    fn swap_pane(&self, source: &PaneId, target: &PaneId) -> Result<(), TmuxError> {
        self.cli
            .run(["swap-pane", "-d", "-s", source.as_str(), "-t", target.as_str()])?;
        Ok(())
    }

    fn list_panes(&self, session: &str) -> Result<Vec<PaneInfo>, TmuxError> {
        let output = self
            .cli
            .run(["list-panes", "-s", "-t", &exact(session), "-F", LIST_FORMAT])?;
        parse_pane_list(&output.stdout)
    }

    fn respawn_pane(&self, pane: &PaneId, cwd: &Path, command: &str) -> Result<(), TmuxError> {
        self.cli.run([
            "respawn-pane",
            "-k",
            "-t",
            pane.as_str(),
            "-c",
            &path_arg(cwd),
            command,
        ])?;
        Ok(())
    }

    fn kill_session(&self, session: &str) -> Result<(), TmuxError> {
        self.cli.run(["kill-session", "-t", &exact(session)])?;
        Ok(())
    }
}

fn parse_window_index(raw: &str) -> Result<u32, TmuxError> {
    raw.trim().parse().map_err(|_| TmuxError::Parse {
        context: format!("expected window index, got '{raw}'"),
    })
}

pub fn parse_window_pane(stdout: &str) -> Result<WindowPane, TmuxError> {
    let line = stdout.lines().next().unwrap_or_default();
    let (pane, window) = line.split_once('\t').ok_or_else(|| TmuxError::Parse {
        context: format!("expected '<pane>\\t<window>', got '{line}'"),
    })?;
    Ok(WindowPane {
        pane_id: PaneId::parse(pane)?,
        window_index: parse_window_index(window)?,
    })
}

pub fn parse_pane_list(stdout: &str) -> Result<Vec<PaneInfo>, TmuxError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 4 {
                return Err(TmuxError::Parse {
                    context: format!("expected 4 tab-separated pane fields, got '{line}'"),
                });
            }
            Ok(PaneInfo {
                pane_id: PaneId::parse(fields[0])?,
                window_index: parse_window_index(fields[1])?,
                dead: fields[2].trim() == "1",
                dead_status: fields[3].trim().parse().ok(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pane_id_requires_percent_prefix() {
        assert_eq!(PaneId::parse(" %12\n").expect("valid").as_str(), "%12");
        assert!(PaneId::parse("12").is_err());
        assert!(PaneId::parse("%").is_err());
        assert!(PaneId::parse("%1a").is_err());
    }

    #[test]
    fn parses_window_pane_output() {
        let pane = parse_window_pane("%5\t3\n").expect("parse");
        assert_eq!(
            pane,
            WindowPane {
                pane_id: PaneId("%5".to_string()),
                window_index: 3
            }
        );
        assert!(parse_window_pane("%5").is_err());
    }

    #[test]
    fn parses_pane_list_with_dead_panes() {
        let panes = parse_pane_list("%0\t0\t0\t\n%1\t0\t1\t2\n\n%4\t1\t1\t0\n").expect("parse");
        assert_eq!(panes.len(), 3);
        assert!(!panes[0].dead);
        assert_eq!(panes[0].dead_status, None);
        assert!(panes[1].dead);
        assert_eq!(panes[1].dead_status, Some(2));
        assert_eq!(panes[2].window_index, 1);
        assert_eq!(panes[2].dead_status, Some(0));
    }

    #[test]
    fn pane_list_rejects_short_lines() {
        assert!(matches!(
            parse_pane_list("%0\t0\n"),
            Err(TmuxError::Parse { .. })
        ));
    }

    #[test]
    fn split_renders_full_span_and_size_flags() {
        // Echo the arguments back through a fake binary and inspect them.
        let dir = tempfile::tempdir().expect("tempdir");
        let fake = dir.path().join("tmux");
        std::fs::write(&fake, "#!/bin/sh\necho \"$*\" > \"$0.args\"\necho '%9'\n")
            .expect("write fake");
        make_executable(&fake);

        let client = TmuxClient::new(TmuxCli::new(&fake));
        let mut options = SplitOptions::new(SplitDirection::Vertical);
        options.full_span = true;
        options.size = Some(3);
        let pane = client
            .split_window(&PaneId("%1".to_string()), &options, dir.path(), "strand pager")
            .expect("split");
        assert_eq!(pane.as_str(), "%9");

        let args = std::fs::read_to_string(dir.path().join("tmux.args")).expect("args");
        assert!(args.starts_with("split-window -d -v -f -l 3 -P -F #{pane_id} -t %1 -c "));
        assert!(args.trim_end().ends_with("strand pager"));
    }

    fn fake_tmux(dir: &Path, stderr: &str) -> TmuxClient {
        let fake = dir.join("tmux");
        std::fs::write(&fake, format!("#!/bin/sh\necho '{stderr}' >&2\nexit 1\n"))
            .expect("write fake");
        make_executable(&fake);
        TmuxClient::new(TmuxCli::new(&fake))
    }

    #[test]
    fn has_session_is_false_only_when_nothing_is_there() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = fake_tmux(dir.path(), "no server running on /tmp/tmux-0/default");
        assert!(!client.has_session("strand-a-s01").expect("no server"));

        let dir = tempfile::tempdir().expect("tempdir");
        let client = fake_tmux(dir.path(), "session not found: strand-a-s01");
        assert!(!client.has_session("strand-a-s01").expect("no session"));
    }

    #[test]
    fn has_session_surfaces_unreachable_server() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = fake_tmux(
            dir.path(),
            "error connecting to /tmp/tmux-0/default (Permission denied)",
        );
        assert!(matches!(
            client.has_session("strand-a-s01"),
            Err(TmuxError::CommandFailed { .. })
        ));
    }

    #[test]
    fn has_session_surfaces_missing_binary() {
        let client = TmuxClient::new(TmuxCli::new("/definitely/missing/tmux-binary"));
        assert!(matches!(
            client.has_session("strand-a-s01"),
            Err(TmuxError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    }
}
