//! PTY configuration types

use std::collections::HashMap;
use std::path::PathBuf;

use shellgate_protocol::Geometry;

use crate::command::SessionSpec;
use crate::config::SessionConfig;

/// Environment variable carrying the session id into the spawned process
pub const SESSION_ID_ENV: &str = "SHELLGATE_SESSION_ID";

/// Configuration for spawning a PTY
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Command to execute (shell or program)
    pub command: String,
    /// Arguments to the command
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Environment variables to set
    pub env: HashMap<String, String>,
    /// Initial terminal size
    pub size: Geometry,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            command: default_shell(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            size: Geometry::default(),
        }
    }
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".into())
}

impl PtyConfig {
    #[cfg(test)]
    pub fn command(cmd: impl Into<String>) -> Self {
        Self {
            command: cmd.into(),
            ..Default::default()
        }
    }

    /// Template config from the `[session]` section
    pub fn from_session_config(config: &SessionConfig) -> Self {
        Self {
            command: config.command.clone().unwrap_or_else(default_shell),
            args: config.args.clone(),
            cwd: config.cwd.as_ref().map(PathBuf::from),
            env: config.env.clone(),
            size: Geometry::default(),
        }
    }

    /// Specialize this template for one session
    ///
    /// Sets `TERM` from the client (falling back to `default_term`),
    /// `COLORTERM` for truecolor clients, and the session id.
    pub fn for_session(&self, spec: &SessionSpec, default_term: &str) -> Self {
        let term = spec
            .term
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(default_term);

        let mut config = self.clone().with_size(spec.geometry).with_env("TERM", term);
        if spec.truecolor {
            config = config.with_env("COLORTERM", "truecolor");
        }
        config.with_env(SESSION_ID_ENV, spec.session_id.to_string())
    }

    /// Add environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set initial size
    pub fn with_size(mut self, size: Geometry) -> Self {
        self.size = size;
        self
    }

    #[cfg(test)]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellgate_protocol::{decode, ControlMessage};
    use uuid::Uuid;

    fn spec(term: Option<&str>, truecolor: bool) -> SessionSpec {
        SessionSpec {
            session_id: Uuid::new_v4(),
            geometry: Geometry { cols: 120, rows: 40 },
            term: term.map(String::from),
            truecolor,
        }
    }

    #[test]
    fn test_default_config() {
        let config = PtyConfig::default();
        assert_eq!(config.size, Geometry { cols: 80, rows: 24 });
        assert!(config.args.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = PtyConfig::command("bash")
            .with_env("FOO", "bar")
            .with_size(Geometry { cols: 120, rows: 40 })
            .with_arg("-l");

        assert_eq!(config.command, "bash");
        assert_eq!(config.env.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(config.size, Geometry { cols: 120, rows: 40 });
        assert_eq!(config.args, vec!["-l"]);
    }

    #[test]
    fn test_from_session_config() {
        let mut session = SessionConfig {
            command: Some("/bin/zsh".into()),
            args: vec!["-i".into()],
            cwd: Some("/srv".into()),
            ..Default::default()
        };
        session.env.insert("LANG".into(), "C.UTF-8".into());

        let config = PtyConfig::from_session_config(&session);
        assert_eq!(config.command, "/bin/zsh");
        assert_eq!(config.args, vec!["-i"]);
        assert_eq!(config.cwd, Some(PathBuf::from("/srv")));
        assert_eq!(config.env.get("LANG").map(String::as_str), Some("C.UTF-8"));
    }

    #[test]
    fn test_for_session_sets_terminal_env() {
        let template = PtyConfig::command("sh");
        let spec = spec(Some("xterm-kitty"), true);
        let config = template.for_session(&spec, "xterm-256color");

        assert_eq!(config.size, spec.geometry);
        assert_eq!(config.env["TERM"], "xterm-kitty");
        assert_eq!(config.env["COLORTERM"], "truecolor");
        assert_eq!(config.env[SESSION_ID_ENV], spec.session_id.to_string());
    }

    #[test]
    fn test_for_session_true_color_client() {
        let raw = r#"{"action":"init","type":"xterm-256color","colorDepth":"TRUE_COLOR","features":["UNICODE"],"cols":80,"rows":24,"userAgent":"Mozilla/5.0"}"#;
        let ControlMessage::Init(init) = decode(raw).unwrap() else {
            panic!("expected init");
        };
        let spec = SessionSpec::from_init(Uuid::new_v4(), &init);

        let config = PtyConfig::command("sh").for_session(&spec, "vt100");
        assert_eq!(config.env["TERM"], "xterm-256color");
        assert_eq!(config.env["COLORTERM"], "truecolor");
        assert_eq!(config.size, Geometry { cols: 80, rows: 24 });
    }

    #[test]
    fn test_for_session_falls_back_to_default_term() {
        let template = PtyConfig::command("sh");

        let config = template.for_session(&spec(None, false), "vt100");
        assert_eq!(config.env["TERM"], "vt100");
        assert!(!config.env.contains_key("COLORTERM"));

        let config = template.for_session(&spec(Some(""), false), "vt100");
        assert_eq!(config.env["TERM"], "vt100");
    }
}
