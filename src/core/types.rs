//! DR-001: Recipe data model.
//!
//! A recipe is the in-memory form of a definition file: a bootstrap header,
//! environment assignments, build-time setup steps, and the run/start hooks.
//! All types derive Serialize so `inspect --json` can emit them unchanged.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Recipe
// ============================================================================

/// A parsed definition file. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    /// Top-level `Bootstrap:` / `From:` lines
    pub header: Header,

    /// `%environment` assignments (equality ignores order)
    #[serde(default)]
    pub environment: IndexMap<String, String>,

    /// `%setup` steps, in file order
    #[serde(default)]
    pub setup: Vec<SetupStep>,

    /// `%runscript` hook
    #[serde(default)]
    pub runscript: Option<RunCommand>,

    /// `%startscript` hook
    #[serde(default)]
    pub startscript: Option<RunCommand>,
}

impl Recipe {
    /// Resolve the command for a hook. Each hook falls back to the other
    /// when only one is declared.
    pub fn command_for(&self, hook: Hook) -> Option<&RunCommand> {
        match hook {
            Hook::Run => self.runscript.as_ref().or(self.startscript.as_ref()),
            Hook::Start => self.startscript.as_ref().or(self.runscript.as_ref()),
        }
    }

    /// Directories declared by `mkdir` setup steps, unresolved.
    pub fn declared_dirs(&self) -> impl Iterator<Item = &str> {
        self.setup.iter().flat_map(|step| match step {
            SetupStep::CreateDirs { paths, .. } => paths.iter().map(String::as_str).collect::<Vec<_>>(),
            SetupStep::Shell { .. } => Vec::new(),
        })
    }
}

/// Header key-value lines preceding the first section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Bootstrap agent (docker, library, localimage, ...)
    pub bootstrap: String,

    /// Base image reference (e.g. `registry/name:tag`)
    #[serde(default)]
    pub from: Option<String>,
}

// ============================================================================
// Sections
// ============================================================================

/// Recognized `%section` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Environment,
    Setup,
    Runscript,
    Startscript,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Environment,
        Section::Setup,
        Section::Runscript,
        Section::Startscript,
    ];

    /// Section name without the leading `%`.
    pub fn name(self) -> &'static str {
        match self {
            Section::Environment => "environment",
            Section::Setup => "setup",
            Section::Runscript => "runscript",
            Section::Startscript => "startscript",
        }
    }

    pub fn from_name(name: &str) -> Option<Section> {
        Section::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name())
    }
}

// ============================================================================
// Setup steps
// ============================================================================

/// A single build-time step from `%setup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SetupStep {
    /// `mkdir [-p] [-m MODE] PATH...`, always created with parents.
    CreateDirs {
        paths: Vec<String>,
        #[serde(default)]
        mode: Option<u32>,
    },
    /// Any other line, handed to bash verbatim.
    Shell { command: String },
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStep::CreateDirs { paths, mode: Some(m) } => {
                write!(f, "mkdir (mode {:o}) {}", m, paths.join(" "))
            }
            SetupStep::CreateDirs { paths, mode: None } => write!(f, "mkdir {}", paths.join(" ")),
            SetupStep::Shell { command } => write!(f, "shell: {}", command),
        }
    }
}

// ============================================================================
// Run commands
// ============================================================================

/// What a run hook executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunCommand {
    /// Direct exec of a program, no shell involved.
    Exec {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        /// Append caller arguments (`"$@"`)
        forward_args: bool,
    },
    /// A body that needs a shell; caller arguments become `$1..$n`.
    Script { body: String },
}

impl RunCommand {
    /// Program path for `Exec`, `None` for scripts.
    pub fn program(&self) -> Option<&str> {
        match self {
            RunCommand::Exec { program, .. } => Some(program),
            RunCommand::Script { .. } => None,
        }
    }
}

/// Lifecycle hook selecting `%runscript` or `%startscript`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hook {
    Run,
    Start,
}

impl Hook {
    pub fn section(self) -> Section {
        match self {
            Hook::Run => Section::Runscript,
            Hook::Start => Section::Startscript,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Run => write!(f, "run"),
            Hook::Start => write!(f, "start"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(program: &str) -> RunCommand {
        RunCommand::Exec {
            program: program.to_string(),
            args: vec![],
            forward_args: true,
        }
    }

    fn recipe(run: Option<RunCommand>, start: Option<RunCommand>) -> Recipe {
        Recipe {
            header: Header {
                bootstrap: "docker".to_string(),
                from: Some("alpine:3".to_string()),
            },
            environment: IndexMap::new(),
            setup: vec![],
            runscript: run,
            startscript: start,
        }
    }

    #[test]
    fn test_dr001_hook_fallback_to_runscript() {
        let r = recipe(Some(exec("/bin/run")), None);
        assert_eq!(r.command_for(Hook::Start).and_then(|c| c.program()), Some("/bin/run"));
        assert_eq!(r.command_for(Hook::Run).and_then(|c| c.program()), Some("/bin/run"));
    }

    #[test]
    fn test_dr001_hook_fallback_to_startscript() {
        let r = recipe(None, Some(exec("/bin/start")));
        assert_eq!(r.command_for(Hook::Run).and_then(|c| c.program()), Some("/bin/start"));
    }

    #[test]
    fn test_dr001_hooks_stay_distinct() {
        let r = recipe(Some(exec("/bin/run")), Some(exec("/bin/start")));
        assert_eq!(r.command_for(Hook::Run).and_then(|c| c.program()), Some("/bin/run"));
        assert_eq!(r.command_for(Hook::Start).and_then(|c| c.program()), Some("/bin/start"));
    }

    #[test]
    fn test_dr001_environment_equality_ignores_order() {
        let mut a = recipe(Some(exec("/x")), None);
        let mut b = a.clone();
        a.environment.insert("A".into(), "1".into());
        a.environment.insert("B".into(), "2".into());
        b.environment.insert("B".into(), "2".into());
        b.environment.insert("A".into(), "1".into());
        assert_eq!(a, b);
    }

    #[test]
    fn test_dr001_section_names() {
        for s in Section::ALL {
            assert_eq!(Section::from_name(s.name()), Some(s));
        }
        assert_eq!(Section::from_name("post"), None);
        assert_eq!(Section::Runscript.to_string(), "%runscript");
        assert_eq!(Hook::Start.section(), Section::Startscript);
    }

    #[test]
    fn test_dr001_declared_dirs() {
        let mut r = recipe(Some(exec("/x")), None);
        r.setup = vec![
            SetupStep::CreateDirs {
                paths: vec!["a".into(), "b".into()],
                mode: None,
            },
            SetupStep::Shell {
                command: "touch c".into(),
            },
            SetupStep::CreateDirs {
                paths: vec!["d".into()],
                mode: Some(0o700),
            },
        ];
        let dirs: Vec<_> = r.declared_dirs().collect();
        assert_eq!(dirs, vec!["a", "b", "d"]);
    }

    #[test]
    fn test_dr001_json_shape() {
        let r = recipe(Some(exec("/bin/echo")), None);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["header"]["bootstrap"], "docker");
        assert_eq!(json["runscript"]["kind"], "exec");
        assert_eq!(json["runscript"]["forward_args"], true);
        assert!(json["startscript"].is_null());
    }
}
