//! DR-002: Definition file parsing and validation.
//!
//! Parses the line-oriented recipe format and validates semantic constraints:
//! - `Bootstrap:` is mandatory, `From:` optional, nothing else in the header
//! - Only `%environment`, `%setup`, `%runscript`, `%startscript` sections
//! - At least one of `%runscript` / `%startscript` carries a command
//! - Bootstrap agent must be known; non-scratch bootstraps need `From:`

use super::builder;
use super::error::{Error, ParseError};
use super::shell;
use super::template;
use super::types::*;
use indexmap::IndexMap;
use std::path::Path;
use tracing::{debug, warn};

/// Bootstrap agents understood by Singularity/Apptainer.
pub const KNOWN_BOOTSTRAPS: &[&str] = &[
    "arch",
    "busybox",
    "debootstrap",
    "docker",
    "docker-archive",
    "docker-daemon",
    "library",
    "localimage",
    "oci",
    "oci-archive",
    "oras",
    "scratch",
    "shub",
    "yum",
    "zypper",
];

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a definition file from disk.
pub fn load_file(path: &Path) -> Result<Recipe, Error> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(load(&content)?)
}

/// A section body: header line number plus its raw `(line, text)` lines.
struct RawSection<'a> {
    line: usize,
    body: Vec<(usize, &'a str)>,
}

/// Parse a definition file from a string.
pub fn load(text: &str) -> Result<Recipe, ParseError> {
    let mut bootstrap: Option<String> = None;
    let mut from: Option<String> = None;
    let mut sections: IndexMap<Section, RawSection> = IndexMap::new();
    let mut current: Option<Section> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();

        if let Some(header) = trimmed.strip_prefix('%') {
            let mut words = header.split_whitespace();
            let name = words.next().unwrap_or("");
            let section = Section::from_name(name).ok_or_else(|| ParseError::UnknownSection {
                name: name.to_string(),
                line,
            })?;
            if words.next().is_some() {
                return Err(ParseError::SectionArguments {
                    name: name.to_string(),
                    line,
                });
            }
            if sections.contains_key(&section) {
                return Err(ParseError::DuplicateSection {
                    name: name.to_string(),
                    line,
                });
            }
            sections.insert(section, RawSection { line, body: Vec::new() });
            current = Some(section);
            continue;
        }

        match current {
            Some(section) => {
                if let Some(raw_section) = sections.get_mut(&section) {
                    raw_section.body.push((line, trimmed));
                }
            }
            None => {
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                let (key, value) = split_header(trimmed, line)?;
                let slot = match key.to_ascii_lowercase().as_str() {
                    "bootstrap" => &mut bootstrap,
                    "from" => &mut from,
                    _ => {
                        return Err(ParseError::UnknownHeader {
                            key: key.to_string(),
                            line,
                        })
                    }
                };
                if slot.is_some() {
                    return Err(ParseError::DuplicateHeader {
                        key: key.to_string(),
                        line,
                    });
                }
                *slot = Some(value.to_string());
            }
        }
    }

    let bootstrap = bootstrap.ok_or(ParseError::MissingHeader("Bootstrap"))?;

    let environment = match sections.get(&Section::Environment) {
        Some(s) => parse_environment(&s.body)?,
        None => IndexMap::new(),
    };
    let setup = match sections.get(&Section::Setup) {
        Some(s) => parse_setup(&s.body)?,
        None => Vec::new(),
    };
    let runscript = match sections.get(&Section::Runscript) {
        Some(s) => parse_run_command(&s.body)?,
        None => None,
    };
    let startscript = match sections.get(&Section::Startscript) {
        Some(s) => parse_run_command(&s.body)?,
        None => None,
    };

    if runscript.is_none() && startscript.is_none() {
        return Err(ParseError::MissingRunCommand);
    }

    debug!(
        bootstrap = %bootstrap,
        sections = sections.len(),
        first_section_line = sections.values().next().map(|s| s.line),
        "parsed recipe"
    );

    Ok(Recipe {
        header: Header { bootstrap, from },
        environment,
        setup,
        runscript,
        startscript,
    })
}

fn split_header(text: &str, line: usize) -> Result<(&str, &str), ParseError> {
    let malformed = || ParseError::MalformedHeader {
        text: text.to_string(),
        line,
    };
    let (key, value) = text.split_once(':').ok_or_else(malformed)?;
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() || key.contains(char::is_whitespace) {
        return Err(malformed());
    }
    Ok((key, value))
}

/// Lines that carry content: not blank, not a `#` comment.
fn content_lines<'a>(body: &'a [(usize, &'a str)]) -> impl Iterator<Item = (usize, &'a str)> {
    body.iter()
        .copied()
        .filter(|(_, text)| !text.is_empty() && !text.starts_with('#'))
}

fn words(text: &str, line: usize) -> Result<Vec<String>, ParseError> {
    shell::split_words(text).map_err(|message| ParseError::Syntax { message, line })
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_environment(body: &[(usize, &str)]) -> Result<IndexMap<String, String>, ParseError> {
    let mut env = IndexMap::new();
    for (line, text) in content_lines(body) {
        let invalid = || ParseError::InvalidEnvironment {
            text: text.to_string(),
            line,
        };
        let mut assignments: Vec<String> = words(text, line)?
            .into_iter()
            .take_while(|w| !w.starts_with('#'))
            .collect();
        if assignments.first().map(String::as_str) == Some("export") {
            assignments.remove(0);
        }
        if assignments.is_empty() {
            return Err(invalid());
        }
        for assignment in assignments {
            let (name, value) = assignment.split_once('=').ok_or_else(invalid)?;
            if !is_valid_name(name) {
                return Err(invalid());
            }
            if env.insert(name.to_string(), value.to_string()).is_some() {
                warn!(line, name, "environment variable assigned more than once; last value wins");
            }
        }
    }
    Ok(env)
}

fn parse_setup(body: &[(usize, &str)]) -> Result<Vec<SetupStep>, ParseError> {
    let mut steps = Vec::new();
    for (line, text) in content_lines(body) {
        let argv = words(text, line)?;
        let step = if shell::has_metachars(text) {
            None
        } else {
            parse_mkdir(&argv)
        };
        steps.push(step.unwrap_or_else(|| SetupStep::Shell {
            command: text.to_string(),
        }));
    }
    Ok(steps)
}

/// Recognize `mkdir [-p|--parents] [-m MODE|--mode MODE] [--] PATH...`.
fn parse_mkdir(argv: &[String]) -> Option<SetupStep> {
    let (cmd, rest) = argv.split_first()?;
    if cmd != "mkdir" {
        return None;
    }
    let mut paths = Vec::new();
    let mut mode = None;
    let mut options_done = false;
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        if options_done || !arg.starts_with('-') || arg == "-" {
            paths.push(arg.clone());
            continue;
        }
        match arg.as_str() {
            "-p" | "--parents" => {}
            "-m" | "--mode" => mode = Some(u32::from_str_radix(iter.next()?, 8).ok()?),
            "--" => options_done = true,
            _ => return None,
        }
    }
    if paths.is_empty() || !paths.iter().all(|p| builder::expands_only_rootfs(p)) {
        return None;
    }
    Some(SetupStep::CreateDirs { paths, mode })
}

fn parse_run_command(body: &[(usize, &str)]) -> Result<Option<RunCommand>, ParseError> {
    let lines: Vec<(usize, &str)> = content_lines(body).collect();
    match lines.as_slice() {
        [] => Ok(None),
        [(line, text)] => {
            let argv = words(text, *line)?;
            let exec = if shell::has_metachars(text) {
                None
            } else {
                parse_exec(argv)
            };
            Ok(Some(exec.unwrap_or_else(|| RunCommand::Script {
                body: text.to_string(),
            })))
        }
        many => {
            for (line, text) in many {
                words(text, *line)?;
            }
            let body = many.iter().map(|(_, t)| *t).collect::<Vec<_>>().join("\n");
            Ok(Some(RunCommand::Script { body }))
        }
    }
}

/// Recognize `[exec] PROGRAM [ARG...] ["$@"]` with no expansions left over.
fn parse_exec(mut argv: Vec<String>) -> Option<RunCommand> {
    if argv.first().map(String::as_str) == Some("exec") {
        argv.remove(0);
    }
    let forward_args = argv.last().map(String::as_str) == Some("$@");
    if forward_args {
        argv.pop();
    }
    if argv.iter().any(|w| w.contains('$')) {
        return None;
    }
    let (program, args) = argv.split_first()?;
    if program.is_empty() || program.contains('=') {
        return None;
    }
    Some(RunCommand::Exec {
        program: program.clone(),
        args: args.to_vec(),
        forward_args,
    })
}

/// Validate a parsed recipe. Returns a list of errors (empty = valid).
pub fn validate_recipe(recipe: &Recipe) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let bootstrap = recipe.header.bootstrap.to_ascii_lowercase();

    if !KNOWN_BOOTSTRAPS.contains(&bootstrap.as_str()) {
        errors.push(ValidationError {
            message: format!(
                "unknown bootstrap agent '{}' (expected one of: {})",
                recipe.header.bootstrap,
                KNOWN_BOOTSTRAPS.join(", ")
            ),
        });
    }

    match &recipe.header.from {
        None if bootstrap != "scratch" => errors.push(ValidationError {
            message: format!("bootstrap '{}' requires a From: line", recipe.header.bootstrap),
        }),
        Some(from) if template::has_placeholders(from) => errors.push(ValidationError {
            message: format!("From: '{}' has an unresolved template placeholder", from),
        }),
        _ => {}
    }

    for (name, value) in &recipe.environment {
        if template::has_placeholders(value) {
            errors.push(ValidationError {
                message: format!("environment '{}' has an unresolved template placeholder", name),
            });
        }
    }

    let hooks = [
        (Section::Runscript, &recipe.runscript),
        (Section::Startscript, &recipe.startscript),
    ];
    for (section, command) in hooks {
        if let Some(RunCommand::Exec { program, .. }) = command {
            if template::has_placeholders(program) {
                errors.push(ValidationError {
                    message: format!(
                        "{} command '{}' has an unresolved template placeholder",
                        section, program
                    ),
                });
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    const HALFPIPE: &str = r#"Bootstrap: docker
From: mindandbrain/halfpipe:1.2.2

%environment
  export HALFPIPE_RESOURCE_DIR=/home/fmriprep/.cache/halfpipe
  export TEMPLATEFLOW_HOME=/home/fmriprep/.cache/templateflow

%setup
  mkdir -p ${SINGULARITY_ROOTFS}/ext ${SINGULARITY_ROOTFS}/host

%runscript
  exec /usr/local/miniconda/bin/halfpipe "$@"

%startscript
  exec /usr/local/miniconda/bin/halfpipe "$@"
"#;

    #[test]
    fn test_dr002_load_halfpipe() {
        let r = load(HALFPIPE).unwrap();
        assert_eq!(r.header.bootstrap, "docker");
        assert_eq!(r.header.from.as_deref(), Some("mindandbrain/halfpipe:1.2.2"));
        assert_eq!(r.environment.len(), 2);
        assert_eq!(
            r.environment["TEMPLATEFLOW_HOME"],
            "/home/fmriprep/.cache/templateflow"
        );
        assert_eq!(
            r.setup,
            vec![SetupStep::CreateDirs {
                paths: vec![
                    "${SINGULARITY_ROOTFS}/ext".to_string(),
                    "${SINGULARITY_ROOTFS}/host".to_string()
                ],
                mode: None,
            }]
        );
        let expected = RunCommand::Exec {
            program: "/usr/local/miniconda/bin/halfpipe".to_string(),
            args: vec![],
            forward_args: true,
        };
        assert_eq!(r.runscript.as_ref(), Some(&expected));
        assert_eq!(r.startscript.as_ref(), Some(&expected));
        assert!(validate_recipe(&r).is_empty());
    }

    #[test]
    fn test_dr002_unknown_section() {
        let text = "Bootstrap: docker\nFrom: alpine\n%bogus\n  stuff\n%runscript\n  exec /bin/true\n";
        assert_eq!(
            load(text).unwrap_err(),
            ParseError::UnknownSection {
                name: "bogus".to_string(),
                line: 3
            }
        );
    }

    #[test]
    fn test_dr002_missing_run_command() {
        let text = "Bootstrap: docker\nFrom: alpine\n\n%environment\n  export A=1\n";
        assert_eq!(load(text).unwrap_err(), ParseError::MissingRunCommand);
    }

    #[test]
    fn test_dr002_empty_run_sections_count_as_missing() {
        let text = "Bootstrap: docker\nFrom: alpine\n%runscript\n  # nothing yet\n%startscript\n";
        assert_eq!(load(text).unwrap_err(), ParseError::MissingRunCommand);
    }

    #[test]
    fn test_dr002_startscript_only() {
        let text = "Bootstrap: docker\nFrom: alpine\n%startscript\n  exec /bin/sleep 60\n";
        let r = load(text).unwrap();
        assert!(r.runscript.is_none());
        assert_eq!(r.command_for(Hook::Run).and_then(|c| c.program()), Some("/bin/sleep"));
    }

    #[test]
    fn test_dr002_missing_bootstrap() {
        let text = "From: alpine\n%runscript\n  exec /bin/true\n";
        assert_eq!(load(text).unwrap_err(), ParseError::MissingHeader("Bootstrap"));
    }

    #[test]
    fn test_dr002_header_errors() {
        let unknown = "Bootstrap: docker\nStage: one\n%runscript\n exec /x\n";
        assert!(matches!(
            load(unknown).unwrap_err(),
            ParseError::UnknownHeader { line: 2, .. }
        ));

        let dup = "Bootstrap: docker\nbootstrap: library\n%runscript\n exec /x\n";
        assert!(matches!(
            load(dup).unwrap_err(),
            ParseError::DuplicateHeader { line: 2, .. }
        ));

        let malformed = "Bootstrap docker\n%runscript\n exec /x\n";
        assert!(matches!(
            load(malformed).unwrap_err(),
            ParseError::MalformedHeader { line: 1, .. }
        ));
    }

    #[test]
    fn test_dr002_header_keys_case_insensitive_and_comments() {
        let text = "# built nightly\nBOOTSTRAP: docker\nfrom: alpine:3\n\n%runscript\n exec /x\n";
        let r = load(text).unwrap();
        assert_eq!(r.header.bootstrap, "docker");
        assert_eq!(r.header.from.as_deref(), Some("alpine:3"));
    }

    #[test]
    fn test_dr002_duplicate_section() {
        let text = "Bootstrap: docker\n%runscript\n exec /a\n%runscript\n exec /b\n";
        assert!(matches!(
            load(text).unwrap_err(),
            ParseError::DuplicateSection { line: 4, .. }
        ));
    }

    #[test]
    fn test_dr002_section_arguments_rejected() {
        let text = "Bootstrap: docker\n%runscript -c /bin/bash\n exec /a\n";
        assert!(matches!(
            load(text).unwrap_err(),
            ParseError::SectionArguments { line: 2, .. }
        ));
    }

    #[test]
    fn test_dr002_environment_forms() {
        let text = r#"Bootstrap: docker
%environment
  export A=1 B="two words"
  C='$HOME/x'
  export A=3
  # comment
%runscript
  exec /x
"#;
        let r = load(text).unwrap();
        assert_eq!(r.environment["A"], "3");
        assert_eq!(r.environment["B"], "two words");
        assert_eq!(r.environment["C"], "$HOME/x");
        assert_eq!(r.environment.len(), 3);
    }

    #[test]
    fn test_dr002_environment_trailing_comment() {
        let text = "Bootstrap: docker\n%environment\n  export A=1 # note\n  B='#kept' #drop C=3\n%runscript\n exec /x\n";
        let r = load(text).unwrap();
        assert_eq!(r.environment["A"], "1");
        assert_eq!(r.environment["B"], "#kept");
        assert_eq!(r.environment.len(), 2);
    }

    #[test]
    fn test_dr002_environment_invalid() {
        for bad in ["export", "export A", "export 1A=x", "echo hi"] {
            let text = format!("Bootstrap: docker\n%environment\n  {}\n%runscript\n exec /x\n", bad);
            assert!(
                matches!(load(&text).unwrap_err(), ParseError::InvalidEnvironment { line: 3, .. }),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_dr002_unterminated_quote_is_syntax_error() {
        let text = "Bootstrap: docker\n%environment\n  export A=\"open\n%runscript\n exec /x\n";
        assert!(matches!(load(text).unwrap_err(), ParseError::Syntax { line: 3, .. }));
    }

    #[test]
    fn test_dr002_setup_steps() {
        let text = r#"Bootstrap: docker
%setup
  mkdir ${SINGULARITY_ROOTFS}/a
  mkdir -p -m 0700 secret
  touch ${SINGULARITY_ROOTFS}/marker
  mkdir -p /a/*
  mkdir -v x
%runscript
  exec /x
"#;
        let r = load(text).unwrap();
        assert_eq!(r.setup.len(), 5);
        assert_eq!(
            r.setup[0],
            SetupStep::CreateDirs {
                paths: vec!["${SINGULARITY_ROOTFS}/a".to_string()],
                mode: None
            }
        );
        assert_eq!(
            r.setup[1],
            SetupStep::CreateDirs {
                paths: vec!["secret".to_string()],
                mode: Some(0o700)
            }
        );
        assert!(matches!(r.setup[2], SetupStep::Shell { .. }));
        assert!(matches!(r.setup[3], SetupStep::Shell { .. }));
        assert_eq!(
            r.setup[4],
            SetupStep::Shell {
                command: "mkdir -v x".to_string()
            }
        );
    }

    #[test]
    fn test_dr002_setup_mkdir_with_other_variables_is_shell() {
        let text = r#"Bootstrap: docker
%setup
  mkdir -p $HOME/cache
  mkdir -p ${SINGULARITY_ROOTFS:-/x}/ext
  mkdir -p $APPTAINER_ROOTFS/host
%runscript
  exec /x
"#;
        let r = load(text).unwrap();
        assert_eq!(
            r.setup[0],
            SetupStep::Shell {
                command: "mkdir -p $HOME/cache".to_string()
            }
        );
        assert!(matches!(r.setup[1], SetupStep::Shell { .. }));
        assert_eq!(
            r.setup[2],
            SetupStep::CreateDirs {
                paths: vec!["$APPTAINER_ROOTFS/host".to_string()],
                mode: None
            }
        );
    }

    #[test]
    fn test_dr002_run_command_forms() {
        let exec = |body: &str| {
            let text = format!("Bootstrap: docker\n%runscript\n  {}\n", body);
            load(&text).unwrap().runscript.unwrap()
        };

        assert_eq!(
            exec("/bin/echo fixed"),
            RunCommand::Exec {
                program: "/bin/echo".into(),
                args: vec!["fixed".into()],
                forward_args: false
            }
        );
        assert_eq!(
            exec(r#"exec "/opt/my tool" --flag "$@""#),
            RunCommand::Exec {
                program: "/opt/my tool".into(),
                args: vec!["--flag".into()],
                forward_args: true
            }
        );
        assert!(matches!(exec("exec $TOOL \"$@\""), RunCommand::Script { .. }));
        assert!(matches!(exec("echo a | tr a b"), RunCommand::Script { .. }));
        assert!(matches!(exec("exec \"$@\""), RunCommand::Script { .. }));
        assert!(matches!(exec("FOO=1 /bin/x"), RunCommand::Script { .. }));
    }

    #[test]
    fn test_dr002_multiline_runscript_is_script() {
        let text = "Bootstrap: docker\n%runscript\n  echo starting\n\n  exec /bin/app \"$@\"\n";
        let r = load(text).unwrap();
        assert_eq!(
            r.runscript,
            Some(RunCommand::Script {
                body: "echo starting\nexec /bin/app \"$@\"".to_string()
            })
        );
    }

    #[test]
    fn test_dr002_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Singularity");
        std::fs::write(&path, HALFPIPE).unwrap();
        let r = load_file(&path).unwrap();
        assert_eq!(r.environment.len(), 2);
        assert!(matches!(
            load_file(&dir.path().join("missing")).unwrap_err(),
            Error::Read { .. }
        ));
    }

    #[test]
    fn test_dr002_validate_unknown_bootstrap() {
        let r = load("Bootstrap: floppy\nFrom: x\n%runscript\n exec /x\n").unwrap();
        let errors = validate_recipe(&r);
        assert!(errors.iter().any(|e| e.message.contains("unknown bootstrap")));
    }

    #[test]
    fn test_dr002_validate_from_required() {
        let r = load("Bootstrap: docker\n%runscript\n exec /x\n").unwrap();
        assert!(validate_recipe(&r)
            .iter()
            .any(|e| e.message.contains("requires a From")));

        let scratch = load("Bootstrap: scratch\n%runscript\n exec /x\n").unwrap();
        assert!(validate_recipe(&scratch).is_empty());
    }

    #[test]
    fn test_dr002_validate_placeholders() {
        let r = load(
            "Bootstrap: docker\nFrom: img:{{ version }}\n%environment\n export V=\"{{ v }}\"\n%runscript\n exec /x\n",
        )
        .unwrap();
        let errors = validate_recipe(&r);
        assert_eq!(errors.len(), 2, "{:?}", errors);
    }
}
