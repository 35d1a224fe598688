//! DR-004: Text generation for canonical recipe text and image metadata scripts.
//!
//! Three renderings of a recipe:
//! - dump: canonical definition file (`load(dump(r)) == r`)
//! - environment_script: `.singularity.d/env/90-environment.sh`
//! - hook_script: `.singularity.d/runscript` and `startscript`

use super::shell::{quote, quote_literal};
use super::types::{Hook, Recipe, RunCommand, Section, SetupStep};
use std::fmt::Write;

const INDENT: &str = "  ";

/// Render a recipe as canonical definition-file text.
pub fn dump(recipe: &Recipe) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Bootstrap: {}", recipe.header.bootstrap);
    if let Some(ref from) = recipe.header.from {
        let _ = writeln!(out, "From: {}", from);
    }

    if !recipe.environment.is_empty() {
        section(&mut out, Section::Environment, &export_lines(recipe, quote));
    }

    if !recipe.setup.is_empty() {
        let lines: Vec<String> = recipe.setup.iter().map(setup_line).collect();
        section(&mut out, Section::Setup, &lines);
    }

    if let Some(ref cmd) = recipe.runscript {
        section(&mut out, Section::Runscript, &command_lines(cmd));
    }
    if let Some(ref cmd) = recipe.startscript {
        section(&mut out, Section::Startscript, &command_lines(cmd));
    }

    out
}

fn section(out: &mut String, section: Section, lines: &[String]) {
    let _ = writeln!(out, "\n{}", section);
    for line in lines {
        let _ = writeln!(out, "{}{}", INDENT, line);
    }
}

fn export_lines(recipe: &Recipe, quote_value: fn(&str) -> String) -> Vec<String> {
    recipe
        .environment
        .iter()
        .map(|(name, value)| format!("export {}={}", name, quote_value(value)))
        .collect()
}

fn setup_line(step: &SetupStep) -> String {
    match step {
        SetupStep::CreateDirs { paths, mode } => {
            let mut line = String::from("mkdir -p");
            if let Some(m) = mode {
                let _ = write!(line, " -m {:04o}", m);
            }
            if paths.iter().any(|p| p.starts_with('-')) {
                line.push_str(" --");
            }
            for p in paths {
                line.push(' ');
                line.push_str(&quote(p));
            }
            line
        }
        SetupStep::Shell { command } => command.clone(),
    }
}

/// Shell lines that run `cmd`.
pub fn command_lines(cmd: &RunCommand) -> Vec<String> {
    match cmd {
        RunCommand::Exec {
            program,
            args,
            forward_args,
        } => {
            let mut line = format!("exec {}", quote(program));
            for arg in args {
                line.push(' ');
                line.push_str(&quote(arg));
            }
            if *forward_args {
                line.push_str(" \"$@\"");
            }
            vec![line]
        }
        RunCommand::Script { body } => body.lines().map(str::to_string).collect(),
    }
}

/// `90-environment.sh` contents: one export per declared variable. Values are
/// literal, matching what `run` hands the child.
pub fn environment_script(recipe: &Recipe) -> String {
    let mut out = String::from("#!/bin/sh\n# Generated by defrun; edits are overwritten on build.\n");
    for line in export_lines(recipe, quote_literal) {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Executable script for a hook, or `None` when the recipe has no command.
pub fn hook_script(recipe: &Recipe, hook: Hook) -> Option<String> {
    let cmd = recipe.command_for(hook)?;
    let mut out = String::from("#!/bin/sh\n");
    for line in command_lines(cmd) {
        out.push_str(&line);
        out.push('\n');
    }
    Some(out)
}
