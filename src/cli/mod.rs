//! DR-012: CLI subcommands: init, validate, inspect, dump, build, run, start.

use crate::core::error::Error;
use crate::core::types::{Hook, Recipe};
use crate::core::{builder, codegen, digest, executor, parser, state, template};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Where the recipe comes from and how its placeholders are filled.
#[derive(Args, Debug, Clone)]
pub struct RecipeArgs {
    /// Path to the definition file
    #[arg(short, long, default_value = "Singularity")]
    pub file: PathBuf,

    /// Template value (repeatable), e.g. --set version=1.2.2
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// YAML file of template values (overridden by --set)
    #[arg(long)]
    pub values: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter definition file
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Base image reference for the From: line
        #[arg(long, default_value = "alpine:3.20")]
        from: String,
    },

    /// Parse and check a definition file without building
    Validate {
        #[command(flatten)]
        recipe: RecipeArgs,
    },

    /// Show the parsed recipe and its digest
    Inspect {
        #[command(flatten)]
        recipe: RecipeArgs,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,

        /// Also report the labels of a built root filesystem
        #[arg(long)]
        rootfs: Option<PathBuf>,
    },

    /// Print the canonical form of a definition file
    Dump {
        #[command(flatten)]
        recipe: RecipeArgs,
    },

    /// Run %setup and write image metadata into a root filesystem
    Build {
        #[command(flatten)]
        recipe: RecipeArgs,

        /// Root filesystem directory
        #[arg(long, default_value = "rootfs")]
        rootfs: PathBuf,
    },

    /// Run the %runscript command with forwarded arguments
    Run {
        #[command(flatten)]
        recipe: RecipeArgs,

        /// Arguments passed to the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run the %startscript command with forwarded arguments
    Start {
        #[command(flatten)]
        recipe: RecipeArgs,

        /// Arguments passed to the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

/// Dispatch a CLI command. Returns the process exit code.
pub fn dispatch(cmd: Commands) -> Result<i32, Error> {
    match cmd {
        Commands::Init { path, from } => cmd_init(&path, &from).map(|()| 0),
        Commands::Validate { recipe } => cmd_validate(&recipe).map(|()| 0),
        Commands::Inspect {
            recipe,
            json,
            rootfs,
        } => cmd_inspect(&recipe, json, rootfs.as_deref()).map(|()| 0),
        Commands::Dump { recipe } => {
            print!("{}", codegen::dump(&load_recipe(&recipe)?));
            Ok(0)
        }
        Commands::Build { recipe, rootfs } => cmd_build(&recipe, &rootfs).map(|()| 0),
        Commands::Run { recipe, args } => cmd_run(&recipe, Hook::Run, &args),
        Commands::Start { recipe, args } => cmd_run(&recipe, Hook::Start, &args),
    }
}

const INIT_TEMPLATE: &str = r#"Bootstrap: docker
From: {{ from }}

%environment
  export LC_ALL=C

%setup
  mkdir -p ${SINGULARITY_ROOTFS}/ext ${SINGULARITY_ROOTFS}/host

%runscript
  exec /bin/echo "$@"
"#;

fn cmd_init(path: &Path, from: &str) -> Result<(), Error> {
    let recipe_path = path.join("Singularity");
    if recipe_path.exists() {
        return Err(Error::AlreadyExists(recipe_path));
    }
    std::fs::create_dir_all(path).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })?;

    let mut values = template::Values::new();
    values.insert("from".to_string(), from.to_string());
    let text = template::render(INIT_TEMPLATE, &values)?;
    std::fs::write(&recipe_path, text).map_err(|source| Error::Write {
        path: recipe_path.clone(),
        source,
    })?;

    println!("Initialized recipe at {}", recipe_path.display());
    Ok(())
}

/// Read, render, and parse the recipe named by `args`.
fn load_recipe(args: &RecipeArgs) -> Result<Recipe, Error> {
    let text = std::fs::read_to_string(&args.file).map_err(|source| Error::Read {
        path: args.file.clone(),
        source,
    })?;

    // Without values the text is parsed as written; `{{` may be literal
    // (Go templates in docker commands) and validation flags placeholders.
    if args.values.is_none() && args.set.is_empty() {
        return Ok(parser::load(&text)?);
    }

    let mut values = match args.values {
        Some(ref path) => template::load_values_file(path)?,
        None => template::Values::new(),
    };
    template::apply_overrides(&mut values, &args.set)?;

    let rendered = template::render(&text, &values)?;
    Ok(parser::load(&rendered)?)
}

fn cmd_validate(args: &RecipeArgs) -> Result<(), Error> {
    let recipe = load_recipe(args)?;
    let errors = parser::validate_recipe(&recipe);

    if errors.is_empty() {
        println!(
            "OK: {} ({} env, {} setup steps, hooks: {})",
            args.file.display(),
            recipe.environment.len(),
            recipe.setup.len(),
            hooks_summary(&recipe)
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(Error::Invalid(errors.len()))
    }
}

fn hooks_summary(recipe: &Recipe) -> String {
    let mut hooks = Vec::new();
    if recipe.runscript.is_some() {
        hooks.push("runscript");
    }
    if recipe.startscript.is_some() {
        hooks.push("startscript");
    }
    hooks.join("+")
}

fn cmd_inspect(args: &RecipeArgs, json: bool, rootfs: Option<&Path>) -> Result<(), Error> {
    let recipe = load_recipe(args)?;
    let recipe_digest = digest::recipe_digest(&recipe);
    let labels = match rootfs {
        Some(dir) => state::load_labels(dir).map_err(Error::Metadata)?,
        None => None,
    };

    if json {
        let value = serde_json::json!({
            "digest": recipe_digest,
            "recipe": recipe,
            "labels": labels,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Recipe: {}", args.file.display());
    println!("  Bootstrap: {}", recipe.header.bootstrap);
    if let Some(ref from) = recipe.header.from {
        println!("  From:      {}", from);
    }
    println!("  Digest:    {}", recipe_digest);
    if !recipe.environment.is_empty() {
        println!("  Environment:");
        for (name, value) in &recipe.environment {
            println!("    {}={}", name, value);
        }
    }
    if !recipe.setup.is_empty() {
        println!("  Setup:");
        for (i, step) in recipe.setup.iter().enumerate() {
            println!("    {}. {}", i + 1, step);
        }
        let dirs: Vec<&str> = recipe.declared_dirs().collect();
        if !dirs.is_empty() {
            println!("  Declared dirs: {}", dirs.join(" "));
        }
    }
    for hook in [Hook::Run, Hook::Start] {
        if let Some(cmd) = recipe.command_for(hook) {
            println!("  {}:", hook.section());
            for line in codegen::command_lines(cmd) {
                println!("    {}", line);
            }
        }
    }

    if let Some(dir) = rootfs {
        match labels {
            Some(l) if l.recipe_digest == recipe_digest => {
                println!("Rootfs {}: up to date ({})", dir.display(), l.generator)
            }
            Some(l) => println!(
                "Rootfs {}: STALE (built from {})",
                dir.display(),
                l.recipe_digest
            ),
            None => println!("Rootfs {}: not built. Run `defrun build` first.", dir.display()),
        }
    }
    Ok(())
}

fn cmd_build(args: &RecipeArgs, rootfs: &Path) -> Result<(), Error> {
    let recipe = load_recipe(args)?;
    for e in parser::validate_recipe(&recipe) {
        tracing::warn!("{}", e);
    }
    let report = builder::build(&recipe, rootfs)?;
    println!(
        "Built {} in {:.2}s ({} dirs created, {} existing, {} shell steps)",
        report.rootfs.display(),
        report.duration_seconds,
        report.dirs_created,
        report.dirs_existing,
        report.shell_steps
    );
    println!("  Digest: {}", report.digest);
    Ok(())
}

fn cmd_run(args: &RecipeArgs, hook: Hook, forwarded: &[String]) -> Result<i32, Error> {
    let recipe = load_recipe(args)?;
    Ok(executor::run(&recipe, hook, forwarded)?)
}
