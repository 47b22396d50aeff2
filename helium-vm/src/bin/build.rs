//! `he3build` — the packager CLI (spec §6.4): reads a project file,
//! translates each compilation unit from AST to IR to bytecode, links
//! the results into a single module image, and writes it to disk.
//!
//! Lexing and parsing are out-of-scope collaborators (spec §1); this
//! binary's project file carries already-structured compilation units
//! (`helium_ir::ast::CompilationUnit`, via `serde`) in place of source
//! text, so the in-scope pipeline — C2 through C4 — runs exactly as it
//! would against a real parser's output.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Deserialize;

use helium_ir::ast::CompilationUnit;
use helium_ir::translate_compilation_unit;
use helium_module::link::{link, ModuleKind as LinkModuleKind, ProjectMetadata};

/// Build a Helium module image from a project file.
#[derive(Debug, Parser)]
#[command(name = "he3build", version, about = "Package a Helium project into a module image")]
struct Args {
    /// Path to the project's JSON description.
    project_file: PathBuf,

    /// Where to write the module image. Defaults to the project name
    /// with a `.h3m` extension next to the project file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Increase log verbosity (trace-level diagnostics from every phase).
    #[arg(short, long)]
    verbose: bool,
}

/// The out-of-scope project-file loader's schema, to the extent this
/// binary needs a concrete shape for it (spec §6.4, §1): module
/// metadata plus the compilation units to package.
#[derive(Debug, Deserialize)]
struct ProjectFile {
    name: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    kind: ProjectKind,
    #[serde(default)]
    entry_override: Option<String>,
    units: Vec<CompilationUnit>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ProjectKind {
    #[default]
    Executable,
    Library,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(&args) {
        Ok(output_path) => {
            tracing::info!(path = %output_path.display(), "wrote module image");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[derive(Debug, thiserror::Error)]
enum BuildError {
    #[error("could not read project file `{path}`: {source}")]
    ReadProjectFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse project file `{path}`: {source}")]
    ParseProjectFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("project declares no compilation units")]
    NoUnits,
    #[error("translation failed with {0} diagnostic(s):\n{1}")]
    Translation(usize, String),
    #[error(transparent)]
    Emit(#[from] helium_module::EmitError),
    #[error(transparent)]
    Link(#[from] helium_module::LinkError),
    #[error("could not write module image to `{path}`: {source}")]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn run(args: &Args) -> Result<PathBuf, BuildError> {
    let text = std::fs::read_to_string(&args.project_file).map_err(|source| BuildError::ReadProjectFile {
        path: args.project_file.clone(),
        source,
    })?;
    let project: ProjectFile = serde_json::from_str(&text).map_err(|source| BuildError::ParseProjectFile {
        path: args.project_file.clone(),
        source,
    })?;
    if project.units.is_empty() {
        return Err(BuildError::NoUnits);
    }

    let mut compiled_units = Vec::with_capacity(project.units.len());
    let mut all_diagnostics = Vec::new();
    for (unit_index, unit) in project.units.iter().enumerate() {
        let outcome = translate_compilation_unit(unit);
        for diagnostic in &outcome.diagnostics {
            all_diagnostics.push(format!("unit {unit_index}: {diagnostic}"));
        }
        tracing::debug!(unit_index, functions = outcome.module.functions.len(), "translated unit");
        let compiled = helium_module::emit_module(&outcome.module, &outcome.types)?;
        compiled_units.push(compiled);
    }

    if !all_diagnostics.is_empty() {
        return Err(BuildError::Translation(all_diagnostics.len(), all_diagnostics.join("\n")));
    }

    let metadata = ProjectMetadata {
        module_name: project.name.clone(),
        module_version: project.version.clone(),
        kind: match project.kind {
            ProjectKind::Executable => LinkModuleKind::Executable,
            ProjectKind::Library => LinkModuleKind::Library,
        },
        entry_override: project.entry_override.clone(),
    };

    let image = link(compiled_units, &metadata)?;

    let output_path = args.output.clone().unwrap_or_else(|| {
        let mut path = args.project_file.clone();
        path.set_file_name(format!("{}.h3m", project.name));
        path
    });
    std::fs::write(&output_path, &image).map_err(|source| BuildError::WriteOutput {
        path: output_path.clone(),
        source,
    })?;

    Ok(output_path)
}
