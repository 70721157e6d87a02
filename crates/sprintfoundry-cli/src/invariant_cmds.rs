//! `sprintfoundry invariant` subcommands: browse the embedded preset
//! library and run the quality gate ad hoc against a directory, without
//! needing a scheduler run in flight.

use std::path::Path;

use anyhow::Result;

use sprintfoundry_core::gate::run_quality_gate;
use sprintfoundry_core::presets;

use crate::InvariantCommands;

pub async fn run_invariant_command(command: InvariantCommands) -> Result<()> {
    match command {
        InvariantCommands::List { project_type } => cmd_list(project_type.as_deref()),
        InvariantCommands::Check { dir } => cmd_check(Path::new(&dir)).await,
    }
}

fn cmd_list(project_type: Option<&str>) -> Result<()> {
    let presets = match project_type {
        Some(t) => presets::presets_for_project_type(t),
        None => presets::load_presets(),
    };

    if presets.is_empty() {
        println!("No presets registered for that project type.");
        return Ok(());
    }

    println!("Invariant presets:");
    for preset in &presets {
        println!(
            "  {:<16} [{:<8}] {:<8} {} {}",
            preset.name,
            preset.project_type,
            preset.kind,
            preset.command,
            preset.args.join(" ")
        );
        println!("      {}", preset.description);
    }
    Ok(())
}

/// Detect the project type at `dir` and run its full quality gate, printing
/// a pass/fail summary. Exits non-zero if the gate fails, mirroring the
/// scheduler's own interpretation of a failed gate as needing rework.
async fn cmd_check(dir: &Path) -> Result<()> {
    match presets::detect_project_type(dir) {
        Some(project_type) => println!("Detected project type: {project_type}"),
        None => {
            println!("Could not detect a known project type at {}; nothing to check.", dir.display());
            return Ok(());
        }
    }

    let outcome = run_quality_gate(dir).await;
    if outcome.passed {
        println!("PASS: all checks succeeded.");
        Ok(())
    } else {
        println!("FAIL: {} check(s) failed:", outcome.failures.len());
        for failure in &outcome.failures {
            println!("  - {failure}");
        }
        anyhow::bail!("quality gate failed")
    }
}
