//! `stampede init` command implementation.

use anyhow::Result;
use std::path::Path;

use stampede::scenario::SCENARIO_FILE_NAME;

/// Execute the `init` command.
///
/// Creates `stampede.toml` in the working directory, refusing to overwrite
/// an existing file unless `force` is set.
pub fn execute_init(force: bool) -> Result<()> {
    let path = std::env::current_dir()?.join(SCENARIO_FILE_NAME);
    write_template(&path, force)?;
    eprintln!("Created {}", path.display());
    eprintln!("Edit the file to describe your requests, then run `stampede run`.");
    Ok(())
}

fn write_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Scenario file already exists: {}\n\
             Use `--force` to overwrite.",
            path.display()
        );
    }
    std::fs::write(path, default_template())?;
    Ok(())
}

/// Starter scenario with one health check and one JSON POST.
fn default_template() -> &'static str {
    r#"# stampede load test scenario
#
# Every virtual user runs the [[task]] entries in order, then waits
# think_time_ms before the next pass. Results are written to
# <output_dir>/<YYYY-MM-DD_HH-MM-SS>_results.csv.

base_url = "http://localhost:8080"

[settings]
users = 2
duration_secs = 60
think_time_ms = 1000
timeout_ms = 5000
visualizer = true
sink_workers = 5
output_dir = "."

[[task]]
label = "health"
method = "GET"
path = "/health"
expect_status = 200

[[task]]
method = "POST"
path = "/api/echo"
headers = { content-type = "application/json" }
body = '{"message":"hello"}'
"#
}
