use super::{json_pretty, with_spinner, CliError, EXIT_SUCCESS};
use rootshare_core::Engine;

pub fn run(
    engine: &Engine,
    container: &str,
    package: &str,
    optional_of: Option<&str>,
    json: bool,
) -> Result<u8, CliError> {
    let result = with_spinner(
        json,
        &format!("installing {package} in {container}..."),
        &format!("{package} installed"),
        "install failed",
        || engine.install_package(container, package, optional_of),
    )?;

    if json {
        println!("{}", json_pretty(&result)?);
    } else {
        println!(
            "installed {package} in '{container}': {} dependencies recorded, {} already known",
            result.summary.recorded, result.summary.duplicates
        );
        for dep in &result.dependencies {
            println!("  {} ({})", dep.dependency, dep.dep_type);
        }
    }
    Ok(EXIT_SUCCESS)
}
