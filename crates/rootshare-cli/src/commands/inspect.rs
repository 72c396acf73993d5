use super::{colorize_state, json_pretty, CliError, EXIT_SUCCESS};
use rootshare_core::Engine;

pub fn run(engine: &Engine, name: &str, json: bool) -> Result<u8, CliError> {
    let inspection = engine.inspect(name)?;
    if json {
        println!("{}", json_pretty(&inspection)?);
        return Ok(EXIT_SUCCESS);
    }
    let record = &inspection.container;
    println!("name:          {}", record.name);
    println!("distribution:  {}", record.distribution);
    println!("state:         {}", colorize_state(&inspection.state.to_string()));
    println!("root:          {}", inspection.scope);
    println!(
        "root users:    {} active, {} total",
        inspection.root_active, inspection.root_references
    );
    println!("packages:      {}", inspection.packages.len());
    for package in &inspection.packages {
        if package.package_type.is_empty() {
            println!("  {}", package.name);
        } else {
            println!("  {} [{}]", package.name, package.package_type);
        }
    }
    println!("dependencies:  {}", inspection.dependencies.len());
    for edge in &inspection.dependencies {
        println!("  {} -> {} ({})", edge.package, edge.dependency, edge.dep_type);
    }
    Ok(EXIT_SUCCESS)
}
