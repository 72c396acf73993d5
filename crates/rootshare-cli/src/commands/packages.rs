use super::{json_pretty, CliError, EXIT_SUCCESS};
use rootshare_core::Engine;
use rootshare_schema::SharedRoot;
use rootshare_store::PackageFilter;

pub fn run(engine: &Engine, filter: &PackageFilter, json: bool) -> Result<u8, CliError> {
    let packages = engine.list_packages(filter)?;
    if json {
        println!("{}", json_pretty(&packages)?);
    } else if packages.is_empty() {
        println!("no packages found");
    } else {
        println!("{:<24} {:<20} {:<20} TYPE", "PACKAGE", "CONTAINER", "ROOT");
        for package in &packages {
            let root = package
                .shared_root
                .as_ref()
                .map_or("(private)", SharedRoot::as_str);
            println!(
                "{:<24} {:<20} {root:<20} {}",
                package.name, package.container, package.package_type
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
