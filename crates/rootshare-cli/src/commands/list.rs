use super::{colorize_state, json_pretty, CliError, EXIT_SUCCESS};
use rootshare_core::Engine;
use rootshare_schema::SharedRoot;
use rootshare_store::ContainerFilter;

pub fn run(
    engine: &Engine,
    all: bool,
    root: Option<String>,
    distro: Option<String>,
    json: bool,
) -> Result<u8, CliError> {
    let filter = ContainerFilter {
        name: None,
        distribution: distro,
        shared_root: root,
    };
    let containers = engine.filter_containers(&filter, all)?;
    if json {
        println!("{}", json_pretty(&containers)?);
    } else if containers.is_empty() {
        println!("no containers found");
    } else {
        println!("{:<20} {:<10} {:<11} ROOT", "NAME", "DISTRO", "STATE");
        for listing in &containers {
            let record = &listing.container;
            let root = record
                .shared_root
                .as_ref()
                .map_or("(private)", SharedRoot::as_str);
            println!(
                "{:<20} {:<10} {:<11} {root}",
                record.name,
                record.distribution,
                colorize_state(&listing.state.to_string())
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
