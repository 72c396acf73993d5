use super::{json_pretty, print_cleanup, with_spinner, CliError, EXIT_SUCCESS};
use rootshare_core::{CreateRequest, Engine};
use rootshare_schema::SharedRoot;

pub fn run(
    engine: &Engine,
    name: &str,
    distro: &str,
    root: Option<&str>,
    configuration: &str,
    json: bool,
) -> Result<u8, CliError> {
    let request = CreateRequest {
        name: name.to_owned(),
        distribution: distro.to_owned(),
        shared_root: root.map(SharedRoot::from),
        configuration: configuration.to_owned(),
    };
    let result = with_spinner(
        json,
        &format!("creating container {name}..."),
        &format!("container {name} created"),
        "create failed",
        || engine.create_container(request),
    )?;

    if json {
        println!("{}", json_pretty(&result)?);
        return Ok(EXIT_SUCCESS);
    }
    match root {
        Some(root) => println!("created container '{name}' ({distro}) on shared root {root}"),
        None => println!("created container '{name}' ({distro}) on a private root"),
    }
    let registration = &result.registration;
    if let Some(ref stale) = registration.replaced_stale {
        println!(
            "replaced a stale record of '{name}' ({} dependencies released)",
            stale.orphaned.len()
        );
    }
    if registration.replaced_placeholder {
        println!(
            "replaced the destroyed placeholder '{name}' ({} packages carried over)",
            registration.rehomed_packages
        );
    }
    print_cleanup(&result.cleanup);
    Ok(EXIT_SUCCESS)
}
