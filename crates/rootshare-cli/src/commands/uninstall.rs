use super::{join, json_pretty, print_cleanup, with_spinner, CliError, EXIT_SUCCESS};
use rootshare_core::Engine;

pub fn run(engine: &Engine, container: &str, package: &str, json: bool) -> Result<u8, CliError> {
    let result = with_spinner(
        json,
        &format!("uninstalling {package} from {container}..."),
        &format!("{package} uninstalled"),
        "uninstall failed",
        || engine.uninstall_package(container, package),
    )?;

    if json {
        println!("{}", json_pretty(&result)?);
        return Ok(EXIT_SUCCESS);
    }
    if result.package_removed {
        println!("removed {package} from '{container}'");
    } else {
        println!("{package} is still needed on the shared root; only '{container}' released it");
    }
    if let Some(ref registration) = result.registration {
        if !registration.local_copies.is_empty() {
            println!(
                "host wrappers to delete: {}",
                join(&registration.local_copies)
            );
        }
    }
    print_cleanup(&result.cleanup);
    Ok(EXIT_SUCCESS)
}
