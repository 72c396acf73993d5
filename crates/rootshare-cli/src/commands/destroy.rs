use super::{colorize_state, join, json_pretty, print_cleanup, with_spinner, CliError, EXIT_SUCCESS};
use rootshare_core::Engine;

pub fn run(engine: &Engine, name: &str, force: bool, json: bool) -> Result<u8, CliError> {
    let result = with_spinner(
        json,
        &format!("destroying container {name}..."),
        &format!("container {name} destroyed"),
        "destroy failed",
        || engine.destroy_container(name, force),
    )?;

    if json {
        println!("{}", json_pretty(&result)?);
        return Ok(EXIT_SUCCESS);
    }
    let outcome = &result.outcome;
    println!(
        "container '{name}' is now {}",
        colorize_state(&outcome.state.to_string())
    );
    if result.engine_missing {
        println!("the container engine no longer had '{name}'; only its records were removed");
    }
    if outcome.root_released {
        println!("shared root {} is no longer in use", outcome.scope);
    }
    if !outcome.purged_placeholders.is_empty() {
        println!(
            "purged placeholders: {}",
            join(&outcome.purged_placeholders)
        );
    }
    print_cleanup(&result.cleanup);
    Ok(EXIT_SUCCESS)
}
