use super::{json_pretty, CliError, EXIT_SUCCESS};
use rootshare_core::Engine;

pub fn run(engine: &Engine, name: &str, set: Option<&str>, json: bool) -> Result<u8, CliError> {
    let Some(configuration) = set else {
        let current = engine.configuration(name)?;
        if json {
            let payload = serde_json::json!({
                "container": name,
                "configuration": current,
            });
            println!("{}", json_pretty(&payload)?);
        } else {
            println!("{current}");
        }
        return Ok(EXIT_SUCCESS);
    };

    engine.update_configuration(name, configuration)?;
    if json {
        let payload = serde_json::json!({
            "container": name,
            "configuration": configuration,
            "status": "updated",
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("updated configuration of '{name}'");
    }
    Ok(EXIT_SUCCESS)
}
