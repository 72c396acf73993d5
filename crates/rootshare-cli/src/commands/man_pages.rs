use super::{CliError, EXIT_SUCCESS};
use clap::CommandFactory;
use std::path::Path;

pub fn run<C: CommandFactory>(dir: &Path) -> Result<u8, CliError> {
    std::fs::create_dir_all(dir).map_err(|e| format!("failed to create dir: {e}"))?;
    let cmd = C::command();
    render(&clap_mangen::Man::new(cmd.clone()), &dir.join("rootshare.1"))?;
    for sub in cmd.get_subcommands() {
        let path = dir.join(format!("rootshare-{}.1", sub.get_name()));
        render(&clap_mangen::Man::new(sub.clone()), &path)?;
    }
    println!("man pages written to {}", dir.display());
    Ok(EXIT_SUCCESS)
}

fn render(man: &clap_mangen::Man, path: &Path) -> Result<(), String> {
    let mut buf = Vec::new();
    man.render(&mut buf)
        .map_err(|e| format!("man page render failed: {e}"))?;
    std::fs::write(path, &buf).map_err(|e| format!("failed to write {}: {e}", path.display()))
}
