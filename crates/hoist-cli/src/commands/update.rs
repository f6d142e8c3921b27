use super::{json_pretty, open_updater, TerminalStatus, EXIT_SUCCESS};
use hoist_core::{install_abort_handler, CommandLauncher};
use std::path::Path;

pub fn run(app: &Path, config: Option<&Path>, launch: bool, json: bool) -> Result<u8, String> {
    let updater = open_updater(app, config)?;
    install_abort_handler(updater.abort_handle());

    let status = TerminalStatus::new(json);
    let result = if launch {
        updater.run(&status, &CommandLauncher)
    } else {
        updater.update(&status)
    };
    status.bar().finish_and_clear();
    let report = result.map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else if !launch {
        let version = report
            .version
            .map_or_else(|| "unversioned".to_owned(), |v| format!("version {v}"));
        println!(
            "{} is up to date at {version}: {} patched, {} downloaded in {} round(s)",
            app.display(),
            report.patched.len(),
            report.fetched.len(),
            report.fetch_rounds
        );
    }
    Ok(EXIT_SUCCESS)
}
