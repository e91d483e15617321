use crate::error::CliError;
use serde::Serialize;
use std::fmt::Display;

/// Prints `value` as pretty JSON or through its `Display` table.
pub fn print_report<T: Serialize + Display>(value: &T, as_json: bool) -> Result<(), CliError> {
    if as_json {
        let json = serde_json::to_string_pretty(value)?;
        println!("{json}");
    } else {
        println!("{value}");
    }
    Ok(())
}
