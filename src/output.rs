use std::io::{self, Write};

use serde::Serialize;

use crate::app::{BootstrapResult, ProgressEvent, ProgressSink};
use crate::deploy::DeployResult;
use crate::entities::UpsertResult;
use crate::report::ImportReport;
use crate::search::IndexReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_upsert(result: &UpsertResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_import(result: &ImportReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_index(result: &IndexReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_bootstrap(result: &BootstrapResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_deploy(result: &DeployResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Progress goes to the tracing log; stdout is reserved for the JSON result.
impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => tracing::debug!("{}", event.message),
        }
    }
}
