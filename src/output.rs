use std::io::{self, Write};

use serde::Serialize;

use crate::sync::{CollectReport, OrganizeReport, StatusReport, UploadReport, VerifyReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_collect(result: &CollectReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_upload(result: &UploadReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_verify(result: &VerifyReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_organize(result: &OrganizeReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusReport) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::sync::ProgressSink for JsonOutput {
    fn event(&self, _event: crate::sync::ProgressEvent) {}
}
