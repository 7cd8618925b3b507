use anyhow::{Context as _, Result, bail};
use dialoguer::Password;
use std::io::{self, BufRead};

use crate::cli::SecretCommand;
use crate::ui;
use crate::vault::{KeyringCredentials, SecretSource, env_var_name};

pub fn run(cmd: SecretCommand) -> Result<()> {
    let vault = KeyringCredentials::new();
    match cmd {
        SecretCommand::Set { service, stdin } => set(&vault, &service, stdin),
        SecretCommand::Delete { service } => {
            vault.remove(&service)?;
            ui::success(&format!("Removed secret '{service}'"));
            Ok(())
        }
        SecretCommand::Status { service } => status(&vault, &service),
    }
}

fn set(vault: &KeyringCredentials, service: &str, from_stdin: bool) -> Result<()> {
    let value = if from_stdin {
        read_line(io::stdin().lock())?
    } else {
        Password::new()
            .with_prompt(format!("Secret for '{service}'"))
            .with_confirmation("Confirm", "Secrets do not match")
            .interact()?
    };
    if value.is_empty() {
        bail!("Refusing to store an empty secret");
    }

    vault.store(service, &value)?;
    ui::success(&format!("Stored secret '{service}' in the system keychain"));
    Ok(())
}

/// First line of `reader` without the line ending
fn read_line(mut reader: impl BufRead) -> Result<String> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .context("Failed to read secret from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn status(vault: &KeyringCredentials, service: &str) -> Result<()> {
    let source = vault.source(service)?;
    ui::kv("Secret", service);
    ui::kv("Source", &source.to_string());
    if source == SecretSource::Missing {
        ui::dim(&format!(
            "Set it with 'ignition secret set {service}' or the {} variable",
            env_var_name(service)
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_line_strips_line_ending() {
        assert_eq!(read_line(Cursor::new("s3cret\r\nrest")).unwrap(), "s3cret");
        assert_eq!(read_line(Cursor::new("")).unwrap(), "");
    }
}
