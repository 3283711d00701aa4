//! Fleetward Update - one client pass
//!
//! Exit status: 0 when nothing changed, 42 when a release or patches were
//! applied and verified, 1 on any error.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fleetward_lib::engine::{
    cli::UpdateCli,
    config::ClientConfig,
    logging,
    signer::PublicKeyVerifier,
    updater::{
        client::EXIT_ERROR, ClientLayout, CommandCheck, HealthConfig, HttpTransport, SelfCheck, SignatureTreeCheck,
        UpdateClient,
    },
};

fn main() -> ExitCode {
    let cli = UpdateCli::parse();
    logging::init(if cli.verbose { "debug" } else { "info" });

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("Update failed: {e:#}");
            ExitCode::from(EXIT_ERROR as u8)
        }
    }
}

fn run(cli: UpdateCli) -> Result<u8> {
    let mut config = ClientConfig::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(url) = cli.server_url {
        config.server_url = url;
    }
    if let Some(hostname) = cli.hostname {
        config.hostname = Some(hostname);
    }

    let verifier = PublicKeyVerifier::from_hex(&config.public_key).context("parsing public_key")?;
    let transport = HttpTransport::new(
        &config.server_url,
        Some(Duration::from_secs(config.request_timeout_secs)),
    )?;

    let command_check;
    let tree_check;
    let self_check: &dyn SelfCheck = match &config.verify_command {
        Some(command) => {
            command_check = CommandCheck::new(HealthConfig {
                timeout: Duration::from_secs(config.verify_timeout_secs),
                command: command.clone(),
            });
            &command_check
        }
        None => {
            tree_check = SignatureTreeCheck::new(&verifier);
            &tree_check
        }
    };

    let layout = ClientLayout {
        root_dir: config.root_dir.clone(),
        release_file: config.release_path(),
        scratch_dir: config.scratch_path(),
        hostname: config.resolve_hostname()?,
    };
    std::fs::create_dir_all(&layout.scratch_dir)
        .with_context(|| format!("creating {}", layout.scratch_dir.display()))?;

    let outcome = UpdateClient::new(layout, &transport, &verifier, self_check).run_once()?;
    for report in &outcome.patch_reports {
        for rejection in report.rejected() {
            tracing::warn!(patch_id = %report.id, %rejection, "Patch file was refused");
        }
    }
    Ok(outcome.exit_code() as u8)
}
