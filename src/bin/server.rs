//! Fleetward Server - update endpoint and operator commands
//!
//! `fleetward-server serve` answers client polls; every other subcommand
//! edits the shared store directly and records itself in the audit trail.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use fleetward_lib::engine::{
    api::{create_router, ApiState},
    authority::{
        AdminSession, AuditTrail, HostRegistry, IssueKey, IssueTracker, NewPatch, PatchAuthority, ReleaseStore,
    },
    cli::{
        formatter::{format_age, format_size, CliFormatter},
        AuditAction, Commands, HostAction, IssueAction, IssueGrouping, KeysAction, OutputFormat, PatchAction,
        ReleaseAction, ServerCli,
    },
    config::{ConfigError, ServerConfig},
    logging,
    nosql::{NoSqlEngine, Query},
    signer::SigningKeyPair,
};

#[tokio::main]
async fn main() {
    let cli = ServerCli::parse();
    logging::init("info,tower_http=info");

    if let Err(e) = run(cli).await {
        CliFormatter::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run(cli: ServerCli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let json = cli.format == OutputFormat::Json;
    let actor = cli
        .actor
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "admin".to_string());

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(config, host, port).await,
        Commands::Keys { action } => cmd_keys(action, &config, json),
        Commands::Release { action } => cmd_release(action, &config, &actor, json),
        Commands::Patch { action } => cmd_patch(action, &config, &actor, json),
        Commands::Issue { action } => cmd_issue(action, &config, &actor, json),
        Commands::Host { action } => cmd_host(action, &config, &actor, json),
        Commands::Audit { action } => cmd_audit(action, &config, json),
    }
}

fn load_config(path: &Path) -> Result<ServerConfig> {
    match ServerConfig::load(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) => {
            let base = dirs::data_local_dir()
                .map(|d| d.join("fleetward"))
                .unwrap_or_else(|| PathBuf::from("."));
            tracing::warn!(path = %path.display(), base = %base.display(), "No config file, using defaults");
            Ok(ServerConfig::default_for(&base))
        }
        Err(e) => Err(e).with_context(|| format!("loading {}", path.display())),
    }
}

fn open_store(config: &ServerConfig) -> Result<NoSqlEngine> {
    NoSqlEngine::open_or_create(&config.store_path)
        .with_context(|| format!("opening store at {}", config.store_path.display()))
}

fn load_key(config: &ServerConfig) -> Result<SigningKeyPair> {
    SigningKeyPair::load(&config.signing_key_path)
        .with_context(|| format!("loading signing key {}", config.signing_key_path.display()))
}

fn print_json(value: serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Print the names a mutation changed
fn report_changed(verb: &str, what: &str, names: &[String], json: bool) -> Result<()> {
    if json {
        let mut body = serde_json::Map::new();
        body.insert(verb.to_string(), serde_json::json!(names));
        return print_json(serde_json::Value::Object(body));
    }
    CliFormatter::changed(verb, what, names);
    Ok(())
}

async fn cmd_serve(config: ServerConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    let store = open_store(&config)?;
    let releases = ReleaseStore::new(&config.release_dir);
    let current = releases.current_version()?;

    let state = ApiState {
        store: Arc::new(store),
        releases: Arc::new(releases),
    };
    let app = create_router(state);

    let addr = format!(
        "{}:{}",
        host.unwrap_or(config.host),
        port.unwrap_or(config.port)
    );
    tracing::info!("Fleetward server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(%addr, release = ?current, store = %config.store_path.display(), "Listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn cmd_keys(action: KeysAction, config: &ServerConfig, json: bool) -> Result<()> {
    match action {
        KeysAction::Generate { force } => {
            if config.signing_key_path.exists() && !force {
                bail!(
                    "{} already exists; pass --force to replace it",
                    config.signing_key_path.display()
                );
            }
            let key = SigningKeyPair::generate();
            key.save(&config.signing_key_path)?;
            if json {
                print_json(serde_json::json!({
                    "path": config.signing_key_path,
                    "public_key": key.public_key_hex(),
                }))?;
            } else {
                CliFormatter::success(&format!("Signing key written to {}", config.signing_key_path.display()));
                CliFormatter::kv("Public key", &key.public_key_hex());
            }
        }
        KeysAction::Show => {
            let key = load_key(config)?;
            if json {
                print_json(serde_json::json!({ "public_key": key.public_key_hex() }))?;
            } else {
                println!("{}", key.public_key_hex());
            }
        }
    }
    Ok(())
}

fn cmd_release(action: ReleaseAction, config: &ServerConfig, actor: &str, json: bool) -> Result<()> {
    let releases = ReleaseStore::new(&config.release_dir);
    match action {
        ReleaseAction::Build { source, number } => {
            let store = open_store(config)?;
            let key = load_key(config)?;
            let session = AdminSession::new(&store, actor).with_signer(&key);
            let release = session.publish_release(&releases, &config.release_file, &source, number)?;

            if json {
                print_json(serde_json::json!({
                    "version": release.version,
                    "size": release.bundle.len(),
                    "sha256": release.sha256_hex(),
                }))?;
            } else {
                CliFormatter::success(&format!("Published release {}", release.version));
                CliFormatter::kv("Size", &format_size(release.bundle.len() as u64));
                CliFormatter::kv("SHA-256", &release.sha256_hex());
            }
        }
        ReleaseAction::Status => {
            let current = releases.current()?;
            if json {
                print_json(serde_json::json!({
                    "version": current.as_ref().map(|r| r.version),
                    "sha256": current.as_ref().map(|r| r.sha256_hex()),
                }))?;
            } else {
                match current {
                    Some(release) => {
                        CliFormatter::header("Current Release");
                        CliFormatter::kv("Version", &release.version.to_string());
                        CliFormatter::kv("Size", &format_size(release.bundle.len() as u64));
                        CliFormatter::kv("SHA-256", &release.sha256_hex());
                    }
                    None => CliFormatter::warning("No release has been published"),
                }
            }
        }
    }
    Ok(())
}

fn cmd_patch(action: PatchAction, config: &ServerConfig, actor: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    match action {
        PatchAction::Create {
            path,
            file,
            delete,
            mode,
            unsigned,
            hosts,
        } => {
            let mut request = match (file, delete) {
                (_, true) => NewPatch::delete(&path),
                (Some(file), false) => {
                    let content = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
                    NewPatch::write(&path, content).mode(mode)
                }
                (None, false) => bail!("either --file or --delete is required"),
            };
            if unsigned {
                request = request.unsigned();
            }
            if !hosts.is_empty() {
                request = request.for_hosts(hosts);
            }

            let key = if request.signed { Some(load_key(config)?) } else { None };
            let mut session = AdminSession::new(&store, actor);
            if let Some(key) = key.as_ref() {
                session = session.with_signer(key);
            }
            let id = session.create_patch(request)?;

            if json {
                print_json(serde_json::json!({ "id": id }))?;
            } else {
                CliFormatter::success(&format!("Created patch {id}"));
            }
        }
        PatchAction::List => {
            let patches = PatchAuthority::new(&store).list_patches()?;
            if json {
                let list: Vec<_> = patches
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "id": p.id,
                            "submitted_at": p.record.submitted_at,
                            "paths": p.record.files.iter().map(|f| &f.path).collect::<Vec<_>>(),
                            "pending_hosts": p.record.pending_hosts,
                            "completed_hosts": p.record.completed_hosts,
                        })
                    })
                    .collect();
                print_json(serde_json::json!(list))?;
            } else if patches.is_empty() {
                CliFormatter::info("No patches");
            } else {
                CliFormatter::header("Patches");
                CliFormatter::table_header(&["ID", "Submitted", "Path", "Pending", "Completed"]);
                for p in &patches {
                    let submitted = p.record.submitted_at.format("%Y-%m-%d %H:%M").to_string();
                    let path = p.record.files.first().map(|f| f.path.as_str()).unwrap_or("-");
                    let pending = p.record.pending_hosts.len().to_string();
                    let completed = p.record.completed_hosts.len().to_string();
                    CliFormatter::table_row(&[&p.id, &submitted, path, &pending, &completed]);
                }
            }
        }
    }
    Ok(())
}

fn cmd_issue(action: IssueAction, config: &ServerConfig, actor: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let session = AdminSession::new(&store, actor);

    let (verb, ids) = match action {
        IssueAction::Open { hostname, name, as_of } => {
            let id = session.open_issue(&hostname, &name, as_of)?;
            ("opened", id.into_iter().collect())
        }
        IssueAction::Close { host, name } => ("closed", session.close_issue(host.as_deref(), name.as_deref())?),
        IssueAction::Snooze { host, name, until, hours } => {
            let until = match (until, hours) {
                (Some(until), _) => until,
                (None, Some(hours)) => Utc::now() + Duration::hours(hours),
                (None, None) => bail!("either --until or --hours is required"),
            };
            ("snoozed", session.snooze_issue(host.as_deref(), name.as_deref(), until)?)
        }
        IssueAction::Unsnooze { host, name } => ("unsnoozed", session.unsnooze_issue(host.as_deref(), name.as_deref())?),
        IssueAction::List {
            by,
            host,
            name,
            include_suspended,
        } => {
            let key = match by {
                IssueGrouping::Host => IssueKey::Host,
                IssueGrouping::Issue => IssueKey::Issue,
            };
            let groups = IssueTracker::new(&store).get_open_issues(key, host.as_deref(), name.as_deref(), include_suspended)?;
            if json {
                let value: serde_json::Map<_, _> = groups
                    .iter()
                    .map(|(outer, inner)| {
                        let inner: serde_json::Map<_, _> = inner
                            .iter()
                            .map(|(k, s)| (k.clone(), serde_json::json!({ "id": s.id, "issue": s.record })))
                            .collect();
                        (outer.clone(), serde_json::Value::Object(inner))
                    })
                    .collect();
                return print_json(serde_json::Value::Object(value));
            }
            if groups.is_empty() {
                CliFormatter::info("No open issues");
            }
            let now = Utc::now();
            for (outer, inner) in &groups {
                CliFormatter::header(outer);
                for (key, stored) in inner {
                    let mut line = format!("{key} (opened {})", format_age(Some(stored.record.opened_at), now));
                    if stored.record.is_snoozed(now) {
                        line.push_str(&format!(" [snoozed until {}]", stored.record.unsnooze_at.unwrap_or(now).to_rfc3339()));
                    }
                    CliFormatter::item(&line);
                }
            }
            return Ok(());
        }
    };

    report_changed(verb, "issue(s)", &ids, json)
}

fn cmd_host(action: HostAction, config: &ServerConfig, actor: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let session = AdminSession::new(&store, actor);

    let (verb, changed) = match action {
        HostAction::Suspend { hosts } => ("suspended", session.suspend_hosts(&hosts.into_iter().collect::<BTreeSet<_>>())?),
        HostAction::Unsuspend { hosts } => {
            ("unsuspended", session.unsuspend_hosts(&hosts.into_iter().collect::<BTreeSet<_>>())?)
        }
        HostAction::List => {
            let registry = HostRegistry::new(&store);
            let mut clients = Vec::new();
            for hostname in registry.known_hosts()? {
                if let Some(stored) = registry.get(&hostname)? {
                    clients.push(stored.record);
                }
            }
            if json {
                return print_json(serde_json::json!(clients));
            }
            CliFormatter::header("Known Hosts");
            CliFormatter::table_header(&["Host", "Suspended", "Last check-in"]);
            let now = Utc::now();
            for client in &clients {
                let suspended = if client.suspended { "yes" } else { "no" };
                CliFormatter::table_row(&[&client.hostname, suspended, &format_age(client.last_checkin, now)]);
            }
            return Ok(());
        }
    };

    report_changed(verb, "host(s)", &changed, json)
}

fn cmd_audit(action: AuditAction, config: &ServerConfig, json: bool) -> Result<()> {
    let store = open_store(config)?;
    match action {
        AuditAction::List { action, operator, limit } => {
            let query = Query::new()
                .filter_opt("action", action.as_deref())
                .filter_opt("actor", operator.as_deref())
                .limit(limit);
            let records = AuditTrail::new(&store).query(&query)?;

            if json {
                let list: Vec<_> = records.iter().map(|s| &s.record).collect();
                return print_json(serde_json::json!(list));
            }
            if records.is_empty() {
                CliFormatter::info("No audit records");
            }
            for stored in &records {
                let record = &stored.record;
                let action = record.fields.get("action").and_then(|v| v.as_str()).unwrap_or("-");
                let actor = record.fields.get("actor").and_then(|v| v.as_str()).unwrap_or("-");
                let detail: Vec<String> = record
                    .fields
                    .iter()
                    .filter(|(k, _)| *k != "action" && *k != "actor")
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                println!(
                    "{}  {:<16} {:<10} {}",
                    record.audited_at.format("%Y-%m-%d %H:%M:%S"),
                    action,
                    actor,
                    detail.join(" ")
                );
            }
        }
    }
    Ok(())
}
