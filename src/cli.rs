use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;

use crate::config::{self, ExplorerConfig};
use crate::credentials::{CredentialStore, MemoryCredentialStore};
use crate::driver_couchbase::CouchbaseDriver;
use crate::errors::ExplorerError;
use crate::explorer::ExplorerController;
use crate::models::enums::NodeType;
use crate::models::structs::ConnectionDraft;
use crate::settings::{JsonSettingsStore, SettingsStore};
use crate::tree::NodeId;

pub const PASSWORD_ENV: &str = "COUCHBASE_EXPLORER_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "couchbase-explorer", version, about = "Browse Couchbase clusters from the terminal")]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// List saved connections
    List,
    /// Save a connection; the password is read from COUCHBASE_EXPLORER_PASSWORD
    Add {
        name: String,
        host: String,
        username: String,
        #[arg(long)]
        ssl: bool,
    },
    /// Delete a saved connection
    Remove { name: String },
    /// Connect and print buckets, scopes, collections and the first page of ids
    Browse { name: String },
}

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    crate::init_logging();
    let cli = Cli::parse();

    let config = ExplorerConfig::from_env();
    config::ensure_data_dir(&config)?;
    info!("Using data directory {}", config.data_dir.display());

    let settings = JsonSettingsStore::new(config.settings_path());
    let credentials = MemoryCredentialStore::new();
    let password = std::env::var(PASSWORD_ENV).ok();
    if let Some(password) = &password {
        for record in settings.load() {
            credentials.set(&record.id, password)?;
        }
    }

    let driver = Arc::new(CouchbaseDriver::new(&config));
    let mut controller =
        ExplorerController::new(config, driver, Box::new(settings), Box::new(credentials))?;
    controller.load_connections();

    match cli.command {
        CliCommand::List => {
            for record in controller.connection_records() {
                println!(
                    "{}\t{}\t{}{}",
                    record.name,
                    record.connection_string,
                    record.username,
                    if record.use_ssl { "\tssl" } else { "" }
                );
            }
        }
        CliCommand::Add {
            name,
            host,
            username,
            ssl,
        } => {
            let password = password.ok_or_else(|| {
                ExplorerError::validation("password", format!("Set {} first", PASSWORD_ENV))
            })?;
            let draft = ConnectionDraft {
                name,
                host,
                username,
                password,
                use_ssl: ssl,
            };
            controller.add_connection(&draft)?;
            println!("Saved connection '{}'", draft.name.trim());
        }
        CliCommand::Remove { name } => {
            let node = find(&controller, &name)?;
            controller.delete_connection(node)?;
            controller.wait_for_background();
            report_notifications(&mut controller);
            println!("Removed connection '{}'", name);
        }
        CliCommand::Browse { name } => {
            let node = find(&controller, &name)?;
            browse(&mut controller, node, &name)?;
        }
    }
    Ok(())
}

fn find(controller: &ExplorerController, name: &str) -> Result<NodeId, ExplorerError> {
    controller
        .find_connection_by_name(name)
        .ok_or_else(|| ExplorerError::validation("name", format!("No connection named '{}'", name)))
}

fn report_notifications(controller: &mut ExplorerController) {
    for n in controller.take_notifications() {
        eprintln!("{}: {}", n.title, n.message);
    }
}

fn browse(
    controller: &mut ExplorerController,
    node: NodeId,
    name: &str,
) -> Result<(), ExplorerError> {
    controller.connect(node)?;
    controller.wait_for_background();
    let connected = controller
        .tree()
        .node(node)
        .is_some_and(|n| n.kind.is_connected_connection());
    if !connected {
        report_notifications(controller);
        return Err(ExplorerError::NotConnected(name.to_string()));
    }

    for level in [NodeType::Bucket, NodeType::Scope, NodeType::Collection] {
        let targets: Vec<NodeId> = controller
            .tree()
            .descendants(node)
            .into_iter()
            .filter(|id| controller.tree().node(*id).is_some_and(|n| n.node_type() == level))
            .collect();
        for target in targets {
            controller.expand(target);
        }
        controller.wait_for_background();
    }

    print!("{}", controller.tree().render());
    report_notifications(controller);
    controller.shutdown();
    Ok(())
}
