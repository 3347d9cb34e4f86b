use clap::{Parser, Subcommand};

/// Provisions Azure Key Vaults as an Azure Functions custom handler
#[derive(Parser)]
#[command(name = "kv-provisioner", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the function HTTP server (default)
    Serve {
        /// Port to bind; defaults to FUNCTIONS_CUSTOMHANDLER_PORT or 8080
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Provision one vault without going through HTTP and print the response
    Provision {
        #[arg(long)]
        keyvault_name: String,
        #[arg(long)]
        owning_group_object_id: String,
    },

    /// Ask ARM whether a vault name is still available
    CheckName {
        #[arg(long)]
        keyvault_name: String,
    },
}
