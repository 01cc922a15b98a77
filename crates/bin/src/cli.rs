//! CLI argument definitions for the contextdb binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// contextdb key and replica tooling
#[derive(Parser, Debug)]
#[command(name = "contextdb")]
#[command(about = "contextdb: context-scoped databases - keys, signatures and local replicas")]
#[command(version)]
pub struct Cli {
    /// Print JSON instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the public keys derived from a keyring seed
    Keys(KeysArgs),
    /// Sign a message with a keyring
    Sign(SignArgs),
    /// Verify a signature against a public key
    Verify(VerifyArgs),
    /// Parse a database URI
    Uri(UriArgs),
    /// Inspect local replica files
    #[command(subcommand)]
    Db(DbCommands),
}

/// Keyring seed shared by the commands that derive keys
#[derive(clap::Args, Debug)]
pub struct SeedArgs {
    /// Keyring seed: the account's signature over the context unlock message
    #[arg(long, env = "CONTEXTDB_SEED", hide_env_values = true)]
    pub seed: String,
}

#[derive(clap::Args, Debug)]
pub struct KeysArgs {
    #[command(flatten)]
    pub seed: SeedArgs,

    /// Also show the fingerprint of this database's encryption key
    #[arg(short, long)]
    pub database: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct SignArgs {
    #[command(flatten)]
    pub seed: SeedArgs,

    /// Message to sign
    pub message: String,
}

#[derive(clap::Args, Debug)]
pub struct VerifyArgs {
    /// Hex encoded Ed25519 public key (32 bytes, or 33 with a leading zero)
    #[arg(long)]
    pub public_key: String,

    /// Hex encoded signature
    #[arg(long)]
    pub signature: String,

    /// Signed message
    pub message: String,
}

#[derive(clap::Args, Debug)]
pub struct UriArgs {
    /// URI of the form <scheme>://<did>/<context>/<database>
    pub uri: String,
}

#[derive(Subcommand, Debug)]
pub enum DbCommands {
    /// List the documents of a replica file
    List(DbListArgs),
    /// Show one document of a replica file
    Get(DbGetArgs),
}

/// Replica file and optional decryption key
#[derive(clap::Args, Debug)]
pub struct ReplicaArgs {
    /// Local replica file (`<data dir>/<database hash>.json`)
    #[arg(short, long, env = "CONTEXTDB_REPLICA")]
    pub file: PathBuf,

    /// Keyring seed used to decrypt document bodies
    #[arg(long, env = "CONTEXTDB_SEED", hide_env_values = true, requires = "database")]
    pub seed: Option<String>,

    /// Database name the replica belongs to, needed for decryption
    #[arg(short, long, env = "CONTEXTDB_DATABASE")]
    pub database: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct DbListArgs {
    #[command(flatten)]
    pub replica: ReplicaArgs,
}

#[derive(clap::Args, Debug)]
pub struct DbGetArgs {
    #[command(flatten)]
    pub replica: ReplicaArgs,

    /// Document id
    pub id: String,
}
