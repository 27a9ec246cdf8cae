use crate::config::{ENV_TOKEN_ID, ENV_TOKEN_SECRET};
use crate::session::AuthorizationMode;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "nim",
    version,
    about = "Build customized SolarNode images with the SolarNode Image Maker",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Security token credentials. The secret is only ever read from the command
/// line or the environment.
#[derive(Args, Debug, Clone)]
pub struct CredentialArgs {
    #[arg(long, env = ENV_TOKEN_ID, help = "SolarNetwork security token ID")]
    pub token: Option<String>,

    #[arg(
        long,
        env = ENV_TOKEN_SECRET,
        hide_env_values = true,
        help = "SolarNetwork security token secret"
    )]
    pub secret: Option<String>,

    #[arg(
        long,
        value_enum,
        help = "Who issues the image session key (default: from config)"
    )]
    pub mode: Option<AuthorizationMode>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Check credentials by requesting an image session key")]
    Authorize {
        #[command(flatten)]
        credentials: CredentialArgs,

        #[arg(long, help = "Save the token ID (never the secret) to the config file")]
        save: bool,
    },

    #[command(about = "List the available base images")]
    Images {
        #[command(flatten)]
        credentials: CredentialArgs,

        #[arg(short, long, help = "Output in JSON format")]
        json: bool,
    },

    #[command(about = "Customize a base image with files and build it")]
    Build {
        #[command(flatten)]
        credentials: CredentialArgs,

        #[arg(short, long, help = "Base image ID to customize")]
        image: String,

        #[arg(
            short,
            long = "file",
            help = "File to add to the image (can be repeated)"
        )]
        files: Vec<PathBuf>,

        #[arg(long, help = "Path to a JSON file of image options")]
        options: Option<PathBuf>,

        #[arg(long, help = "Return after submitting instead of waiting for the build")]
        no_wait: bool,

        #[arg(
            short,
            long,
            help = "Download the finished image to this path",
            conflicts_with = "no_wait"
        )]
        output: Option<PathBuf>,
    },

    Config {
        #[command(subcommand)]
        action: ConfigSubcommand,
    },
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    Get {
        key: String,
    },

    Set {
        key: String,
        value: String,
    },

    List {
        #[arg(short, long, help = "Output in JSON format")]
        json: bool,
    },
}
