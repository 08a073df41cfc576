use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// The cli of verity
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Cli {
    /// What to do
    #[clap(subcommand)]
    pub command: Command,
}

/// Cube family selection on the command line
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum FamilyArg {
    /// Immutable, hash-addressed
    Frozen,
    /// Immutable, key stable under re-dating
    Pic,
    /// Mutable, signed
    Muc,
    /// Mutable, signed, monotonic counter
    Pmuc,
}

/// The available subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sculpt cubes out of a payload
    Sculpt {
        /// File holding the payload; stdin when omitted
        #[clap(short, long)]
        input: Option<PathBuf>,

        /// Directory to write the chunk files into
        #[clap(short, long, default_value = ".")]
        out: PathBuf,

        /// Cube family to sculpt
        #[clap(short, long, value_enum, default_value_t = FamilyArg::Frozen)]
        family: FamilyArg,

        /// Proof-of-work difficulty in leading zero bits
        #[clap(short, long, default_value_t = 0)]
        difficulty: u16,

        /// Content name field
        #[clap(long)]
        name: Option<String>,

        /// Media type tag
        #[clap(long)]
        media_type: Option<u8>,

        /// Notification recipient key in hex
        #[clap(long)]
        notify: Option<String>,

        /// Ed25519 secret key in hex, for the signed families
        #[clap(long)]
        signing_key: Option<String>,

        /// Update counter, for the PMUC family
        #[clap(long)]
        update_count: Option<u32>,

        /// X25519 recipient key in hex; repeatable, enables encryption
        #[clap(long)]
        recipient: Vec<String>,
    },

    /// Inspect a received cube file
    Inspect {
        /// The 1024-byte cube file
        file: PathBuf,

        /// Emit the report as JSON
        #[clap(long)]
        json: bool,
    },

    /// Generate signing and exchange key pairs
    Keygen {
        /// Emit the keys as JSON
        #[clap(long)]
        json: bool,
    },
}
