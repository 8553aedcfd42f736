//! CLI module - Command-line interface for Anipush
//!
//! This module provides a structured CLI using clap for argument parsing.

mod commands;

use clap::{Parser, Subcommand};

/// Anipush - franchise tracker and notifier for the AniList catalog
#[derive(Parser)]
#[command(name = "anipush")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as background daemon with scheduler
    #[command(alias = "-d", alias = "--daemon")]
    Daemon,

    /// Run a single scan pass and print its report
    Scan {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve the franchise of a title, fetching from the catalog as needed
    Resolve {
        /// Catalog title id
        id: i32,
        /// Persist the group and dispatch notifications
        #[arg(long)]
        apply: bool,
    },

    /// Register a chat for notifications
    Subscribe {
        /// Chat id notifications are delivered to
        chat_id: i64,
        /// AniList username whose watched list is imported
        username: String,
        /// Import the watched list right away instead of on the next sync
        #[arg(long)]
        sync: bool,
    },

    /// List the subscribers notified about a title
    Watchers {
        /// Catalog title id
        title_id: i32,
    },

    /// Show store and checkpoint statistics
    Status,

    /// Create default config file
    #[command(alias = "--init")]
    Init,
}

pub use commands::*;
