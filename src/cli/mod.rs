use clap::{Args as ClapArgs, Parser, Subcommand};

mod commands;
pub mod errors;
mod validation;

pub use commands::run;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage decks
    Deck {
        #[clap(subcommand)]
        action: DeckArgs,
    },
    /// Manage cards
    Card {
        #[clap(subcommand)]
        action: CardArgs,
    },
    /// Semantic search over card contents
    Search {
        query: String,

        /// Deck id or name. All decks by default.
        #[clap(short, long)]
        deck: Option<String>,

        /// Maximum number of results
        #[clap(short, long)]
        limit: Option<usize>,

        /// Only return scores strictly above this, in [-1, 1]
        #[clap(short, long, allow_hyphen_values = true)]
        threshold: Option<f32>,
    },
    /// Compute embeddings for cards that lack one
    Reembed {
        /// Deck id or name. All decks by default.
        #[clap(short, long)]
        deck: Option<String>,
    },
    /// Write a deck to a file path or http(s) url
    Export {
        /// Deck id or name
        deck: String,

        location: String,
    },
    /// Replace a deck with the document at a file path or http(s) url
    Import {
        location: String,

        /// Deck id or name to overwrite. A new deck is created by default.
        #[clap(short, long)]
        deck: Option<String>,

        /// Don't ask before overwriting local cards
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
    /// Show sync state of a deck
    Status {
        /// Deck id or name
        deck: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum DeckArgs {
    /// Create a deck
    Add {
        name: String,

        #[clap(short, long)]
        description: Option<String>,

        #[clap(long)]
        artwork_url: Option<String>,

        #[clap(long, default_value = "false")]
        public: bool,
    },
    /// List decks
    List {},
    /// Change deck fields
    Edit {
        /// Deck id or name
        deck: String,

        #[clap(short, long)]
        name: Option<String>,

        #[clap(short, long)]
        description: Option<String>,

        #[clap(long)]
        artwork_url: Option<String>,

        #[clap(long)]
        public: Option<bool>,
    },
    /// Delete a deck and all its cards
    Delete {
        /// Deck id or name
        deck: String,

        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CardFields {
    /// Front title
    #[clap(short, long)]
    pub title: Option<String>,

    /// Back content; this is what search embeds
    #[clap(short, long)]
    pub back: Option<String>,

    /// Back content format
    #[clap(long)]
    pub format: Option<String>,

    /// Card tags, comma separated
    #[clap(short = 'g', long)]
    pub tags: Option<String>,

    /// Zone template for the card front (JSON)
    #[clap(long)]
    pub front_json: Option<String>,

    #[clap(long)]
    pub favorite: Option<bool>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CardArgs {
    /// Create a card
    Add {
        /// Deck id or name
        #[clap(short, long)]
        deck: String,

        #[clap(flatten)]
        fields: CardFields,
    },
    /// List cards
    List {
        /// Deck id or name. All decks by default.
        #[clap(short, long)]
        deck: Option<String>,
    },
    /// Show a card with its rendered front
    Show { id: String },
    /// Change card fields
    Edit {
        id: String,

        /// Move the card to another deck
        #[clap(short, long)]
        deck: Option<String>,

        #[clap(flatten)]
        fields: CardFields,
    },
    /// Copy a card within its deck
    Duplicate { id: String },
    /// Delete a card
    Delete { id: String },
}
