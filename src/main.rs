use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "card-translator",
    version,
    about = "Translate the text printed on card images"
)]
struct Cli {
    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "settings", global = true)]
    settings: Option<String>,

    /// Font file or font name used for rendering
    #[arg(long = "font", global = true)]
    font: Option<String>,

    /// Gemini API key (overrides GEMINI_API_KEY / GOOGLE_API_KEY)
    #[arg(long = "gemini-key", global = true)]
    gemini_key: Option<String>,

    /// Clipdrop API key (overrides CLIPDROP_API_KEY)
    #[arg(long = "clipdrop-key", global = true)]
    clipdrop_key: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect and translate text regions; writes an editable region table
    Detect {
        #[arg(short = 'i', long = "image")]
        image: PathBuf,
        #[arg(short = 'o', long = "out", default_value = "regions.json")]
        out: PathBuf,
        /// Write a copy of the image with the detected boxes outlined
        #[arg(long = "preview")]
        preview: Option<PathBuf>,
    },
    /// Erase the text inside the reviewed regions
    Clean {
        #[arg(short = 'i', long = "image")]
        image: PathBuf,
        #[arg(long = "regions", default_value = "regions.json")]
        regions: PathBuf,
        #[arg(short = 'o', long = "out", default_value = "cleaned.png")]
        out: PathBuf,
    },
    /// Fit and draw the translated text onto a cleaned background
    Render {
        #[arg(short = 'b', long = "background")]
        background: PathBuf,
        #[arg(long = "regions", default_value = "regions.json")]
        regions: PathBuf,
        #[arg(short = 'o', long = "out", default_value = "final.png")]
        out: PathBuf,
    },
    /// Detect, clean and render without a review step
    Run {
        #[arg(short = 'i', long = "image")]
        image: PathBuf,
        #[arg(short = 'o', long = "out", default_value = "final.png")]
        out: PathBuf,
        /// Also keep the detected region table
        #[arg(long = "regions-out")]
        regions_out: Option<PathBuf>,
    },
    /// Serve the HTTP API for the browser front end
    Serve {
        #[arg(long = "addr")]
        addr: Option<String>,
    },
}

impl From<Commands> for card_translator::Command {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Detect {
                image,
                out,
                preview,
            } => Self::Detect {
                image,
                out,
                preview,
            },
            Commands::Clean {
                image,
                regions,
                out,
            } => Self::Clean {
                image,
                regions,
                out,
            },
            Commands::Render {
                background,
                regions,
                out,
            } => Self::Render {
                background,
                regions,
                out,
            },
            Commands::Run {
                image,
                out,
                regions_out,
            } => Self::Run {
                image,
                out,
                regions_out,
            },
            Commands::Serve { addr } => Self::Serve { addr },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    card_translator::logging::init(cli.verbose)?;

    let output = card_translator::run(
        card_translator::Config {
            settings_path: cli.settings,
            font: cli.font,
            gemini_key: cli.gemini_key,
            clipdrop_key: cli.clipdrop_key,
        },
        cli.command.into(),
    )
    .await?;

    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
